use std::fs;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::{Receiver, RecvTimeoutError, after, bounded, never, select};
use glob::glob;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wirequeue_core::{
    Activity, DEFAULT_GENERATED_AT, Endpoint, EndpointError, Ipv4Subnet, OverflowPolicy, Queue,
    QueueConfig, QueueError, Report, list_devices, make_report,
};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("WIREQUEUE_BUILD_COMMIT"),
    ", ",
    env!("WIREQUEUE_BUILD_DATE"),
    ")"
);

const PRIVILEGE_HINT: &str = "live capture usually needs root or CAP_NET_RAW/CAP_NET_ADMIN";

#[derive(Parser, Debug)]
#[command(name = "wirequeue")]
#[command(version, long_version = LONG_VERSION)]
#[command(
    about = "Observe live traffic: protocol counts, per-peer volume and local endpoint activity.",
    long_about = None,
    after_help = "Examples:\n  wirequeue devices\n  wirequeue watch eth0 --duration 30 -o report.json\n  wirequeue replay capture.pcapng --address 10.0.0.1 --subnet 10.0.0.0/24 --stdout\n  wirequeue inject eth0 frame.bin"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List capture devices and their IPv4 addresses.
    Devices,

    /// Capture live on an interface and write a JSON report when done.
    #[command(
        after_help = "Examples:\n  wirequeue watch eth0 --duration 30 -o report.json\n  wirequeue watch eth0 --subnet 192.168.1.0/24 --stdout --activities"
    )]
    Watch {
        /// Interface to capture on
        interface: String,

        /// Override the subnet read from the interface (CIDR)
        #[arg(long)]
        subnet: Option<String>,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,

        #[command(flatten)]
        capture: CaptureArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run the observation queue over a .pcap or .pcapng file.
    #[command(
        after_help = "Examples:\n  wirequeue replay capture.pcapng --address 10.0.0.1 --subnet 10.0.0.0/24 -o report.json\n  wirequeue replay 'captures/*.pcap' --address 10.0.0.1 --subnet 10.0.0.0/24 --stdout"
    )]
    Replay {
        /// Path or glob pattern matching exactly one capture file
        input: PathBuf,

        /// Address of the capturing host
        #[arg(long)]
        address: Ipv4Addr,

        /// Local subnet (CIDR)
        #[arg(long)]
        subnet: String,

        #[command(flatten)]
        capture: CaptureArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Send one raw frame read from a file.
    Inject {
        /// Interface to send on
        interface: String,

        /// File holding the complete frame, link header included
        frame: PathBuf,

        /// Suppress non-error output
        #[arg(long)]
        quiet: bool,
    },
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// Queue configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bytes captured per frame
    #[arg(long)]
    snaplen: Option<i32>,

    /// Activity stream capacity
    #[arg(long)]
    capacity: Option<usize>,

    /// What the worker does when the activity stream is full
    #[arg(long, value_enum)]
    overflow: Option<OverflowArg>,

    /// Print activities as JSON lines on stderr
    #[arg(long)]
    activities: bool,
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output report path (JSON)
    #[arg(short = 'o', long, required_unless_present = "stdout")]
    report: Option<PathBuf>,

    /// Write JSON report to stdout
    #[arg(long, conflicts_with = "report")]
    stdout: bool,

    /// Pretty-print JSON output
    #[arg(long, conflicts_with = "compact")]
    pretty: bool,

    /// Compact JSON output (default)
    #[arg(long)]
    compact: bool,

    /// Suppress non-error output
    #[arg(long)]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OverflowArg {
    Block,
    DropNewest,
}

impl From<OverflowArg> for OverflowPolicy {
    fn from(value: OverflowArg) -> Self {
        match value {
            OverflowArg::Block => OverflowPolicy::Block,
            OverflowArg::DropNewest => OverflowPolicy::DropNewest,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Devices => cmd_devices(),
        Commands::Watch {
            interface,
            subnet,
            duration,
            capture,
            output,
        } => cmd_watch(&interface, subnet.as_deref(), duration, &capture, &output),
        Commands::Replay {
            input,
            address,
            subnet,
            capture,
            output,
        } => cmd_replay(&input, address, &subnet, &capture, &output),
        Commands::Inject {
            interface,
            frame,
            quiet,
        } => cmd_inject(&interface, &frame, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{err:#}"), None)
    }
}

impl From<EndpointError> for CliError {
    fn from(err: EndpointError) -> Self {
        let hint = match &err {
            EndpointError::InvalidSubnet { .. } => "use CIDR notation such as 192.168.1.0/24",
            EndpointError::DeviceNotFound(_) => "run `wirequeue devices` to list interfaces",
            EndpointError::NoIpv4Address(_) => "pass --subnet or pick an interface with IPv4",
            EndpointError::Transport(_) => PRIVILEGE_HINT,
        };
        CliError::new(err.to_string(), Some(hint.to_string()))
    }
}

impl From<QueueError> for CliError {
    fn from(err: QueueError) -> Self {
        let hint = match &err {
            QueueError::TransportOpen(_) => Some(PRIVILEGE_HINT.to_string()),
            QueueError::Config(_) => Some("check --config and the override flags".to_string()),
            _ => None,
        };
        CliError::new(err.to_string(), hint)
    }
}

fn cmd_devices() -> Result<(), CliError> {
    let devices = list_devices().map_err(|err| {
        CliError::new(
            format!("device listing failed: {err}"),
            Some(PRIVILEGE_HINT.to_string()),
        )
    })?;
    if devices.is_empty() {
        return Err(CliError::new(
            "no capture devices found",
            Some(PRIVILEGE_HINT.to_string()),
        ));
    }

    let mut out = std::io::stdout().lock();
    for device in devices {
        let addresses = device
            .ipv4
            .iter()
            .map(|(addr, mask)| match mask.map(|mask| Ipv4Subnet::from_netmask(*addr, mask)) {
                Some(Ok(subnet)) => format!("{addr} ({subnet})"),
                _ => addr.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let description = device.description.unwrap_or_default();
        writeln!(out, "{}\t{}\t{}", device.name, addresses, description)
            .context("Failed to write device list")?;
    }
    Ok(())
}

fn cmd_watch(
    interface: &str,
    subnet: Option<&str>,
    duration: Option<u64>,
    capture: &CaptureArgs,
    output: &OutputArgs,
) -> Result<(), CliError> {
    let config = capture.load_config()?;
    let mut endpoint = Endpoint::from_device(interface)?;
    if let Some(subnet) = subnet {
        endpoint.subnet = subnet.parse::<Ipv4Subnet>()?;
    }
    output.check_format()?;

    let (interrupt_tx, interrupt_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    let queue = Queue::open(endpoint.clone(), &config)?;
    if !output.quiet {
        eprintln!(
            "watching {} ({} in {}), Ctrl-C to stop",
            endpoint.name, endpoint.address, endpoint.subnet
        );
    }

    let activities = queue.activities();
    let deadline = duration.map(|secs| after(Duration::from_secs(secs)));
    let deadline = deadline.unwrap_or_else(never);
    loop {
        select! {
            recv(activities) -> activity => match activity {
                Ok(activity) => print_activity(&activity, capture.activities && !output.quiet),
                Err(_) => break,
            },
            recv(interrupt_rx) -> _ => {
                debug!("interrupted");
                break;
            }
            recv(deadline) -> _ => break,
        }
    }
    queue.stop();
    for activity in activities.try_iter() {
        print_activity(&activity, capture.activities && !output.quiet);
    }

    let report = make_report(&endpoint, queue.stats(), &generated_at());
    output.emit(&report, None)
}

fn cmd_replay(
    input: &Path,
    address: Ipv4Addr,
    subnet: &str,
    capture: &CaptureArgs,
    output: &OutputArgs,
) -> Result<(), CliError> {
    let resolved_input = resolve_input_path(input)?;
    validate_input_file(&resolved_input)?;
    let subnet = subnet.parse::<Ipv4Subnet>()?;
    let config = capture.load_config()?;
    output.check_format()?;

    let endpoint = Endpoint::new(resolved_input.display().to_string(), address, subnet);
    let queue = Queue::replay(endpoint.clone(), &resolved_input, &config)?;
    let activities = queue.activities();
    let show = capture.activities && !output.quiet;
    drain_until_idle(&queue, &activities, show);
    queue.stop();

    let report = make_report(&endpoint, queue.stats(), &generated_at());
    output.emit(&report, Some(&resolved_input))
}

/// Consume activities until the worker has reached the end of the file.
fn drain_until_idle(queue: &Queue, activities: &Receiver<Activity>, show: bool) {
    loop {
        match activities.recv_timeout(Duration::from_millis(50)) {
            Ok(activity) => print_activity(&activity, show),
            Err(RecvTimeoutError::Timeout) if queue.is_running() => {}
            Err(_) => break,
        }
    }
    for activity in activities.try_iter() {
        print_activity(&activity, show);
    }
}

fn cmd_inject(interface: &str, frame: &Path, quiet: bool) -> Result<(), CliError> {
    let data = fs::read(frame)
        .with_context(|| format!("Failed to read frame file: {}", frame.display()))?;
    if data.is_empty() {
        return Err(CliError::new(
            format!("frame file is empty: {}", frame.display()),
            Some("write the raw frame bytes, link header included".to_string()),
        ));
    }

    let endpoint = Endpoint::from_device(interface)?;
    let queue = Queue::open(endpoint, &QueueConfig::default())?;
    let sent = queue.send(&data);
    queue.stop();
    sent?;

    if !quiet {
        eprintln!("OK: sent {} bytes on {}", data.len(), interface);
    }
    Ok(())
}

impl CaptureArgs {
    fn load_config(&self) -> Result<QueueConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => QueueConfig::from_json_file(path).map_err(|err| {
                CliError::new(
                    format!("failed to load config {}: {err}", path.display()),
                    Some("expected a JSON object with queue settings".to_string()),
                )
            })?,
            None => QueueConfig::default(),
        };
        if let Some(snaplen) = self.snaplen {
            config.snaplen = snaplen;
        }
        if let Some(capacity) = self.capacity {
            config.activity_capacity = capacity;
        }
        if let Some(overflow) = self.overflow {
            config.overflow = overflow.into();
        }
        config.validate().map_err(QueueError::from)?;
        Ok(config)
    }
}

impl OutputArgs {
    fn check_format(&self) -> Result<(), CliError> {
        if self.pretty && self.compact {
            return Err(CliError::new(
                "cannot use --pretty and --compact together",
                Some("choose one output format".to_string()),
            ));
        }
        if !self.stdout && self.report.is_none() {
            return Err(CliError::new(
                "missing output path",
                Some("use -o/--report or --stdout".to_string()),
            ));
        }
        Ok(())
    }

    fn emit(&self, rep: &Report, input: Option<&Path>) -> Result<(), CliError> {
        let json = serialize_report(rep, self.pretty)?;
        let Some(report) = self.report.as_ref().filter(|_| !self.stdout) else {
            println!("{}", json);
            return Ok(());
        };

        if let Some(input) = input {
            ensure_distinct(report, input)?;
        }
        if let Some(parent) = report.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create output directory: {}", parent.display())
                })?;
            }
        }
        fs::write(report, json)
            .with_context(|| format!("Failed to write report: {}", report.display()))?;

        if !self.quiet {
            eprintln!("OK: report written -> {}", report.display());
        }
        Ok(())
    }
}

fn serialize_report(rep: &Report, pretty: bool) -> Result<String, CliError> {
    if pretty {
        serde_json::to_string_pretty(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    } else {
        serde_json::to_string(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    }
}

fn print_activity(activity: &Activity, show: bool) {
    if !show {
        return;
    }
    match serde_json::to_string(activity) {
        Ok(line) => eprintln!("{}", line),
        Err(err) => debug!(error = %err, "activity serialization failed"),
    }
}

fn generated_at() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| DEFAULT_GENERATED_AT.to_string())
}

fn ensure_distinct(report: &Path, input: &Path) -> Result<(), CliError> {
    let input_abs = fs::canonicalize(input)
        .with_context(|| format!("Failed to resolve input path: {}", input.display()))?;
    let parent = match report.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    // A missing output directory cannot contain the input.
    let Ok(report_dir) = fs::canonicalize(parent) else {
        return Ok(());
    };
    let Some(file_name) = report.file_name() else {
        return Err(CliError::new(
            format!("invalid report path: {}", report.display()),
            None,
        ));
    };
    if report_dir.join(file_name) == input_abs {
        return Err(CliError::new(
            format!("report path must differ from input: {}", report.display()),
            Some("choose a different output path".to_string()),
        ));
    }
    Ok(())
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    if !input.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "pcap" && ext != "pcapng" {
        return Err(CliError::new(
            format!("unsupported input format '{}'", input.display()),
            Some("expected a .pcap or .pcapng file".to_string()),
        ));
    }
    Ok(())
}

fn resolve_input_path(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(input.to_path_buf());
    }

    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    let mut matches = Vec::new();
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    match matches.len() {
        0 => Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern; expected .pcap or .pcapng".to_string()),
        )),
        1 => Ok(matches.remove(0)),
        count => {
            let mut listed = matches
                .iter()
                .take(3)
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if count > 3 {
                listed.push_str(", ...");
            }
            Err(CliError::new(
                format!(
                    "multiple files match pattern '{}' ({} matches); matches: {}",
                    pattern, count, listed
                ),
                Some("pass a single capture file, or run once per file".to_string()),
            ))
        }
    }
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
