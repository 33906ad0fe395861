//! wirequeue core library: live traffic observation queue.
//!
//! A [`Queue`] attaches to one capture transport and runs a single worker
//! thread over it: every frame is counted, classified into protocol layers,
//! attributed to local peers, and turned into [`Activity`] events for
//! endpoints inside the interface's subnet. Frames can be injected back
//! through the same interface with [`Queue::send`].
//!
//! Layering mirrors the data flow: `transport` (live libpcap capture or a
//! capture file) -> `classify` (etherparse slicing, pure) -> `queue`
//! (accounting, activity stream, lifecycle). Only `transport` performs I/O.
//!
//! Invariants:
//! - `packets_received`/`received_bytes` count every frame read, decodable
//!   or not.
//! - Protocol and peer maps insert a key once and only grow afterwards.
//! - After [`Queue::stop`] returns, no counter is updated by the worker and
//!   [`Queue::send`] fails with [`QueueError::Inactive`].
//!
//! # Examples
//! ```no_run
//! use std::path::Path;
//!
//! use wirequeue_core::{Endpoint, Queue, QueueConfig};
//!
//! let endpoint = Endpoint::new("replay", "10.0.0.1".parse()?, "10.0.0.0/24".parse()?);
//! let queue = Queue::replay(endpoint, Path::new("capture.pcapng"), &QueueConfig::default())?;
//! for activity in queue.activities().iter().take(3) {
//!     println!("{} {}", activity.ip, activity.mac);
//! }
//! queue.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

mod classify;
mod config;
mod endpoint;
mod queue;
mod transport;

pub use classify::{Classified, EthernetView, Ipv4View, LayerKind, classify};
pub use config::{ConfigError, OverflowPolicy, QueueConfig};
pub use endpoint::{Endpoint, EndpointAuthority, EndpointError, Ipv4Subnet, MacAddr};
pub use queue::{Queue, QueueError};
pub use transport::{
    DeviceInfo, LiveCapture, LiveSink, LiveSource, PacketEvent, PacketSink, PacketSource,
    PcapFileSource, ReadOnlySink, TransportError, list_devices,
};

/// Link types understood by [`classify`].
pub use pcap_parser::Linktype;

/// Current report schema version.
pub const REPORT_VERSION: u32 = 1;
/// Timestamp used when the clock cannot be formatted.
pub const DEFAULT_GENERATED_AT: &str = "1970-01-01T00:00:00Z";

/// A local endpoint seen on one side of a packet.
///
/// `source` is true when `ip` was the packet's sender. `mac` is always the
/// frame's Ethernet source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Activity {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub source: bool,
}

/// Directional byte totals for one local peer.
///
/// `received` here is traffic addressed to the peer, unlike
/// [`QueueStats::received_bytes`], which counts every observed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Traffic {
    pub sent: u64,
    pub received: u64,
}

/// Point-in-time copy of the queue counters with deterministic ordering.
///
/// # Examples
/// ```
/// use wirequeue_core::{ProtocolCount, QueueStats};
///
/// let stats = QueueStats {
///     started_at: wirequeue_core::DEFAULT_GENERATED_AT.to_string(),
///     first_capture_at: None,
///     last_capture_at: None,
///     packets_received: 2,
///     received_bytes: 180,
///     sent_bytes: 0,
///     errors: 0,
///     activities_dropped: 0,
///     protocols: vec![ProtocolCount { name: "IPv4".to_string(), count: 2 }],
///     peers: Vec::new(),
/// };
/// assert_eq!(stats.protocols[0].count, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// RFC3339 time the queue was started.
    pub started_at: String,
    /// RFC3339 capture time of the earliest frame, when the transport
    /// reports timestamps.
    pub first_capture_at: Option<String>,
    /// RFC3339 capture time of the latest frame.
    pub last_capture_at: Option<String>,
    /// Frames read from the transport.
    pub packets_received: u64,
    /// Bytes of every frame read, regardless of direction.
    pub received_bytes: u64,
    /// Bytes successfully injected.
    pub sent_bytes: u64,
    /// Failed injections.
    pub errors: u64,
    /// Activities discarded by the `drop_newest` overflow policy.
    pub activities_dropped: u64,
    /// Protocol layer counts sorted by name.
    pub protocols: Vec<ProtocolCount>,
    /// Local peers sorted by address.
    pub peers: Vec<PeerTraffic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTraffic {
    pub address: Ipv4Addr,
    pub sent: u64,
    pub received: u64,
}

/// Versioned report written by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report schema version (not the binary version).
    pub report_version: u32,
    pub tool: ToolInfo,
    /// RFC3339 timestamp of report generation.
    pub generated_at: String,
    pub interface: InterfaceInfo,
    pub stats: QueueStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    /// Interface name, or the capture file path for replays.
    pub name: String,
    pub address: Ipv4Addr,
    /// Subnet in CIDR form.
    pub subnet: String,
}

/// Build a report for `endpoint` from a stats snapshot.
///
/// # Examples
/// ```
/// use wirequeue_core::{Endpoint, QueueStats, make_report};
///
/// let endpoint = Endpoint::new("eth0", "10.0.0.1".parse()?, "10.0.0.0/24".parse()?);
/// let stats = QueueStats {
///     started_at: wirequeue_core::DEFAULT_GENERATED_AT.to_string(),
///     first_capture_at: None,
///     last_capture_at: None,
///     packets_received: 0,
///     received_bytes: 0,
///     sent_bytes: 0,
///     errors: 0,
///     activities_dropped: 0,
///     protocols: Vec::new(),
///     peers: Vec::new(),
/// };
/// let report = make_report(&endpoint, stats, "2024-01-01T00:00:00Z");
/// assert_eq!(report.interface.subnet, "10.0.0.0/24");
/// assert_eq!(report.report_version, wirequeue_core::REPORT_VERSION);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn make_report(endpoint: &Endpoint, stats: QueueStats, generated_at: &str) -> Report {
    Report {
        report_version: REPORT_VERSION,
        tool: ToolInfo {
            name: "wirequeue".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        generated_at: generated_at.to_string(),
        interface: InterfaceInfo {
            name: endpoint.name.clone(),
            address: endpoint.address,
            subnet: endpoint.subnet.to_string(),
        },
        stats,
    }
}
