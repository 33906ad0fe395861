//! The observation queue: lifecycle, capture worker and injection path.

mod activity;
mod error;
mod stats;
mod worker;

pub use error::QueueError;

use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::endpoint::{Endpoint, EndpointAuthority};
use crate::transport::{LiveCapture, PacketSink, PacketSource, PcapFileSource, ReadOnlySink};
use crate::{Activity, QueueStats, Traffic};

use activity::ActivityPublisher;
use stats::Accumulator;
use worker::Worker;

/// Live traffic observation queue.
///
/// A background worker reads frames from the transport, counts them,
/// classifies them and publishes [`Activity`] events for local peers.
/// [`Queue::send`] injects frames through the same interface, and
/// [`Queue::stop`] shuts everything down exactly once. Dropping the queue
/// stops it.
///
/// # Examples
/// ```no_run
/// use std::time::Duration;
///
/// use wirequeue_core::{Endpoint, Queue, QueueConfig};
///
/// let endpoint = Endpoint::from_device("eth0")?;
/// let queue = Queue::open(endpoint, &QueueConfig::default())?;
/// if let Ok(activity) = queue.activities().recv_timeout(Duration::from_secs(5)) {
///     println!("{} is {}", activity.ip, activity.mac);
/// }
/// queue.stop();
/// println!("{} packets", queue.stats().packets_received);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Queue {
    active: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stats: Arc<Accumulator>,
    activities: Receiver<Activity>,
    lifecycle: Mutex<Lifecycle>,
}

/// State shared by `send` and `stop`, guarded by one lock.
struct Lifecycle {
    sink: Option<Box<dyn PacketSink + Send>>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Queue {
    /// Open a live, promiscuous capture on the endpoint's interface and
    /// start the worker.
    pub fn open(endpoint: Endpoint, config: &QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let (source, sink) =
            LiveCapture::open(&endpoint.name, config).map_err(QueueError::TransportOpen)?;
        Self::with_transport(endpoint, source, sink, config)
    }

    /// Run the queue over a capture file. Injection always fails with
    /// `QueueError::Write`; the worker stops at end of file.
    pub fn replay<A>(authority: A, path: &Path, config: &QueueConfig) -> Result<Self, QueueError>
    where
        A: EndpointAuthority + Send + 'static,
    {
        let source = PcapFileSource::open(path).map_err(QueueError::TransportOpen)?;
        Self::with_transport(authority, source, ReadOnlySink, config)
    }

    /// Start a queue over an already opened transport.
    pub fn with_transport<A, S, K>(
        authority: A,
        source: S,
        sink: K,
        config: &QueueConfig,
    ) -> Result<Self, QueueError>
    where
        A: EndpointAuthority + Send + 'static,
        S: PacketSource + Send + 'static,
        K: PacketSink + Send + 'static,
    {
        config.validate()?;
        let (events_tx, events_rx) = bounded(config.activity_capacity);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let active = Arc::new(AtomicBool::new(true));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(Accumulator::new());

        let own_ip = authority.own_ip();
        let worker = Worker {
            source,
            authority,
            stats: Arc::clone(&stats),
            publisher: ActivityPublisher::new(events_tx, shutdown_rx, config.overflow),
            active: Arc::clone(&active),
            running: Arc::clone(&running),
        };
        let handle = thread::Builder::new()
            .name("wirequeue-worker".to_string())
            .spawn(move || worker.run())
            .map_err(QueueError::Spawn)?;
        info!(%own_ip, capacity = config.activity_capacity, "queue started");

        Ok(Self {
            active,
            running,
            stats,
            activities: events_rx,
            lifecycle: Mutex::new(Lifecycle {
                sink: Some(Box::new(sink)),
                shutdown: Some(shutdown_tx),
                worker: Some(handle),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inject one raw frame. Concurrent calls are serialized.
    ///
    /// # Errors
    /// `QueueError::Inactive` after `stop` (no counter changes), or
    /// `QueueError::Write` when the transport rejects the frame (counted in
    /// `errors`).
    pub fn send(&self, raw: &[u8]) -> Result<(), QueueError> {
        let mut lifecycle = self.lock();
        if !self.active.load(Ordering::Acquire) {
            return Err(QueueError::Inactive);
        }
        let sink = lifecycle.sink.as_mut().ok_or(QueueError::Inactive)?;
        match sink.write_packet(raw) {
            Ok(()) => {
                self.stats
                    .sent_bytes
                    .fetch_add(raw.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %err, len = raw.len(), "packet injection failed");
                Err(QueueError::Write(err))
            }
        }
    }

    /// Stop capturing: mark inactive, release the worker, close both
    /// transport halves and wait for the worker to exit. Later calls do
    /// nothing.
    pub fn stop(&self) {
        let mut lifecycle = self.lock();
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        drop(lifecycle.shutdown.take());
        drop(lifecycle.sink.take());
        if let Some(handle) = lifecycle.worker.take() {
            if handle.join().is_err() {
                warn!("capture worker panicked");
            }
        }
        info!(
            packets = self.stats.packets_received.load(Ordering::Relaxed),
            "queue stopped"
        );
    }

    /// True until `stop` is called.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// True while the worker thread is still consuming the stream. Becomes
    /// false at end of stream even if the queue is still active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Receiving end of the activity stream. Every clone competes for the
    /// same events. Once the worker exits (end of stream or `stop`) and the
    /// buffered events are drained, receives report disconnection.
    pub fn activities(&self) -> Receiver<Activity> {
        self.activities.clone()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.snapshot()
    }

    pub fn traffic(&self, ip: Ipv4Addr) -> Option<Traffic> {
        self.stats.traffic(ip)
    }

    /// Occurrences of protocol layer `name` (for example `"IPv4"`).
    pub fn protocol_count(&self, name: &str) -> u64 {
        self.stats.protocol_count(name)
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.stop();
    }
}
