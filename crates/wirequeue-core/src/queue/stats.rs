use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::classify::LayerKind;
use crate::{DEFAULT_GENERATED_AT, PeerTraffic, ProtocolCount, QueueStats, Traffic};

/// Counters and maps written by the capture worker (and the injection path
/// for `sent_bytes`/`errors`), readable from any thread.
#[derive(Debug)]
pub(crate) struct Accumulator {
    started_at: String,
    pub(crate) packets_received: AtomicU64,
    pub(crate) received_bytes: AtomicU64,
    pub(crate) sent_bytes: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) activities_dropped: AtomicU64,
    /// First and last capture timestamps seen, in seconds since the epoch.
    capture_window: Mutex<Option<(f64, f64)>>,
    protocols: RwLock<HashMap<&'static str, u64>>,
    traffic: RwLock<HashMap<Ipv4Addr, Traffic>>,
}

impl Accumulator {
    pub(crate) fn new() -> Self {
        let started_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| DEFAULT_GENERATED_AT.to_string());
        Self {
            started_at,
            packets_received: AtomicU64::new(0),
            received_bytes: AtomicU64::new(0),
            sent_bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            activities_dropped: AtomicU64::new(0),
            capture_window: Mutex::new(None),
            protocols: RwLock::new(HashMap::new()),
            traffic: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn record_packet(&self, len: u64, ts: Option<f64>) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.received_bytes.fetch_add(len, Ordering::Relaxed);
        if let Some(ts) = ts {
            let mut window = self
                .capture_window
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *window = Some(match *window {
                Some((first, last)) => (first.min(ts), last.max(ts)),
                None => (ts, ts),
            });
        }
    }

    pub(crate) fn count_protocols(&self, layers: impl IntoIterator<Item = LayerKind>) {
        let mut protocols = self
            .protocols
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for layer in layers {
            *protocols.entry(layer.name()).or_insert(0) += 1;
        }
    }

    /// Attribute `len` bytes sent by the local peer `ip`.
    pub(crate) fn add_sent(&self, ip: Ipv4Addr, len: u64) {
        self.update_traffic(ip, |traffic| traffic.sent += len);
    }

    /// Attribute `len` bytes received by the local peer `ip`.
    pub(crate) fn add_received(&self, ip: Ipv4Addr, len: u64) {
        self.update_traffic(ip, |traffic| traffic.received += len);
    }

    fn update_traffic(&self, ip: Ipv4Addr, apply: impl FnOnce(&mut Traffic)) {
        let mut traffic = self.traffic.write().unwrap_or_else(PoisonError::into_inner);
        apply(traffic.entry(ip).or_default());
    }

    pub(crate) fn traffic(&self, ip: Ipv4Addr) -> Option<Traffic> {
        self.traffic
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ip)
            .copied()
    }

    pub(crate) fn protocol_count(&self, name: &str) -> u64 {
        self.protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Copy everything into a snapshot; protocols sorted by name, peers by
    /// address.
    pub(crate) fn snapshot(&self) -> QueueStats {
        let mut protocols: Vec<ProtocolCount> = self
            .protocols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, count)| ProtocolCount {
                name: (*name).to_string(),
                count: *count,
            })
            .collect();
        protocols.sort_by(|a, b| a.name.cmp(&b.name));

        let mut peers: Vec<PeerTraffic> = self
            .traffic
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(address, traffic)| PeerTraffic {
                address: *address,
                sent: traffic.sent,
                received: traffic.received,
            })
            .collect();
        peers.sort_by_key(|peer| peer.address);

        let window = *self
            .capture_window
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        QueueStats {
            started_at: self.started_at.clone(),
            first_capture_at: window.and_then(|(first, _)| format_capture_ts(first)),
            last_capture_at: window.and_then(|(_, last)| format_capture_ts(last)),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            received_bytes: self.received_bytes.load(Ordering::Relaxed),
            sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            activities_dropped: self.activities_dropped.load(Ordering::Relaxed),
            protocols,
            peers,
        }
    }
}

// Microsecond resolution; the fraction is split off before scaling.
fn format_capture_ts(ts: f64) -> Option<String> {
    let secs = ts.floor();
    let micros = ((ts - secs) * 1e6).round() as i64;
    let at = OffsetDateTime::from_unix_timestamp(secs as i64).ok()?
        + time::Duration::microseconds(micros);
    at.format(&Rfc3339).ok()
}
