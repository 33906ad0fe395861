use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, trace, warn};

use crate::Activity;
use crate::classify::classify;
use crate::endpoint::EndpointAuthority;
use crate::transport::{PacketEvent, PacketSource};

use super::activity::{ActivityPublisher, Delivery, detect};
use super::stats::Accumulator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Capture loop: Running until the stream ends, a read fails, or the
/// queue is stopped.
pub(crate) struct Worker<S, A> {
    pub(crate) source: S,
    pub(crate) authority: A,
    pub(crate) stats: Arc<Accumulator>,
    pub(crate) publisher: ActivityPublisher,
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) running: Arc<AtomicBool>,
}

impl<S: PacketSource, A: EndpointAuthority> Worker<S, A> {
    pub(crate) fn run(mut self) {
        info!("capture worker started");
        while !self.stopping() {
            let event = match self.source.next_packet() {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!("capture stream ended");
                    break;
                }
                Err(err) if err.is_timeout() => continue,
                Err(err) => {
                    warn!(error = %err, "capture read failed, worker exiting");
                    break;
                }
            };
            // A frame read while `stop` was running is discarded.
            if self.stopping() || self.process(&event) == Flow::Stop {
                break;
            }
        }
        self.running.store(false, Ordering::Release);
        info!("capture worker stopped");
    }

    fn stopping(&self) -> bool {
        !self.active.load(Ordering::Acquire) || self.publisher.is_shutdown()
    }

    fn process(&self, event: &PacketEvent) -> Flow {
        let len = event.data.len() as u64;
        self.stats.record_packet(len, event.ts);

        let classified = classify(event.linktype, &event.data);
        trace!(len, layers = ?classified.layers, "packet");
        self.stats.count_protocols(classified.protocols());

        let observed = detect(&self.authority, &classified);
        if let Some(activity) = observed.source {
            if self.deliver(activity) == Flow::Stop {
                return Flow::Stop;
            }
            self.stats.add_sent(activity.ip, len);
        }
        if let Some(activity) = observed.destination {
            if self.deliver(activity) == Flow::Stop {
                return Flow::Stop;
            }
            self.stats.add_received(activity.ip, len);
        }
        Flow::Continue
    }

    fn deliver(&self, activity: Activity) -> Flow {
        match self.publisher.publish(activity) {
            Delivery::Delivered => Flow::Continue,
            Delivery::Dropped => {
                self.stats.activities_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(ip = %activity.ip, "activity stream full, event dropped");
                Flow::Continue
            }
            Delivery::Shutdown => Flow::Stop,
        }
    }
}
