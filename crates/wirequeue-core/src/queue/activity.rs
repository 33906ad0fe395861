use std::net::Ipv4Addr;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, select};

use crate::Activity;
use crate::classify::Classified;
use crate::config::OverflowPolicy;
use crate::endpoint::EndpointAuthority;

/// Local endpoints seen on either side of one packet.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Observation {
    pub source: Option<Activity>,
    pub destination: Option<Activity>,
}

/// Derive activities from a classified packet. Both sides may fire for
/// local-to-local traffic; the interface's own address never does.
pub(crate) fn detect<A: EndpointAuthority + ?Sized>(
    authority: &A,
    classified: &Classified,
) -> Observation {
    let (Some(eth), Some(ipv4)) = (classified.ethernet, classified.ipv4) else {
        return Observation::default();
    };
    let own = authority.own_ip();
    let is_peer = |ip: Ipv4Addr| ip != own && authority.contains(ip);

    Observation {
        source: is_peer(ipv4.src).then_some(Activity {
            ip: ipv4.src,
            mac: eth.src_mac,
            source: true,
        }),
        // The destination event carries the frame's source MAC as well.
        destination: is_peer(ipv4.dst).then_some(Activity {
            ip: ipv4.dst,
            mac: eth.src_mac,
            source: false,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    Dropped,
    Shutdown,
}

/// Bounded, shutdown-aware side of the activity stream.
pub(crate) struct ActivityPublisher {
    events: Sender<Activity>,
    shutdown: Receiver<()>,
    policy: OverflowPolicy,
}

impl ActivityPublisher {
    pub(crate) fn new(
        events: Sender<Activity>,
        shutdown: Receiver<()>,
        policy: OverflowPolicy,
    ) -> Self {
        Self {
            events,
            shutdown,
            policy,
        }
    }

    /// The shutdown channel is never written to; its sender being dropped
    /// is the signal.
    pub(crate) fn is_shutdown(&self) -> bool {
        matches!(self.shutdown.try_recv(), Err(TryRecvError::Disconnected))
    }

    pub(crate) fn publish(&self, activity: Activity) -> Delivery {
        match self.policy {
            OverflowPolicy::DropNewest => match self.events.try_send(activity) {
                Ok(()) => Delivery::Delivered,
                Err(TrySendError::Full(_)) => Delivery::Dropped,
                Err(TrySendError::Disconnected(_)) => Delivery::Shutdown,
            },
            OverflowPolicy::Block => select! {
                send(self.events, activity) -> sent => match sent {
                    Ok(()) => Delivery::Delivered,
                    Err(_) => Delivery::Shutdown,
                },
                recv(self.shutdown) -> _ => Delivery::Shutdown,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ActivityPublisher, Delivery, detect};
    use crate::Activity;
    use crate::classify::{Classified, EthernetView, Ipv4View, LayerKind};
    use crate::config::OverflowPolicy;
    use crate::endpoint::{Endpoint, MacAddr};
    use crossbeam_channel::bounded;
    use std::net::Ipv4Addr;
    use std::thread;
    use std::time::Duration;

    const MAC: MacAddr = MacAddr([2, 0, 0, 0, 0, 5]);

    fn endpoint() -> Endpoint {
        Endpoint::new(
            "eth0",
            Ipv4Addr::new(10, 0, 0, 1),
            "10.0.0.0/24".parse().unwrap(),
        )
    }

    fn packet(src: [u8; 4], dst: [u8; 4]) -> Classified {
        Classified {
            layers: vec![LayerKind::Ethernet, LayerKind::IPv4],
            ethernet: Some(EthernetView {
                src_mac: MAC,
                dst_mac: MacAddr([0xff; 6]),
            }),
            ipv4: Some(Ipv4View {
                src: src.into(),
                dst: dst.into(),
            }),
        }
    }

    fn activity(ip: [u8; 4], source: bool) -> Activity {
        Activity {
            ip: ip.into(),
            mac: MAC,
            source,
        }
    }

    #[test]
    fn local_source_to_remote() {
        let seen = detect(&endpoint(), &packet([10, 0, 0, 5], [8, 8, 8, 8]));
        assert_eq!(seen.source, Some(activity([10, 0, 0, 5], true)));
        assert_eq!(seen.destination, None);
    }

    #[test]
    fn local_to_local_fires_both_sides() {
        let seen = detect(&endpoint(), &packet([10, 0, 0, 5], [10, 0, 0, 6]));
        assert_eq!(seen.source, Some(activity([10, 0, 0, 5], true)));
        assert_eq!(seen.destination, Some(activity([10, 0, 0, 6], false)));
    }

    #[test]
    fn own_address_is_ignored() {
        let seen = detect(&endpoint(), &packet([10, 0, 0, 1], [10, 0, 0, 7]));
        assert_eq!(seen.source, None);
        assert_eq!(seen.destination, Some(activity([10, 0, 0, 7], false)));
    }

    #[test]
    fn missing_views_yield_nothing() {
        let mut classified = packet([10, 0, 0, 5], [10, 0, 0, 6]);
        classified.ethernet = None;
        assert_eq!(detect(&endpoint(), &classified), Default::default());
    }

    #[test]
    fn drop_newest_reports_full_stream() {
        let (tx, rx) = bounded(1);
        let (_shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let publisher = ActivityPublisher::new(tx, shutdown_rx, OverflowPolicy::DropNewest);

        assert_eq!(publisher.publish(activity([10, 0, 0, 5], true)), Delivery::Delivered);
        assert_eq!(publisher.publish(activity([10, 0, 0, 6], true)), Delivery::Dropped);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn blocked_publish_is_released_by_shutdown() {
        let (tx, _rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let publisher = ActivityPublisher::new(tx, shutdown_rx, OverflowPolicy::Block);
        assert_eq!(publisher.publish(activity([10, 0, 0, 5], true)), Delivery::Delivered);
        assert!(!publisher.is_shutdown());

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(shutdown_tx);
        });
        assert_eq!(publisher.publish(activity([10, 0, 0, 6], true)), Delivery::Shutdown);
        releaser.join().unwrap();
        assert!(publisher.is_shutdown());
    }
}
