mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, TryRecvError};
use wirequeue_core::{
    Activity, Endpoint, MacAddr, OverflowPolicy, Queue, QueueConfig, QueueError, ReadOnlySink,
    Traffic, TransportError,
};

use common::{LOCAL_MAC, RecordingSink, scripted_source, udp_frame, wait_until};

fn endpoint() -> Endpoint {
    Endpoint::new(
        "test0",
        Ipv4Addr::new(10, 0, 0, 1),
        "10.0.0.0/24".parse().unwrap(),
    )
}

fn activity(ip: [u8; 4], source: bool) -> Activity {
    Activity {
        ip: ip.into(),
        mac: MacAddr(LOCAL_MAC),
        source,
    }
}

#[test]
fn local_host_talking_to_internet() {
    let (feed, source) = scripted_source();
    let queue =
        Queue::with_transport(endpoint(), source, ReadOnlySink, &QueueConfig::default()).unwrap();
    let activities = queue.activities();

    feed.send(udp_frame([10, 0, 0, 5], [8, 8, 8, 8], 100)).unwrap();

    let seen = activities.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(seen, activity([10, 0, 0, 5], true));
    assert!(wait_until(|| queue.traffic(Ipv4Addr::new(10, 0, 0, 5)).is_some()));

    let stats = queue.stats();
    assert_eq!(stats.packets_received, 1);
    assert_eq!(stats.received_bytes, 100);
    assert_eq!(
        queue.traffic(Ipv4Addr::new(10, 0, 0, 5)),
        Some(Traffic {
            sent: 100,
            received: 0
        })
    );
    assert_eq!(queue.traffic(Ipv4Addr::new(8, 8, 8, 8)), None);
    assert!(matches!(activities.try_recv(), Err(TryRecvError::Empty)));
    queue.stop();
}

#[test]
fn local_to_local_reports_both_sides_in_order() {
    let (feed, source) = scripted_source();
    let queue =
        Queue::with_transport(endpoint(), source, ReadOnlySink, &QueueConfig::default()).unwrap();
    let activities = queue.activities();

    feed.send(udp_frame([10, 0, 0, 5], [10, 0, 0, 6], 80)).unwrap();

    let first = activities.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = activities.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first, activity([10, 0, 0, 5], true));
    assert_eq!(second, activity([10, 0, 0, 6], false));

    assert!(wait_until(|| queue.traffic(Ipv4Addr::new(10, 0, 0, 6)).is_some()));
    assert_eq!(queue.traffic(Ipv4Addr::new(10, 0, 0, 5)).unwrap().sent, 80);
    assert_eq!(
        queue.traffic(Ipv4Addr::new(10, 0, 0, 6)).unwrap().received,
        80
    );
}

#[test]
fn own_and_foreign_addresses_produce_no_activity() {
    let (feed, source) = scripted_source();
    let queue =
        Queue::with_transport(endpoint(), source, ReadOnlySink, &QueueConfig::default()).unwrap();
    let activities = queue.activities();

    feed.send(udp_frame([10, 0, 0, 1], [8, 8, 8, 8], 60)).unwrap();
    feed.send(udp_frame([192, 168, 1, 2], [10, 0, 0, 1], 60)).unwrap();
    assert!(wait_until(|| queue.stats().packets_received == 2));

    assert!(matches!(activities.try_recv(), Err(TryRecvError::Empty)));
    let stats = queue.stats();
    assert!(stats.peers.is_empty());
    assert_eq!(stats.received_bytes, 120);
}

#[test]
fn protocol_counts_exclude_sentinels() {
    let (feed, source) = scripted_source();
    let queue =
        Queue::with_transport(endpoint(), source, ReadOnlySink, &QueueConfig::default()).unwrap();

    for _ in 0..3 {
        feed.send(udp_frame([1, 1, 1, 1], [2, 2, 2, 2], 64)).unwrap();
    }
    feed.send(vec![0xde, 0xad]).unwrap();
    assert!(wait_until(|| queue.stats().packets_received == 4));

    assert_eq!(queue.protocol_count("Ethernet"), 3);
    assert_eq!(queue.protocol_count("IPv4"), 3);
    assert_eq!(queue.protocol_count("UDP"), 3);
    let stats = queue.stats();
    assert_eq!(stats.received_bytes, 3 * 64 + 2);
    assert!(
        stats
            .protocols
            .iter()
            .all(|p| p.name != "Payload" && p.name != "DecodeFailure")
    );
}

#[test]
fn send_counts_bytes_on_success() {
    let (_feed, source) = scripted_source();
    let sink = RecordingSink::default();
    let queue =
        Queue::with_transport(endpoint(), source, sink.clone(), &QueueConfig::default()).unwrap();

    queue.send(&[1, 2, 3, 4]).unwrap();

    let stats = queue.stats();
    assert_eq!(stats.sent_bytes, 4);
    assert_eq!(stats.errors, 0);
    assert_eq!(*sink.wire.lock().unwrap(), vec![1, 2, 3, 4]);
}

#[test]
fn send_failure_counts_an_error() {
    let (_feed, source) = scripted_source();
    let sink = RecordingSink {
        fail: true,
        ..RecordingSink::default()
    };
    let queue = Queue::with_transport(endpoint(), source, sink, &QueueConfig::default()).unwrap();

    let err = queue.send(&[1, 2, 3]).unwrap_err();
    assert!(matches!(err, QueueError::Write(TransportError::Io(_))));
    let stats = queue.stats();
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.sent_bytes, 0);
}

#[test]
fn send_after_stop_is_inactive_and_stop_is_idempotent() {
    let (_feed, source) = scripted_source();
    let sink = RecordingSink::default();
    let queue =
        Queue::with_transport(endpoint(), source, sink.clone(), &QueueConfig::default()).unwrap();
    queue.send(&[9; 10]).unwrap();

    queue.stop();
    assert!(!queue.is_active());
    assert!(matches!(queue.send(&[1]), Err(QueueError::Inactive)));
    queue.stop();
    assert!(matches!(queue.send(&[1]), Err(QueueError::Inactive)));

    let stats = queue.stats();
    assert_eq!(stats.sent_bytes, 10);
    assert_eq!(stats.errors, 0);
    assert_eq!(sink.wire.lock().unwrap().len(), 10);
}

#[test]
fn concurrent_sends_never_interleave() {
    let (_feed, source) = scripted_source();
    let sink = RecordingSink::default();
    let queue = Arc::new(
        Queue::with_transport(endpoint(), source, sink.clone(), &QueueConfig::default()).unwrap(),
    );
    const SENDERS: u8 = 6;
    const FRAMES: usize = 20;
    const FRAME_LEN: usize = 32;

    let handles: Vec<_> = (0..SENDERS)
        .map(|id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for _ in 0..FRAMES {
                    queue.send(&[id; FRAME_LEN]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let wire = sink.wire.lock().unwrap();
    assert_eq!(wire.len(), SENDERS as usize * FRAMES * FRAME_LEN);
    for chunk in wire.chunks(FRAME_LEN) {
        assert!(chunk.iter().all(|byte| *byte == chunk[0]));
    }
    assert_eq!(
        queue.stats().sent_bytes,
        (SENDERS as usize * FRAMES * FRAME_LEN) as u64
    );
}

#[test]
fn stop_releases_worker_blocked_on_full_stream() {
    let (feed, source) = scripted_source();
    let config = QueueConfig {
        activity_capacity: 1,
        overflow: OverflowPolicy::Block,
        ..QueueConfig::default()
    };
    let queue = Arc::new(Queue::with_transport(endpoint(), source, ReadOnlySink, &config).unwrap());

    for _ in 0..5 {
        feed.send(udp_frame([10, 0, 0, 5], [8, 8, 8, 8], 60)).unwrap();
    }
    // First event fills the stream; the second packet blocks on publish.
    assert!(wait_until(|| queue.stats().packets_received == 2));

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let stopper = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            queue.stop();
            done_tx.send(()).unwrap();
        })
    };
    assert_eq!(
        done_rx.recv_timeout(Duration::from_secs(5)),
        Ok(()),
        "stop did not return"
    );
    stopper.join().unwrap();

    let frozen = queue.stats();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(queue.stats(), frozen);
    assert_eq!(frozen.packets_received, 2);
    assert_eq!(
        queue.traffic(Ipv4Addr::new(10, 0, 0, 5)).map(|t| t.sent),
        Some(60)
    );
    assert!(!queue.is_running());
}

#[test]
fn drop_newest_counts_discarded_events() {
    let (feed, source) = scripted_source();
    let config = QueueConfig {
        activity_capacity: 1,
        overflow: OverflowPolicy::DropNewest,
        ..QueueConfig::default()
    };
    let queue = Queue::with_transport(endpoint(), source, ReadOnlySink, &config).unwrap();

    for _ in 0..3 {
        feed.send(udp_frame([10, 0, 0, 5], [8, 8, 8, 8], 50)).unwrap();
    }
    assert!(wait_until(|| {
        queue.traffic(Ipv4Addr::new(10, 0, 0, 5)).map(|t| t.sent) == Some(150)
    }));

    assert_eq!(queue.stats().activities_dropped, 2);
    assert_eq!(queue.activities().len(), 1);
}

#[test]
fn end_of_stream_stops_worker_but_not_queue() {
    let (feed, source) = scripted_source();
    let sink = RecordingSink::default();
    let queue = Queue::with_transport(endpoint(), source, sink, &QueueConfig::default()).unwrap();

    feed.send(udp_frame([1, 1, 1, 1], [2, 2, 2, 2], 60)).unwrap();
    drop(feed);

    assert!(wait_until(|| !queue.is_running()));
    assert!(queue.is_active());
    assert_eq!(queue.stats().packets_received, 1);
    queue.send(&[0; 8]).unwrap();
    // The worker held the only event sender.
    assert!(matches!(
        queue.activities().recv_timeout(Duration::from_millis(20)),
        Err(RecvTimeoutError::Disconnected)
    ));
}

#[test]
fn invalid_config_is_rejected_before_start() {
    let (_feed, source) = scripted_source();
    let config = QueueConfig {
        activity_capacity: 0,
        ..QueueConfig::default()
    };
    let result = Queue::with_transport(endpoint(), source, ReadOnlySink, &config);
    assert!(matches!(result, Err(QueueError::Config(_))));
}
