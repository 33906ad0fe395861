#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use etherparse::PacketBuilder;
use wirequeue_core::{Linktype, PacketEvent, PacketSink, PacketSource, TransportError};

pub const LOCAL_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x05];
pub const GATEWAY_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

/// Ethernet/IPv4/UDP frame of exactly `total_len` bytes (at least 42).
pub fn udp_frame(src: [u8; 4], dst: [u8; 4], total_len: usize) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(LOCAL_MAC, GATEWAY_MAC)
        .ipv4(src, dst, 64)
        .udp(40000, 53);
    let payload = vec![0xab; total_len - builder.size(0)];
    let mut frame = Vec::with_capacity(total_len);
    builder.write(&mut frame, &payload).unwrap();
    assert_eq!(frame.len(), total_len);
    frame
}

/// Source fed from a channel; dropping the feeder ends the stream.
pub struct ScriptedSource {
    frames: Receiver<Vec<u8>>,
}

pub fn scripted_source() -> (Sender<Vec<u8>>, ScriptedSource) {
    let (tx, rx) = unbounded();
    (tx, ScriptedSource { frames: rx })
}

impl PacketSource for ScriptedSource {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, TransportError> {
        match self.frames.recv_timeout(Duration::from_millis(10)) {
            Ok(data) => Ok(Some(PacketEvent {
                ts: None,
                linktype: Linktype::ETHERNET,
                data,
            })),
            Err(RecvTimeoutError::Timeout) => Err(TransportError::TimeoutExpired),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

/// Sink writing one byte at a time into a shared wire so that unserialized
/// writers would interleave.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub wire: Arc<Mutex<Vec<u8>>>,
    pub fail: bool,
}

impl PacketSink for RecordingSink {
    fn write_packet(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Io(std::io::Error::other("link down")));
        }
        for byte in data {
            self.wire.lock().unwrap().push(*byte);
            thread::yield_now();
        }
        Ok(())
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Write a little-endian, microsecond legacy pcap file with Ethernet frames.
pub fn write_pcap(path: &Path, frames: &[Vec<u8>]) {
    let mut output = Vec::new();
    output.extend_from_slice(&0xa1b2_c3d4u32.to_le_bytes());
    output.extend_from_slice(&2u16.to_le_bytes());
    output.extend_from_slice(&4u16.to_le_bytes());
    output.extend_from_slice(&0i32.to_le_bytes());
    output.extend_from_slice(&0u32.to_le_bytes());
    output.extend_from_slice(&65535u32.to_le_bytes());
    output.extend_from_slice(&1u32.to_le_bytes());

    for (idx, frame) in frames.iter().enumerate() {
        output.extend_from_slice(&(idx as u32).to_le_bytes());
        output.extend_from_slice(&0u32.to_le_bytes());
        output.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        output.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        output.extend_from_slice(frame);
    }
    fs::write(path, output).unwrap();
}
