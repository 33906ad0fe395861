use std::net::{IpAddr, Ipv4Addr};

use pcap::{Active, Capture, Device};
use pcap_parser::Linktype;
use tracing::debug;

use crate::config::QueueConfig;

use super::{PacketEvent, PacketSink, PacketSource, TransportError};

/// Entry point for libpcap-backed live capture.
///
/// Reading and injection use two handles on the same device so a blocked
/// read never delays a write.
pub struct LiveCapture;

impl LiveCapture {
    pub fn open(
        interface: &str,
        config: &QueueConfig,
    ) -> Result<(LiveSource, LiveSink), TransportError> {
        let reader = open_handle(interface, config)?;
        let linktype = Linktype(reader.get_datalink().0);
        let mut writer = open_handle(interface, &writer_settings(config))?;
        writer.filter(DISCARD_ALL, true)?;
        debug!(
            interface,
            snaplen = config.snaplen,
            promiscuous = config.promiscuous,
            linktype = linktype.0,
            "opened live capture"
        );
        Ok((
            LiveSource {
                capture: reader,
                linktype,
            },
            LiveSink { capture: writer },
        ))
    }
}

/// BPF program matching no frame; the injection handle never reads.
const DISCARD_ALL: &str = "less 0";
const WRITER_SNAPLEN: i32 = 64;

/// Settings for the injection handle: not promiscuous, minimal capture
/// length, so the kernel buffers as little as possible for it.
fn writer_settings(config: &QueueConfig) -> QueueConfig {
    QueueConfig {
        promiscuous: false,
        snaplen: WRITER_SNAPLEN.min(config.snaplen),
        immediate_mode: false,
        ..config.clone()
    }
}

fn open_handle(interface: &str, config: &QueueConfig) -> Result<Capture<Active>, TransportError> {
    let capture = Capture::from_device(interface)?
        .promisc(config.promiscuous)
        .snaplen(config.snaplen)
        .timeout(config.read_timeout_ms)
        .immediate_mode(config.immediate_mode)
        .open()?;
    Ok(capture)
}

pub struct LiveSource {
    capture: Capture<Active>,
    linktype: Linktype,
}

impl PacketSource for LiveSource {
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, TransportError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts.tv_sec as f64 + packet.header.ts.tv_usec as f64 * 1e-6;
                Ok(Some(PacketEvent {
                    ts: Some(ts),
                    linktype: self.linktype,
                    data: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Err(TransportError::TimeoutExpired),
            Err(pcap::Error::NoMorePackets) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

pub struct LiveSink {
    capture: Capture<Active>,
}

impl PacketSink for LiveSink {
    fn write_packet(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.capture.sendpacket(data)?;
        Ok(())
    }
}

/// Capture device with its IPv4 addresses and netmasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub description: Option<String>,
    pub ipv4: Vec<(Ipv4Addr, Option<Ipv4Addr>)>,
}

pub fn list_devices() -> Result<Vec<DeviceInfo>, TransportError> {
    let mut devices: Vec<DeviceInfo> = Device::list()?
        .into_iter()
        .map(|device| DeviceInfo {
            ipv4: device
                .addresses
                .iter()
                .filter_map(|address| match (address.addr, address.netmask) {
                    (IpAddr::V4(addr), Some(IpAddr::V4(mask))) => Some((addr, Some(mask))),
                    (IpAddr::V4(addr), _) => Some((addr, None)),
                    _ => None,
                })
                .collect(),
            name: device.name,
            description: device.desc,
        })
        .collect();
    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}
