//! Packet classification.
//!
//! Turns a raw frame into the ordered list of protocol layers it carries and
//! the two typed views the queue cares about (Ethernet source, IPv4
//! addresses). Classification never fails: undecodable input is reported
//! through the `DecodeFailure` sentinel layer.

mod parser;

pub use parser::classify;

use std::fmt;
use std::net::Ipv4Addr;

use crate::endpoint::MacAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Ethernet,
    Dot1Q,
    Arp,
    IPv4,
    IPv6,
    Tcp,
    Udp,
    Icmpv4,
    Icmpv6,
    /// Application bytes left after the last decoded header.
    Payload,
    /// Bytes the decoder could not interpret.
    DecodeFailure,
}

impl LayerKind {
    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Ethernet => "Ethernet",
            LayerKind::Dot1Q => "Dot1Q",
            LayerKind::Arp => "ARP",
            LayerKind::IPv4 => "IPv4",
            LayerKind::IPv6 => "IPv6",
            LayerKind::Tcp => "TCP",
            LayerKind::Udp => "UDP",
            LayerKind::Icmpv4 => "ICMPv4",
            LayerKind::Icmpv6 => "ICMPv6",
            LayerKind::Payload => "Payload",
            LayerKind::DecodeFailure => "DecodeFailure",
        }
    }

    /// Sentinels describe decoding state rather than a protocol and are
    /// never counted.
    pub fn is_sentinel(self) -> bool {
        matches!(self, LayerKind::Payload | LayerKind::DecodeFailure)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetView {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4View {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

/// Result of classifying one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub layers: Vec<LayerKind>,
    pub ethernet: Option<EthernetView>,
    pub ipv4: Option<Ipv4View>,
}

impl Classified {
    pub(crate) fn undecodable() -> Self {
        Self {
            layers: vec![LayerKind::DecodeFailure],
            ..Self::default()
        }
    }

    /// Layers that count toward protocol statistics, in packet order.
    pub fn protocols(&self) -> impl Iterator<Item = LayerKind> + '_ {
        self.layers.iter().copied().filter(|layer| !layer.is_sentinel())
    }
}
