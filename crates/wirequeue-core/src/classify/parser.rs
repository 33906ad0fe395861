use etherparse::{EtherType, LaxNetSlice, LaxSlicedPacket, LinkSlice, TransportSlice, VlanSlice};
use pcap_parser::Linktype;

use crate::endpoint::MacAddr;

use super::{Classified, EthernetView, Ipv4View, LayerKind};

/// Classify a frame captured on a link of type `linktype`.
///
/// Ethernet and raw IP links are decoded; any other link type yields a
/// lone `DecodeFailure`. Frames cut short by the snapshot length keep every
/// header that was captured in full. `DecodeFailure` is appended only when
/// a header itself could not be parsed.
pub fn classify(linktype: Linktype, data: &[u8]) -> Classified {
    let sliced = match linktype {
        Linktype::ETHERNET => LaxSlicedPacket::from_ethernet(data).ok(),
        Linktype::RAW => LaxSlicedPacket::from_ip(data).ok(),
        _ => None,
    };
    sliced.map_or_else(Classified::undecodable, |sliced| from_sliced(&sliced))
}

fn from_sliced(sliced: &LaxSlicedPacket<'_>) -> Classified {
    let mut out = Classified::default();
    let mut ether_type = None;

    if let Some(LinkSlice::Ethernet2(eth)) = &sliced.link {
        out.layers.push(LayerKind::Ethernet);
        out.ethernet = Some(EthernetView {
            src_mac: MacAddr(eth.source()),
            dst_mac: MacAddr(eth.destination()),
        });
        ether_type = Some(eth.ether_type());
    }

    match &sliced.vlan {
        Some(VlanSlice::SingleVlan(vlan)) => {
            out.layers.push(LayerKind::Dot1Q);
            ether_type = Some(vlan.ether_type());
        }
        Some(VlanSlice::DoubleVlan(vlan)) => {
            out.layers.extend([LayerKind::Dot1Q, LayerKind::Dot1Q]);
            ether_type = Some(vlan.inner().ether_type());
        }
        None => {}
    }

    let mut ip_payload_len = 0;
    match &sliced.net {
        Some(LaxNetSlice::Ipv4(ipv4)) => {
            out.layers.push(LayerKind::IPv4);
            out.ipv4 = Some(Ipv4View {
                src: ipv4.header().source_addr(),
                dst: ipv4.header().destination_addr(),
            });
            ip_payload_len = ipv4.payload().payload.len();
        }
        Some(LaxNetSlice::Ipv6(ipv6)) => {
            out.layers.push(LayerKind::IPv6);
            ip_payload_len = ipv6.payload().payload.len();
        }
        _ => {
            if ether_type == Some(EtherType::ARP) {
                out.layers.push(LayerKind::Arp);
            }
        }
    }

    let payload_len = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => {
            out.layers.push(LayerKind::Tcp);
            tcp.payload().len()
        }
        Some(TransportSlice::Udp(udp)) => {
            out.layers.push(LayerKind::Udp);
            udp.payload().len()
        }
        Some(TransportSlice::Icmpv4(icmp)) => {
            out.layers.push(LayerKind::Icmpv4);
            icmp.payload().len()
        }
        Some(TransportSlice::Icmpv6(icmp)) => {
            out.layers.push(LayerKind::Icmpv6);
            icmp.payload().len()
        }
        _ if sliced.stop_err.is_some() => 0,
        _ => ip_payload_len,
    };
    if payload_len > 0 {
        out.layers.push(LayerKind::Payload);
    }
    if sliced.stop_err.is_some() {
        out.layers.push(LayerKind::DecodeFailure);
    }

    out
}
