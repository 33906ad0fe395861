//! Local endpoint identity and subnet membership.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::transport::{TransportError, list_devices};

/// Decides whether an address belongs to the local interface's network.
pub trait EndpointAuthority {
    fn own_ip(&self) -> Ipv4Addr;
    fn contains(&self, ip: Ipv4Addr) -> bool;
}

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid subnet '{input}': {reason}")]
    InvalidSubnet { input: String, reason: &'static str },
    #[error("capture device not found: {0}")]
    DeviceNotFound(String),
    #[error("device {0} has no IPv4 address with a netmask")]
    NoIpv4Address(String),
    #[error("device lookup failed: {0}")]
    Transport(#[from] TransportError),
}

/// 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// IPv4 network in CIDR form. The stored address is always the network
/// address (host bits cleared).
///
/// # Examples
/// ```
/// use std::net::Ipv4Addr;
/// use wirequeue_core::Ipv4Subnet;
///
/// let subnet: Ipv4Subnet = "10.0.0.7/24".parse()?;
/// assert_eq!(subnet.to_string(), "10.0.0.0/24");
/// assert!(subnet.contains(Ipv4Addr::new(10, 0, 0, 200)));
/// assert!(!subnet.contains(Ipv4Addr::new(10, 0, 1, 1)));
/// # Ok::<(), wirequeue_core::EndpointError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Subnet {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, EndpointError> {
        if prefix > 32 {
            return Err(EndpointError::InvalidSubnet {
                input: format!("{addr}/{prefix}"),
                reason: "prefix length exceeds 32",
            });
        }
        let mask = prefix_mask(prefix);
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask),
            prefix,
        })
    }

    /// Build from an address and a dotted netmask such as `255.255.255.0`.
    pub fn from_netmask(addr: Ipv4Addr, netmask: Ipv4Addr) -> Result<Self, EndpointError> {
        let bits = u32::from(netmask);
        let prefix = bits.leading_ones();
        if bits.checked_shl(prefix).unwrap_or(0) != 0 {
            return Err(EndpointError::InvalidSubnet {
                input: format!("{addr}/{netmask}"),
                reason: "netmask is not contiguous",
            });
        }
        Self::new(addr, prefix as u8)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & prefix_mask(self.prefix) == u32::from(self.network)
    }
}

fn prefix_mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p)),
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Ipv4Subnet {
    type Err = EndpointError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| EndpointError::InvalidSubnet {
            input: input.to_string(),
            reason,
        };
        let (addr, prefix) = input
            .split_once('/')
            .ok_or_else(|| invalid("expected address/prefix"))?;
        let addr: Ipv4Addr = addr.trim().parse().map_err(|_| invalid("bad address"))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|_| invalid("bad prefix length"))?;
        Self::new(addr, prefix)
    }
}

impl Serialize for Ipv4Subnet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The capturing interface: its name, own IPv4 address and attached subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub name: String,
    pub address: Ipv4Addr,
    pub subnet: Ipv4Subnet,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, address: Ipv4Addr, subnet: Ipv4Subnet) -> Self {
        Self {
            name: name.into(),
            address,
            subnet,
        }
    }

    /// Resolve the first IPv4 address and netmask libpcap reports for `name`.
    pub fn from_device(name: &str) -> Result<Self, EndpointError> {
        let device = list_devices()?
            .into_iter()
            .find(|device| device.name == name)
            .ok_or_else(|| EndpointError::DeviceNotFound(name.to_string()))?;
        let (address, netmask) = device
            .ipv4
            .iter()
            .find_map(|(addr, mask)| mask.map(|mask| (*addr, mask)))
            .ok_or_else(|| EndpointError::NoIpv4Address(name.to_string()))?;
        Ok(Self::new(name, address, Ipv4Subnet::from_netmask(address, netmask)?))
    }
}

impl EndpointAuthority for Endpoint {
    fn own_ip(&self) -> Ipv4Addr {
        self.address
    }

    fn contains(&self, ip: Ipv4Addr) -> bool {
        self.subnet.contains(ip)
    }
}
