//! Node addressing — one canonical scheme for relays and users
//!
//! Every node is reachable at a [`NodeAddress`], which is the TCP port it
//! listens on. Logical ids map onto addresses through [`Topology`]:
//! relays live at `relay_base_port + id`, users at `user_base_port + id`.
//! [`Topology::resolve`] is the only place an address turns into a socket
//! address, for intermediate hops and final delivery alike.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use thiserror::Error;

/// Width of an encoded next-hop address (ASCII digits)
pub const ADDRESS_WIDTH: usize = 10;

/// Largest address representable in `ADDRESS_WIDTH` digits
pub const MAX_ADDRESS: u64 = 9_999_999_999;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Address {0} does not fit in 10 digits")]
    AddressOutOfRange(u64),
    #[error("Address field must be 10 ASCII digits")]
    MalformedAddress,
    #[error("Address {0} is not a routable port")]
    Unroutable(NodeAddress),
}

/// Routable address of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(u64);

impl NodeAddress {
    pub fn new(value: u64) -> Result<Self, TopologyError> {
        if value > MAX_ADDRESS {
            return Err(TopologyError::AddressOutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Zero-padded fixed-width form carried inside each layer
    pub fn encode(self) -> String {
        format!("{:0width$}", self.0, width = ADDRESS_WIDTH)
    }

    /// Parse exactly `ADDRESS_WIDTH` ASCII digits
    pub fn decode(field: &[u8]) -> Result<Self, TopologyError> {
        if field.len() != ADDRESS_WIDTH || !field.iter().all(u8::is_ascii_digit) {
            return Err(TopologyError::MalformedAddress);
        }
        let value = field
            .iter()
            .fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0'));
        Self::new(value)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where every participant of the overlay listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    /// Host all services bind to and dial
    pub host: IpAddr,
    /// Port of the relay directory
    pub registry_port: u16,
    /// Relay `n` listens on `relay_base_port + n`
    pub relay_base_port: u16,
    /// User `n` listens on `user_base_port + n`
    pub user_base_port: u16,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            registry_port: 8080,
            relay_base_port: 4000,
            user_base_port: 3000,
        }
    }
}

impl Topology {
    pub fn relay_address(&self, relay_id: u32) -> NodeAddress {
        NodeAddress(u64::from(self.relay_base_port) + u64::from(relay_id))
    }

    pub fn user_address(&self, user_id: u32) -> NodeAddress {
        NodeAddress(u64::from(self.user_base_port) + u64::from(user_id))
    }

    /// Resolve a routable address to the socket a node listens on.
    pub fn resolve(&self, address: NodeAddress) -> Result<SocketAddr, TopologyError> {
        let port = u16::try_from(address.value())
            .map_err(|_| TopologyError::Unroutable(address))?;
        if port == 0 {
            return Err(TopologyError::Unroutable(address));
        }
        Ok(SocketAddr::new(self.host, port))
    }

    pub fn registry_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.registry_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_is_zero_padded() {
        let addr = NodeAddress::new(4001).unwrap();
        assert_eq!(addr.encode(), "0000004001");
        assert_eq!(NodeAddress::new(0).unwrap().encode(), "0000000000");
        assert_eq!(NodeAddress::new(MAX_ADDRESS).unwrap().encode(), "9999999999");
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert_eq!(
            NodeAddress::new(MAX_ADDRESS + 1),
            Err(TopologyError::AddressOutOfRange(MAX_ADDRESS + 1))
        );
    }

    #[test]
    fn test_decode_rejects_bad_fields() {
        assert!(NodeAddress::decode(b"000000400").is_err());
        assert!(NodeAddress::decode(b"00000040011").is_err());
        assert!(NodeAddress::decode(b"00000040a1").is_err());
        assert!(NodeAddress::decode(b" 000004001").is_err());
        assert!(NodeAddress::decode(b"-000004001").is_err());
    }

    #[test]
    fn test_default_address_spaces() {
        let topology = Topology::default();
        assert_eq!(topology.relay_address(1).value(), 4001);
        assert_eq!(topology.user_address(7).value(), 3007);
        assert_eq!(topology.registry_addr().port(), 8080);
    }

    #[test]
    fn test_resolve_is_uniform_for_relays_and_users() {
        let topology = Topology::default();
        let relay = topology.resolve(topology.relay_address(2)).unwrap();
        let user = topology.resolve(topology.user_address(2)).unwrap();

        assert_eq!(relay, "127.0.0.1:4002".parse().unwrap());
        assert_eq!(user, "127.0.0.1:3002".parse().unwrap());
    }

    #[test]
    fn test_resolve_rejects_non_ports() {
        let topology = Topology::default();
        let too_big = NodeAddress::new(70_000).unwrap();
        assert_eq!(
            topology.resolve(too_big),
            Err(TopologyError::Unroutable(too_big))
        );
        let zero = NodeAddress::new(0).unwrap();
        assert!(topology.resolve(zero).is_err());
    }

    proptest! {
        #[test]
        fn prop_address_codec(value in 0u64..=MAX_ADDRESS) {
            let addr = NodeAddress::new(value).unwrap();
            let encoded = addr.encode();
            prop_assert_eq!(encoded.len(), ADDRESS_WIDTH);
            prop_assert_eq!(NodeAddress::decode(encoded.as_bytes()).unwrap(), addr);
        }
    }
}
