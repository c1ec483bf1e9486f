//! Network address model.
//!
//! A [`NetworkPrefix`] is an IPv4 or IPv6 CIDR block. Every rule in the
//! registry is keyed by one, and all conflict checks reduce to the
//! [`NetworkPrefix::overlaps`] predicate: two CIDR blocks are either nested
//! or disjoint, so "overlap" and "one contains the other" are the same thing.

use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

/// Address parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("not a valid IP address or network: {0}")]
    Malformed(String),
    #[error("host bits set: {0}")]
    HostBitsSet(String),
}

/// A canonical IPv4 or IPv6 network prefix (host bits always zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkPrefix(IpNet);

impl NetworkPrefix {
    /// Parse an address or CIDR literal, discarding any host bits.
    ///
    /// A bare address becomes a single-address prefix (`/32` or `/128`).
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        parse_ip_or_cidr(text).map(|net| Self(net.trunc()))
    }

    /// Parse an address or CIDR literal, rejecting literals with host bits set.
    ///
    /// `192.0.2.0/24` is accepted, `192.0.2.1/24` is not.
    pub fn parse_strict(text: &str) -> Result<Self, AddressError> {
        let net = parse_ip_or_cidr(text)?;
        if net.trunc() != net {
            return Err(AddressError::HostBitsSet(text.trim().to_string()));
        }
        Ok(Self(net))
    }

    /// True iff one prefix contains the other. Symmetric and reflexive;
    /// prefixes of different IP versions never overlap.
    pub fn overlaps(&self, other: &NetworkPrefix) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// True iff `other` lies entirely inside `self` (equality included).
    pub fn contains(&self, other: &NetworkPrefix) -> bool {
        self.0.contains(&other.0)
    }

    /// True iff the prefix denotes exactly one address (`/32` or `/128`).
    pub fn is_single_address(&self) -> bool {
        self.0.prefix_len() == self.0.max_prefix_len()
    }

    /// IP version, 4 or 6.
    pub fn version(&self) -> u8 {
        match self.0 {
            IpNet::V4(_) => 4,
            IpNet::V6(_) => 6,
        }
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// First and last address of the block as big-endian bytes
    /// (4 bytes for IPv4, 16 for IPv6). Bytes compare in address order.
    pub fn bounds(&self) -> (Vec<u8>, Vec<u8>) {
        (addr_bytes(self.0.network()), addr_bytes(self.0.broadcast()))
    }

    /// Every prefix containing this one, shortest first, ending with `self`.
    ///
    /// `10.1.0.0/16` yields `0.0.0.0/0`, `0.0.0.0/1`, ... `10.1.0.0/16`.
    pub fn ancestors(&self) -> impl Iterator<Item = NetworkPrefix> + '_ {
        let address = self.0.network();
        (0..=self.0.prefix_len())
            .filter_map(move |len| IpNet::new(address, len).ok())
            .map(|net| Self(net.trunc()))
    }
}

fn addr_bytes(addr: IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Parse an IP address or CIDR string into an `IpNet`.
fn parse_ip_or_cidr(text: &str) -> Result<IpNet, AddressError> {
    let text = text.trim();
    if text.contains('/') {
        text.parse::<IpNet>()
            .map_err(|_| AddressError::Malformed(text.to_string()))
    } else {
        text.parse::<IpAddr>()
            .map(IpNet::from)
            .map_err(|_| AddressError::Malformed(text.to_string()))
    }
}

impl FromStr for NetworkPrefix {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_strict(s)
    }
}

impl fmt::Display for NetworkPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.network(), self.0.prefix_len())
    }
}
