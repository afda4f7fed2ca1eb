//! # Address Space
//!
//! Expands a CIDR block into the ordered set of addresses a sweep will visit.
//!
//! Accepted inputs:
//! * An IPv4 CIDR block no wider than `/16` (e.g. `192.168.1.0/24`). Host bits are
//!   ignored, so `192.168.1.77/24` describes the same block.
//! * A bare IPv4 or IPv6 address, treated as `/32` or `/128`.
//! * An IPv6 CIDR block no wider than `/112`.
//!
//! **Edge-case policy:** for IPv4 blocks of `/30` and wider the network and broadcast
//! addresses are excluded because they never belong to a host. `/31` (point-to-point,
//! RFC 3021) and `/32` enumerate every address they contain. IPv6 has no broadcast
//! address, so IPv6 blocks are enumerated in full.

use std::fmt;
use std::iter::FusedIterator;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use pnet::ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};

use crate::error::DiscoveryError;

/// Shortest IPv4 prefix accepted. Same 65 536-address ceiling as IPv6.
pub const MIN_IPV4_PREFIX: u8 = 16;

/// Shortest IPv6 prefix accepted; anything wider cannot be swept exhaustively.
pub const MIN_IPV6_PREFIX: u8 = 112;

/// Widest IPv4 prefix for which network and broadcast addresses are stripped.
const LAST_STRIPPED_IPV4_PREFIX: u8 = 30;

/// An immutable, ascending, duplicate-free set of target addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressSpace {
    network: IpNetwork,
    first: u128,
    last: u128,
}

impl AddressSpace {
    /// Parses CIDR notation or a single address.
    pub fn from_cidr(spec: &str) -> Result<Self, DiscoveryError> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(DiscoveryError::invalid_range(spec, "empty specification"));
        }

        let (ip, prefix) = match trimmed.split_once('/') {
            Some((ip_str, prefix_str)) => {
                let ip = parse_ip(spec, ip_str)?;
                let prefix = prefix_str.trim().parse::<u8>().map_err(|e| {
                    DiscoveryError::invalid_range(spec, format!("invalid prefix '{prefix_str}': {e}"))
                })?;
                (ip, prefix)
            }
            None => {
                let ip = parse_ip(spec, trimmed)?;
                let prefix = if ip.is_ipv4() { 32 } else { 128 };
                (ip, prefix)
            }
        };

        match ip {
            IpAddr::V4(v4) => Self::from_ipv4(spec, v4, prefix),
            IpAddr::V6(v6) => Self::from_ipv6(spec, v6, prefix),
        }
    }

    fn from_ipv4(spec: &str, ip: Ipv4Addr, prefix: u8) -> Result<Self, DiscoveryError> {
        let net = Ipv4Network::new(ip, prefix)
            .map_err(|e| DiscoveryError::invalid_range(spec, e.to_string()))?;
        if prefix < MIN_IPV4_PREFIX {
            return Err(DiscoveryError::invalid_range(
                spec,
                format!("IPv4 blocks wider than /{MIN_IPV4_PREFIX} are not supported"),
            ));
        }
        let network_u32: u32 = net.network().into();
        let broadcast_u32: u32 = net.broadcast().into();

        let (first, last) = if prefix <= LAST_STRIPPED_IPV4_PREFIX {
            (network_u32.saturating_add(1), broadcast_u32.saturating_sub(1))
        } else {
            (network_u32, broadcast_u32)
        };

        if first > last {
            return Err(DiscoveryError::invalid_range(spec, "prefix leaves no host addresses"));
        }

        let normalized = Ipv4Network::new(net.network(), prefix)
            .map_err(|e| DiscoveryError::invalid_range(spec, e.to_string()))?;

        Ok(Self {
            network: IpNetwork::V4(normalized),
            first: first as u128,
            last: last as u128,
        })
    }

    fn from_ipv6(spec: &str, ip: Ipv6Addr, prefix: u8) -> Result<Self, DiscoveryError> {
        let net = Ipv6Network::new(ip, prefix)
            .map_err(|e| DiscoveryError::invalid_range(spec, e.to_string()))?;
        if prefix < MIN_IPV6_PREFIX {
            return Err(DiscoveryError::invalid_range(
                spec,
                format!("IPv6 blocks wider than /{MIN_IPV6_PREFIX} are not supported"),
            ));
        }

        let host_bits: u32 = 128 - u32::from(prefix);
        let host_mask: u128 = if host_bits == 0 { 0 } else { (1u128 << host_bits) - 1 };
        let first: u128 = u128::from(net.ip()) & !host_mask;
        let last: u128 = first | host_mask;

        let normalized = Ipv6Network::new(Ipv6Addr::from(first), prefix)
            .map_err(|e| DiscoveryError::invalid_range(spec, e.to_string()))?;

        Ok(Self {
            network: IpNetwork::V6(normalized),
            first,
            last,
        })
    }

    /// Number of addresses the sweep will visit.
    pub fn len(&self) -> usize {
        (self.last - self.first + 1) as usize
    }

    /// Always `false`: construction rejects blocks without host addresses.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Lazily walks the addresses in ascending order. Each call starts over.
    pub fn iter(&self) -> AddressIter {
        AddressIter {
            next: self.first,
            last: self.last,
            ipv4: self.network.is_ipv4(),
            exhausted: false,
        }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (addr, self.network.is_ipv4()) {
            (IpAddr::V4(v4), true) => {
                let value = u32::from(*v4) as u128;
                (self.first..=self.last).contains(&value)
            }
            (IpAddr::V6(v6), false) => (self.first..=self.last).contains(&u128::from(*v6)),
            _ => false,
        }
    }

    /// The normalized block this space was derived from.
    pub fn network(&self) -> IpNetwork {
        self.network
    }
}

impl FromStr for AddressSpace {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_cidr(s)
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network)
    }
}

impl<'a> IntoIterator for &'a AddressSpace {
    type Item = IpAddr;
    type IntoIter = AddressIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`AddressSpace::iter`].
#[derive(Debug, Clone)]
pub struct AddressIter {
    next: u128,
    last: u128,
    ipv4: bool,
    exhausted: bool,
}

impl AddressIter {
    fn to_addr(&self, value: u128) -> IpAddr {
        if self.ipv4 {
            IpAddr::V4(Ipv4Addr::from(value as u32))
        } else {
            IpAddr::V6(Ipv6Addr::from(value))
        }
    }
}

impl Iterator for AddressIter {
    type Item = IpAddr;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let current = self.next;
        if current == self.last {
            self.exhausted = true;
        } else {
            self.next += 1;
        }
        Some(self.to_addr(current))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.exhausted {
            0
        } else {
            (self.last - self.next + 1) as usize
        };
        (remaining, Some(remaining))
    }
}

impl DoubleEndedIterator for AddressIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let current = self.last;
        if current == self.next {
            self.exhausted = true;
        } else {
            self.last -= 1;
        }
        Some(self.to_addr(current))
    }
}

impl ExactSizeIterator for AddressIter {}

impl FusedIterator for AddressIter {}

fn parse_ip(spec: &str, ip_str: &str) -> Result<IpAddr, DiscoveryError> {
    ip_str
        .trim()
        .parse::<IpAddr>()
        .map_err(|e| DiscoveryError::invalid_range(spec, format!("invalid address '{ip_str}': {e}")))
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn slash_24_strips_network_and_broadcast() {
        let space = AddressSpace::from_cidr("192.168.1.0/24").unwrap();
        assert_eq!(space.len(), 254);
        assert_eq!(space.iter().next(), Some(v4(192, 168, 1, 1)));
        assert_eq!(space.iter().next_back(), Some(v4(192, 168, 1, 254)));
    }

    #[test]
    fn slash_30_has_two_usable_hosts() {
        let space = AddressSpace::from_cidr("192.0.2.0/30").unwrap();
        let addrs: Vec<IpAddr> = space.iter().collect();
        assert_eq!(addrs, vec![v4(192, 0, 2, 1), v4(192, 0, 2, 2)]);
        assert_eq!(space.len(), 2);
    }

    #[test]
    fn slash_31_and_32_keep_every_address() {
        let p2p = AddressSpace::from_cidr("10.0.0.4/31").unwrap();
        assert_eq!(p2p.iter().collect::<Vec<_>>(), vec![v4(10, 0, 0, 4), v4(10, 0, 0, 5)]);

        let single = AddressSpace::from_cidr("10.0.0.9/32").unwrap();
        assert_eq!(single.iter().collect::<Vec<_>>(), vec![v4(10, 0, 0, 9)]);
    }

    #[test]
    fn host_counts_match_prefix_arithmetic() {
        for prefix in MIN_IPV4_PREFIX..=30 {
            let space = AddressSpace::from_cidr(&format!("10.0.0.0/{prefix}")).unwrap();
            let expected = (1usize << (32 - prefix)) - 2;
            assert_eq!(space.len(), expected, "prefix /{prefix}");
        }
    }

    #[test]
    fn bare_address_is_a_single_host() {
        let space = AddressSpace::from_cidr("203.0.113.7").unwrap();
        assert_eq!(space.len(), 1);
        assert_eq!(space.to_string(), "203.0.113.7/32");

        let v6 = AddressSpace::from_cidr("::1").unwrap();
        assert_eq!(v6.iter().collect::<Vec<_>>(), vec!["::1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn host_bits_are_normalized_away() {
        let space = AddressSpace::from_cidr("172.16.5.10/20").unwrap();
        assert_eq!(space.to_string(), "172.16.0.0/20");
        assert_eq!(space.iter().next(), Some(v4(172, 16, 0, 1)));
        assert_eq!(space.iter().last(), Some(v4(172, 16, 15, 254)));
    }

    #[test]
    fn iteration_is_ascending_and_restartable() {
        let space = AddressSpace::from_cidr("10.1.1.0/28").unwrap();
        let first: Vec<IpAddr> = space.iter().collect();
        let second: Vec<IpAddr> = space.iter().collect();
        assert_eq!(first, second);
        assert!(first.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(space.iter().len(), space.len());
    }

    #[test]
    fn ipv6_block_is_enumerated_in_full() {
        let space = AddressSpace::from_cidr("2001:db8::/126").unwrap();
        assert_eq!(space.len(), 4);
        assert_eq!(space.iter().next(), Some("2001:db8::".parse().unwrap()));
        assert!(AddressSpace::from_cidr("2001:db8::/64").is_err());
    }

    #[test]
    fn ipv4_blocks_wider_than_the_floor_are_rejected() {
        for spec in ["0.0.0.0/0", "10.0.0.0/8", "172.16.0.0/15"] {
            let err = AddressSpace::from_cidr(spec).unwrap_err();
            assert!(
                matches!(err, DiscoveryError::InvalidRange { .. }),
                "{spec} produced {err:?}"
            );
        }
        assert_eq!(AddressSpace::from_cidr("172.16.0.0/16").unwrap().len(), 65_534);
    }

    #[test]
    fn contains_respects_stripped_edges() {
        let space = AddressSpace::from_cidr("192.0.2.0/30").unwrap();
        assert!(space.contains(&v4(192, 0, 2, 1)));
        assert!(!space.contains(&v4(192, 0, 2, 0)));
        assert!(!space.contains(&v4(192, 0, 2, 3)));
        assert!(!space.contains(&"::1".parse().unwrap()));
    }

    #[test]
    fn malformed_specs_are_rejected() {
        for spec in ["", "not-an-ip", "10.0.0.1/33", "10.0.0.256/24", "10.0.0.0/abc", "/24"] {
            let err = AddressSpace::from_cidr(spec).unwrap_err();
            assert!(
                matches!(err, DiscoveryError::InvalidRange { .. }),
                "{spec} produced {err:?}"
            );
        }
    }
}
