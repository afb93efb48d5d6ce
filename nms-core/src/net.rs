#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Local address selection.
//!
//! Hosts in the reference deployment have several IPv4 interfaces; the
//! daemons prefer the interface facing the rover subnet and otherwise fall
//! back to the first routable one. Discovery uses the UDP-connect probe: a
//! datagram socket connected to a destination never sends anything, but the
//! kernel resolves the route and exposes the chosen source address.

use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

/// An IPv4 network in CIDR form, used for subnet preference checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Net {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Net {
    /// Parse `a.b.c.d/len` notation.
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| Error::config(format!("subnet {s:?} is not in CIDR form")))?;
        let network: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::config(format!("subnet {s:?} has an invalid address")))?;
        let prefix_len: u8 = len
            .parse()
            .map_err(|_| Error::config(format!("subnet {s:?} has an invalid prefix length")))?;
        if prefix_len > 32 {
            return Err(Error::config(format!("subnet {s:?} prefix exceeds 32")));
        }
        Ok(Self { network, prefix_len })
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix_len)
        };
        (u32::from(addr) & mask) == (u32::from(self.network) & mask)
    }

    /// A representative host inside the network, used as a probe target.
    fn probe_host(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | 1)
    }
}

fn route_source(dest: Ipv4Addr) -> Option<Ipv4Addr> {
    let sock = UdpSocket::bind("0.0.0.0:0").ok()?;
    sock.connect(SocketAddr::new(IpAddr::V4(dest), 9)).ok()?;
    match sock.local_addr().ok()?.ip() {
        IpAddr::V4(v4) if !v4.is_unspecified() => Some(v4),
        _ => None,
    }
}

/// Pick the local IPv4 address to advertise: an interface inside the
/// preferred subnet when one exists, otherwise the source address of the
/// default route, otherwise loopback.
pub fn preferred_local_ip(subnet: &Ipv4Net) -> Ipv4Addr {
    if let Some(ip) = route_source(subnet.probe_host()) {
        if subnet.contains(ip) {
            return ip;
        }
    }
    route_source(Ipv4Addr::new(8, 8, 8, 8)).unwrap_or(Ipv4Addr::LOCALHOST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_parsing() {
        let net = Ipv4Net::parse("10.0.1.0/24").unwrap();
        assert!(net.contains(Ipv4Addr::new(10, 0, 1, 42)));
        assert!(!net.contains(Ipv4Addr::new(10, 0, 2, 42)));
        assert!(Ipv4Net::parse("10.0.1.0").is_err());
        assert!(Ipv4Net::parse("10.0.1.0/33").is_err());
        assert!(Ipv4Net::parse("nope/8").is_err());
    }

    #[test]
    fn zero_prefix_contains_everything() {
        let net = Ipv4Net::parse("0.0.0.0/0").unwrap();
        assert!(net.contains(Ipv4Addr::new(192, 168, 7, 7)));
    }

    #[test]
    fn preferred_ip_is_always_some_address() {
        let net = Ipv4Net::parse("10.0.1.0/24").unwrap();
        let ip = preferred_local_ip(&net);
        assert!(!ip.is_unspecified());
    }
}
