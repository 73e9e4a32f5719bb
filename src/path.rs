//! Endpoint path records and their building blocks.

use nix::libc;
use std::{
    fmt::{self, Display, Formatter},
    net::{IpAddr, SocketAddrV4, SocketAddrV6},
    str::FromStr,
};

/// Address families understood by the resolver.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Family {
    /// No family restriction.
    #[default]
    Unspec,
    /// IPv4.
    Ip4,
    /// IPv6.
    Ip6,
    /// UNIX domain sockets.
    Unix,
}

impl Family {
    /// Converts `Family` to a static string.
    #[inline]
    pub fn to_str(self) -> &'static str {
        match self {
            Family::Unspec => "any",
            Family::Ip4 => "ip4",
            Family::Ip6 => "ip6",
            Family::Unix => "unix",
        }
    }
}

impl FromStr for Family {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "any" => Ok(Family::Unspec),
            "ip4" => Ok(Family::Ip4),
            "ip6" => Ok(Family::Ip6),
            "unix" => Ok(Family::Unix),
            _ => Err(crate::Error::BadRequest("unknown address family")),
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// Socket types, mirroring `SOCK_*`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum SockType {
    /// No socket type restriction.
    #[default]
    Unspec,
    /// `SOCK_STREAM`
    Stream,
    /// `SOCK_DGRAM`
    Dgram,
    /// `SOCK_RAW`
    Raw,
    /// `SOCK_SEQPACKET`
    Seqpacket,
}

impl SockType {
    /// Converts `SockType` to a static string.
    #[inline]
    pub fn to_str(self) -> &'static str {
        match self {
            SockType::Unspec => "any",
            SockType::Stream => "stream",
            SockType::Dgram => "dgram",
            SockType::Raw => "raw",
            SockType::Seqpacket => "seqpacket",
        }
    }

    pub(crate) fn to_raw(self) -> Option<i32> {
        match self {
            SockType::Unspec => None,
            SockType::Stream => Some(libc::SOCK_STREAM),
            SockType::Dgram => Some(libc::SOCK_DGRAM),
            SockType::Raw => Some(libc::SOCK_RAW),
            SockType::Seqpacket => Some(libc::SOCK_SEQPACKET),
        }
    }
}

impl FromStr for SockType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "any" => Ok(SockType::Unspec),
            "stream" => Ok(SockType::Stream),
            "dgram" => Ok(SockType::Dgram),
            "raw" => Ok(SockType::Raw),
            "seqpacket" => Ok(SockType::Seqpacket),
            _ => Err(crate::Error::BadRequest("unknown socket type")),
        }
    }
}

impl Display for SockType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// Transport protocols, mirroring `IPPROTO_*`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Protocol {
    /// No protocol restriction.
    #[default]
    Unspec,
    /// `IPPROTO_TCP`
    Tcp,
    /// `IPPROTO_UDP`
    Udp,
    /// `IPPROTO_UDPLITE`
    UdpLite,
    /// `IPPROTO_SCTP`
    Sctp,
}

impl Protocol {
    /// Converts `Protocol` to a static string.
    #[inline]
    pub fn to_str(self) -> &'static str {
        match self {
            Protocol::Unspec => "any",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::UdpLite => "udplite",
            Protocol::Sctp => "sctp",
        }
    }

    pub(crate) fn to_raw(self) -> Option<i32> {
        match self {
            Protocol::Unspec => None,
            Protocol::Tcp => Some(libc::IPPROTO_TCP),
            Protocol::Udp => Some(libc::IPPROTO_UDP),
            Protocol::UdpLite => Some(libc::IPPROTO_UDPLITE),
            Protocol::Sctp => Some(libc::IPPROTO_SCTP),
        }
    }
}

impl FromStr for Protocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "any" | "0" => Ok(Protocol::Unspec),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "udplite" => Ok(Protocol::UdpLite),
            "sctp" => Ok(Protocol::Sctp),
            _ => Err(crate::Error::BadRequest("unknown protocol")),
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// DNSSEC status of a path. Monotone per response: once `Secure`, later
/// backends cannot downgrade it.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub enum Security {
    /// Answer was not validated.
    #[default]
    Insecure,
    /// Answer was validated by the producing backend.
    Secure,
}

/// The node half of a path: an address keyed by family.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeAddress {
    /// An IPv4 address.
    Ip4(std::net::Ipv4Addr),
    /// An IPv6 address.
    Ip6(std::net::Ipv6Addr),
    /// A filesystem path of a UNIX domain socket.
    Unix(String),
}

impl NodeAddress {
    /// The family this address belongs to.
    #[inline]
    pub fn family(&self) -> Family {
        match self {
            NodeAddress::Ip4(_) => Family::Ip4,
            NodeAddress::Ip6(_) => Family::Ip6,
            NodeAddress::Unix(_) => Family::Unix,
        }
    }
}

impl From<IpAddr> for NodeAddress {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(a) => NodeAddress::Ip4(a),
            IpAddr::V6(a) => NodeAddress::Ip6(a),
        }
    }
}

impl Display for NodeAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddress::Ip4(a) => a.fmt(f),
            NodeAddress::Ip6(a) => a.fmt(f),
            NodeAddress::Unix(p) => f.write_str(p),
        }
    }
}

/// One transport endpoint produced by a backend.
///
/// Paths are kept in insertion order within a [`Response`](crate::Response);
/// the engine never reorders or de-duplicates them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Path {
    pub(crate) address: NodeAddress,
    pub(crate) ifindex: u32,
    pub(crate) socktype: SockType,
    pub(crate) protocol: Protocol,
    pub(crate) port: u16,
    pub(crate) priority: u16,
    pub(crate) weight: u16,
    pub(crate) ttl: Option<u32>,
    pub(crate) security: Security,
}

impl Path {
    /// The endpoint address.
    #[inline]
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// The address family.
    #[inline]
    pub fn family(&self) -> Family {
        self.address.family()
    }

    /// Interface index; nonzero only for link-local IPv6.
    #[inline]
    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// Socket type.
    #[inline]
    pub fn socktype(&self) -> SockType {
        self.socktype
    }

    /// Transport protocol.
    #[inline]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Port in host order, 0 if unspecified.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// SRV priority, 0 unless the path came from an SRV record.
    #[inline]
    pub fn priority(&self) -> u16 {
        self.priority
    }

    /// SRV weight, 0 unless the path came from an SRV record.
    #[inline]
    pub fn weight(&self) -> u16 {
        self.weight
    }

    /// Remaining record lifetime in seconds, `None` if unbounded.
    #[inline]
    pub fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    /// DNSSEC status the response carried when this path was added.
    #[inline]
    pub fn security(&self) -> Security {
        self.security
    }

    /// Materializes a socket address for use with the BSD socket API.
    ///
    /// The port is converted to network order and the interface index goes
    /// into the IPv6 scope field. Returns `None` for a UNIX path that does
    /// not fit a `sockaddr_un`.
    pub fn socket_addr(&self) -> Option<socket2::SockAddr> {
        match &self.address {
            NodeAddress::Ip4(a) => Some(SocketAddrV4::new(*a, self.port).into()),
            NodeAddress::Ip6(a) => {
                Some(SocketAddrV6::new(*a, self.port, 0, self.ifindex).into())
            }
            NodeAddress::Unix(p) => socket2::SockAddr::unix(p).ok(),
        }
    }
}

/// Parses a numeric host of the form `address[%interface]`.
///
/// The interface suffix is resolved with `if_nametoindex` and falls back to
/// a plain numeric index.
pub fn parse_numeric_host(s: &str) -> Option<(IpAddr, u32)> {
    let (addr, iface) = match s.split_once('%') {
        Some((a, i)) => (a, Some(i)),
        None => (s, None),
    };

    let ifindex = match iface {
        None => 0,
        Some(name) => match nix::net::if_::if_nametoindex(name) {
            Ok(index) => index,
            Err(_) => name.parse::<u32>().ok()?,
        },
    };

    IpAddr::from_str(addr).ok().map(|a| (a, ifindex))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_host_plain() {
        let (addr, ifindex) = parse_numeric_host("1.2.3.4").unwrap();
        assert_eq!(addr, IpAddr::from_str("1.2.3.4").unwrap());
        assert_eq!(ifindex, 0);
    }

    #[test]
    fn numeric_host_with_numeric_scope() {
        let (addr, ifindex) = parse_numeric_host("1:2:3:4:5:6:7:8%999999").unwrap();
        assert_eq!(addr, IpAddr::from_str("1:2:3:4:5:6:7:8").unwrap());
        assert_eq!(ifindex, 999999);
    }

    #[test]
    fn numeric_host_with_interface_name() {
        let (addr, ifindex) = parse_numeric_host("fe80::1%lo").unwrap();
        assert_eq!(addr, IpAddr::from_str("fe80::1").unwrap());
        assert_ne!(ifindex, 0);
    }

    #[test]
    fn numeric_host_rejects_names() {
        assert!(parse_numeric_host("localhost").is_none());
        assert!(parse_numeric_host("1.2.3.4%nonsense0").is_none());
    }

    #[test]
    fn sockaddr_view() {
        let path = Path {
            address: NodeAddress::Ip6(std::net::Ipv6Addr::LOCALHOST),
            ifindex: 3,
            socktype: SockType::Stream,
            protocol: Protocol::Tcp,
            port: 80,
            priority: 0,
            weight: 0,
            ttl: None,
            security: Security::Insecure,
        };
        let sa = path.socket_addr().unwrap();
        let v6 = sa.as_socket_ipv6().unwrap();
        assert_eq!(v6.port(), 80);
        assert_eq!(v6.scope_id(), 3);
    }
}
