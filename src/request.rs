//! Request model and the typed options builder.

use crate::{Family, Protocol, SockType};
use std::{net::IpAddr, time::Duration};

/// The three kinds of query the engine runs.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RequestKind {
    /// Node and/or service name to endpoint paths.
    #[default]
    Forward,
    /// Address (and optional port) back to names.
    Reverse,
    /// A raw DNS record query.
    Dns,
}

/// A fully-merged request as seen by backends.
///
/// Callers never build this directly; they pass an [`Options`] overlay that
/// is merged over the context defaults by the `query_*` constructors.
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) kind: RequestKind,
    pub(crate) nodename: Option<String>,
    pub(crate) servname: Option<String>,
    pub(crate) family: Family,
    pub(crate) socktype: SockType,
    pub(crate) protocol: Protocol,
    pub(crate) ifindex: Option<u32>,
    pub(crate) address: Option<IpAddr>,
    pub(crate) port: u16,
    pub(crate) dns_name: Option<String>,
    pub(crate) dns_class: u16,
    pub(crate) dns_type: u16,
    pub(crate) default_loopback: bool,
    pub(crate) dns_srv_lookup: bool,
    pub(crate) dns_search: bool,
    pub(crate) clamp_ttl: Option<u32>,
    pub(crate) timeout: Duration,
    pub(crate) partial_timeout: Duration,
}

impl Default for Request {
    fn default() -> Self {
        Request {
            kind: RequestKind::Forward,
            nodename: None,
            servname: None,
            family: Family::Unspec,
            socktype: SockType::Unspec,
            protocol: Protocol::Unspec,
            ifindex: None,
            address: None,
            port: 0,
            dns_name: None,
            dns_class: 1, // IN
            dns_type: 0,
            default_loopback: false,
            dns_srv_lookup: false,
            dns_search: false,
            clamp_ttl: None,
            timeout: Duration::from_millis(15000),
            partial_timeout: Duration::from_millis(5000),
        }
    }
}

impl Request {
    /// Request kind.
    #[inline]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Forward node name, if any.
    #[inline]
    pub fn nodename(&self) -> Option<&str> {
        self.nodename.as_deref()
    }

    /// Forward service name, if any.
    #[inline]
    pub fn servname(&self) -> Option<&str> {
        self.servname.as_deref()
    }

    /// Address family filter.
    #[inline]
    pub fn family(&self) -> Family {
        self.family
    }

    /// Socket type filter.
    #[inline]
    pub fn socktype(&self) -> SockType {
        self.socktype
    }

    /// Protocol filter.
    #[inline]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Interface filter, if any.
    #[inline]
    pub fn ifindex(&self) -> Option<u32> {
        self.ifindex
    }

    /// Reverse-query address key.
    #[inline]
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    /// Reverse-query port key, 0 if unset.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Owner name of a raw DNS query.
    #[inline]
    pub fn dns_name(&self) -> Option<&str> {
        self.dns_name.as_deref()
    }

    /// Class of a raw DNS query.
    #[inline]
    pub fn dns_class(&self) -> u16 {
        self.dns_class
    }

    /// Record type of a raw DNS query.
    #[inline]
    pub fn dns_type(&self) -> u16 {
        self.dns_type
    }

    /// Whether an empty node name resolves to loopback instead of any.
    #[inline]
    pub fn default_loopback(&self) -> bool {
        self.default_loopback
    }

    /// Whether forward queries go through SRV indirection.
    #[inline]
    pub fn dns_srv_lookup(&self) -> bool {
        self.dns_srv_lookup
    }

    /// Whether raw DNS queries follow the search list.
    #[inline]
    pub fn dns_search(&self) -> bool {
        self.dns_search
    }

    /// Upper bound applied to emitted TTLs.
    #[inline]
    pub fn clamp_ttl(&self) -> Option<u32> {
        self.clamp_ttl
    }

    /// Wall-clock bound on waiting for one backend.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Extra-result window after the first success of a backend.
    #[inline]
    pub fn partial_timeout(&self) -> Duration {
        self.partial_timeout
    }
}

/// An overlay of request options.
///
/// Unset fields inherit the context defaults, so the same `Options` value
/// can both seed [`Context::set_options`](crate::Context::set_options) and
/// parameterize an individual query.
///
/// # Examples
/// ```rust
/// use netresolve::{Options, Protocol};
///
/// let opts = Options::new()
///     .node_name("example.net")
///     .service_name("80")
///     .protocol(Protocol::Tcp);
/// ```
#[derive(Clone, Debug, Default)]
pub struct Options {
    nodename: Option<Option<String>>,
    servname: Option<Option<String>>,
    family: Option<Family>,
    socktype: Option<SockType>,
    protocol: Option<Protocol>,
    ifindex: Option<u32>,
    address: Option<IpAddr>,
    port: Option<u16>,
    dns_name: Option<String>,
    dns_class: Option<u16>,
    dns_type: Option<u16>,
    default_loopback: Option<bool>,
    dns_srv_lookup: Option<bool>,
    dns_search: Option<bool>,
    clamp_ttl: Option<u32>,
    timeout: Option<Duration>,
    partial_timeout: Option<Duration>,
}

impl Options {
    /// Returns a fresh `Options` with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the forward node name.
    pub fn node_name(mut self, name: &str) -> Self {
        self.nodename = Some(Some(name.to_string()));
        self
    }

    /// Explicitly clears the node name (resolve the empty node).
    pub fn no_node_name(mut self) -> Self {
        self.nodename = Some(None);
        self
    }

    /// Sets the forward service name.
    pub fn service_name(mut self, name: &str) -> Self {
        self.servname = Some(Some(name.to_string()));
        self
    }

    /// Sets the address family filter.
    pub fn family(mut self, family: Family) -> Self {
        self.family = Some(family);
        self
    }

    /// Sets the socket type filter.
    pub fn socktype(mut self, socktype: SockType) -> Self {
        self.socktype = Some(socktype);
        self
    }

    /// Sets the protocol filter.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Sets the interface filter.
    pub fn ifindex(mut self, ifindex: u32) -> Self {
        self.ifindex = Some(ifindex);
        self
    }

    /// Sets the reverse-query address key; also pins the family filter.
    pub fn address(mut self, address: IpAddr) -> Self {
        self.family = Some(match address {
            IpAddr::V4(_) => Family::Ip4,
            IpAddr::V6(_) => Family::Ip6,
        });
        self.address = Some(address);
        self
    }

    /// Sets the reverse-query port key.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the owner name of a raw DNS query.
    pub fn dns_name(mut self, name: &str) -> Self {
        self.dns_name = Some(name.to_string());
        self
    }

    /// Sets the class of a raw DNS query.
    pub fn dns_class(mut self, class: u16) -> Self {
        self.dns_class = Some(class);
        self
    }

    /// Sets the record type of a raw DNS query.
    pub fn dns_type(mut self, rtype: u16) -> Self {
        self.dns_type = Some(rtype);
        self
    }

    /// Chooses between loopback and any for an empty node name.
    pub fn default_loopback(mut self, value: bool) -> Self {
        self.default_loopback = Some(value);
        self
    }

    /// Enables SRV indirection for forward queries.
    pub fn dns_srv_lookup(mut self, value: bool) -> Self {
        self.dns_srv_lookup = Some(value);
        self
    }

    /// Enables the search list for raw DNS queries.
    pub fn dns_search(mut self, value: bool) -> Self {
        self.dns_search = Some(value);
        self
    }

    /// Caps emitted TTLs at `seconds`.
    pub fn clamp_ttl(mut self, seconds: u32) -> Self {
        self.clamp_ttl = Some(seconds);
        self
    }

    /// Bounds the wait on a single backend.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bounds the extra-result window after a backend's first success.
    pub fn partial_timeout(mut self, timeout: Duration) -> Self {
        self.partial_timeout = Some(timeout);
        self
    }

    pub(crate) fn apply(&self, request: &mut Request) {
        if let Some(v) = &self.nodename {
            request.nodename = v.clone();
        }
        if let Some(v) = &self.servname {
            request.servname = v.clone();
        }
        if let Some(v) = self.family {
            request.family = v;
        }
        if let Some(v) = self.socktype {
            request.socktype = v;
        }
        if let Some(v) = self.protocol {
            request.protocol = v;
        }
        if let Some(v) = self.ifindex {
            request.ifindex = Some(v);
        }
        if let Some(v) = self.address {
            request.address = Some(v);
        }
        if let Some(v) = self.port {
            request.port = v;
        }
        if let Some(v) = &self.dns_name {
            request.dns_name = Some(v.clone());
        }
        if let Some(v) = self.dns_class {
            request.dns_class = v;
        }
        if let Some(v) = self.dns_type {
            request.dns_type = v;
        }
        if let Some(v) = self.default_loopback {
            request.default_loopback = v;
        }
        if let Some(v) = self.dns_srv_lookup {
            request.dns_srv_lookup = v;
        }
        if let Some(v) = self.dns_search {
            request.dns_search = v;
        }
        if let Some(v) = self.clamp_ttl {
            request.clamp_ttl = Some(v);
        }
        if let Some(v) = self.timeout {
            request.timeout = v;
        }
        if let Some(v) = self.partial_timeout {
            request.partial_timeout = v;
        }
    }
}
