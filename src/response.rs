//! Query responses: the ordered path collection and its composition rules.

use crate::{
    path::{NodeAddress, Path, Security},
    request::Request,
    service::ServiceDb,
    Protocol, SockType,
};
use std::net::IpAddr;

/// The accumulated result of one query.
///
/// Paths appear in insertion order across the whole backend chain; the
/// engine performs no global sort and no de-duplication.
#[derive(Clone, Debug, Default)]
pub struct Response {
    pub(crate) paths: Vec<Path>,
    pub(crate) node_name: Option<String>,
    pub(crate) service_name: Option<String>,
    pub(crate) dns_answer: Option<Vec<u8>>,
    pub(crate) security: Security,
}

impl Response {
    /// The resolved endpoint paths, in insertion order.
    #[inline]
    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    /// Canonical node name (forward) or resolved node name (reverse).
    #[inline]
    pub fn node_name(&self) -> Option<&str> {
        self.node_name.as_deref()
    }

    /// Resolved service name of a reverse query.
    #[inline]
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Raw answer bytes of a DNS query.
    #[inline]
    pub fn dns_answer(&self) -> Option<&[u8]> {
        self.dns_answer.as_deref()
    }

    /// The response-wide security level.
    #[inline]
    pub fn security(&self) -> Security {
        self.security
    }

    /// True when no backend produced anything at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.node_name.is_none() && self.dns_answer.is_none()
    }

    /// Appends a path unless the request's family or interface filter
    /// rejects it. The TTL is clamped to the request maximum and the path
    /// is stamped with the current security level.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_path(
        &mut self,
        request: &Request,
        address: NodeAddress,
        ifindex: u32,
        socktype: SockType,
        protocol: Protocol,
        port: u16,
        priority: u16,
        weight: u16,
        ttl: Option<u32>,
    ) {
        let family = address.family();
        if request.family != crate::Family::Unspec && request.family != family {
            return;
        }
        if let Some(wanted) = request.ifindex {
            if ifindex != wanted {
                return;
            }
        }

        // Scope only makes sense for IPv6 link-local addresses.
        let ifindex = if family == crate::Family::Ip6 { ifindex } else { 0 };

        let ttl = match (ttl, request.clamp_ttl) {
            (Some(t), Some(clamp)) => Some(t.min(clamp)),
            (None, Some(clamp)) => Some(clamp),
            (t, None) => t,
        };

        self.paths.push(Path {
            address,
            ifindex,
            socktype,
            protocol,
            port,
            priority,
            weight,
            ttl,
            security: self.security,
        });
    }

    /// Appends one path per `(socktype, protocol, port)` triple the service
    /// directory derives from the request's service name and filters.
    pub(crate) fn add_address(
        &mut self,
        request: &Request,
        services: &ServiceDb,
        address: IpAddr,
        ifindex: u32,
        ttl: Option<u32>,
    ) {
        let mut triples = Vec::new();
        services.expand(
            request.servname.as_deref(),
            request.socktype,
            request.protocol,
            |socktype, protocol, port| triples.push((socktype, protocol, port)),
        );
        for (socktype, protocol, port) in triples {
            self.add_path(
                request,
                NodeAddress::from(address),
                ifindex,
                socktype,
                protocol,
                port,
                0,
                0,
                ttl,
            );
        }
    }

    pub(crate) fn set_node_name(&mut self, name: &str) {
        self.node_name = Some(name.to_string());
    }

    pub(crate) fn set_service_name(&mut self, name: &str) {
        self.service_name = Some(name.to_string());
    }

    pub(crate) fn set_dns_answer(&mut self, answer: Vec<u8>) {
        self.dns_answer = Some(answer);
    }

    /// Raises the security level; downgrades are ignored.
    pub(crate) fn set_security(&mut self, level: Security) {
        if level > self.security {
            self.security = level;
        }
    }
}
