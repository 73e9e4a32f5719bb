//! The service directory: maps service names to `(socktype, protocol,
//! port)` expansions.
//!
//! Entries come from a services file (`NETRESOLVE_SERVICES`, then
//! `/etc/netresolve/services`, then `/etc/services`) of the usual
//! `name port/proto [aliases...]` form. A built-in protocol-descriptor
//! table governs which socktype/protocol pairs a lookup fans out to; pairs
//! marked as default are the only ones used when the caller specifies
//! neither a socket type nor a protocol.

use crate::{Protocol, SockType};
use std::path::{Path, PathBuf};

struct ProtoDescriptor {
    socktype: SockType,
    protocol: Protocol,
    default_pair: bool,
    name: &'static str,
}

// Order of socktype/protocol pairs matches glibc's getaddrinfo().
const PROTOCOLS: &[ProtoDescriptor] = &[
    ProtoDescriptor {
        socktype: SockType::Stream,
        protocol: Protocol::Tcp,
        default_pair: true,
        name: "tcp",
    },
    ProtoDescriptor {
        socktype: SockType::Dgram,
        protocol: Protocol::Udp,
        default_pair: true,
        name: "udp",
    },
    ProtoDescriptor {
        socktype: SockType::Dgram,
        protocol: Protocol::UdpLite,
        default_pair: false,
        name: "udplite",
    },
    ProtoDescriptor {
        socktype: SockType::Stream,
        protocol: Protocol::Sctp,
        default_pair: false,
        name: "sctp",
    },
    ProtoDescriptor {
        socktype: SockType::Seqpacket,
        protocol: Protocol::Sctp,
        default_pair: false,
        name: "sctp",
    },
];

fn protocol_from_file_token(token: &str) -> Option<Protocol> {
    PROTOCOLS
        .iter()
        .find(|p| p.name == token)
        .map(|p| p.protocol)
}

#[derive(Debug)]
struct ServiceEntry {
    name: String,
    protocol: Protocol,
    port: u16,
}

/// A loaded services table scoped to one context.
#[derive(Debug, Default)]
pub struct ServiceDb {
    entries: Vec<ServiceEntry>,
}

impl ServiceDb {
    /// Loads the services table.
    ///
    /// `path` overrides the search order of `NETRESOLVE_SERVICES`,
    /// `/etc/netresolve/services` and `/etc/services`. A missing or
    /// unreadable file yields an empty table; lookups then fall back to
    /// numeric expansion only.
    pub fn load(path: Option<&Path>) -> ServiceDb {
        let candidates: Vec<PathBuf> = match path {
            Some(p) => vec![p.to_path_buf()],
            None => {
                let mut v = Vec::new();
                if let Ok(env) = std::env::var("NETRESOLVE_SERVICES") {
                    v.push(PathBuf::from(env));
                }
                v.push(PathBuf::from("/etc/netresolve/services"));
                v.push(PathBuf::from("/etc/services"));
                v
            }
        };

        let mut db = ServiceDb::default();
        for candidate in candidates {
            if let Ok(data) = std::fs::read_to_string(&candidate) {
                db.parse(&data);
                break;
            }
        }
        db
    }

    fn parse(&mut self, data: &str) {
        for line in data.lines() {
            let line = match line.split_once('#') {
                Some((before, _)) => before,
                None => line,
            };
            self.parse_line(line);
        }
    }

    fn parse_line(&mut self, line: &str) {
        let mut fields = line.split_whitespace();
        let name = match fields.next() {
            Some(n) => n,
            None => return,
        };
        let (port, proto) = match fields.next().and_then(|f| f.split_once('/')) {
            Some(pair) => pair,
            None => return,
        };
        let port: u16 = match port.parse() {
            Ok(p) if p != 0 => p,
            _ => return,
        };
        let protocol = match protocol_from_file_token(proto) {
            Some(p) => p,
            None => return,
        };

        self.push(name, protocol, port);
        for alias in fields {
            self.push(alias, protocol, port);
        }
    }

    fn push(&mut self, name: &str, protocol: Protocol, port: u16) {
        self.entries.push(ServiceEntry {
            name: name.to_string(),
            protocol,
            port,
        });
    }

    /// Expands a service name under socktype/protocol filters into
    /// `(socktype, protocol, port)` triples, in table order.
    ///
    /// A numeric `name` short-circuits the table. With no name at all a
    /// single triple carrying the filters verbatim and port 0 is produced,
    /// so address-only requests yield exactly one path per address.
    pub fn expand<F>(&self, name: Option<&str>, socktype: SockType, protocol: Protocol, mut emit: F)
    where
        F: FnMut(SockType, Protocol, u16),
    {
        let name = match name {
            Some(n) => n,
            None => {
                emit(socktype, protocol, 0);
                return;
            }
        };

        if let Ok(port) = name.parse::<u16>() {
            fan_out(socktype, protocol, port, &mut emit);
            return;
        }

        let mut count = 0;
        for entry in &self.entries {
            if entry.name != name {
                continue;
            }
            if protocol != Protocol::Unspec && protocol != entry.protocol {
                continue;
            }
            count += 1;
            fan_out(socktype, entry.protocol, entry.port, &mut emit);
        }

        if count == 0 {
            fan_out(socktype, protocol, 0, &mut emit);
        }
    }
}

/// Emits one triple per protocol descriptor compatible with the filters.
/// With an underspecified filter only descriptors marked as the default
/// pair contribute.
fn fan_out<F>(socktype: SockType, protocol: Protocol, port: u16, emit: &mut F)
where
    F: FnMut(SockType, Protocol, u16),
{
    for descriptor in PROTOCOLS {
        if socktype != SockType::Unspec && socktype != descriptor.socktype {
            continue;
        }
        if protocol != Protocol::Unspec && protocol != descriptor.protocol {
            continue;
        }
        if (socktype == SockType::Unspec || protocol == Protocol::Unspec)
            && !descriptor.default_pair
        {
            continue;
        }
        emit(descriptor.socktype, descriptor.protocol, port);
    }
}
