//! `dns`: a built-in stub resolver over UDP.
//!
//! Nameservers and the search list come from `/etc/resolv.conf`; the first
//! settings arguments may override the server address, the port, or (with
//! a leading `/`) the configuration path. Forward queries run A and AAAA
//! in parallel, subject to the family filter, with optional SRV
//! indirection; reverse queries run PTR; raw queries deliver the answer
//! packet verbatim and optionally walk the search list on NXDOMAIN.
//!
//! The backend signals success as soon as the first answer is applied and
//! keeps its socket registered, so the engine's partial-result window
//! collects the remaining answers.

use super::{Backend, BackendCtx};
use crate::{
    dns::{
        build_query, parse_message, Message, RData, CLASS_IN, RCODE_NXDOMAIN, TYPE_A, TYPE_AAAA,
        TYPE_PTR, TYPE_SRV,
    },
    path::NodeAddress,
    reactor::Events,
    Family,
};
use log::{debug, warn};
use resolv_conf::ScopedIp;
use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    os::fd::{AsRawFd, RawFd},
};

const RESOLV_CONF: &str = "/etc/resolv.conf";
const DNS_PORT: u16 = 53;

#[derive(Clone, Copy, Debug)]
struct SrvInfo {
    port: u16,
    priority: u16,
    weight: u16,
}

#[derive(Debug)]
enum Purpose {
    Address { srv: Option<SrvInfo> },
    Pointer,
    Service,
    Raw,
}

#[derive(Debug)]
struct Pending {
    id: u16,
    purpose: Purpose,
}

#[derive(Default)]
pub(super) struct DnsBackend {
    socket: Option<UdpSocket>,
    server: Option<SocketAddr>,
    search: Vec<String>,
    pending: Vec<Pending>,
    candidates: Vec<String>,
    emitted: bool,
}

fn reverse_name(address: IpAddr) -> String {
    match address {
        IpAddr::V4(a) => {
            let o = a.octets();
            format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(a) => {
            let mut name = String::with_capacity(72);
            for byte in a.octets().iter().rev() {
                name.push(char::from_digit((*byte & 0x0f) as u32, 16).unwrap());
                name.push('.');
                name.push(char::from_digit((*byte >> 4) as u32, 16).unwrap());
                name.push('.');
            }
            name.push_str("ip6.arpa");
            name
        }
    }
}

impl DnsBackend {
    fn configure(&mut self, settings: &[String]) {
        let mut conf_path = RESOLV_CONF.to_string();
        let mut server_ip: Option<IpAddr> = None;
        let mut server_port = DNS_PORT;

        for setting in settings {
            if setting.starts_with('/') {
                conf_path = setting.clone();
            } else if let Ok(ip) = setting.parse::<IpAddr>() {
                server_ip = Some(ip);
            } else if let Ok(port) = setting.parse::<u16>() {
                server_port = port;
            } else {
                warn!("dns: ignoring setting '{}'", setting);
            }
        }

        if let Ok(data) = std::fs::read(&conf_path) {
            if let Ok(config) = resolv_conf::Config::parse(&data) {
                if server_ip.is_none() {
                    server_ip = config.nameservers.first().map(|scoped| match scoped {
                        ScopedIp::V4(a) => IpAddr::V4(*a),
                        ScopedIp::V6(a, _) => IpAddr::V6(*a),
                    });
                }
                self.search = config
                    .get_last_search_or_domain()
                    .map(|domain| domain.to_string())
                    .collect();
            }
        }

        self.server = server_ip.map(|ip| SocketAddr::new(ip, server_port));
    }

    fn open_socket(&mut self, ctx: &mut BackendCtx<'_>) -> bool {
        let Some(server) = self.server else {
            debug!("dns: no nameserver configured");
            return false;
        };

        let bind: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = match UdpSocket::bind(bind)
            .and_then(|s| s.connect(server).map(|_| s))
            .and_then(|s| s.set_nonblocking(true).map(|_| s))
        {
            Ok(socket) => socket,
            Err(e) => {
                debug!("dns: can't reach {}: {}", server, e);
                return false;
            }
        };
        if ctx.watch_fd(socket.as_raw_fd(), Events::READ).is_err() {
            return false;
        }
        self.socket = Some(socket);
        true
    }

    fn send_query(&mut self, name: &str, qtype: u16, qclass: u16, purpose: Purpose) -> bool {
        let id = rand::random::<u16>();
        let Ok(message) = build_query(id, name, qtype, qclass) else {
            return false;
        };
        let Some(socket) = self.socket.as_ref() else {
            return false;
        };

        debug!("dns: sending type {} query for {}", qtype, name);
        match socket.send(&message) {
            Ok(_) => {
                self.pending.push(Pending { id, purpose });
                true
            }
            Err(e) => {
                debug!("dns: send failed: {}", e);
                false
            }
        }
    }

    fn send_address_queries(&mut self, family: Family, name: &str, srv: Option<SrvInfo>) -> bool {
        let mut sent = false;
        if matches!(family, Family::Unspec | Family::Ip4) {
            sent |= self.send_query(name, TYPE_A, CLASS_IN, Purpose::Address { srv });
        }
        if matches!(family, Family::Unspec | Family::Ip6) {
            sent |= self.send_query(name, TYPE_AAAA, CLASS_IN, Purpose::Address { srv });
        }
        sent
    }

    fn apply_addresses(&mut self, ctx: &mut BackendCtx<'_>, message: &Message, srv: Option<SrvInfo>) {
        let mut canonical: Option<String> = None;
        for record in &message.answers {
            match &record.data {
                RData::A(address) => {
                    self.emit(ctx, IpAddr::V4(*address), record.ttl, srv);
                }
                RData::Aaaa(address) => {
                    self.emit(ctx, IpAddr::V6(*address), record.ttl, srv);
                }
                RData::Cname(target) => canonical = Some(target.clone()),
                _ => {}
            }
        }
        if let Some(name) = canonical {
            ctx.set_canonical_name(&name);
        }
    }

    fn emit(&mut self, ctx: &mut BackendCtx<'_>, address: IpAddr, ttl: u32, srv: Option<SrvInfo>) {
        match srv {
            Some(srv) => {
                let socktype = ctx.request().socktype();
                let protocol = ctx.request().protocol();
                ctx.add_path(
                    NodeAddress::from(address),
                    0,
                    socktype,
                    protocol,
                    srv.port,
                    srv.priority,
                    srv.weight,
                    Some(ttl),
                );
            }
            None => ctx.add_address(address, 0, Some(ttl)),
        }
        self.emitted = true;
    }

    fn release_socket(&mut self, ctx: &mut BackendCtx<'_>) {
        if let Some(socket) = self.socket.take() {
            ctx.unwatch_fd(socket.as_raw_fd());
        }
    }

    fn handle_message(&mut self, ctx: &mut BackendCtx<'_>, bytes: &[u8]) {
        let message = match parse_message(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!("dns: dropping unparseable datagram: {}", e);
                return;
            }
        };
        let Some(position) = self.pending.iter().position(|p| p.id == message.id) else {
            debug!("dns: dropping datagram with unknown id {}", message.id);
            return;
        };
        let pending = self.pending.remove(position);

        match pending.purpose {
            Purpose::Address { srv } => {
                if message.rcode == 0 {
                    self.apply_addresses(ctx, &message, srv);
                }
                if self.pending.is_empty() {
                    // Nothing outstanding: release the socket so the
                    // engine does not hold the partial window open.
                    self.release_socket(ctx);
                    if self.emitted {
                        ctx.finish();
                    } else {
                        ctx.fail();
                    }
                } else if self.emitted {
                    ctx.finish();
                }
            }
            Purpose::Pointer => {
                let name = message.answers.iter().find_map(|record| match &record.data {
                    RData::Ptr(target) => Some(target.clone()),
                    _ => None,
                });
                self.release_socket(ctx);
                match name {
                    Some(name) if message.rcode == 0 => {
                        ctx.set_canonical_name(&name);
                        ctx.finish();
                    }
                    _ => ctx.fail(),
                }
            }
            Purpose::Service => {
                let family = ctx.request().family();
                let node = ctx.request().nodename().unwrap_or("").to_string();
                let mut targets = 0;
                if message.rcode == 0 {
                    let records: Vec<(SrvInfo, String)> = message
                        .answers
                        .iter()
                        .filter_map(|record| match &record.data {
                            RData::Srv {
                                priority,
                                weight,
                                port,
                                target,
                            } => Some((
                                SrvInfo {
                                    port: *port,
                                    priority: *priority,
                                    weight: *weight,
                                },
                                target.clone(),
                            )),
                            _ => None,
                        })
                        .collect();
                    for (srv, target) in records {
                        if self.send_address_queries(family, &target, Some(srv)) {
                            targets += 1;
                        }
                    }
                }
                // No usable SRV records: fall back to a plain lookup.
                if targets == 0 && !self.send_address_queries(family, &node, None) {
                    ctx.fail();
                }
            }
            Purpose::Raw => {
                if message.rcode == RCODE_NXDOMAIN {
                    if let Some(next) = self.candidates.pop() {
                        let qclass = ctx.request().dns_class();
                        let qtype = ctx.request().dns_type();
                        if self.send_query(&next, qtype, qclass, Purpose::Raw) {
                            return;
                        }
                    }
                }
                self.release_socket(ctx);
                ctx.set_dns_answer(bytes.to_vec());
                ctx.finish();
            }
        }
    }
}

impl Backend for DnsBackend {
    fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, settings: &[String]) {
        let request = ctx.request();
        let family = request.family();
        let Some(node) = request.nodename().map(str::to_string) else {
            ctx.fail();
            return;
        };
        if family == Family::Unix {
            ctx.fail();
            return;
        }
        let srv_lookup = request.dns_srv_lookup() && request.servname().is_some();
        let srv_name = format!(
            "_{}._{}.{}",
            request.servname().unwrap_or(""),
            request.protocol().to_str(),
            node
        );

        self.configure(settings);
        if !self.open_socket(ctx) {
            ctx.fail();
            return;
        }

        let sent = if srv_lookup {
            self.send_query(&srv_name, TYPE_SRV, CLASS_IN, Purpose::Service)
        } else {
            self.send_address_queries(family, &node, None)
        };
        if !sent {
            ctx.fail();
        }
    }

    fn setup_reverse(&mut self, ctx: &mut BackendCtx<'_>, settings: &[String]) {
        let Some(address) = ctx.request().address() else {
            ctx.fail();
            return;
        };

        self.configure(settings);
        if !self.open_socket(ctx) {
            ctx.fail();
            return;
        }
        if !self.send_query(&reverse_name(address), TYPE_PTR, CLASS_IN, Purpose::Pointer) {
            ctx.fail();
        }
    }

    fn setup_dns(&mut self, ctx: &mut BackendCtx<'_>, settings: &[String]) {
        let request = ctx.request();
        let Some(name) = request.dns_name().map(str::to_string) else {
            ctx.fail();
            return;
        };
        let qtype = request.dns_type();
        let qclass = request.dns_class();
        let with_search = request.dns_search() && !name.ends_with('.');

        self.configure(settings);
        if !self.open_socket(ctx) {
            ctx.fail();
            return;
        }

        if with_search {
            // Kept in reverse so the next candidate pops cheaply.
            self.candidates = self
                .search
                .iter()
                .rev()
                .map(|domain| format!("{name}.{domain}"))
                .collect();
        }

        if !self.send_query(&name, qtype, qclass, Purpose::Raw) {
            ctx.fail();
        }
    }

    fn dispatch(&mut self, ctx: &mut BackendCtx<'_>, fd: RawFd, _events: Events) {
        let socket_fd = self.socket.as_ref().map(|s| s.as_raw_fd());
        if Some(fd) != socket_fd {
            debug!("dns: unexpected event on fd {}", fd);
            return;
        }

        let mut buffer = [0u8; 4096];
        loop {
            let Some(socket) = self.socket.as_ref() else {
                return;
            };
            match socket.recv(&mut buffer) {
                Ok(size) => {
                    let datagram = buffer[..size].to_vec();
                    self.handle_message(ctx, &datagram);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    debug!("dns: recv failed: {}", e);
                    ctx.fail();
                    return;
                }
            }
        }
    }

    fn cleanup(&mut self, ctx: &mut BackendCtx<'_>) {
        if let Some(socket) = self.socket.take() {
            ctx.unwatch_fd(socket.as_raw_fd());
        }
    }
}
