//! `hostname`: resolves the system's own host name to the addresses of
//! its interfaces, preferring globally usable ones.

use super::{Backend, BackendCtx};
use nix::ifaddrs::getifaddrs;
use std::net::IpAddr;

pub(super) struct HostnameBackend;

fn interface_addresses() -> Vec<(IpAddr, u32)> {
    let Ok(addrs) = getifaddrs() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for interface in addrs {
        let Some(storage) = interface.address else {
            continue;
        };
        if let Some(sin) = storage.as_sockaddr_in() {
            out.push((IpAddr::V4(sin.ip()), 0));
        } else if let Some(sin6) = storage.as_sockaddr_in6() {
            out.push((IpAddr::V6(sin6.ip()), sin6.scope_id()));
        }
    }
    out
}

fn is_global(address: IpAddr, ifindex: u32) -> bool {
    match address {
        IpAddr::V4(a) => !a.is_loopback(),
        IpAddr::V6(a) => !a.is_loopback() && ifindex == 0,
    }
}

impl Backend for HostnameBackend {
    fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, _settings: &[String]) {
        let Some(node) = ctx.request().nodename().map(str::to_string) else {
            ctx.fail();
            return;
        };
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok());
        if hostname.as_deref() != Some(node.as_str()) {
            ctx.fail();
            return;
        }

        let addresses = interface_addresses();
        if addresses.is_empty() {
            ctx.fail();
            return;
        }

        let global: Vec<(IpAddr, u32)> = addresses
            .iter()
            .copied()
            .filter(|(address, ifindex)| is_global(*address, *ifindex))
            .collect();
        let selected = if global.is_empty() { addresses } else { global };

        for (address, ifindex) in selected {
            ctx.add_address(address, ifindex, None);
        }
        ctx.set_canonical_name(&node);
        ctx.finish();
    }
}
