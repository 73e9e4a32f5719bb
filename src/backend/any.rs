//! `any`: resolves the empty node name to the wildcard addresses, unless
//! the request prefers loopback.

use super::{Backend, BackendCtx};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub(super) struct AnyBackend;

impl Backend for AnyBackend {
    fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, _settings: &[String]) {
        let request = ctx.request();
        let node_empty = request.nodename().unwrap_or("").is_empty();
        if request.default_loopback() || !node_empty {
            ctx.fail();
            return;
        }

        ctx.add_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, None);
        ctx.add_address(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0, None);
        ctx.finish();
    }
}
