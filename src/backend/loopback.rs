//! `loopback`: resolves the empty node name and the `localhost` family of
//! names to the loopback addresses.

use super::{Backend, BackendCtx};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub(super) struct LoopbackBackend;

impl Backend for LoopbackBackend {
    fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, _settings: &[String]) {
        let node = ctx.request().nodename().unwrap_or("");
        let ip4 = matches!(node, "" | "localhost" | "localhost4");
        let ip6 = matches!(node, "" | "localhost" | "localhost6");

        if !ip4 && !ip6 {
            ctx.fail();
            return;
        }

        if ip4 {
            ctx.add_address(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, None);
        }
        if ip6 {
            ctx.add_address(IpAddr::V6(Ipv6Addr::LOCALHOST), 0, None);
        }
        ctx.finish();
    }
}
