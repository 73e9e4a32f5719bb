//! `numerichost`: handles literal `address[%interface]` node names
//! without touching any name service. Forward-only: answering reverse
//! queries with the formatted address would shadow the name-based reverse
//! backends later in the chain.

use super::{Backend, BackendCtx};
use crate::path::parse_numeric_host;
use std::net::IpAddr;

pub(super) struct NumericHostBackend;

impl Backend for NumericHostBackend {
    fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, _settings: &[String]) {
        let node = ctx.request().nodename().unwrap_or("");
        let Some((address, ifindex)) = parse_numeric_host(node) else {
            ctx.fail();
            return;
        };

        let ifindex = match address {
            IpAddr::V6(_) => ifindex,
            IpAddr::V4(_) => 0,
        };
        ctx.add_address(address, ifindex, None);
        ctx.finish();
    }
}
