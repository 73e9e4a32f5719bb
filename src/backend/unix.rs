//! `unix`: maps absolute-path node names to UNIX socket paths.

use super::{Backend, BackendCtx};
use crate::{path::NodeAddress, Family, Protocol};

pub(super) struct UnixBackend;

impl Backend for UnixBackend {
    fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, _settings: &[String]) {
        let request = ctx.request();
        let family_ok = matches!(request.family(), Family::Unspec | Family::Unix);
        let node = request.nodename().unwrap_or("").to_string();
        let socktype = request.socktype();

        if !family_ok || !node.starts_with('/') {
            ctx.fail();
            return;
        }

        ctx.add_path(
            NodeAddress::Unix(node),
            0,
            socktype,
            Protocol::Unspec,
            0,
            0,
            0,
            None,
        );
        ctx.finish();
    }
}
