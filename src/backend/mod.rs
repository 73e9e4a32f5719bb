//! The backend ABI: the contract between the query engine and each
//! pluggable resolver, plus the chain parser and the backend registry.
//!
//! A backend implements whichever setup entry points apply to the request
//! types it can serve; the engine treats a missing entry point as an
//! immediate failure of that backend, which makes the query fall through
//! to the next one in the chain. A setup must do one of three things:
//! finish synchronously ([`BackendCtx::finish`]), fail
//! ([`BackendCtx::fail`]), or register at least one descriptor
//! ([`BackendCtx::watch_fd`]) and return with the query left waiting.

use crate::{
    context::Core,
    path::{NodeAddress, Security},
    query::Query,
    reactor::Events,
    request::Request,
    Error, Protocol, QueryId, Result, SockType,
};
use std::{collections::HashMap, net::IpAddr, os::fd::RawFd, rc::Rc};

mod any;
mod dns;
mod exec;
mod hostname;
mod hosts;
mod loopback;
mod numerichost;
mod unix;

/// One resolution backend, instantiated per query and per chain entry.
///
/// `dispatch` is called for every reactor wake-up on a descriptor the
/// backend registered. `cleanup` runs exactly once per setup, on any
/// terminal transition or when the query is freed; it must unregister any
/// descriptors the backend still watches.
pub trait Backend {
    /// Serves a forward (name to endpoints) request.
    fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, settings: &[String]) {
        let _ = settings;
        ctx.fail();
    }

    /// Serves a reverse (address to names) request.
    fn setup_reverse(&mut self, ctx: &mut BackendCtx<'_>, settings: &[String]) {
        let _ = settings;
        ctx.fail();
    }

    /// Serves a raw DNS record request.
    fn setup_dns(&mut self, ctx: &mut BackendCtx<'_>, settings: &[String]) {
        let _ = settings;
        ctx.fail();
    }

    /// Handles a reactor event on one of this backend's descriptors.
    fn dispatch(&mut self, ctx: &mut BackendCtx<'_>, fd: RawFd, events: Events) {
        let _ = (ctx, fd, events);
    }

    /// Releases backend resources and unregisters remaining descriptors.
    fn cleanup(&mut self, ctx: &mut BackendCtx<'_>) {
        let _ = ctx;
    }
}

/// The engine-side view a backend works against: the request it may read,
/// the response operations it may emit, and descriptor registration.
pub struct BackendCtx<'a> {
    pub(crate) core: &'a mut Core,
    pub(crate) query: &'a mut Query,
    pub(crate) qid: QueryId,
}

impl BackendCtx<'_> {
    /// The request being resolved.
    #[inline]
    pub fn request(&self) -> &Request {
        &self.query.request
    }

    /// Appends one path, subject to the request's filters.
    #[allow(clippy::too_many_arguments)]
    pub fn add_path(
        &mut self,
        address: NodeAddress,
        ifindex: u32,
        socktype: SockType,
        protocol: Protocol,
        port: u16,
        priority: u16,
        weight: u16,
        ttl: Option<u32>,
    ) {
        let query = &mut *self.query;
        query.response.add_path(
            &query.request,
            address,
            ifindex,
            socktype,
            protocol,
            port,
            priority,
            weight,
            ttl,
        );
    }

    /// Appends one path per service-directory expansion of the request's
    /// service name.
    pub fn add_address(&mut self, address: IpAddr, ifindex: u32, ttl: Option<u32>) {
        let services = self.core.services();
        let query = &mut *self.query;
        query
            .response
            .add_address(&query.request, services, address, ifindex, ttl);
    }

    /// Sets the canonical node name; the last writer wins.
    pub fn set_canonical_name(&mut self, name: &str) {
        self.query.response.set_node_name(name);
    }

    /// Sets the resolved service name; the last writer wins.
    pub fn set_service_name(&mut self, name: &str) {
        self.query.response.set_service_name(name);
    }

    /// Stores the raw DNS answer; the last writer wins.
    pub fn set_dns_answer(&mut self, answer: Vec<u8>) {
        self.query.response.set_dns_answer(answer);
    }

    /// Raises the response security level. Downgrades are ignored.
    pub fn set_security(&mut self, level: Security) {
        self.query.response.set_security(level);
    }

    /// Marks the backend as successfully finished. Paths emitted so far
    /// are committed; the engine may keep a partial-result window open for
    /// more paths from this backend.
    pub fn finish(&mut self) {
        self.query.mark_resolved();
    }

    /// Marks the backend as failed; the engine falls through to the next
    /// backend in the chain.
    pub fn fail(&mut self) {
        self.query.mark_error();
    }

    /// Registers `fd` with the reactor on behalf of this query.
    pub fn watch_fd(&mut self, fd: RawFd, events: Events) -> Result<()> {
        let source = self.core.watch(self.qid, fd, events)?;
        self.query.sources.push(source);
        Ok(())
    }

    /// Unregisters a descriptor previously passed to [`Self::watch_fd`].
    pub fn unwatch_fd(&mut self, fd: RawFd) {
        let position = self
            .core
            .source_position(&self.query.sources, fd);
        if let Some(index) = position {
            let source = self.query.sources.remove(index);
            self.core.unwatch(source);
        } else {
            log::warn!("[query {}] unwatch of unknown fd {}", self.qid, fd);
        }
    }
}

pub(crate) type BackendFactory = Rc<dyn Fn() -> Box<dyn Backend>>;

/// The name-to-factory table backends are loaded from. Built-ins are
/// always present; additional backends can be registered through
/// [`Context::register_backend`](crate::Context::register_backend).
pub(crate) struct Registry {
    map: HashMap<String, BackendFactory>,
}

impl Registry {
    pub(crate) fn with_builtins() -> Registry {
        let mut registry = Registry {
            map: HashMap::new(),
        };
        registry.register("unix", || Box::new(unix::UnixBackend));
        registry.register("any", || Box::new(any::AnyBackend));
        registry.register("loopback", || Box::new(loopback::LoopbackBackend));
        registry.register("numerichost", || Box::new(numerichost::NumericHostBackend));
        registry.register("hosts", || Box::<hosts::HostsBackend>::default());
        registry.register("hostname", || Box::new(hostname::HostnameBackend));
        registry.register("dns", || Box::<dns::DnsBackend>::default());
        registry.register("exec", || Box::<exec::ExecBackend>::default());
        registry
    }

    pub(crate) fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Backend> + 'static,
    {
        self.map.insert(name.to_string(), Rc::new(factory));
    }

    fn get(&self, name: &str) -> Option<BackendFactory> {
        self.map.get(name).cloned()
    }
}

/// One parsed entry of the backend chain.
pub(crate) struct BackendSpec {
    pub(crate) name: String,
    pub(crate) mandatory: bool,
    pub(crate) settings: Vec<String>,
    pub(crate) factory: BackendFactory,
}

/// Parses a chain specification of the form `name[:arg]*[|name[:arg]*]*`.
/// A leading `+` marks the backend mandatory. Unknown optional backends
/// are skipped with a warning; an unknown mandatory backend is a
/// configuration error.
pub(crate) fn parse_chain(registry: &Registry, string: &str) -> Result<Vec<BackendSpec>> {
    let mut chain = Vec::new();

    for segment in string.split('|') {
        let mut tokens = segment.split(':');
        let first = tokens.next().unwrap_or("");
        let (mandatory, name) = match first.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, first),
        };
        if name.is_empty() {
            continue;
        }

        let settings: Vec<String> = tokens.map(str::to_string).collect();
        match registry.get(name) {
            Some(factory) => chain.push(BackendSpec {
                name: name.to_string(),
                mandatory,
                settings,
                factory,
            }),
            None if mandatory => {
                return Err(Error::ConfigError(format!(
                    "mandatory backend '{name}' is not available"
                )));
            }
            None => log::warn!("skipping unknown backend '{name}'"),
        }
    }

    Ok(chain)
}
