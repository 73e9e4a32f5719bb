//! The resolver context: configuration, the backend chain, the reactor
//! binding and the set of live queries.

use crate::{
    backend::{parse_chain, Backend, BackendSpec, Registry},
    logging,
    query::{self, CompletionFn, Query, State},
    reactor::{EpollReactor, Events, Reactor, SourceId},
    request::{Options, Request, RequestKind},
    response::Response,
    service::ServiceDb,
    Error, Family, Protocol, QueryId, Result,
};
use log::{debug, warn};
use slab::Slab;
use std::{os::fd::{OwnedFd, RawFd}, str::FromStr, time::Duration};

const DEFAULT_BACKENDS: &str = "unix|any|loopback|numerichost|hosts|hostname|dns";

/// Callback receiving sockets from the bind/connect helper.
pub type SocketCallback = Box<dyn FnMut(QueryId, usize, OwnedFd)>;

pub(crate) enum ReactorBinding {
    Unbound,
    Epoll(EpollReactor),
    External(Box<dyn Reactor>),
}

pub(crate) struct Source {
    pub(crate) query: QueryId,
    pub(crate) fd: RawFd,
    pub(crate) handle: u64,
    pub(crate) token: u32,
}

/// Everything a backend or the engine may need while a query is borrowed
/// out of the slab: the reactor, the source table, configuration and the
/// socket-helper callbacks.
pub(crate) struct Core {
    pub(crate) defaults: Request,
    pub(crate) force_family: Family,
    pub(crate) chain: Vec<BackendSpec>,
    pub(crate) chain_configured: bool,
    pub(crate) registry: Registry,
    pub(crate) reactor: ReactorBinding,
    pub(crate) sources: Slab<Source>,
    next_token: u32,
    services: Option<ServiceDb>,
    pub(crate) on_bind: Option<SocketCallback>,
    pub(crate) on_connect: Option<SocketCallback>,
    pub(crate) first_connect_timeout: Option<Duration>,
}

impl Core {
    fn ensure_reactor(&mut self) -> Result<()> {
        if matches!(self.reactor, ReactorBinding::Unbound) {
            self.reactor = ReactorBinding::Epoll(EpollReactor::new()?);
        }
        Ok(())
    }

    fn reactor_mut(&mut self) -> Option<&mut dyn Reactor> {
        match &mut self.reactor {
            ReactorBinding::Unbound => None,
            ReactorBinding::Epoll(r) => Some(r),
            ReactorBinding::External(r) => Some(r.as_mut()),
        }
    }

    /// Registers `fd` with the reactor on behalf of `qid` and records the
    /// source. The returned id is the cookie the reactor hands back.
    pub(crate) fn watch(&mut self, qid: QueryId, fd: RawFd, events: Events) -> Result<SourceId> {
        self.ensure_reactor()?;

        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);

        let index = self.sources.vacant_key();
        let source = SourceId {
            index: index as u32,
            token,
        };

        let reactor = self.reactor_mut().expect("reactor just ensured");
        let handle = reactor.watch_fd(fd, events, source)?;

        self.sources.insert(Source {
            query: qid,
            fd,
            handle,
            token,
        });

        debug!(
            "[query {}] added file descriptor: fd={} events={:?} (total {})",
            qid,
            fd,
            events,
            self.sources.len()
        );
        Ok(source)
    }

    /// Removes a source from the reactor and the table. Stale ids are
    /// ignored.
    pub(crate) fn unwatch(&mut self, source: SourceId) {
        let index = source.index as usize;
        let valid = self
            .sources
            .get(index)
            .map(|s| s.token == source.token)
            .unwrap_or(false);
        if !valid {
            return;
        }

        let removed = self.sources.remove(index);
        if let Some(reactor) = self.reactor_mut() {
            if let Err(e) = reactor.unwatch_fd(removed.fd, removed.handle) {
                warn!("unwatch of fd {} failed: {}", removed.fd, e);
            }
        }
        debug!(
            "[query {}] removed file descriptor: fd={} (total {})",
            removed.query,
            removed.fd,
            self.sources.len()
        );
    }

    pub(crate) fn lookup(&self, source: SourceId) -> Option<(QueryId, RawFd)> {
        self.sources
            .get(source.index as usize)
            .filter(|s| s.token == source.token)
            .map(|s| (s.query, s.fd))
    }

    /// Finds the position of the source watching `fd` within a query's
    /// source list.
    pub(crate) fn source_position(&self, sources: &[SourceId], fd: RawFd) -> Option<usize> {
        sources.iter().position(|source| {
            self.sources
                .get(source.index as usize)
                .map(|s| s.token == source.token && s.fd == fd)
                .unwrap_or(false)
        })
    }

    /// The lazily-loaded per-context service directory.
    pub(crate) fn services(&mut self) -> &ServiceDb {
        self.services.get_or_insert_with(|| ServiceDb::load(None))
    }
}

fn env_ms(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

/// A resolver context.
///
/// A context owns its backend chain, its reactor binding and every query
/// created from it. It is single-threaded by design: all callbacks fire on
/// the thread driving the reactor.
///
/// # Examples
///
/// Blocking resolution with the built-in reactor:
///
/// ```no_run
/// use netresolve::{Context, Options, Protocol};
///
/// # fn main() -> netresolve::Result<()> {
/// let mut context = Context::new();
/// let response = context.resolve_forward(
///     &Options::new()
///         .node_name("localhost")
///         .service_name("80")
///         .protocol(Protocol::Tcp),
/// )?;
/// for path in response.paths() {
///     println!("{} port {}", path.address(), path.port());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Context {
    pub(crate) core: Core,
    pub(crate) queries: Slab<Query>,
}

impl Context {
    /// Creates a context, merging configuration from the environment:
    /// `NETRESOLVE_VERBOSE`, `NETRESOLVE_FLAG_DEFAULT_LOOPBACK`,
    /// `NETRESOLVE_FORCE_FAMILY`, `NETRESOLVE_CLAMP_TTL`,
    /// `NETRESOLVE_REQUEST_TIMEOUT`, `NETRESOLVE_RESULT_TIMEOUT` and
    /// `NETRESOLVE_BACKENDS`.
    pub fn new() -> Context {
        logging::init_from_env();

        let mut defaults = Request::default();
        if let Some(value) = logging::env_bool("NETRESOLVE_FLAG_DEFAULT_LOOPBACK") {
            defaults.default_loopback = value;
        }
        if let Ok(value) = std::env::var("NETRESOLVE_CLAMP_TTL") {
            if let Ok(ttl) = value.parse::<i64>() {
                defaults.clamp_ttl = u32::try_from(ttl).ok();
            }
        }
        if let Some(timeout) = env_ms("NETRESOLVE_REQUEST_TIMEOUT") {
            defaults.timeout = timeout;
        }
        if let Some(timeout) = env_ms("NETRESOLVE_RESULT_TIMEOUT") {
            defaults.partial_timeout = timeout;
        }

        let force_family = std::env::var("NETRESOLVE_FORCE_FAMILY")
            .ok()
            .and_then(|value| Family::from_str(&value).ok())
            .unwrap_or(Family::Unspec);

        Context {
            core: Core {
                defaults,
                force_family,
                chain: Vec::new(),
                chain_configured: false,
                registry: Registry::with_builtins(),
                reactor: ReactorBinding::Unbound,
                sources: Slab::new(),
                next_token: 0,
                services: None,
                on_bind: None,
                on_connect: None,
                first_connect_timeout: None,
            },
            queries: Slab::new(),
        }
    }

    /// Merges `options` into the defaults every new request starts from.
    pub fn set_options(&mut self, options: &Options) {
        options.apply(&mut self.core.defaults);
    }

    /// Replaces the backend chain.
    ///
    /// Fails with [`Error::BadRequest`] while any query is live, and with
    /// [`Error::ConfigError`] when a mandatory backend is unavailable.
    pub fn set_backend_string(&mut self, string: &str) -> Result<()> {
        if !self.queries.is_empty() {
            return Err(Error::BadRequest(
                "backend chain can't change while queries are live",
            ));
        }
        self.core.chain = parse_chain(&self.core.registry, string)?;
        self.core.chain_configured = true;
        Ok(())
    }

    /// Makes an out-of-tree backend available to the chain parser under
    /// `name`. The factory runs once per query entering the backend.
    pub fn register_backend<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Backend> + 'static,
    {
        self.core.registry.register(name, factory);
    }

    /// Binds the context to an external event loop.
    ///
    /// All descriptor registrations go through `reactor` from now on;
    /// events must be fed back via [`Context::dispatch`]. Only possible
    /// before the first query.
    pub fn attach_reactor(&mut self, reactor: Box<dyn Reactor>) -> Result<()> {
        if !self.queries.is_empty() {
            return Err(Error::BadRequest(
                "reactor can't change while queries are live",
            ));
        }
        if !matches!(self.core.reactor, ReactorBinding::Unbound) {
            return Err(Error::BadRequest("a reactor is already attached"));
        }
        self.core.reactor = ReactorBinding::External(reactor);
        Ok(())
    }

    /// The file descriptor of the built-in epoll reactor, creating the
    /// reactor if needed. Poll it for reading and call
    /// [`Context::dispatch_ready`] when it fires.
    pub fn epoll_fd(&mut self) -> Result<RawFd> {
        self.core.ensure_reactor()?;
        match &self.core.reactor {
            ReactorBinding::Epoll(r) => Ok(r.fd()),
            _ => Err(Error::BadRequest("an external reactor is attached")),
        }
    }

    /// Supplies a callback receiving one bound socket per resolved path.
    /// Implies resolving the empty node name to the any address.
    pub fn set_bind_callback<F>(&mut self, callback: F)
    where
        F: FnMut(QueryId, usize, OwnedFd) + 'static,
    {
        self.core.on_bind = Some(Box::new(callback));
        self.core.on_connect = None;
        self.core.defaults.default_loopback = false;
    }

    /// Supplies a callback receiving the first successfully connected
    /// socket. Implies resolving the empty node name to loopback.
    pub fn set_connect_callback<F>(&mut self, callback: F)
    where
        F: FnMut(QueryId, usize, OwnedFd) + 'static,
    {
        self.core.on_connect = Some(Box::new(callback));
        self.core.on_bind = None;
        self.core.defaults.default_loopback = true;
    }

    /// Bounds the wait on one connect attempt before the next path is
    /// tried in parallel. Disabled by default.
    pub fn set_first_connect_timeout(&mut self, timeout: Option<Duration>) {
        self.core.first_connect_timeout = timeout;
    }

    fn ensure_chain(&mut self) -> Result<()> {
        if !self.core.chain_configured {
            let string =
                std::env::var("NETRESOLVE_BACKENDS").unwrap_or_else(|_| DEFAULT_BACKENDS.into());
            self.core.chain = parse_chain(&self.core.registry, &string)?;
            self.core.chain_configured = true;
        }
        if self.core.chain.is_empty() {
            return Err(Error::ConfigError("no usable backends".into()));
        }
        Ok(())
    }

    fn query_internal(
        &mut self,
        kind: RequestKind,
        options: &Options,
        callback: Option<CompletionFn>,
    ) -> Result<QueryId> {
        self.ensure_chain()?;
        self.core.ensure_reactor()?;

        let mut request = self.core.defaults.clone();
        options.apply(&mut request);
        request.kind = kind;

        if self.core.force_family != Family::Unspec {
            request.family = self.core.force_family;
        }
        if request.dns_srv_lookup && request.protocol == Protocol::Unspec {
            request.protocol = Protocol::Tcp;
        }

        match kind {
            RequestKind::Forward => {}
            RequestKind::Reverse => {
                if request.address.is_none() {
                    return Err(Error::BadRequest("reverse query needs an address"));
                }
            }
            RequestKind::Dns => {
                if request.dns_name.is_none() {
                    return Err(Error::BadRequest("dns query needs an owner name"));
                }
                if request.dns_type == 0 {
                    return Err(Error::BadRequest("dns query needs a record type"));
                }
            }
        }

        let qid = QueryId(self.queries.insert(Query::new(request, callback)));
        debug!("[query {}] created ({:?})", qid, kind);
        query::start(&mut self.core, &mut self.queries, qid);
        Ok(qid)
    }

    /// Starts a forward query; `callback` fires exactly once on completion.
    pub fn query_forward<F>(&mut self, options: &Options, callback: F) -> Result<QueryId>
    where
        F: FnMut(QueryId, &Response) + 'static,
    {
        self.query_internal(RequestKind::Forward, options, Some(Box::new(callback)))
    }

    /// Starts a reverse query; `callback` fires exactly once on completion.
    pub fn query_reverse<F>(&mut self, options: &Options, callback: F) -> Result<QueryId>
    where
        F: FnMut(QueryId, &Response) + 'static,
    {
        self.query_internal(RequestKind::Reverse, options, Some(Box::new(callback)))
    }

    /// Starts a raw DNS query; `callback` fires exactly once on completion.
    pub fn query_dns<F>(&mut self, options: &Options, callback: F) -> Result<QueryId>
    where
        F: FnMut(QueryId, &Response) + 'static,
    {
        self.query_internal(RequestKind::Dns, options, Some(Box::new(callback)))
    }

    fn resolve(&mut self, kind: RequestKind, options: &Options) -> Result<Response> {
        let qid = self.query_internal(kind, options, None)?;
        let outcome = self.wait(qid);
        let query = query::free(&mut self.core, &mut self.queries, qid)
            .expect("query vanished while waiting");
        outcome?;

        match query.state {
            State::Done => Ok(query.response),
            _ => Err(query.failure()),
        }
    }

    /// Resolves a forward query, blocking on the built-in reactor.
    pub fn resolve_forward(&mut self, options: &Options) -> Result<Response> {
        self.resolve(RequestKind::Forward, options)
    }

    /// Resolves a reverse query, blocking on the built-in reactor.
    pub fn resolve_reverse(&mut self, options: &Options) -> Result<Response> {
        self.resolve(RequestKind::Reverse, options)
    }

    /// Resolves a raw DNS query, blocking on the built-in reactor.
    pub fn resolve_dns(&mut self, options: &Options) -> Result<Response> {
        self.resolve(RequestKind::Dns, options)
    }

    /// Drives the built-in reactor until `query` completes.
    pub fn wait(&mut self, query: QueryId) -> Result<()> {
        loop {
            let Some(q) = self.queries.get(query.0) else {
                return Err(Error::BadRequest("unknown query"));
            };
            if q.state.is_terminal() {
                return Ok(());
            }
            if self.core.sources.is_empty() {
                // Nothing can ever wake this query up again.
                query::set_state(&mut self.core, &mut self.queries, query, State::Failed);
                continue;
            }
            self.poll_once(true)?;
        }
    }

    /// Drains ready events from the built-in reactor without blocking.
    pub fn dispatch_ready(&mut self) -> Result<()> {
        self.poll_once(false)
    }

    /// Routes one event from an external reactor into the owning query.
    pub fn dispatch(&mut self, source: SourceId, events: Events) -> Result<()> {
        let Some((qid, fd)) = self.core.lookup(source) else {
            debug!("event for stale source {:?}", source);
            return Ok(());
        };
        if !query::dispatch(&mut self.core, &mut self.queries, qid, fd, events) {
            warn!("[query {}] unhandled event on fd {}", qid, fd);
        }
        Ok(())
    }

    fn poll_once(&mut self, block: bool) -> Result<()> {
        let mut events = Vec::new();
        match &self.core.reactor {
            ReactorBinding::Epoll(reactor) => reactor.wait(block, &mut events)?,
            _ => {
                return Err(Error::BadRequest(
                    "blocking mode requires the built-in reactor",
                ))
            }
        }
        for (source, event) in events {
            self.dispatch(source, event)?;
        }
        Ok(())
    }

    /// The response accumulated by a live or completed query.
    pub fn query_response(&self, query: QueryId) -> Option<&Response> {
        self.queries.get(query.0).map(|q| &q.response)
    }

    /// True once a query has completed (successfully or not).
    pub fn query_complete(&self, query: QueryId) -> bool {
        self.queries
            .get(query.0)
            .map(|q| q.state.is_terminal())
            .unwrap_or(false)
    }

    /// Cancels a query and releases everything it owns. After this no
    /// callback fires and no descriptor it registered stays watched.
    pub fn query_free(&mut self, query: QueryId) {
        query::free(&mut self.core, &mut self.queries, query);
    }

    #[cfg(test)]
    pub(crate) fn watched_source_count(&self) -> usize {
        self.core.sources.len()
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let ids: Vec<usize> = self.queries.iter().map(|(key, _)| key).collect();
        for id in ids {
            query::free(&mut self.core, &mut self.queries, QueryId(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendCtx;
    use std::{net::UdpSocket, os::fd::AsRawFd};

    #[derive(Default)]
    struct Hang {
        socket: Option<UdpSocket>,
    }

    impl Backend for Hang {
        fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, _settings: &[String]) {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket.set_nonblocking(true).unwrap();
            ctx.watch_fd(socket.as_raw_fd(), Events::READ).unwrap();
            self.socket = Some(socket);
        }

        fn cleanup(&mut self, ctx: &mut BackendCtx<'_>) {
            if let Some(socket) = self.socket.take() {
                ctx.unwatch_fd(socket.as_raw_fd());
            }
        }
    }

    fn hang_context() -> Context {
        let mut context = Context::new();
        context.register_backend("hang", || Box::<Hang>::default());
        context.set_backend_string("hang").unwrap();
        context
    }

    #[test]
    fn freed_query_leaves_no_sources() {
        let mut context = hang_context();
        let qid = context
            .query_forward(&Options::new().node_name("x"), |_, _| {})
            .unwrap();
        assert!(context.watched_source_count() > 0);

        context.query_free(qid);
        assert_eq!(context.watched_source_count(), 0);
    }

    #[test]
    fn resolve_through_loopback_backend() {
        let mut context = Context::new();
        context.set_backend_string("loopback").unwrap();
        let response = context
            .resolve_forward(&Options::new().node_name("localhost"))
            .unwrap();
        assert_eq!(response.paths().len(), 2);
        assert_eq!(context.watched_source_count(), 0);
    }

    #[test]
    fn reverse_without_address_is_rejected() {
        let mut context = Context::new();
        context.set_backend_string("numerichost").unwrap();
        assert!(matches!(
            context.resolve_reverse(&Options::new()),
            Err(Error::BadRequest(_))
        ));
    }
}
