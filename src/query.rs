//! The per-query state machine.
//!
//! A query walks the context's backend chain. Each backend either finishes
//! synchronously, fails (the query falls through to the next backend), or
//! suspends on registered descriptors. Two engine timers bound the wait:
//! the request timer (until the backend's first success, expiry fails the
//! backend) and the partial timer (extra-result window afterwards).
//! Transitions out of a synchronously-finished setup are deferred through
//! an immediately-readable eventfd so they never run inside the backend's
//! own call stack.

use crate::{
    backend::BackendCtx,
    connect::{self, ConnectState},
    context::Core,
    reactor::{self, Events, SourceId},
    request::{Request, RequestKind},
    response::Response,
    Error,
};
use log::{debug, error, warn};
use nix::sys::{eventfd::EventFd, timerfd::TimerFd};
use slab::Slab;
use std::{
    fmt::{self, Display, Formatter},
    os::fd::{AsFd, AsRawFd, RawFd},
    time::Duration,
};

/// Stable handle of a query within its [`Context`](crate::Context).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct QueryId(pub(crate) usize);

impl Display for QueryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum State {
    None,
    Setup,
    Waiting,
    WaitingMore,
    Resolved,
    Connecting,
    Done,
    Error,
    Failed,
}

impl State {
    fn to_str(self) -> &'static str {
        match self {
            State::None => "none",
            State::Setup => "setup",
            State::Waiting => "waiting",
            State::WaitingMore => "waiting-more",
            State::Resolved => "resolved",
            State::Connecting => "connecting",
            State::Done => "done",
            State::Error => "error",
            State::Failed => "failed",
        }
    }

    pub(crate) fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Failed)
    }
}

/// A timer armed by the engine: a one-shot timerfd watched through the
/// reactor like any other descriptor.
pub(crate) struct EngineTimer {
    tfd: TimerFd,
    pub(crate) source: SourceId,
}

impl EngineTimer {
    pub(crate) fn fd(&self) -> RawFd {
        self.tfd.as_fd().as_raw_fd()
    }
}

/// The self-posted wakeup used to defer a transition until the reactor
/// loop regains control.
pub(crate) struct DelayedEvent {
    efd: EventFd,
    source: SourceId,
}

impl DelayedEvent {
    fn fd(&self) -> RawFd {
        self.efd.as_fd().as_raw_fd()
    }
}

pub(crate) type CompletionFn = Box<dyn FnMut(QueryId, &Response)>;

pub(crate) struct Query {
    pub(crate) state: State,
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) backend_index: usize,
    pub(crate) backend: Option<Box<dyn crate::backend::Backend>>,
    pub(crate) sources: Vec<SourceId>,
    pub(crate) timeout: Option<EngineTimer>,
    pub(crate) partial: Option<EngineTimer>,
    pub(crate) delayed: Option<DelayedEvent>,
    pub(crate) timed_out: bool,
    pub(crate) callback: Option<CompletionFn>,
    pub(crate) connect: Option<ConnectState>,
}

impl Query {
    pub(crate) fn new(request: Request, callback: Option<CompletionFn>) -> Query {
        Query {
            state: State::None,
            request,
            response: Response::default(),
            backend_index: 0,
            backend: None,
            sources: Vec::new(),
            timeout: None,
            partial: None,
            delayed: None,
            timed_out: false,
            callback,
            connect: None,
        }
    }

    /// Backend-visible success signal; the engine picks the new state up
    /// after the backend call unwinds.
    pub(crate) fn mark_resolved(&mut self) {
        match self.state {
            State::Setup | State::Waiting | State::WaitingMore => {
                self.state = State::Resolved;
            }
            State::Resolved => {}
            state => warn!("finish() in state {}", state.to_str()),
        }
    }

    /// Backend-visible failure signal.
    pub(crate) fn mark_error(&mut self) {
        match self.state {
            State::Setup | State::Waiting | State::WaitingMore => self.state = State::Error,
            State::Error | State::Resolved => {}
            state => warn!("fail() in state {}", state.to_str()),
        }
    }

    /// Number of watched sources not owned by the engine itself.
    fn backend_source_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|source| {
                Some(**source) != self.timeout.as_ref().map(|t| t.source)
                    && Some(**source) != self.partial.as_ref().map(|t| t.source)
                    && Some(**source) != self.delayed.as_ref().map(|d| d.source)
            })
            .count()
    }

    pub(crate) fn failure(&self) -> Error {
        if self.timed_out {
            Error::TimedOut
        } else {
            Error::NoData
        }
    }
}

pub(crate) fn start(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    set_state(core, queries, qid, State::Setup);
}

pub(crate) fn set_state(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId, state: State) {
    let old_state = queries[qid.0].state;
    if state == old_state {
        return;
    }
    queries[qid.0].state = state;

    debug!(
        "[query {}] state: {} -> {}",
        qid,
        old_state.to_str(),
        state.to_str()
    );

    match state {
        State::None | State::Resolved | State::Error => {}
        State::Setup => enter_setup(core, queries, qid),
        State::Waiting => {
            let timeout = queries[qid.0].request.timeout;
            if !timeout.is_zero() {
                match arm_timer(core, &mut queries[qid.0], qid, timeout) {
                    Ok(timer) => queries[qid.0].timeout = Some(timer),
                    Err(e) => {
                        error!("[query {}] can't arm request timer: {}", qid, e);
                        set_state(core, queries, qid, State::Failed);
                    }
                }
            }
        }
        State::WaitingMore => {
            // The request timer bounds the wait for the first success
            // only; from here on the partial window is the sole limit.
            clear_timeout(core, &mut queries[qid.0]);

            let window = queries[qid.0].request.partial_timeout;
            if window.is_zero() {
                set_state(core, queries, qid, State::Connecting);
            } else {
                match arm_timer(core, &mut queries[qid.0], qid, window) {
                    Ok(timer) => queries[qid.0].partial = Some(timer),
                    Err(e) => {
                        error!("[query {}] can't arm partial timer: {}", qid, e);
                        set_state(core, queries, qid, State::Connecting);
                    }
                }
            }
        }
        State::Connecting => enter_connecting(core, queries, qid),
        State::Done => enter_done(core, queries, qid),
        State::Failed => enter_failed(core, queries, qid),
    }
}

fn enter_setup(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    let index = queries[qid.0].backend_index;
    let (factory, settings, name) = {
        let spec = &core.chain[index];
        (spec.factory.clone(), spec.settings.clone(), spec.name.clone())
    };

    debug!("[query {}] entering backend '{}'", qid, name);

    let mut backend = factory();
    let kind = queries[qid.0].request.kind;
    {
        let query = &mut queries[qid.0];
        let mut ctx = BackendCtx { core, query, qid };
        match kind {
            RequestKind::Forward => backend.setup_forward(&mut ctx, &settings),
            RequestKind::Reverse => backend.setup_reverse(&mut ctx, &settings),
            RequestKind::Dns => backend.setup_dns(&mut ctx, &settings),
        }
    }
    queries[qid.0].backend = Some(backend);

    match queries[qid.0].state {
        State::Setup => {
            let next = if queries[qid.0].request.timeout.is_zero() {
                State::Failed
            } else {
                State::Waiting
            };
            set_state(core, queries, qid, next);
        }
        State::Error => set_state(core, queries, qid, State::Failed),
        State::Resolved => arm_delayed(core, queries, qid),
        _ => {}
    }
}

/// Defers the resolved-to-connecting transition through an eventfd that is
/// readable from the start, so it happens on the next reactor pass.
fn arm_delayed(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    let result = reactor::posted_event().and_then(|efd| {
        let fd = efd.as_fd().as_raw_fd();
        let source = core.watch(qid, fd, Events::READ)?;
        Ok(DelayedEvent { efd, source })
    });

    match result {
        Ok(delayed) => {
            queries[qid.0].sources.push(delayed.source);
            queries[qid.0].delayed = Some(delayed);
        }
        Err(e) => {
            // Without the eventfd the transition happens in place.
            warn!("[query {}] can't create wakeup eventfd: {}", qid, e);
            set_state(core, queries, qid, State::Connecting);
        }
    }
}

fn enter_connecting(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    cleanup_backend(core, queries, qid);

    // Consult remaining mandatory backends before handing the paths over.
    let chain_len = core.chain.len();
    let mut index = queries[qid.0].backend_index + 1;
    while index < chain_len && !core.chain[index].mandatory {
        index += 1;
    }
    queries[qid.0].backend_index = index;
    if index < chain_len {
        set_state(core, queries, qid, State::Setup);
        return;
    }

    if core.on_connect.is_some() {
        connect::start(core, queries, qid);
    } else if core.on_bind.is_some() {
        connect::bind_all(core, queries, qid);
        set_state(core, queries, qid, State::Done);
    } else {
        set_state(core, queries, qid, State::Done);
    }
}

fn enter_done(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    connect::cleanup(core, &mut queries[qid.0]);
    fire_callback(queries, qid);
}

fn enter_failed(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    if !queries[qid.0].response.paths.is_empty() {
        error!("[query {}] failed reply has data", qid);
    }

    cleanup_backend(core, queries, qid);

    let next = queries[qid.0].backend_index + 1;
    queries[qid.0].backend_index = next;
    if next < core.chain.len() {
        set_state(core, queries, qid, State::Setup);
    } else {
        fire_callback(queries, qid);
    }
}

fn fire_callback(queries: &mut Slab<Query>, qid: QueryId) {
    if let Some(mut callback) = queries[qid.0].callback.take() {
        callback(qid, &queries[qid.0].response);
    }
}

/// Routes one reactor event into the query. Returns false when the event
/// matches nothing the query knows about.
pub(crate) fn dispatch(
    core: &mut Core,
    queries: &mut Slab<Query>,
    qid: QueryId,
    fd: RawFd,
    events: Events,
) -> bool {
    let state = queries[qid.0].state;
    debug!("[query {}] dispatching: fd={} events={:?}", qid, fd, events);

    match state {
        State::Waiting | State::WaitingMore => {
            if state == State::WaitingMore
                && queries[qid.0].partial.as_ref().map(|t| t.fd()) == Some(fd)
            {
                debug!("[query {}] partial result timed out", qid);
                clear_partial(core, &mut queries[qid.0]);
                set_state(core, queries, qid, State::Connecting);
                return true;
            }
            if queries[qid.0].timeout.as_ref().map(|t| t.fd()) == Some(fd) {
                debug!("[query {}] timed out", qid);
                clear_timeout(core, &mut queries[qid.0]);
                queries[qid.0].timed_out = true;
                set_state(core, queries, qid, State::Failed);
                return true;
            }

            let Some(mut backend) = queries[qid.0].backend.take() else {
                return false;
            };
            {
                let query = &mut queries[qid.0];
                let mut ctx = BackendCtx { core, query, qid };
                backend.dispatch(&mut ctx, fd, events);
            }
            queries[qid.0].backend = Some(backend);

            match queries[qid.0].state {
                State::Resolved => {
                    // A success with sources still registered opens the
                    // partial-result window; finishing inside the window
                    // or with nothing left to wait for closes it.
                    let next = if state == State::WaitingMore
                        || queries[qid.0].backend_source_count() == 0
                    {
                        State::Connecting
                    } else {
                        State::WaitingMore
                    };
                    set_state(core, queries, qid, next);
                }
                State::Error => set_state(core, queries, qid, State::Failed),
                State::WaitingMore if queries[qid.0].backend_source_count() == 0 => {
                    set_state(core, queries, qid, State::Connecting);
                }
                _ => {}
            }
            true
        }
        State::Resolved => {
            if queries[qid.0].delayed.as_ref().map(|d| d.fd()) == Some(fd) {
                clear_delayed(core, &mut queries[qid.0]);
                set_state(core, queries, qid, State::Connecting);
                true
            } else {
                false
            }
        }
        State::Connecting => connect::dispatch(core, queries, qid, fd, events),
        _ => false,
    }
}

/// Cancels and removes a query. No callback fires afterwards and no
/// descriptor registered on its behalf stays in the reactor.
pub(crate) fn free(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) -> Option<Query> {
    if !queries.contains(qid.0) {
        return None;
    }

    queries[qid.0].callback = None;
    cleanup_backend(core, queries, qid);
    connect::cleanup(core, &mut queries[qid.0]);

    let query = queries.remove(qid.0);
    for source in &query.sources {
        warn!("[query {}] removing leaked source {:?}", qid, source);
        core.unwatch(*source);
    }

    debug!("[query {}] freed", qid);
    Some(query)
}

/// Runs the current backend's cleanup and clears engine timers. Safe to
/// call repeatedly; after the first call there is nothing left to do.
fn cleanup_backend(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    if let Some(mut backend) = queries[qid.0].backend.take() {
        let query = &mut queries[qid.0];
        let mut ctx = BackendCtx { core, query, qid };
        backend.cleanup(&mut ctx);
    }

    let query = &mut queries[qid.0];
    clear_timeout(core, query);
    clear_partial(core, query);
    clear_delayed(core, query);
}

pub(crate) fn arm_timer(
    core: &mut Core,
    query: &mut Query,
    qid: QueryId,
    duration: Duration,
) -> crate::Result<EngineTimer> {
    let tfd = reactor::oneshot_timer(duration)?;
    let fd = tfd.as_fd().as_raw_fd();
    let source = core.watch(qid, fd, Events::READ)?;
    query.sources.push(source);
    debug!("[query {}] added timeout: fd={} {:?}", qid, fd, duration);
    Ok(EngineTimer { tfd, source })
}

fn clear_timeout(core: &mut Core, query: &mut Query) {
    if let Some(timer) = query.timeout.take() {
        remove_query_source(core, query, timer.source);
    }
}

fn clear_partial(core: &mut Core, query: &mut Query) {
    if let Some(timer) = query.partial.take() {
        remove_query_source(core, query, timer.source);
    }
}

fn clear_delayed(core: &mut Core, query: &mut Query) {
    if let Some(delayed) = query.delayed.take() {
        remove_query_source(core, query, delayed.source);
    }
}

pub(crate) fn remove_query_source(core: &mut Core, query: &mut Query, source: SourceId) {
    query.sources.retain(|s| *s != source);
    core.unwatch(source);
}
