//! The socket helper: post-resolution bind/connect iteration over paths.
//!
//! When the caller supplied a connect callback, the engine walks the paths
//! in order, starting a non-blocking connect and watching the socket for
//! writability. An optional first-connect timeout starts the next path in
//! parallel; whichever attempt completes first wins and the losers are
//! closed. A bind callback instead binds every path synchronously and
//! hands over each successfully bound socket.

use crate::{
    context::Core,
    path::{Family, Path},
    query::{self, EngineTimer, Query, State},
    reactor::Events,
    Context, Error, Options, QueryId, Response, Result,
};
use log::debug;
use slab::Slab;
use socket2::{Domain, Protocol as RawProtocol, SockAddr, Socket, Type};
use std::{
    cell::RefCell,
    io,
    os::fd::{AsRawFd, OwnedFd},
    rc::Rc,
};

pub(crate) struct ConnectState {
    next_path: usize,
    attempts: Vec<Attempt>,
    first_timer: Option<EngineTimer>,
}

struct Attempt {
    path_index: usize,
    socket: Socket,
}

enum Started {
    Connected(Socket),
    Pending(Socket),
}

fn open_socket(path: &Path) -> io::Result<(Socket, SockAddr)> {
    let address = path
        .socket_addr()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unrepresentable address"))?;
    let domain = match path.family() {
        Family::Ip4 => Domain::IPV4,
        Family::Ip6 => Domain::IPV6,
        Family::Unix => Domain::UNIX,
        Family::Unspec => {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no family"));
        }
    };
    let socktype = path
        .socktype()
        .to_raw()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no socket type"))?;
    let protocol = match path.family() {
        Family::Unix => None,
        _ => path.protocol().to_raw().map(RawProtocol::from),
    };

    let socket = Socket::new(domain, Type::from(socktype), protocol)?;
    socket.set_nonblocking(true)?;
    Ok((socket, address))
}

fn begin_connect(path: &Path) -> io::Result<Started> {
    let (socket, address) = open_socket(path)?;
    match socket.connect(&address) {
        Ok(()) => Ok(Started::Connected(socket)),
        Err(e)
            if e.raw_os_error() == Some(nix::libc::EINPROGRESS)
                || e.kind() == io::ErrorKind::WouldBlock =>
        {
            Ok(Started::Pending(socket))
        }
        Err(e) => Err(e),
    }
}

fn deliver(core: &mut Core, bind: bool, qid: QueryId, path_index: usize, socket: Socket) {
    let slot = if bind {
        &mut core.on_bind
    } else {
        &mut core.on_connect
    };
    if let Some(mut callback) = slot.take() {
        callback(qid, path_index, OwnedFd::from(socket));
        let slot = if bind {
            &mut core.on_bind
        } else {
            &mut core.on_connect
        };
        *slot = Some(callback);
    }
}

/// Starts the connect iteration. Called on entering the connecting state
/// when the caller supplied a connect callback.
pub(crate) fn start(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    queries[qid.0].connect = Some(ConnectState {
        next_path: 0,
        attempts: Vec::new(),
        first_timer: None,
    });
    advance(core, queries, qid);
}

/// Starts connect attempts until one is in flight, one completed, or the
/// paths ran out.
fn advance(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    loop {
        let query = &mut queries[qid.0];
        let state = query.connect.as_mut().expect("connect state present");
        let index = state.next_path;
        let Some(path) = query.response.paths.get(index).cloned() else {
            break;
        };
        state.next_path += 1;

        match begin_connect(&path) {
            Ok(Started::Connected(socket)) => {
                debug!("[query {}] connected path {} immediately", qid, index);
                deliver(core, false, qid, index, socket);
                query::set_state(core, queries, qid, State::Done);
                return;
            }
            Ok(Started::Pending(socket)) => {
                let fd = socket.as_raw_fd();
                let Ok(source) = core.watch(qid, fd, Events::WRITE) else {
                    continue;
                };
                let query = &mut queries[qid.0];
                query.sources.push(source);
                let state = query.connect.as_mut().expect("connect state present");
                state.attempts.push(Attempt {
                    path_index: index,
                    socket,
                });

                if state.first_timer.is_none() {
                    if let Some(timeout) = core.first_connect_timeout {
                        if let Ok(timer) = query::arm_timer(core, &mut queries[qid.0], qid, timeout)
                        {
                            let state =
                                queries[qid.0].connect.as_mut().expect("connect state present");
                            state.first_timer = Some(timer);
                        }
                    }
                }
                return;
            }
            Err(e) => {
                debug!("[query {}] connect to path {} failed: {}", qid, index, e);
                continue;
            }
        }
    }

    let no_attempts = queries[qid.0]
        .connect
        .as_ref()
        .map(|s| s.attempts.is_empty())
        .unwrap_or(true);
    if no_attempts {
        query::set_state(core, queries, qid, State::Failed);
    }
}

/// Handles a reactor event while the query is connecting.
pub(crate) fn dispatch(
    core: &mut Core,
    queries: &mut Slab<Query>,
    qid: QueryId,
    fd: std::os::fd::RawFd,
    _events: Events,
) -> bool {
    let timer_fd = queries[qid.0]
        .connect
        .as_ref()
        .and_then(|s| s.first_timer.as_ref())
        .map(|t| t.fd());
    if timer_fd == Some(fd) {
        let query = &mut queries[qid.0];
        let timer = query
            .connect
            .as_mut()
            .and_then(|s| s.first_timer.take())
            .expect("timer just seen");
        query::remove_query_source(core, query, timer.source);
        debug!("[query {}] first connect timed out, trying next path", qid);
        advance(core, queries, qid);
        return true;
    }

    let position = queries[qid.0]
        .connect
        .as_ref()
        .and_then(|s| s.attempts.iter().position(|a| a.socket.as_raw_fd() == fd));
    let Some(position) = position else {
        return false;
    };

    let attempt = {
        let query = &mut queries[qid.0];
        let state = query.connect.as_mut().expect("connect state present");
        state.attempts.remove(position)
    };
    if let Some(index) = core.source_position(&queries[qid.0].sources, fd) {
        let source = queries[qid.0].sources.remove(index);
        core.unwatch(source);
    }

    match attempt.socket.take_error() {
        Ok(None) => {
            debug!("[query {}] connected path {}", qid, attempt.path_index);
            deliver(core, false, qid, attempt.path_index, attempt.socket);
            query::set_state(core, queries, qid, State::Done);
        }
        result => {
            debug!(
                "[query {}] connect to path {} failed: {:?}",
                qid, attempt.path_index, result
            );
            drop(attempt.socket);
            let empty = queries[qid.0]
                .connect
                .as_ref()
                .map(|s| s.attempts.is_empty())
                .unwrap_or(true);
            if empty {
                advance(core, queries, qid);
            }
        }
    }
    true
}

/// Binds every path and hands each successfully bound socket to the bind
/// callback.
pub(crate) fn bind_all(core: &mut Core, queries: &mut Slab<Query>, qid: QueryId) {
    let paths: Vec<Path> = queries[qid.0].response.paths.clone();
    for (index, path) in paths.iter().enumerate() {
        let bound = open_socket(path).and_then(|(socket, address)| {
            socket.bind(&address)?;
            Ok(socket)
        });
        match bound {
            Ok(socket) => deliver(core, true, qid, index, socket),
            Err(e) => debug!("[query {}] bind to path {} failed: {}", qid, index, e),
        }
    }
}

/// Closes in-flight attempts and the first-connect timer.
pub(crate) fn cleanup(core: &mut Core, query: &mut Query) {
    let Some(mut state) = query.connect.take() else {
        return;
    };
    if let Some(timer) = state.first_timer.take() {
        query::remove_query_source(core, query, timer.source);
    }
    for attempt in state.attempts.drain(..) {
        let fd = attempt.socket.as_raw_fd();
        if let Some(index) = core.source_position(&query.sources, fd) {
            let source = query.sources.remove(index);
            core.unwatch(source);
        }
    }
}

fn one_shot(
    node: Option<&str>,
    service: Option<&str>,
    options: &Options,
    bind: bool,
) -> Result<OwnedFd> {
    let mut context = Context::new();
    let slot: Rc<RefCell<Option<OwnedFd>>> = Rc::new(RefCell::new(None));

    let captured = slot.clone();
    let callback = move |_query: QueryId, _index: usize, fd: OwnedFd| {
        let mut slot = captured.borrow_mut();
        if slot.is_none() {
            *slot = Some(fd);
        }
    };
    if bind {
        context.set_bind_callback(callback);
    } else {
        context.set_connect_callback(callback);
    }

    let mut merged = options.clone();
    if let Some(node) = node {
        merged = merged.node_name(node);
    }
    if let Some(service) = service {
        merged = merged.service_name(service);
    }

    let _: Response = context.resolve_forward(&merged)?;
    drop(context);

    let fd = slot.borrow_mut().take();
    fd.ok_or(Error::NoData)
}

/// Resolves `node`/`service` and returns the first socket that could be
/// bound to a resolved path.
pub fn bind_socket(
    node: Option<&str>,
    service: Option<&str>,
    options: &Options,
) -> Result<OwnedFd> {
    one_shot(node, service, options, true)
}

/// Resolves `node`/`service` and returns the first successfully connected
/// socket.
pub fn connect_socket(
    node: Option<&str>,
    service: Option<&str>,
    options: &Options,
) -> Result<OwnedFd> {
    one_shot(node, service, options, false)
}
