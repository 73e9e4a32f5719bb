#![warn(missing_docs)]

//! [netresolve](crate) is a pluggable host/service name-resolution library.
//!
//! A [`Context`] drives a chain of independent resolution backends (hosts
//! file, loopback, numeric literals, recursive DNS, subprocesses) over a
//! single shared fd reactor, composes their partial answers under request
//! and partial-result timeouts, and yields an ordered list of endpoint
//! [`Path`]s. Resolution runs blocking on the built-in epoll loop or
//! non-blocking against an embedder-supplied event loop implementing
//! [`reactor::Reactor`].
//!
//! Linux-only: the engine composes timers and wakeups out of timerfds and
//! eventfds registered through the same descriptor-watching interface as
//! backend sockets.

pub mod backend;
mod connect;
mod context;
mod dns;
pub mod errors;
mod logging;
mod path;
mod query;
pub mod reactor;
mod request;
mod response;
mod service;
mod text;

pub use connect::{bind_socket, connect_socket};
pub use context::{Context, SocketCallback};
pub use path::{parse_numeric_host, Family, NodeAddress, Path, Protocol, Security, SockType};
pub use query::QueryId;
pub use request::{Options, Request, RequestKind};
pub use response::Response;
pub use service::ServiceDb;
pub use text::response_string;

#[doc(inline)]
pub use errors::{Error, Result};
