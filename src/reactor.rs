//! Reactor integration: how file descriptors and timers reach the engine.
//!
//! The engine never polls on its own. Everything it waits for — backend
//! sockets, request and partial-result timers (timerfds), the self-posted
//! wakeup (an eventfd) — is registered through a [`Reactor`]. The default
//! implementation is an epoll set owned by the context; an embedder with
//! its own event loop supplies a bridge implementing the same two-function
//! contract and feeds events back via
//! [`Context::dispatch`](crate::Context::dispatch).

use crate::{Error, Result};
use nix::sys::{
    epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout},
    eventfd::{EfdFlags, EventFd},
    time::TimeSpec,
    timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags},
};
use std::{
    os::fd::{AsRawFd, BorrowedFd, RawFd},
    time::Duration,
};

bitflags::bitflags! {
    /// Readiness interest, deliberately limited to read/write.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Events: u8 {
        /// The descriptor is (or should be watched for becoming) readable.
        const READ = 0b01;
        /// The descriptor is (or should be watched for becoming) writable.
        const WRITE = 0b10;
    }
}

/// Identifies one watched source within a context.
///
/// The reactor remembers it as an opaque cookie and hands it back on every
/// event; the context routes it to the owning query. The token makes stale
/// cookies from an already-drained event batch detectable.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SourceId {
    pub(crate) index: u32,
    pub(crate) token: u32,
}

impl SourceId {
    /// Packs the id into a single integer, e.g. for `epoll_data`.
    #[inline]
    pub fn to_raw(self) -> u64 {
        (u64::from(self.token) << 32) | u64::from(self.index)
    }

    /// Reverses [`SourceId::to_raw`].
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        SourceId {
            index: raw as u32,
            token: (raw >> 32) as u32,
        }
    }
}

/// The two-function contract between the engine and an event loop.
///
/// `watch_fd` registers interest and remembers the cookie, returning an
/// opaque handle; `unwatch_fd` takes both back. A single reactor instance
/// is driven from one thread at a time; the engine never calls it
/// re-entrantly from inside an event dispatch.
pub trait Reactor {
    /// Registers `fd` for `events` and associates `source` with it.
    fn watch_fd(&mut self, fd: RawFd, events: Events, source: SourceId) -> Result<u64>;

    /// Removes a registration previously created by `watch_fd`.
    fn unwatch_fd(&mut self, fd: RawFd, handle: u64) -> Result<()>;
}

/// The default epoll-backed reactor used in blocking mode.
pub struct EpollReactor {
    epoll: Epoll,
}

impl EpollReactor {
    /// Creates an empty epoll set.
    pub fn new() -> Result<Self> {
        Ok(EpollReactor {
            epoll: Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?,
        })
    }

    /// The epoll file descriptor.
    ///
    /// An application may poll this descriptor for reading in its own loop
    /// and call [`Context::dispatch_ready`](crate::Context::dispatch_ready)
    /// when it fires. Do not add descriptors to the set directly.
    pub fn fd(&self) -> RawFd {
        self.epoll.0.as_raw_fd()
    }

    /// Waits for events and appends `(source, events)` pairs to `out`.
    pub(crate) fn wait(&self, block: bool, out: &mut Vec<(SourceId, Events)>) -> Result<()> {
        let mut buffer = [EpollEvent::empty(); 16];
        let timeout = if block {
            EpollTimeout::NONE
        } else {
            EpollTimeout::ZERO
        };

        let count = loop {
            match self.epoll.wait(&mut buffer, timeout) {
                Ok(count) => break count,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        };
        for event in &buffer[..count] {
            let mut events = Events::empty();
            let flags = event.events();
            if flags.intersects(
                EpollFlags::EPOLLIN | EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR,
            ) {
                events |= Events::READ;
            }
            if flags.intersects(EpollFlags::EPOLLOUT | EpollFlags::EPOLLERR) {
                events |= Events::WRITE;
            }
            out.push((SourceId::from_raw(event.data()), events));
        }
        Ok(())
    }
}

impl Reactor for EpollReactor {
    fn watch_fd(&mut self, fd: RawFd, events: Events, source: SourceId) -> Result<u64> {
        let mut flags = EpollFlags::empty();
        if events.contains(Events::READ) {
            flags |= EpollFlags::EPOLLIN;
        }
        if events.contains(Events::WRITE) {
            flags |= EpollFlags::EPOLLOUT;
        }
        if flags.is_empty() {
            return Err(Error::BadRequest("watch_fd needs a nonempty event set"));
        }

        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll
            .add(borrowed, EpollEvent::new(flags, source.to_raw()))?;
        Ok(0)
    }

    fn unwatch_fd(&mut self, fd: RawFd, _handle: u64) -> Result<()> {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll.delete(borrowed)?;
        Ok(())
    }
}

/// Creates a one-shot monotonic-clock timer that becomes readable after
/// `duration`. Timers compose with the reactor exactly like any other fd.
pub(crate) fn oneshot_timer(duration: Duration) -> Result<TimerFd> {
    let timer = TimerFd::new(
        ClockId::CLOCK_MONOTONIC,
        TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
    )?;
    timer.set(
        Expiration::OneShot(TimeSpec::from_duration(duration)),
        TimerSetTimeFlags::empty(),
    )?;
    Ok(timer)
}

/// Creates an eventfd that is readable from the start. Used for deferring
/// a state transition until the reactor loop regains control.
pub(crate) fn posted_event() -> Result<EventFd> {
    Ok(EventFd::from_value_and_flags(
        1,
        EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC,
    )?)
}
