//! `exec`: delegates resolution to a subprocess speaking a line protocol.
//!
//! The settings are the argv. The request is written to the child's stdin
//! in the textual form of [`crate::text`]; the child answers with
//! `address <ip>[%<iface>]` and
//! `path <ip>[%<iface>] <socktype> <proto> <port> <priority> <weight>`
//! lines, terminated by a blank line or EOF.

use super::{Backend, BackendCtx};
use crate::{
    path::{parse_numeric_host, NodeAddress},
    reactor::Events,
    text, Protocol, SockType,
};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::{
    io::{Read, Write},
    net::IpAddr,
    os::fd::{AsRawFd, RawFd},
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
};

#[derive(Default)]
pub(super) struct ExecBackend {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    input: Vec<u8>,
    buffer: Vec<u8>,
    emitted: bool,
}

fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

struct PathLine {
    address: IpAddr,
    ifindex: u32,
    socktype: SockType,
    protocol: Protocol,
    port: u16,
    priority: u16,
    weight: u16,
}

fn parse_path_line(line: &str) -> Option<PathLine> {
    let mut fields = line.split_whitespace();
    let (address, ifindex) = parse_numeric_host(fields.next()?)?;
    let socktype: SockType = fields.next()?.parse().ok()?;
    let protocol: Protocol = fields.next()?.parse().ok()?;
    let port: u16 = fields.next()?.parse().ok()?;
    let priority: u16 = fields.next()?.parse().ok()?;
    let weight: u16 = fields.next()?.parse().ok()?;
    Some(PathLine {
        address,
        ifindex,
        socktype,
        protocol,
        port,
        priority,
        weight,
    })
}

impl ExecBackend {
    fn close_stdin(&mut self, ctx: &mut BackendCtx<'_>) {
        if let Some(stdin) = self.stdin.take() {
            ctx.unwatch_fd(stdin.as_raw_fd());
        }
    }

    fn close_stdout(&mut self, ctx: &mut BackendCtx<'_>) {
        if let Some(stdout) = self.stdout.take() {
            ctx.unwatch_fd(stdout.as_raw_fd());
        }
    }

    fn send_stdin(&mut self, ctx: &mut BackendCtx<'_>) {
        if let Some(stdin) = self.stdin.as_mut() {
            if !self.input.is_empty() {
                match stdin.write(&self.input) {
                    Ok(written) => {
                        self.input.drain(..written);
                        if !self.input.is_empty() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                    Err(e) => log::debug!("exec: write failed: {}", e),
                }
            }
        }
        // Request fully written (or the pipe broke): close so the child
        // sees EOF.
        self.close_stdin(ctx);
    }

    /// Returns true when the response is complete.
    fn received_line(&mut self, ctx: &mut BackendCtx<'_>, line: &str) -> bool {
        log::debug!("exec: received: {}", line);

        if line.is_empty() {
            return true;
        }

        if let Some(rest) = line.strip_prefix("address ") {
            if let Some((address, ifindex)) = parse_numeric_host(rest.trim()) {
                ctx.add_address(address, ifindex, None);
                self.emitted = true;
            }
        } else if let Some(rest) = line.strip_prefix("path ") {
            if let Some(path) = parse_path_line(rest) {
                ctx.add_path(
                    NodeAddress::from(path.address),
                    path.ifindex,
                    path.socktype,
                    path.protocol,
                    path.port,
                    path.priority,
                    path.weight,
                    None,
                );
                self.emitted = true;
            }
        }
        false
    }

    fn pickup_stdout(&mut self, ctx: &mut BackendCtx<'_>) {
        let mut chunk = [0u8; 1024];
        let mut eof = false;
        loop {
            let Some(stdout) = self.stdout.as_mut() else {
                return;
            };
            match stdout.read(&mut chunk) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(size) => self.buffer.extend_from_slice(&chunk[..size]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::debug!("exec: read failed: {}", e);
                    eof = true;
                    break;
                }
            }
        }

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if self.received_line(ctx, &line) {
                self.close_stdout(ctx);
                ctx.finish();
                return;
            }
        }

        if eof {
            // EOF terminates the response; a child that never produced
            // anything counts as failed.
            self.close_stdout(ctx);
            if self.emitted {
                ctx.finish();
            } else {
                ctx.fail();
            }
        }
    }
}

impl Backend for ExecBackend {
    fn setup_forward(&mut self, ctx: &mut BackendCtx<'_>, settings: &[String]) {
        let Some(command) = settings.first() else {
            ctx.fail();
            return;
        };

        let spawned = Command::new(command)
            .args(&settings[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                log::warn!("exec: can't run {}: {}", command, e);
                ctx.fail();
                return;
            }
        };

        let stdin = child.stdin.take().expect("stdin is piped");
        let stdout = child.stdout.take().expect("stdout is piped");
        let nonblocking = set_nonblocking(stdin.as_raw_fd())
            .and_then(|_| set_nonblocking(stdout.as_raw_fd()));
        if nonblocking.is_err() || ctx.watch_fd(stdin.as_raw_fd(), Events::WRITE).is_err() {
            let _ = child.kill();
            let _ = child.wait();
            ctx.fail();
            return;
        }
        if ctx.watch_fd(stdout.as_raw_fd(), Events::READ).is_err() {
            ctx.unwatch_fd(stdin.as_raw_fd());
            let _ = child.kill();
            let _ = child.wait();
            ctx.fail();
            return;
        }

        self.input = text::request_string(ctx.request()).into_bytes();
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
    }

    fn dispatch(&mut self, ctx: &mut BackendCtx<'_>, fd: RawFd, events: Events) {
        let stdin_fd = self.stdin.as_ref().map(|s| s.as_raw_fd());
        let stdout_fd = self.stdout.as_ref().map(|s| s.as_raw_fd());

        if Some(fd) == stdin_fd && events.contains(Events::WRITE) {
            self.send_stdin(ctx);
        } else if Some(fd) == stdout_fd && events.contains(Events::READ) {
            self.pickup_stdout(ctx);
        } else {
            log::debug!("exec: unexpected events {:?} on fd {}", events, fd);
            ctx.fail();
        }
    }

    fn cleanup(&mut self, ctx: &mut BackendCtx<'_>) {
        self.close_stdin(ctx);
        self.close_stdout(ctx);
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_line_full() {
        let path = parse_path_line("192.0.2.1 stream tcp 80 5 10").unwrap();
        assert_eq!(path.address, "192.0.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(path.socktype, SockType::Stream);
        assert_eq!(path.protocol, Protocol::Tcp);
        assert_eq!((path.port, path.priority, path.weight), (80, 5, 10));
    }

    #[test]
    fn path_line_with_scope() {
        let path = parse_path_line("fe80::1%999 dgram udp 53 0 0").unwrap();
        assert_eq!(path.ifindex, 999);
    }

    #[test]
    fn malformed_path_lines() {
        assert!(parse_path_line("192.0.2.1 stream tcp").is_none());
        assert!(parse_path_line("not-an-address stream tcp 80 0 0").is_none());
        assert!(parse_path_line("192.0.2.1 bogus tcp 80 0 0").is_none());
    }
}
