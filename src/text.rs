//! Text renderings of requests and responses.
//!
//! The request form feeds the `exec` backend's child process; the response
//! form is a diagnostic dump, one line per path.

use crate::{path::NodeAddress, request::Request, response::Response};
use std::fmt::Write;

fn banner(kind: &str) -> String {
    format!(
        "{} {} {}\n",
        kind,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

/// Renders a request as the line-oriented form consumed by `exec` children.
pub(crate) fn request_string(request: &Request) -> String {
    let mut out = banner("request");
    if let Some(node) = request.nodename() {
        let _ = writeln!(out, "node {node}");
    }
    if let Some(service) = request.servname() {
        let _ = writeln!(out, "service {service}");
    }
    out.push('\n');
    out
}

pub(crate) fn path_string(path: &crate::Path) -> String {
    match path.address() {
        NodeAddress::Unix(p) => format!("unix {} {}\n", p, path.socktype()),
        address => {
            let mut line = format!("path {address}");
            if path.ifindex() != 0 {
                let _ = write!(line, "%{}", path.ifindex());
            }
            let _ = writeln!(
                line,
                " {} {} {} {} {}",
                path.socktype(),
                path.protocol(),
                path.port(),
                path.priority(),
                path.weight()
            );
            line
        }
    }
}

/// Renders a response as the diagnostic dump: a banner line, one line per
/// path, and a trailing blank line.
pub fn response_string(response: &Response) -> String {
    let mut out = banner("response");
    for path in response.paths() {
        out.push_str(&path_string(path));
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Options, Protocol, SockType};
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn request_form() {
        let mut request = Request::default();
        Options::new()
            .node_name("example.net")
            .service_name("http")
            .apply(&mut request);

        let text = request_string(&request);
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("request netresolve "));
        assert_eq!(lines.next(), Some("node example.net"));
        assert_eq!(lines.next(), Some("service http"));
        assert_eq!(lines.next(), Some(""));
    }

    #[test]
    fn response_form() {
        let request = Request::default();
        let mut response = Response::default();
        response.add_path(
            &request,
            NodeAddress::Ip4(Ipv4Addr::new(1, 2, 3, 4)),
            0,
            SockType::Stream,
            Protocol::Tcp,
            80,
            0,
            0,
            None,
        );
        response.add_address(
            &request,
            &crate::ServiceDb::default(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            None,
        );
        response.add_path(
            &request,
            NodeAddress::Unix("/run/demo.sock".to_string()),
            0,
            SockType::Stream,
            Protocol::Unspec,
            0,
            0,
            0,
            None,
        );

        let text = response_string(&response);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("response netresolve "));
        assert_eq!(lines[1], "path 1.2.3.4 stream tcp 80 0 0");
        assert_eq!(lines[2], "path 127.0.0.1 any any 0 0 0");
        assert_eq!(lines[3], "unix /run/demo.sock stream");
    }
}
