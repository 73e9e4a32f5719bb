//! The `exec` backend driven through a shell child.

use netresolve::{Context, NodeAddress, Options, Protocol, SockType};

fn resolve_with_script(script: &str, options: &Options) -> netresolve::Result<netresolve::Response> {
    let mut context = Context::new();
    context
        .set_backend_string(&format!("exec:/bin/sh:-c:{script}"))
        .unwrap();
    context.resolve_forward(options)
}

#[test]
fn address_lines_expand_through_the_service_directory() {
    let response = resolve_with_script(
        "cat >/dev/null; echo 'address 192.0.2.1'; echo",
        &Options::new()
            .node_name("child.example")
            .service_name("80")
            .protocol(Protocol::Tcp),
    )
    .unwrap();

    assert_eq!(response.paths().len(), 1);
    let path = &response.paths()[0];
    assert_eq!(*path.address(), NodeAddress::Ip4("192.0.2.1".parse().unwrap()));
    assert_eq!(path.socktype(), SockType::Stream);
    assert_eq!(path.protocol(), Protocol::Tcp);
    assert_eq!(path.port(), 80);
}

#[test]
fn path_lines_are_taken_literally() {
    let response = resolve_with_script(
        "cat >/dev/null; echo 'path 192.0.2.2 stream tcp 8080 5 7'; echo",
        &Options::new().node_name("child.example"),
    )
    .unwrap();

    assert_eq!(response.paths().len(), 1);
    let path = &response.paths()[0];
    assert_eq!(*path.address(), NodeAddress::Ip4("192.0.2.2".parse().unwrap()));
    assert_eq!(path.port(), 8080);
    assert_eq!(path.priority(), 5);
    assert_eq!(path.weight(), 7);
}

#[test]
fn eof_terminates_the_response() {
    let response = resolve_with_script(
        "cat >/dev/null; echo 'address 192.0.2.3'",
        &Options::new().node_name("child.example"),
    )
    .unwrap();
    assert_eq!(response.paths().len(), 1);
}

#[test]
fn unknown_lines_are_ignored() {
    let response = resolve_with_script(
        "cat >/dev/null; echo 'bogus nonsense'; echo 'address 192.0.2.4'; echo",
        &Options::new().node_name("child.example"),
    )
    .unwrap();
    assert_eq!(response.paths().len(), 1);
}

#[test]
fn failing_child_yields_no_data() {
    let result = resolve_with_script(
        "exit 1",
        &Options::new().node_name("child.example"),
    );
    assert!(matches!(result, Err(netresolve::Error::NoData)));
}
