//! Hosts-file resolution, forward and reverse.

use netresolve::{Context, Family, NodeAddress, Options};
use std::io::Write;

fn hosts_context() -> (Context, tempfile::NamedTempFile) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# test hosts file").unwrap();
    writeln!(file, "192.0.2.10 testhost testalias").unwrap();
    writeln!(file, "2001:db8::10 testhost").unwrap();
    writeln!(file, "192.0.2.11 otherhost").unwrap();
    file.flush().unwrap();

    let mut context = Context::new();
    let chain = format!("hosts:{}", file.path().display());
    context.set_backend_string(&chain).unwrap();
    (context, file)
}

#[test]
fn forward_returns_all_families_in_file_order() {
    let (mut context, _file) = hosts_context();
    let response = context
        .resolve_forward(&Options::new().node_name("testhost"))
        .unwrap();

    let addresses: Vec<&NodeAddress> =
        response.paths().iter().map(|p| p.address()).collect();
    assert_eq!(
        addresses,
        vec![
            &NodeAddress::Ip4("192.0.2.10".parse().unwrap()),
            &NodeAddress::Ip6("2001:db8::10".parse().unwrap()),
        ]
    );
    assert_eq!(response.node_name(), Some("testhost"));
}

#[test]
fn alias_resolves_to_canonical_name() {
    let (mut context, _file) = hosts_context();
    let response = context
        .resolve_forward(&Options::new().node_name("testalias"))
        .unwrap();

    assert_eq!(response.paths().len(), 1);
    assert_eq!(response.node_name(), Some("testhost"));
}

#[test]
fn reverse_forward_round_trip() {
    let (mut context, _file) = hosts_context();
    let forward = context
        .resolve_forward(&Options::new().node_name("testhost").family(Family::Ip4))
        .unwrap();
    let first = &forward.paths()[0];
    let NodeAddress::Ip4(address) = first.address() else {
        panic!("expected an IPv4 path");
    };

    let reverse = context
        .resolve_reverse(&Options::new().address((*address).into()))
        .unwrap();
    assert_eq!(reverse.node_name(), Some("testhost"));
}

#[test]
fn reverse_passes_numerichost_and_reaches_hosts() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "192.0.2.10 testhost").unwrap();
    file.flush().unwrap();

    let mut context = Context::new();
    let chain = format!("unix|any|loopback|numerichost|hosts:{}", file.path().display());
    context.set_backend_string(&chain).unwrap();

    let response = context
        .resolve_reverse(&Options::new().address("192.0.2.10".parse().unwrap()))
        .unwrap();
    assert_eq!(response.node_name(), Some("testhost"));
}

#[test]
fn unknown_name_falls_through_to_no_data() {
    let (mut context, _file) = hosts_context();
    let result = context.resolve_forward(&Options::new().node_name("missing"));
    assert!(matches!(result, Err(netresolve::Error::NoData)));
}
