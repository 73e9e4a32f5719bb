//! The `dns` backend against a stub nameserver on loopback.

use netresolve::{Context, NodeAddress, Options, Protocol, SockType};
use std::{
    net::UdpSocket,
    time::Duration,
};

const TYPE_A: u16 = 1;
const TYPE_PTR: u16 = 12;
const TYPE_TXT: u16 = 16;
const TYPE_AAAA: u16 = 28;
const TYPE_SRV: u16 = 33;

fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

fn question_qtype(query: &[u8]) -> (usize, u16) {
    let mut pos = 12;
    while query[pos] != 0 {
        pos += query[pos] as usize + 1;
    }
    pos += 1;
    let qtype = u16::from_be_bytes([query[pos], query[pos + 1]]);
    (pos + 4, qtype)
}

fn build_response(query: &[u8], records: &[Vec<u8>]) -> Vec<u8> {
    let (question_end, _) = question_qtype(query);
    let mut msg = query[..question_end].to_vec();
    msg[2] = 0x84; // QR | AA
    msg[3] = 0x00;
    msg[6] = (records.len() >> 8) as u8;
    msg[7] = records.len() as u8;
    for record in records {
        msg.extend_from_slice(record);
    }
    msg
}

fn record(rtype: u16, ttl: u32, rdata: &[u8]) -> Vec<u8> {
    let mut out = vec![0xc0, 0x0c]; // owner: pointer to the question name
    out.extend_from_slice(&rtype.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // IN
    out.extend_from_slice(&ttl.to_be_bytes());
    out.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
    out.extend_from_slice(rdata);
    out
}

/// Answers queries until the socket stays quiet for a second.
fn spawn_stub_server() -> (std::thread::JoinHandle<()>, u16) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    let port = socket.local_addr().unwrap().port();

    let handle = std::thread::spawn(move || {
        let mut buf = [0u8; 1024];
        while let Ok((size, peer)) = socket.recv_from(&mut buf) {
            let query = &buf[..size];
            let (_, qtype) = question_qtype(query);

            let records = match qtype {
                TYPE_A => vec![record(TYPE_A, 300, &[192, 0, 2, 55])],
                TYPE_AAAA => Vec::new(),
                TYPE_PTR => vec![record(TYPE_PTR, 120, &encode_name("host.example"))],
                TYPE_SRV => {
                    let mut rdata = Vec::new();
                    rdata.extend_from_slice(&5u16.to_be_bytes());
                    rdata.extend_from_slice(&7u16.to_be_bytes());
                    rdata.extend_from_slice(&8080u16.to_be_bytes());
                    rdata.extend_from_slice(&encode_name("svc.example"));
                    vec![record(TYPE_SRV, 60, &rdata)]
                }
                TYPE_TXT => vec![record(TYPE_TXT, 30, b"\x05hello")],
                _ => Vec::new(),
            };

            let response = build_response(query, &records);
            let _ = socket.send_to(&response, peer);
        }
    });
    (handle, port)
}

fn stub_context(port: u16) -> Context {
    let mut context = Context::new();
    context
        .set_backend_string(&format!("dns:127.0.0.1:{port}"))
        .unwrap();
    context
}

#[test]
fn forward_lookup() {
    let (_server, port) = spawn_stub_server();
    let mut context = stub_context(port);

    let response = context
        .resolve_forward(
            &Options::new()
                .node_name("test.example")
                .service_name("80")
                .protocol(Protocol::Tcp)
                .request_timeout(Duration::from_secs(5)),
        )
        .unwrap();

    assert_eq!(response.paths().len(), 1);
    let path = &response.paths()[0];
    assert_eq!(
        *path.address(),
        NodeAddress::Ip4("192.0.2.55".parse().unwrap())
    );
    assert_eq!(path.socktype(), SockType::Stream);
    assert_eq!(path.protocol(), Protocol::Tcp);
    assert_eq!(path.port(), 80);
    assert_eq!(path.ttl(), Some(300));
}

#[test]
fn reverse_lookup() {
    let (_server, port) = spawn_stub_server();
    let mut context = stub_context(port);

    let response = context
        .resolve_reverse(
            &Options::new()
                .address("192.0.2.55".parse().unwrap())
                .request_timeout(Duration::from_secs(5)),
        )
        .unwrap();

    assert_eq!(response.node_name(), Some("host.example"));
}

#[test]
fn srv_indirection() {
    let (_server, port) = spawn_stub_server();
    let mut context = stub_context(port);

    let response = context
        .resolve_forward(
            &Options::new()
                .node_name("test.example")
                .service_name("http")
                .protocol(Protocol::Tcp)
                .dns_srv_lookup(true)
                .request_timeout(Duration::from_secs(5)),
        )
        .unwrap();

    assert_eq!(response.paths().len(), 1);
    let path = &response.paths()[0];
    assert_eq!(
        *path.address(),
        NodeAddress::Ip4("192.0.2.55".parse().unwrap())
    );
    assert_eq!(path.port(), 8080);
    assert_eq!(path.priority(), 5);
    assert_eq!(path.weight(), 7);
}

#[test]
fn raw_query_returns_the_answer_packet() {
    let (_server, port) = spawn_stub_server();
    let mut context = stub_context(port);

    let response = context
        .resolve_dns(
            &Options::new()
                .dns_name("test.example")
                .dns_type(TYPE_TXT)
                .request_timeout(Duration::from_secs(5)),
        )
        .unwrap();

    let answer = response.dns_answer().expect("answer bytes present");
    assert!(answer.len() > 12);
    assert_eq!(answer[2] & 0x80, 0x80); // a response packet
}

#[test]
fn ttl_clamp_applies_to_dns_records() {
    let (_server, port) = spawn_stub_server();
    let mut context = stub_context(port);

    let response = context
        .resolve_forward(
            &Options::new()
                .node_name("test.example")
                .service_name("80")
                .protocol(Protocol::Tcp)
                .clamp_ttl(60)
                .request_timeout(Duration::from_secs(5)),
        )
        .unwrap();

    assert_eq!(response.paths()[0].ttl(), Some(60));
}
