//! The socket helper end to end: bind a listener through resolution,
//! connect to it, and pass data across.

use netresolve::{bind_socket, connect_socket, Family, Options, Protocol, SockType};
use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
};

fn stream_options() -> Options {
    Options::new()
        .family(Family::Ip4)
        .socktype(SockType::Stream)
        .protocol(Protocol::Tcp)
}

#[test]
fn bind_connect_send_recv() {
    // Bind an ephemeral listener via the resolver.
    let bound = bind_socket(None, Some("0"), &stream_options()).unwrap();
    let socket = socket2::Socket::from(bound);
    socket.listen(10).unwrap();
    let listener = TcpListener::from(socket);
    listener.set_nonblocking(false).unwrap();
    let port = listener.local_addr().unwrap().port();

    // Connect back through the resolver.
    let connected = connect_socket(
        Some("127.0.0.1"),
        Some(&port.to_string()),
        &stream_options(),
    )
    .unwrap();
    let mut client = TcpStream::from(connected);
    client.set_nonblocking(false).unwrap();

    let (mut accepted, _) = listener.accept().unwrap();

    client.write_all(b"asdf\n").unwrap();
    let mut buf = [0u8; 5];
    accepted.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"asdf\n");
}

#[test]
fn connect_to_nothing_fails() {
    // A port that nothing listens on; the connect helper must hand back
    // an error instead of a socket.
    let result = connect_socket(Some("127.0.0.1"), Some("1"), &stream_options());
    assert!(result.is_err());
}
