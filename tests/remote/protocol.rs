//! Socket-level checks of the framed protocol against a live server.

use std::io::Cursor;
use std::net::TcpStream;

use crate::common::TestServer;
use sessionfs::proto::{frame, parser, serializer, FaultCode, Opcode, Reply, Request};

#[test]
fn malformed_request_gets_a_bad_fault() {
    let server = TestServer::start();
    let mut stream = TcpStream::connect(server.addr()).expect("dial");

    // xid 9, opcode 99: no such operation
    let body = [0, 0, 0, 9, 0, 0, 0, 99];
    frame::write_blocking(&mut stream, &body).expect("send");

    let reply = frame::read_blocking(&mut stream).expect("receive");
    let (xid, outcome) = parser::reply(&mut Cursor::new(reply), Opcode::Null).expect("decode");
    assert_eq!(xid, 9);
    assert_eq!(outcome.expect_err("must be a fault").code, FaultCode::Bad);
}

#[test]
fn null_roundtrips_over_the_wire() {
    let server = TestServer::start();
    let mut stream = TcpStream::connect(server.addr()).expect("dial");

    let mut body = Vec::new();
    serializer::request(&mut body, 5, &Request::Null).expect("encode");
    frame::write_blocking(&mut stream, &body).expect("send");

    let reply = frame::read_blocking(&mut stream).expect("receive");
    let (xid, outcome) = parser::reply(&mut Cursor::new(reply), Opcode::Null).expect("decode");
    assert_eq!(xid, 5);
    assert_eq!(outcome.expect("null reply"), Reply::Null);
}

#[test]
fn one_connection_carries_many_requests() {
    let server = TestServer::start();
    server.write_file("seen", b"abc");
    let channel = server.channel();
    let root = crate::common::mount_root(&channel);

    for _ in 0..32 {
        let handle = channel
            .call_handle(&Request::Lookup { dir: root.clone(), name: "seen".to_owned() })
            .expect("lookup");
        match channel.call(&Request::GetAttr { file: handle }).expect("getattr") {
            Reply::Attr(attr) => assert_eq!(attr.size, 3),
            other => panic!("expected attr reply, got {other:?}"),
        }
    }
}
