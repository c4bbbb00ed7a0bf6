use crate::common::{mount_root, TestServer};
use sessionfs::proto::{FaultCode, Request};

#[test]
fn handle_goes_stale_after_host_side_rename() {
    let server = TestServer::start();
    let channel = server.channel();
    let root = mount_root(&channel);

    server.write_file("f", b"payload");
    let handle = channel
        .call_handle(&Request::Lookup { dir: root, name: "f".to_owned() })
        .expect("lookup");

    // rename behind the server's back, as a direct host action
    std::fs::rename(server.path("f"), server.path("g")).expect("host rename");

    let fault = channel.call(&Request::GetAttr { file: handle }).expect_err("must fail");
    assert_eq!(fault.code, FaultCode::NotFound);
}

#[test]
fn tampered_inode_is_reported_stale() {
    let server = TestServer::start();
    let channel = server.channel();
    let root = mount_root(&channel);

    server.write_file("f", b"payload");
    let mut handle = channel
        .call_handle(&Request::Lookup { dir: root, name: "f".to_owned() })
        .expect("lookup");
    handle.inode = handle.inode.wrapping_add(1);

    let fault = channel.call(&Request::GetAttr { file: handle }).expect_err("must fail");
    assert_eq!(fault.code, FaultCode::Stale);
}

#[test]
fn mutations_on_stale_handles_are_refused() {
    let server = TestServer::start();
    let channel = server.channel();
    let root = mount_root(&channel);

    server.write_file("victim", b"data");
    let handle = channel
        .call_handle(&Request::Lookup { dir: root, name: "victim".to_owned() })
        .expect("lookup");

    std::fs::remove_file(server.path("victim")).expect("host remove");

    let write = Request::Write {
        file: handle.clone(),
        offset: 0,
        size: 4,
        data: b"data".to_vec(),
        should_commit: false,
    };
    assert!(channel.call(&write).is_err());
    assert!(channel.call(&Request::Commit { file: handle }).is_err());
    // the operation was refused before touching the filesystem
    assert!(!server.path("victim").exists());
}

#[test]
fn handles_stay_valid_across_restart() {
    let mut server = TestServer::start();
    let channel = server.channel();
    let root = mount_root(&channel);

    server.write_file("stable", b"1234");
    let handle = channel
        .call_handle(&Request::Lookup { dir: root, name: "stable".to_owned() })
        .expect("lookup");

    server.restart();

    // stateless identity: the same handle works against the new boot
    match channel.call(&Request::GetAttr { file: handle }).expect("getattr") {
        sessionfs::proto::Reply::Attr(attr) => assert_eq!(attr.size, 4),
        other => panic!("expected attr reply, got {other:?}"),
    }
}
