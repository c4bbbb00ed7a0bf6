use crate::common::{mount_root, TestServer};
use sessionfs::proto::Request;

#[test]
fn create_write_commit_read_roundtrip() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    let id = fs.create("a.txt").expect("create");
    assert_eq!(fs.write(id, 0, b"hello").expect("write"), 5);
    fs.fsync(id).expect("commit");

    assert_eq!(fs.read(id, 0, 5).expect("read"), b"hello");
    assert_eq!(std::fs::read(server.path("a.txt")).expect("host read"), b"hello");
    fs.release(id);
}

#[test]
fn commit_is_idempotent() {
    let server = TestServer::start();
    let channel = server.channel();
    let root = mount_root(&channel);

    let file = channel
        .call_handle(&Request::Create { dir: root, name: "f.txt".to_owned() })
        .expect("create");

    let first = channel.call_status(&Request::Commit { file: file.clone() }).expect("commit");
    let second = channel.call_status(&Request::Commit { file }).expect("second commit");
    assert_eq!(first, second);
}

#[test]
fn read_at_eof_is_short_not_an_error() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    let id = fs.create("short.bin").expect("create");
    fs.write(id, 0, b"abc").expect("write");
    fs.fsync(id).expect("fsync");

    assert_eq!(fs.read(id, 0, 64).expect("read"), b"abc");
    assert!(fs.read(id, 40, 8).expect("read past eof").is_empty());
    fs.release(id);
}

#[test]
fn overlapping_writes_apply_in_log_order() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    let id = fs.create("overlap.bin").expect("create");
    fs.write(id, 0, b"aaaaaaaa").expect("first");
    fs.write(id, 4, b"bbbb").expect("second");
    fs.write(id, 0, b"cc").expect("third");
    fs.fsync(id).expect("fsync");
    fs.release(id);

    assert_eq!(std::fs::read(server.path("overlap.bin")).expect("host read"), b"ccaabbbb");
}

#[test]
fn write_at_offset_leaves_a_hole() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    let id = fs.create("sparse.bin").expect("create");
    fs.write(id, 4, b"tail").expect("write");
    fs.fsync(id).expect("fsync");
    fs.release(id);

    assert_eq!(
        std::fs::read(server.path("sparse.bin")).expect("host read"),
        b"\0\0\0\0tail"
    );
}

#[test]
fn release_flushes_outstanding_writes() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    let id = fs.create("implicit.txt").expect("create");
    fs.write(id, 0, b"kept").expect("write");
    // no explicit fsync: release is expected to commit best-effort
    fs.release(id);

    assert_eq!(std::fs::read(server.path("implicit.txt")).expect("host read"), b"kept");
}

#[test]
fn two_handles_share_one_write_log() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    let first = fs.create("shared.txt").expect("create");
    let second = fs.open("shared.txt").expect("open");

    fs.write(first, 0, b"one").expect("write via first");
    fs.write(second, 3, b"two").expect("write via second");

    // both handles observe the same outstanding log
    let state = fs.open_state(first).expect("state");
    assert_eq!(state.outstanding(), 2);

    fs.fsync(second).expect("fsync");
    assert_eq!(state.outstanding(), 0);

    fs.release(first);
    fs.release(second);
    assert_eq!(std::fs::read(server.path("shared.txt")).expect("host read"), b"onetwo");
}
