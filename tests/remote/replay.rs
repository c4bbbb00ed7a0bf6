//! Crash-replay scenarios: a server restart between a write burst and its
//! commit must be invisible to the caller.

use crate::common::TestServer;

#[test]
fn fsync_replays_lost_writes_after_restart() {
    let mut server = TestServer::start();
    let fs = server.remote_fs();

    let id = fs.create("records.bin").expect("create");
    let mut expected = Vec::new();
    for i in 0..100u64 {
        let record = [i as u8; 16];
        fs.write(id, i * 16, &record).expect("write");
        expected.extend_from_slice(&record);
    }
    let session_before = fs.open_state(id).expect("state").last_session().expect("session");

    server.restart();
    // simulate the old process having lost the uncommitted writes
    std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(server.path("records.bin"))
        .expect("truncate host file");

    fs.fsync(id).expect("fsync replays and succeeds");

    let state = fs.open_state(id).expect("state");
    assert_eq!(state.outstanding(), 0);
    assert_eq!(std::fs::read(server.path("records.bin")).expect("host read"), expected);

    // the client now observes the new boot's nonce
    fs.write(id, 1600, &[0xee; 16]).expect("write");
    let session_after = state.last_session().expect("session");
    assert_ne!(session_before, session_after);
    fs.release(id);
}

#[test]
fn restart_between_writes_marks_dirty_and_recovers() {
    let mut server = TestServer::start();
    let fs = server.remote_fs();

    let id = fs.create("split.bin").expect("create");
    for i in 0..3u64 {
        fs.write(id, i * 4, b"aaaa").expect("write before restart");
    }

    server.restart();
    std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(server.path("split.bin"))
        .expect("truncate host file");

    // these writes observe the new nonce, flagging the file dirty
    for i in 3..6u64 {
        fs.write(id, i * 4, b"bbbb").expect("write after restart");
    }

    fs.fsync(id).expect("fsync");
    fs.release(id);

    assert_eq!(
        std::fs::read(server.path("split.bin")).expect("host read"),
        b"aaaaaaaaaaaabbbbbbbbbbbb"
    );
}

#[test]
fn commit_without_outstanding_writes_survives_restart() {
    let mut server = TestServer::start();
    let fs = server.remote_fs();

    let id = fs.create("quiet.txt").expect("create");
    fs.write(id, 0, b"done").expect("write");
    fs.fsync(id).expect("first fsync");

    server.restart();

    // empty log: fsync is just a commit against the new boot
    fs.fsync(id).expect("fsync after restart");
    fs.release(id);
}
