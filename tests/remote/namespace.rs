use crate::common::TestServer;

#[test]
fn mkdir_then_rmdir_appears_on_host() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    fs.mkdir("innerdir").expect("mkdir");
    assert!(server.path("innerdir").is_dir());

    fs.rmdir("innerdir").expect("rmdir");
    assert!(!server.path("innerdir").exists());
}

#[test]
fn readdir_lists_created_entries() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    fs.mkdir("d").expect("mkdir");
    for name in ["a", "b", "c"] {
        let id = fs.create(&format!("d/{name}")).expect("create");
        fs.release(id);
    }

    let mut names: Vec<String> =
        fs.read_dir("d").expect("readdir").into_iter().map(|e| e.name).collect();
    names.sort();
    assert_eq!(names, ["a", "b", "c"]);
}

#[test]
fn readdir_reports_entry_kinds() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    fs.mkdir("sub").expect("mkdir");
    server.write_file("plain", b"x");

    for entry in fs.read_dir("").expect("readdir") {
        let is_dir = entry.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32;
        match entry.name.as_str() {
            "sub" => assert!(is_dir),
            "plain" => assert!(!is_dir),
            other => panic!("unexpected entry {other}"),
        }
    }
}

#[test]
fn created_entries_survive_server_restart() {
    let mut server = TestServer::start();
    let fs = server.remote_fs();

    let id = fs.create("durable.txt").expect("create");
    fs.release(id);
    fs.mkdir("durable-dir").expect("mkdir");

    server.restart();

    let fresh = server.remote_fs();
    assert_eq!(fresh.get_attr("durable.txt").expect("getattr").size, 0);
    let dir_attr = fresh.get_attr("durable-dir").expect("getattr dir");
    assert_eq!(dir_attr.mode & libc::S_IFMT as u32, libc::S_IFDIR as u32);
}

#[test]
fn rename_moves_entries_between_directories() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    fs.mkdir("src").expect("mkdir src");
    fs.mkdir("dst").expect("mkdir dst");
    let id = fs.create("src/f").expect("create");
    fs.write(id, 0, b"content").expect("write");
    fs.fsync(id).expect("fsync");
    fs.release(id);

    fs.rename("src/f", "dst/g").expect("rename");

    assert!(!server.path("src/f").exists());
    assert_eq!(std::fs::read(server.path("dst/g")).expect("read host"), b"content");
    assert_eq!(fs.get_attr("dst/g").expect("getattr").size, 7);
}

#[test]
fn unlink_missing_entry_is_not_found() {
    let server = TestServer::start();
    let fs = server.remote_fs();

    let fault = fs.unlink("absent").expect_err("unlink must fail");
    assert_eq!(fault.code, sessionfs::proto::FaultCode::NotFound);
}
