#![cfg(unix)]

use gatherd::daemon::{default_pid_path, remove_pid_file, write_pid_file};

#[test]
fn test_default_pid_path_names_the_program() {
    let path = default_pid_path("gatherd-agent");
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("gatherd-agent-"));
    assert!(name.ends_with(".pid"));
}

#[test]
fn test_pid_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.pid");
    write_pid_file(&path).unwrap();
    let written: u32 = std::fs::read_to_string(&path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(written, std::process::id());
    remove_pid_file(&path);
    assert!(!path.exists());
}

#[test]
fn test_live_pid_file_refuses_startup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.pid");
    // Our own PID is by definition alive.
    std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();
    assert!(write_pid_file(&path).is_err());
}

#[test]
fn test_stale_pid_file_is_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.pid");
    std::fs::write(&path, "garbage\n").unwrap();
    write_pid_file(&path).unwrap();
    let written: u32 = std::fs::read_to_string(&path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(written, std::process::id());
}
