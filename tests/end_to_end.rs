//! Black-box end-to-end tests: spawn the compiled daemon against a real
//! Unix socket and a temporary log directory, then assert on the files
//! it produces. Mirrors the scenarios the original tool's own test suite
//! exercised.
use std::io::{IoSlice, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::{Child, Command};
use std::time::Duration;

use nix::sys::socket::{self, ControlMessage, MsgFlags};
use regex::Regex;
use tempfile::TempDir;

struct Daemon {
    child: Child,
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(socket: &Path, log_dir: &Path, trust_blindly: bool) -> Daemon {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_logductd"));
    cmd.env("LOGDUCTD_SOCKET", socket)
        .env("LOGDUCTD_LOG_DIR", log_dir)
        .env("LOGDUCTD_IDLE_SECS", "60");
    if trust_blindly {
        cmd.env("LOGDUCTD_TRUST_BLINDLY", "1");
    }
    let child = cmd.spawn().expect("failed to spawn logductd");

    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    Daemon { child }
}

fn read_via_symlink(path: &Path) -> Option<String> {
    for _ in 0..50 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if !contents.is_empty() {
                return Some(contents);
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    std::fs::read_to_string(path).ok()
}

#[test]
fn primary_stream_with_unknown_command() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("logduct.sock");
    let log_dir = tmp.path().join("logs");
    std::fs::create_dir_all(&log_dir).unwrap();
    let _daemon = spawn_daemon(&socket, &log_dir, true);

    let mut stream = UnixStream::connect(&socket).expect("connect to daemon");
    stream.write_all(b"{\"unit\":\"dummyunit\"}\n").unwrap();
    stream.write_all(b"hello\n").unwrap();
    stream.flush().unwrap();

    let contents = read_via_symlink(&log_dir.join("dummyunit").join("stdio.log"))
        .expect("stdio.log should contain data");

    let re = Regex::new(r"^\d{2}:\d{2}:\d{2}\.\d{3} (unknown|echo)\[\d+\]: hello\n$").unwrap();
    assert!(re.is_match(&contents), "unexpected contents: {:?}", contents);
}

#[test]
fn ancillary_stream_writes_independent_file() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("logduct.sock");
    let log_dir = tmp.path().join("logs");
    std::fs::create_dir_all(&log_dir).unwrap();
    let _daemon = spawn_daemon(&socket, &log_dir, true);

    let stream = UnixStream::connect(&socket).expect("connect to daemon");
    let (pipe_read, pipe_write) = nix::unistd::pipe().unwrap();

    let header = b"{\"unit\":\"dummyunit\",\"lognames\":[\"third\"]}\n";
    let iov = [IoSlice::new(header)];
    let fds = [pipe_read.as_raw_fd()];
    let cmsg = [ControlMessage::ScmRights(&fds)];
    socket::sendmsg::<()>(stream.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
        .expect("sendmsg with ancillary fd");
    drop(pipe_read);

    use std::io::Write as _;
    let mut writer = std::fs::File::from(pipe_write);
    writer.write_all(b"there\n").unwrap();
    drop(writer);

    let contents = read_via_symlink(&log_dir.join("dummyunit").join("third.log"))
        .expect("third.log should contain data");

    let re = Regex::new(r"^\d{2}:\d{2}:\d{2}\.\d{3}: there\n$").unwrap();
    assert!(re.is_match(&contents), "unexpected contents: {:?}", contents);
}

#[test]
fn partial_line_across_multiple_writes_gets_one_prefix() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("logduct.sock");
    let log_dir = tmp.path().join("logs");
    std::fs::create_dir_all(&log_dir).unwrap();
    let _daemon = spawn_daemon(&socket, &log_dir, true);

    let mut stream = UnixStream::connect(&socket).expect("connect to daemon");
    stream.write_all(b"{\"unit\":\"dummyunit\"}\n").unwrap();
    stream.write_all(b"foo").unwrap();
    stream.flush().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    stream.write_all(b"bar\n").unwrap();
    stream.flush().unwrap();

    let contents = read_via_symlink(&log_dir.join("dummyunit").join("stdio.log"))
        .expect("stdio.log should contain data");

    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 1, "expected a single logical line: {:?}", contents);
    assert!(lines[0].ends_with("foobar"));
}

#[test]
fn connection_with_no_inferable_unit_produces_no_files() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("logduct.sock");
    let log_dir = tmp.path().join("logs");
    std::fs::create_dir_all(&log_dir).unwrap();
    let _daemon = spawn_daemon(&socket, &log_dir, false);

    let mut stream = UnixStream::connect(&socket).expect("connect to daemon");
    stream.write_all(b"{}\n").unwrap();
    stream.write_all(b"hello\n").unwrap();
    stream.flush().unwrap();
    std::thread::sleep(Duration::from_millis(200));

    let mut entries = std::fs::read_dir(&log_dir).unwrap();
    assert!(entries.next().is_none(), "expected no log directories to be created");
}

#[test]
fn idle_sweep_then_write_appends() {
    let tmp = TempDir::new().unwrap();
    let socket = tmp.path().join("logduct.sock");
    let log_dir = tmp.path().join("logs");
    std::fs::create_dir_all(&log_dir).unwrap();

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_logductd"));
    cmd.env("LOGDUCTD_SOCKET", &socket)
        .env("LOGDUCTD_LOG_DIR", &log_dir)
        .env("LOGDUCTD_IDLE_SECS", "0.1")
        .env("LOGDUCTD_TRUST_BLINDLY", "1");
    let child = cmd.spawn().expect("failed to spawn logductd");
    let _daemon = Daemon { child };
    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    {
        let mut stream = UnixStream::connect(&socket).unwrap();
        stream.write_all(b"{\"unit\":\"dummyunit\"}\n").unwrap();
        stream.write_all(b"first\n").unwrap();
        stream.flush().unwrap();
    }

    std::thread::sleep(Duration::from_millis(400));

    {
        let mut stream = UnixStream::connect(&socket).unwrap();
        stream.write_all(b"{\"unit\":\"dummyunit\"}\n").unwrap();
        stream.write_all(b"second\n").unwrap();
        stream.flush().unwrap();
    }

    let contents = read_via_symlink(&log_dir.join("dummyunit").join("stdio.log"))
        .expect("stdio.log should contain data");
    assert_eq!(contents.lines().count(), 2);
}
