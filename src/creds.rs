/// Peer credential handling and pid-to-unit inference.
///
/// Two independent paths deliver kernel-attested peer identity: a one-shot
/// `getsockopt(SO_PEERCRED)` right after accept, and per-message
/// `SCM_CREDENTIALS` ancillary data once `SO_PASSCRED` is enabled on the
/// socket. Both are used; see `connection.rs`.
use std::fs;
use std::os::unix::io::RawFd;

use nix::sys::socket::{self, sockopt};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cred {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

impl From<socket::UnixCredentials> for Cred {
    fn from(c: socket::UnixCredentials) -> Self {
        Cred {
            pid: c.pid(),
            uid: c.uid(),
            gid: c.gid(),
        }
    }
}

/// Enable `SO_PASSCRED` so subsequent `recvmsg` calls receive
/// `SCM_CREDENTIALS` ancillary data alongside the payload.
pub fn enable_passcred(fd: RawFd) -> nix::Result<()> {
    socket::setsockopt(unsafe { &std::os::fd::BorrowedFd::borrow_raw(fd) }, sockopt::PassCred, &true)
}

/// One-shot peer credential lookup, used immediately after accept.
pub fn getpeercred(fd: RawFd) -> nix::Result<Cred> {
    let creds = socket::getsockopt(
        unsafe { &std::os::fd::BorrowedFd::borrow_raw(fd) },
        sockopt::PeerCredentials,
    )?;
    Ok(Cred::from(creds))
}

fn slurp(path: &str) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Retrieve the short command name for a pid.
pub fn comm_for_pid(pid: i32) -> Option<String> {
    slurp(&format!("/proc/{}/comm", pid))
}

fn unit_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"1:name=systemd:/system\.slice/(?:jvm:)?(.+?)\.service").unwrap()
    })
}

/// Work out the systemd unit for a process by reading its cgroup
/// membership. Returns `None` when the process is gone, unreadable, or
/// not under a recognizable systemd unit slice.
pub fn unit_for_pid(pid: i32) -> Option<String> {
    let cgroup = slurp(&format!("/proc/{}/cgroup", pid))?;
    unit_from_cgroup(&cgroup)
}

fn unit_from_cgroup(cgroup: &str) -> Option<String> {
    unit_regex()
        .captures(cgroup)
        .map(|c| c[1].to_string())
}
