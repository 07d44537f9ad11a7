/// Self-pipe signal handling.
///
/// SIGHUP and SIGINT handlers only write a single byte to a pipe; the
/// event loop polls the read end and dispatches from ordinary code,
/// keeping the actual signal handlers async-signal-safe.
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd;

static WRITE_FD: AtomicI32 = AtomicI32::new(-1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Reload,
    Shutdown,
}

pub struct SelfPipe {
    read_fd: OwnedFd,
}

impl SelfPipe {
    /// Installs SIGHUP and SIGINT handlers that write a tag byte to an
    /// internal pipe. Must be called at most once per process.
    pub fn install() -> nix::Result<Self> {
        let (read_fd, write_fd) = unistd::pipe()?;
        WRITE_FD.store(write_fd.as_raw_fd(), Ordering::SeqCst);
        std::mem::forget(write_fd);

        unsafe {
            signal::signal(Signal::SIGHUP, SigHandler::Handler(handle_sighup))?;
            signal::signal(Signal::SIGINT, SigHandler::Handler(handle_sigint))?;
        }

        Ok(SelfPipe { read_fd })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.read_fd.as_raw_fd()
    }

    /// Drains pending signal tags and returns the set observed since the
    /// last call.
    pub fn drain(&self) -> Vec<SignalEvent> {
        let mut buf = [0u8; 64];
        let mut events = Vec::new();
        while let Ok(n) = unistd::read(self.read_fd.as_raw_fd(), &mut buf) {
            if n == 0 {
                break;
            }
            for &b in &buf[..n] {
                match b {
                    b'H' => events.push(SignalEvent::Reload),
                    b'I' => events.push(SignalEvent::Shutdown),
                    _ => {}
                }
            }
            if n < buf.len() {
                break;
            }
        }
        events
    }

    /// Restore the default SIGINT disposition; used by the reload
    /// coordinator while it waits on its successor so an incoming SIGINT
    /// from that successor exits the process directly rather than being
    /// queued through the self-pipe.
    pub fn reset_sigint_to_exit() -> nix::Result<()> {
        unsafe { signal::signal(Signal::SIGINT, SigHandler::Handler(handle_sigint_exit_now)) }?;
        Ok(())
    }

    pub fn restore_sigint_to_pipe() -> nix::Result<()> {
        unsafe { signal::signal(Signal::SIGINT, SigHandler::Handler(handle_sigint)) }?;
        Ok(())
    }
}

extern "C" fn handle_sighup(_: i32) {
    let fd = WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let _ = unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, b"H");
    }
}

extern "C" fn handle_sigint(_: i32) {
    let fd = WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let _ = unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, b"I");
    }
}

extern "C" fn handle_sigint_exit_now(_: i32) {
    std::process::exit(0);
}
