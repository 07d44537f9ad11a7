/// Listens on the daemon's local socket and accepts new connections.
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{self, AddressFamily, Backlog, SockFlag, SockType, UnixAddr};
use nix::sys::stat::{fstat, SFlag};

use crate::error::{io_err, DaemonError, DaemonResult};

pub struct Acceptor {
    fd: OwnedFd,
}

impl Acceptor {
    /// Binds and listens on `path`, replacing any stale socket file left
    /// behind by a previous (crashed) run.
    pub fn bind(path: &str) -> DaemonResult<Self> {
        if std::path::Path::new(path).exists() {
            let _ = std::fs::remove_file(path);
        }

        let bind_err = |e: nix::Error| DaemonError::Bind {
            path: path.to_string(),
            source: io_err(e),
        };

        // No SOCK_CLOEXEC: the listener must survive `execv` across a
        // reload handoff (reload.rs), since the successor adopts it by
        // fd number rather than re-binding.
        let fd = socket::socket(AddressFamily::Unix, SockType::Stream, SockFlag::empty(), None)
            .map_err(bind_err)?;

        let addr = UnixAddr::new(path).map_err(bind_err)?;

        socket::bind(fd.as_raw_fd(), &addr).map_err(bind_err)?;

        socket::listen(&fd, Backlog::new(5).expect("5 is a valid backlog")).map_err(bind_err)?;

        Ok(Acceptor { fd })
    }

    /// Adopts an already-listening socket inherited by fd number, either
    /// from a supervisor (stdin) or from a predecessor across reload.
    pub fn from_raw_fd(fd: RawFd) -> Self {
        Acceptor {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }

    /// True if standard input is already bound to a listening socket,
    /// meaning a supervisor handed it the listener directly.
    pub fn stdin_is_socket() -> bool {
        fstat(0)
            .map(|st| SFlag::from_bits_truncate(st.st_mode & SFlag::S_IFMT.bits()) == SFlag::S_IFSOCK)
            .unwrap_or(false)
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn accept(&self) -> nix::Result<OwnedFd> {
        let fd = socket::accept(self.fd.as_raw_fd())?;
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}
