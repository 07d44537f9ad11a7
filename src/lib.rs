//! logductd: a host-local logging daemon.
//!
//! Listens on a Unix-domain socket, attributes each client's messages to a
//! unit by kernel-provided peer credentials (or, when configured to trust
//! clients blindly, by a client-declared header field), and writes
//! prefixed, date-rotated log files. Supports fd-passing for ancillary
//! output streams and hot reload via SIGHUP.
pub mod acceptor;
pub mod config;
pub mod connection;
pub mod creds;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod pipe_ingester;
pub mod reload;
pub mod signals;
pub mod snapshot;
pub mod writer;

use std::io::Read as _;
use std::os::fd::{FromRawFd, OwnedFd};

use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use acceptor::Acceptor;
use config::Config;
use connection::ConnectionHandler;
use dispatcher::{Dispatcher, EventLoop, StepResult};
use manager::LogManager;
use pipe_ingester::PipeIngester;
use signals::SelfPipe;
use snapshot::{DaemonSnapshot, DispatcherSnapshot};

fn nix_io_err(e: nix::Error) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

pub fn init_tracing() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

pub fn fresh_start(cfg: &Config) -> std::io::Result<EventLoop> {
    let manager = LogManager::new(cfg.log_dir.clone(), cfg.idle_secs, cfg.trust_blindly);
    let signals = SelfPipe::install().map_err(nix_io_err)?;
    let mut event_loop = EventLoop::new(manager, cfg.trust_blindly, signals);

    let acceptor = if Acceptor::stdin_is_socket() {
        info!("adopting inherited listening socket from stdin");
        Acceptor::from_raw_fd(0)
    } else {
        Acceptor::bind(&cfg.socket).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
    };
    event_loop.push(Dispatcher::Acceptor(acceptor));

    Ok(event_loop)
}

pub fn restore_start() -> std::io::Result<EventLoop> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let snapshot: DaemonSnapshot = serde_json::from_str(&input)?;

    let manager = LogManager::from_snapshot(snapshot.log_manager);
    let trust_blindly = manager.trust_blindly;
    let signals = SelfPipe::install().map_err(nix_io_err)?;
    let mut event_loop = EventLoop::new(manager, trust_blindly, signals);

    for d in snapshot.dispatchers {
        match d {
            DispatcherSnapshot::Acceptor { fd } => {
                event_loop.push(Dispatcher::Acceptor(Acceptor::from_raw_fd(fd)));
            }
            DispatcherSnapshot::Connection { fd, unit, header_buffer } => {
                let owned = unsafe { OwnedFd::from_raw_fd(fd) };
                match ConnectionHandler::restore(owned, unit, header_buffer) {
                    Ok(conn) => event_loop.push(Dispatcher::Connection(conn)),
                    Err(e) => warn!("failed to restore connection fd {}: {}", fd, e),
                }
            }
            DispatcherSnapshot::Pipe { fd, unit, logname } => {
                let owned = unsafe { OwnedFd::from_raw_fd(fd) };
                event_loop.push(Dispatcher::Pipe(PipeIngester::new(owned, unit, logname)));
            }
        }
    }

    if let Some(pid) = snapshot.parent_to_kill {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), nix::sys::signal::Signal::SIGINT);
    }

    Ok(event_loop)
}

pub fn run(mut event_loop: EventLoop) {
    loop {
        match event_loop.step() {
            StepResult::Continue => {}
            StepResult::Shutdown => {
                info!("received shutdown signal, exiting");
                return;
            }
            StepResult::Reload => {
                info!("reloading logductd, pid {}", std::process::id());
                match reload::reload(&mut event_loop) {
                    Ok(reload::ReloadOutcome::Failed { exit_code }) => {
                        warn!("reload failed, successor exited with code {}", exit_code);
                    }
                    Err(e) => error!("reload attempt failed: {}", e),
                }
            }
        }
    }
}
