/// Hot reload: serialize daemon state, fork+exec a successor that
/// inherits every open descriptor, hand it the snapshot over stdin, and
/// wait for it to signal SIGINT once it has taken over.
///
/// Grounded on the fork/exec + stdin-pipe handoff pattern used for
/// crash-handler receiver processes, and on the `wait_for_pollhup`/
/// `reap_child_non_blocking` primitives for watching the child.
use std::ffi::CString;
use std::io::Write;
use std::os::fd::AsRawFd;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

use crate::dispatcher::EventLoop;
use crate::error::{io_err, DaemonError, DaemonResult};
use crate::signals::SelfPipe;
use crate::snapshot::DaemonSnapshot;

/// Build the reload snapshot, close all log file handles so they are not
/// inherited, fork a successor that re-execs this binary with
/// `--restore`, and block until either the child signals readiness (by
/// sending us SIGINT, observed by the caller's own loop) or exits.
///
/// Returns once the reload attempt is over: either this process should
/// exit (successor took over) or it should resume its own loop
/// (successor failed to start).
pub fn reload(event_loop: &mut EventLoop) -> DaemonResult<ReloadOutcome> {
    let dispatcher_snapshots = event_loop.dispatchers.iter().map(|d| d.snapshot()).collect();

    event_loop.manager.close_all();

    let snapshot = DaemonSnapshot {
        log_manager: event_loop.manager.snapshot(),
        dispatchers: dispatcher_snapshots,
        parent_to_kill: Some(std::process::id() as i32),
    };

    let payload = serde_json::to_vec(&snapshot).expect("snapshot is always serializable");

    let exe = std::env::current_exe().map_err(DaemonError::Reload)?;
    let exe_c = CString::new(exe.to_string_lossy().as_bytes()).expect("no interior NUL");
    let restore_flag = CString::new("--restore").unwrap();

    let (read_end, write_end) = unistd::pipe().map_err(|e| DaemonError::Reload(io_err(e)))?;

    // Install the exit-on-SIGINT handler before forking. The successor
    // can signal us the moment it finishes reading its snapshot off
    // stdin, which may be before `fork` even returns here; if the
    // steady-state self-pipe handler is still armed at that point, the
    // signal is queued instead of exiting us, leaving two daemons alive.
    SelfPipe::reset_sigint_to_exit().map_err(|e| DaemonError::Reload(io_err(e)))?;

    let fork_result = match unsafe { unistd::fork() } {
        Ok(r) => r,
        Err(e) => {
            let _ = SelfPipe::restore_sigint_to_pipe();
            return Err(DaemonError::Reload(io_err(e)));
        }
    };

    match fork_result {
        ForkResult::Child => {
            unistd::close(write_end.as_raw_fd()).ok();
            unistd::dup2(read_end.as_raw_fd(), 0).expect("dup2 stdin");
            drop(read_end);
            let _ = unistd::execv(&exe_c, &[exe_c.clone(), restore_flag]);
            std::process::exit(127);
        }
        ForkResult::Parent { child } => {
            drop(read_end);
            let mut pipe_file = std::fs::File::from(write_end);
            let _ = pipe_file.write_all(&payload);
            drop(pipe_file);

            let outcome = wait_for_handoff(child);
            SelfPipe::restore_sigint_to_pipe().map_err(|e| DaemonError::Reload(io_err(e)))?;
            Ok(outcome)
        }
    }
}

pub enum ReloadOutcome {
    /// The successor exited before taking over; the predecessor should
    /// resume its own event loop.
    Failed { exit_code: i32 },
}

fn wait_for_handoff(child: Pid) -> ReloadOutcome {
    // If the child is ready it sends us SIGINT directly (handled by
    // `reset_sigint_to_exit`, which terminates the process immediately).
    // We only get here if the child exited without ever doing so.
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return ReloadOutcome::Failed { exit_code: code },
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return ReloadOutcome::Failed {
                    exit_code: 128 + sig as i32,
                }
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return ReloadOutcome::Failed { exit_code: -1 },
        }
    }
}
