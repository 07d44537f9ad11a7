/// The closed set of things the event loop polls, and the loop itself.
///
/// Replaces the source's ambient "anything with a `save()` method"
/// dynamic-dispatch registry with a typed enum so every variant's
/// snapshot fields are known at compile time.
use std::os::fd::{BorrowedFd, RawFd};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::acceptor::Acceptor;
use crate::connection::ConnectionHandler;
use crate::manager::LogManager;
use crate::pipe_ingester::PipeIngester;
use crate::signals::{SelfPipe, SignalEvent};
use crate::snapshot::DispatcherSnapshot;

pub enum Dispatcher {
    Acceptor(Acceptor),
    Connection(ConnectionHandler),
    Pipe(PipeIngester),
}

impl Dispatcher {
    fn raw_fd(&self) -> RawFd {
        match self {
            Dispatcher::Acceptor(a) => a.raw_fd(),
            Dispatcher::Connection(c) => c.raw_fd(),
            Dispatcher::Pipe(p) => p.raw_fd(),
        }
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        match self {
            Dispatcher::Acceptor(a) => DispatcherSnapshot::Acceptor { fd: a.raw_fd() },
            Dispatcher::Connection(c) => DispatcherSnapshot::Connection {
                fd: c.raw_fd(),
                unit: c.unit().map(str::to_string),
                header_buffer: c.header_buffer_contents(),
            },
            Dispatcher::Pipe(p) => DispatcherSnapshot::Pipe {
                fd: p.raw_fd(),
                unit: p.unit().map(str::to_string),
                logname: p.logname().to_string(),
            },
        }
    }
}

/// Outcome of running one iteration over all dispatchers.
pub enum StepResult {
    Continue,
    Reload,
    Shutdown,
}

pub struct EventLoop {
    pub manager: LogManager,
    pub dispatchers: Vec<Dispatcher>,
    pub trust_blindly: bool,
    signals: SelfPipe,
}

impl EventLoop {
    pub fn new(manager: LogManager, trust_blindly: bool, signals: SelfPipe) -> Self {
        EventLoop {
            manager,
            dispatchers: Vec::new(),
            trust_blindly,
            signals,
        }
    }

    pub fn push(&mut self, d: Dispatcher) {
        self.dispatchers.push(d);
    }

    /// Poll every dispatcher plus the signal self-pipe, dispatch readable
    /// ones, then sweep idle writers. Runs with a timeout equal to
    /// `max_idle` so the sweep always executes within bounded time.
    pub fn step(&mut self) -> StepResult {
        let timeout = self.manager.max_idle();
        let mut poll_fds: Vec<PollFd> = Vec::with_capacity(self.dispatchers.len() + 1);
        poll_fds.push(PollFd::new(
            unsafe { BorrowedFd::borrow_raw(self.signals.raw_fd()) },
            PollFlags::POLLIN,
        ));
        for d in &self.dispatchers {
            poll_fds.push(PollFd::new(
                unsafe { BorrowedFd::borrow_raw(d.raw_fd()) },
                PollFlags::POLLIN,
            ));
        }

        let timeout_ms = PollTimeout::try_from(timeout.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(PollTimeout::MAX);
        if poll(&mut poll_fds, timeout_ms).is_err() {
            return StepResult::Continue;
        }

        if poll_fds[0]
            .revents()
            .unwrap_or(PollFlags::empty())
            .contains(PollFlags::POLLIN)
        {
            for event in self.signals.drain() {
                match event {
                    SignalEvent::Reload => return StepResult::Reload,
                    SignalEvent::Shutdown => return StepResult::Shutdown,
                }
            }
        }

        let mut closed = Vec::new();
        let mut spawned = Vec::new();

        for (i, d) in self.dispatchers.iter_mut().enumerate() {
            let revents = poll_fds[i + 1].revents().unwrap_or(PollFlags::empty());
            if !revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP) {
                continue;
            }

            match d {
                Dispatcher::Acceptor(a) => {
                    if let Ok(fd) = a.accept() {
                        if let Ok(conn) = ConnectionHandler::accept(fd) {
                            spawned.push(Dispatcher::Connection(conn));
                        }
                    }
                }
                Dispatcher::Connection(c) => match c.handle_readable(&mut self.manager, self.trust_blindly) {
                    Ok(outcome) => {
                        if outcome.closed {
                            closed.push(i);
                        }
                        spawned.extend(outcome.spawned.into_iter().map(Dispatcher::Pipe));
                    }
                    Err(_) => closed.push(i),
                },
                Dispatcher::Pipe(p) => match p.handle_readable(&mut self.manager) {
                    Ok(true) => {}
                    _ => closed.push(i),
                },
            }
        }

        closed.sort_unstable();
        for &i in closed.iter().rev() {
            self.dispatchers.remove(i);
        }
        self.dispatchers.extend(spawned);

        self.manager.sweep_idle();
        StepResult::Continue
    }
}
