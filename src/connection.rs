/// Per-connection session: parses one header frame, then streams payload
/// bytes as the connection's primary (`"stdio"`) stream, spawning a
/// `PipeIngester` for every ancillary descriptor it receives.
use std::io::IoSliceMut;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::cmsg_space;
use nix::sys::socket::{self, ControlMessageOwned, MsgFlags};
use serde::Deserialize;

use crate::creds::{self, Cred};
use crate::manager::LogManager;
use crate::pipe_ingester::PipeIngester;
use crate::writer::Metadata;

#[derive(Debug, Deserialize, Default)]
struct HeaderFrame {
    unit: Option<String>,
    #[serde(default)]
    lognames: Vec<String>,
}

pub struct ConnectionHandler {
    fd: OwnedFd,
    unit: Option<String>,
    header_buffer: Option<Vec<u8>>,
    lognames: Vec<String>,
    next_logname: usize,
}

#[derive(Default)]
pub struct ReadOutcome {
    pub closed: bool,
    pub spawned: Vec<PipeIngester>,
}

impl ConnectionHandler {
    /// Takes ownership of a freshly-accepted socket. Enables `SO_PASSCRED`
    /// and performs the one-shot `getpeercred` lookup used for initial
    /// unit inference.
    pub fn accept(fd: OwnedFd) -> nix::Result<Self> {
        creds::enable_passcred(fd.as_raw_fd())?;
        let cred = creds::getpeercred(fd.as_raw_fd())?;
        let unit = creds::unit_for_pid(cred.pid);
        Ok(ConnectionHandler {
            fd,
            unit,
            header_buffer: Some(Vec::new()),
            lognames: Vec::new(),
            next_logname: 0,
        })
    }

    pub fn restore(fd: OwnedFd, unit: Option<String>, header_buffer: Option<String>) -> nix::Result<Self> {
        creds::enable_passcred(fd.as_raw_fd())?;
        Ok(ConnectionHandler {
            fd,
            unit,
            header_buffer: header_buffer.map(|s| s.into_bytes()),
            lognames: Vec::new(),
            next_logname: 0,
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn header_buffer_contents(&self) -> Option<String> {
        self.header_buffer
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    fn next_pipe_name(&mut self) -> String {
        let name = self
            .lognames
            .get(self.next_logname)
            .cloned()
            .unwrap_or_else(|| "stdio".to_string());
        self.next_logname += 1;
        name
    }

    fn spawn_pipes(&mut self, fds: Vec<RawFd>) -> Vec<PipeIngester> {
        fds.into_iter()
            .map(|raw| {
                let logname = self.next_pipe_name();
                let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                PipeIngester::new(owned, self.unit.clone(), logname)
            })
            .collect()
    }

    fn recv(&self) -> nix::Result<(Vec<u8>, Vec<RawFd>, Option<Cred>)> {
        let mut buf = [0u8; 65536];
        let mut iov = [IoSliceMut::new(&mut buf)];
        let mut cmsg_buf = cmsg_space!([RawFd; 16], socket::UnixCredentials);

        let msg = socket::recvmsg::<()>(
            self.fd.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        )?;

        let mut fds = Vec::new();
        let mut cred = None;
        for cmsg in msg.cmsgs()? {
            match cmsg {
                ControlMessageOwned::ScmRights(received) => fds.extend(received),
                ControlMessageOwned::ScmCredentials(ucred) => cred = Some(Cred::from(ucred)),
                _ => {}
            }
        }

        let n = msg.bytes;
        Ok((buf[..n].to_vec(), fds, cred))
    }

    /// Called when the connection's fd is readable. Returns the outcome:
    /// whether the peer closed the connection, and any new ingesters
    /// spawned from ancillary descriptors received this call.
    pub fn handle_readable(
        &mut self,
        manager: &mut LogManager,
        trust_blindly: bool,
    ) -> Result<ReadOutcome, crate::error::DaemonError> {
        let (data, fds, cred) = self.recv()?;

        if data.is_empty() {
            return Ok(ReadOutcome {
                closed: true,
                spawned: Vec::new(),
            });
        }

        if let Some(buffer) = &mut self.header_buffer {
            buffer.extend_from_slice(&data);
            let Some(newline) = buffer.iter().position(|&b| b == b'\n') else {
                return Ok(ReadOutcome::default());
            };

            let header_bytes = buffer[..newline].to_vec();
            let rest = buffer[newline + 1..].to_vec();
            self.header_buffer = None;

            let header: HeaderFrame = serde_json::from_slice(&header_bytes)
                .map_err(crate::error::DaemonError::MalformedHeader)?;

            if trust_blindly && self.unit.is_none() {
                self.unit = header.unit;
            }
            self.lognames = header.lognames;

            let spawned = self.spawn_pipes(fds);

            if !rest.is_empty() {
                self.write_payload(manager, &rest, cred);
            }

            return Ok(ReadOutcome {
                closed: false,
                spawned,
            });
        }

        let spawned = if fds.is_empty() {
            Vec::new()
        } else {
            self.spawn_pipes(fds)
        };

        if !data.is_empty() {
            self.write_payload(manager, &data, cred);
        }

        Ok(ReadOutcome {
            closed: false,
            spawned,
        })
    }

    fn write_payload(&self, manager: &mut LogManager, payload: &[u8], cred: Option<Cred>) {
        let pid = cred.map(|c| c.pid);
        let unit = pid
            .and_then(creds::unit_for_pid)
            .or_else(|| self.unit.clone());
        let meta = Metadata::now(pid, unit);
        let _ = manager.write("stdio", payload, &meta);
    }
}
