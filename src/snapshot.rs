/// Reload snapshot schema: the JSON object piped from a predecessor to
/// its successor across a hot reload.
use serde::{Deserialize, Serialize};

use crate::manager::LogManagerSnapshot;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DispatcherSnapshot {
    Acceptor {
        fd: i32,
    },
    Connection {
        fd: i32,
        unit: Option<String>,
        /// Bytes already accumulated into the header buffer before
        /// reload, if the header had not yet been fully received.
        header_buffer: Option<String>,
    },
    Pipe {
        fd: i32,
        unit: Option<String>,
        logname: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonSnapshot {
    pub log_manager: LogManagerSnapshot,
    pub dispatchers: Vec<DispatcherSnapshot>,
    /// Pid of the predecessor to signal once the successor has taken
    /// over all descriptors.
    pub parent_to_kill: Option<i32>,
}
