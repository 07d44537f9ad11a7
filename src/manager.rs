/// Registry of open `LogWriter`s, keyed by (unit, stream-name).
///
/// Owned outright by the event loop; there is exactly one writer, so no
/// locking is needed (see DESIGN.md's ambient-concurrency note).
use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::writer::{LogWriter, Metadata, WriterSnapshot};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogManagerSnapshot {
    pub log_dir: String,
    pub max_idle: f64,
    pub trust_blindly: bool,
    pub writers: Vec<WriterSnapshot>,
}

pub struct LogManager {
    log_dir: String,
    max_idle: Duration,
    pub trust_blindly: bool,
    writers: HashMap<(String, String), LogWriter>,
    last_idle_check: Instant,
}

impl LogManager {
    pub fn new(log_dir: impl Into<String>, max_idle_secs: f64, trust_blindly: bool) -> Self {
        LogManager {
            log_dir: log_dir.into(),
            max_idle: Duration::from_secs_f64(max_idle_secs.max(0.0)),
            trust_blindly,
            writers: HashMap::new(),
            last_idle_check: Instant::now(),
        }
    }

    pub fn from_snapshot(snap: LogManagerSnapshot) -> Self {
        let mut mgr = LogManager::new(snap.log_dir, snap.max_idle, snap.trust_blindly);
        for w in snap.writers {
            let writer = LogWriter::restore(&mgr.log_dir, w.unit, w.logname, w.start_of_line);
            mgr.writers.insert(writer.key(), writer);
        }
        mgr
    }

    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    /// Retrieve a writer, lazily creating one if it doesn't exist yet.
    pub fn get(&mut self, unit: &str, logname: &str) -> &mut LogWriter {
        let key = (unit.to_string(), logname.to_string());
        self.writers
            .entry(key)
            .or_insert_with(|| LogWriter::new(self.log_dir.clone(), unit, logname))
    }

    /// Write a batch to (unit, stream-name) if a unit is present; silently
    /// dropped otherwise.
    pub fn write(&mut self, logname: &str, data: &[u8], meta: &Metadata) -> std::io::Result<()> {
        let Some(unit) = meta.unit.clone() else {
            return Ok(());
        };
        self.get(&unit, logname).write(data, meta)
    }

    /// Close writers idle for longer than `max_idle`, rate-limited to at
    /// most once per `max_idle` interval.
    pub fn sweep_idle(&mut self) {
        let now = Instant::now();
        if now < self.last_idle_check + self.max_idle {
            return;
        }
        self.writers.retain(|_, writer| {
            let idle = writer.last_active() + self.max_idle < now;
            if idle {
                writer.close();
            }
            !idle
        });
        self.last_idle_check = now;
    }

    /// Close every writer's file handle without dropping the registry, so
    /// descriptors are not inherited across a reload but state survives
    /// for the snapshot.
    pub fn close_all(&mut self) {
        for writer in self.writers.values_mut() {
            writer.close();
        }
    }

    pub fn snapshot(&self) -> LogManagerSnapshot {
        LogManagerSnapshot {
            log_dir: self.log_dir.clone(),
            max_idle: self.max_idle.as_secs_f64(),
            trust_blindly: self.trust_blindly,
            writers: self.writers.values().map(|w| w.snapshot()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn get_is_idempotent_per_key() {
        let dir = TempDir::new().unwrap();
        let mut mgr = LogManager::new(dir.path().to_string_lossy().to_string(), 60.0, false);
        let a = mgr.get("dummyunit", "stdio").key();
        let b = mgr.get("dummyunit", "stdio").key();
        assert_eq!(a, b);
    }

    #[test]
    fn write_with_no_unit_is_a_silent_noop() {
        let dir = TempDir::new().unwrap();
        let mut mgr = LogManager::new(dir.path().to_string_lossy().to_string(), 60.0, false);
        let meta = Metadata::anonymous(None);
        mgr.write("stdio", b"hello\n", &meta).unwrap();
        assert!(!dir.path().join("dummyunit").exists());
    }
}
