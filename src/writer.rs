/// A date-rotated log file with cross-write-call line-prefix state.
///
/// Mirrors the original `LogWriter`: one file per (unit, stream-name),
/// rotated by local date, with a `<stream>.log` symlink kept pointing at
/// the current rotation.
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::creds::comm_for_pid;

/// Per-message attribution used to format the line prefix.
#[derive(Debug, Clone)]
pub struct Metadata {
    pub time: DateTime<Local>,
    pub pid: Option<i32>,
    pub comm: Option<String>,
    pub unit: Option<String>,
}

impl Metadata {
    pub fn now(pid: Option<i32>, unit: Option<String>) -> Self {
        let comm = pid.and_then(comm_for_pid).or(Some("unknown".to_string()));
        Metadata {
            time: Local::now(),
            pid,
            comm,
            unit,
        }
    }

    pub fn anonymous(unit: Option<String>) -> Self {
        Metadata {
            time: Local::now(),
            pid: None,
            comm: None,
            unit,
        }
    }
}

fn format_prefix(meta: &Metadata) -> String {
    let ts = meta.time.format("%H:%M:%S%.3f");
    match (&meta.comm, meta.pid) {
        (Some(comm), Some(pid)) => format!("{} {}[{}]: ", ts, comm, pid),
        _ => format!("{}: ", ts),
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WriterSnapshot {
    pub unit: String,
    pub logname: String,
    pub start_of_line: bool,
}

pub struct LogWriter {
    log_dir: PathBuf,
    unit: String,
    logname: String,
    file: Option<File>,
    path: Option<PathBuf>,
    start_of_line: bool,
    last_active: std::time::Instant,
}

impl LogWriter {
    pub fn new(log_dir: impl Into<PathBuf>, unit: impl Into<String>, logname: impl Into<String>) -> Self {
        Self::restore(log_dir, unit, logname, true)
    }

    pub fn restore(
        log_dir: impl Into<PathBuf>,
        unit: impl Into<String>,
        logname: impl Into<String>,
        start_of_line: bool,
    ) -> Self {
        LogWriter {
            log_dir: log_dir.into(),
            unit: unit.into(),
            logname: logname.into(),
            file: None,
            path: None,
            start_of_line,
            last_active: std::time::Instant::now(),
        }
    }

    pub fn key(&self) -> (String, String) {
        (self.unit.clone(), self.logname.clone())
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn last_active(&self) -> std::time::Instant {
        self.last_active
    }

    fn rotated_path(&self, now: &DateTime<Local>) -> PathBuf {
        self.log_dir
            .join(&self.unit)
            .join(now.format("%Y%m").to_string())
            .join(format!("{}.{}.log", self.logname, now.format("%Y-%m-%d")))
    }

    fn link_path(&self) -> PathBuf {
        self.log_dir.join(&self.unit).join(format!("{}.log", self.logname))
    }

    fn open_file(&mut self, now: &DateTime<Local>) -> std::io::Result<()> {
        let path = self.rotated_path(now);
        if Some(&path) == self.path.as_ref() {
            return Ok(());
        }

        if let Some(file) = self.file.take() {
            drop(file);
        }

        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                OpenOptions::new().create(true).append(true).open(&path)?
            }
            Err(e) => return Err(e),
        };

        self.path = Some(path);
        self.file = Some(file);
        self.update_link()?;
        Ok(())
    }

    fn update_link(&self) -> std::io::Result<()> {
        let target = self.path.as_ref().expect("path set before update_link");
        let link = self.link_path();
        match std::os::unix::fs::symlink(target, &link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&link);
                std::os::unix::fs::symlink(target, &link)
            }
            Err(e) => Err(e),
        }
    }

    /// Append `data` to the log file, prefixing every logical line with
    /// formatted metadata. A logical line may span multiple calls; no
    /// prefix is emitted mid-line.
    pub fn write(&mut self, data: &[u8], meta: &Metadata) -> std::io::Result<()> {
        self.last_active = std::time::Instant::now();
        if data.is_empty() {
            return Ok(());
        }

        self.open_file(&meta.time)?;
        let prefix = format_prefix(meta);
        let file = self.file.as_mut().expect("just opened");

        if self.start_of_line {
            file.write_all(prefix.as_bytes())?;
        }

        let ends_with_newline = data.last() == Some(&b'\n');
        let body = if ends_with_newline { &data[..data.len() - 1] } else { data };

        let mut start = 0;
        for (i, &b) in body.iter().enumerate() {
            if b == b'\n' {
                file.write_all(&body[start..=i])?;
                file.write_all(prefix.as_bytes())?;
                start = i + 1;
            }
        }
        file.write_all(&body[start..])?;

        if ends_with_newline {
            file.write_all(b"\n")?;
            self.start_of_line = true;
        } else {
            self.start_of_line = false;
        }

        file.flush()
    }

    /// Close the open file handle, if any. The next `write` call reopens
    /// (and, if the date changed, rotates) transparently.
    pub fn close(&mut self) {
        self.file = None;
    }

    pub fn snapshot(&self) -> WriterSnapshot {
        WriterSnapshot {
            unit: self.unit.clone(),
            logname: self.logname.clone(),
            start_of_line: self.start_of_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta_at(hms: &str, pid: Option<i32>, comm: Option<&str>, unit: &str) -> Metadata {
        let today = Local::now().format("%Y-%m-%d").to_string();
        let time = DateTime::parse_from_str(
            &format!("{} {} +0000", today, hms),
            "%Y-%m-%d %H:%M:%S%.3f %z",
        )
        .unwrap()
        .with_timezone(&Local);
        Metadata {
            time,
            pid,
            comm: comm.map(str::to_string),
            unit: Some(unit.to_string()),
        }
    }

    #[test]
    fn single_prefix_across_partial_writes() {
        let dir = TempDir::new().unwrap();
        let mut w = LogWriter::new(dir.path(), "dummyunit", "stdio");
        let meta = meta_at("00:00:00.000", Some(42), Some("echo"), "dummyunit");
        w.write(b"foo", &meta).unwrap();
        w.write(b"bar\n", &meta).unwrap();

        let contents = fs::read_to_string(dir.path().join("dummyunit").join("stdio.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("echo[42]: foobar"));
    }

    #[test]
    fn unknown_comm_falls_back_to_timestamp_only_prefix() {
        let dir = TempDir::new().unwrap();
        let mut w = LogWriter::new(dir.path(), "dummyunit", "third");
        let meta = meta_at("00:00:00.000", None, None, "dummyunit");
        w.write(b"there\n", &meta).unwrap();

        let contents = fs::read_to_string(dir.path().join("dummyunit").join("third.log")).unwrap();
        assert!(contents.ends_with(": there\n"));
    }

    #[test]
    fn symlink_points_at_current_rotation() {
        let dir = TempDir::new().unwrap();
        let mut w = LogWriter::new(dir.path(), "dummyunit", "stdio");
        let meta = meta_at("00:00:00.000", Some(1), Some("x"), "dummyunit");
        w.write(b"hi\n", &meta).unwrap();

        let link = dir.path().join("dummyunit").join("stdio.log");
        let target = fs::read_link(&link).unwrap();
        assert!(target.to_string_lossy().contains("stdio."));
    }

    #[test]
    fn idle_close_then_write_appends_without_truncation() {
        let dir = TempDir::new().unwrap();
        let mut w = LogWriter::new(dir.path(), "dummyunit", "stdio");
        let meta = meta_at("00:00:00.000", Some(1), Some("x"), "dummyunit");
        w.write(b"first\n", &meta).unwrap();
        w.close();
        w.write(b"second\n", &meta).unwrap();

        let contents = fs::read_to_string(dir.path().join("dummyunit").join("stdio.log")).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
