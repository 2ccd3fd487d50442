//! Bounded operation log.
//!
//! Every handled message is recorded newest-first in a fixed-capacity ring;
//! once full, each insertion evicts the oldest entry. Optionally every entry is
//! mirrored as one JSON line into a file under a log directory.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use prflow_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Capacity of the operation log.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// File written inside the log directory.
pub const MIRROR_FILE_NAME: &str = "prflow-operations.log";

/// One handled message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    /// Serialized params, `"null"` when absent
    pub params: String,
    /// Serialized result, `"null"` when absent
    pub result: String,
    /// Serialized error object
    pub error: Option<String>,
}

impl OperationLogEntry {
    /// Build an entry stamped with the current time.
    pub fn new(
        method: impl Into<String>,
        params: Option<&Value>,
        result: Option<&Value>,
        error: Option<&Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            method: method.into(),
            params: serialize(params),
            result: serialize(result),
            error: error.map(|e| e.to_string()),
        }
    }
}

fn serialize(value: Option<&Value>) -> String {
    value.map_or_else(|| "null".to_string(), Value::to_string)
}

/// Fixed-capacity, newest-first log of handled messages.
#[derive(Debug)]
pub struct OperationLog {
    capacity: usize,
    entries: Mutex<VecDeque<OperationLogEntry>>,
    mirror_dir: Mutex<Option<PathBuf>>,
}

impl OperationLog {
    /// Create a log holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            mirror_dir: Mutex::new(None),
        }
    }

    /// Create a log that mirrors into `dir` from the start.
    pub fn with_log_dir(capacity: usize, dir: impl AsRef<Path>) -> Result<Self> {
        let log = Self::new(capacity);
        log.set_log_dir(dir)?;
        Ok(log)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an entry, evicting the oldest one past capacity.
    ///
    /// The ring lock is held across the mirror write, so the file sees entries
    /// in the same order as the ring. The write is a small blocking append;
    /// records are handled one at a time by the server loop.
    pub fn append(&self, entry: OperationLogEntry) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Operation log lock poisoned, entry dropped");
                return;
            }
        };
        self.mirror(&entry);
        entries.push_front(entry);
        while entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    /// A newest-first page of entries.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<OperationLogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.iter().skip(offset).take(limit).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Current mirror directory.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.mirror_dir.lock().ok().and_then(|dir| dir.clone())
    }

    /// Start mirroring entries into `dir`, creating it if needed.
    ///
    /// Returns the path of the mirror file.
    pub fn set_log_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::Storage(format!(
                "Failed to create log directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let mut mirror_dir = self
            .mirror_dir
            .lock()
            .map_err(|e| Error::Storage(format!("Lock poisoned: {}", e)))?;
        *mirror_dir = Some(dir.to_path_buf());

        let file = dir.join(MIRROR_FILE_NAME);
        info!(path = ?file, "Mirroring operation log");
        Ok(file)
    }

    fn mirror(&self, entry: &OperationLogEntry) {
        let Ok(dir) = self.mirror_dir.lock() else {
            return;
        };
        let Some(dir) = dir.as_ref() else {
            return;
        };

        let path = dir.join(MIRROR_FILE_NAME);
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize operation log entry");
                return;
            }
        };

        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "{}", line));

        match written {
            Ok(()) => debug!(path = ?path, method = %entry.method, "Operation mirrored"),
            Err(e) => warn!(path = ?path, error = %e, "Failed to mirror operation"),
        }
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(method: &str) -> OperationLogEntry {
        OperationLogEntry::new(method, None, Some(&json!({})), None)
    }

    #[test]
    fn test_entry_serialization() {
        let params = json!({"name": "pr"});
        let error = json!({"code": -32602, "message": "bad"});
        let e = OperationLogEntry::new("tools/call", Some(&params), None, Some(&error));

        assert_eq!(e.method, "tools/call");
        assert_eq!(e.params, r#"{"name":"pr"}"#);
        assert_eq!(e.result, "null");
        assert!(e.error.as_deref().unwrap().contains("-32602"));
    }

    #[test]
    fn test_newest_first() {
        let log = OperationLog::default();
        log.append(entry("initialize"));
        log.append(entry("tools/list"));
        log.append(entry("ping"));

        let methods: Vec<_> = log.list(10, 0).into_iter().map(|e| e.method).collect();
        assert_eq!(methods, vec!["ping", "tools/list", "initialize"]);
        assert_eq!(log.capacity(), DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn test_evicts_oldest_past_capacity() {
        let log = OperationLog::new(3);
        for i in 0..5 {
            log.append(entry(&format!("m{i}")));
        }

        assert_eq!(log.len(), 3);
        let methods: Vec<_> = log.list(10, 0).into_iter().map(|e| e.method).collect();
        assert_eq!(methods, vec!["m4", "m3", "m2"]);
    }

    #[test]
    fn test_never_exceeds_default_capacity() {
        let log = OperationLog::default();
        for i in 0..(DEFAULT_LOG_CAPACITY + 25) {
            log.append(entry(&format!("m{i}")));
        }

        assert_eq!(log.len(), DEFAULT_LOG_CAPACITY);
        let newest = &log.list(1, 0)[0];
        assert_eq!(newest.method, format!("m{}", DEFAULT_LOG_CAPACITY + 24));
        let oldest = &log.list(1, DEFAULT_LOG_CAPACITY - 1)[0];
        assert_eq!(oldest.method, "m25");
    }

    #[test]
    fn test_paging() {
        let log = OperationLog::new(10);
        for i in 0..6 {
            log.append(entry(&format!("m{i}")));
        }

        let page: Vec<_> = log.list(2, 1).into_iter().map(|e| e.method).collect();
        assert_eq!(page, vec!["m4", "m3"]);
        assert!(log.list(5, 6).is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let log = OperationLog::new(0);
        log.append(entry("a"));
        log.append(entry("b"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.list(5, 0)[0].method, "b");
    }

    #[test]
    fn test_mirror_to_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/logs");
        let log = OperationLog::new(10);

        log.append(entry("before"));
        let file = log.set_log_dir(&dir).unwrap();
        assert_eq!(log.log_dir(), Some(dir.clone()));
        log.append(entry("after-1"));
        log.append(entry("after-2"));

        let contents = std::fs::read_to_string(file).unwrap();
        let lines: Vec<OperationLogEntry> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].method, "after-1");
        assert_eq!(lines[1].method, "after-2");
    }

    #[test]
    fn test_concurrent_appends_mirror_in_ring_order() {
        let tmp = tempfile::tempdir().unwrap();
        let log = std::sync::Arc::new(OperationLog::with_log_dir(100, tmp.path()).unwrap());

        let workers: Vec<_> = (0..4)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..20 {
                        log.append(entry(&format!("t{t}-{i}")));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let contents = std::fs::read_to_string(tmp.path().join(MIRROR_FILE_NAME)).unwrap();
        let mirrored: Vec<String> = contents
            .lines()
            .map(|line| serde_json::from_str::<OperationLogEntry>(line).unwrap().method)
            .collect();
        let mut ring: Vec<String> = log.list(100, 0).into_iter().map(|e| e.method).collect();
        ring.reverse();

        assert_eq!(mirrored.len(), 80);
        assert_eq!(mirrored, ring);
    }

    #[test]
    fn test_set_log_dir_on_file_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let log = OperationLog::new(10);

        let err = log.set_log_dir(file.path()).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(log.log_dir().is_none());
    }
}
