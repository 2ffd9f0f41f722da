//! Bounded in-memory log buffer and the `log` backend that feeds it.
//!
//! Every record passes through [`BufferLogger`], which formats it to stderr
//! via `env_logger`, appends it to the shared [`LogBuffer`] served by
//! `/api/logs`, and mirrors the line into the launcher log file.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::Serialize;

/// Log target used for restart orchestration steps.
pub const RESTART_TARGET: &str = "restart";
/// Log target used for control API events.
pub const API_TARGET: &str = "api";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => Self::Error,
            Level::Warn => Self::Warn,
            Level::Info => Self::Info,
            Level::Debug => Self::Debug,
            Level::Trace => Self::Trace,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub iso_timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            iso_timestamp: now,
            level,
            target: target.into(),
            message: message.into(),
        }
    }

    fn line(&self) -> String {
        format!(
            "[{}] [{:?}] [{}] {}",
            self.timestamp, self.level, self.target, self.message
        )
    }
}

/// Per-level counters. They count every entry ever appended, including evicted ones.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LevelCounts {
    pub error: u64,
    pub warn: u64,
    pub info: u64,
    pub debug: u64,
    pub trace: u64,
}

impl LevelCounts {
    fn bump(&mut self, level: LogLevel) {
        match level {
            LogLevel::Error => self.error += 1,
            LogLevel::Warn => self.warn += 1,
            LogLevel::Info => self.info += 1,
            LogLevel::Debug => self.debug += 1,
            LogLevel::Trace => self.trace += 1,
        }
    }
}

struct BufferInner {
    entries: VecDeque<LogEntry>,
    counts: LevelCounts,
}

/// Fixed-capacity ring of log entries, oldest evicted first.
pub struct LogBuffer {
    capacity: usize,
    inner: Mutex<BufferInner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferInfo {
    pub current_size: usize,
    pub max_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsSnapshot {
    pub logs: Vec<LogEntry>,
    pub total_count: usize,
    pub limit: usize,
    pub stats: LevelCounts,
    pub log_file: Option<String>,
    pub buffer_info: BufferInfo,
    pub last_updated: Option<DateTime<Local>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(BufferInner {
                entries: VecDeque::with_capacity(capacity),
                counts: LevelCounts::default(),
            }),
        }
    }

    /// Append an entry, evicting the oldest one if the buffer is full.
    pub fn push(&self, entry: LogEntry) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.counts.bump(entry.level);
        inner.entries.push_back(entry);
        while inner.entries.len() > self.capacity {
            inner.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recent `limit` entries, oldest first. A limit of 0 returns everything.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let skip = if limit == 0 {
            0
        } else {
            inner.entries.len().saturating_sub(limit)
        };
        inner.entries.iter().skip(skip).cloned().collect()
    }

    pub fn counts(&self) -> LevelCounts {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.counts
    }

    /// Consistent view for the logs endpoint, taken under a single lock.
    pub fn snapshot(&self, limit: usize, log_file: Option<&Path>) -> LogsSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let skip = if limit == 0 {
            0
        } else {
            inner.entries.len().saturating_sub(limit)
        };
        let logs: Vec<LogEntry> = inner.entries.iter().skip(skip).cloned().collect();
        let last_updated = inner.entries.back().map(|e| e.iso_timestamp);
        let current_size = inner.entries.len();
        let stats = inner.counts;
        drop(inner);

        LogsSnapshot {
            logs,
            total_count: current_size,
            limit,
            stats,
            log_file: log_file.map(|p| p.display().to_string()),
            buffer_info: BufferInfo {
                current_size,
                max_size: self.capacity,
            },
            last_updated,
        }
    }
}

/// `log` backend: stderr via `env_logger`, plus the buffer and a log file.
pub struct BufferLogger {
    buffer: Arc<LogBuffer>,
    console: env_logger::Logger,
    buffer_level: LevelFilter,
    file: Option<Mutex<File>>,
}

impl BufferLogger {
    pub fn new(buffer: Arc<LogBuffer>, console: env_logger::Logger) -> Self {
        Self {
            buffer,
            console,
            buffer_level: LevelFilter::Debug,
            file: None,
        }
    }

    /// Mirror every buffered line into `path` (append mode).
    pub fn with_file(mut self, path: &Path) -> Self {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => self.file = Some(Mutex::new(file)),
            Err(e) => eprintln!("Failed to open log file {}: {e}", path.display()),
        }
        self
    }

    fn max_level(&self) -> LevelFilter {
        self.console.filter().max(self.buffer_level)
    }
}

impl Log for BufferLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.buffer_level || self.console.enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        if self.console.matches(record) {
            self.console.log(record);
        }
        if record.level() > self.buffer_level || is_dependency_noise(record.target()) {
            return;
        }

        let entry = LogEntry::new(
            record.level().into(),
            record.target(),
            record.args().to_string(),
        );
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            // Keep logging even if the file becomes unwritable.
            let _ = writeln!(file, "{}", entry.line());
        }
        self.buffer.push(entry);
    }

    fn flush(&self) {
        self.console.flush();
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = file.flush();
        }
    }
}

/// Debug chatter from the HTTP/TLS stack stays out of the operator-facing buffer.
fn is_dependency_noise(target: &str) -> bool {
    ["hyper", "rustls", "reqwest", "tokio_rustls", "tower_http", "h2"]
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

/// Install the global logger. Returns the shared buffer.
pub fn init_logging(capacity: usize, log_file: Option<PathBuf>) -> Arc<LogBuffer> {
    let buffer = Arc::new(LogBuffer::new(capacity));
    let console = env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .build();
    let mut logger = BufferLogger::new(Arc::clone(&buffer), console);
    if let Some(path) = log_file {
        logger = logger.with_file(&path);
    }
    let max_level = logger.max_level();
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max_level);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> LogEntry {
        LogEntry::new(LogLevel::Info, "test", format!("entry {n}"))
    }

    #[test]
    fn buffer_keeps_exactly_the_last_capacity_entries() {
        let buffer = LogBuffer::new(5);
        for n in 0..12 {
            buffer.push(entry(n));
        }

        assert_eq!(buffer.len(), 5);
        let messages: Vec<String> = buffer.recent(0).into_iter().map(|e| e.message).collect();
        assert_eq!(
            messages,
            vec!["entry 7", "entry 8", "entry 9", "entry 10", "entry 11"]
        );
    }

    #[test]
    fn counters_survive_eviction() {
        let buffer = LogBuffer::new(2);
        buffer.push(LogEntry::new(LogLevel::Error, "t", "a"));
        buffer.push(LogEntry::new(LogLevel::Warn, "t", "b"));
        buffer.push(LogEntry::new(LogLevel::Warn, "t", "c"));

        let counts = buffer.counts();
        assert_eq!(counts.error, 1);
        assert_eq!(counts.warn, 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn recent_limits_to_newest_entries() {
        let buffer = LogBuffer::new(10);
        for n in 0..4 {
            buffer.push(entry(n));
        }
        let recent = buffer.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "entry 2");
        assert_eq!(recent[1].message, "entry 3");
    }

    #[test]
    fn snapshot_reports_buffer_info() {
        let buffer = LogBuffer::new(3);
        assert!(buffer.snapshot(50, None).last_updated.is_none());
        for n in 0..5 {
            buffer.push(entry(n));
        }
        let snap = buffer.snapshot(50, Some(Path::new("/tmp/launcher.log")));
        assert_eq!(snap.logs.len(), 3);
        assert_eq!(snap.buffer_info.current_size, 3);
        assert_eq!(snap.buffer_info.max_size, 3);
        assert_eq!(snap.stats.info, 5);
        assert_eq!(snap.log_file.as_deref(), Some("/tmp/launcher.log"));
    }

    #[test]
    fn concurrent_writers_never_overflow() {
        let buffer = Arc::new(LogBuffer::new(64));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for n in 0..200 {
                        buffer.push(LogEntry::new(LogLevel::Debug, "t", format!("{t}-{n}")));
                        assert!(buffer.len() <= 64);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 64);
        assert_eq!(buffer.counts().debug, 1600);
    }

    #[test]
    fn logger_routes_records_into_buffer_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log_path = tmp.path().join("launcher.log");
        let buffer = Arc::new(LogBuffer::new(10));
        let console = env_logger::Builder::new()
            .filter_level(LevelFilter::Off)
            .build();
        let logger = BufferLogger::new(Arc::clone(&buffer), console).with_file(&log_path);

        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .target(RESTART_TARGET)
                .args(format_args!("[stopping] done in 12ms"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Trace)
                .target(RESTART_TARGET)
                .args(format_args!("too verbose"))
                .build(),
        );
        logger.flush();

        let entries = buffer.recent(0);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, RESTART_TARGET);
        assert_eq!(entries[0].level, LogLevel::Warn);
        let written = std::fs::read_to_string(&log_path).unwrap();
        assert!(written.contains("[stopping] done in 12ms"));
    }
}
