//! Bounded operational log shown to the control plane.
//!
//! Every message is kept in a ring buffer (oldest evicted first) and mirrored
//! to `tracing`. When saving is enabled, a background task appends each
//! message to a file as `[%Y-%m-%d %H:%M:%S] message`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A single operational log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl LogEntry {
    /// Line format used by the log file.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {}\n",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message
        )
    }
}

struct LogBuffer {
    entries: VecDeque<LogEntry>,
    writer: Option<mpsc::UnboundedSender<String>>,
}

/// Thread-safe, bounded log buffer with optional file persistence.
pub struct LogSink {
    capacity: usize,
    log_file: PathBuf,
    inner: Mutex<LogBuffer>,
}

impl LogSink {
    pub fn new(capacity: usize, log_file: PathBuf) -> Self {
        Self {
            capacity,
            log_file,
            inner: Mutex::new(LogBuffer {
                entries: VecDeque::with_capacity(capacity),
                writer: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogBuffer> {
        // A panic while holding the lock cannot leave the deque inconsistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a message, evicting the oldest entries above capacity.
    pub fn append(&self, message: impl Into<String>) {
        let entry = LogEntry {
            message: message.into(),
            timestamp: Local::now(),
        };
        info!(target: "dirserve::oplog", "{}", entry.message);

        let mut buffer = self.lock();
        let writer_gone = buffer
            .writer
            .as_ref()
            .is_some_and(|writer| writer.send(entry.to_line()).is_err());
        if writer_gone {
            buffer.writer = None;
        }
        buffer.entries.push_back(entry);
        while buffer.entries.len() > self.capacity {
            buffer.entries.pop_front();
        }
    }

    /// Messages in insertion order.
    pub fn snapshot(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .map(|entry| entry.message.clone())
            .collect()
    }

    /// Full entries (message and timestamp) in insertion order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn is_saving(&self) -> bool {
        self.lock().writer.is_some()
    }

    /// Enable or disable appending log lines to the log file.
    ///
    /// Enabling spawns the writer task and therefore needs a tokio runtime.
    pub fn set_saving(&self, enable: bool) {
        {
            let mut buffer = self.lock();
            if enable && buffer.writer.is_none() {
                buffer.writer = Some(spawn_writer(self.log_file.clone()));
            } else if !enable {
                // Dropping the sender lets the writer drain and exit.
                buffer.writer = None;
            }
        }

        if enable {
            self.append("Log saving enabled");
        } else {
            self.append("Log saving disabled");
        }
    }
}

fn spawn_writer(path: PathBuf) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(err) = write_line(&path, &line).await {
                warn!("Failed to write log file {}: {}", path.display(), err);
            }
        }
    });

    tx
}

async fn write_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
