//! Embeddable static directory server.
//!
//! A [`ServerManager`] owns at most one running file server. The server maps
//! URL paths onto a root directory, serves files and `index.html`, renders
//! directory listings, answers ID-keyed lookups from a side directory, and
//! accepts uploads and folder/file creation. The [`control`] module exposes
//! the manager to user interfaces through the [`ControlPlane`] trait and an
//! HTTP/JSON adapter.

pub mod config;
pub mod control;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod lifecycle;
pub mod listing;
pub mod logs;
pub mod mutation;
pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;

pub use config::Config;
pub use control::{ControlPlane, ControlResponse};
pub use error::{ControlError, FileServerError};
pub use lifecycle::{ServerConfig, ServerManager};
pub use logs::LogSink;

/// Application state shared across request handlers of one server instance
#[derive(Clone)]
pub struct AppState {
    /// Root directory to serve files from (canonical)
    pub root_dir: PathBuf,
    /// Configuration
    pub config: Arc<Config>,
    /// Operational log
    pub logs: Arc<LogSink>,
}

impl AppState {
    pub fn new(root_dir: PathBuf, config: Arc<Config>, logs: Arc<LogSink>) -> Self {
        Self {
            root_dir,
            config,
            logs,
        }
    }

    /// State with default config and a fresh log sink, mostly for embedding and tests.
    pub fn with_root(root_dir: PathBuf) -> Self {
        let config = Config::default();
        let logs = LogSink::new(config.log_capacity, config.log_file.clone());
        Self::new(root_dir, Arc::new(config), Arc::new(logs))
    }
}
