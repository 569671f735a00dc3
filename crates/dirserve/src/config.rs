use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Server configuration shared by every started instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum total size of an upload request (in bytes)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,

    /// Number of operational log lines kept in memory
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Side directory holding lookup artifacts (`txt/{id}.txt`, `json/{id}.json`)
    #[serde(default = "default_lookup_dir")]
    pub lookup_dir: PathBuf,

    /// File that receives log lines while log saving is enabled
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Start with log saving enabled
    #[serde(default)]
    pub persist_logs: bool,
}

fn default_max_upload_size() -> u64 {
    32 * 1024 * 1024 // 32 MiB
}

fn default_log_capacity() -> usize {
    100
}

fn default_lookup_dir() -> PathBuf {
    PathBuf::from("api")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("log").join("log.txt")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_upload_size: default_max_upload_size(),
            log_capacity: default_log_capacity(),
            lookup_dir: default_lookup_dir(),
            log_file: default_log_file(),
            persist_logs: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Directory holding plain-text lookup artifacts
    pub fn text_lookup_dir(&self) -> PathBuf {
        self.lookup_dir.join("txt")
    }

    /// Directory holding JSON lookup artifacts
    pub fn json_lookup_dir(&self) -> PathBuf {
        self.lookup_dir.join("json")
    }
}
