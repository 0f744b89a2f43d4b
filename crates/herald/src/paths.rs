//! File system paths for Herald.

use crate::{HeraldError, HeraldResult};
use std::path::PathBuf;

/// Gateway socket filename under the base runtime directory.
const GATEWAY_SOCKET_NAME: &str = "gateway.sock";

/// Manages file system paths for Herald.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.herald)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.herald`.
    pub fn new() -> HeraldResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| HeraldError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".herald"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.herald).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.herald/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the chat gateway socket path (~/.herald/gateway.sock).
    pub fn gateway_socket_file(&self) -> PathBuf {
        self.base_dir.join(GATEWAY_SOCKET_NAME)
    }

    /// Get the logs directory (~/.herald/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the default JSONL log file (~/.herald/logs/herald.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("herald.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> HeraldResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
