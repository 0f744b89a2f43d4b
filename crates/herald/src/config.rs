//! Configuration for Herald.
//!
//! The host owns persistence; Herald only consumes the values. The JSON
//! layout mirrors the settings keys the host stores (`jid`, `to`,
//! `notify.percent_progress`, ...).

use crate::session::Identity;
use crate::{HeraldError, HeraldResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default percent interval between progress notifications.
pub const DEFAULT_PERCENT_PROGRESS: u32 = 10;

/// Top-level Herald configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Chat account and recipient.
    pub account: AccountConfig,
    /// Notification toggles and rules.
    pub notify: NotificationConfig,
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            account: AccountConfig::default(),
            notify: NotificationConfig::default(),
        }
    }
}

/// Chat account settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Local account id.
    pub jid: String,
    /// Local account secret.
    pub password: String,
    /// Recipient of every notification.
    pub to: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            jid: "user@example.com".to_string(),
            password: String::new(),
            to: "user2@example.com".to_string(),
        }
    }
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("to", &self.to)
            .finish()
    }
}

/// User-facing notification toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Prepended as `"{prefix}: "` to every message when non-empty.
    pub msg_prefix: String,
    /// Send "Server started" on startup.
    pub server_start: bool,
    /// Send "Print {path} started" at progress 0.
    pub print_start: bool,
    /// Send "Print {path} completed" at progress >= 100.
    pub print_end: bool,
    /// Percent interval for progress messages; 0 disables them.
    pub percent_progress: u32,
    /// Raw `{CODE}{TEXT}` rule text, one rule per line.
    pub rules: String,
    /// Acknowledge inbound chat messages.
    pub reply_to_inbound: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            msg_prefix: String::new(),
            server_start: false,
            print_start: true,
            print_end: true,
            percent_progress: DEFAULT_PERCENT_PROGRESS,
            rules: String::new(),
            reply_to_inbound: true,
        }
    }
}

impl HeraldConfig {
    /// Load configuration from the default location, falling back to defaults.
    pub fn load(paths: &Paths) -> HeraldResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> HeraldResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| HeraldError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save configuration to the default location.
    pub fn save(&self, paths: &Paths) -> HeraldResult<()> {
        paths.ensure_dirs()?;
        self.save_to_file(&paths.config_file())
    }

    /// Save configuration to a specific file.
    pub fn save_to_file(&self, path: &Path) -> HeraldResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Only the log level can be overridden from the environment.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("HERALD_LOG_LEVEL") {
            if !log_level.trim().is_empty() {
                self.log_level = log_level;
            }
        }
    }

    /// The identity a new chat session is bound to.
    pub fn identity(&self) -> Identity {
        Identity::new(
            self.account.jid.clone(),
            self.account.password.clone(),
            self.account.to.clone(),
        )
    }
}
