//! Notification engine.
//!
//! Turns print progress updates and firmware commands into chat messages.
//! The engine only knows two capabilities: somewhere to send a
//! notification ([`NotificationSink`]) and the current rules
//! ([`RuleSource`]). Every send is fire-and-forget.

use crate::config::NotificationConfig;
use crate::rules::{RuleSet, RuleSource};
use crate::session::SessionManager;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Destination for outbound notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `body`. Returns whether it was handed to the transport.
    async fn notify(&self, body: &str) -> bool;
}

#[async_trait]
impl NotificationSink for SessionManager {
    async fn notify(&self, body: &str) -> bool {
        self.send(body).await
    }
}

/// Messages for one progress update, in firing order.
///
/// The three branches are evaluated independently, so a single update can
/// yield several messages (100% both completes the percent series and ends
/// the print).
pub fn progress_messages(config: &NotificationConfig, path: &str, progress: u32) -> Vec<String> {
    let mut messages = Vec::new();
    let interval = config.percent_progress;

    if progress == 0 && config.print_start {
        messages.push(format!("Print {} started", path));
    }
    if progress != 0 && interval > 0 && progress % interval == 0 {
        messages.push(format!("{}: {}% complete", path, progress));
    }
    if progress >= 100 && config.print_end {
        messages.push(format!("Print {} completed", path));
    }

    messages
}

/// Texts of every rule matching `command`. No early exit on first match.
pub fn command_messages(rules: &RuleSet, command: &str) -> Vec<String> {
    rules
        .matching(command)
        .map(|rule| rule.text.clone())
        .collect()
}

/// Apply the configured message prefix.
pub fn with_prefix(prefix: &str, body: &str) -> String {
    if prefix.is_empty() {
        body.to_string()
    } else {
        format!("{}: {}", prefix, body)
    }
}

/// Evaluates host events against the notification settings and rules.
pub struct NotificationEngine {
    sink: Arc<dyn NotificationSink>,
    rules: Arc<dyn RuleSource>,
    config: RwLock<NotificationConfig>,
}

impl NotificationEngine {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        rules: Arc<dyn RuleSource>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            sink,
            rules,
            config: RwLock::new(config),
        }
    }

    /// Replace the notification settings.
    pub fn set_config(&self, config: NotificationConfig) {
        *self.config.write() = config;
    }

    pub fn config(&self) -> NotificationConfig {
        self.config.read().clone()
    }

    /// Send a single message with the configured prefix.
    pub async fn notify(&self, body: &str) -> bool {
        let prefix = self.config.read().msg_prefix.clone();
        self.sink.notify(&with_prefix(&prefix, body)).await
    }

    /// Handle a print progress update. Returns how many messages were
    /// accepted by the transport.
    pub async fn on_print_progress(&self, path: &str, progress: u32) -> usize {
        let messages = {
            let config = self.config.read();
            progress_messages(&config, path, progress)
        };

        debug!(path = %path, progress, messages = messages.len(), "Print progress");
        self.deliver_all(messages).await
    }

    /// Handle a firmware command sent to the printer. Returns how many
    /// messages were accepted by the transport.
    pub async fn on_firmware_command(&self, command: &str) -> usize {
        let rules = self.rules.current();
        if command.is_empty() || rules.is_empty() {
            return 0;
        }

        let messages = command_messages(&rules, command);
        if !messages.is_empty() {
            debug!(command = %command, matched = messages.len(), "Firmware command matched rules");
        }
        self.deliver_all(messages).await
    }

    async fn deliver_all(&self, messages: Vec<String>) -> usize {
        let mut delivered = 0;
        for message in messages {
            if self.notify(&message).await {
                delivered += 1;
            }
        }
        delivered
    }
}
