//! Host-facing hooks.
//!
//! [`Herald`] wires the rule store, session manager and notification engine
//! together and exposes the callbacks a print host invokes. None of the
//! hooks return an error: every failure is logged where it happens.

use crate::config::HeraldConfig;
use crate::driver::DriverConfig;
use crate::engine::NotificationEngine;
use crate::rules::RuleStore;
use crate::session::{SessionFactory, SessionManager};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

const CONFIRMATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An event delivered by the print host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    PrintProgress { path: String, progress: u32 },
    FirmwareCommand { command: String },
    SettingsSaved { config: HeraldConfig },
    SendImage { path: PathBuf },
    Shutdown,
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::PrintProgress { .. } => "print_progress",
            HostEvent::FirmwareCommand { .. } => "firmware_command",
            HostEvent::SettingsSaved { .. } => "settings_saved",
            HostEvent::SendImage { .. } => "send_image",
            HostEvent::Shutdown => "shutdown",
        }
    }
}

/// The notification bridge as seen by the host.
pub struct Herald {
    config: RwLock<HeraldConfig>,
    rules: Arc<RuleStore>,
    sessions: Arc<SessionManager>,
    engine: NotificationEngine,
}

impl Herald {
    pub fn new(config: HeraldConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self::with_driver_config(config, factory, DriverConfig::default())
    }

    pub fn with_driver_config(
        config: HeraldConfig,
        factory: Arc<dyn SessionFactory>,
        driver_config: DriverConfig,
    ) -> Self {
        let rules = Arc::new(RuleStore::new());
        let sessions = Arc::new(SessionManager::with_driver_config(factory, driver_config));
        let engine =
            NotificationEngine::new(sessions.clone(), rules.clone(), config.notify.clone());

        Self {
            config: RwLock::new(config),
            rules,
            sessions,
            engine,
        }
    }

    /// Build the rules, connect, and optionally announce the server.
    pub async fn on_startup(&self) {
        let config = self.config();
        info!(
            jid = %config.account.jid,
            to = %config.account.to,
            "Herald starting"
        );

        self.rules.rebuild(&config.notify.rules);
        self.sessions
            .set_reply_to_inbound(config.notify.reply_to_inbound);

        if self.connect(&config).await && config.notify.server_start {
            self.engine.notify("Server started").await;
        }

        info!("Herald startup complete");
    }

    /// Disconnect and stop the background driver.
    pub async fn on_shutdown(&self) {
        info!("Herald shutting down");
        let outcome = self.sessions.shutdown().await;
        debug!(outcome = ?outcome, "Chat session released");
    }

    /// Apply a new configuration: rebuild rules and run a full connect cycle.
    pub async fn on_settings_saved(&self, config: HeraldConfig) {
        info!(
            jid = %config.account.jid,
            to = %config.account.to,
            "Settings saved, reconnecting"
        );

        self.engine.set_config(config.notify.clone());
        self.rules.rebuild(&config.notify.rules);
        self.sessions
            .set_reply_to_inbound(config.notify.reply_to_inbound);
        *self.config.write() = config.clone();

        if self.connect(&config).await {
            let now = chrono::Local::now().format(CONFIRMATION_TIME_FORMAT);
            self.engine
                .notify(&format!("Configuration saved ({})", now))
                .await;
        }
    }

    pub async fn on_print_progress(&self, path: &str, progress: u32) {
        self.engine.on_print_progress(path, progress).await;
    }

    pub async fn on_firmware_command_sent(&self, command: &str) {
        self.engine.on_firmware_command(command).await;
    }

    /// Send an image to the recipient, best-effort.
    pub async fn send_image(&self, path: &Path) -> bool {
        self.sessions.send_image(path).await
    }

    /// Route a host event to its hook.
    pub async fn dispatch(&self, event: HostEvent) {
        debug!(event = event.name(), "Host event");
        match event {
            HostEvent::PrintProgress { path, progress } => {
                self.on_print_progress(&path, progress).await
            }
            HostEvent::FirmwareCommand { command } => {
                self.on_firmware_command_sent(&command).await
            }
            HostEvent::SettingsSaved { config } => self.on_settings_saved(config).await,
            HostEvent::SendImage { path } => {
                self.send_image(&path).await;
            }
            HostEvent::Shutdown => self.on_shutdown().await,
        }
    }

    pub fn config(&self) -> HeraldConfig {
        self.config.read().clone()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    pub fn engine(&self) -> &NotificationEngine {
        &self.engine
    }

    async fn connect(&self, config: &HeraldConfig) -> bool {
        match self.sessions.connect(&config.identity()).await {
            Ok(session_id) => {
                debug!(session_id = %session_id, "Chat session registered");
                true
            }
            Err(e) => {
                error!(
                    jid = %config.account.jid,
                    error = %e,
                    "Could not connect chat session"
                );
                false
            }
        }
    }
}
