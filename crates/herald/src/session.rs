//! Chat session lifecycle.
//!
//! Herald holds at most one chat session at a time. The protocol engine
//! behind a session is a black box reached through [`ChatSession`]; a
//! [`SessionFactory`] builds a fresh session for each connect cycle because
//! credentials cannot change once a session exists.
//!
//! # Invariants
//!
//! 1. **Single Session**: a new session is only registered after the
//!    previous one has been taken out of the slot and torn down. The
//!    driver's in-place reconnect runs under the same slot lock and only
//!    for the registered session.
//! 2. **No Stale Reference**: `disconnect` clears the slot even when the
//!    transport fails to shut down cleanly.
//! 3. **Best-Effort Delivery**: `send` never returns an error and never
//!    retries; failures are logged and dropped.

use crate::driver::{BackgroundDriver, DriverConfig, DriverContext};
use crate::{HeraldError, HeraldResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection state of a chat session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

/// Chat message kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Normal,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Normal => "normal",
        }
    }

    /// Parse a wire kind; anything else (groupchat, headline, error) is `None`.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "chat" => Some(Self::Chat),
            "normal" => Some(Self::Normal),
            _ => None,
        }
    }
}

/// A message received from the chat network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub kind: String,
    pub body: String,
}

/// Local account plus the peer that receives notifications.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    jid: String,
    password: String,
    recipient: String,
}

impl Identity {
    pub fn new(
        jid: impl Into<String>,
        password: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            jid: jid.into(),
            password: password.into(),
            recipient: recipient.into(),
        }
    }

    pub fn jid(&self) -> &str {
        &self.jid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("recipient", &self.recipient)
            .finish()
    }
}

/// One logical connection to the chat network.
///
/// Implementations own their transport exclusively. All methods take
/// `&self` so the driver can pump inbound traffic while callers send.
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Unique id of this session, used for log correlation.
    fn id(&self) -> Uuid;

    /// Current connection state.
    fn state(&self) -> SessionState;

    /// Initiate the handshake. Returns once the handshake has started,
    /// not when it has completed.
    async fn connect(&self) -> HeraldResult<()>;

    /// Graceful shutdown. May fail.
    async fn disconnect(&self) -> HeraldResult<()>;

    /// Hand a message to the transport.
    async fn send_message(&self, to: &str, body: &str, kind: MessageKind) -> HeraldResult<()>;

    /// Send an image attachment.
    async fn send_image(&self, _to: &str, _mime: &str, _data: Vec<u8>) -> HeraldResult<()> {
        Err(HeraldError::Unsupported(
            "image attachments are not supported by this transport".to_string(),
        ))
    }

    /// Process one unit of protocol traffic.
    ///
    /// Returns an inbound chat message if one arrived. Called in a loop by
    /// the background driver.
    async fn process(&self) -> HeraldResult<Option<InboundMessage>>;
}

/// Builds sessions bound to an identity.
pub trait SessionFactory: Send + Sync {
    fn create(&self, identity: &Identity) -> Arc<dyn ChatSession>;
}

/// Result of a disconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// No session was held; nothing happened.
    NotConnected,
    /// The session shut down cleanly.
    Clean,
    /// The transport reported an error; the session was dropped anyway.
    Failed,
}

pub(crate) struct HeldSession {
    pub session: Arc<dyn ChatSession>,
    pub recipient: String,
}

/// The single session slot, shared with the background driver.
pub(crate) type SessionSlot = Arc<Mutex<Option<HeldSession>>>;

/// Owns the single chat session and the background driver that pumps it.
pub struct SessionManager {
    factory: Arc<dyn SessionFactory>,
    current: SessionSlot,
    published: watch::Sender<Option<Arc<dyn ChatSession>>>,
    reply_to_inbound: Arc<AtomicBool>,
    driver: BackgroundDriver,
}

impl SessionManager {
    /// Create a manager with default driver settings.
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self::with_driver_config(factory, DriverConfig::default())
    }

    pub fn with_driver_config(factory: Arc<dyn SessionFactory>, config: DriverConfig) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            factory,
            current: Arc::new(Mutex::new(None)),
            published,
            reply_to_inbound: Arc::new(AtomicBool::new(true)),
            driver: BackgroundDriver::new(config),
        }
    }

    /// Replace the held session with a new one bound to `identity`.
    ///
    /// Any existing session is torn down first (best-effort). The new
    /// session is always registered and the driver started. A handshake
    /// that cannot even start is still returned as
    /// [`HeraldError::Handshake`]; the session stays registered as
    /// `Failed` and the driver keeps retrying it with backoff.
    pub async fn connect(&self, identity: &Identity) -> HeraldResult<Uuid> {
        let mut current = self.current.lock().await;

        if let Some(previous) = current.take() {
            self.published.send_replace(None);
            teardown(&previous.session).await;
        }

        let session = self.factory.create(identity);
        let session_id = session.id();
        info!(
            session_id = %session_id,
            jid = %identity.jid(),
            recipient = %identity.recipient(),
            "Starting chat session"
        );

        let handshake = session.connect().await;
        if let Err(e) = &handshake {
            error!(
                session_id = %session_id,
                jid = %identity.jid(),
                error = %e,
                "Chat handshake could not be initiated, retrying in the background"
            );
        }

        *current = Some(HeldSession {
            session: session.clone(),
            recipient: identity.recipient().to_string(),
        });
        self.published.send_replace(Some(session));

        if self.driver.ensure_started(DriverContext {
            slot: self.current.clone(),
            sessions: self.published.subscribe(),
            reply_to_inbound: self.reply_to_inbound.clone(),
        }) {
            info!("Background driver started");
        }

        match handshake {
            Ok(()) => Ok(session_id),
            Err(HeraldError::Handshake(detail)) => Err(HeraldError::Handshake(detail)),
            Err(other) => Err(HeraldError::Handshake(other.to_string())),
        }
    }

    /// Tear down the held session, if any. The slot is always cleared.
    pub async fn disconnect(&self) -> DisconnectOutcome {
        let mut current = self.current.lock().await;

        let Some(held) = current.take() else {
            debug!("Disconnect requested with no active chat session");
            return DisconnectOutcome::NotConnected;
        };

        self.published.send_replace(None);
        teardown(&held.session).await
    }

    /// Send `body` to the configured recipient. Never fails, never retries.
    ///
    /// Returns whether the transport accepted the message.
    pub async fn send(&self, body: &str) -> bool {
        let current = self.current.lock().await;

        let Some(held) = current.as_ref() else {
            warn!("No active chat session, dropping message");
            return false;
        };

        info!(
            session_id = %held.session.id(),
            to = %held.recipient,
            "Sending message"
        );
        debug!(body = %body, "Message body");

        match held
            .session
            .send_message(&held.recipient, body, MessageKind::Chat)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    session_id = %held.session.id(),
                    to = %held.recipient,
                    error = %e,
                    "Send message failed, dropping message"
                );
                false
            }
        }
    }

    /// Send a PNG image to the recipient. Same best-effort policy as `send`.
    pub async fn send_image(&self, path: &Path) -> bool {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read image, skipping");
                return false;
            }
        };

        if data.is_empty() {
            debug!(path = %path.display(), "Image file is empty, skipping");
            return false;
        }

        let current = self.current.lock().await;
        let Some(held) = current.as_ref() else {
            warn!(path = %path.display(), "No active chat session, dropping image");
            return false;
        };

        info!(
            session_id = %held.session.id(),
            to = %held.recipient,
            path = %path.display(),
            bytes = data.len(),
            "Sending image"
        );

        match held
            .session
            .send_image(&held.recipient, "image/png", data)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    session_id = %held.session.id(),
                    path = %path.display(),
                    error = %e,
                    "Send image failed, dropping image"
                );
                false
            }
        }
    }

    /// Disconnect and stop the background driver.
    ///
    /// Returns the disconnect outcome; the driver is given a bounded time
    /// to drain before it is aborted.
    pub async fn shutdown(&self) -> DisconnectOutcome {
        let outcome = self.disconnect().await;
        self.driver.shutdown().await;
        outcome
    }

    /// Whether inbound chat messages get an acknowledgement reply.
    pub fn set_reply_to_inbound(&self, enabled: bool) {
        self.reply_to_inbound.store(enabled, Ordering::SeqCst);
    }

    /// State of the held session, if any.
    pub async fn state(&self) -> Option<SessionState> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|held| held.session.state())
    }

    /// Id of the held session, if any.
    pub async fn current_session_id(&self) -> Option<Uuid> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|held| held.session.id())
    }

    pub fn driver(&self) -> &BackgroundDriver {
        &self.driver
    }
}

async fn teardown(session: &Arc<dyn ChatSession>) -> DisconnectOutcome {
    info!(session_id = %session.id(), "Disconnecting chat session");

    match session.disconnect().await {
        Ok(()) => DisconnectOutcome::Clean,
        Err(e) => {
            warn!(
                session_id = %session.id(),
                error = %e,
                "Disconnect failed, dropping session anyway"
            );
            DisconnectOutcome::Failed
        }
    }
}
