//! Chat session backed by a local chat gateway sidecar.
//!
//! The gateway owns the real chat network connection. Herald talks to it
//! over a Unix domain socket using the frames in [`crate::protocol`].

use crate::error::{HeraldError, HeraldResult};
use crate::protocol::{announced_len, read_frame, Frame, MAX_FRAME_LEN};
use crate::session::{
    ChatSession, Identity, InboundMessage, MessageKind, SessionFactory, SessionState,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

struct FrameReader {
    half: OwnedReadHalf,
    buf: Vec<u8>,
}

/// A [`ChatSession`] that speaks to the gateway socket.
pub struct GatewaySession {
    id: Uuid,
    socket_path: PathBuf,
    identity: Identity,
    connect_attempts: u32,
    retry_delay: Duration,
    state: parking_lot::Mutex<SessionState>,
    reader: Mutex<Option<FrameReader>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl GatewaySession {
    pub fn new(socket_path: impl Into<PathBuf>, identity: Identity) -> Self {
        Self {
            id: Uuid::new_v4(),
            socket_path: socket_path.into(),
            identity,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            state: parking_lot::Mutex::new(SessionState::Disconnected),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    /// Override the socket connect retry policy.
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(
                session_id = %self.id,
                from = current.as_str(),
                to = state.as_str(),
                "Gateway session state changed"
            );
            *current = state;
        }
    }

    async fn write_frame(&self, frame: &Frame) -> HeraldResult<()> {
        if frame.body_len() > MAX_FRAME_LEN {
            return Err(HeraldError::Delivery(format!(
                "Frame of {} bytes exceeds the {} byte gateway limit",
                frame.body_len(),
                MAX_FRAME_LEN
            )));
        }

        let mut writer = self.writer.lock().await;
        let Some(half) = writer.as_mut() else {
            return Err(HeraldError::Delivery(
                "gateway session is not connected".to_string(),
            ));
        };

        if let Err(e) = half.write_all(&frame.encode()).await {
            *writer = None;
            self.set_state(SessionState::Failed);
            return Err(HeraldError::Delivery(format!(
                "Failed to write to gateway: {}",
                e
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl ChatSession for GatewaySession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    async fn connect(&self) -> HeraldResult<()> {
        self.set_state(SessionState::Connecting);

        let stream =
            match connect_with_retry(&self.socket_path, self.connect_attempts, self.retry_delay)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    self.set_state(SessionState::Failed);
                    return Err(HeraldError::Handshake(e.to_string()));
                }
            };

        let (read_half, mut write_half) = stream.into_split();

        let login = Frame::Login {
            jid: self.identity.jid().to_string(),
            password: self.identity.password().to_string(),
            recipient: self.identity.recipient().to_string(),
        };
        if let Err(e) = write_half.write_all(&login.encode()).await {
            self.set_state(SessionState::Failed);
            return Err(HeraldError::Handshake(format!(
                "Failed to send login to gateway: {}",
                e
            )));
        }

        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(FrameReader {
            half: read_half,
            buf: Vec::with_capacity(4096),
        });

        info!(
            session_id = %self.id,
            jid = %self.identity.jid(),
            path = %self.socket_path.display(),
            "Login sent to chat gateway"
        );
        Ok(())
    }

    async fn disconnect(&self) -> HeraldResult<()> {
        let half = self.writer.lock().await.take();
        // The driver may still be parked on a read; it lets go once it sees
        // the session was unpublished, and the half is dropped with us.
        if let Ok(mut reader) = self.reader.try_lock() {
            *reader = None;
        }

        let result = match half {
            Some(mut half) => {
                let logout = half.write_all(&Frame::Logout.encode()).await;
                let shutdown = half.shutdown().await;
                logout.and(shutdown).map_err(|e| {
                    HeraldError::Teardown(format!("Failed to log out of gateway: {}", e))
                })
            }
            None => Ok(()),
        };

        self.set_state(SessionState::Disconnected);
        result
    }

    async fn send_message(&self, to: &str, body: &str, kind: MessageKind) -> HeraldResult<()> {
        self.write_frame(&Frame::Message {
            to: to.to_string(),
            kind: kind.as_str().to_string(),
            body: body.to_string(),
        })
        .await
    }

    async fn send_image(&self, to: &str, mime: &str, data: Vec<u8>) -> HeraldResult<()> {
        self.write_frame(&Frame::Image {
            to: to.to_string(),
            mime: mime.to_string(),
            data,
        })
        .await
    }

    async fn process(&self) -> HeraldResult<Option<InboundMessage>> {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(HeraldError::NoSession);
        };

        loop {
            if let Some((frame_data, consumed)) = read_frame(&reader.buf) {
                let decoded = Frame::decode(frame_data);
                reader.buf.drain(..consumed);

                match decoded {
                    Ok(Frame::Status { state, detail }) => {
                        self.set_state(state);
                        if state == SessionState::Failed {
                            return Err(HeraldError::Handshake(detail));
                        }
                        if !detail.is_empty() {
                            debug!(session_id = %self.id, detail = %detail, "Gateway status");
                        }
                        return Ok(None);
                    }
                    Ok(Frame::Inbound { from, kind, body }) => {
                        return Ok(Some(InboundMessage { from, kind, body }));
                    }
                    Ok(other) => {
                        debug!(
                            session_id = %self.id,
                            frame_type = other.frame_type(),
                            "Ignoring unexpected frame from gateway"
                        );
                    }
                    Err(e) => {
                        warn!(
                            session_id = %self.id,
                            error = %e,
                            "Skipping unreadable gateway frame"
                        );
                    }
                }
                continue;
            }

            if announced_len(&reader.buf).is_some_and(|len| len > MAX_FRAME_LEN) {
                *guard = None;
                self.set_state(SessionState::Failed);
                return Err(HeraldError::Protocol(
                    "Gateway frame exceeds maximum length".to_string(),
                ));
            }

            let mut chunk = [0u8; 4096];
            let n = match reader.half.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    *guard = None;
                    self.set_state(SessionState::Failed);
                    return Err(HeraldError::Protocol(format!(
                        "Failed to read from gateway: {}",
                        e
                    )));
                }
            };

            if n == 0 {
                *guard = None;
                self.set_state(SessionState::Failed);
                return Err(HeraldError::Protocol(
                    "Gateway closed connection".to_string(),
                ));
            }

            reader.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Attempt to connect to the gateway socket with retries.
pub async fn connect_with_retry(
    socket_path: &Path,
    max_retries: u32,
    retry_delay: Duration,
) -> HeraldResult<UnixStream> {
    for attempt in 1..=max_retries {
        match UnixStream::connect(socket_path).await {
            Ok(stream) => {
                debug!(path = %socket_path.display(), "Connected to chat gateway");
                return Ok(stream);
            }
            Err(e) if attempt < max_retries => {
                warn!(
                    attempt,
                    max_retries,
                    error = %e,
                    "Failed to connect to chat gateway, retrying..."
                );
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                return Err(HeraldError::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to connect to chat gateway at {}: {}",
                        socket_path.display(),
                        e
                    ),
                )));
            }
        }
    }

    Err(HeraldError::Protocol("Max retries exceeded".to_string()))
}

/// Creates [`GatewaySession`]s for a fixed gateway socket.
#[derive(Debug, Clone)]
pub struct GatewaySessionFactory {
    socket_path: PathBuf,
    connect_attempts: u32,
    retry_delay: Duration,
}

impl GatewaySessionFactory {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl SessionFactory for GatewaySessionFactory {
    fn create(&self, identity: &Identity) -> Arc<dyn ChatSession> {
        Arc::new(
            GatewaySession::new(self.socket_path.clone(), identity.clone())
                .with_retry(self.connect_attempts, self.retry_delay),
        )
    }
}
