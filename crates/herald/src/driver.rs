//! Background driver that pumps the active chat session.
//!
//! The driver is a single long-lived task. It never binds to a particular
//! session: it follows a `watch` channel published by the
//! [`SessionManager`](crate::SessionManager) and always pumps whichever
//! session is current. Replacing the session therefore never requires a
//! restart.
//!
//! The driver is started lazily, at most once per manager, and is never
//! restarted after shutdown.
//!
//! A session in the `Failed` state is reconnected in place after a backoff
//! delay. The reconnect holds the manager's session slot, so it can never
//! overlap a replacement or a teardown.

use crate::session::{ChatSession, InboundMessage, MessageKind, SessionSlot, SessionState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const BACKOFF_CAP_EXPONENT: u32 = 5;

/// Driver tuning.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// First delay after a failed pump.
    pub backoff_base: Duration,
    /// Upper bound for the pump/reconnect backoff.
    pub backoff_max: Duration,
    /// How long shutdown waits for the task before aborting it.
    pub join_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

/// What the driver task needs from the session manager.
pub(crate) struct DriverContext {
    pub slot: SessionSlot,
    pub sessions: watch::Receiver<Option<Arc<dyn ChatSession>>>,
    pub reply_to_inbound: Arc<AtomicBool>,
}

enum DriverState {
    Idle,
    Running {
        shutdown_tx: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// Handle to the background driver task.
pub struct BackgroundDriver {
    config: DriverConfig,
    state: Mutex<DriverState>,
}

impl BackgroundDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DriverState::Idle),
        }
    }

    /// Spawn the driver task unless it has already been started.
    ///
    /// Returns `true` only on the call that actually spawned it. Must be
    /// called from within a tokio runtime.
    pub(crate) fn ensure_started(&self, context: DriverContext) -> bool {
        let mut state = self.state.lock();

        match *state {
            DriverState::Idle => {
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                let task = tokio::spawn(run(context, shutdown_rx, self.config.clone()));
                *state = DriverState::Running { shutdown_tx, task };
                true
            }
            DriverState::Running { .. } => false,
            DriverState::Stopped => {
                debug!("Background driver already shut down, not restarting");
                false
            }
        }
    }

    /// Whether the driver task is currently running.
    pub fn is_running(&self) -> bool {
        match &*self.state.lock() {
            DriverState::Running { task, .. } => !task.is_finished(),
            _ => false,
        }
    }

    /// Whether the driver has ever been started.
    pub fn has_started(&self) -> bool {
        !matches!(*self.state.lock(), DriverState::Idle)
    }

    /// Signal the driver to stop and wait up to `join_timeout` for it.
    ///
    /// Returns `true` if the task exited in time (or was never started).
    /// A task that overruns the timeout is aborted.
    pub async fn shutdown(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), DriverState::Stopped);

        let DriverState::Running {
            shutdown_tx,
            mut task,
        } = previous
        else {
            return true;
        };

        let _ = shutdown_tx.send(());

        match tokio::time::timeout(self.config.join_timeout, &mut task).await {
            Ok(Ok(())) => {
                info!("Background driver stopped");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Background driver task ended abnormally");
                false
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.join_timeout.as_millis() as u64,
                    "Background driver did not stop in time, aborting"
                );
                task.abort();
                false
            }
        }
    }
}

async fn run(
    context: DriverContext,
    mut shutdown: oneshot::Receiver<()>,
    config: DriverConfig,
) {
    let DriverContext {
        slot,
        mut sessions,
        reply_to_inbound,
    } = context;
    let mut backoff = ReconnectBackoff::new(config.backoff_base, config.backoff_max);

    debug!("Background driver loop running");

    loop {
        let current = sessions.borrow_and_update().clone();

        let session = match current {
            Some(session) => session,
            None => {
                tokio::select! {
                    _ = &mut shutdown => break,
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                backoff.reset();
                continue;
            }
        };

        if session.state() == SessionState::Failed {
            let delay = backoff.next_delay();
            debug!(
                session_id = %session.id(),
                failure_count = backoff.failures,
                retry_in_ms = delay.as_millis() as u64,
                "Waiting to reconnect failed chat session"
            );

            tokio::select! {
                _ = &mut shutdown => break,
                changed = sessions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    backoff.reset();
                    continue;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = reconnect_in_place(&slot, &session) => {}
            }
            continue;
        }

        let result = tokio::select! {
            _ = &mut shutdown => break,
            changed = sessions.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!(session_id = %session.id(), "Chat session replaced, following the new one");
                backoff.reset();
                continue;
            }
            result = session.process() => result,
        };

        match result {
            Ok(inbound) => {
                backoff.reset();
                if let Some(message) = inbound {
                    handle_inbound(&session, message, reply_to_inbound.load(Ordering::SeqCst))
                        .await;
                }
            }
            Err(e) => {
                warn!(
                    session_id = %session.id(),
                    state = session.state().as_str(),
                    error = %e,
                    "Chat session pump failed"
                );

                // Failed sessions back off on the reconnect path
                if session.state() == SessionState::Failed {
                    continue;
                }

                let delay = backoff.next_delay();
                tokio::select! {
                    _ = &mut shutdown => break,
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        backoff.reset();
                        continue;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    debug!("Background driver loop exited");
}

/// Re-run the handshake on `session` if it is still the registered one.
///
/// The slot stays locked for the whole handshake, so the manager cannot
/// replace or tear down the session while it is being revived.
async fn reconnect_in_place(slot: &SessionSlot, session: &Arc<dyn ChatSession>) {
    let held = slot.lock().await;
    let registered = held
        .as_ref()
        .is_some_and(|entry| entry.session.id() == session.id());
    if !registered {
        debug!(session_id = %session.id(), "Failed chat session was replaced, not reconnecting");
        return;
    }

    info!(session_id = %session.id(), "Reconnecting failed chat session");
    if let Err(e) = session.connect().await {
        warn!(session_id = %session.id(), error = %e, "Reconnect attempt failed");
    }
}

async fn handle_inbound(session: &Arc<dyn ChatSession>, message: InboundMessage, reply: bool) {
    let Some(kind) = MessageKind::parse(&message.kind) else {
        debug!(from = %message.from, kind = %message.kind, "Ignoring inbound message");
        return;
    };

    info!(session_id = %session.id(), from = %message.from, "Inbound chat message");

    if !reply {
        return;
    }

    let body = format!("Thanks for sending\n{}", message.body);
    if let Err(e) = session.send_message(&message.from, &body, kind).await {
        warn!(from = %message.from, error = %e, "Failed to acknowledge inbound message");
    }
}

/// Capped exponential backoff for pump failures.
#[derive(Debug)]
struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl ReconnectBackoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    fn reset(&mut self) {
        self.failures = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let shift = self.failures.min(BACKOFF_CAP_EXPONENT);
        self.failures = self.failures.saturating_add(1);
        let delay = self.base.saturating_mul(1u32 << shift);
        delay.min(self.max)
    }
}
