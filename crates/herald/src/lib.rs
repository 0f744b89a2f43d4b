//! Herald: chat notifications for 3D-printer jobs.
//!
//! Herald turns print lifecycle events and firmware commands into chat
//! messages. It keeps one authenticated chat session alive in the
//! background and delivers every notification best-effort.
//!
//! # Core Invariants
//!
//! 1. **Single Session**: at most one chat session is live at a time
//! 2. **Log-and-Continue**: no failure propagates to the host; every one is logged
//! 3. **Copy-on-Write Rules**: readers never observe a half-rebuilt rule set
//! 4. **One Driver**: the background driver starts once and is never restarted
//!
//! # Architecture
//!
//! ```text
//! Host events -> Herald -> NotificationEngine -> SessionManager -> ChatSession
//!                                 ^                    |
//!                             RuleStore         BackgroundDriver (pump, reconnect)
//! ```

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod host;
pub mod paths;
pub mod protocol;
pub mod rules;
pub mod session;

#[cfg(test)]
mod tests;

pub use config::{AccountConfig, HeraldConfig, NotificationConfig};
pub use driver::{BackgroundDriver, DriverConfig};
pub use engine::{NotificationEngine, NotificationSink};
pub use error::{HeraldError, HeraldResult};
pub use gateway::{GatewaySession, GatewaySessionFactory};
pub use host::{Herald, HostEvent};
pub use paths::Paths;
pub use rules::{Rule, RuleParseError, RuleSet, RuleSource, RuleStore};
pub use session::{
    ChatSession, DisconnectOutcome, Identity, InboundMessage, MessageKind, SessionFactory,
    SessionManager, SessionState,
};
