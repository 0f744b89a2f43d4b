//! Integration tests for Herald.
//!
//! - `harness.rs`          - Mock sessions, factory and recording sink
//! - `session_lifecycle.rs` - Single-session connect/disconnect/send rules
//! - `driver_loop.rs`      - Background driver start, follow, reconnect, drain
//! - `notifications.rs`    - Progress and firmware-command notifications end to end
//! - `host_hooks.rs`       - Startup, settings-saved and shutdown hooks

mod host_hooks;
mod session_lifecycle;
