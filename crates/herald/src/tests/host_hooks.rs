//! Host hook tests.
//!
//! Covered:
//! - Startup builds rules, connects, and announces the server only when asked
//! - A failed startup handshake is retried until the gateway is reachable
//! - Settings saved runs a full reconnect cycle and confirms with a timestamp
//! - Shutdown releases the session and stops the driver
//! - Events are routed to the matching hook

use super::harness::{fast_driver_config, wait_for, MockSessionFactory, SessionEvent};
use crate::config::HeraldConfig;
use crate::host::{Herald, HostEvent};
use crate::rules::RuleSource;
use crate::session::{ChatSession, SessionState};
use regex::Regex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn herald(config: HeraldConfig) -> (Herald, MockSessionFactory) {
    let factory = MockSessionFactory::new();
    let herald = Herald::with_driver_config(
        config,
        Arc::new(factory.clone()),
        fast_driver_config(),
    );
    (herald, factory)
}

fn config_with_rules(rules: &str) -> HeraldConfig {
    let mut config = HeraldConfig::default();
    config.account.jid = "printer@example.com".to_string();
    config.account.password = "pw".to_string();
    config.account.to = "owner@example.com".to_string();
    config.notify.rules = rules.to_string();
    config
}

#[tokio::test]
async fn startup_connects_and_builds_rules() {
    let (herald, factory) = herald(config_with_rules("{M600}{Filament change}"));

    herald.on_startup().await;

    assert_eq!(herald.rules().current().len(), 1);
    assert!(herald.sessions().current_session_id().await.is_some());
    // server_start defaults to off
    assert!(factory.world().sent_bodies().is_empty());

    herald.on_shutdown().await;
}

#[tokio::test]
async fn startup_announces_server_when_enabled() {
    let mut config = config_with_rules("");
    config.notify.server_start = true;
    config.notify.msg_prefix = "MK4".to_string();
    let (herald, factory) = herald(config);

    herald.on_startup().await;

    assert_eq!(factory.world().sent_bodies(), vec!["MK4: Server started"]);

    herald.on_shutdown().await;
}

#[tokio::test]
async fn startup_recovers_from_handshake_failure() {
    let mut config = config_with_rules("{M600}{Filament change}");
    config.notify.server_start = true;
    let (herald, factory) = herald(config);
    let world = factory.world();
    world.failures.connect.store(true, Ordering::SeqCst);

    herald.on_startup().await;
    herald.on_firmware_command_sent("M600").await;

    assert_eq!(herald.sessions().state().await, Some(SessionState::Failed));
    assert!(world.sent_bodies().is_empty());
    // Rules were still built
    assert_eq!(herald.rules().current().len(), 1);

    // The gateway comes up later; the driver brings the session back
    world.failures.connect.store(false, Ordering::SeqCst);
    let session = world.latest().unwrap();
    assert!(wait_for(Duration::from_secs(2), || session.state() == SessionState::Connected).await);

    herald.on_firmware_command_sent("M600").await;
    assert_eq!(world.sent_bodies(), vec!["Filament change"]);

    herald.on_shutdown().await;
}

#[tokio::test]
async fn settings_saved_reconnects_and_confirms() {
    let (herald, factory) = herald(config_with_rules("{M600}{Old}"));
    let world = factory.world();

    herald.on_startup().await;
    let first = herald.sessions().current_session_id().await.unwrap();

    let mut updated = config_with_rules("{M0}{Paused}");
    updated.account.to = "new-owner@example.com".to_string();
    updated.notify.percent_progress = 50;
    herald.on_settings_saved(updated).await;

    let second = herald.sessions().current_session_id().await.unwrap();
    assert_ne!(first, second);
    assert_eq!(world.max_live(), 1);
    assert!(world
        .events()
        .contains(&SessionEvent::Disconnected { session: first }));

    let bodies = world.sent_bodies();
    assert_eq!(bodies.len(), 1);
    let pattern =
        Regex::new(r"^Configuration saved \(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\)$").unwrap();
    assert!(pattern.is_match(&bodies[0]), "unexpected confirmation: {}", bodies[0]);
    assert!(matches!(
        world.events().last(),
        Some(SessionEvent::Sent { to, .. }) if to == "new-owner@example.com"
    ));

    // New rules and thresholds are live
    assert!(herald.rules().current().get("M600").is_none());
    assert_eq!(herald.rules().current().get("M0"), Some("Paused"));
    assert_eq!(herald.engine().config().percent_progress, 50);
    assert_eq!(herald.config().account.to, "new-owner@example.com");

    herald.on_shutdown().await;
}

#[tokio::test]
async fn settings_saved_toggles_inbound_replies() {
    let (herald, factory) = herald(config_with_rules(""));
    herald.on_startup().await;

    let mut updated = config_with_rules("");
    updated.notify.reply_to_inbound = false;
    herald.on_settings_saved(updated).await;

    let session = factory.world().latest().unwrap();
    session.push(super::harness::ProcessStep::Inbound(crate::InboundMessage {
        from: "owner@example.com".to_string(),
        kind: "chat".to_string(),
        body: "hi".to_string(),
    }));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Only the configuration confirmation went out
    assert_eq!(factory.world().sent_bodies().len(), 1);

    herald.on_shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_session_and_driver() {
    let (herald, factory) = herald(config_with_rules(""));

    herald.on_startup().await;
    assert!(herald.sessions().driver().is_running());

    herald.on_shutdown().await;

    assert_eq!(factory.world().live(), 0);
    assert!(herald.sessions().current_session_id().await.is_none());
    assert!(!herald.sessions().driver().is_running());
}

#[tokio::test]
async fn dispatch_routes_events() {
    let (herald, factory) = herald(config_with_rules("{M600}{Filament change}"));
    herald.on_startup().await;

    let events = [
        r#"{"event":"print_progress","path":"cube.gcode","progress":0}"#,
        r#"{"event":"firmware_command","command":"M600 T0"}"#,
        r#"{"event":"print_progress","path":"cube.gcode","progress":100}"#,
    ];
    for raw in events {
        let event: HostEvent = serde_json::from_str(raw).unwrap();
        herald.dispatch(event).await;
    }

    assert_eq!(
        factory.world().sent_bodies(),
        vec![
            "Print cube.gcode started",
            "Filament change",
            "cube.gcode: 100% complete",
            "Print cube.gcode completed",
        ]
    );

    herald.dispatch(HostEvent::Shutdown).await;
    assert!(herald.sessions().current_session_id().await.is_none());
}
