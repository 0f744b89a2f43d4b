//! Session manager lifecycle tests.
//!
//! Covered:
//! - Connecting twice tears the first session down before the second is live
//! - Disconnect clears the held session even when teardown fails
//! - Sends without a session are dropped, never raised
//! - Handshake failures are surfaced while the failed session stays registered

use super::harness::{fast_driver_config, identity, MockSessionFactory, SessionEvent};
use crate::session::{
    ChatSession, DisconnectOutcome, Identity, MessageKind, SessionManager, SessionState,
};
use crate::HeraldError;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn manager(factory: &MockSessionFactory) -> SessionManager {
    SessionManager::with_driver_config(Arc::new(factory.clone()), fast_driver_config())
}

#[tokio::test]
async fn send_without_session_is_dropped() {
    let factory = MockSessionFactory::new();
    let sessions = manager(&factory);

    assert!(!sessions.send("Print cube.gcode started").await);
    assert!(factory.world().events().is_empty());
    assert!(sessions.state().await.is_none());
}

#[tokio::test]
async fn send_goes_to_recipient_as_chat() {
    let factory = MockSessionFactory::new();
    let sessions = manager(&factory);

    let session_id = sessions.connect(&identity()).await.unwrap();
    assert!(sessions.send("hello").await);

    let events = factory.world().events();
    assert_eq!(
        events.last(),
        Some(&SessionEvent::Sent {
            session: session_id,
            to: "owner@example.com".to_string(),
            body: "hello".to_string(),
            kind: MessageKind::Chat,
        })
    );

    sessions.shutdown().await;
}

#[tokio::test]
async fn connect_twice_tears_down_first() {
    let factory = MockSessionFactory::new();
    let world = factory.world();
    let sessions = manager(&factory);

    let first = sessions.connect(&identity()).await.unwrap();
    let second = sessions
        .connect(&Identity::new("printer@example.com", "new-pw", "other@example.com"))
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(sessions.current_session_id().await, Some(second));
    assert_eq!(world.live(), 1);
    assert_eq!(world.max_live(), 1, "two sessions were live at once");

    let events = world.events();
    assert_eq!(
        events,
        vec![
            SessionEvent::Connected { session: first },
            SessionEvent::Disconnected { session: first },
            SessionEvent::Connected { session: second },
        ]
    );

    // The new session carries the new recipient
    let latest = world.latest().unwrap();
    assert_eq!(latest.identity().recipient(), "other@example.com");
    assert!(sessions.send("ping").await);
    assert!(matches!(
        world.events().last(),
        Some(SessionEvent::Sent { to, .. }) if to == "other@example.com"
    ));

    sessions.shutdown().await;
}

#[tokio::test]
async fn concurrent_connects_never_overlap() {
    let factory = MockSessionFactory::new();
    let world = factory.world();
    let sessions = Arc::new(manager(&factory));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let sessions = sessions.clone();
        handles.push(tokio::spawn(async move {
            sessions.connect(&identity()).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(world.sessions().len(), 8);
    assert_eq!(world.live(), 1);
    assert_eq!(world.max_live(), 1);

    sessions.shutdown().await;
    assert_eq!(world.live(), 0);
}

#[tokio::test]
async fn disconnect_failure_still_clears_session() {
    let factory = MockSessionFactory::new();
    let world = factory.world();
    let sessions = manager(&factory);

    sessions.connect(&identity()).await.unwrap();
    world.failures.disconnect.store(true, Ordering::SeqCst);

    assert_eq!(sessions.disconnect().await, DisconnectOutcome::Failed);
    assert!(sessions.current_session_id().await.is_none());
    assert!(!sessions.send("after teardown").await);

    // A second disconnect is a no-op
    assert_eq!(sessions.disconnect().await, DisconnectOutcome::NotConnected);

    sessions.shutdown().await;
}

#[tokio::test]
async fn disconnect_clean() {
    let factory = MockSessionFactory::new();
    let sessions = manager(&factory);

    sessions.connect(&identity()).await.unwrap();
    assert_eq!(sessions.state().await, Some(SessionState::Connected));
    assert_eq!(sessions.disconnect().await, DisconnectOutcome::Clean);
    assert_eq!(sessions.state().await, None);

    sessions.shutdown().await;
}

#[tokio::test]
async fn handshake_failure_is_surfaced_and_session_kept() {
    let factory = MockSessionFactory::new();
    let world = factory.world();
    let sessions = manager(&factory);

    let first = sessions.connect(&identity()).await.unwrap();
    world.failures.connect.store(true, Ordering::SeqCst);

    let result = sessions.connect(&identity()).await;
    assert!(matches!(result, Err(HeraldError::Handshake(_))));

    // The previous session was still torn down first
    assert!(world
        .events()
        .contains(&SessionEvent::Disconnected { session: first }));
    let failed = world.latest().unwrap();
    assert_ne!(failed.id(), first);
    assert_eq!(sessions.current_session_id().await, Some(failed.id()));
    assert_eq!(sessions.state().await, Some(SessionState::Failed));
    assert!(!sessions.send("nobody listening").await);
    assert_eq!(world.live(), 0);

    sessions.shutdown().await;
}

#[tokio::test]
async fn send_failure_is_swallowed() {
    let factory = MockSessionFactory::new();
    let world = factory.world();
    let sessions = manager(&factory);

    sessions.connect(&identity()).await.unwrap();
    world.failures.send.store(true, Ordering::SeqCst);

    assert!(!sessions.send("lost").await);
    // The session stays registered; only the message is dropped
    assert!(sessions.current_session_id().await.is_some());

    world.failures.send.store(false, Ordering::SeqCst);
    assert!(sessions.send("delivered").await);
    assert_eq!(world.sent_bodies(), vec!["delivered"]);

    sessions.shutdown().await;
}

#[tokio::test]
async fn send_image_reads_file_and_skips_empty() {
    let factory = MockSessionFactory::new();
    let world = factory.world();
    let sessions = manager(&factory);
    let dir = tempfile::tempdir().unwrap();

    let image = dir.path().join("snapshot.png");
    std::fs::write(&image, [0x89, b'P', b'N', b'G']).unwrap();
    let empty = dir.path().join("empty.png");
    std::fs::write(&empty, b"").unwrap();

    // No session yet
    assert!(!sessions.send_image(&image).await);

    let session_id = sessions.connect(&identity()).await.unwrap();
    assert!(sessions.send_image(&image).await);
    assert!(!sessions.send_image(&empty).await);
    assert!(!sessions.send_image(&dir.path().join("missing.png")).await);

    let images: Vec<SessionEvent> = world
        .events()
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::Image { .. }))
        .collect();
    assert_eq!(
        images,
        vec![SessionEvent::Image {
            session: session_id,
            to: "owner@example.com".to_string(),
            mime: "image/png".to_string(),
            bytes: 4,
        }]
    );

    sessions.shutdown().await;
}
