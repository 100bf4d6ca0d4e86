//! Session lifecycle integration tests.

mod common;

use chrono::Utc;
use common::Harness;
use gate_service::services::{
    FileMirror, SessionError, SessionManager, SessionMirror, SessionRequest, SessionSettings,
    SessionSignal, SessionStore, SessionValidity,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn request(verified: bool) -> SessionRequest {
    SessionRequest {
        admin_id: Uuid::new_v4(),
        label: "ops@example.com".to_string(),
        origin_ip: "198.51.100.4".to_string(),
        user_agent: Some("integration-test".to_string()),
        two_factor_verified: verified,
        two_factor_enforced: true,
    }
}

#[tokio::test]
async fn test_create_validate_logout_round_trip() {
    let h = Harness::new();

    let token = h.sessions.create_session(request(false)).await.unwrap();
    assert_eq!(token.len(), 64);
    assert!(h.sessions.is_session_valid().await);
    assert_eq!(h.sessions.current_token().as_deref(), Some(token.as_str()));

    h.sessions.logout().await;

    assert!(!h.sessions.is_session_valid().await);
    assert!(h.store.session(&token).unwrap().revoked);
    assert!(h.mirror.load().unwrap().is_none());
}

#[tokio::test]
async fn test_validity_does_not_flip_within_ttl() {
    let h = Harness::new();
    h.sessions.create_session(request(false)).await.unwrap();

    assert!(h.sessions.is_session_valid().await);
    assert!(h.sessions.is_session_valid().await);
}

#[tokio::test]
async fn test_validation_slides_expiry_forward() {
    let h = Harness::new();
    let token = h.sessions.create_session(request(false)).await.unwrap();
    let soon = Utc::now() + chrono::Duration::minutes(5);
    h.store.expire_session(&token, soon);

    assert!(h.sessions.is_session_valid().await);

    let session = h.store.session(&token).unwrap();
    assert!(session.expires_at > Utc::now() + chrono::Duration::minutes(100));
    assert_eq!(h.mirror.load().unwrap().unwrap().expires_at, session.expires_at);
}

#[tokio::test]
async fn test_store_outage_trusts_unexpired_mirror() {
    let h = Harness::new();
    h.sessions.create_session(request(false)).await.unwrap();
    h.store.set_sessions_unavailable(true);

    assert!(matches!(h.sessions.validate().await, SessionValidity::Degraded(_)));
    assert!(h.sessions.is_session_valid().await);
    assert!(h.mirror.load().unwrap().is_some());
}

#[tokio::test]
async fn test_store_outage_never_vouches_for_two_factor() {
    let h = Harness::new();
    let token = h.sessions.create_session(request(true)).await.unwrap();
    assert!(h.sessions.is_two_factor_verified().await);

    h.store.set_sessions_unavailable(true);

    assert!(!h.sessions.is_two_factor_verified().await);
    assert!(!h.sessions.is_two_factor_verified_for(&token).await);
}

#[tokio::test]
async fn test_revoked_session_is_invalid_and_clears_mirror() {
    let h = Harness::new();
    let token = h.sessions.create_session(request(false)).await.unwrap();

    // Revoked elsewhere, e.g. from another console.
    h.store.revoke_session(&token).await.unwrap();

    assert!(matches!(h.sessions.validate().await, SessionValidity::Invalid(_)));
    assert!(h.mirror.load().unwrap().is_none());
}

#[tokio::test]
async fn test_expired_mirror_is_rejected_without_store() {
    let h = Harness::new();
    h.sessions.create_session(request(false)).await.unwrap();
    let mut entry = h.mirror.load().unwrap().unwrap();
    entry.expires_at = Utc::now() - chrono::Duration::seconds(1);
    h.mirror.store(&entry).unwrap();
    h.store.set_sessions_unavailable(true);

    assert!(!h.sessions.is_session_valid().await);
    assert!(h.mirror.load().unwrap().is_none());
}

#[tokio::test]
async fn test_mirror_never_holds_the_verification_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("console.json");
    let h = Harness::new();
    let sessions = SessionManager::new(
        h.store.clone(),
        Arc::new(FileMirror::new(&path)),
        SessionSettings::default(),
    );

    let token = sessions.create_session(request(true)).await.unwrap();

    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(raw["session_token"], token.as_str());
    assert!(raw.get("session_expiry").is_some());
    assert!(raw.get("session_owner").is_some());
    assert!(raw.get("verified_at").is_some());
    assert!(raw.get("two_factor_verified").is_none());
    assert!(sessions.verified_at().is_some());
}

#[tokio::test]
async fn test_deferred_creation_signals_two_factor_required() {
    let h = Harness::with_settings(SessionSettings {
        defer_until_verified: true,
        ..SessionSettings::default()
    });

    let err = h.sessions.create_session(request(false)).await.unwrap_err();
    assert!(matches!(err, SessionError::TwoFactorRequired));
    assert!(h.store.sessions().is_empty());

    let token = h.sessions.create_session(request(true)).await.unwrap();
    assert!(h.store.session(&token).unwrap().two_factor_verified);
}

#[tokio::test]
async fn test_store_refusal_maps_to_two_factor_sentinel() {
    let h = Harness::new();
    h.store.set_refuse_unverified_sessions(true);

    let err = h.sessions.create_session(request(false)).await.unwrap_err();
    assert!(matches!(err, SessionError::TwoFactorRequired));
}

#[tokio::test(start_paused = true)]
async fn test_monitor_logs_out_expired_session() {
    let h = Harness::with_settings(SessionSettings {
        monitor_interval: Duration::from_secs(60),
        ..SessionSettings::default()
    });
    let token = h.sessions.create_session(request(false)).await.unwrap();
    let mut signals = h.sessions.subscribe();

    h.sessions.start_session_monitoring();
    h.sessions.start_session_monitoring();
    assert!(h.sessions.is_monitoring());

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(h.sessions.is_monitoring());
    assert!(!h.store.session(&token).unwrap().revoked);

    h.store.expire_session(&token, Utc::now() - chrono::Duration::seconds(1));
    tokio::time::sleep(Duration::from_secs(60)).await;
    signals.changed().await.unwrap();

    assert_eq!(*signals.borrow(), SessionSignal::Expired);
    assert!(!h.sessions.is_monitoring());
    assert!(h.mirror.load().unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_logout_stops_monitoring() {
    let h = Harness::new();
    h.sessions.create_session(request(false)).await.unwrap();
    h.sessions.start_session_monitoring();

    h.sessions.logout().await;

    assert!(!h.sessions.is_monitoring());
    assert_eq!(*h.sessions.subscribe().borrow(), SessionSignal::LoggedOut);
}
