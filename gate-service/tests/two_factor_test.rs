//! Two-factor challenge integration tests.

mod common;

use common::{admin, admin_with_two_factor, current_code, wrong_code, Harness, TEST_ORIGIN};
use gate_service::models::{AdminIdentity, Role, SecurityEventType, TwoFactorMethod};
use gate_service::services::{ChallengeError, SessionRequest};
use gate_service::two_factor::{ChallengeMode, ChallengeOutcome, ChallengeSeed, TwoFactorChallenge};
use std::sync::Arc;
use std::time::Duration;

async fn open(h: &Harness, admin: &AdminIdentity, with_session: bool) -> Arc<TwoFactorChallenge> {
    let session_token = if with_session {
        Some(
            h.sessions
                .create_session(SessionRequest {
                    admin_id: admin.id,
                    label: admin.label().to_string(),
                    origin_ip: TEST_ORIGIN.to_string(),
                    user_agent: None,
                    two_factor_verified: false,
                    two_factor_enforced: true,
                })
                .await
                .unwrap(),
        )
    } else {
        None
    };
    let seed = ChallengeSeed {
        admin: admin.clone(),
        origin: TEST_ORIGIN.to_string(),
        session_token,
        user_agent: None,
    };
    TwoFactorChallenge::open(h.challenge_deps(), seed, 30).await
}

#[tokio::test]
async fn test_correct_code_marks_existing_session_verified() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));
    let challenge = open(&h, &admin, true).await;
    let token = h.sessions.current_token().unwrap();
    assert!(!h.sessions.is_two_factor_verified().await);

    let outcome = challenge.verify_code(&current_code()).await.unwrap();

    assert_eq!(outcome, ChallengeOutcome::Verified { session_token: token.clone() });
    assert!(h.sessions.is_two_factor_verified().await);
    assert!(challenge.is_closed());
    assert!(!challenge.countdown().is_running());
    assert_eq!(h.store.events_of(SecurityEventType::TwoFactorVerified).len(), 1);
    assert!(h.store.attempts().iter().any(|a| a.success));
}

#[tokio::test]
async fn test_correct_code_without_session_creates_verified_one() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));
    let challenge = open(&h, &admin, false).await;

    let ChallengeOutcome::Verified { session_token } =
        challenge.verify_code(&current_code()).await.unwrap()
    else {
        panic!("expected verification");
    };

    let session = h.store.session(&session_token).unwrap();
    assert!(session.two_factor_verified);
    assert_eq!(session.admin_id, admin.id);
}

#[tokio::test]
async fn test_code_with_separators_is_accepted() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));
    let challenge = open(&h, &admin, true).await;
    let code = current_code();
    let spaced = format!("{} {}", &code[..3], &code[3..]);

    assert!(challenge.verify_code(&spaced).await.is_ok());
}

#[tokio::test]
async fn test_wrong_code_tracks_failure_and_keeps_challenge_open() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));
    let challenge = open(&h, &admin, true).await;

    let err = challenge.verify_code(&wrong_code()).await.unwrap_err();

    assert!(matches!(err, ChallengeError::Incorrect));
    assert!(!challenge.is_closed());
    assert_eq!(challenge.status().error.as_deref(), Some(err.to_string().as_str()));
    assert!(!h.sessions.is_two_factor_verified().await);
    let failures: Vec<_> = h.store.attempts().into_iter().filter(|a| !a.success).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].identity_label, admin.label());
    assert_eq!(h.store.events_of(SecurityEventType::TwoFactorFailed).len(), 1);

    // A later correct code still goes through.
    assert!(challenge.verify_code(&current_code()).await.is_ok());
}

#[tokio::test]
async fn test_malformed_code_is_rejected_like_a_wrong_one() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));
    let challenge = open(&h, &admin, true).await;

    let err = challenge.verify_code("12ab").await.unwrap_err();

    assert!(matches!(err, ChallengeError::Incorrect));
    assert_eq!(h.store.events_of(SecurityEventType::TwoFactorFailed).len(), 1);
}

#[tokio::test]
async fn test_missing_secret_is_not_configured() {
    let h = Harness::new();
    let mut admin = admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator);
    admin.two_factor_secret = None;
    let admin = h.add_admin(admin);
    let challenge = open(&h, &admin, true).await;

    let err = challenge.verify_code(&current_code()).await.unwrap_err();

    assert!(matches!(err, ChallengeError::NotConfigured));
    assert!(challenge.status().error.is_some());
    assert!(h.store.attempts().is_empty());
}

#[tokio::test]
async fn test_backup_code_is_single_use() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));

    let first = open(&h, &admin, true).await;
    first.set_mode(ChallengeMode::Backup);
    assert!(!first.countdown().is_running());
    assert!(first.verify_backup_code("111-222").await.is_ok());

    let stored = h.store.admin(admin.id).unwrap();
    assert_eq!(stored.backup_codes, vec!["333444".to_string(), "555666".to_string()]);
    assert_eq!(h.store.events_of(SecurityEventType::BackupCodeUsed).len(), 1);

    let second = open(&h, &admin, true).await;
    let err = second.verify_backup_code("111222").await.unwrap_err();
    assert!(matches!(err, ChallengeError::Incorrect));
    assert!(second.verify_backup_code("555666").await.is_ok());
}

#[tokio::test]
async fn test_unknown_backup_code_is_rejected() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));
    let challenge = open(&h, &admin, true).await;

    let err = challenge.verify_backup_code("999000").await.unwrap_err();

    assert!(matches!(err, ChallengeError::Incorrect));
    assert_eq!(h.store.admin(admin.id).unwrap().backup_codes.len(), 3);
}

#[tokio::test]
async fn test_switching_modes_clears_the_error() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));
    let challenge = open(&h, &admin, true).await;
    let _ = challenge.verify_code(&wrong_code()).await;
    assert!(challenge.status().error.is_some());

    challenge.set_mode(ChallengeMode::Backup);
    assert!(challenge.status().error.is_none());
    assert_eq!(challenge.mode(), ChallengeMode::Backup);

    challenge.set_mode(ChallengeMode::Code);
    assert!(challenge.countdown().is_running());
}

#[tokio::test]
async fn test_cancel_logs_out_and_closes() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));
    let challenge = open(&h, &admin, true).await;
    let token = h.sessions.current_token().unwrap();

    assert_eq!(challenge.cancel().await, ChallengeOutcome::Cancelled);

    assert!(h.store.session(&token).unwrap().revoked);
    assert!(h.sessions.current_token().is_none());
    assert_eq!(h.store.events_of(SecurityEventType::TwoFactorCancelled).len(), 1);
    assert!(matches!(
        challenge.verify_code(&current_code()).await,
        Err(ChallengeError::Closed)
    ));
    assert!(matches!(challenge.resend().await, Err(ChallengeError::Closed)));
}

#[tokio::test]
async fn test_email_method_sends_code_on_open_and_resend() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Email));
    let challenge = open(&h, &admin, true).await;

    let delivered = h.outbox.last_code_for(&admin.email).unwrap();
    assert_eq!(delivered.len(), 6);

    challenge.resend().await.unwrap();
    assert_eq!(h.outbox.sent().len(), 2);

    let code = h.outbox.last_code_for(&admin.email).unwrap();
    assert!(challenge.verify_code(&code).await.is_ok());
}

#[tokio::test]
async fn test_authenticator_method_sends_no_email() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Authenticator));
    let challenge = open(&h, &admin, true).await;

    challenge.resend().await.unwrap();

    assert!(h.outbox.sent().is_empty());
    assert_eq!(challenge.status().seconds_remaining, 30);
}

#[tokio::test(start_paused = true)]
async fn test_email_code_is_resent_when_window_expires() {
    let h = Harness::new();
    let admin = h.add_admin(admin_with_two_factor(Role::Admin, TwoFactorMethod::Email));
    let challenge = open(&h, &admin, true).await;
    assert_eq!(h.outbox.sent().len(), 1);

    tokio::time::sleep(Duration::from_millis(30_500)).await;

    assert_eq!(h.outbox.sent().len(), 2);
    assert!(challenge.countdown().is_running());
    challenge.close();
}

#[tokio::test]
async fn test_challenge_method_defaults_to_authenticator() {
    let h = Harness::new();
    let mut admin = admin(Role::Admin);
    admin.two_factor_enabled = true;
    admin.two_factor_secret = Some(common::TEST_SECRET.to_string());
    let admin = h.add_admin(admin);

    let challenge = open(&h, &admin, true).await;

    assert_eq!(challenge.method(), TwoFactorMethod::Authenticator);
    assert!(h.outbox.sent().is_empty());
}
