//! Shared fixtures for gate-service integration tests.
//!
//! Everything runs against `MemoryStore`, so no database is needed.

#![allow(dead_code)]

use async_trait::async_trait;
use gate_service::{
    config::{GateConfig, RouteTable},
    gate::{GateDeps, GateSettings, SecurityGate},
    models::{AdminIdentity, Capability, Identity, Role, SecurityEvent, TwoFactorMethod},
    protect::ViewDeps,
    services::{
        ConsoleRegistry, DefaultSecurityPolicy, FixedOrigin, LockoutPolicy, MemoryMirror,
        MemoryStore, OriginAllowList, OriginDecision, OutboxCodeSender, PolicyError,
        SecurityPolicy, SessionManager, SessionSettings, StaticIdentity, TotpVerifier,
        TrustedProxies,
    },
    two_factor::ChallengeDeps,
    AppState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

pub const TEST_SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";
pub const TEST_ORIGIN: &str = "203.0.113.10";
pub const BACKUP_CODES: [&str; 3] = ["111222", "333444", "555666"];

/// Real ledger-backed policy with switches to force lockout, origin denial or an outage.
pub struct StubPolicy {
    inner: DefaultSecurityPolicy,
    locked: AtomicBool,
    lock_check_down: AtomicBool,
    origin_check_down: AtomicBool,
    denied_origin: Mutex<Option<String>>,
}

impl StubPolicy {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            inner: DefaultSecurityPolicy::new(
                store,
                OriginAllowList::default(),
                TotpVerifier::default(),
                LockoutPolicy::default(),
            ),
            locked: AtomicBool::new(false),
            lock_check_down: AtomicBool::new(false),
            origin_check_down: AtomicBool::new(false),
            denied_origin: Mutex::new(None),
        }
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    pub fn set_lock_check_down(&self, down: bool) {
        self.lock_check_down.store(down, Ordering::SeqCst);
    }

    pub fn set_origin_check_down(&self, down: bool) {
        self.origin_check_down.store(down, Ordering::SeqCst);
    }

    pub fn deny_origin(&self, origin: &str) {
        *self.denied_origin.lock().unwrap() = Some(origin.to_string());
    }
}

#[async_trait]
impl SecurityPolicy for StubPolicy {
    async fn is_account_locked(&self, label: &str) -> Result<bool, PolicyError> {
        if self.lock_check_down.load(Ordering::SeqCst) {
            return Err(PolicyError::Unreachable("lockout service timed out".to_string()));
        }
        if self.locked.load(Ordering::SeqCst) {
            return Ok(true);
        }
        self.inner.is_account_locked(label).await
    }

    async fn is_origin_allowed(&self, origin: &str) -> Result<OriginDecision, PolicyError> {
        if self.origin_check_down.load(Ordering::SeqCst) {
            return Err(PolicyError::Unreachable("origin service timed out".to_string()));
        }
        if self.denied_origin.lock().unwrap().as_deref() == Some(origin) {
            return Ok(OriginDecision::deny(format!("Origin {} is blocked", origin)));
        }
        self.inner.is_origin_allowed(origin).await
    }

    async fn track_login_attempt(&self, label: &str, origin: &str, success: bool) {
        self.inner.track_login_attempt(label, origin, success).await
    }

    async fn log_security_event(&self, event: SecurityEvent) {
        self.inner.log_security_event(event).await
    }

    async fn verify_second_factor(&self, secret: &str, code: &str) -> bool {
        self.inner.verify_second_factor(secret, code).await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub policy: Arc<StubPolicy>,
    pub outbox: Arc<OutboxCodeSender>,
    pub mirror: Arc<MemoryMirror>,
    pub sessions: Arc<SessionManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SessionSettings::default())
    }

    pub fn with_settings(settings: SessionSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let mirror = Arc::new(MemoryMirror::new());
        let sessions = Arc::new(SessionManager::new(store.clone(), mirror.clone(), settings));
        Self {
            policy: Arc::new(StubPolicy::new(store.clone())),
            outbox: Arc::new(OutboxCodeSender::new()),
            store,
            mirror,
            sessions,
        }
    }

    pub fn add_admin(&self, admin: AdminIdentity) -> AdminIdentity {
        self.store.put_admin(admin.clone());
        admin
    }

    pub fn gate_deps(&self, identity: Option<Identity>) -> GateDeps {
        let identity = match identity {
            Some(identity) => StaticIdentity::new(identity),
            None => StaticIdentity::anonymous(),
        };
        GateDeps {
            identity: Arc::new(identity),
            policy: self.policy.clone(),
            directory: self.store.clone(),
            origin: Arc::new(FixedOrigin(TEST_ORIGIN.to_string())),
            sessions: self.sessions.clone(),
        }
    }

    pub fn gate_for(&self, admin: &AdminIdentity) -> SecurityGate {
        SecurityGate::new(self.gate_deps(Some(identity_of(admin))), GateSettings::default())
    }

    pub fn challenge_deps(&self) -> ChallengeDeps {
        ChallengeDeps {
            policy: self.policy.clone(),
            directory: self.store.clone(),
            sessions: self.sessions.clone(),
            sender: self.outbox.clone(),
            codes: TotpVerifier::default(),
        }
    }

    pub fn view_deps(&self, admin: &AdminIdentity) -> ViewDeps {
        ViewDeps {
            gate: self.gate_deps(Some(identity_of(admin))),
            settings: GateSettings::default(),
            sender: self.outbox.clone(),
            codes: TotpVerifier::default(),
            challenge_window_secs: 30,
        }
    }

    /// Router state sharing this harness's store, policy and outbox.
    pub fn app_state(&self) -> AppState {
        self.app_state_behind(TrustedProxies::default())
    }

    /// Router state that believes forwarding headers from `proxies`.
    pub fn app_state_behind(&self, proxies: TrustedProxies) -> AppState {
        AppState {
            config: Arc::new(GateConfig::default()),
            consoles: Arc::new(ConsoleRegistry::new(
                self.store.clone(),
                SessionSettings::default(),
                None,
            )),
            routes: Arc::new(RouteTable::default()),
            policy: self.policy.clone(),
            directory: self.store.clone(),
            proxies,
            sender: self.outbox.clone(),
            codes: TotpVerifier::default(),
            pool: None,
        }
    }
}

pub fn identity_of(admin: &AdminIdentity) -> Identity {
    Identity::new(admin.id, admin.email.clone())
}

pub fn admin(role: Role) -> AdminIdentity {
    let id = Uuid::new_v4();
    AdminIdentity::new(id, format!("{}-{}@example.com", role.as_str(), &id.to_string()[..8]), role)
}

/// Admin holding every capability with an authenticator second factor.
pub fn admin_with_two_factor(role: Role, method: TwoFactorMethod) -> AdminIdentity {
    admin(role)
        .with_capabilities(Capability::ALL)
        .with_two_factor(
            method,
            TEST_SECRET,
            BACKUP_CODES.iter().map(|c| c.to_string()).collect(),
        )
}

fn totp() -> TOTP {
    let bytes = Secret::Encoded(TEST_SECRET.to_string()).to_bytes().unwrap();
    TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes).unwrap()
}

pub fn current_code() -> String {
    totp().generate_current().unwrap()
}

/// A six-digit code outside the accepted skew window.
pub fn wrong_code() -> String {
    let totp = totp();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let accepted: Vec<String> = [now - 60, now - 30, now, now + 30, now + 60]
        .iter()
        .map(|t| totp.generate(*t))
        .collect();
    ["000000", "123456", "654321", "999999"]
        .iter()
        .map(|c| c.to_string())
        .find(|c| !accepted.contains(c))
        .unwrap()
}
