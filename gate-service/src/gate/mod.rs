//! Admin access gate.
//!
//! Runs the ordered verification pipeline for one protected view and owns its
//! state machine, run guard, retry and redirect policy. Steps 1 through 8
//! short-circuit on the first hard failure; the tail (threat scan and
//! finalization) runs after the pipeline passes or after a successful
//! second-factor challenge.

pub mod state;
pub mod threat;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::{
    AdminIdentity, Capability, CheckId, CheckReport, CheckStatus, Identity, Role, SecurityEvent,
    SecurityEventType, TwoFactorMethod,
};
use crate::services::error::{AuthorizationError, DirectoryError, GateError, SessionError};
use crate::services::origin::{OriginResolver, UNKNOWN_ORIGIN};
use crate::services::policy::SecurityPolicy;
use crate::services::session::{SessionManager, SessionRequest, SessionValidity};
use crate::services::store::{AdminDirectory, IdentityProvider};

pub use state::{GateState, RunPhase};

/// What a protected route demands of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct RouteRequirements {
    pub min_role: Role,
    #[serde(default)]
    pub required_permissions: Vec<Capability>,
    #[serde(default)]
    pub require_two_factor: bool,
}

impl RouteRequirements {
    pub fn new(min_role: Role) -> Self {
        Self {
            min_role,
            required_permissions: Vec::new(),
            require_two_factor: false,
        }
    }

    pub fn permissions(mut self, permissions: impl IntoIterator<Item = Capability>) -> Self {
        self.required_permissions.extend(permissions);
        self
    }

    pub fn two_factor(mut self) -> Self {
        self.require_two_factor = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub route: String,
    pub query: Option<String>,
    pub requirements: RouteRequirements,
    pub user_agent: Option<String>,
}

impl EvaluationContext {
    pub fn new(route: impl Into<String>, requirements: RouteRequirements) -> Self {
        Self {
            route: route.into(),
            query: None,
            requirements,
            user_agent: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Collaborators the gate consults. Injected per console.
#[derive(Clone)]
pub struct GateDeps {
    pub identity: Arc<dyn IdentityProvider>,
    pub policy: Arc<dyn SecurityPolicy>,
    pub directory: Arc<dyn AdminDirectory>,
    pub origin: Arc<dyn OriginResolver>,
    pub sessions: Arc<SessionManager>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectPlan {
    pub target: String,
    #[serde(rename = "delay_seconds", serialize_with = "serialize_secs")]
    pub delay: Duration,
}

fn serialize_secs<S: serde::Serializer>(delay: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(delay.as_secs())
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub failed_redirect: RedirectPlan,
    pub locked_redirect: RedirectPlan,
    pub origin_timeout: Duration,
    pub login_stamp_interval: chrono::Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            failed_redirect: RedirectPlan {
                target: "/login".to_string(),
                delay: Duration::from_secs(5),
            },
            locked_redirect: RedirectPlan {
                target: "/account-locked".to_string(),
                delay: Duration::from_secs(10),
            },
            origin_timeout: Duration::from_secs(5),
            login_stamp_interval: chrono::Duration::hours(1),
        }
    }
}

/// Everything a two-factor challenge needs to run against this evaluation.
#[derive(Debug, Clone)]
pub struct ChallengeTicket {
    pub admin: AdminIdentity,
    pub method: TwoFactorMethod,
    pub origin: String,
    /// Present unless session creation was deferred until verification.
    pub session_token: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessGrant {
    pub admin_id: uuid::Uuid,
    pub email: String,
    pub role: Role,
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub state: GateState,
    pub route: String,
    pub checks: CheckReport,
    pub reasons: Vec<String>,
    pub challenge: Option<ChallengeTicket>,
    pub redirect: Option<RedirectPlan>,
    pub retry_allowed: bool,
    pub granted: Option<AccessGrant>,
}

/// State carried from `2fa_required` to the resumed tail.
#[derive(Debug, Clone)]
struct Pending {
    context: EvaluationContext,
    admin: AdminIdentity,
    origin: String,
    session_token: Option<String>,
    checks: CheckReport,
}

struct Passed {
    admin: AdminIdentity,
    origin: String,
}

enum Halt {
    Failed,
    Locked,
    TwoFactor(Box<Pending>),
}

struct Inner {
    phase: RunPhase,
    state: GateState,
    generation: u64,
    context: Option<EvaluationContext>,
    pending: Option<Pending>,
    last: Option<GateOutcome>,
    redirect_timer: Option<JoinHandle<()>>,
}

pub struct SecurityGate {
    deps: GateDeps,
    settings: GateSettings,
    inner: Mutex<Inner>,
    redirect_due: Arc<watch::Sender<Option<String>>>,
}

impl SecurityGate {
    pub fn new(deps: GateDeps, settings: GateSettings) -> Self {
        let (redirect_due, _) = watch::channel(None);
        Self {
            deps,
            settings,
            inner: Mutex::new(Inner {
                phase: RunPhase::Idle,
                state: GateState::Checking,
                generation: 0,
                context: None,
                pending: None,
                last: None,
                redirect_timer: None,
            }),
            redirect_due: Arc::new(redirect_due),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> GateState {
        self.inner().state
    }

    pub fn phase(&self) -> RunPhase {
        self.inner().phase
    }

    pub fn last_outcome(&self) -> Option<GateOutcome> {
        self.inner().last.clone()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.deps.sessions
    }

    pub fn policy(&self) -> &Arc<dyn SecurityPolicy> {
        &self.deps.policy
    }

    pub fn directory(&self) -> &Arc<dyn AdminDirectory> {
        &self.deps.directory
    }

    /// Receives the redirect target once a denial's countdown elapses.
    pub fn redirect_signal(&self) -> watch::Receiver<Option<String>> {
        self.redirect_due.subscribe()
    }

    /// Run the full pipeline. Rejected while another run of this instance is in flight.
    #[tracing::instrument(skip_all, fields(route = %context.route))]
    pub async fn evaluate(&self, context: EvaluationContext) -> Result<GateOutcome, GateError> {
        let generation = {
            let mut inner = self.inner();
            match inner.phase {
                RunPhase::Running => return Err(GateError::AlreadyRunning),
                RunPhase::Settled => return Err(GateError::AlreadySettled),
                RunPhase::Idle => {}
            }
            inner.phase = RunPhase::Running;
            inner.state = GateState::Checking;
            inner.context = Some(context.clone());
            inner.generation
        };

        let mut checks = CheckReport::new();
        let (outcome, pending) = match self.run_checks(&context, &mut checks).await {
            Ok(passed) => {
                if !self.is_current(generation) {
                    return Err(GateError::TornDown);
                }
                let outcome = self
                    .finalize(&context, &passed.admin, &passed.origin, checks)
                    .await;
                (outcome, None)
            }
            Err(halt) => self.halted(&context, halt, checks),
        };

        self.settle(generation, outcome, pending)
    }

    /// Resume after a successful challenge: runs the threat scan and finalization.
    pub async fn complete_challenge(
        &self,
        session_token: Option<String>,
    ) -> Result<GateOutcome, GateError> {
        let (generation, pending) = {
            let mut inner = self.inner();
            if inner.phase != RunPhase::Settled || inner.state != GateState::TwoFactorRequired {
                return Err(GateError::NotAwaitingChallenge);
            }
            let pending = inner.pending.take().ok_or(GateError::NotAwaitingChallenge)?;
            inner.phase = RunPhase::Running;
            inner.state = GateState::Checking;
            (inner.generation, pending)
        };

        let Pending {
            context,
            admin,
            origin,
            session_token: pending_token,
            mut checks,
        } = pending;

        if pending_token.is_none() && session_token.is_some() {
            checks.record(
                CheckId::Session,
                CheckStatus::Success,
                Some("created on verification".to_string()),
            );
        }
        checks.record(
            CheckId::TwoFactor,
            CheckStatus::Success,
            Some("verified".to_string()),
        );

        let outcome = self.finalize(&context, &admin, &origin, checks).await;
        self.settle(generation, outcome, None)
    }

    /// Operator retry from `failed`. Restarts at step 1.
    pub async fn retry(&self) -> Result<GateOutcome, GateError> {
        let context = {
            let mut inner = self.inner();
            if inner.phase != RunPhase::Settled || inner.state != GateState::Failed {
                return Err(GateError::RetryNotAllowed);
            }
            if let Some(timer) = inner.redirect_timer.take() {
                timer.abort();
            }
            inner.phase = RunPhase::Idle;
            inner.context.clone().ok_or(GateError::RetryNotAllowed)?
        };
        self.redirect_due.send_replace(None);
        tracing::info!(route = %context.route, "Retrying gate evaluation");
        self.evaluate(context).await
    }

    /// Clear the run guard and every timer. Results of in-flight calls are discarded.
    pub fn teardown(&self) {
        let mut inner = self.inner();
        inner.generation = inner.generation.wrapping_add(1);
        inner.phase = RunPhase::Idle;
        inner.state = GateState::Checking;
        inner.pending = None;
        if let Some(timer) = inner.redirect_timer.take() {
            timer.abort();
        }
        drop(inner);
        self.deps.sessions.stop_session_monitoring();
        self.redirect_due.send_replace(None);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner().generation == generation
    }

    fn settle(
        &self,
        generation: u64,
        outcome: GateOutcome,
        pending: Option<Pending>,
    ) -> Result<GateOutcome, GateError> {
        let mut inner = self.inner();
        if inner.generation != generation {
            tracing::debug!(route = %outcome.route, "Discarding result of torn-down evaluation");
            return Err(GateError::TornDown);
        }

        inner.phase = RunPhase::Settled;
        inner.state = outcome.state;
        inner.pending = pending;
        if let Some(timer) = inner.redirect_timer.take() {
            timer.abort();
        }
        if let Some(plan) = outcome.redirect.clone() {
            let redirect_due = self.redirect_due.clone();
            inner.redirect_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(plan.delay).await;
                redirect_due.send_replace(Some(plan.target));
            }));
        }
        inner.last = Some(outcome.clone());

        metrics::counter!("gate_evaluations_total", "state" => outcome.state.as_str()).increment(1);
        Ok(outcome)
    }

    async fn run_checks(
        &self,
        context: &EvaluationContext,
        checks: &mut CheckReport,
    ) -> Result<Passed, Halt> {
        let identity = self.authenticate(context, checks).await?;
        self.check_account_lock(context, &identity, checks).await?;
        let origin = self.check_origin(context, &identity, checks).await?;
        let admin = self.lookup_admin(context, &identity, &origin, checks).await?;
        self.check_role(context, &admin, checks).await?;
        self.check_capabilities(context, &admin, checks).await?;
        let session_token = self.establish_session(context, &admin, &origin, checks).await?;
        self.check_two_factor(context, &admin, &origin, session_token, checks)
            .await?;
        Ok(Passed { admin, origin })
    }

    async fn authenticate(
        &self,
        context: &EvaluationContext,
        checks: &mut CheckReport,
    ) -> Result<Identity, Halt> {
        match self.deps.identity.current_identity().await {
            Ok(identity) => {
                checks.success(CheckId::Authentication);
                Ok(identity)
            }
            Err(e) => {
                let reason = format!("Authentication failed: {}", e);
                checks.fail(CheckId::Authentication, reason.clone());
                self.deps
                    .policy
                    .log_security_event(SecurityEvent::high(
                        None,
                        "anonymous",
                        SecurityEventType::AuthFailed,
                        json!({ "route": context.route, "error": e.to_string() }),
                    ))
                    .await;
                Err(Halt::Failed)
            }
        }
    }

    async fn check_account_lock(
        &self,
        context: &EvaluationContext,
        identity: &Identity,
        checks: &mut CheckReport,
    ) -> Result<(), Halt> {
        match self.deps.policy.is_account_locked(&identity.email).await {
            Ok(false) => {
                checks.success(CheckId::AccountLock);
                Ok(())
            }
            Ok(true) => {
                checks.fail(
                    CheckId::AccountLock,
                    "Account is temporarily locked after repeated failed attempts",
                );
                self.deps
                    .policy
                    .log_security_event(SecurityEvent::high(
                        Some(identity.id),
                        &identity.email,
                        SecurityEventType::AccountLocked,
                        json!({ "route": context.route }),
                    ))
                    .await;
                Err(Halt::Locked)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Account lock check unavailable; continuing");
                checks.record(
                    CheckId::AccountLock,
                    CheckStatus::Success,
                    Some(format!("degraded: {}", e)),
                );
                Ok(())
            }
        }
    }

    async fn check_origin(
        &self,
        context: &EvaluationContext,
        identity: &Identity,
        checks: &mut CheckReport,
    ) -> Result<String, Halt> {
        let origin = match tokio::time::timeout(
            self.settings.origin_timeout,
            self.deps.origin.resolve_caller_origin(),
        )
        .await
        {
            Ok(origin) => origin,
            Err(_) => {
                tracing::warn!("Origin resolution timed out");
                UNKNOWN_ORIGIN.to_string()
            }
        };

        match self.deps.policy.is_origin_allowed(&origin).await {
            Ok(decision) if decision.allowed => {
                checks.record(CheckId::Origin, CheckStatus::Success, Some(origin.clone()));
                Ok(origin)
            }
            Ok(decision) => {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| format!("Access from {} is not permitted", origin));
                checks.fail(CheckId::Origin, reason.clone());
                self.deps
                    .policy
                    .log_security_event(SecurityEvent::critical(
                        Some(identity.id),
                        &identity.email,
                        SecurityEventType::IpBlocked,
                        json!({ "route": context.route, "origin": origin, "reason": reason }),
                    ))
                    .await;
                Err(Halt::Failed)
            }
            Err(e) => {
                tracing::warn!(error = %e, origin = %origin, "Origin check unavailable; continuing");
                checks.record(
                    CheckId::Origin,
                    CheckStatus::Success,
                    Some(format!("degraded: {}", e)),
                );
                Ok(origin)
            }
        }
    }

    async fn lookup_admin(
        &self,
        context: &EvaluationContext,
        identity: &Identity,
        origin: &str,
        checks: &mut CheckReport,
    ) -> Result<AdminIdentity, Halt> {
        let error = match self.deps.directory.find_admin(identity.id).await {
            Ok(Some(admin)) if admin.is_active => {
                checks.success(CheckId::Directory);
                return Ok(admin);
            }
            Ok(Some(_)) => DirectoryError::Inactive(identity.email.clone()),
            Ok(None) => DirectoryError::NotFound(identity.email.clone()),
            Err(e) => DirectoryError::Lookup(e.to_string()),
        };

        checks.fail(CheckId::Directory, error.to_string());
        self.deps
            .policy
            .track_login_attempt(&identity.email, origin, false)
            .await;
        self.deps
            .policy
            .log_security_event(SecurityEvent::medium(
                Some(identity.id),
                &identity.email,
                SecurityEventType::DirectoryLookupFailed,
                json!({ "route": context.route, "error": error.to_string() }),
            ))
            .await;
        Err(Halt::Failed)
    }

    async fn check_role(
        &self,
        context: &EvaluationContext,
        admin: &AdminIdentity,
        checks: &mut CheckReport,
    ) -> Result<(), Halt> {
        let required = context.requirements.min_role;
        if admin.role.satisfies(required) {
            checks.success(CheckId::Role);
            return Ok(());
        }

        let error = AuthorizationError::InsufficientRole {
            required,
            actual: admin.role,
        };
        checks.fail(CheckId::Role, error.to_string());
        self.deps
            .policy
            .log_security_event(SecurityEvent::medium(
                Some(admin.id),
                admin.label(),
                SecurityEventType::InsufficientRole,
                json!({ "route": context.route, "required": required, "actual": admin.role }),
            ))
            .await;
        Err(Halt::Failed)
    }

    async fn check_capabilities(
        &self,
        context: &EvaluationContext,
        admin: &AdminIdentity,
        checks: &mut CheckReport,
    ) -> Result<(), Halt> {
        let missing = admin.missing_capabilities(&context.requirements.required_permissions);
        if missing.is_empty() {
            checks.success(CheckId::Capabilities);
            return Ok(());
        }

        let event_context = json!({ "route": context.route, "missing": missing });
        checks.fail(
            CheckId::Capabilities,
            AuthorizationError::MissingCapabilities(missing).to_string(),
        );
        self.deps
            .policy
            .log_security_event(SecurityEvent::medium(
                Some(admin.id),
                admin.label(),
                SecurityEventType::MissingPermissions,
                event_context,
            ))
            .await;
        Err(Halt::Failed)
    }

    /// Reuse a valid session for this admin or create one. `Ok(None)` when creation
    /// was deferred until the second factor is verified.
    async fn establish_session(
        &self,
        context: &EvaluationContext,
        admin: &AdminIdentity,
        origin: &str,
        checks: &mut CheckReport,
    ) -> Result<Option<String>, Halt> {
        let sessions = &self.deps.sessions;
        match sessions.validate().await {
            SessionValidity::Valid { admin_id } if admin_id == admin.id => {
                if let Some(token) = sessions.current_token() {
                    checks.record(CheckId::Session, CheckStatus::Success, Some("reused".to_string()));
                    return Ok(Some(token));
                }
            }
            SessionValidity::Degraded(degraded) => {
                if let Some(token) = sessions.current_token_for(admin.id) {
                    checks.record(
                        CheckId::Session,
                        CheckStatus::Success,
                        Some(format!("reused; {}", degraded)),
                    );
                    return Ok(Some(token));
                }
            }
            SessionValidity::Valid { .. } | SessionValidity::Invalid(_) => {}
        }

        let request = SessionRequest {
            admin_id: admin.id,
            label: admin.label().to_string(),
            origin_ip: origin.to_string(),
            user_agent: context.user_agent.clone(),
            two_factor_verified: false,
            two_factor_enforced: context.requirements.require_two_factor
                && admin.two_factor_enabled,
        };

        match sessions.create_session(request).await {
            Ok(token) => {
                checks.record(CheckId::Session, CheckStatus::Success, Some("created".to_string()));
                Ok(Some(token))
            }
            Err(SessionError::TwoFactorRequired) => {
                checks.record(
                    CheckId::Session,
                    CheckStatus::Required,
                    Some("finalized after two-factor verification".to_string()),
                );
                Ok(None)
            }
            Err(e) => {
                checks.fail(CheckId::Session, e.to_string());
                self.deps
                    .policy
                    .log_security_event(SecurityEvent::high(
                        Some(admin.id),
                        admin.label(),
                        SecurityEventType::SessionCreationFailed,
                        json!({ "route": context.route, "error": e.to_string() }),
                    ))
                    .await;
                Err(Halt::Failed)
            }
        }
    }

    async fn check_two_factor(
        &self,
        context: &EvaluationContext,
        admin: &AdminIdentity,
        origin: &str,
        session_token: Option<String>,
        checks: &mut CheckReport,
    ) -> Result<(), Halt> {
        if !(context.requirements.require_two_factor && admin.two_factor_enabled) {
            checks.record(CheckId::TwoFactor, CheckStatus::NotRequired, None);
            return Ok(());
        }

        let verified = match &session_token {
            Some(token) => self.deps.sessions.is_two_factor_verified_for(token).await,
            None => false,
        };
        if verified {
            checks.success(CheckId::TwoFactor);
            return Ok(());
        }

        let method = admin.challenge_method();
        checks.record(
            CheckId::TwoFactor,
            CheckStatus::Required,
            Some(method.as_str().to_string()),
        );
        tracing::info!(admin_id = %admin.id, method = %method.as_str(), "Second factor required");
        self.deps
            .policy
            .log_security_event(SecurityEvent::low(
                Some(admin.id),
                admin.label(),
                SecurityEventType::TwoFactorRequired,
                json!({ "route": context.route, "method": method }),
            ))
            .await;

        Err(Halt::TwoFactor(Box::new(Pending {
            context: context.clone(),
            admin: admin.clone(),
            origin: origin.to_string(),
            session_token,
            checks: checks.clone(),
        })))
    }

    /// Steps 9 and 10.
    async fn finalize(
        &self,
        context: &EvaluationContext,
        admin: &AdminIdentity,
        origin: &str,
        mut checks: CheckReport,
    ) -> GateOutcome {
        let query = context.query.as_deref().unwrap_or_default();
        let matches = threat::scan(query);
        if matches.is_empty() {
            checks.record(CheckId::ThreatScan, CheckStatus::Scanned, None);
        } else {
            tracing::warn!(route = %context.route, patterns = ?matches, "Suspicious query string");
            checks.record(
                CheckId::ThreatScan,
                CheckStatus::Scanned,
                Some(format!("matched: {}", matches.join(", "))),
            );
            self.deps
                .policy
                .log_security_event(SecurityEvent::medium(
                    Some(admin.id),
                    admin.label(),
                    SecurityEventType::SuspiciousRequest,
                    json!({ "route": context.route, "query": query, "patterns": matches }),
                ))
                .await;
        }

        let now = Utc::now();
        if admin.login_stamp_due(now, self.settings.login_stamp_interval) {
            if let Err(e) = self.deps.directory.stamp_last_login(admin.id, now).await {
                tracing::warn!(admin_id = %admin.id, error = %e, "Failed to stamp last login");
            }
        }

        let capabilities: Vec<Capability> = admin.capabilities.iter().copied().collect();
        self.deps
            .policy
            .log_security_event(SecurityEvent::low(
                Some(admin.id),
                admin.label(),
                SecurityEventType::AdminAccessGranted,
                json!({
                    "route": context.route,
                    "role": admin.role,
                    "permissions": capabilities,
                    "origin": origin,
                }),
            ))
            .await;
        self.deps
            .policy
            .track_login_attempt(admin.label(), origin, true)
            .await;
        self.deps.sessions.start_session_monitoring();

        tracing::info!(admin_id = %admin.id, route = %context.route, "Admin access granted");
        GateOutcome {
            state: GateState::Verified,
            route: context.route.clone(),
            checks,
            reasons: Vec::new(),
            challenge: None,
            redirect: None,
            retry_allowed: false,
            granted: Some(AccessGrant {
                admin_id: admin.id,
                email: admin.email.clone(),
                role: admin.role,
                capabilities,
            }),
        }
    }

    fn halted(
        &self,
        context: &EvaluationContext,
        halt: Halt,
        checks: CheckReport,
    ) -> (GateOutcome, Option<Pending>) {
        let route = context.route.clone();
        match halt {
            Halt::Failed => {
                let reasons = checks.failure_reasons();
                tracing::warn!(route = %route, reasons = ?reasons, "Admin access denied");
                let outcome = GateOutcome {
                    state: GateState::Failed,
                    route,
                    checks,
                    reasons,
                    challenge: None,
                    redirect: Some(self.settings.failed_redirect.clone()),
                    retry_allowed: true,
                    granted: None,
                };
                (outcome, None)
            }
            Halt::Locked => {
                let reasons = checks.failure_reasons();
                tracing::warn!(route = %route, reasons = ?reasons, "Admin access locked");
                let outcome = GateOutcome {
                    state: GateState::Locked,
                    route,
                    checks,
                    reasons,
                    challenge: None,
                    redirect: Some(self.settings.locked_redirect.clone()),
                    retry_allowed: false,
                    granted: None,
                };
                (outcome, None)
            }
            Halt::TwoFactor(pending) => {
                let ticket = ChallengeTicket {
                    admin: pending.admin.clone(),
                    method: pending.admin.challenge_method(),
                    origin: pending.origin.clone(),
                    session_token: pending.session_token.clone(),
                    user_agent: pending.context.user_agent.clone(),
                };
                let outcome = GateOutcome {
                    state: GateState::TwoFactorRequired,
                    route,
                    checks: pending.checks.clone(),
                    reasons: Vec::new(),
                    challenge: Some(ticket),
                    redirect: None,
                    retry_allowed: false,
                    granted: None,
                };
                (outcome, Some(*pending))
            }
        }
    }
}

impl Drop for SecurityGate {
    fn drop(&mut self) {
        if let Some(timer) = self
            .inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .redirect_timer
            .take()
        {
            timer.abort();
        }
    }
}
