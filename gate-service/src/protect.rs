//! Protected view: mounts a gate for one route, drives the second-factor
//! challenge and re-runs the gate when the session monitor reports expiry.
//! Renders one of `loading | challenge | denial | children`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::task::JoinHandle;

use crate::gate::{
    AccessGrant, EvaluationContext, GateDeps, GateOutcome, GateSettings, GateState, RedirectPlan,
    RunPhase, SecurityGate,
};
use crate::models::CheckReport;
use crate::services::email::CodeSender;
use crate::services::error::{ChallengeError, GateError};
use crate::services::session::SessionSignal;
use crate::services::totp::TotpVerifier;
use crate::two_factor::{
    ChallengeDeps, ChallengeMode, ChallengeOutcome, ChallengeSeed, ChallengeStatus,
    TwoFactorChallenge,
};

const CANCELLED_REASON: &str = "Two-factor verification was cancelled";

/// Everything a protected view needs besides the route itself.
#[derive(Clone)]
pub struct ViewDeps {
    pub gate: GateDeps,
    pub settings: GateSettings,
    pub sender: Arc<dyn CodeSender>,
    pub codes: TotpVerifier,
    pub challenge_window_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChallengeView {
    pub route: String,
    #[serde(flatten)]
    pub status: ChallengeStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialView {
    pub state: GateState,
    pub route: String,
    pub reasons: Vec<String>,
    pub checks: CheckReport,
    pub redirect: Option<RedirectPlan>,
    /// Set once the redirect countdown has elapsed.
    pub redirect_due: Option<String>,
    pub retry_allowed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", content = "body", rename_all = "snake_case")]
pub enum Rendered<T> {
    Loading {
        /// Progress hint from the local mirror. Never authorizes anything.
        verified_at: Option<DateTime<Utc>>,
    },
    Challenge(ChallengeView),
    Denial(DenialView),
    Children(T),
}

impl<T> Rendered<T> {
    pub fn kind(&self) -> &'static str {
        match self {
            Rendered::Loading { .. } => "loading",
            Rendered::Challenge(_) => "challenge",
            Rendered::Denial(_) => "denial",
            Rendered::Children(_) => "children",
        }
    }
}

pub struct ProtectedView {
    gate: SecurityGate,
    context: EvaluationContext,
    challenge_deps: ChallengeDeps,
    challenge_window_secs: u64,
    challenge: Mutex<Option<Arc<TwoFactorChallenge>>>,
    cancelled: AtomicBool,
    session_watch: Mutex<Option<JoinHandle<()>>>,
    ops: tokio::sync::Mutex<()>,
}

/// Mount a protected view for `context` and run its gate once.
pub async fn protect(deps: ViewDeps, context: EvaluationContext) -> Arc<ProtectedView> {
    ProtectedView::mount(deps, context).await
}

impl ProtectedView {
    pub async fn mount(deps: ViewDeps, context: EvaluationContext) -> Arc<Self> {
        let challenge_deps = ChallengeDeps {
            policy: deps.gate.policy.clone(),
            directory: deps.gate.directory.clone(),
            sessions: deps.gate.sessions.clone(),
            sender: deps.sender,
            codes: deps.codes,
        };
        let view = Arc::new(Self {
            gate: SecurityGate::new(deps.gate, deps.settings),
            context,
            challenge_deps,
            challenge_window_secs: deps.challenge_window_secs,
            challenge: Mutex::new(None),
            cancelled: AtomicBool::new(false),
            session_watch: Mutex::new(None),
            ops: tokio::sync::Mutex::new(()),
        });

        view.watch_session();
        {
            let _guard = view.ops.lock().await;
            let result = view.gate.evaluate(view.context.clone()).await;
            view.apply(result).await;
        }
        view
    }

    pub fn route(&self) -> &str {
        &self.context.route
    }

    pub fn gate(&self) -> &SecurityGate {
        &self.gate
    }

    pub fn challenge(&self) -> Option<Arc<TwoFactorChallenge>> {
        self.challenge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn render(&self) -> Rendered<AccessGrant> {
        self.render_with(Clone::clone)
    }

    /// Render the current state, building children from the access grant.
    pub fn render_with<T>(&self, children: impl FnOnce(&AccessGrant) -> T) -> Rendered<T> {
        if self.is_cancelled() {
            return Rendered::Denial(DenialView {
                state: GateState::Failed,
                route: self.context.route.clone(),
                reasons: vec![CANCELLED_REASON.to_string()],
                checks: CheckReport::new(),
                redirect: None,
                redirect_due: None,
                retry_allowed: true,
            });
        }

        let outcome = match (self.gate.phase(), self.gate.last_outcome()) {
            (RunPhase::Settled, Some(outcome)) => outcome,
            _ => {
                return Rendered::Loading {
                    verified_at: self.gate.sessions().verified_at(),
                }
            }
        };

        match outcome.state {
            GateState::Verified => match &outcome.granted {
                Some(grant) => Rendered::Children(children(grant)),
                None => Rendered::Loading { verified_at: None },
            },
            GateState::TwoFactorRequired => match self.challenge() {
                Some(challenge) => Rendered::Challenge(ChallengeView {
                    route: outcome.route,
                    status: challenge.status(),
                }),
                None => Rendered::Loading {
                    verified_at: self.gate.sessions().verified_at(),
                },
            },
            GateState::Failed | GateState::Locked => {
                let redirect_due = self.gate.redirect_signal().borrow().clone();
                Rendered::Denial(DenialView {
                    state: outcome.state,
                    route: outcome.route,
                    reasons: outcome.reasons,
                    checks: outcome.checks,
                    redirect: outcome.redirect,
                    redirect_due,
                    retry_allowed: outcome.retry_allowed,
                })
            }
            GateState::Checking => Rendered::Loading {
                verified_at: self.gate.sessions().verified_at(),
            },
        }
    }

    pub async fn submit_code(&self, code: &str) -> Result<(), ChallengeError> {
        let _guard = self.ops.lock().await;
        let challenge = self.challenge().ok_or(ChallengeError::Closed)?;
        let outcome = challenge.verify_code(code).await?;
        self.resolve_challenge(outcome).await;
        Ok(())
    }

    pub async fn submit_backup_code(&self, code: &str) -> Result<(), ChallengeError> {
        let _guard = self.ops.lock().await;
        let challenge = self.challenge().ok_or(ChallengeError::Closed)?;
        let outcome = challenge.verify_backup_code(code).await?;
        self.resolve_challenge(outcome).await;
        Ok(())
    }

    pub async fn resend(&self) -> Result<(), ChallengeError> {
        let challenge = self.challenge().ok_or(ChallengeError::Closed)?;
        challenge.resend().await
    }

    pub fn set_mode(&self, mode: ChallengeMode) -> Result<(), ChallengeError> {
        let challenge = self.challenge().ok_or(ChallengeError::Closed)?;
        challenge.set_mode(mode);
        Ok(())
    }

    /// Abandon the challenge. The session is logged out and the view shows a retryable denial.
    pub async fn cancel(&self) -> Result<(), ChallengeError> {
        let _guard = self.ops.lock().await;
        let challenge = self.take_challenge().ok_or(ChallengeError::Closed)?;
        challenge.cancel().await;
        self.gate.teardown();
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Operator retry: from `failed`, or after a cancelled challenge.
    pub async fn retry(&self) -> Result<(), GateError> {
        let _guard = self.ops.lock().await;
        if self.cancelled.swap(false, Ordering::SeqCst) {
            let result = self.gate.evaluate(self.context.clone()).await;
            self.apply(result).await;
            return Ok(());
        }
        let outcome = self.gate.retry().await?;
        self.apply(Ok(outcome)).await;
        Ok(())
    }

    /// Drop all state and re-enter the gate at step 1.
    pub async fn reload(&self) {
        let _guard = self.ops.lock().await;
        self.reset();
        let result = self.gate.evaluate(self.context.clone()).await;
        self.apply(result).await;
    }

    /// Unmount: stop timers and monitors. In-flight results are discarded.
    pub fn teardown(&self) {
        if let Some(task) = self
            .session_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.reset();
    }

    fn reset(&self) {
        if let Some(challenge) = self.take_challenge() {
            challenge.close();
        }
        self.cancelled.store(false, Ordering::SeqCst);
        self.gate.teardown();
    }

    fn take_challenge(&self) -> Option<Arc<TwoFactorChallenge>> {
        self.challenge
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn apply(&self, result: Result<GateOutcome, GateError>) {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(route = %self.context.route, error = %e, "Gate run produced no outcome");
                return;
            }
        };

        if let Some(previous) = self.take_challenge() {
            previous.close();
        }
        if outcome.state != GateState::TwoFactorRequired {
            return;
        }
        let Some(ticket) = outcome.challenge else {
            return;
        };

        let challenge = TwoFactorChallenge::open(
            self.challenge_deps.clone(),
            ChallengeSeed::from(ticket),
            self.challenge_window_secs,
        )
        .await;
        *self.challenge.lock().unwrap_or_else(PoisonError::into_inner) = Some(challenge);
    }

    async fn resolve_challenge(&self, outcome: ChallengeOutcome) {
        match outcome {
            ChallengeOutcome::Verified { session_token } => {
                self.take_challenge();
                let result = self.gate.complete_challenge(Some(session_token)).await;
                if let Err(e) = &result {
                    tracing::warn!(route = %self.context.route, error = %e, "Could not resume gate after verification");
                }
                self.apply(result).await;
            }
            ChallengeOutcome::Cancelled => {
                self.take_challenge();
                self.cancelled.store(true, Ordering::SeqCst);
            }
        }
    }

    fn watch_session(self: &Arc<Self>) {
        let mut signals = self.gate.sessions().subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while signals.changed().await.is_ok() {
                let signal = *signals.borrow_and_update();
                if signal != SessionSignal::Expired {
                    continue;
                }
                let Some(view) = weak.upgrade() else {
                    break;
                };
                tracing::info!(route = %view.context.route, "Session expired; reloading protected view");
                view.reload().await;
            }
        });
        *self
            .session_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);
    }
}

impl Drop for ProtectedView {
    fn drop(&mut self) {
        if let Some(task) = self
            .session_watch
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}
