pub mod config;
pub mod db;
pub mod gate;
pub mod handlers;
pub mod models;
pub mod protect;
pub mod services;
pub mod two_factor;

use axum::{
    extract::State,
    middleware::from_fn,
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::{GateConfig, RouteTable};
use crate::gate::GateDeps;
use crate::protect::ViewDeps;
use crate::services::{
    AdminDirectory, CodeSender, ConsoleRegistry, IdentityProvider, OriginResolver, SecurityPolicy,
    SessionManager, TotpVerifier, TrustedProxies,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GateConfig>,
    pub consoles: Arc<ConsoleRegistry>,
    pub routes: Arc<RouteTable>,
    pub policy: Arc<dyn SecurityPolicy>,
    pub directory: Arc<dyn AdminDirectory>,
    /// Peers whose forwarding headers name the caller's origin.
    pub proxies: TrustedProxies,
    pub sender: Arc<dyn CodeSender>,
    pub codes: TotpVerifier,
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn view_deps(
        &self,
        identity: Arc<dyn IdentityProvider>,
        origin: Arc<dyn OriginResolver>,
        sessions: Arc<SessionManager>,
    ) -> ViewDeps {
        ViewDeps {
            gate: GateDeps {
                identity,
                policy: self.policy.clone(),
                directory: self.directory.clone(),
                origin,
                sessions,
            },
            settings: self.config.gate_settings(),
            sender: self.sender.clone(),
            codes: self.codes,
            challenge_window_secs: self.config.two_factor.code_window_seconds,
        }
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let admin_routes = Router::new()
        .route("/admin", get(handlers::dashboard))
        .route("/admin/:section", get(handlers::section))
        .route("/admin/2fa/verify", post(handlers::verify_code))
        .route("/admin/2fa/backup", post(handlers::verify_backup_code))
        .route("/admin/2fa/resend", post(handlers::resend))
        .route("/admin/2fa/mode", post(handlers::set_mode))
        .route("/admin/2fa/cancel", post(handlers::cancel))
        .route("/admin/gate/retry", post(handlers::retry))
        .route("/admin/logout", post(handlers::logout));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(admin_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware));

    Ok(app)
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let database = match &state.pool {
        Some(pool) => {
            let latency = db::health_check(pool).await.map_err(|e| {
                tracing::error!(error = %e, "PostgreSQL health check failed");
                AppError::DatabaseError(anyhow::anyhow!(e))
            })?;
            serde_json::json!({ "status": "up", "latency_ms": latency.as_millis() as u64 })
        }
        None => serde_json::json!({ "status": "not_configured" }),
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "environment": format!("{:?}", state.config.environment),
        "consoles": state.consoles.len(),
        "checks": {
            "postgres": database
        }
    })))
}
