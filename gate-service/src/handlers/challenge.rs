//! Second-factor endpoints. Each acts on the console's mounted view.

use axum::{extract::State, response::Response, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use service_core::error::AppError;

use crate::handlers::view::{mounted_view, render_view};
use crate::services::error::ChallengeError;
use crate::two_factor::ChallengeMode;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: ChallengeMode,
}

/// Wrong codes are shown inline on the challenge, not returned as errors.
fn inline(result: Result<(), ChallengeError>) -> Result<(), AppError> {
    match result {
        Ok(()) | Err(ChallengeError::Incorrect) | Err(ChallengeError::NotConfigured) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// `POST /admin/2fa/verify`
pub async fn verify_code(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<CodeRequest>,
) -> Result<Response, AppError> {
    let view = mounted_view(&state, &jar).await?;
    inline(view.submit_code(&req.code).await)?;
    Ok(render_view(jar, &view))
}

/// `POST /admin/2fa/backup`
pub async fn verify_backup_code(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<CodeRequest>,
) -> Result<Response, AppError> {
    let view = mounted_view(&state, &jar).await?;
    inline(view.submit_backup_code(&req.code).await)?;
    Ok(render_view(jar, &view))
}

/// `POST /admin/2fa/resend`
pub async fn resend(State(state): State<AppState>, jar: CookieJar) -> Result<Response, AppError> {
    let view = mounted_view(&state, &jar).await?;
    view.resend().await?;
    Ok(render_view(jar, &view))
}

/// `POST /admin/2fa/mode`
pub async fn set_mode(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<ModeRequest>,
) -> Result<Response, AppError> {
    let view = mounted_view(&state, &jar).await?;
    view.set_mode(req.mode)?;
    Ok(render_view(jar, &view))
}

/// `POST /admin/2fa/cancel`
pub async fn cancel(State(state): State<AppState>, jar: CookieJar) -> Result<Response, AppError> {
    let view = mounted_view(&state, &jar).await?;
    view.cancel().await?;
    Ok(render_view(jar, &view))
}
