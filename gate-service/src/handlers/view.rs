//! Shared rendering of a protected view into an HTTP response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;

use crate::gate::{AccessGrant, GateState};
use crate::protect::{ProtectedView, Rendered};
use crate::services::console::{ConsoleHost, CONSOLE_COOKIE};
use crate::AppState;

/// Children of an admin section: what the protected page is handed once access is granted.
#[derive(Debug, Clone, Serialize)]
pub struct SectionView {
    pub route: String,
    pub admin: AccessGrant,
}

pub fn console_cookie(id: &str) -> Cookie<'static> {
    Cookie::build((CONSOLE_COOKIE, id.to_string()))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/admin")
        .build()
}

pub fn status_for<T>(rendered: &Rendered<T>) -> StatusCode {
    match rendered {
        Rendered::Loading { .. } => StatusCode::ACCEPTED,
        Rendered::Challenge(_) => StatusCode::UNAUTHORIZED,
        Rendered::Denial(denial) if denial.state == GateState::Locked => StatusCode::LOCKED,
        Rendered::Denial(_) => StatusCode::FORBIDDEN,
        Rendered::Children(_) => StatusCode::OK,
    }
}

pub fn render_view(jar: CookieJar, view: &ProtectedView) -> Response {
    let rendered = view.render_with(|grant| SectionView {
        route: view.route().to_string(),
        admin: grant.clone(),
    });
    (status_for(&rendered), jar, Json(rendered)).into_response()
}

pub fn console_host(state: &AppState, jar: &CookieJar) -> Option<Arc<ConsoleHost>> {
    jar.get(CONSOLE_COOKIE)
        .and_then(|cookie| state.consoles.get(cookie.value()))
}

/// The view mounted by this console's last page load.
pub async fn mounted_view(
    state: &AppState,
    jar: &CookieJar,
) -> Result<Arc<ProtectedView>, AppError> {
    let host = console_host(state, jar)
        .ok_or_else(|| AppError::Conflict(anyhow::anyhow!("No admin view is mounted")))?;
    host.view()
        .await
        .ok_or_else(|| AppError::Conflict(anyhow::anyhow!("No admin view is mounted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckReport;
    use crate::protect::DenialView;

    fn denial(state: GateState) -> Rendered<()> {
        Rendered::Denial(DenialView {
            state,
            route: "/admin/users".to_string(),
            reasons: Vec::new(),
            checks: CheckReport::new(),
            redirect: None,
            redirect_due: None,
            retry_allowed: false,
        })
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Rendered::Children(())), StatusCode::OK);
        assert_eq!(
            status_for(&Rendered::<()>::Loading { verified_at: None }),
            StatusCode::ACCEPTED
        );
        assert_eq!(status_for(&denial(GateState::Failed)), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&denial(GateState::Locked)), StatusCode::LOCKED);
    }

    #[test]
    fn test_console_cookie_attributes() {
        let cookie = console_cookie("abc");
        assert_eq!(cookie.name(), CONSOLE_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.path(), Some("/admin"));
    }
}
