use axum::{
    extract::{ConnectInfo, Path, RawQuery, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::gate::EvaluationContext;
use crate::handlers::view::{console_cookie, console_host, mounted_view, render_view};
use crate::protect::protect;
use crate::services::console::CONSOLE_COOKIE;
use crate::services::identity::StaticIdentity;
use crate::services::origin::{FixedOrigin, OriginResolver};
use crate::AppState;

/// `GET /admin`
pub async fn dashboard(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AppError> {
    open_section(state, String::new(), query, connect.map(|c| c.0), headers, jar).await
}

/// `GET /admin/:section`: runs the gate for the section and renders the result.
pub async fn section(
    State(state): State<AppState>,
    Path(section): Path<String>,
    RawQuery(query): RawQuery,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AppError> {
    open_section(state, section, query, connect.map(|c| c.0), headers, jar).await
}

async fn open_section(
    state: AppState,
    section: String,
    query: Option<String>,
    peer: Option<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AppError> {
    let section = section.trim_matches('/').to_string();
    let requirements = state
        .routes
        .resolve(&section)
        .cloned()
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Unknown admin section: {}", section)))?;
    let route = if section.is_empty() {
        "/admin".to_string()
    } else {
        format!("/admin/{}", section)
    };

    let identity = StaticIdentity::from_headers(&headers);
    let cookie = jar.get(CONSOLE_COOKIE).map(|c| c.value().to_string());

    // Only identified callers get a console that outlives the request.
    let (host, jar) = if identity.identity().is_some() {
        let (host, created) = state.consoles.get_or_create(cookie.as_deref());
        let jar = if created {
            jar.add(console_cookie(host.id()))
        } else {
            jar
        };
        (host, jar)
    } else {
        let host = cookie
            .as_deref()
            .and_then(|id| state.consoles.get(id))
            .unwrap_or_else(|| state.consoles.transient());
        (host, jar)
    };

    // A reload while a challenge is open re-renders it instead of issuing a new one.
    if let Some(view) = host.view().await {
        let same_admin = match (view.challenge(), identity.identity()) {
            (Some(challenge), Some(identity)) => challenge.admin_id() == identity.id,
            _ => false,
        };
        if same_admin && view.route() == route {
            return Ok(render_view(jar, &view));
        }
    }

    let origin: Arc<dyn OriginResolver> =
        Arc::new(FixedOrigin(state.proxies.caller_origin(&headers, peer)));

    let mut context = EvaluationContext::new(route, requirements);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        context = context.with_query(query);
    }
    if let Some(user_agent) = headers.get(USER_AGENT).and_then(|v| v.to_str().ok()) {
        context = context.with_user_agent(user_agent);
    }

    let deps = state.view_deps(Arc::new(identity), origin, host.sessions().clone());
    let view = protect(deps, context).await;
    host.replace_view(view.clone()).await;
    Ok(render_view(jar, &view))
}

/// `POST /admin/gate/retry`
pub async fn retry(State(state): State<AppState>, jar: CookieJar) -> Result<Response, AppError> {
    let view = mounted_view(&state, &jar).await?;
    view.retry().await?;
    Ok(render_view(jar, &view))
}

/// `POST /admin/logout`: revokes the console's session and forgets the console.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(host) = console_host(&state, &jar) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    state.consoles.remove(host.id()).await;
    tracing::info!("Console logged out");
    let jar = jar.remove(Cookie::build(CONSOLE_COOKIE).path("/admin"));
    (jar, StatusCode::NO_CONTENT).into_response()
}
