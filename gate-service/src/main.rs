use gate_service::{
    build_router,
    config::{GateConfig, RouteTable},
    db,
    services::{
        metrics::init_metrics, CodeSender, ConsoleRegistry, DefaultSecurityPolicy,
        OriginAllowList, OutboxCodeSender, PgStore, SmtpCodeSender, TotpVerifier,
        TrustedProxies,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = GateConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    init_metrics().map_err(AppError::InternalError)?;

    tracing::info!(
        service = %config.service_name,
        environment = ?config.environment,
        "Starting admin gate service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    tracing::info!("Database initialized successfully");

    let store = Arc::new(PgStore::new(pool.clone()));

    let allow_list = OriginAllowList::parse(&config.security.allowed_origins.join(","))
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
    let codes = TotpVerifier::new(config.two_factor.code_window_seconds);
    let policy = Arc::new(DefaultSecurityPolicy::new(
        store.clone(),
        allow_list,
        codes,
        config.lockout_policy(),
    ));

    let sender: Arc<dyn CodeSender> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpCodeSender::new(smtp)?),
        None => {
            tracing::warn!("SMTP_HOST not set - email codes are kept in an in-process outbox");
            Arc::new(OutboxCodeSender::new())
        }
    };

    let proxies = TrustedProxies::parse(&config.security.trusted_proxies.join(","))
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;

    let routes = RouteTable::load(config.gate.routes_file.as_deref())?;
    let consoles = Arc::new(ConsoleRegistry::new(
        store.clone(),
        config.session_settings(),
        config.session.mirror_dir.clone(),
    ));
    consoles.start_sweeper(Duration::from_secs(config.session.monitor_interval_seconds));

    let addr: SocketAddr = config
        .common
        .bind_address()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;

    let state = AppState {
        config: Arc::new(config),
        consoles,
        routes: Arc::new(routes),
        policy,
        directory: store,
        proxies,
        sender,
        codes,
        pool: Some(pool),
    };

    let app = build_router(state).await?;

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::InternalError(e.into()))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| AppError::InternalError(e.into()))?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
