use std::sync::Arc;

use http::{header, Method};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use node_fabric::config::FabricConfig;
use node_fabric::discovery::LocalMetadata;
use node_fabric::registry::{InMemoryNodeStore, NodeStore, PgNodeStore};
use node_fabric::state::{AppState, FabricDeps};
use node_fabric::watchdog;

fn build_app(state: AppState) -> axum::Router {
    // CORS — same-origin by default; hosts embedding the fabric widen this
    // via ALLOWED_ORIGINS.
    let allowed_origins: Vec<_> = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    let cors = if allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::HeaderName::from_static("x-node-token"),
            ])
            .max_age(std::time::Duration::from_secs(86_400))
    };

    // Jaskier Shared Pattern -- rate_limit
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(30)
        .finish()
        .unwrap();

    node_fabric::create_router(state)
        .layer(GovernorLayer::new(governor_conf))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            header::HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            header::HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
}

/// Build `FabricConfig` from the process environment. The core itself
/// never touches `std::env` (see `config.rs`) — this is the one place
/// that does, as the host binary.
fn load_config() -> FabricConfig {
    let mut config = FabricConfig::default();
    if let Ok(secret) = std::env::var("JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }
    if let Ok(issuer) = std::env::var("FABRIC_ISSUER") {
        config.auth.issuer = issuer;
    }
    config
}

async fn build_node_store() -> anyhow::Result<Arc<dyn NodeStore>> {
    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(std::time::Duration::from_secs(3))
                .idle_timeout(std::time::Duration::from_secs(600))
                .max_lifetime(std::time::Duration::from_secs(1800))
                .connect(&database_url)
                .await?;
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                tracing::warn!("Migration skipped (schema likely exists): {}", e);
            }
            Ok(Arc::new(PgNodeStore::new(pool)))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set — node registry is in-memory only, nothing survives a restart");
            Ok(Arc::new(InMemoryNodeStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    enable_ansi();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(true)
            .init();
    }

    dotenvy::dotenv().ok();

    let config = load_config();
    let node_store = build_node_store().await?;

    let deps = FabricDeps {
        node_store,
        llm: None,
        vector: None,
        cache_backend: None,
        local_metadata: LocalMetadata::default(),
    };

    let state = AppState::new(config, deps).await?;

    // ── Spawn background watchdog ──
    let _watchdog = watchdog::spawn(state.clone());

    state.mark_ready();

    let app = build_app(state);

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8088".to_string())
        .parse()?;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    print_banner(port);
    tracing::info!("node fabric listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

// Jaskier Shared Pattern -- enable ANSI colors on Windows consoles
#[cfg(windows)]
fn enable_ansi() {
    use windows::Win32::System::Console::{
        GetConsoleMode, GetStdHandle, SetConsoleMode, ENABLE_VIRTUAL_TERMINAL_PROCESSING,
        STD_ERROR_HANDLE, STD_OUTPUT_HANDLE,
    };
    for std_handle in [STD_OUTPUT_HANDLE, STD_ERROR_HANDLE] {
        unsafe {
            let Ok(handle) = GetStdHandle(std_handle) else {
                continue;
            };
            let mut mode = Default::default();
            if GetConsoleMode(handle, &mut mode).is_ok() {
                let _ = SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING);
            }
        }
    }
}
#[cfg(not(windows))]
fn enable_ansi() {}

fn print_banner(port: u16) {
    println!();
    println!("  \x1b[1;33m>>>  NODE FABRIC  <<<\x1b[0m");
    println!("  \x1b[33mFederated AI node registry & router\x1b[0m");
    println!("  \x1b[1;32mhttp://localhost:{port}\x1b[0m");
    println!();
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
