use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use interview::api_client::HttpInterviewApi;
use interview::auth::StaticTokenProvider;
use interview::config::Config;
use interview::routes::build_router;
use interview::session::clock::SystemClock;
use interview::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting interview session service v{}", env!("CARGO_PKG_VERSION"));

    // Initialize backend client
    let tokens = Arc::new(StaticTokenProvider::new(config.api_token.clone()));
    let api = HttpInterviewApi::new(&config.api_url, tokens)?;
    info!("Interview API client initialized ({})", config.api_url);
    info!(
        "Session budget {}s, completion delay {}ms, backend zone {}",
        config.budget_seconds,
        config.completion_delay.as_millis(),
        config.backend_zone
    );

    // Build app state
    let state = AppState::new(Arc::new(api), &config, Arc::new(SystemClock));

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the UI host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
