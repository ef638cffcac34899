use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use djanalytics::capture::create_capture_router;
use djanalytics::config::Config;
use djanalytics::session::{MemorySessionStore, SessionStore};
use djanalytics::storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;
    info!("Loaded configuration");

    // Initialize storage
    let storage = storage::connect(&config.database).await?;

    info!("Initializing database...");
    storage.init().await?;
    info!("Database initialized successfully");

    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(
        config.capture.session_max_entries,
        Duration::from_secs(config.capture.session_ttl_secs),
    ));
    info!(
        "Sessions expire after {}s, visitor cookies after {}s",
        config.capture.session_ttl_secs, config.capture.visitor_cookie_max_age_secs
    );
    info!(
        "Client IP trust mode: {:?}",
        config.capture.trusted_proxy_mode
    );

    let router = create_capture_router(storage, sessions, config.capture.clone());

    let addr = format!("{}:{}", config.capture_server.host, config.capture_server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Capture server listening on http://{}", addr);
    info!("   - POST http://{}/capture?dja_id=<tenant uuid>", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Capture server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        // Without a signal handler, run until the process is killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
