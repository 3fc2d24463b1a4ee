use anyhow::Context;
use matchforge_backend::create_app;
use matchforge_engine::{JsonFileStore, Ledger, Matchmaker, RECOMMENDED_RENEW_INTERVAL};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting matchmaking backend...");
    // Load configuration from environment variables or use defaults
    let config = matchforge_backend::config::Config::from_env();
    tracing::info!(
        "Configuration: port={}, token_file_location={}, body_limit={}KB, timeout={}s",
        config.port,
        config.token_file_location,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
    );
    tracing::info!(
        "Expiry: server_ttl={}s (renew every {}s), player_ttl={}s, sweep={}ms",
        config.server_ttl.as_secs(),
        RECOMMENDED_RENEW_INTERVAL.as_secs(),
        config.player_ttl.as_secs(),
        config.sweep_interval.as_millis()
    );
    tracing::info!(
        "Rate limits: register={}/min (burst {}), player={}/sec (burst {}), general={}/sec (burst {})",
        config.rate_limit_register_per_min,
        config.rate_limit_register_burst,
        config.rate_limit_player_per_sec,
        config.rate_limit_player_burst,
        config.rate_limit_general_per_sec,
        config.rate_limit_general_burst
    );
    let credential = config
        .credential
        .clone()
        .context("CREDENTIAL environment variable is required")?;

    // An unreadable ledger is unrecoverable
    let store = JsonFileStore::in_dir(&config.token_file_location);
    let ledger = Ledger::load(store).context("couldn't load the credential ledger")?;
    let engine = Matchmaker::new(ledger, config.engine());
    let reaper = engine.spawn_reaper();

    let fatal = Arc::new(Notify::new());
    let app = create_app(
        engine,
        credential,
        fatal.clone(),
        config.request_body_limit,
        config.request_timeout,
        config.rate_limit(),
    );
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    let ledger_failed = fatal.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { ledger_failed.notified().await })
    .await?;

    reaper.abort();
    anyhow::bail!("credential ledger could not be persisted, refusing to continue")
}
