use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use ticketbridge_sync::clients::source::SourceClient;
use ticketbridge_sync::clients::target::TargetClient;
use ticketbridge_sync::config::AppConfig;
use ticketbridge_sync::ratelimit::TokenBucket;
use ticketbridge_sync::registry::MappingRegistry;
use ticketbridge_sync::{metrics, routes, scheduler, AppState};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

/// Outbound pacing, tokens per minute per provider. The inbound ceiling is
/// configurable; these track the providers' published limits.
const SRC_OUTBOUND_PER_MINUTE: u64 = 80;
const TGT_OUTBOUND_PER_MINUTE: u64 = 180;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    ticketbridge_shared::middleware::init_tracing(
        "ticketbridge-sync",
        &config.environment,
        &config.log_level,
    );
    config.validate()?;

    metrics::init();
    let metrics_handle = ticketbridge_shared::middleware::init_metrics();

    let db = ticketbridge_shared::clients::db::create_pool(&config.db_url, config.db_pool_size)?;
    {
        let mut conn = db.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migrations failed: {e}"))?;
    }
    tracing::info!("migrations applied");

    let registry = MappingRegistry::load(Path::new(&config.mapping_path))?;
    tracing::info!(
        mapping_path = %config.mapping_path,
        bidirectional = registry.sync_options.bidirectional,
        sync_comments = registry.sync_options.sync_comments,
        "mapping registry loaded"
    );

    let src_client = SourceClient::new(
        &config.src_api_base,
        &config.src_token,
        Arc::new(TokenBucket::per_minute(SRC_OUTBOUND_PER_MINUTE)),
    )?;
    let tgt_client = TargetClient::new(
        &config.tgt_api_base,
        &config.tgt_token,
        Arc::new(TokenBucket::per_minute(TGT_OUTBOUND_PER_MINUTE)),
    )?;
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let inbound_bucket = |rate: u64| (rate > 0).then(|| TokenBucket::per_minute(rate));
    let port = config.port;
    let max_request_bytes = config.max_request_bytes;

    let state = Arc::new(AppState {
        src_inbound_bucket: inbound_bucket(config.rate_limit_per_minute),
        tgt_inbound_bucket: inbound_bucket(config.rate_limit_per_minute),
        config,
        registry,
        db,
        src_client,
        tgt_client,
        http_client,
        metrics_handle,
        unknown_properties_seen: Mutex::new(Default::default()),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut replay_task = scheduler::spawn_replay_task(state.clone(), shutdown_rx.clone());
    let mut prune_task = scheduler::spawn_prune_task(state.clone(), shutdown_rx);

    let app = Router::new()
        .route("/webhook/src", post(routes::webhooks::src_webhook))
        .route("/webhook/tgt", post(routes::webhooks::tgt_webhook))
        .route("/health", get(routes::health::health))
        .route("/health/ci", get(routes::health::health_ci))
        .route("/metrics", get(routes::health::metrics_endpoint))
        .route("/replay-deadletters", post(routes::replay::replay_deadletters))
        // Admission owns the 413 taxonomy; this is a backstop well above it.
        .layer(DefaultBodyLimit::max(max_request_bytes.saturating_mul(2)))
        .layer(axum::middleware::from_fn(
            ticketbridge_shared::middleware::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "ticketbridge-sync starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the background tasks: finish the current batch, start nothing
    // new, abort after the grace period.
    let _ = shutdown_tx.send(true);
    let tasks = async {
        let _ = (&mut replay_task).await;
        let _ = (&mut prune_task).await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, tasks).await.is_err() {
        tracing::warn!("background tasks exceeded the grace period; aborting");
        replay_task.abort();
        prune_task.abort();
    }
    tracing::info!("ticketbridge-sync stopped");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
