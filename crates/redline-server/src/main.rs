mod logging;
mod routes;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use redline_core::config::ReviewConfig;
use redline_core::orchestrator::ReviewOrchestrator;

use crate::logging::BroadcastLayer;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (log_tx, _log_rx) = broadcast::channel::<String>(256);
    let log_ring = Arc::new(std::sync::Mutex::new(VecDeque::new()));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "redline_server=info,redline_core=info,redline_rules=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(BroadcastLayer {
            tx: log_tx.clone(),
            ring: Arc::clone(&log_ring),
        })
        .init();

    let config = ReviewConfig::from_env()?;
    config.validate()?;
    let config = Arc::new(config);

    // Negotiation rules: configured file, or the built-in set.
    let rules = if config.rules_path.is_empty() {
        redline_rules::default_rules()
    } else {
        redline_rules::load_rules(&config.rules_path)?
    };
    info!("loaded {} negotiation rules", rules.len());

    let (orchestrator, _event_rx) = ReviewOrchestrator::new(Arc::clone(&config));

    let state = Arc::new(AppState {
        orchestrator,
        config: Arc::clone(&config),
        rules,
        start_time: Instant::now(),
        log_tx,
        log_ring,
    });

    let app = Router::new()
        // Health
        .route("/api/health", get(routes::health))
        // Review sessions
        .route("/api/reviews", post(routes::start_review))
        .route("/api/reviews/:id", get(routes::get_status))
        .route("/api/reviews/:id/resume", post(routes::resume_review))
        .route("/api/reviews/:id/result", get(routes::get_result))
        .route("/api/reviews/:id/recommendations", get(routes::get_recommendations))
        // Events + logs
        .route("/api/events", get(routes::sse_events))
        .route("/api/logs", get(routes::recent_logs))
        .route("/api/logs/stream", get(routes::sse_logs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.bind, config.port);
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
