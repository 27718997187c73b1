use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use redline_core::analyzer::ClauseAnalysisStage;
use redline_core::config::ReviewConfig;
use redline_core::error::ReviewError;
use redline_core::orchestrator::ReviewOrchestrator;
use redline_core::risk::RiskAssessmentStage;
use redline_core::stage::{ProcessingStage, StageSet};
use redline_core::types::{Clause, ContinueDecision, NegotiationRule, NlpFeatures};
use redline_rules::NegotiationAdviceStage;

// ── AppState ──────────────────────────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Arc<ReviewOrchestrator>,
    pub config: Arc<ReviewConfig>,
    pub rules: Vec<NegotiationRule>,
    pub start_time: Instant,
    pub log_tx: broadcast::Sender<String>,
    pub log_ring: Arc<std::sync::Mutex<VecDeque<String>>>,
}

impl AppState {
    /// Assemble the per-session stage set: analyzer → assessor → advisor.
    pub fn build_stages(&self) -> Result<StageSet, ReviewError> {
        let stages: Vec<Arc<dyn ProcessingStage>> = vec![
            Arc::new(ClauseAnalysisStage::new(Arc::clone(&self.config))),
            Arc::new(RiskAssessmentStage::new(Arc::clone(&self.config))),
            Arc::new(NegotiationAdviceStage::new(self.rules.clone())),
        ];
        StageSet::new(stages)
    }
}

// ── Error helper ──────────────────────────────────────────────────────────

fn review_status(e: &ReviewError) -> StatusCode {
    match e {
        ReviewError::UnknownSession(_) => StatusCode::NOT_FOUND,
        ReviewError::CheckpointProtocol(_) => StatusCode::CONFLICT,
        ReviewError::SessionAborted(_) => StatusCode::GONE,
        ReviewError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn review_error(e: ReviewError) -> (StatusCode, Json<Value>) {
    let status = review_status(&e);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("internal error: {e}");
    }
    (status, Json(json!({ "error": e.to_string() })))
}

// ── Request body types ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct StartReviewBody {
    pub clauses: Vec<Clause>,
    #[serde(default)]
    pub features: HashMap<u64, NlpFeatures>,
}

// ── Handlers ──────────────────────────────────────────────────────────────

pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_s": state.start_time.elapsed().as_secs(),
    }))
}

pub(crate) async fn start_review(
    State(state): State<Arc<AppState>>,
    Json(body): Json<StartReviewBody>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let stages = state.build_stages().map_err(review_error)?;
    let id = state
        .orchestrator
        .start(body.clauses, body.features, stages)
        .await
        .map_err(review_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "session_id": id }))))
}

pub(crate) async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let status = state.orchestrator.status(id).await.map_err(review_error)?;
    Ok(Json(json!(status)))
}

pub(crate) async fn resume_review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(decision): Json<ContinueDecision>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let status = state
        .orchestrator
        .resume(id, decision)
        .await
        .map_err(review_error)?;
    Ok(Json(json!(status)))
}

pub(crate) async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let result = state.orchestrator.result(id).await.map_err(review_error)?;
    Ok(Json(json!(result)))
}

pub(crate) async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let result = state.orchestrator.result(id).await.map_err(review_error)?;
    Ok(Json(json!({
        "session_id": id,
        "recommendations": result.context.recommendations,
    })))
}

pub(crate) async fn sse_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.orchestrator.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        msg.ok().and_then(|ev| {
            serde_json::to_string(&ev)
                .ok()
                .map(|data| Ok(Event::default().event(ev.kind()).data(data)))
        })
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("ping"),
    )
}

pub(crate) async fn sse_logs(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.log_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|msg| msg.ok().map(|data| Ok(Event::default().data(data))));
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("ping"),
    )
}

pub(crate) async fn recent_logs(State(state): State<Arc<AppState>>) -> Json<Value> {
    let lines: Vec<String> = state
        .log_ring
        .lock()
        .map(|ring| ring.iter().cloned().collect())
        .unwrap_or_default();
    Json(json!({ "lines": lines }))
}
