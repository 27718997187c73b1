use std::collections::HashMap;
use std::sync::Arc;

use redline_core::analyzer::ClauseAnalysisStage;
use redline_core::config::ReviewConfig;
use redline_core::error::ReviewError;
use redline_core::orchestrator::ReviewOrchestrator;
use redline_core::risk::RiskAssessmentStage;
use redline_core::stage::StageSet;
use redline_core::types::{
    CheckpointReason, Clause, ClauseTag, ContinueDecision, SessionState,
};

// ── helpers ──────────────────────────────────────────────────────────────

fn config() -> Arc<ReviewConfig> {
    Arc::new(ReviewConfig::default())
}

fn stages(config: &Arc<ReviewConfig>) -> StageSet {
    StageSet::new(vec![
        Arc::new(ClauseAnalysisStage::new(Arc::clone(config))),
        Arc::new(RiskAssessmentStage::new(Arc::clone(config))),
    ])
    .expect("valid stage set")
}

fn clause(id: u64, text: &str) -> Clause {
    Clause {
        id,
        label: format!("Section {id}"),
        text: text.into(),
        span: None,
    }
}

/// A clause of roughly `words * 2.25` estimated tokens ("terms " is five
/// bytes plus the space).
fn filler_clause(id: u64, words: usize) -> Clause {
    clause(id, &"terms ".repeat(words))
}

/// ~500 estimated tokens, well under the 3000-token threshold in groups of
/// three, so the clause-count threshold always wins.
fn mid_clause(id: u64) -> Clause {
    filler_clause(id, 220)
}

async fn wait_for_state(orch: &Arc<ReviewOrchestrator>, id: u64, state: SessionState) {
    for _ in 0..500 {
        let status = orch.status(id).await.expect("status");
        if status.state == state {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("session {id} never reached {state:?}");
}

// ── checkpoint cadence ───────────────────────────────────────────────────

#[tokio::test]
async fn seven_clause_scenario_pauses_at_three_and_six() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    let clauses: Vec<Clause> = (1..=7).map(mid_clause).collect();

    let id = orch
        .start(clauses, HashMap::new(), stages(&config))
        .await
        .expect("start");

    wait_for_state(&orch, id, SessionState::Paused).await;
    let status = orch.status(id).await.expect("status");
    assert_eq!(status.clauses_processed, 3);
    assert_eq!(status.position, Some(4));

    orch.resume(id, ContinueDecision::Continue).await.expect("resume");
    wait_for_state(&orch, id, SessionState::Paused).await;
    let status = orch.status(id).await.expect("status");
    assert_eq!(status.clauses_processed, 6);
    assert_eq!(status.position, Some(7));
    // Counters were reset at resume: only three clauses since the last
    // checkpoint, not six.
    assert_eq!(status.clauses_since_checkpoint, 3);

    orch.resume(id, ContinueDecision::Continue).await.expect("resume");
    wait_for_state(&orch, id, SessionState::Completed).await;

    let result = orch.result(id).await.expect("result");
    assert_eq!(result.summary.clauses_processed, 7);
    assert_eq!(result.context.checkpoints.len(), 2);
    for checkpoint in &result.context.checkpoints {
        assert_eq!(checkpoint.reason, CheckpointReason::ClauseCount);
    }
}

#[tokio::test]
async fn token_threshold_pauses_before_clause_count() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    // One clause of ~4500 estimated tokens trips the token threshold alone.
    let clauses = vec![filler_clause(1, 2000), mid_clause(2)];

    let id = orch
        .start(clauses, HashMap::new(), stages(&config))
        .await
        .expect("start");

    wait_for_state(&orch, id, SessionState::Paused).await;
    let status = orch.status(id).await.expect("status");
    assert_eq!(status.clauses_processed, 1);

    orch.resume(id, ContinueDecision::Abort).await.expect("abort");
    let result = orch.result(id).await.expect("partial result");
    assert_eq!(result.summary.state, SessionState::Aborted);
    assert_eq!(result.context.checkpoints.len(), 1);
    assert_eq!(
        result.context.checkpoints[0].reason,
        CheckpointReason::TokenCount
    );
}

#[tokio::test]
async fn short_document_completes_without_checkpoints() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    let clauses = vec![mid_clause(1), mid_clause(2)];

    let id = orch
        .start(clauses, HashMap::new(), stages(&config))
        .await
        .expect("start");
    wait_for_state(&orch, id, SessionState::Completed).await;

    let result = orch.result(id).await.expect("result");
    assert!(result.context.checkpoints.is_empty());
    assert_eq!(result.summary.total_clauses, 2);
}

// ── resume protocol ──────────────────────────────────────────────────────

#[tokio::test]
async fn resume_on_completed_session_is_rejected() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    let id = orch
        .start(vec![mid_clause(1)], HashMap::new(), stages(&config))
        .await
        .expect("start");
    wait_for_state(&orch, id, SessionState::Completed).await;

    let err = orch.resume(id, ContinueDecision::Continue).await.unwrap_err();
    assert!(matches!(err, ReviewError::CheckpointProtocol(_)));
    // State unchanged.
    let status = orch.status(id).await.expect("status");
    assert_eq!(status.state, SessionState::Completed);
}

#[tokio::test]
async fn abort_preserves_partial_context() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    let clauses: Vec<Clause> = (1..=7).map(mid_clause).collect();
    let id = orch
        .start(clauses, HashMap::new(), stages(&config))
        .await
        .expect("start");

    wait_for_state(&orch, id, SessionState::Paused).await;
    orch.resume(id, ContinueDecision::Abort).await.expect("abort");

    let result = orch.result(id).await.expect("partial result");
    assert_eq!(result.summary.state, SessionState::Aborted);
    assert_eq!(result.summary.clauses_processed, 3);
    // Every processed clause has its analysis and score, none beyond.
    for clause_id in 1..=3 {
        assert!(result.context.analyses.contains_key(&clause_id));
        assert!(result.context.scores.contains_key(&clause_id));
    }
    assert!(!result.context.scores.contains_key(&4));

    // Any further resume answers the terminal error.
    let err = orch.resume(id, ContinueDecision::Continue).await.unwrap_err();
    assert!(matches!(err, ReviewError::SessionAborted(_)));
}

#[tokio::test]
async fn result_while_paused_is_rejected() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    let clauses: Vec<Clause> = (1..=4).map(mid_clause).collect();
    let id = orch
        .start(clauses, HashMap::new(), stages(&config))
        .await
        .expect("start");
    wait_for_state(&orch, id, SessionState::Paused).await;

    let err = orch.result(id).await.unwrap_err();
    assert!(matches!(err, ReviewError::CheckpointProtocol(_)));
}

#[tokio::test]
async fn unknown_session_is_reported() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    let err = orch.status(999).await.unwrap_err();
    assert!(matches!(err, ReviewError::UnknownSession(999)));
}

// ── intake contract ──────────────────────────────────────────────────────

#[tokio::test]
async fn non_increasing_clause_ids_are_rejected() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    let clauses = vec![mid_clause(3), mid_clause(2)];
    let err = orch
        .start(clauses, HashMap::new(), stages(&config))
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::InvalidInput(_)));
}

#[tokio::test]
async fn empty_document_is_rejected() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    let err = orch
        .start(Vec::new(), HashMap::new(), stages(&config))
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::InvalidInput(_)));
}

// ── parse gaps and error budget ──────────────────────────────────────────

#[tokio::test]
async fn empty_clause_is_default_filled_not_skipped() {
    let config = config();
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));
    let clauses = vec![
        clause(1, "Payment shall be made within 30 days of invoice receipt."),
        clause(2, "   "),
    ];

    let id = orch
        .start(clauses, HashMap::new(), stages(&config))
        .await
        .expect("start");
    wait_for_state(&orch, id, SessionState::Completed).await;

    let result = orch.result(id).await.expect("result");
    let gap = result.context.analyses.get(&2).expect("default analysis");
    assert!(gap.defaulted);
    assert_eq!(gap.tags, vec![ClauseTag::Doc]);
    assert!(result.context.scores.contains_key(&2));
    assert!(result
        .context
        .errors
        .iter()
        .any(|e| e.clause_id == Some(2) && e.recoverable));
}

#[tokio::test]
async fn cumulative_recoverable_errors_abort_the_session() {
    let mut cfg = ReviewConfig::default();
    // Keep checkpoints out of the way so the error budget trips first.
    cfg.checkpoint_clauses = 100;
    cfg.checkpoint_tokens = 1_000_000;
    let config = Arc::new(cfg);
    let (orch, _rx) = ReviewOrchestrator::new(Arc::clone(&config));

    let clauses: Vec<Clause> = (1..=6).map(|id| clause(id, "")).collect();
    let id = orch
        .start(clauses, HashMap::new(), stages(&config))
        .await
        .expect("start");
    wait_for_state(&orch, id, SessionState::Aborted).await;

    let result = orch.result(id).await.expect("partial result");
    assert_eq!(result.summary.state, SessionState::Aborted);
    assert_eq!(result.summary.clauses_processed, 5);
    // Every processed clause was still default-filled before the abort.
    for clause_id in 1..=5 {
        assert!(result.context.analyses.contains_key(&clause_id));
        assert!(result.context.scores.contains_key(&clause_id));
    }
}
