use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::config::ReviewConfig;
use crate::context::{estimate_tokens, AnalysisContext};
use crate::error::ReviewError;
use crate::stage::{ContextField, StageOutput, StageSet};
use crate::types::{
    CheckpointReason, CheckpointRecord, Clause, ClauseAnalysis, ContinueDecision, NlpFeatures,
    ReviewEvent, RiskCategory, RiskScore, SessionState, SessionSummary,
};

// ── Caller-facing views ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: u64,
    pub state: SessionState,
    /// Id of the next unprocessed clause, or None when the document is
    /// exhausted.
    pub position: Option<u64>,
    pub clauses_processed: u64,
    pub tokens_processed: u64,
    pub clauses_since_checkpoint: u64,
    pub tokens_since_checkpoint: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub context: AnalysisContext,
    pub summary: SessionSummary,
}

// ── Session bookkeeping ──────────────────────────────────────────────────

struct SessionInner {
    ctx: AnalysisContext,
    recoverable_errors: u32,
    consecutive_failures: u32,
}

struct Session {
    id: u64,
    stages: StageSet,
    /// Locked for whole clause units: concurrent status readers only ever
    /// observe clause-boundary state, never a torn mid-clause one.
    inner: Mutex<SessionInner>,
}

/// Outcome of one clause unit, decided at the clause boundary.
enum ClauseVerdict {
    Ok,
    Abort(String),
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Sequences the per-clause stage pipeline over a document, enforcing the
/// checkpoint protocol: after each whole clause, if either threshold has
/// tripped the session suspends and stays suspended until an explicit
/// continuation decision arrives. There is no auto-continue.
pub struct ReviewOrchestrator {
    config: Arc<ReviewConfig>,
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<ReviewEvent>,
}

impl ReviewOrchestrator {
    pub fn new(config: Arc<ReviewConfig>) -> (Arc<Self>, broadcast::Receiver<ReviewEvent>) {
        let (tx, rx) = broadcast::channel(256);
        let o = Arc::new(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            event_tx: tx,
        });
        (o, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReviewEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: ReviewEvent) {
        let _ = self.event_tx.send(event);
    }

    // ── Caller operations ────────────────────────────────────────────────

    /// Start a review session. Validates the intake contract and the stage
    /// set, then spawns the session driver.
    pub async fn start(
        self: &Arc<Self>,
        clauses: Vec<Clause>,
        features: HashMap<u64, NlpFeatures>,
        stages: StageSet,
    ) -> Result<u64, ReviewError> {
        let ctx = AnalysisContext::new(clauses, features)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session {
            id,
            stages,
            inner: Mutex::new(SessionInner {
                ctx,
                recoverable_errors: 0,
                consecutive_failures: 0,
            }),
        });
        self.sessions.lock().await.insert(id, Arc::clone(&session));

        info!("session {id} started");
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.drive(session).await;
        });
        Ok(id)
    }

    pub async fn status(&self, id: u64) -> Result<SessionStatus, ReviewError> {
        let session = self.get_session(id).await?;
        let inner = session.inner.lock().await;
        Ok(SessionStatus {
            session_id: id,
            state: inner.ctx.state,
            position: inner.ctx.next_unprocessed().map(|c| c.id),
            clauses_processed: inner.ctx.clauses_processed,
            tokens_processed: inner.ctx.tokens_processed,
            clauses_since_checkpoint: inner.ctx.clauses_since_checkpoint,
            tokens_since_checkpoint: inner.ctx.tokens_since_checkpoint,
        })
    }

    /// Apply a continuation decision to a paused session. Rejected (state
    /// unchanged) on any session that is not paused.
    pub async fn resume(
        self: &Arc<Self>,
        id: u64,
        decision: ContinueDecision,
    ) -> Result<SessionStatus, ReviewError> {
        let session = self.get_session(id).await?;
        let aborted = {
            let mut inner = session.inner.lock().await;
            match inner.ctx.state {
                SessionState::Paused => {}
                SessionState::Aborted => return Err(ReviewError::SessionAborted(id)),
                state => {
                    return Err(ReviewError::CheckpointProtocol(format!(
                        "resume called on a {} session",
                        state.as_str()
                    )))
                }
            }

            match decision {
                ContinueDecision::Abort => {
                    inner.ctx.state = SessionState::Aborted;
                    info!("session {id} aborted at checkpoint; partial context preserved");
                    true
                }
                ContinueDecision::ModifyAndContinue { rules } => {
                    session.stages.reload_rules(&rules);
                    info!("session {id} rule set replaced ({} rules)", rules.len());
                    inner.ctx.clauses_since_checkpoint = 0;
                    inner.ctx.tokens_since_checkpoint = 0;
                    inner.ctx.state = SessionState::Running;
                    false
                }
                ContinueDecision::Continue => {
                    inner.ctx.clauses_since_checkpoint = 0;
                    inner.ctx.tokens_since_checkpoint = 0;
                    inner.ctx.state = SessionState::Running;
                    false
                }
            }
        };

        if aborted {
            self.emit(ReviewEvent::State {
                session_id: id,
                state: SessionState::Aborted,
            });
        } else {
            self.emit(ReviewEvent::State {
                session_id: id,
                state: SessionState::Running,
            });
            let orchestrator = Arc::clone(self);
            let driven = Arc::clone(&session);
            tokio::spawn(async move {
                orchestrator.drive(driven).await;
            });
        }
        self.status(id).await
    }

    /// Retrieve the finished context. Available for completed sessions and
    /// for aborted ones (partial results); in-flight sessions are a
    /// protocol error.
    pub async fn result(&self, id: u64) -> Result<SessionResult, ReviewError> {
        let session = self.get_session(id).await?;
        let inner = session.inner.lock().await;
        if !inner.ctx.state.is_terminal() {
            return Err(ReviewError::CheckpointProtocol(format!(
                "result requested while session is {}",
                inner.ctx.state.as_str()
            )));
        }
        Ok(SessionResult {
            context: inner.ctx.clone(),
            summary: inner.ctx.summary(id),
        })
    }

    async fn get_session(&self, id: u64) -> Result<Arc<Session>, ReviewError> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(ReviewError::UnknownSession(id))
    }

    // ── Session driver ───────────────────────────────────────────────────

    /// Advance a session clause by clause until it pauses, completes, or
    /// aborts. The inner lock is held for each whole clause unit and
    /// released at the boundary.
    async fn drive(self: Arc<Self>, session: Arc<Session>) {
        loop {
            let mut inner = session.inner.lock().await;
            if inner.ctx.state != SessionState::Running {
                break;
            }

            let Some(clause) = inner.ctx.next_unprocessed().cloned() else {
                self.complete(session.id, &mut inner);
                break;
            };

            let verdict = self.process_clause(session.id, &session.stages, &mut inner, &clause).await;

            // Counters advance only after the whole clause unit.
            let tokens = estimate_tokens(&clause.text);
            inner.ctx.clauses_processed += 1;
            inner.ctx.tokens_processed += tokens;
            inner.ctx.clauses_since_checkpoint += 1;
            inner.ctx.tokens_since_checkpoint += tokens;

            self.emit(ReviewEvent::Clause {
                session_id: session.id,
                clause_id: clause.id,
                message: format!("clause {} ({}) processed", clause.id, clause.label),
            });

            if let ClauseVerdict::Abort(cause) = verdict {
                self.abort(session.id, &mut inner, &cause);
                break;
            }
            if inner.recoverable_errors >= self.config.max_recoverable_errors {
                let cause = format!(
                    "{} cumulative recoverable errors",
                    inner.recoverable_errors
                );
                self.abort(session.id, &mut inner, &cause);
                break;
            }
            if inner.consecutive_failures >= self.config.max_consecutive_failures {
                let cause = format!("{} consecutive stage failures", inner.consecutive_failures);
                self.abort(session.id, &mut inner, &cause);
                break;
            }

            // Checkpoint evaluation happens strictly between whole-clause
            // boundaries. Clause count wins the tie when both trip.
            if inner.ctx.clauses_since_checkpoint >= self.config.checkpoint_clauses
                || inner.ctx.tokens_since_checkpoint >= self.config.checkpoint_tokens
            {
                self.pause(session.id, &mut inner, clause.id);
                break;
            }
        }
    }

    /// Run every stage over one clause, applying outputs under the
    /// write-scope check and the documented recovery policy.
    async fn process_clause(
        &self,
        session_id: u64,
        stages: &StageSet,
        inner: &mut SessionInner,
        clause: &Clause,
    ) -> ClauseVerdict {
        let mut clause_failed = false;
        let mut abort_cause: Option<String> = None;

        for stage in stages.iter() {
            match stage.run(&inner.ctx, clause).await {
                Ok(output) => {
                    if !stage.writes().contains(&output.field()) {
                        let cause = format!(
                            "stage '{}' wrote '{}' outside its declared scope",
                            stage.name(),
                            output.field().as_str()
                        );
                        inner.ctx.record_error(Some(clause.id), stage.name(), &cause, false);
                        self.emit(ReviewEvent::Error {
                            session_id,
                            message: cause.clone(),
                        });
                        abort_cause = Some(cause);
                        break;
                    }
                    Self::apply(inner, clause.id, output);
                }
                Err(e) if e.recoverable => {
                    warn!("session {session_id} clause {}: {e}", clause.id);
                    inner.ctx.record_error(Some(clause.id), &e.stage, &e.cause, true);
                    inner.recoverable_errors += 1;
                    // Fill the failed stage's slot immediately so downstream
                    // stages never see a gap.
                    Self::default_fill(inner, clause, stage.writes());
                    self.emit(ReviewEvent::Error {
                        session_id,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("session {session_id} clause {}: fatal: {e}", clause.id);
                    inner.ctx.record_error(Some(clause.id), &e.stage, &e.cause, false);
                    inner.consecutive_failures += 1;
                    clause_failed = true;
                    self.emit(ReviewEvent::Error {
                        session_id,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        // No clause leaves the pipeline without exactly one analysis and
        // one score, even on the failure paths.
        Self::default_fill(
            inner,
            clause,
            &[ContextField::Analyses, ContextField::Scores],
        );

        if let Some(cause) = abort_cause {
            return ClauseVerdict::Abort(cause);
        }
        if !clause_failed {
            inner.consecutive_failures = 0;
        }
        ClauseVerdict::Ok
    }

    fn default_fill(inner: &mut SessionInner, clause: &Clause, fields: &[ContextField]) {
        if fields.contains(&ContextField::Analyses) && !inner.ctx.analyses.contains_key(&clause.id)
        {
            inner.ctx.analyses.insert(
                clause.id,
                ClauseAnalysis::fallback(clause.id, estimate_tokens(&clause.text)),
            );
        }
        if fields.contains(&ContextField::Scores) && !inner.ctx.scores.contains_key(&clause.id) {
            inner.ctx.scores.insert(clause.id, zero_score(clause.id));
        }
    }

    fn apply(inner: &mut SessionInner, clause_id: u64, output: StageOutput) {
        match output {
            StageOutput::Analysis(analysis) => {
                inner.ctx.analyses.insert(clause_id, analysis);
            }
            StageOutput::Score(score) => {
                inner.ctx.scores.insert(clause_id, score);
            }
            StageOutput::Advice {
                recommendations,
                skipped_rules,
            } => {
                // Rule-level skips are logged for audit but stay outside
                // the session abort budget.
                for (_rule_id, reason) in skipped_rules {
                    inner
                        .ctx
                        .record_error(Some(clause_id), "negotiation_advice", &reason, true);
                }
                inner.ctx.recommendations.extend(recommendations);
            }
        }
    }

    // ── State transitions ────────────────────────────────────────────────

    fn pause(&self, session_id: u64, inner: &mut SessionInner, clause_id: u64) {
        let reason = if inner.ctx.clauses_since_checkpoint >= self.config.checkpoint_clauses {
            CheckpointReason::ClauseCount
        } else {
            CheckpointReason::TokenCount
        };
        let record = CheckpointRecord {
            clause_id,
            clauses_processed: inner.ctx.clauses_processed,
            tokens_processed: inner.ctx.tokens_processed,
            reason,
            snapshot_ref: format!("session-{session_id}/clause-{clause_id}"),
            created_at: Utc::now(),
        };
        info!(
            "session {session_id} paused at clause {clause_id} ({:?}): awaiting continuation decision",
            reason
        );
        inner.ctx.checkpoints.push(record);
        inner.ctx.state = SessionState::Paused;
        self.emit(ReviewEvent::Checkpoint {
            session_id,
            message: format!("checkpoint after clause {clause_id}"),
        });
        self.emit(ReviewEvent::State {
            session_id,
            state: SessionState::Paused,
        });
    }

    fn complete(&self, session_id: u64, inner: &mut SessionInner) {
        // Presentation order: priority dominance first, document order
        // within a priority (stable sort preserves insertion order).
        inner
            .ctx
            .recommendations
            .sort_by_key(|r| std::cmp::Reverse(r.priority));
        inner.ctx.state = SessionState::Completed;

        if let Err(e) = inner.ctx.verify_complete() {
            warn!("session {session_id} completeness check failed: {e}");
            self.emit(ReviewEvent::Error {
                session_id,
                message: e.to_string(),
            });
        }

        info!(
            "session {session_id} completed: {} clauses, {} recommendations",
            inner.ctx.clauses_processed,
            inner.ctx.recommendations.len()
        );
        self.emit(ReviewEvent::State {
            session_id,
            state: SessionState::Completed,
        });
    }

    fn abort(&self, session_id: u64, inner: &mut SessionInner, cause: &str) {
        warn!("session {session_id} aborted: {cause}");
        inner.ctx.state = SessionState::Aborted;
        self.emit(ReviewEvent::Error {
            session_id,
            message: format!("session aborted: {cause}"),
        });
        self.emit(ReviewEvent::State {
            session_id,
            state: SessionState::Aborted,
        });
    }
}

fn zero_score(clause_id: u64) -> RiskScore {
    RiskScore {
        clause_id,
        raw: RiskCategory::ALL.iter().map(|c| (*c, 0.0)).collect(),
        factors: Vec::new(),
        aggregate: 0.0,
        classification: None,
    }
}
