use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::Serialize;

use crate::error::ReviewError;
use crate::types::{
    CheckpointRecord, ClassificationCounts, Clause, ClauseAnalysis, ErrorRecord, NlpFeatures,
    Priority, Recommendation, RiskClassification, RiskScore, SessionState, SessionSummary,
};

/// Deterministic token estimate: whitespace-separated words plus one token
/// per four bytes. Checkpoint accounting depends on this being stable
/// across runs.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.split_whitespace().count() + text.len() / 4) as u64
}

/// Central accumulator for one contract review session. Pure state plus
/// invariant checks; stages contribute results within their declared write
/// scope and only the orchestrator advances `state` and the counters.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisContext {
    pub clauses: Vec<Clause>,
    #[serde(skip)]
    pub features: HashMap<u64, NlpFeatures>,
    pub analyses: BTreeMap<u64, ClauseAnalysis>,
    pub scores: BTreeMap<u64, RiskScore>,
    pub recommendations: Vec<Recommendation>,

    pub clauses_processed: u64,
    pub tokens_processed: u64,
    /// Counters since the last checkpoint; reset to zero on resume.
    pub clauses_since_checkpoint: u64,
    pub tokens_since_checkpoint: u64,

    pub state: SessionState,
    pub checkpoints: Vec<CheckpointRecord>,
    pub errors: Vec<ErrorRecord>,
}

impl AnalysisContext {
    /// Build a context from ingested clauses and optional NLP features.
    /// Enforces the intake contract: ids unique and strictly increasing.
    /// Empty clause text is NOT rejected here; it is a recoverable parse
    /// gap handled by the analyzer stage.
    pub fn new(
        clauses: Vec<Clause>,
        features: HashMap<u64, NlpFeatures>,
    ) -> Result<Self, ReviewError> {
        if clauses.is_empty() {
            return Err(ReviewError::InvalidInput("document has no clauses".into()));
        }
        let mut last: Option<u64> = None;
        for clause in &clauses {
            if let Some(prev) = last {
                if clause.id <= prev {
                    return Err(ReviewError::InvalidInput(format!(
                        "clause ids must be strictly increasing (saw {} after {prev})",
                        clause.id
                    )));
                }
            }
            last = Some(clause.id);
        }
        Ok(Self {
            clauses,
            features,
            analyses: BTreeMap::new(),
            scores: BTreeMap::new(),
            recommendations: Vec::new(),
            clauses_processed: 0,
            tokens_processed: 0,
            clauses_since_checkpoint: 0,
            tokens_since_checkpoint: 0,
            state: SessionState::Running,
            checkpoints: Vec::new(),
            errors: Vec::new(),
        })
    }

    /// The next clause with no recorded score, in document order. Resume
    /// starts here, never from the beginning.
    pub fn next_unprocessed(&self) -> Option<&Clause> {
        self.clauses.iter().find(|c| !self.scores.contains_key(&c.id))
    }

    pub fn features_for(&self, clause_id: u64) -> Option<&NlpFeatures> {
        self.features.get(&clause_id)
    }

    pub fn record_error(
        &mut self,
        clause_id: Option<u64>,
        stage: &str,
        cause: &str,
        recoverable: bool,
    ) {
        self.errors.push(ErrorRecord {
            clause_id,
            stage: stage.to_string(),
            cause: cause.to_string(),
            recoverable,
            created_at: Utc::now(),
        });
    }

    pub fn classification_counts(&self) -> ClassificationCounts {
        let mut counts = ClassificationCounts::default();
        for score in self.scores.values() {
            match score.classification {
                Some(RiskClassification::Critical) => counts.critical += 1,
                Some(RiskClassification::Material) => counts.material += 1,
                Some(RiskClassification::Procedural) => counts.procedural += 1,
                None => {}
            }
        }
        counts
    }

    /// Document-level risk is the dominance maximum over clause
    /// classifications, so one critical clause is not diluted by many benign
    /// ones.
    pub fn document_risk(&self) -> Option<RiskClassification> {
        self.scores.values().filter_map(|s| s.classification).max()
    }

    pub fn recommendation_counts(&self) -> BTreeMap<Priority, u64> {
        let mut counts = BTreeMap::new();
        for rec in &self.recommendations {
            *counts.entry(rec.priority).or_insert(0) += 1;
        }
        counts
    }

    pub fn summary(&self, session_id: u64) -> SessionSummary {
        SessionSummary {
            session_id,
            state: self.state,
            total_clauses: self.clauses.len() as u64,
            clauses_processed: self.clauses_processed,
            tokens_processed: self.tokens_processed,
            classification_counts: self.classification_counts(),
            document_risk: self.document_risk(),
            recommendation_counts: self.recommendation_counts(),
            checkpoint_count: self.checkpoints.len() as u64,
            error_count: self.errors.len() as u64,
        }
    }

    /// Invariant: every processed clause has exactly one analysis and one
    /// score. Holds after COMPLETED and ABORTED sessions alike (parse gaps
    /// are default-filled, never skipped).
    pub fn verify_complete(&self) -> Result<(), ReviewError> {
        for clause in self.clauses.iter().take(self.clauses_processed as usize) {
            if !self.analyses.contains_key(&clause.id) {
                return Err(ReviewError::InvalidInput(format!(
                    "clause {} processed without an analysis",
                    clause.id
                )));
            }
            if !self.scores.contains_key(&clause.id) {
                return Err(ReviewError::InvalidInput(format!(
                    "clause {} processed without a risk score",
                    clause.id
                )));
            }
        }
        Ok(())
    }
}
