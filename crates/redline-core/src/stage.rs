use async_trait::async_trait;

use crate::context::AnalysisContext;
use crate::error::{ReviewError, StageError};
use crate::types::{Clause, ClauseAnalysis, NegotiationRule, Recommendation, RiskScore};

// ── Declared read/write scopes ───────────────────────────────────────────

/// Context fields a stage may declare in its read/write sets. Clause text
/// and NLP features are inputs to every stage and need no declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextField {
    Analyses,
    Scores,
    Recommendations,
}

impl ContextField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyses => "analyses",
            Self::Scores => "scores",
            Self::Recommendations => "recommendations",
        }
    }
}

// ── Stage output ─────────────────────────────────────────────────────────

/// Skipped-rule report from the advisor: (rule id, reason). Logged for
/// audit, does not count toward the session error budget.
pub type RuleSkip = (String, String);

/// Typed per-clause contribution. The orchestrator applies it and rejects
/// any output whose target field is outside the stage's declared writes.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Analysis(ClauseAnalysis),
    Score(RiskScore),
    Advice {
        recommendations: Vec<Recommendation>,
        skipped_rules: Vec<RuleSkip>,
    },
}

impl StageOutput {
    pub fn field(&self) -> ContextField {
        match self {
            Self::Analysis(_) => ContextField::Analyses,
            Self::Score(_) => ContextField::Scores,
            Self::Advice { .. } => ContextField::Recommendations,
        }
    }
}

// ── The stage contract ───────────────────────────────────────────────────

/// One phase of the per-clause analysis pipeline.
///
/// Implementations must be pure functions of `(ctx, clause)`: re-running a
/// stage on the same pair yields the same output, which checkpoint resume
/// relies on. A stage reads only fields it declares in `reads()` and its
/// output must land in a field declared in `writes()`; violating either
/// is a contract error surfaced by the orchestrator, never silent.
#[async_trait]
pub trait ProcessingStage: Send + Sync {
    fn name(&self) -> &str;

    fn reads(&self) -> &'static [ContextField];

    fn writes(&self) -> &'static [ContextField];

    async fn run(&self, ctx: &AnalysisContext, clause: &Clause)
        -> Result<StageOutput, StageError>;

    /// Hot-swap the negotiation rule set. No-op for every stage except the
    /// advisor.
    fn reload_rules(&self, _rules: &[NegotiationRule]) {}
}

// ── Assembly-time validation ─────────────────────────────────────────────

/// An ordered, validated set of stages for one session. Contract checks
/// happen here, at session assembly, so violations surface before any
/// clause is processed.
pub struct StageSet {
    stages: Vec<std::sync::Arc<dyn ProcessingStage>>,
}

impl std::fmt::Debug for StageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageSet")
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl StageSet {
    pub fn new(stages: Vec<std::sync::Arc<dyn ProcessingStage>>) -> Result<Self, ReviewError> {
        if stages.is_empty() {
            return Err(ReviewError::InvalidInput("stage set is empty".into()));
        }
        let mut produced: Vec<ContextField> = Vec::new();
        for stage in &stages {
            for read in stage.reads() {
                if !produced.contains(read) {
                    return Err(ReviewError::StageContractViolation {
                        stage: stage.name().to_string(),
                        detail: format!(
                            "reads '{}' which no earlier stage produces",
                            read.as_str()
                        ),
                    });
                }
            }
            for write in stage.writes() {
                if produced.contains(write) {
                    return Err(ReviewError::StageContractViolation {
                        stage: stage.name().to_string(),
                        detail: format!("duplicate writer for '{}'", write.as_str()),
                    });
                }
                produced.push(*write);
            }
        }
        Ok(Self { stages })
    }

    pub fn iter(&self) -> impl Iterator<Item = &std::sync::Arc<dyn ProcessingStage>> {
        self.stages.iter()
    }

    pub fn reload_rules(&self, rules: &[NegotiationRule]) {
        for stage in &self.stages {
            stage.reload_rules(rules);
        }
    }
}
