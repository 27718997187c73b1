use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Clause input ─────────────────────────────────────────────────────────

/// Byte offsets of a clause within the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// One discrete provision extracted from a contract by the ingestion
/// collaborator. Immutable once it enters the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    /// Stable sequence number; unique and strictly increasing per document.
    pub id: u64,
    /// Structural label, e.g. "Section 4.2".
    pub label: String,
    pub text: String,
    #[serde(default)]
    pub span: Option<Span>,
}

/// Per-clause feature bundle from the external NLP collaborator.
/// Optional everywhere; absence degrades gracefully.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NlpFeatures {
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub obligations: Vec<String>,
    #[serde(default)]
    pub temporal_refs: Vec<String>,
}

// ── Clause tagging ───────────────────────────────────────────────────────

/// The ten fixed subject-matter codes. DOC is the catch-all; a clause is
/// never left untagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClauseTag {
    Tec,
    Leg,
    Fin,
    Com,
    Ipx,
    Trm,
    Dis,
    Doc,
    Exe,
    Ext,
}

impl ClauseTag {
    pub const ALL: [ClauseTag; 10] = [
        Self::Tec,
        Self::Leg,
        Self::Fin,
        Self::Com,
        Self::Ipx,
        Self::Trm,
        Self::Dis,
        Self::Doc,
        Self::Exe,
        Self::Ext,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tec => "TEC",
            Self::Leg => "LEG",
            Self::Fin => "FIN",
            Self::Com => "COM",
            Self::Ipx => "IPX",
            Self::Trm => "TRM",
            Self::Dis => "DIS",
            Self::Doc => "DOC",
            Self::Exe => "EXE",
            Self::Ext => "EXT",
        }
    }
}

// ── Clause analysis ──────────────────────────────────────────────────────

/// Severity hint carried from the exposure layer into risk scoring.
/// A prior, not a final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureSeverity {
    Low,
    Moderate,
    High,
}

impl ExposureSeverity {
    /// Multiplicative prior applied to each category's raw score.
    /// Results are re-clamped into [0, 1] after application.
    pub fn prior(&self) -> f64 {
        match self {
            Self::Low => 0.75,
            Self::Moderate => 1.0,
            Self::High => 1.25,
        }
    }
}

/// Three-layer analysis result for a single clause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClauseAnalysis {
    pub clause_id: u64,
    pub tags: Vec<ClauseTag>,
    /// Interpretation layer: what the clause technically enables or controls.
    pub interpretation: String,
    /// Exposure layer: where the reviewing party is vulnerable.
    pub exposure: String,
    pub severity_hint: ExposureSeverity,
    /// Opportunity layer: leverage points the clause currently lacks.
    pub opportunities: Vec<String>,
    pub key_terms: Vec<String>,
    pub token_count: u64,
    /// True when this analysis was default-filled after a parse gap.
    pub defaulted: bool,
}

impl ClauseAnalysis {
    /// Minimal DOC-tagged analysis used to fill a parse gap so downstream
    /// stages never see a missing clause.
    pub fn fallback(clause_id: u64, token_count: u64) -> Self {
        Self {
            clause_id,
            tags: vec![ClauseTag::Doc],
            interpretation: "Clause text was missing or malformed; no functional reading available.".into(),
            exposure: "Unreviewed content is itself an exposure; manual review required.".into(),
            severity_hint: ExposureSeverity::Low,
            opportunities: Vec::new(),
            key_terms: Vec::new(),
            token_count,
            defaulted: true,
        }
    }
}

// ── Risk scoring ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Financial,
    Legal,
    Operational,
    Compliance,
    Reputational,
    Strategic,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 6] = [
        Self::Financial,
        Self::Legal,
        Self::Operational,
        Self::Compliance,
        Self::Reputational,
        Self::Strategic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::Legal => "legal",
            Self::Operational => "operational",
            Self::Compliance => "compliance",
            Self::Reputational => "reputational",
            Self::Strategic => "strategic",
        }
    }

    /// Process-wide default weight. Never mutated per document; a different
    /// table may be supplied via configuration before a session starts.
    pub fn default_weight(&self) -> f64 {
        match self {
            Self::Financial => 1.2,
            Self::Legal => 1.1,
            Self::Operational => 0.9,
            Self::Compliance => 1.0,
            Self::Reputational => 0.8,
            Self::Strategic => 1.0,
        }
    }
}

/// Risk tier derived from a clause's aggregate score. Ordering is used for
/// document-level dominance (Critical dominates Material dominates
/// Procedural).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskClassification {
    Procedural,
    Material,
    Critical,
}

impl RiskClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Procedural => "procedural",
            Self::Material => "material",
            Self::Critical => "critical",
        }
    }
}

/// Per-clause risk score. Every category is present; untriggered
/// categories score 0.0 rather than being absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub clause_id: u64,
    pub raw: BTreeMap<RiskCategory, f64>,
    /// Human-readable descriptions of the triggered findings.
    pub factors: Vec<String>,
    pub aggregate: f64,
    pub classification: Option<RiskClassification>,
}

// ── Negotiation rules ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationKind {
    Redline,
    Addition,
    Clarification,
    Flag,
    Accept,
}

/// One leaf predicate of a rule's condition conjunction. Rules are data,
/// not code: the full condition is the AND of these leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// Clause carries the given tag.
    HasTag { tag: ClauseTag },
    /// Clause text contains the needle (case-insensitive substring).
    Contains { needle: String },
    /// Clause text does not contain the needle.
    Lacks { needle: String },
    /// Clause text matches the regex pattern.
    Matches { pattern: String },
    /// Clause text does not match the regex pattern.
    LacksMatch { pattern: String },
    /// Clause risk classification is at least this tier.
    MinClassification { classification: RiskClassification },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationTemplate {
    pub kind: RecommendationKind,
    pub suggested_change: String,
    pub rationale: String,
    pub strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRule {
    pub id: String,
    pub name: String,
    pub priority: Priority,
    pub conditions: Vec<Condition>,
    pub template: RecommendationTemplate,
}

/// A rule match on a clause. Multiple recommendations may target the same
/// clause; they are never merged, only ranked (and grouped when they
/// overlap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub rule_id: String,
    pub clause_id: u64,
    pub priority: Priority,
    pub kind: RecommendationKind,
    pub suggested_change: String,
    pub rationale: String,
    pub strategy: String,
    /// Shared label when same-priority recommendations on this clause have
    /// overlapping suggested text. Both are kept for audit traceability.
    #[serde(default)]
    pub group: Option<String>,
}

// ── Session state machine ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Paused,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    ClauseCount,
    TokenCount,
}

/// Emitted at each RUNNING → PAUSED transition. Checkpoints are a
/// compliance guarantee, not an optimization: processing stays suspended
/// until an explicit continuation decision arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Last clause fully processed before the pause.
    pub clause_id: u64,
    pub clauses_processed: u64,
    pub tokens_processed: u64,
    pub reason: CheckpointReason,
    /// Reference to the partial-results snapshot at this position.
    pub snapshot_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Continuation decision supplied by the external caller at a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ContinueDecision {
    Continue,
    Abort,
    /// Continue with a replacement negotiation rule set for the remaining
    /// clauses.
    ModifyAndContinue { rules: Vec<NegotiationRule> },
}

/// One entry in the ordered recoverable-error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub clause_id: Option<u64>,
    pub stage: String,
    pub cause: String,
    pub recoverable: bool,
    pub created_at: DateTime<Utc>,
}

// ── Session summary ──────────────────────────────────────────────────────

/// Counts per risk tier across all scored clauses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClassificationCounts {
    pub critical: u64,
    pub material: u64,
    pub procedural: u64,
}

/// Hand-off summary for the reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: u64,
    pub state: SessionState,
    pub total_clauses: u64,
    pub clauses_processed: u64,
    pub tokens_processed: u64,
    pub classification_counts: ClassificationCounts,
    /// Document-level risk: the maximum clause classification present,
    /// never an average.
    pub document_risk: Option<RiskClassification>,
    pub recommendation_counts: BTreeMap<Priority, u64>,
    pub checkpoint_count: u64,
    pub error_count: u64,
}

// ── Review events ────────────────────────────────────────────────────────

/// Broadcast event emitted after each significant session state change.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewEvent {
    Clause {
        session_id: u64,
        clause_id: u64,
        message: String,
    },
    Checkpoint {
        session_id: u64,
        message: String,
    },
    State {
        session_id: u64,
        state: SessionState,
    },
    Error {
        session_id: u64,
        message: String,
    },
}

impl ReviewEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Clause { .. } => "clause",
            Self::Checkpoint { .. } => "checkpoint",
            Self::State { .. } => "state",
            Self::Error { .. } => "error",
        }
    }

    pub fn session_id(&self) -> u64 {
        match self {
            Self::Clause { session_id, .. }
            | Self::Checkpoint { session_id, .. }
            | Self::State { session_id, .. }
            | Self::Error { session_id, .. } => *session_id,
        }
    }
}
