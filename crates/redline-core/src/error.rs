use thiserror::Error;

/// Failure raised by a single stage for a single clause. Recoverable
/// failures leave the context at its pre-call state for that clause and
/// are absorbed by the orchestrator; non-recoverable failures escalate.
#[derive(Debug, Clone, Error)]
#[error("stage '{stage}' failed: {cause}")]
pub struct StageError {
    pub stage: String,
    pub cause: String,
    pub recoverable: bool,
}

impl StageError {
    pub fn recoverable(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            cause: cause.into(),
            recoverable: true,
        }
    }

    pub fn fatal(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            cause: cause.into(),
            recoverable: false,
        }
    }
}

/// Session-level error taxonomy surfaced to callers.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// Malformed input clause; default-filled and logged, never fatal.
    #[error("clause {clause_id}: {reason}")]
    ParseGap { clause_id: u64, reason: String },

    /// A stage produced output outside its declared write scope, or the
    /// stage set failed assembly validation. Programming error; the
    /// session aborts and the error surfaces immediately.
    #[error("stage '{stage}' violated its declared contract: {detail}")]
    StageContractViolation { stage: String, detail: String },

    /// A single rule failed to evaluate (e.g. malformed pattern). The rule
    /// is skipped for that clause; other rules still run.
    #[error("rule '{rule_id}' failed to evaluate: {reason}")]
    RuleEvaluation { rule_id: String, reason: String },

    /// Resume called on a session that is not paused, or a result
    /// requested from a session still in flight. Session state unchanged.
    #[error("checkpoint protocol violation: {0}")]
    CheckpointProtocol(String),

    /// Terminal: returned for further operations on an aborted session.
    #[error("session {0} is aborted")]
    SessionAborted(u64),

    #[error("unknown session {0}")]
    UnknownSession(u64),

    /// Intake contract violation: clause ids not unique and strictly
    /// increasing, or an empty document where one is required.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
