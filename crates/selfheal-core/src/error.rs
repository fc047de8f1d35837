use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealError {
    #[error("not initialized: run 'selfheal init'")]
    NotInitialized,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no executor registered for action kind '{0}'")]
    UnknownActionKind(String),

    #[error("blocked by safety check '{check}': {reason}")]
    GateBlocked { check: String, reason: String },

    #[error("target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("execution timed out after {0}s")]
    ExecutionTimeout(u64),

    #[error("delivery failed on {channel}: {reason}")]
    DeliveryFailure { channel: String, reason: String },

    #[error("approval request {0} has expired")]
    ApprovalExpired(String),

    #[error("approval request {0} exhausted its escalation chain")]
    ApprovalExhausted(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("approval request not found: {0}")]
    ApprovalNotFound(String),

    #[error("pattern not found: {0}")]
    PatternNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("rollback not supported for {0} actions")]
    RollbackUnsupported(String),

    #[error("signal source error: {0}")]
    SignalSource(String),

    #[error("adapter error: {0}")]
    Adapter(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HealError {
    /// Transient failures that the job runner retries with backoff.
    /// Everything else is terminal for the attempt and left for operator review.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HealError::DeliveryFailure { .. } | HealError::SignalSource(_) | HealError::Adapter(_)
        )
    }

    pub(crate) fn store(e: impl std::fmt::Display) -> Self {
        HealError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HealError>;
