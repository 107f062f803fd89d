use thiserror::Error;

/// Pipeline-level failures, one per stage of the control loop.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AgentError {
    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Plan rejected: {}", .0.join("; "))]
    ValidationFailure(Vec<String>),

    #[error("Execution error at step {step}: {reason}")]
    Execution { step: usize, reason: String },

    #[error("Fail-safe triggered: {0}")]
    FailSafeTriggered(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// Only the fail-safe ends a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::FailSafeTriggered(_))
    }
}
