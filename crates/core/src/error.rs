use thiserror::Error;

/// Failures an orchestration run can surface to its caller.
///
/// A capped refinement loop is deliberately absent here: running out of
/// refinement iterations is a normal outcome reported through the
/// `degraded` flag on the response, not an error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another event for the same session is already in flight.
    /// Retryable; says nothing about the session's content.
    #[error("session is busy, retry shortly")]
    SessionBusy,

    /// No session exists for the given key and the event cannot create one.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The persistence backend rejected a write. The in-memory state was
    /// not committed; the caller may retry the whole event.
    #[error("session store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    /// The model produced empty or schema-invalid structured output.
    /// Never retried automatically: blind retry risks duplicate side effects.
    #[error("model generation failed: {0}")]
    GenerationFailed(String),

    /// The model could not be reached within the configured timeout and
    /// retry budget. Retryable by the caller.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The content classifier returned a category outside the closed set.
    /// Recovered locally by the router, which falls back to guidance.
    #[error("message classification was ambiguous")]
    ClassificationAmbiguous,

    /// A progress transition that the cursor invariants forbid. Indicates
    /// corrupted state or a programming error; the transition is refused,
    /// never clamped.
    #[error("invalid progress transition: {0}")]
    InvalidProgressTransition(String),

    /// Session state could not be encoded or decoded.
    #[error("state encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the caller may expect a later retry of the same event to
    /// succeed without any operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::SessionBusy
                | EngineError::StoreUnavailable(_)
                | EngineError::ModelUnavailable(_)
        )
    }
}
