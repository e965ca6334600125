//! Error taxonomy shared across the platform.
//!
//! Every fallible operation in this workspace returns [`SimResult`]. The
//! variants name *kinds*, not call sites — the HTTP layer maps each kind to
//! a status code (see the component design notes), and callers that need to
//! retry match on the kind rather than on a specific crate's error type.

use thiserror::Error;

/// Umbrella error type returned by Store, Engine, Ingestor, and AI Caller
/// operations.
#[derive(Debug, Error)]
pub enum SimError {
    /// Something addressed by id was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// `StartSimulation` called for a strategy that already has a running
    /// simulation.
    #[error("simulation already running for strategy {0}")]
    AlreadyRunning(String),

    /// The active-simulation count is at `maxConcurrentSimulations`.
    #[error("concurrency cap reached: {active}/{max} simulations running")]
    CapacityExhausted { active: usize, max: usize },

    /// A compare-and-set (e.g. closing a `SimulatedTrade`) found the row not
    /// in the expected state.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Invalid config or request body.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// The Ingestor or AI Caller connection failed after retries.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The AI Caller returned JSON that failed schema validation.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A transient Store or network hiccup, already retried locally.
    #[error("transient I/O error: {0}")]
    TransientIO(String),

    /// Any error outside the named taxonomy; treated as an internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SimError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// HTTP status code this error kind maps to, per the error-handling
    /// design (§7): domain errors surface as 4xx, upstream/transient issues
    /// as 503, anything else as 500.
    pub fn status_code(&self) -> u16 {
        match self {
            SimError::NotFound(_) => 404,
            SimError::AlreadyRunning(_) => 409,
            SimError::CapacityExhausted { .. } => 409,
            SimError::StateConflict(_) => 409,
            SimError::ValidationError(_) => 400,
            SimError::UpstreamUnavailable(_) => 503,
            SimError::InvalidResponse(_) => 502,
            SimError::TransientIO(_) => 503,
            SimError::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for SimError {
    fn from(e: serde_json::Error) -> Self {
        SimError::ValidationError(e.to_string())
    }
}

impl From<envy::Error> for SimError {
    fn from(e: envy::Error) -> Self {
        SimError::ValidationError(format!("config: {e}"))
    }
}

/// Result alias used across the workspace.
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(SimError::not_found("strategy 1").status_code(), 404);
        assert_eq!(SimError::AlreadyRunning("1".into()).status_code(), 409);
        assert_eq!(
            SimError::CapacityExhausted { active: 2, max: 2 }.status_code(),
            409
        );
        assert_eq!(SimError::validation("bad").status_code(), 400);
        assert_eq!(SimError::UpstreamUnavailable("ws".into()).status_code(), 503);
    }

    #[test]
    fn display_includes_context() {
        let err = SimError::StateConflict("trade 9 not open".into());
        assert_eq!(err.to_string(), "state conflict: trade 9 not open");
    }
}
