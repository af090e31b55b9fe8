use thiserror::Error;

#[derive(Debug, Error)]
pub enum BbdError {
    #[error("Invalid configuration: {field} — {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("State invariant violated: {field} — {message} (iteration {iteration:?}, year {year:?})")]
    StateInvariantViolated {
        field: String,
        message: String,
        iteration: Option<usize>,
        year: Option<u32>,
    },

    #[error("Iteration {iteration} failed in year {year}: {message}")]
    IterationFailure {
        iteration: usize,
        year: u32,
        message: String,
    },

    #[error("Simulation cancelled after {completed_iterations} iterations")]
    Cancelled { completed_iterations: usize },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for BbdError {
    fn from(e: serde_json::Error) -> Self {
        BbdError::SerializationError(e.to_string())
    }
}
