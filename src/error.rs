use thiserror::Error;

/// Failures that are isolated to a single genome's evaluation. The orchestrator converts these
/// into the minimum fitness for that genome and keeps going.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("input size mismatch: network wants {want}, got {have}")]
    InputSize { want: usize, have: usize },

    #[error("malformed topology: {0}")]
    MalformedTopology(String),

    #[error("non-finite activation at node {node}")]
    NonFinite { node: usize },

    #[error("step budget of {limit} activations exceeded")]
    StepBudget { limit: u64 },

    #[error("evaluation exceeded {limit_ms}ms")]
    Timeout { limit_ms: u64 },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Only configuration problems end a run; everything else is recovered locally.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

pub type Result<T> = core::result::Result<T, Error>;
