use thiserror::Error;

use dpgraph_core::id::{DataSubject, NodeId};

/// Result type local to dpgraph-dp.
pub type Result<T> = std::result::Result<T, PublishError>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Core(#[from] dpgraph_core::Error),

    #[error("privacy budget exhausted for every contributing subject: {subjects:?}")]
    BudgetExhausted { subjects: Vec<DataSubject> },

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("source {0} has unbounded value range; sensitivity is undefined")]
    UnboundedSource(NodeId),

    #[error("gradient is unbounded over the source box (bound {0}); no finite noise scale exists")]
    UnboundedSensitivity(f64),

    #[error("sigma must be positive and finite, got {0}")]
    InvalidSigma(f64),

    #[error("delta must lie in (0, 1), got {0}")]
    InvalidDelta(f64),

    #[error("publish gave up after {0} redaction rounds")]
    RetryLimit(usize),
}
