use thiserror::Error;

use crate::dtype::DType;
use crate::id::{DataSubject, NodeId};
use crate::shape::Shape;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("shape mismatch in {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    #[error("dtype mismatch in {op}: {lhs} vs {rhs}")]
    DtypeMismatch {
        op: &'static str,
        lhs: DType,
        rhs: DType,
    },

    #[error("axis {axis} out of range for {ndim}-d tensor")]
    InvalidAxis { axis: usize, ndim: usize },

    #[error("unsupported operand: {0}")]
    UnsupportedOperand(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("source {0} missing from replay state")]
    MissingSource(NodeId),

    #[error("two different sources share id {0}")]
    IdCollision(NodeId),

    #[error("privacy budget exhausted for {subject}: requested {requested}, remaining {remaining}")]
    BudgetExhausted {
        subject: DataSubject,
        requested: f64,
        remaining: f64,
    },

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
