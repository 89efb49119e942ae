//! Client-side inference of a result's public metadata.
//!
//! Runs before anything is sent, so a shape or dtype error fails the single
//! call and never reaches the party.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use dpgraph_core::bounds::Bounds;
use dpgraph_core::dtype::DType;
use dpgraph_core::error::Error;
use dpgraph_core::id::DataSubject;
use dpgraph_core::shape::Shape;
use dpgraph_core::tensor::Tensor;
use dpgraph_lazy::BinaryOp;

use crate::error::{RemoteError, Result};
use crate::op::RemoteOp;

/// What a requester may know about a remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicMeta {
    pub shape: Shape,
    pub dtype: DType,
    pub bounds: Bounds,
    pub subjects: BTreeSet<DataSubject>,
}

impl PublicMeta {
    /// Metadata of a public tensor: exact bounds, no subjects.
    pub fn of_tensor(t: &Tensor) -> Self {
        Self {
            shape: t.shape().clone(),
            dtype: t.dtype(),
            bounds: Bounds::exact(t),
            subjects: BTreeSet::new(),
        }
    }
}

/// Right-hand side as far as inference is concerned.
#[derive(Debug, Clone, Copy)]
pub enum OperandMeta<'a> {
    Public(&'a PublicMeta),
    /// A weakly typed literal (Python-like scalar).
    Literal(&'a Tensor),
}

pub fn infer(op: &RemoteOp, lhs: &PublicMeta, rhs: Option<OperandMeta<'_>>) -> Result<PublicMeta> {
    match (op, rhs) {
        (RemoteOp::Unary(op), None) => Ok(PublicMeta {
            shape: op.shape(&lhs.shape)?,
            dtype: op.dtype(lhs.dtype),
            bounds: op.bounds(&lhs.bounds)?,
            subjects: lhs.subjects.clone(),
        }),
        (RemoteOp::Reduce(op), None) => Ok(PublicMeta {
            shape: op.shape(&lhs.shape)?,
            dtype: op.dtype(lhs.dtype),
            bounds: op.bounds(&lhs.bounds)?,
            subjects: lhs.subjects.clone(),
        }),
        (RemoteOp::Binary(op), Some(OperandMeta::Public(rhs))) => Ok(PublicMeta {
            shape: op.shape(&lhs.shape, &rhs.shape)?,
            dtype: op.dtype(lhs.dtype, rhs.dtype),
            bounds: op.bounds(&lhs.bounds, &rhs.bounds)?,
            subjects: lhs.subjects.union(&rhs.subjects).cloned().collect(),
        }),
        (RemoteOp::Binary(BinaryOp::Concat(_)), Some(OperandMeta::Literal(_))) => Err(
            Error::UnsupportedOperand("cannot concatenate a 0-d scalar".into()).into(),
        ),
        (RemoteOp::Binary(op), Some(OperandMeta::Literal(lit))) => {
            let lit = lit.cast(lhs.dtype.absorb_scalar(lit.dtype()));
            Ok(PublicMeta {
                shape: op.shape(&lhs.shape, lit.shape())?,
                dtype: op.dtype(lhs.dtype, lit.dtype()),
                bounds: op.bounds(&lhs.bounds, &Bounds::exact(&lit))?,
                subjects: lhs.subjects.clone(),
            })
        }
        (op, rhs) => Err(RemoteError::BadArgument(format!(
            "`{}` takes {} operand, got {}",
            op.qualified_name(),
            if op.is_binary() { "one" } else { "no" },
            if rhs.is_some() { "one" } else { "none" },
        ))),
    }
}

/// Metadata of `lhs op rhs` where only `rhs` is a remote object.
pub fn infer_reflected(op: &RemoteOp, rhs: &PublicMeta, lhs: OperandMeta<'_>) -> Result<PublicMeta> {
    let RemoteOp::Binary(op) = op else {
        return Err(RemoteError::BadArgument(format!(
            "`{}` has no reflected form",
            op.qualified_name()
        )));
    };
    match lhs {
        OperandMeta::Public(lhs) => Ok(PublicMeta {
            shape: op.shape(&lhs.shape, &rhs.shape)?,
            dtype: op.dtype(lhs.dtype, rhs.dtype),
            bounds: op.bounds(&lhs.bounds, &rhs.bounds)?,
            subjects: lhs.subjects.union(&rhs.subjects).cloned().collect(),
        }),
        OperandMeta::Literal(_) if matches!(op, BinaryOp::Concat(_)) => Err(
            Error::UnsupportedOperand("cannot concatenate a 0-d scalar".into()).into(),
        ),
        OperandMeta::Literal(lit) => {
            let lit = lit.cast(rhs.dtype.absorb_scalar(lit.dtype()));
            Ok(PublicMeta {
                shape: op.shape(lit.shape(), &rhs.shape)?,
                dtype: op.dtype(lit.dtype(), rhs.dtype),
                bounds: op.bounds(&Bounds::exact(&lit), &rhs.bounds)?,
                subjects: rhs.subjects.clone(),
            })
        }
    }
}
