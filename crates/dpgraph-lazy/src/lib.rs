#![forbid(unsafe_code)]
//! dpgraph-lazy: the replayable computation graph.
//!
//! Every operation on a [`LazyNode`] produces a new node holding both the
//! eagerly computed value and an [`Expr`] tree that rebuilds it from the
//! node's private sources. Replaying the tree against a modified
//! [`SourceState`] is how a source whose owner ran out of budget gets
//! redacted before release.

pub mod autodiff;
pub mod expr;
pub mod inplace;
pub mod node;
pub mod op;
pub mod state;

pub use autodiff::gradient_of_sum;
pub use expr::Expr;
pub use inplace::InPlace;
pub use node::{LazyNode, Operand};
pub use op::{BinaryOp, ReduceOp, UnaryOp};
pub use state::SourceState;
