//! Expression tree replayed by [`crate::LazyNode::reconstruct`].

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use dpgraph_core::error::{Error, Result};
use dpgraph_core::id::NodeId;
use dpgraph_core::tensor::Tensor;

use crate::op::{BinaryOp, ReduceOp, UnaryOp};
use crate::state::SourceState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A private input, looked up by id in the replay state.
    Source(NodeId),
    /// A public constant baked into the graph.
    Constant(Arc<Tensor>),
    Unary {
        op: UnaryOp,
        arg: Arc<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Arc<Expr>,
        rhs: Arc<Expr>,
    },
    Reduce {
        op: ReduceOp,
        arg: Arc<Expr>,
    },
}

impl Expr {
    /// Evaluate against `state`. Never mutates the state.
    pub fn eval(&self, state: &SourceState) -> Result<Tensor> {
        match self {
            Expr::Source(id) => state
                .get(*id)
                .map(|n| n.value().clone())
                .ok_or(Error::MissingSource(*id)),
            Expr::Constant(t) => Ok(t.as_ref().clone()),
            Expr::Unary { op, arg } => op.eval(&arg.eval(state)?),
            Expr::Binary { op, lhs, rhs } => op.eval(&lhs.eval(state)?, &rhs.eval(state)?),
            Expr::Reduce { op, arg } => op.eval(&arg.eval(state)?),
        }
    }

    /// Every source id referenced by the tree.
    pub fn source_ids(&self) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        self.collect_sources(&mut out);
        out
    }

    fn collect_sources(&self, out: &mut BTreeSet<NodeId>) {
        match self {
            Expr::Source(id) => {
                out.insert(*id);
            }
            Expr::Constant(_) => {}
            Expr::Unary { arg, .. } | Expr::Reduce { arg, .. } => arg.collect_sources(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_sources(out);
                rhs.collect_sources(out);
            }
        }
    }

    /// Number of operation nodes (sources and constants excluded).
    pub fn op_count(&self) -> usize {
        match self {
            Expr::Source(_) | Expr::Constant(_) => 0,
            Expr::Unary { arg, .. } | Expr::Reduce { arg, .. } => 1 + arg.op_count(),
            Expr::Binary { lhs, rhs, .. } => 1 + lhs.op_count() + rhs.op_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use dpgraph_core::id::DataSubject;

    use crate::node::LazyNode;

    use super::*;

    #[test]
    fn tree_tracks_sources_and_serializes_by_tag() {
        let t = Tensor::new([2], vec![1.0, 2.0]).unwrap();
        let a = LazyNode::leaf_in_range(t.clone(), 0.0, 3.0, DataSubject::from("a")).unwrap();
        let b = LazyNode::leaf_in_range(t, 0.0, 3.0, DataSubject::from("b")).unwrap();
        let n = a.add(&b).unwrap().mul(2.0).unwrap().sum(None, false).unwrap();
        let ids = n.expr().source_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.id()) && ids.contains(&b.id()));
        assert_eq!(n.expr().op_count(), 3);
        let json = serde_json::to_value(n.expr().as_ref()).unwrap();
        assert!(json.get("reduce").is_some());
    }

    #[test]
    fn missing_source_is_reported() {
        let t = Tensor::new([1], vec![1.0]).unwrap();
        let a = LazyNode::leaf_in_range(t, 0.0, 3.0, DataSubject::from("a")).unwrap();
        let err = a.expr().eval(&SourceState::new()).unwrap_err();
        assert!(matches!(err, Error::MissingSource(id) if id == a.id()));
    }
}
