//! `LazyNode`: a materialized value paired with the expression that rebuilds
//! it from its private sources.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use dpgraph_core::bounds::{Bounds, ValueBounds};
use dpgraph_core::dtype::DType;
use dpgraph_core::error::{Error, Result};
use dpgraph_core::id::{DataSubject, NodeId};
use dpgraph_core::shape::Shape;
use dpgraph_core::tensor::{ReduceKind, Tensor};

use crate::expr::Expr;
use crate::op::{BinaryOp, ReduceOp, UnaryOp};
use crate::state::SourceState;

/// Right-hand (or, for reflected ops, left-hand) operand of a graph operation.
#[derive(Debug, Clone)]
pub enum Operand<'a> {
    Node(&'a LazyNode),
    /// A literal; its dtype only widens the result across kinds.
    Scalar(Tensor),
    /// A public array constant.
    Array(Tensor),
}

impl<'a> Operand<'a> {
    pub fn float(v: f64) -> Self {
        Operand::Scalar(Tensor::scalar_of(v, DType::DEFAULT_FLOAT))
    }

    pub fn int(v: i64) -> Self {
        Operand::Scalar(Tensor::scalar_of(v as f64, DType::DEFAULT_INT))
    }

    pub fn boolean(v: bool) -> Self {
        Operand::Scalar(Tensor::scalar_of(if v { 1.0 } else { 0.0 }, DType::Bool))
    }

    /// The constant this operand contributes when combined with a `node_dtype` node.
    fn into_constant(self, node_dtype: DType) -> Option<Tensor> {
        match self {
            Operand::Node(_) => None,
            Operand::Scalar(t) => {
                let dtype = node_dtype.absorb_scalar(t.dtype());
                Some(t.cast(dtype))
            }
            Operand::Array(t) => Some(t),
        }
    }
}

impl<'a> From<&'a LazyNode> for Operand<'a> {
    fn from(n: &'a LazyNode) -> Self {
        Operand::Node(n)
    }
}

impl From<f64> for Operand<'_> {
    fn from(v: f64) -> Self {
        Operand::float(v)
    }
}

impl From<i64> for Operand<'_> {
    fn from(v: i64) -> Self {
        Operand::int(v)
    }
}

impl From<bool> for Operand<'_> {
    fn from(v: bool) -> Self {
        Operand::boolean(v)
    }
}

impl From<Tensor> for Operand<'_> {
    fn from(t: Tensor) -> Self {
        Operand::Array(t)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawLazyNode")]
pub struct LazyNode {
    pub(crate) id: NodeId,
    pub(crate) value: Tensor,
    pub(crate) expr: Arc<Expr>,
    pub(crate) sources: SourceState,
    pub(crate) is_linear: bool,
    pub(crate) bounds: Bounds,
    pub(crate) subjects: BTreeSet<DataSubject>,
    pub(crate) replay_consistent: bool,
}

#[derive(Deserialize)]
struct RawLazyNode {
    id: NodeId,
    value: Tensor,
    expr: Arc<Expr>,
    sources: SourceState,
    is_linear: bool,
    bounds: Bounds,
    subjects: BTreeSet<DataSubject>,
    replay_consistent: bool,
}

impl TryFrom<RawLazyNode> for LazyNode {
    type Error = Error;

    fn try_from(raw: RawLazyNode) -> Result<Self> {
        if raw.bounds.shape() != raw.value.shape() {
            return Err(Error::ShapeMismatch {
                op: "decode",
                lhs: raw.value.shape().clone(),
                rhs: raw.bounds.shape().clone(),
            });
        }
        Ok(LazyNode {
            id: raw.id,
            value: raw.value,
            expr: raw.expr,
            sources: raw.sources,
            is_linear: raw.is_linear,
            bounds: raw.bounds,
            subjects: raw.subjects,
            replay_consistent: raw.replay_consistent,
        })
    }
}

macro_rules! binary_methods {
    ($($(#[$doc:meta])* $name:ident => $op:expr),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name<'a>(&self, rhs: impl Into<Operand<'a>>) -> Result<LazyNode> {
                self.binary($op, rhs.into())
            }
        )*
    };
}

macro_rules! reflected_methods {
    ($($(#[$doc:meta])* $name:ident => $op:expr),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name<'a>(&self, lhs: impl Into<Operand<'a>>) -> Result<LazyNode> {
                self.reflected($op, lhs.into())
            }
        )*
    };
}

macro_rules! unary_methods {
    ($($name:ident => $op:expr),* $(,)?) => {
        $(
            pub fn $name(&self) -> Result<LazyNode> {
                self.unary($op)
            }
        )*
    };
}

impl LazyNode {
    /// A private input owned by `subjects`, with per-element bounds.
    pub fn leaf(
        value: Tensor,
        min_vals: ValueBounds,
        max_vals: ValueBounds,
        subjects: impl IntoIterator<Item = DataSubject>,
    ) -> Result<LazyNode> {
        let bounds = Bounds::new(min_vals, max_vals)?;
        if bounds.shape() != value.shape() {
            return Err(Error::ShapeMismatch {
                op: "leaf",
                lhs: value.shape().clone(),
                rhs: bounds.shape().clone(),
            });
        }
        let inner = Self::stand_in(NodeId::fresh(), value, bounds, subjects.into_iter().collect());
        let mut outer = inner.clone();
        outer.sources.replace(Arc::new(inner));
        Ok(outer)
    }

    /// Leaf whose every element lies in `[lo, hi]`, owned by one subject.
    pub fn leaf_in_range(value: Tensor, lo: f64, hi: f64, subject: DataSubject) -> Result<LazyNode> {
        let shape = value.shape().clone();
        Self::leaf(
            value,
            ValueBounds::scalar(lo, shape.clone()),
            ValueBounds::scalar(hi, shape),
            [subject],
        )
    }

    /// Source-map entry: a leaf without a source map of its own.
    pub(crate) fn stand_in(
        id: NodeId,
        value: Tensor,
        bounds: Bounds,
        subjects: BTreeSet<DataSubject>,
    ) -> LazyNode {
        LazyNode {
            id,
            value,
            expr: Arc::new(Expr::Source(id)),
            sources: SourceState::new(),
            is_linear: true,
            bounds,
            subjects,
            replay_consistent: true,
        }
    }

    fn derived(
        value: Tensor,
        expr: Expr,
        sources: SourceState,
        is_linear: bool,
        bounds: Bounds,
        subjects: BTreeSet<DataSubject>,
    ) -> LazyNode {
        LazyNode {
            id: NodeId::fresh(),
            value,
            expr: Arc::new(expr),
            sources,
            is_linear,
            bounds,
            subjects,
            replay_consistent: true,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn expr(&self) -> &Arc<Expr> {
        &self.expr
    }

    pub fn sources(&self) -> &SourceState {
        &self.sources
    }

    pub fn is_linear(&self) -> bool {
        self.is_linear
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn min_vals(&self) -> &ValueBounds {
        &self.bounds.min
    }

    pub fn max_vals(&self) -> &ValueBounds {
        &self.bounds.max
    }

    pub fn subjects(&self) -> &BTreeSet<DataSubject> {
        &self.subjects
    }

    pub fn shape(&self) -> &Shape {
        self.value.shape()
    }

    pub fn dtype(&self) -> DType {
        self.value.dtype()
    }

    /// False once the value was mutated in place; replay then no longer
    /// reproduces it.
    pub fn is_replay_consistent(&self) -> bool {
        self.replay_consistent
    }

    /// Replay the expression against `state`.
    pub fn reconstruct(&self, state: &SourceState) -> Result<Tensor> {
        self.expr.eval(state)
    }

    pub fn sources_as_state(&self) -> SourceState {
        self.sources.clone()
    }

    /// New node whose value is the replay against `state` and whose sources
    /// are exactly `state`.
    pub fn swap_state(&self, state: SourceState) -> Result<LazyNode> {
        let value = self.reconstruct(&state)?;
        let subjects = state.subjects();
        Ok(Self::derived(
            value,
            self.expr.as_ref().clone(),
            state,
            self.is_linear,
            self.bounds.clone(),
            subjects,
        ))
    }

    fn binary(&self, op: BinaryOp, rhs: Operand<'_>) -> Result<LazyNode> {
        match rhs {
            Operand::Node(other) => {
                let value = op.eval(&self.value, &other.value)?;
                let bounds = op.bounds(&self.bounds, &other.bounds)?;
                let sources = self.sources.merge(&other.sources)?;
                let subjects = self.subjects.union(&other.subjects).cloned().collect();
                let expr = Expr::Binary {
                    op,
                    lhs: Arc::clone(&self.expr),
                    rhs: Arc::clone(&other.expr),
                };
                let linear = op.linear_nodes(self.is_linear, other.is_linear);
                Ok(Self::derived(value, expr, sources, linear, bounds, subjects))
            }
            constant => {
                let c = constant
                    .into_constant(self.dtype())
                    .ok_or_else(|| Error::Invariant("constant operand expected".into()))?;
                let value = op.eval(&self.value, &c)?;
                let bounds = op.bounds(&self.bounds, &Bounds::exact(&c))?;
                let expr = Expr::Binary {
                    op,
                    lhs: Arc::clone(&self.expr),
                    rhs: Arc::new(Expr::Constant(Arc::new(c))),
                };
                let linear = op.linear_const_rhs(self.is_linear);
                Ok(Self::derived(
                    value,
                    expr,
                    self.sources.clone(),
                    linear,
                    bounds,
                    self.subjects.clone(),
                ))
            }
        }
    }

    fn reflected(&self, op: BinaryOp, lhs: Operand<'_>) -> Result<LazyNode> {
        match lhs {
            Operand::Node(other) => other.binary(op, Operand::Node(self)),
            constant => {
                let c = constant
                    .into_constant(self.dtype())
                    .ok_or_else(|| Error::Invariant("constant operand expected".into()))?;
                let value = op.eval(&c, &self.value)?;
                let bounds = op.bounds(&Bounds::exact(&c), &self.bounds)?;
                let expr = Expr::Binary {
                    op,
                    lhs: Arc::new(Expr::Constant(Arc::new(c))),
                    rhs: Arc::clone(&self.expr),
                };
                let linear = op.linear_const_lhs(self.is_linear);
                Ok(Self::derived(
                    value,
                    expr,
                    self.sources.clone(),
                    linear,
                    bounds,
                    self.subjects.clone(),
                ))
            }
        }
    }

    /// Apply a unary operation.
    pub fn unary(&self, op: UnaryOp) -> Result<LazyNode> {
        let value = op.eval(&self.value)?;
        let bounds = op.bounds(&self.bounds)?;
        let linear = op.linear(self.is_linear);
        let expr = Expr::Unary {
            op,
            arg: Arc::clone(&self.expr),
        };
        Ok(Self::derived(
            value,
            expr,
            self.sources.clone(),
            linear,
            bounds,
            self.subjects.clone(),
        ))
    }

    /// Apply a reduction.
    pub fn reduce(&self, op: ReduceOp) -> Result<LazyNode> {
        let value = op.eval(&self.value)?;
        let bounds = op.bounds(&self.bounds)?;
        let linear = op.linear(self.is_linear);
        let expr = Expr::Reduce {
            op,
            arg: Arc::clone(&self.expr),
        };
        Ok(Self::derived(
            value,
            expr,
            self.sources.clone(),
            linear,
            bounds,
            self.subjects.clone(),
        ))
    }

    /// Apply any binary operation with `self` on the left.
    pub fn apply_binary<'a>(&self, op: BinaryOp, rhs: impl Into<Operand<'a>>) -> Result<LazyNode> {
        self.binary(op, rhs.into())
    }

    /// Apply any binary operation with `self` on the right.
    pub fn apply_reflected<'a>(&self, op: BinaryOp, lhs: impl Into<Operand<'a>>) -> Result<LazyNode> {
        self.reflected(op, lhs.into())
    }

    binary_methods! {
        add => BinaryOp::Add,
        sub => BinaryOp::Sub,
        mul => BinaryOp::Mul,
        div => BinaryOp::Div,
        /// Matrix product for 1-d and 2-d operands.
        matmul => BinaryOp::MatMul,
        pow => BinaryOp::Pow,
        maximum => BinaryOp::Maximum,
        minimum => BinaryOp::Minimum,
        lt => BinaryOp::Lt,
        gt => BinaryOp::Gt,
        le => BinaryOp::Le,
        ge => BinaryOp::Ge,
        eq => BinaryOp::Eq,
        ne => BinaryOp::Ne,
        and => BinaryOp::And,
        or => BinaryOp::Or,
    }

    reflected_methods! {
        /// `lhs + self`.
        radd => BinaryOp::Add,
        /// `lhs - self`.
        rsub => BinaryOp::Sub,
        /// `lhs * self`.
        rmul => BinaryOp::Mul,
        /// `lhs / self`; never linear.
        rdiv => BinaryOp::Div,
        /// `lhs @ self`.
        rmatmul => BinaryOp::MatMul,
    }

    unary_methods! {
        neg => UnaryOp::Neg,
        abs => UnaryOp::Abs,
        sqrt => UnaryOp::Sqrt,
        exp => UnaryOp::Exp,
        log => UnaryOp::Log,
        transpose => UnaryOp::Transpose,
        flatten => UnaryOp::Flatten,
        copy => UnaryOp::Copy,
        ones_like => UnaryOp::OnesLike,
        zeros_like => UnaryOp::ZerosLike,
    }

    pub fn concatenate<'a>(&self, other: impl Into<Operand<'a>>, axis: usize) -> Result<LazyNode> {
        match other.into() {
            Operand::Scalar(_) => Err(Error::UnsupportedOperand(
                "cannot concatenate a 0-d scalar".into(),
            )),
            operand => self.binary(BinaryOp::Concat(axis), operand),
        }
    }

    pub fn pow_scalar(&self, exponent: f64) -> Result<LazyNode> {
        self.unary(UnaryOp::PowScalar(exponent))
    }

    pub fn clip(&self, min: f64, max: f64) -> Result<LazyNode> {
        if min > max || min.is_nan() || max.is_nan() {
            return Err(Error::UnsupportedOperand(format!(
                "clip range [{min}, {max}] is empty"
            )));
        }
        self.unary(UnaryOp::Clip { min, max })
    }

    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<LazyNode> {
        self.unary(UnaryOp::Reshape(shape.into()))
    }

    /// Select entry `i` along axis 0.
    pub fn index(&self, i: usize) -> Result<LazyNode> {
        self.unary(UnaryOp::Index(i))
    }

    /// Gather with a private index tensor ("choose"); the result would depend
    /// on unmaterialized data, so it is refused.
    pub fn take(&self, _indices: &LazyNode) -> Result<LazyNode> {
        Err(Error::NotSupported(
            "indexing with a private index tensor".into(),
        ))
    }

    pub fn put(&self, _indices: &[usize], _values: Operand<'_>) -> Result<LazyNode> {
        Err(Error::NotSupported("put".into()))
    }

    pub fn sum(&self, axis: Option<usize>, keepdims: bool) -> Result<LazyNode> {
        self.reduce(ReduceOp::new(ReduceKind::Sum, axis, keepdims))
    }

    pub fn mean(&self, axis: Option<usize>, keepdims: bool) -> Result<LazyNode> {
        self.reduce(ReduceOp::new(ReduceKind::Mean, axis, keepdims))
    }

    pub fn max(&self, axis: Option<usize>, keepdims: bool) -> Result<LazyNode> {
        self.reduce(ReduceOp::new(ReduceKind::Max, axis, keepdims))
    }

    pub fn min(&self, axis: Option<usize>, keepdims: bool) -> Result<LazyNode> {
        self.reduce(ReduceOp::new(ReduceKind::Min, axis, keepdims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(shape: &[usize], data: &[f64], subject: &str) -> LazyNode {
        let t = Tensor::new(shape, data.to_vec()).unwrap();
        LazyNode::leaf_in_range(t, -10.0, 10.0, DataSubject::from(subject)).unwrap()
    }

    #[test]
    fn replay_reproduces_value() {
        let a = leaf(&[2, 2], &[1.0, 2.0, 3.0, 4.0], "alice");
        let b = leaf(&[2], &[0.5, -1.0], "bob");
        let n = a.mul(&b).unwrap().add(3.0).unwrap().exp().unwrap().sum(Some(0), false).unwrap();
        let replay = n.reconstruct(&n.sources_as_state()).unwrap();
        assert!(replay.all_close(n.value(), 1e-12));
        assert_eq!(n.sources().len(), 2);
        assert_eq!(n.subjects().len(), 2);
        let leaf_replay = a.reconstruct(&a.sources_as_state()).unwrap();
        assert_eq!(&leaf_replay, a.value());
    }

    #[test]
    fn linearity_propagates() {
        let a = leaf(&[3], &[1.0, 2.0, 3.0], "alice");
        let b = leaf(&[3], &[4.0, 5.0, 6.0], "bob");
        assert!(a.add(&b).unwrap().is_linear());
        assert!(a.mul(2.0).unwrap().is_linear());
        assert!(a.div(4.0).unwrap().transpose().unwrap().is_linear());
        assert!(a.rsub(1.0).unwrap().is_linear());
        assert!(!a.mul(&b).unwrap().is_linear());
        assert!(!a.rdiv(1.0).unwrap().is_linear());
        assert!(!a.pow_scalar(2.0).unwrap().is_linear());
        assert!(!a.lt(&b).unwrap().is_linear());
        assert!(!a.mul(&b).unwrap().add(&a).unwrap().is_linear());
        assert!(a.abs().unwrap().zeros_like().unwrap().is_linear());
    }

    #[test]
    fn incompatible_shapes_fail() {
        let a = leaf(&[3], &[1.0, 2.0, 3.0], "alice");
        let b = leaf(&[2], &[4.0, 5.0], "bob");
        assert!(matches!(a.add(&b), Err(Error::ShapeMismatch { .. })));
        assert!(matches!(a.matmul(1.0), Err(Error::UnsupportedOperand(_))));
        assert!(matches!(a.take(&b), Err(Error::NotSupported(_))));
        assert!(matches!(a.put(&[0], 1.0.into()), Err(Error::NotSupported(_))));
    }

    #[test]
    fn swap_state_replays_redacted_sources() {
        let a = leaf(&[2], &[1.0, 2.0], "alice");
        let b = leaf(&[2], &[3.0, 4.0], "bob");
        let n = a.add(&b).unwrap();
        let mut state = n.sources_as_state();
        state.redact(b.id()).unwrap();
        let swapped = n.swap_state(state.clone()).unwrap();
        assert_eq!(swapped.value().data(), &[1.0, 2.0]);
        assert_eq!(swapped.subjects().len(), 1);
        let twice = swapped.swap_state(state).unwrap();
        assert_eq!(twice.value(), swapped.value());
        assert!(swapped.is_linear());
    }

    #[test]
    fn scalar_literals_do_not_widen_dtype() {
        let t = Tensor::with_dtype([2], DType::Int32, vec![1.0, 2.0]).unwrap();
        let a = LazyNode::leaf_in_range(t, 0.0, 5.0, DataSubject::from("alice")).unwrap();
        assert_eq!(a.add(1_i64).unwrap().dtype(), DType::Int32);
        assert_eq!(a.mul(0.5).unwrap().dtype(), DType::Float64);
        assert_eq!(a.gt(1_i64).unwrap().dtype(), DType::Bool);
    }

    #[test]
    fn bounds_follow_operations() {
        let a = leaf(&[2], &[1.0, 2.0], "alice");
        let n = a.mul(2.0).unwrap().sum(None, false).unwrap();
        assert_eq!(n.min_vals().as_scalar(), Some(-40.0));
        assert_eq!(n.max_vals().as_scalar(), Some(40.0));
        let sq = a.pow_scalar(2.0).unwrap();
        assert_eq!(sq.min_vals().as_scalar(), Some(0.0));
        assert_eq!(sq.max_vals().as_scalar(), Some(100.0));
    }

    #[test]
    fn decoding_rejects_bounds_of_another_shape() {
        let a = leaf(&[2], &[1.0, 2.0], "alice");
        let mut json = serde_json::to_value(&a).unwrap();
        json["bounds"] = serde_json::to_value(Bounds::uniform(0.0, 1.0, [3])).unwrap();
        assert!(serde_json::from_value::<LazyNode>(json).is_err());

        let back: LazyNode = serde_json::from_value(serde_json::to_value(&a).unwrap()).unwrap();
        assert_eq!(back.shape(), a.shape());
    }
}
