//! Reverse-mode differentiation of `sum(expr)` with respect to every source.
//!
//! The forward pass records each subexpression's value on a tape in post
//! order, so walking the tape backwards visits every node after all of its
//! consumers.

use std::collections::BTreeMap;

use dpgraph_core::dtype::DType;
use dpgraph_core::error::{Error, Result};
use dpgraph_core::id::NodeId;
use dpgraph_core::tensor::Tensor;

use crate::expr::Expr;
use crate::op::{BinaryOp, ReduceOp, UnaryOp};
use crate::state::SourceState;

enum Step<'e> {
    Source(NodeId),
    Constant,
    Unary(&'e UnaryOp, usize),
    Binary(&'e BinaryOp, usize, usize),
    Reduce(&'e ReduceOp, usize),
}

#[derive(Default)]
struct Tape<'e> {
    steps: Vec<Step<'e>>,
    values: Vec<Tensor>,
}

impl<'e> Tape<'e> {
    fn push(&mut self, step: Step<'e>, value: Tensor) -> usize {
        self.steps.push(step);
        self.values.push(value);
        self.values.len() - 1
    }

    fn record(&mut self, expr: &'e Expr, state: &SourceState) -> Result<usize> {
        match expr {
            Expr::Source(id) => {
                let node = state.get(*id).ok_or(Error::MissingSource(*id))?;
                Ok(self.push(Step::Source(*id), node.value().cast(DType::Float64)))
            }
            Expr::Constant(t) => Ok(self.push(Step::Constant, t.as_ref().clone())),
            Expr::Unary { op, arg } => {
                let a = self.record(arg, state)?;
                let v = op.eval(&self.values[a])?;
                Ok(self.push(Step::Unary(op, a), v))
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.record(lhs, state)?;
                let r = self.record(rhs, state)?;
                let v = op.eval(&self.values[l], &self.values[r])?;
                Ok(self.push(Step::Binary(op, l, r), v))
            }
            Expr::Reduce { op, arg } => {
                let a = self.record(arg, state)?;
                let v = op.eval(&self.values[a])?;
                Ok(self.push(Step::Reduce(op, a), v))
            }
        }
    }
}

fn accumulate(slot: &mut Option<Tensor>, g: Tensor) -> Result<()> {
    *slot = Some(match slot.take() {
        Some(acc) => acc.zip_broadcast(&g, DType::Float64, |a, b| a + b)?,
        None => g,
    });
    Ok(())
}

/// `∂ sum(expr(state)) / ∂ source` for every source in `state`. Sources the
/// expression does not reference get a zero gradient.
pub fn gradient_of_sum(expr: &Expr, state: &SourceState) -> Result<BTreeMap<NodeId, Tensor>> {
    let mut tape = Tape::default();
    let root = tape.record(expr, state)?;

    let mut grads: Vec<Option<Tensor>> = vec![None; tape.values.len()];
    grads[root] = Some(Tensor::ones(tape.values[root].shape().clone(), DType::Float64));

    let mut out: BTreeMap<NodeId, Option<Tensor>> = BTreeMap::new();
    for i in (0..tape.steps.len()).rev() {
        let Some(g) = grads[i].take() else {
            continue;
        };
        match tape.steps[i] {
            Step::Source(id) => accumulate(out.entry(id).or_default(), g)?,
            Step::Constant => {}
            Step::Unary(op, a) => {
                let ga = op.vjp(&tape.values[a], &tape.values[i], &g)?;
                accumulate(&mut grads[a], ga)?;
            }
            Step::Binary(op, l, r) => {
                let (gl, gr) = op.vjp(&tape.values[l], &tape.values[r], &tape.values[i], &g)?;
                accumulate(&mut grads[l], gl)?;
                accumulate(&mut grads[r], gr)?;
            }
            Step::Reduce(op, a) => {
                let ga = op.vjp(&tape.values[a], &tape.values[i], &g)?;
                accumulate(&mut grads[a], ga)?;
            }
        }
    }

    let mut result = BTreeMap::new();
    for (id, node) in state {
        let g = out
            .remove(id)
            .flatten()
            .unwrap_or_else(|| Tensor::zeros(node.shape().clone(), DType::Float64));
        result.insert(*id, g);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use dpgraph_core::id::DataSubject;

    use super::*;
    use crate::node::LazyNode;

    fn leaf(data: &[f64]) -> LazyNode {
        let t = Tensor::new([data.len()], data.to_vec()).unwrap();
        LazyNode::leaf_in_range(t, -10.0, 10.0, DataSubject::from("s")).unwrap()
    }

    #[test]
    fn square_gradient_is_twice_input() {
        let x = leaf(&[1.0, -2.0, 3.0]);
        let y = x.pow_scalar(2.0).unwrap();
        let g = gradient_of_sum(y.expr(), &y.sources_as_state()).unwrap();
        assert_eq!(g[&x.id()].data(), &[2.0, -4.0, 6.0]);
    }

    #[test]
    fn product_rule_and_reused_source() {
        let a = leaf(&[2.0, 3.0]);
        let b = leaf(&[5.0, 7.0]);
        // sum(a * b + a) -> d/da = b + 1, d/db = a
        let y = a.mul(&b).unwrap().add(&a).unwrap();
        let g = gradient_of_sum(y.expr(), &y.sources_as_state()).unwrap();
        assert_eq!(g[&a.id()].data(), &[6.0, 8.0]);
        assert_eq!(g[&b.id()].data(), &[2.0, 3.0]);
    }

    #[test]
    fn gradient_through_matmul_and_mean() {
        let w = Tensor::new([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let x = leaf(&[1.0, 1.0]);
        let y = x.rmatmul(w).unwrap().mean(None, false).unwrap();
        let g = gradient_of_sum(y.expr(), &y.sources_as_state()).unwrap();
        // mean(W x) = (1/2) * 1^T W x  -> grad = (1/2) W^T 1 = [2, 3]
        assert_eq!(g[&x.id()].data(), &[2.0, 3.0]);
    }

    #[test]
    fn unreferenced_sources_get_zero_gradient() {
        let a = leaf(&[1.0]);
        let y = a.zeros_like().unwrap();
        let g = gradient_of_sum(y.expr(), &y.sources_as_state()).unwrap();
        assert_eq!(g[&a.id()].data(), &[0.0]);
    }
}
