//! Explicit in-place mutation of a node's value.
//!
//! Mutation breaks `reconstruct(sources) == value` for the mutated node only:
//! its expression and sources are left alone and `replay_consistent` goes
//! false. Bounds are widened to stay sound for the new value.

use dpgraph_core::bounds::Bounds;
use dpgraph_core::error::Result;
use dpgraph_core::shape::Shape;

use crate::node::LazyNode;

/// Exclusive mutation capability over one node. Obtained from
/// [`LazyNode::in_place`].
pub struct InPlace<'a> {
    node: &'a mut LazyNode,
}

impl LazyNode {
    pub fn in_place(&mut self) -> InPlace<'_> {
        InPlace { node: self }
    }
}

impl InPlace<'_> {
    /// Overwrite the element at row-major offset `flat`.
    pub fn set_item(&mut self, flat: usize, v: f64) -> Result<()> {
        self.node.value.set(flat, v)?;
        let (lo, hi) = hull(&self.node.bounds)?;
        let shape = self.node.value.shape().clone();
        self.node.bounds = Bounds::uniform(lo.min(v), hi.max(v), shape);
        self.node.replay_consistent = false;
        Ok(())
    }

    /// Sort every lane of the last axis.
    pub fn sort(&mut self) -> Result<()> {
        self.node.value.sort_last_axis();
        if self.node.bounds.min.as_scalar().is_none() || self.node.bounds.max.as_scalar().is_none() {
            let (lo, hi) = hull(&self.node.bounds)?;
            self.node.bounds = Bounds::uniform(lo, hi, self.node.value.shape().clone());
        }
        self.node.replay_consistent = false;
        Ok(())
    }

    /// Change the shape, truncating or zero-padding.
    pub fn resize(&mut self, shape: impl Into<Shape>) -> Result<()> {
        let shape = shape.into();
        let (lo, hi) = hull(&self.node.bounds)?;
        let padded = shape.numel() > self.node.value.numel();
        self.node.value.resize(shape.clone());
        self.node.bounds = if padded {
            Bounds::uniform(lo.min(0.0), hi.max(0.0), shape)
        } else {
            Bounds::uniform(lo, hi, shape)
        };
        self.node.replay_consistent = false;
        Ok(())
    }
}

/// Smallest lower and largest upper bound over all elements.
fn hull(b: &Bounds) -> Result<(f64, f64)> {
    let lo = match b.min.as_scalar() {
        Some(v) => v,
        None => b.min.to_tensor()?.data().iter().copied().fold(f64::INFINITY, f64::min),
    };
    let hi = match b.max.as_scalar() {
        Some(v) => v,
        None => b.max.to_tensor()?.data().iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };
    Ok((lo, hi))
}
