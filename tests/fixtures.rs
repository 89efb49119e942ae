//! Shared builders for the integration tests.

#![allow(dead_code)]

use dpgraph_core::id::DataSubject;
use dpgraph_core::shape::Shape;
use dpgraph_core::tensor::Tensor;
use dpgraph_lazy::LazyNode;

/// Private 1-d input of `subject` with every element in `[lo, hi]`.
pub fn leaf(data: &[f64], lo: f64, hi: f64, subject: &str) -> LazyNode {
    let t = Tensor::new([data.len()], data.to_vec()).expect("valid tensor");
    LazyNode::leaf_in_range(t, lo, hi, DataSubject::from(subject)).expect("valid leaf")
}

/// Private input of `subject` with shape `dims`, filled with `0, 1, 2, ...`.
pub fn ramp(dims: &[usize], subject: &str) -> LazyNode {
    let shape = Shape::from(dims);
    let n = shape.numel();
    let t = Tensor::new(shape, (0..n).map(|i| i as f64).collect()).expect("valid tensor");
    LazyNode::leaf_in_range(t, 0.0, n as f64, DataSubject::from(subject)).expect("valid leaf")
}
