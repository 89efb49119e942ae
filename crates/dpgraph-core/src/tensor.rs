//! Minimal dense tensor kernel.
//!
//! Storage is always `f64`, row-major; the logical element type travels in
//! `dtype` and every constructor coerces values to it (bools are 0/1, ints are
//! truncated). Only the operations the lazy graph and the remote executor need
//! are provided.

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;

/// Reductions supported by [`Tensor::reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceKind {
    Sum,
    Mean,
    Max,
    Min,
}

impl ReduceKind {
    pub fn name(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Mean => "mean",
            ReduceKind::Max => "max",
            ReduceKind::Min => "min",
        }
    }

    /// Result dtype of this reduction over `input`.
    pub fn output_dtype(self, input: DType) -> DType {
        match self {
            ReduceKind::Sum if input == DType::Bool => DType::Int64,
            ReduceKind::Sum | ReduceKind::Max | ReduceKind::Min => input,
            ReduceKind::Mean => input.to_float(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    data: Vec<f64>,
}

/// Unchecked wire form; every decoded tensor goes through [`Tensor::with_dtype`].
#[derive(Deserialize)]
struct RawTensor {
    shape: Shape,
    dtype: DType,
    data: Vec<f64>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = Error;

    fn try_from(raw: RawTensor) -> Result<Self> {
        Tensor::with_dtype(raw.shape, raw.dtype, raw.data)
    }
}

impl Tensor {
    /// Float64 tensor from row-major data.
    pub fn new(shape: impl Into<Shape>, data: Vec<f64>) -> Result<Self> {
        Self::with_dtype(shape, DType::Float64, data)
    }

    pub fn with_dtype(shape: impl Into<Shape>, dtype: DType, data: Vec<f64>) -> Result<Self> {
        let shape = shape.into();
        let numel = shape.dims().iter().try_fold(1usize, |n, &d| n.checked_mul(d));
        if numel != Some(data.len()) {
            return Err(Error::UnsupportedOperand(format!(
                "{} values do not fill shape {shape}",
                data.len()
            )));
        }
        Ok(Self::from_parts(shape, dtype, data))
    }

    fn from_parts(shape: Shape, dtype: DType, mut data: Vec<f64>) -> Self {
        if dtype != DType::Float64 {
            for v in data.iter_mut() {
                *v = dtype.coerce(*v);
            }
        }
        Self { shape, dtype, data }
    }

    pub fn scalar(v: f64) -> Self {
        Self::scalar_of(v, DType::Float64)
    }

    pub fn scalar_of(v: f64, dtype: DType) -> Self {
        Self::from_parts(Shape::scalar(), dtype, vec![v])
    }

    pub fn full(shape: impl Into<Shape>, v: f64, dtype: DType) -> Self {
        let shape = shape.into();
        let n = shape.numel();
        Self::from_parts(shape, dtype, vec![v; n])
    }

    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full(shape, 0.0, dtype)
    }

    pub fn ones(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::full(shape, 1.0, dtype)
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape.clone(), self.dtype)
    }

    pub fn ones_like(&self) -> Self {
        Self::ones(self.shape.clone(), self.dtype)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// The single element of a one-element tensor.
    pub fn item(&self) -> Option<f64> {
        match self.data.as_slice() {
            [v] => Some(*v),
            _ => None,
        }
    }

    pub fn cast(&self, dtype: DType) -> Tensor {
        Self::from_parts(self.shape.clone(), dtype, self.data.clone())
    }

    pub fn map(&self, dtype: DType, f: impl Fn(f64) -> f64) -> Tensor {
        Self::from_parts(
            self.shape.clone(),
            dtype,
            self.data.iter().map(|v| f(*v)).collect(),
        )
    }

    /// Element-wise binary op with NumPy broadcasting.
    pub fn zip_broadcast(
        &self,
        other: &Tensor,
        dtype: DType,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Tensor> {
        if self.shape == other.shape {
            let data = self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| f(*a, *b))
                .collect();
            return Ok(Self::from_parts(self.shape.clone(), dtype, data));
        }
        let out = self.shape.broadcast(&other.shape)?;
        let lhs = broadcast_offsets(&self.shape, &out);
        let rhs = broadcast_offsets(&other.shape, &out);
        let data = lhs
            .iter()
            .zip(rhs.iter())
            .map(|(i, j)| f(self.data[*i], other.data[*j]))
            .collect();
        Ok(Self::from_parts(out, dtype, data))
    }

    pub fn broadcast_to(&self, target: &Shape) -> Result<Tensor> {
        if &self.shape == target {
            return Ok(self.clone());
        }
        if !self.shape.broadcasts_to(target) {
            return Err(Error::ShapeMismatch {
                op: "broadcast_to",
                lhs: self.shape.clone(),
                rhs: target.clone(),
            });
        }
        let data = broadcast_offsets(&self.shape, target)
            .into_iter()
            .map(|i| self.data[i])
            .collect();
        Ok(Self {
            shape: target.clone(),
            dtype: self.dtype,
            data,
        })
    }

    /// Sum a broadcast result back down to `target` (adjoint of `broadcast_to`).
    pub fn sum_to(&self, target: &Shape) -> Result<Tensor> {
        if &self.shape == target {
            return Ok(self.clone());
        }
        if !target.broadcasts_to(&self.shape) {
            return Err(Error::ShapeMismatch {
                op: "sum_to",
                lhs: self.shape.clone(),
                rhs: target.clone(),
            });
        }
        let mut data = vec![0.0; target.numel()];
        for (src, dst) in broadcast_offsets(target, &self.shape).into_iter().enumerate() {
            data[dst] += self.data[src];
        }
        Ok(Self {
            shape: target.clone(),
            dtype: self.dtype,
            data,
        })
    }

    pub fn reduce(&self, kind: ReduceKind, axis: Option<usize>, keepdims: bool) -> Result<Tensor> {
        let out_shape = self.shape.reduce(axis, keepdims)?;
        let dtype = kind.output_dtype(self.dtype);
        let count = self.shape.reduced_count(axis);
        if count == 0 && matches!(kind, ReduceKind::Max | ReduceKind::Min) {
            return Err(Error::UnsupportedOperand(format!(
                "zero-size {} reduction over shape {}",
                kind.name(),
                self.shape
            )));
        }
        let (outer, inner) = match axis {
            None => (1, 1),
            Some(axis) => {
                let dims = self.shape.dims();
                (
                    dims[..axis].iter().product::<usize>(),
                    dims[axis + 1..].iter().product::<usize>(),
                )
            }
        };
        let mut data = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            for i in 0..inner {
                let lane = (0..count).map(|k| self.data[(o * count + k) * inner + i]);
                data.push(fold_lane(kind, lane, count));
            }
        }
        Ok(Self::from_parts(out_shape, dtype, data))
    }

    pub fn sum_all(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let (m, k, n, out) = matmul_dims(&self.shape, &other.shape)?;
        let mut data = vec![0.0; m * n];
        for i in 0..m {
            for p in 0..k {
                let a = self.data[i * k + p];
                if a == 0.0 {
                    continue;
                }
                for j in 0..n {
                    data[i * n + j] += a * other.data[p * n + j];
                }
            }
        }
        Ok(Self::from_parts(
            out,
            self.dtype.promote(other.dtype),
            data,
        ))
    }

    /// Reverse the axes.
    pub fn transpose(&self) -> Tensor {
        let axes: Vec<usize> = (0..self.shape.ndim()).rev().collect();
        self.permute_unchecked(&axes)
    }

    pub fn permute(&self, axes: &[usize]) -> Result<Tensor> {
        let ndim = self.shape.ndim();
        let mut seen = vec![false; ndim];
        if axes.len() != ndim {
            return Err(Error::UnsupportedOperand(format!(
                "permutation of length {} for {ndim}-d tensor",
                axes.len()
            )));
        }
        for &a in axes {
            if a >= ndim || seen[a] {
                return Err(Error::InvalidAxis { axis: a, ndim });
            }
            seen[a] = true;
        }
        Ok(self.permute_unchecked(axes))
    }

    fn permute_unchecked(&self, axes: &[usize]) -> Tensor {
        let src_strides = self.shape.strides();
        let dims: Vec<usize> = axes.iter().map(|a| self.shape.dims()[*a]).collect();
        let strides: Vec<usize> = axes.iter().map(|a| src_strides[*a]).collect();
        let data = strided_offsets(&dims, &strides)
            .into_iter()
            .map(|i| self.data[i])
            .collect();
        Self {
            shape: Shape::new(dims),
            dtype: self.dtype,
            data,
        }
    }

    pub fn reshape(&self, shape: &Shape) -> Result<Tensor> {
        let shape = self.shape.reshape(shape)?;
        Ok(Self {
            shape,
            dtype: self.dtype,
            data: self.data.clone(),
        })
    }

    pub fn flatten(&self) -> Tensor {
        Self {
            shape: self.shape.flatten(),
            dtype: self.dtype,
            data: self.data.clone(),
        }
    }

    pub fn concat(&self, other: &Tensor, axis: usize) -> Result<Tensor> {
        let out = self.shape.concat(&other.shape, axis)?;
        let dims = self.shape.dims();
        let outer: usize = dims[..axis].iter().product();
        let a_chunk = self.numel() / outer.max(1);
        let b_chunk = other.numel() / outer.max(1);
        let mut data = Vec::with_capacity(self.numel() + other.numel());
        for o in 0..outer {
            data.extend_from_slice(&self.data[o * a_chunk..(o + 1) * a_chunk]);
            data.extend_from_slice(&other.data[o * b_chunk..(o + 1) * b_chunk]);
        }
        Ok(Self::from_parts(out, self.dtype.promote(other.dtype), data))
    }

    /// Select entry `index` along axis 0.
    pub fn index_first(&self, index: usize) -> Result<Tensor> {
        let shape = self.shape.index_first(index)?;
        let chunk = shape.numel();
        Ok(Self {
            shape,
            dtype: self.dtype,
            data: self.data[index * chunk..(index + 1) * chunk].to_vec(),
        })
    }

    /// Adjoint of `index_first`: scatter `self` into row `index` of a zero tensor.
    pub fn embed_first(&self, index: usize, target: &Shape) -> Result<Tensor> {
        let expected = target.index_first(index)?;
        if expected != self.shape {
            return Err(Error::ShapeMismatch {
                op: "embed",
                lhs: self.shape.clone(),
                rhs: expected,
            });
        }
        let chunk = expected.numel();
        let mut data = vec![0.0; target.numel()];
        data[index * chunk..(index + 1) * chunk].copy_from_slice(&self.data);
        Ok(Self {
            shape: target.clone(),
            dtype: self.dtype,
            data,
        })
    }

    /// Split along `axis` at `at` (adjoint of `concat`).
    pub fn split_at(&self, axis: usize, at: usize) -> Result<(Tensor, Tensor)> {
        let dims = self.shape.dims();
        if axis >= dims.len() {
            return Err(Error::InvalidAxis {
                axis,
                ndim: dims.len(),
            });
        }
        if at > dims[axis] {
            return Err(Error::UnsupportedOperand(format!(
                "split point {at} beyond axis length {}",
                dims[axis]
            )));
        }
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        let row = dims[axis] * inner;
        let mut left_dims = dims.to_vec();
        left_dims[axis] = at;
        let mut right_dims = dims.to_vec();
        right_dims[axis] = dims[axis] - at;
        let mut left = Vec::with_capacity(outer * at * inner);
        let mut right = Vec::with_capacity(outer * (dims[axis] - at) * inner);
        for o in 0..outer {
            let base = o * row;
            left.extend_from_slice(&self.data[base..base + at * inner]);
            right.extend_from_slice(&self.data[base + at * inner..base + row]);
        }
        Ok((
            Self {
                shape: Shape::new(left_dims),
                dtype: self.dtype,
                data: left,
            },
            Self {
                shape: Shape::new(right_dims),
                dtype: self.dtype,
                data: right,
            },
        ))
    }

    /// Overwrite one element (row-major offset).
    pub fn set(&mut self, flat: usize, v: f64) -> Result<()> {
        let dtype = self.dtype;
        match self.data.get_mut(flat) {
            Some(slot) => {
                *slot = dtype.coerce(v);
                Ok(())
            }
            None => Err(Error::UnsupportedOperand(format!(
                "flat index {flat} out of bounds for shape {}",
                self.shape
            ))),
        }
    }

    /// Sort every lane of the last axis ascending.
    pub fn sort_last_axis(&mut self) {
        let lane = self.shape.dims().last().copied().unwrap_or(1).max(1);
        for chunk in self.data.chunks_mut(lane) {
            chunk.sort_by(|a, b| a.total_cmp(b));
        }
    }

    /// Change the shape in place, truncating or zero-padding the data.
    pub fn resize(&mut self, shape: Shape) {
        self.data.resize(shape.numel(), 0.0);
        self.shape = shape;
    }

    pub fn all_close(&self, other: &Tensor, tol: f64) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= tol * (1.0 + b.abs()) || (a.is_nan() && b.is_nan()))
    }
}

fn fold_lane(kind: ReduceKind, lane: impl Iterator<Item = f64>, count: usize) -> f64 {
    match kind {
        ReduceKind::Sum => lane.sum(),
        ReduceKind::Mean => lane.sum::<f64>() / count as f64,
        ReduceKind::Max => lane.fold(f64::NEG_INFINITY, f64::max),
        ReduceKind::Min => lane.fold(f64::INFINITY, f64::min),
    }
}

/// `(m, k, n, result shape)` for a 1-d/2-d matmul, treating vectors as a row
/// (left) or a column (right).
pub fn matmul_dims(lhs: &Shape, rhs: &Shape) -> Result<(usize, usize, usize, Shape)> {
    let out = lhs.matmul(rhs)?;
    let (m, k) = match lhs.dims() {
        [k] => (1, *k),
        [m, k] => (*m, *k),
        _ => return Err(Error::Invariant(format!("matmul lhs {lhs}"))),
    };
    let n = match rhs.dims() {
        [_] => 1,
        [_, n] => *n,
        _ => return Err(Error::Invariant(format!("matmul rhs {rhs}"))),
    };
    Ok((m, k, n, out))
}

/// Source offset of every element of `out` when `src` is broadcast to it.
fn broadcast_offsets(src: &Shape, out: &Shape) -> Vec<usize> {
    let nd = out.ndim();
    let lead = nd - src.ndim();
    let src_strides = src.strides();
    let mut strides = vec![0; nd];
    for (i, d) in src.dims().iter().enumerate() {
        if *d != 1 {
            strides[i + lead] = src_strides[i];
        }
    }
    strided_offsets(out.dims(), &strides)
}

fn strided_offsets(dims: &[usize], strides: &[usize]) -> Vec<usize> {
    let n: usize = dims.iter().product();
    let mut offsets = Vec::with_capacity(n);
    let mut idx = vec![0usize; dims.len()];
    let mut cur = 0usize;
    for _ in 0..n {
        offsets.push(cur);
        for ax in (0..dims.len()).rev() {
            idx[ax] += 1;
            cur += strides[ax];
            if idx[ax] < dims[ax] {
                break;
            }
            cur -= strides[ax] * idx[ax];
            idx[ax] = 0;
        }
    }
    offsets
}
