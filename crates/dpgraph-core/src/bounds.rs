//! Per-element value bounds and the interval arithmetic that carries them
//! through every graph operation.
//!
//! A [`ValueBounds`] is one side (lower or upper) of the interval. It is a
//! "lazy repeat array": a scalar stands for the same bound on every element, an
//! array broadcasts against `shape`. [`Bounds`] pairs the two sides.

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::tensor::{matmul_dims, ReduceKind, Tensor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BoundsData {
    Scalar(f64),
    Array(Tensor),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawValueBounds")]
pub struct ValueBounds {
    data: BoundsData,
    shape: Shape,
}

#[derive(Deserialize)]
struct RawValueBounds {
    data: BoundsData,
    shape: Shape,
}

impl TryFrom<RawValueBounds> for ValueBounds {
    type Error = Error;

    fn try_from(raw: RawValueBounds) -> Result<Self> {
        match raw.data {
            BoundsData::Scalar(v) => Ok(Self::scalar(v, raw.shape)),
            BoundsData::Array(t) => Self::array(t, raw.shape),
        }
    }
}

impl ValueBounds {
    pub fn scalar(v: f64, shape: impl Into<Shape>) -> Self {
        Self {
            data: BoundsData::Scalar(v),
            shape: shape.into(),
        }
    }

    /// Bounds from a (possibly smaller, broadcastable) array.
    pub fn array(data: Tensor, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if !data.shape().broadcasts_to(&shape) {
            return Err(Error::ShapeMismatch {
                op: "bounds",
                lhs: data.shape().clone(),
                rhs: shape,
            });
        }
        Ok(Self::from_parts(data, shape))
    }

    /// Exact bounds taken from a tensor; uniform tensors collapse to a scalar.
    pub fn from_tensor(t: &Tensor) -> Self {
        Self::from_parts(t.cast(DType::Float64), t.shape().clone())
    }

    fn from_parts(data: Tensor, shape: Shape) -> Self {
        let uniform = match data.data().first() {
            Some(first) => data.data().iter().all(|v| v == first).then_some(*first),
            None => Some(0.0),
        };
        match uniform {
            Some(v) => Self::scalar(v, shape),
            None => Self {
                data: BoundsData::Array(data),
                shape,
            },
        }
    }

    pub fn data(&self) -> &BoundsData {
        &self.data
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self.data {
            BoundsData::Scalar(v) => Some(v),
            BoundsData::Array(_) => None,
        }
    }

    /// Materialize to a float tensor of `shape`.
    pub fn to_tensor(&self) -> Result<Tensor> {
        match &self.data {
            BoundsData::Scalar(v) => Ok(Tensor::full(self.shape.clone(), *v, DType::Float64)),
            BoundsData::Array(t) => t.broadcast_to(&self.shape),
        }
    }

    pub fn is_finite(&self) -> bool {
        match &self.data {
            BoundsData::Scalar(v) => v.is_finite(),
            BoundsData::Array(t) => t.is_finite(),
        }
    }

    fn reshaped(&self, shape: Shape, f: impl Fn(&Tensor) -> Result<Tensor>) -> Result<Self> {
        match &self.data {
            BoundsData::Scalar(v) => Ok(Self::scalar(*v, shape)),
            BoundsData::Array(_) => Ok(Self::from_parts(f(&self.to_tensor()?)?, shape)),
        }
    }
}

/// Lower and upper bound of a tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBounds")]
pub struct Bounds {
    pub min: ValueBounds,
    pub max: ValueBounds,
}

#[derive(Deserialize)]
struct RawBounds {
    min: ValueBounds,
    max: ValueBounds,
}

impl TryFrom<RawBounds> for Bounds {
    type Error = Error;

    fn try_from(raw: RawBounds) -> Result<Self> {
        Bounds::new(raw.min, raw.max)
    }
}

impl Bounds {
    pub fn new(min: ValueBounds, max: ValueBounds) -> Result<Self> {
        if min.shape() != max.shape() {
            return Err(Error::ShapeMismatch {
                op: "bounds",
                lhs: min.shape().clone(),
                rhs: max.shape().clone(),
            });
        }
        Ok(Self { min, max })
    }

    pub fn uniform(lo: f64, hi: f64, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        Self {
            min: ValueBounds::scalar(lo, shape.clone()),
            max: ValueBounds::scalar(hi, shape),
        }
    }

    /// Degenerate interval around a known value (used for public constants).
    pub fn exact(t: &Tensor) -> Self {
        let side = ValueBounds::from_tensor(t);
        Self {
            min: side.clone(),
            max: side,
        }
    }

    pub fn shape(&self) -> &Shape {
        self.min.shape()
    }

    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Per-element width `max - min`.
    pub fn widths(&self) -> Result<Tensor> {
        let lo = self.min.to_tensor()?;
        let hi = self.max.to_tensor()?;
        lo.zip_broadcast(&hi, DType::Float64, |l, h| h - l)
    }

    fn unary(&self, f: impl Fn(f64, f64) -> (f64, f64)) -> Result<Bounds> {
        let shape = self.shape().clone();
        if let (Some(lo), Some(hi)) = (self.min.as_scalar(), self.max.as_scalar()) {
            let (lo, hi) = f(lo, hi);
            return Ok(Self::uniform(lo, hi, shape));
        }
        let lo = self.min.to_tensor()?;
        let hi = self.max.to_tensor()?;
        let mut out_lo = Vec::with_capacity(lo.numel());
        let mut out_hi = Vec::with_capacity(lo.numel());
        for (l, h) in lo.data().iter().zip(hi.data().iter()) {
            let (l, h) = f(*l, *h);
            out_lo.push(l);
            out_hi.push(h);
        }
        Ok(Self {
            min: ValueBounds::from_parts(Tensor::new(shape.clone(), out_lo)?, shape.clone()),
            max: ValueBounds::from_parts(Tensor::new(shape.clone(), out_hi)?, shape),
        })
    }

    fn binary(&self, other: &Bounds, f: impl Fn(f64, f64, f64, f64) -> (f64, f64)) -> Result<Bounds> {
        let shape = self.shape().broadcast(other.shape())?;
        if let (Some(alo), Some(ahi), Some(blo), Some(bhi)) = (
            self.min.as_scalar(),
            self.max.as_scalar(),
            other.min.as_scalar(),
            other.max.as_scalar(),
        ) {
            let (lo, hi) = f(alo, ahi, blo, bhi);
            return Ok(Self::uniform(lo, hi, shape));
        }
        let alo = self.min.to_tensor()?.broadcast_to(&shape)?;
        let ahi = self.max.to_tensor()?.broadcast_to(&shape)?;
        let blo = other.min.to_tensor()?.broadcast_to(&shape)?;
        let bhi = other.max.to_tensor()?.broadcast_to(&shape)?;
        let n = shape.numel();
        let mut out_lo = Vec::with_capacity(n);
        let mut out_hi = Vec::with_capacity(n);
        for i in 0..n {
            let (l, h) = f(alo.data()[i], ahi.data()[i], blo.data()[i], bhi.data()[i]);
            out_lo.push(l);
            out_hi.push(h);
        }
        Ok(Self {
            min: ValueBounds::from_parts(Tensor::new(shape.clone(), out_lo)?, shape.clone()),
            max: ValueBounds::from_parts(Tensor::new(shape.clone(), out_hi)?, shape),
        })
    }

    pub fn add(&self, other: &Bounds) -> Result<Bounds> {
        self.binary(other, |alo, ahi, blo, bhi| (alo + blo, ahi + bhi))
    }

    pub fn sub(&self, other: &Bounds) -> Result<Bounds> {
        self.binary(other, |alo, ahi, blo, bhi| (alo - bhi, ahi - blo))
    }

    pub fn mul(&self, other: &Bounds) -> Result<Bounds> {
        self.binary(other, interval_mul)
    }

    pub fn div(&self, other: &Bounds) -> Result<Bounds> {
        self.binary(other, |alo, ahi, blo, bhi| {
            if blo <= 0.0 && bhi >= 0.0 {
                (f64::NEG_INFINITY, f64::INFINITY)
            } else {
                interval_mul(alo, ahi, 1.0 / bhi, 1.0 / blo)
            }
        })
    }

    /// Element-wise maximum / minimum of two tensors.
    pub fn maximum(&self, other: &Bounds) -> Result<Bounds> {
        self.binary(other, |alo, ahi, blo, bhi| (alo.max(blo), ahi.max(bhi)))
    }

    pub fn minimum(&self, other: &Bounds) -> Result<Bounds> {
        self.binary(other, |alo, ahi, blo, bhi| (alo.min(blo), ahi.min(bhi)))
    }

    /// Boolean results of comparisons and logical ops lie in `[0, 1]`.
    pub fn boolean(&self, other: &Bounds) -> Result<Bounds> {
        let shape = self.shape().broadcast(other.shape())?;
        Ok(Self::uniform(0.0, 1.0, shape))
    }

    pub fn pow(&self, other: &Bounds) -> Result<Bounds> {
        self.binary(other, |alo, ahi, blo, bhi| {
            if blo == bhi {
                interval_pow(alo, ahi, blo)
            } else {
                let corners = [
                    interval_pow(alo, ahi, blo),
                    interval_pow(alo, ahi, bhi),
                ];
                (
                    corners[0].0.min(corners[1].0),
                    corners[0].1.max(corners[1].1),
                )
            }
        })
    }

    pub fn pow_scalar(&self, p: f64) -> Result<Bounds> {
        self.unary(|lo, hi| interval_pow(lo, hi, p))
    }

    pub fn neg(&self) -> Result<Bounds> {
        self.unary(|lo, hi| (-hi, -lo))
    }

    pub fn abs(&self) -> Result<Bounds> {
        self.unary(|lo, hi| {
            if lo >= 0.0 {
                (lo, hi)
            } else if hi <= 0.0 {
                (-hi, -lo)
            } else {
                (0.0, hi.max(-lo))
            }
        })
    }

    pub fn sqrt(&self) -> Result<Bounds> {
        self.unary(|lo, hi| (lo.max(0.0).sqrt(), hi.max(0.0).sqrt()))
    }

    pub fn exp(&self) -> Result<Bounds> {
        self.unary(|lo, hi| (lo.exp(), hi.exp()))
    }

    pub fn log(&self) -> Result<Bounds> {
        self.unary(|lo, hi| (lo.max(0.0).ln(), hi.max(0.0).ln()))
    }

    pub fn clip(&self, min: f64, max: f64) -> Result<Bounds> {
        self.unary(|lo, hi| (lo.max(min).min(max), hi.max(min).min(max)))
    }

    pub fn matmul(&self, other: &Bounds) -> Result<Bounds> {
        let (m, k, n, out) = matmul_dims(self.shape(), other.shape())?;
        let alo = self.min.to_tensor()?;
        let ahi = self.max.to_tensor()?;
        let blo = other.min.to_tensor()?;
        let bhi = other.max.to_tensor()?;
        let mut lo = vec![0.0; m * n];
        let mut hi = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                for p in 0..k {
                    let a = i * k + p;
                    let b = p * n + j;
                    let (l, h) = interval_mul(alo.data()[a], ahi.data()[a], blo.data()[b], bhi.data()[b]);
                    lo[i * n + j] += l;
                    hi[i * n + j] += h;
                }
            }
        }
        Ok(Self {
            min: ValueBounds::from_parts(Tensor::new(out.clone(), lo)?, out.clone()),
            max: ValueBounds::from_parts(Tensor::new(out.clone(), hi)?, out),
        })
    }

    pub fn reduce(&self, kind: ReduceKind, axis: Option<usize>, keepdims: bool) -> Result<Bounds> {
        let shape = self.shape().reduce(axis, keepdims)?;
        if let (Some(lo), Some(hi)) = (self.min.as_scalar(), self.max.as_scalar()) {
            let count = self.shape().reduced_count(axis) as f64;
            return Ok(match kind {
                ReduceKind::Sum => Self::uniform(lo * count, hi * count, shape),
                ReduceKind::Mean | ReduceKind::Max | ReduceKind::Min => {
                    Self::uniform(lo, hi, shape)
                }
            });
        }
        let lo = self.min.to_tensor()?.reduce(kind, axis, keepdims)?;
        let hi = self.max.to_tensor()?.reduce(kind, axis, keepdims)?;
        Ok(Self {
            min: ValueBounds::from_parts(lo, shape.clone()),
            max: ValueBounds::from_parts(hi, shape),
        })
    }

    pub fn reshape(&self, shape: &Shape) -> Result<Bounds> {
        let shape = self.shape().reshape(shape)?;
        Ok(Self {
            min: self.min.reshaped(shape.clone(), |t| t.reshape(&shape))?,
            max: self.max.reshaped(shape.clone(), |t| t.reshape(&shape))?,
        })
    }

    pub fn transpose(&self) -> Result<Bounds> {
        let shape = self.shape().transpose();
        Ok(Self {
            min: self.min.reshaped(shape.clone(), |t| Ok(t.transpose()))?,
            max: self.max.reshaped(shape, |t| Ok(t.transpose()))?,
        })
    }

    pub fn flatten(&self) -> Result<Bounds> {
        let shape = self.shape().flatten();
        self.reshape(&shape)
    }

    pub fn index_first(&self, index: usize) -> Result<Bounds> {
        let shape = self.shape().index_first(index)?;
        Ok(Self {
            min: self.min.reshaped(shape.clone(), |t| t.index_first(index))?,
            max: self.max.reshaped(shape, |t| t.index_first(index))?,
        })
    }

    pub fn concat(&self, other: &Bounds, axis: usize) -> Result<Bounds> {
        let shape = self.shape().concat(other.shape(), axis)?;
        let lo = self.min.to_tensor()?.concat(&other.min.to_tensor()?, axis)?;
        let hi = self.max.to_tensor()?.concat(&other.max.to_tensor()?, axis)?;
        Ok(Self {
            min: ValueBounds::from_parts(lo, shape.clone()),
            max: ValueBounds::from_parts(hi, shape),
        })
    }

    /// Uniform sample within the bounds. Display-only previews use this.
    pub fn sample(&self, mut uniform01: impl FnMut() -> f64) -> Result<Tensor> {
        let lo = self.min.to_tensor()?;
        let hi = self.max.to_tensor()?;
        let data = lo
            .data()
            .iter()
            .zip(hi.data().iter())
            .map(|(l, h)| {
                let (l, h) = (clamp_finite(*l), clamp_finite(*h));
                l + (h - l) * uniform01()
            })
            .collect();
        Tensor::new(self.shape().clone(), data)
    }
}

/// Bound used for previews when an interval side is unbounded.
const PREVIEW_LIMIT: f64 = 1e6;

fn clamp_finite(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(-PREVIEW_LIMIT, PREVIEW_LIMIT)
    }
}

/// `0 * inf` is taken to be 0 so unbounded operands do not poison the product.
fn mul0(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        0.0
    } else {
        a * b
    }
}

fn interval_mul(alo: f64, ahi: f64, blo: f64, bhi: f64) -> (f64, f64) {
    let c = [mul0(alo, blo), mul0(alo, bhi), mul0(ahi, blo), mul0(ahi, bhi)];
    (
        c.iter().copied().fold(f64::INFINITY, f64::min),
        c.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    )
}

fn interval_pow(lo: f64, hi: f64, p: f64) -> (f64, f64) {
    if p == 0.0 {
        return (1.0, 1.0);
    }
    let straddles_zero = lo < 0.0 && hi > 0.0;
    if straddles_zero && p < 0.0 {
        return (f64::NEG_INFINITY, f64::INFINITY);
    }
    let mut cands = vec![lo.powf(p), hi.powf(p)];
    if straddles_zero {
        cands.push(0.0);
    }
    (
        cands.iter().copied().fold(f64::INFINITY, f64::min),
        cands.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_arrays_collapse_to_scalar() {
        let t = Tensor::full([2, 3], 4.0, DType::Float64);
        let b = ValueBounds::from_tensor(&t);
        assert_eq!(b.as_scalar(), Some(4.0));
        assert_eq!(b.shape(), &Shape::from([2, 3]));
        let varied = Tensor::new([2], vec![1.0, 2.0]).unwrap();
        assert!(ValueBounds::from_tensor(&varied).as_scalar().is_none());
    }

    #[test]
    fn interval_arithmetic() {
        let a = Bounds::uniform(-1.0, 2.0, [3]);
        let b = Bounds::uniform(3.0, 4.0, [3]);
        let s = a.sub(&b).unwrap();
        assert_eq!((s.min.as_scalar(), s.max.as_scalar()), (Some(-5.0), Some(-1.0)));
        let m = a.mul(&b).unwrap();
        assert_eq!((m.min.as_scalar(), m.max.as_scalar()), (Some(-4.0), Some(8.0)));
        let d = b.div(&a).unwrap();
        assert_eq!(d.min.as_scalar(), Some(f64::NEG_INFINITY));
        let sq = a.pow_scalar(2.0).unwrap();
        assert_eq!((sq.min.as_scalar(), sq.max.as_scalar()), (Some(0.0), Some(4.0)));
        let ab = a.abs().unwrap();
        assert_eq!((ab.min.as_scalar(), ab.max.as_scalar()), (Some(0.0), Some(2.0)));
    }

    #[test]
    fn reductions_and_matmul() {
        let a = Bounds::uniform(0.0, 1.0, [3, 4]);
        let s = a.reduce(ReduceKind::Sum, Some(1), false).unwrap();
        assert_eq!(s.shape(), &Shape::from([3]));
        assert_eq!(s.max.as_scalar(), Some(4.0));
        let b = Bounds::uniform(-1.0, 1.0, [4, 5]);
        let mm = a.matmul(&b).unwrap();
        assert_eq!(mm.shape(), &Shape::from([3, 5]));
        assert_eq!((mm.min.as_scalar(), mm.max.as_scalar()), (Some(-4.0), Some(4.0)));
    }

    #[test]
    fn array_bounds_follow_shape_ops() {
        let lo = Tensor::new([2, 2], vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let hi = lo.map(DType::Float64, |v| v + 1.0);
        let b = Bounds::new(ValueBounds::from_tensor(&lo), ValueBounds::from_tensor(&hi)).unwrap();
        let t = b.transpose().unwrap();
        assert_eq!(t.min.to_tensor().unwrap().data(), &[0.0, 2.0, 1.0, 3.0]);
        let row = b.index_first(1).unwrap();
        assert_eq!(row.max.to_tensor().unwrap().data(), &[3.0, 4.0]);
        let w = b.widths().unwrap();
        assert_eq!(w.data(), &[1.0; 4]);
        let sample = b.sample(|| 0.5).unwrap();
        assert_eq!(sample.data(), &[0.5, 1.5, 2.5, 3.5]);
    }

    #[test]
    fn decoding_checks_bound_shapes() {
        let good = Bounds::uniform(0.0, 1.0, [2]);
        let json = serde_json::to_string(&good).unwrap();
        assert_eq!(serde_json::from_str::<Bounds>(&json).unwrap(), good);

        let mixed = Bounds {
            min: ValueBounds::scalar(0.0, [2]),
            max: ValueBounds::scalar(1.0, [3]),
        };
        let json = serde_json::to_string(&mixed).unwrap();
        assert!(serde_json::from_str::<Bounds>(&json).is_err());

        let wide = r#"{"data":{"Array":{"shape":[3],"dtype":"float64","data":[0.0,1.0,2.0]}},"shape":[2]}"#;
        assert!(serde_json::from_str::<ValueBounds>(wide).is_err());
    }
}
