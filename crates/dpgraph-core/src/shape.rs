//! Tensor shapes and the shape rules every operation (local or remote) follows.
//!
//! The remote dispatcher infers result shapes with exactly these functions, so
//! they must agree with what the tensor kernel actually produces.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into())
    }

    /// Zero-dimensional shape (one element).
    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Row-major strides.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.0.len()];
        for i in (0..self.0.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides
    }

    /// Multi-index of a row-major flat offset.
    pub fn unravel(&self, mut flat: usize) -> Vec<usize> {
        let mut idx = vec![0; self.0.len()];
        for (axis, dim) in self.0.iter().enumerate().rev() {
            if *dim > 0 {
                idx[axis] = flat % dim;
                flat /= dim;
            }
        }
        idx
    }

    /// NumPy broadcasting.
    pub fn broadcast(&self, other: &Shape) -> Result<Shape> {
        let ndim = self.ndim().max(other.ndim());
        let mut out = vec![0; ndim];
        for i in 0..ndim {
            let a = dim_from_right(&self.0, ndim, i);
            let b = dim_from_right(&other.0, ndim, i);
            out[i] = match (a, b) {
                (a, b) if a == b => a,
                (1, b) => b,
                (a, 1) => a,
                _ => {
                    return Err(Error::ShapeMismatch {
                        op: "broadcast",
                        lhs: self.clone(),
                        rhs: other.clone(),
                    })
                }
            };
        }
        Ok(Shape(out))
    }

    /// True if `self` can be broadcast up to `target` without changing `target`.
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        matches!(self.broadcast(target), Ok(ref s) if s == target)
    }

    /// `matmul` for 1-d and 2-d operands (NumPy semantics for vectors).
    pub fn matmul(&self, other: &Shape) -> Result<Shape> {
        let mismatch = || Error::ShapeMismatch {
            op: "matmul",
            lhs: self.clone(),
            rhs: other.clone(),
        };
        if self.ndim() == 0 || other.ndim() == 0 {
            return Err(Error::UnsupportedOperand(
                "matmul requires at least 1-d operands".into(),
            ));
        }
        if self.ndim() > 2 || other.ndim() > 2 {
            return Err(Error::UnsupportedOperand(format!(
                "matmul supports at most 2-d operands, got {self} and {other}"
            )));
        }
        let (m, k_left) = match self.0.as_slice() {
            [k] => (None, *k),
            [m, k] => (Some(*m), *k),
            _ => return Err(mismatch()),
        };
        let (k_right, n) = match other.0.as_slice() {
            [k] => (*k, None),
            [k, n] => (*k, Some(*n)),
            _ => return Err(mismatch()),
        };
        if k_left != k_right {
            return Err(mismatch());
        }
        let mut dims = Vec::with_capacity(2);
        dims.extend(m);
        dims.extend(n);
        Ok(Shape(dims))
    }

    pub fn concat(&self, other: &Shape, axis: usize) -> Result<Shape> {
        if self.ndim() != other.ndim() {
            return Err(Error::ShapeMismatch {
                op: "concatenate",
                lhs: self.clone(),
                rhs: other.clone(),
            });
        }
        if axis >= self.ndim() {
            return Err(Error::InvalidAxis {
                axis,
                ndim: self.ndim(),
            });
        }
        let mut out = self.0.clone();
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            if i == axis {
                out[i] = a + b;
            } else if a != b {
                return Err(Error::ShapeMismatch {
                    op: "concatenate",
                    lhs: self.clone(),
                    rhs: other.clone(),
                });
            }
        }
        Ok(Shape(out))
    }

    /// Shape after reducing `axis` (all axes when `None`).
    pub fn reduce(&self, axis: Option<usize>, keepdims: bool) -> Result<Shape> {
        match axis {
            None if keepdims => Ok(Shape(vec![1; self.ndim()])),
            None => Ok(Shape::scalar()),
            Some(axis) if axis >= self.ndim() => Err(Error::InvalidAxis {
                axis,
                ndim: self.ndim(),
            }),
            Some(axis) => {
                let mut dims = self.0.clone();
                if keepdims {
                    dims[axis] = 1;
                } else {
                    dims.remove(axis);
                }
                Ok(Shape(dims))
            }
        }
    }

    /// Number of input elements folded into each output element by `reduce`.
    pub fn reduced_count(&self, axis: Option<usize>) -> usize {
        match axis {
            None => self.numel(),
            Some(axis) => self.0.get(axis).copied().unwrap_or(1),
        }
    }

    pub fn transpose(&self) -> Shape {
        let mut dims = self.0.clone();
        dims.reverse();
        Shape(dims)
    }

    pub fn reshape(&self, target: &Shape) -> Result<Shape> {
        if self.numel() != target.numel() {
            return Err(Error::ShapeMismatch {
                op: "reshape",
                lhs: self.clone(),
                rhs: target.clone(),
            });
        }
        Ok(target.clone())
    }

    pub fn flatten(&self) -> Shape {
        Shape(vec![self.numel()])
    }

    /// Shape after selecting one entry along axis 0.
    pub fn index_first(&self, index: usize) -> Result<Shape> {
        match self.0.first() {
            Some(len) if index < *len => Ok(Shape(self.0[1..].to_vec())),
            Some(_) => Err(Error::UnsupportedOperand(format!(
                "index {index} out of bounds for shape {self}"
            ))),
            None => Err(Error::NotSupported("indexing a 0-d tensor".into())),
        }
    }
}

fn dim_from_right(dims: &[usize], ndim: usize, i: usize) -> usize {
    let offset = ndim - dims.len();
    if i < offset {
        1
    } else {
        dims[i - offset]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Self(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(v: &[usize]) -> Self {
        Self(v.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(v: [usize; N]) -> Self {
        Self(v.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_follows_numpy_rules() {
        let a = Shape::from([3, 1]);
        let b = Shape::from([4]);
        assert_eq!(a.broadcast(&b).unwrap(), Shape::from([3, 4]));
        assert!(Shape::from([3, 4]).broadcast(&Shape::from([4, 3])).is_err());
        assert_eq!(
            Shape::scalar().broadcast(&Shape::from([2, 2])).unwrap(),
            Shape::from([2, 2])
        );
    }

    #[test]
    fn matmul_shapes() {
        let s = Shape::from([3, 4]).matmul(&Shape::from([4, 5])).unwrap();
        assert_eq!(s, Shape::from([3, 5]));
        let v = Shape::from([4]).matmul(&Shape::from([4, 2])).unwrap();
        assert_eq!(v, Shape::from([2]));
        let dot = Shape::from([4]).matmul(&Shape::from([4])).unwrap();
        assert!(dot.is_scalar());
        assert!(matches!(
            Shape::from([3, 4]).matmul(&Shape::from([3, 4])),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn reduce_and_display() {
        let s = Shape::from([2, 3, 4]);
        assert_eq!(s.reduce(Some(1), false).unwrap(), Shape::from([2, 4]));
        assert_eq!(s.reduce(Some(1), true).unwrap(), Shape::from([2, 1, 4]));
        assert_eq!(s.reduce(None, false).unwrap(), Shape::scalar());
        assert!(s.reduce(Some(3), false).is_err());
        assert_eq!(Shape::from([3]).to_string(), "(3,)");
        assert_eq!(s.strides(), vec![12, 4, 1]);
        assert_eq!(s.unravel(13), vec![1, 0, 1]);
    }
}
