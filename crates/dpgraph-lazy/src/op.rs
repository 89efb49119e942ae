//! Closed set of graph operations.
//!
//! Each operation carries every rule it needs: eager evaluation, shape and
//! dtype inference, interval bounds, linearity, and its vector-Jacobian
//! product. The lazy graph, the remote executor and the remote inference all
//! go through these tables, so a new operation is added in exactly one place.

use serde::{Deserialize, Serialize};

use dpgraph_core::bounds::Bounds;
use dpgraph_core::dtype::DType;
use dpgraph_core::error::Result;
use dpgraph_core::shape::Shape;
use dpgraph_core::tensor::{ReduceKind, Tensor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Log,
    PowScalar(f64),
    Clip { min: f64, max: f64 },
    Reshape(Shape),
    Transpose,
    Flatten,
    Index(usize),
    Copy,
    OnesLike,
    ZerosLike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    MatMul,
    Pow,
    Maximum,
    Minimum,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Concat(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReduceOp {
    pub kind: ReduceKind,
    pub axis: Option<usize>,
    pub keepdims: bool,
}

fn arith(d: DType) -> DType {
    if d == DType::Bool {
        DType::Int64
    } else {
        d
    }
}

fn bool_of(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

fn zip(a: &Tensor, b: &Tensor, f: impl Fn(f64, f64) -> f64) -> Result<Tensor> {
    a.zip_broadcast(b, DType::Float64, f)
}

impl UnaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::PowScalar(_) => "pow_scalar",
            UnaryOp::Clip { .. } => "clip",
            UnaryOp::Reshape(_) => "reshape",
            UnaryOp::Transpose => "transpose",
            UnaryOp::Flatten => "flatten",
            UnaryOp::Index(_) => "index",
            UnaryOp::Copy => "copy",
            UnaryOp::OnesLike => "ones_like",
            UnaryOp::ZerosLike => "zeros_like",
        }
    }

    pub fn dtype(&self, input: DType) -> DType {
        match self {
            UnaryOp::Neg => arith(input),
            UnaryOp::Sqrt | UnaryOp::Exp | UnaryOp::Log => input.to_float(),
            UnaryOp::PowScalar(p) if p.fract() == 0.0 && *p >= 0.0 => arith(input),
            UnaryOp::PowScalar(_) => input.to_float(),
            _ => input,
        }
    }

    pub fn shape(&self, input: &Shape) -> Result<Shape> {
        match self {
            UnaryOp::Reshape(target) => input.reshape(target),
            UnaryOp::Transpose => Ok(input.transpose()),
            UnaryOp::Flatten => Ok(input.flatten()),
            UnaryOp::Index(i) => input.index_first(*i),
            _ => Ok(input.clone()),
        }
    }

    /// Whether the output is linear in the input, given the input's linearity.
    pub fn linear(&self, input_linear: bool) -> bool {
        match self {
            UnaryOp::Neg
            | UnaryOp::Reshape(_)
            | UnaryOp::Transpose
            | UnaryOp::Flatten
            | UnaryOp::Index(_)
            | UnaryOp::Copy => input_linear,
            UnaryOp::OnesLike | UnaryOp::ZerosLike => true,
            UnaryOp::Abs
            | UnaryOp::Sqrt
            | UnaryOp::Exp
            | UnaryOp::Log
            | UnaryOp::PowScalar(_)
            | UnaryOp::Clip { .. } => false,
        }
    }

    pub fn eval(&self, x: &Tensor) -> Result<Tensor> {
        let dt = self.dtype(x.dtype());
        Ok(match self {
            UnaryOp::Neg => x.map(dt, |v| -v),
            UnaryOp::Abs => x.map(dt, f64::abs),
            UnaryOp::Sqrt => x.map(dt, f64::sqrt),
            UnaryOp::Exp => x.map(dt, f64::exp),
            UnaryOp::Log => x.map(dt, f64::ln),
            UnaryOp::PowScalar(p) => x.map(dt, |v| v.powf(*p)),
            UnaryOp::Clip { min, max } => x.map(dt, |v| v.max(*min).min(*max)),
            UnaryOp::Reshape(target) => x.reshape(target)?,
            UnaryOp::Transpose => x.transpose(),
            UnaryOp::Flatten => x.flatten(),
            UnaryOp::Index(i) => x.index_first(*i)?,
            UnaryOp::Copy => x.clone(),
            UnaryOp::OnesLike => x.ones_like(),
            UnaryOp::ZerosLike => x.zeros_like(),
        })
    }

    pub fn bounds(&self, b: &Bounds) -> Result<Bounds> {
        match self {
            UnaryOp::Neg => b.neg(),
            UnaryOp::Abs => b.abs(),
            UnaryOp::Sqrt => b.sqrt(),
            UnaryOp::Exp => b.exp(),
            UnaryOp::Log => b.log(),
            UnaryOp::PowScalar(p) => b.pow_scalar(*p),
            UnaryOp::Clip { min, max } => b.clip(*min, *max),
            UnaryOp::Reshape(target) => b.reshape(target),
            UnaryOp::Transpose => b.transpose(),
            UnaryOp::Flatten => b.flatten(),
            UnaryOp::Index(i) => b.index_first(*i),
            UnaryOp::Copy => Ok(b.clone()),
            UnaryOp::OnesLike => Ok(Bounds::uniform(1.0, 1.0, b.shape().clone())),
            UnaryOp::ZerosLike => Ok(Bounds::uniform(0.0, 0.0, b.shape().clone())),
        }
    }

    /// Gradient w.r.t. `x` given the upstream gradient `g` of the output `out`.
    pub fn vjp(&self, x: &Tensor, out: &Tensor, g: &Tensor) -> Result<Tensor> {
        match self {
            UnaryOp::Neg => Ok(g.map(DType::Float64, |v| -v)),
            UnaryOp::Abs => zip(g, x, |g, x| g * sign(x)),
            UnaryOp::Sqrt => zip(g, out, |g, y| g * 0.5 / y),
            UnaryOp::Exp => zip(g, out, |g, y| g * y),
            UnaryOp::Log => zip(g, x, |g, x| g / x),
            UnaryOp::PowScalar(p) => {
                let p = *p;
                zip(g, x, |g, x| g * p * x.powf(p - 1.0))
            }
            UnaryOp::Clip { min, max } => {
                zip(g, x, |g, x| if x >= *min && x <= *max { g } else { 0.0 })
            }
            UnaryOp::Reshape(_) | UnaryOp::Flatten => g.reshape(x.shape()),
            UnaryOp::Transpose => Ok(g.transpose()),
            UnaryOp::Index(i) => g.embed_first(*i, x.shape()),
            UnaryOp::Copy => Ok(g.clone()),
            UnaryOp::OnesLike | UnaryOp::ZerosLike => Ok(Tensor::zeros(x.shape().clone(), DType::Float64)),
        }
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::MatMul => "matmul",
            BinaryOp::Pow => "pow",
            BinaryOp::Maximum => "maximum",
            BinaryOp::Minimum => "minimum",
            BinaryOp::Lt => "lt",
            BinaryOp::Gt => "gt",
            BinaryOp::Le => "le",
            BinaryOp::Ge => "ge",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Concat(_) => "concatenate",
        }
    }

    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::Le
                | BinaryOp::Ge
                | BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::And
                | BinaryOp::Or
        )
    }

    pub fn dtype(&self, lhs: DType, rhs: DType) -> DType {
        match self {
            _ if self.is_boolean() => DType::Bool,
            BinaryOp::Div => lhs.promote(rhs).to_float(),
            BinaryOp::Maximum | BinaryOp::Minimum | BinaryOp::Concat(_) => lhs.promote(rhs),
            _ => arith(lhs.promote(rhs)),
        }
    }

    pub fn shape(&self, lhs: &Shape, rhs: &Shape) -> Result<Shape> {
        match self {
            BinaryOp::MatMul => lhs.matmul(rhs),
            BinaryOp::Concat(axis) => lhs.concat(rhs, *axis),
            _ => lhs.broadcast(rhs),
        }
    }

    /// Linearity of `node op node`.
    pub fn linear_nodes(&self, lhs: bool, rhs: bool) -> bool {
        match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Concat(_) => lhs && rhs,
            _ => false,
        }
    }

    /// Linearity of `node op constant`.
    pub fn linear_const_rhs(&self, lhs: bool) -> bool {
        match self {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::MatMul
            | BinaryOp::Concat(_) => lhs,
            _ => false,
        }
    }

    /// Linearity of `constant op node`.
    pub fn linear_const_lhs(&self, rhs: bool) -> bool {
        match self {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::MatMul
            | BinaryOp::Concat(_) => rhs,
            _ => false,
        }
    }

    pub fn eval(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let dt = self.dtype(a.dtype(), b.dtype());
        match self {
            BinaryOp::Add => a.zip_broadcast(b, dt, |x, y| x + y),
            BinaryOp::Sub => a.zip_broadcast(b, dt, |x, y| x - y),
            BinaryOp::Mul => a.zip_broadcast(b, dt, |x, y| x * y),
            BinaryOp::Div => a.zip_broadcast(b, dt, |x, y| x / y),
            BinaryOp::Pow => a.zip_broadcast(b, dt, f64::powf),
            BinaryOp::Maximum => a.zip_broadcast(b, dt, f64::max),
            BinaryOp::Minimum => a.zip_broadcast(b, dt, f64::min),
            BinaryOp::Lt => a.zip_broadcast(b, dt, |x, y| bool_of(x < y)),
            BinaryOp::Gt => a.zip_broadcast(b, dt, |x, y| bool_of(x > y)),
            BinaryOp::Le => a.zip_broadcast(b, dt, |x, y| bool_of(x <= y)),
            BinaryOp::Ge => a.zip_broadcast(b, dt, |x, y| bool_of(x >= y)),
            BinaryOp::Eq => a.zip_broadcast(b, dt, |x, y| bool_of(x == y)),
            BinaryOp::Ne => a.zip_broadcast(b, dt, |x, y| bool_of(x != y)),
            BinaryOp::And => a.zip_broadcast(b, dt, |x, y| bool_of(x != 0.0 && y != 0.0)),
            BinaryOp::Or => a.zip_broadcast(b, dt, |x, y| bool_of(x != 0.0 || y != 0.0)),
            BinaryOp::MatMul => Ok(a.matmul(b)?.cast(dt)),
            BinaryOp::Concat(axis) => a.concat(b, *axis),
        }
    }

    pub fn bounds(&self, a: &Bounds, b: &Bounds) -> Result<Bounds> {
        match self {
            BinaryOp::Add => a.add(b),
            BinaryOp::Sub => a.sub(b),
            BinaryOp::Mul => a.mul(b),
            BinaryOp::Div => a.div(b),
            BinaryOp::MatMul => a.matmul(b),
            BinaryOp::Pow => a.pow(b),
            BinaryOp::Maximum => a.maximum(b),
            BinaryOp::Minimum => a.minimum(b),
            BinaryOp::Concat(axis) => a.concat(b, *axis),
            _ => a.boolean(b),
        }
    }

    /// Gradients w.r.t. `a` and `b`, each summed back to its operand's shape.
    pub fn vjp(&self, a: &Tensor, b: &Tensor, out: &Tensor, g: &Tensor) -> Result<(Tensor, Tensor)> {
        let (ga, gb) = match self {
            BinaryOp::Add => (g.clone(), g.clone()),
            BinaryOp::Sub => (g.clone(), g.map(DType::Float64, |v| -v)),
            BinaryOp::Mul => (zip(g, b, |g, y| g * y)?, zip(g, a, |g, x| g * x)?),
            BinaryOp::Div => (
                zip(g, b, |g, y| g / y)?,
                zip(&zip(g, a, |g, x| g * x)?, b, |gx, y| -gx / (y * y))?,
            ),
            BinaryOp::Pow => {
                let ga = zip(
                    &zip(g, b, |g, y| g * y)?,
                    &zip(a, b, |x, y| x.powf(y - 1.0))?,
                    |l, r| l * r,
                )?;
                let gb = zip(&zip(g, out, |g, o| g * o)?, a, |go, x| {
                    if x > 0.0 {
                        go * x.ln()
                    } else {
                        0.0
                    }
                })?;
                (ga, gb)
            }
            BinaryOp::Maximum => (
                zip(&zip(a, b, |x, y| bool_of(x >= y))?, g, |m, g| m * g)?,
                zip(&zip(a, b, |x, y| bool_of(x < y))?, g, |m, g| m * g)?,
            ),
            BinaryOp::Minimum => (
                zip(&zip(a, b, |x, y| bool_of(x <= y))?, g, |m, g| m * g)?,
                zip(&zip(a, b, |x, y| bool_of(x > y))?, g, |m, g| m * g)?,
            ),
            BinaryOp::MatMul => return matmul_vjp(a, b, g),
            BinaryOp::Concat(axis) => {
                let at = a.shape().dims().get(*axis).copied().unwrap_or(0);
                return g.cast(DType::Float64).split_at(*axis, at);
            }
            _ => {
                return Ok((
                    Tensor::zeros(a.shape().clone(), DType::Float64),
                    Tensor::zeros(b.shape().clone(), DType::Float64),
                ))
            }
        };
        Ok((ga.sum_to(a.shape())?, gb.sum_to(b.shape())?))
    }
}

fn as_matrix(t: &Tensor, vector_is_row: bool) -> Result<Tensor> {
    match t.shape().dims() {
        [k] if vector_is_row => t.reshape(&Shape::from([1, *k])),
        [k] => t.reshape(&Shape::from([*k, 1])),
        _ => Ok(t.clone()),
    }
}

fn matmul_vjp(a: &Tensor, b: &Tensor, g: &Tensor) -> Result<(Tensor, Tensor)> {
    let a2 = as_matrix(a, true)?;
    let b2 = as_matrix(b, false)?;
    let m = a2.shape().dims()[0];
    let n = b2.shape().dims()[1];
    let g2 = g.cast(DType::Float64).reshape(&Shape::from([m, n]))?;
    let ga = g2.matmul(&b2.transpose())?.reshape(a.shape())?;
    let gb = a2.transpose().matmul(&g2)?.reshape(b.shape())?;
    Ok((ga.cast(DType::Float64), gb.cast(DType::Float64)))
}

impl ReduceOp {
    pub fn new(kind: ReduceKind, axis: Option<usize>, keepdims: bool) -> Self {
        Self {
            kind,
            axis,
            keepdims,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn dtype(&self, input: DType) -> DType {
        self.kind.output_dtype(input)
    }

    pub fn shape(&self, input: &Shape) -> Result<Shape> {
        input.reduce(self.axis, self.keepdims)
    }

    pub fn linear(&self, input_linear: bool) -> bool {
        match self.kind {
            ReduceKind::Sum | ReduceKind::Mean => input_linear,
            ReduceKind::Max | ReduceKind::Min => false,
        }
    }

    pub fn eval(&self, x: &Tensor) -> Result<Tensor> {
        x.reduce(self.kind, self.axis, self.keepdims)
    }

    pub fn bounds(&self, b: &Bounds) -> Result<Bounds> {
        b.reduce(self.kind, self.axis, self.keepdims)
    }

    pub fn vjp(&self, x: &Tensor, out: &Tensor, g: &Tensor) -> Result<Tensor> {
        let kept = x.shape().reduce(self.axis, true)?;
        let g = g.cast(DType::Float64).reshape(&kept)?.broadcast_to(x.shape())?;
        match self.kind {
            ReduceKind::Sum => Ok(g),
            ReduceKind::Mean => {
                let n = x.shape().reduced_count(self.axis).max(1) as f64;
                Ok(g.map(DType::Float64, |v| v / n))
            }
            ReduceKind::Max | ReduceKind::Min => {
                let extreme = out.reshape(&kept)?.broadcast_to(x.shape())?;
                let mask = zip(x, &extreme, |v, e| bool_of(v == e))?;
                zip(&mask, &g, |m, g| m * g)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], data: &[f64]) -> Tensor {
        Tensor::new(shape, data.to_vec()).unwrap()
    }

    #[test]
    fn comparison_yields_bool() {
        let a = t(&[3], &[1.0, 2.0, 3.0]);
        let b = t(&[3], &[2.0, 2.0, 2.0]);
        let c = BinaryOp::Lt.eval(&a, &b).unwrap();
        assert_eq!(c.dtype(), DType::Bool);
        assert_eq!(c.data(), &[1.0, 0.0, 0.0]);
        assert_eq!(BinaryOp::Div.dtype(DType::Int64, DType::Int64), DType::Float64);
        assert_eq!(BinaryOp::Add.dtype(DType::Int32, DType::Int32), DType::Int32);
    }

    #[test]
    fn mul_vjp_sums_over_broadcast() {
        let a = t(&[2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = t(&[2], &[10.0, 20.0]);
        let out = BinaryOp::Mul.eval(&a, &b).unwrap();
        let g = Tensor::ones(out.shape().clone(), DType::Float64);
        let (ga, gb) = BinaryOp::Mul.vjp(&a, &b, &out, &g).unwrap();
        assert_eq!(ga.data(), &[10.0, 20.0, 10.0, 20.0]);
        assert_eq!(gb.shape(), b.shape());
        assert_eq!(gb.data(), &[4.0, 6.0]);
    }

    #[test]
    fn matmul_vjp_matches_hand_derivation() {
        let a = t(&[1, 2], &[1.0, 2.0]);
        let b = t(&[2, 1], &[3.0, 4.0]);
        let out = BinaryOp::MatMul.eval(&a, &b).unwrap();
        let g = Tensor::ones(out.shape().clone(), DType::Float64);
        let (ga, gb) = BinaryOp::MatMul.vjp(&a, &b, &out, &g).unwrap();
        assert_eq!(ga.data(), &[3.0, 4.0]);
        assert_eq!(gb.data(), &[1.0, 2.0]);
    }

    #[test]
    fn max_reduction_routes_gradient_to_argmax() {
        let x = t(&[2, 2], &[1.0, 5.0, 7.0, 2.0]);
        let op = ReduceOp::new(ReduceKind::Max, Some(1), false);
        let out = op.eval(&x).unwrap();
        let g = Tensor::ones(out.shape().clone(), DType::Float64);
        let gx = op.vjp(&x, &out, &g).unwrap();
        assert_eq!(gx.data(), &[0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn linearity_table() {
        assert!(BinaryOp::Add.linear_nodes(true, true));
        assert!(!BinaryOp::Add.linear_nodes(true, false));
        assert!(!BinaryOp::Mul.linear_nodes(true, true));
        assert!(BinaryOp::Mul.linear_const_rhs(true));
        assert!(BinaryOp::Div.linear_const_rhs(true));
        assert!(!BinaryOp::Div.linear_const_lhs(true));
        assert!(!BinaryOp::Pow.linear_const_rhs(true));
        assert!(!UnaryOp::Abs.linear(true));
        assert!(UnaryOp::OnesLike.linear(false));
    }
}
