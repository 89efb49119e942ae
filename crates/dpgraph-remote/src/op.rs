//! The closed set of operations a party will execute, and their wire names.

use std::collections::BTreeMap;

use dpgraph_core::shape::Shape;
use dpgraph_core::tensor::ReduceKind;
use dpgraph_lazy::{BinaryOp, ReduceOp, UnaryOp};

use crate::error::{RemoteError, Result};
use crate::message::Arg;

/// Namespace prefix of every qualified op name.
pub const NAMESPACE: &str = "tensor";

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOp {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Reduce(ReduceOp),
}

const UNARY_NAMES: &[&str] = &[
    "neg", "abs", "sqrt", "exp", "log", "pow_scalar", "clip", "reshape", "transpose", "flatten",
    "index", "copy", "ones_like", "zeros_like",
];

const BINARY_NAMES: &[&str] = &[
    "add", "sub", "mul", "div", "matmul", "pow", "maximum", "minimum", "lt", "gt", "le", "ge",
    "eq", "ne", "and", "or", "concatenate",
];

const REDUCE_NAMES: &[&str] = &["sum", "mean", "max", "min"];

impl RemoteOp {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteOp::Unary(op) => op.name(),
            RemoteOp::Binary(op) => op.name(),
            RemoteOp::Reduce(op) => op.name(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{NAMESPACE}.{}", self.name())
    }

    /// Every qualified name [`RemoteOp::parse`] accepts.
    pub fn all_qualified_names() -> Vec<String> {
        UNARY_NAMES
            .iter()
            .chain(BINARY_NAMES)
            .chain(REDUCE_NAMES)
            .map(|n| format!("{NAMESPACE}.{n}"))
            .collect()
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, RemoteOp::Binary(_))
    }

    /// Keyword parameters that travel with the command.
    pub fn kwargs(&self) -> BTreeMap<String, Arg> {
        let mut out = BTreeMap::new();
        match self {
            RemoteOp::Unary(UnaryOp::PowScalar(p)) => {
                out.insert("exponent".into(), Arg::Scalar(*p));
            }
            RemoteOp::Unary(UnaryOp::Clip { min, max }) => {
                out.insert("min".into(), Arg::Scalar(*min));
                out.insert("max".into(), Arg::Scalar(*max));
            }
            RemoteOp::Unary(UnaryOp::Reshape(shape)) => {
                out.insert("shape".into(), Arg::Shape(shape.dims().to_vec()));
            }
            RemoteOp::Unary(UnaryOp::Index(i)) => {
                out.insert("index".into(), Arg::Int(*i as i64));
            }
            RemoteOp::Binary(BinaryOp::Concat(axis)) => {
                out.insert("axis".into(), Arg::Int(*axis as i64));
            }
            RemoteOp::Reduce(op) => {
                if let Some(axis) = op.axis {
                    out.insert("axis".into(), Arg::Int(axis as i64));
                }
                out.insert("keepdims".into(), Arg::Bool(op.keepdims));
            }
            _ => {}
        }
        out
    }

    /// Parse a qualified name plus its keyword parameters.
    pub fn parse(qualified: &str, kwargs: &BTreeMap<String, Arg>) -> Result<RemoteOp> {
        let name = qualified
            .strip_prefix(NAMESPACE)
            .and_then(|rest| rest.strip_prefix('.'))
            .ok_or_else(|| RemoteError::BadArgument(format!("unqualified op name `{qualified}`")))?;
        let kw = Kwargs { op: qualified, map: kwargs };
        let op = match name {
            "neg" => RemoteOp::Unary(UnaryOp::Neg),
            "abs" => RemoteOp::Unary(UnaryOp::Abs),
            "sqrt" => RemoteOp::Unary(UnaryOp::Sqrt),
            "exp" => RemoteOp::Unary(UnaryOp::Exp),
            "log" => RemoteOp::Unary(UnaryOp::Log),
            "pow_scalar" => RemoteOp::Unary(UnaryOp::PowScalar(kw.f64("exponent")?)),
            "clip" => RemoteOp::Unary(UnaryOp::Clip {
                min: kw.f64("min")?,
                max: kw.f64("max")?,
            }),
            "reshape" => match kw.get("shape")? {
                Arg::Shape(dims) => RemoteOp::Unary(UnaryOp::Reshape(Shape::new(dims.clone()))),
                _ => return Err(kw.bad("shape")),
            },
            "transpose" => RemoteOp::Unary(UnaryOp::Transpose),
            "flatten" => RemoteOp::Unary(UnaryOp::Flatten),
            "index" => RemoteOp::Unary(UnaryOp::Index(kw.usize("index")?)),
            "copy" => RemoteOp::Unary(UnaryOp::Copy),
            "ones_like" => RemoteOp::Unary(UnaryOp::OnesLike),
            "zeros_like" => RemoteOp::Unary(UnaryOp::ZerosLike),

            "add" => RemoteOp::Binary(BinaryOp::Add),
            "sub" => RemoteOp::Binary(BinaryOp::Sub),
            "mul" => RemoteOp::Binary(BinaryOp::Mul),
            "div" => RemoteOp::Binary(BinaryOp::Div),
            "matmul" => RemoteOp::Binary(BinaryOp::MatMul),
            "pow" => RemoteOp::Binary(BinaryOp::Pow),
            "maximum" => RemoteOp::Binary(BinaryOp::Maximum),
            "minimum" => RemoteOp::Binary(BinaryOp::Minimum),
            "lt" => RemoteOp::Binary(BinaryOp::Lt),
            "gt" => RemoteOp::Binary(BinaryOp::Gt),
            "le" => RemoteOp::Binary(BinaryOp::Le),
            "ge" => RemoteOp::Binary(BinaryOp::Ge),
            "eq" => RemoteOp::Binary(BinaryOp::Eq),
            "ne" => RemoteOp::Binary(BinaryOp::Ne),
            "and" => RemoteOp::Binary(BinaryOp::And),
            "or" => RemoteOp::Binary(BinaryOp::Or),
            "concatenate" => RemoteOp::Binary(BinaryOp::Concat(kw.usize("axis")?)),

            "sum" | "mean" | "max" | "min" => {
                let kind = match name {
                    "sum" => ReduceKind::Sum,
                    "mean" => ReduceKind::Mean,
                    "max" => ReduceKind::Max,
                    _ => ReduceKind::Min,
                };
                let axis = match kwargs.get("axis") {
                    Some(arg) => Some(arg.as_usize().ok_or_else(|| kw.bad("axis"))?),
                    None => None,
                };
                let keepdims = match kwargs.get("keepdims") {
                    Some(arg) => arg.as_bool().ok_or_else(|| kw.bad("keepdims"))?,
                    None => false,
                };
                RemoteOp::Reduce(ReduceOp::new(kind, axis, keepdims))
            }
            other => {
                return Err(RemoteError::BadArgument(format!("unknown op `{other}`")));
            }
        };
        Ok(op)
    }
}

struct Kwargs<'a> {
    op: &'a str,
    map: &'a BTreeMap<String, Arg>,
}

impl Kwargs<'_> {
    fn bad(&self, key: &str) -> RemoteError {
        RemoteError::BadArgument(format!("`{}`: invalid or missing `{key}`", self.op))
    }

    fn get(&self, key: &str) -> Result<&Arg> {
        self.map.get(key).ok_or_else(|| self.bad(key))
    }

    fn f64(&self, key: &str) -> Result<f64> {
        self.get(key)?.as_f64().ok_or_else(|| self.bad(key))
    }

    fn usize(&self, key: &str) -> Result<usize> {
        self.get(key)?.as_usize().ok_or_else(|| self.bad(key))
    }
}
