//! Logical element types and the promotion table used by dtype inference.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// dtype given to an integer literal operand.
    pub const DEFAULT_INT: DType = DType::Int64;
    /// dtype given to a float literal operand.
    pub const DEFAULT_FLOAT: DType = DType::Float64;

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::Int32 | DType::Int64)
    }

    /// Wider of the two (bool < int32 < int64 < float32 < float64).
    pub fn promote(self, other: DType) -> DType {
        self.max(other)
    }

    /// Promotion against a literal scalar: the literal only widens the result
    /// when it belongs to a higher kind (bool < integer < float).
    pub fn absorb_scalar(self, scalar: DType) -> DType {
        if kind_rank(scalar) <= kind_rank(self) {
            self
        } else {
            self.promote(scalar)
        }
    }

    /// dtype of a true division or mean of this dtype.
    pub fn to_float(self) -> DType {
        if self.is_float() {
            self
        } else {
            DType::Float64
        }
    }

    /// Round a raw f64 to what this dtype can represent.
    pub fn coerce(self, v: f64) -> f64 {
        match self {
            DType::Bool => {
                if v != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            DType::Int32 | DType::Int64 => v.trunc(),
            DType::Float32 => v as f32 as f64,
            DType::Float64 => v,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }
}

fn kind_rank(d: DType) -> u8 {
    match d {
        DType::Bool => 0,
        DType::Int32 | DType::Int64 => 1,
        DType::Float32 | DType::Float64 => 2,
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(DType::Bool),
            "int32" => Ok(DType::Int32),
            "int64" => Ok(DType::Int64),
            "float32" => Ok(DType::Float32),
            "float64" => Ok(DType::Float64),
            other => Err(Error::UnsupportedOperand(format!("unknown dtype '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_picks_wider() {
        assert_eq!(DType::Int32.promote(DType::Float32), DType::Float32);
        assert_eq!(DType::Bool.promote(DType::Int64), DType::Int64);
        assert_eq!(DType::Int64.to_float(), DType::Float64);
        assert_eq!(DType::Float32.to_float(), DType::Float32);
        assert_eq!(DType::Int32.absorb_scalar(DType::Int64), DType::Int32);
        assert_eq!(DType::Float32.absorb_scalar(DType::Float64), DType::Float32);
        assert_eq!(DType::Int32.absorb_scalar(DType::Float64), DType::Float64);
    }

    #[test]
    fn coerce_and_parse() {
        assert_eq!(DType::Int64.coerce(2.7), 2.0);
        assert_eq!(DType::Bool.coerce(-3.0), 1.0);
        assert_eq!("float32".parse::<DType>().unwrap(), DType::Float32);
        assert!("complex64".parse::<DType>().is_err());
    }
}
