//! Operations a triple can be correlated for.
use std::fmt::Display;

use crate::algebra::{Ring, Shape, ShapeMismatch, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Operation {
    /// Elementwise multiplication (with broadcasting)
    Mul,
    /// Matrix multiplication
    MatMul,
    /// Equality test, served by comparison protocols
    Equal,
    /// Less-or-equal test, served by comparison protocols
    LessOrEqual,
}

pub type Kernel<R> = fn(&Tensor<R>, &Tensor<R>) -> Result<Tensor<R>, ShapeMismatch>;

impl Operation {
    /// The bilinear map a Beaver triple for this operation satisfies,
    /// `None` for operations that don't multiply.
    pub fn kernel<R: Ring>(self) -> Option<Kernel<R>> {
        match self {
            Operation::Mul => Some(Tensor::mul as Kernel<R>),
            Operation::MatMul => Some(Tensor::matmul as Kernel<R>),
            Operation::Equal | Operation::LessOrEqual => None,
        }
    }

    pub fn is_multiplicative(self) -> bool {
        matches!(self, Operation::Mul | Operation::MatMul)
    }

    /// Shape of `op(x, y)`.
    pub fn output_shape(self, x: &Shape, y: &Shape) -> Result<Shape, ShapeMismatch> {
        let out = match self {
            Operation::Mul | Operation::Equal | Operation::LessOrEqual => x.broadcast(y),
            Operation::MatMul => x.matmul(y),
        };
        out.ok_or_else(|| ShapeMismatch {
            left: x.clone(),
            right: y.clone(),
        })
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Mul => "mul",
            Operation::MatMul => "matmul",
            Operation::Equal => "eq",
            Operation::LessOrEqual => "le",
        };
        f.write_str(name)
    }
}
