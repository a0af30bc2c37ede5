//! Dense tensors over a ring.
//!
//! `Tensor<R>` is a row-major, boxed-slice backed array with a `Shape`. Like
//! the plain vectors we used to carry shares around, tensors don't grow or
//! shrink. Addition and subtraction require equal shapes, elementwise
//! multiplication broadcasts (numpy rules), and matrix multiplication works on
//! rank-2 tensors.
//!
//! If the rayon feature is enabled the heavier kernels will be parallelized.

use std::fmt::Display;

use itertools::Itertools;
use rand::RngCore;
use rayon::prelude::*;
use thiserror::Error;

use crate::algebra::ring::Ring;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape(pub Vec<usize>);

impl Shape {
    pub fn scalar() -> Self {
        Shape(vec![])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of elements a tensor of this shape holds.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major strides.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.rank()];
        for i in (0..self.rank().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides
    }

    /// The shape two operands broadcast to, if they are compatible.
    pub fn broadcast(&self, other: &Shape) -> Option<Shape> {
        let rank = self.rank().max(other.rank());
        let dim = |s: &Shape, i: usize| {
            let offset = rank - s.rank();
            if i < offset {
                1
            } else {
                s.0[i - offset]
            }
        };
        (0..rank)
            .map(|i| match (dim(self, i), dim(other, i)) {
                (a, b) if a == b => Some(a),
                (1, b) => Some(b),
                (a, 1) => Some(a),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Shape)
    }

    /// The shape of `self @ other`, if they are compatible.
    pub fn matmul(&self, other: &Shape) -> Option<Shape> {
        match (self.dims(), other.dims()) {
            (&[m, k1], &[k2, n]) if k1 == k2 => Some(Shape(vec![m, n])),
            _ => None,
        }
    }

    // Strides for reading `self` as if it had been broadcast to `out`.
    fn broadcast_strides(&self, out: &Shape) -> Vec<usize> {
        let offset = out.rank() - self.rank();
        let own = self.strides();
        (0..out.rank())
            .map(|i| {
                if i < offset || self.0[i - offset] == 1 {
                    0
                } else {
                    own[i - offset]
                }
            })
            .collect()
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.iter().join(", "))
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape(dims.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Shapes {left} and {right} are incompatible")]
pub struct ShapeMismatch {
    pub left: Shape,
    pub right: Shape,
}

/// Represention of a tensor with elements of type `R`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawTensor<R>")]
pub struct Tensor<R> {
    shape: Shape,
    data: Box<[R]>,
}

/// Wire form of a tensor, checked before it becomes a [`Tensor`].
#[derive(serde::Deserialize)]
struct RawTensor<R> {
    shape: Shape,
    data: Vec<R>,
}

impl<R> TryFrom<RawTensor<R>> for Tensor<R> {
    type Error = ShapeMismatch;

    fn try_from(RawTensor { shape, data }: RawTensor<R>) -> Result<Self, Self::Error> {
        // Shapes may come off the wire, so don't trust their product not to overflow.
        let numel = shape
            .0
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim));
        if numel != Some(data.len()) {
            return Err(ShapeMismatch {
                left: shape,
                right: Shape(vec![data.len()]),
            });
        }
        Ok(Self {
            shape,
            data: data.into_boxed_slice(),
        })
    }
}

impl<R: Ring> Tensor<R> {
    /// Construct a tensor from row-major data.
    ///
    /// Fails if the data doesn't fill the shape exactly.
    pub fn from_vec(shape: impl Into<Shape>, data: Vec<R>) -> Result<Self, ShapeMismatch> {
        Self::try_from(RawTensor {
            shape: shape.into(),
            data,
        })
    }

    pub fn scalar(val: R) -> Self {
        Self {
            shape: Shape::scalar(),
            data: Box::new([val]),
        }
    }

    pub fn filled(shape: impl Into<Shape>, val: R) -> Self {
        let shape = shape.into();
        let data = vec![val; shape.numel()].into_boxed_slice();
        Self { shape, data }
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::filled(shape, R::ADD_IDENTITY)
    }

    pub fn identity(n: usize) -> Self {
        let mut id = Self::zeros([n, n]);
        for i in 0..n {
            id.data[i * n + i] = R::MUL_IDENTITY;
        }
        id
    }

    pub fn random(shape: impl Into<Shape>, rng: &mut impl RngCore) -> Self {
        let shape = shape.into();
        let data = (0..shape.numel()).map(|_| R::random(rng)).collect();
        Self { shape, data }
    }

    /// Embed unsigned integers, reducing them by the modulus.
    pub fn from_u64s(shape: impl Into<Shape>, vals: &[u64]) -> Result<Self, ShapeMismatch> {
        Self::from_vec(shape, vals.iter().map(|&v| R::from_u64(v)).collect())
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<R> {
        self.data.iter()
    }

    fn zip_with(
        mut self,
        rhs: &Self,
        f: impl Fn(&mut R, R) + Send + Sync,
    ) -> Result<Self, ShapeMismatch> {
        if self.shape != rhs.shape {
            return Err(ShapeMismatch {
                left: self.shape,
                right: rhs.shape.clone(),
            });
        }
        if cfg!(feature = "rayon") {
            self.data
                .par_iter_mut()
                .zip(rhs.data.par_iter())
                .for_each(|(a, &b)| f(a, b));
        } else {
            self.data
                .iter_mut()
                .zip(rhs.data.iter())
                .for_each(|(a, &b)| f(a, b));
        }
        Ok(self)
    }

    /// Elementwise sum of two tensors of equal shape.
    pub fn try_add(self, rhs: &Self) -> Result<Self, ShapeMismatch> {
        self.zip_with(rhs, |a, b| *a += b)
    }

    /// Elementwise difference of two tensors of equal shape.
    pub fn try_sub(self, rhs: &Self) -> Result<Self, ShapeMismatch> {
        self.zip_with(rhs, |a, b| *a -= b)
    }

    /// Multiply every element by a public constant.
    #[must_use]
    pub fn scale(mut self, scalar: R) -> Self {
        self.data.iter_mut().for_each(|a| *a *= scalar);
        self
    }

    /// Elementwise (Hadamard) product with broadcasting.
    pub fn mul(&self, rhs: &Self) -> Result<Self, ShapeMismatch> {
        let shape = self
            .shape
            .broadcast(&rhs.shape)
            .ok_or_else(|| ShapeMismatch {
                left: self.shape.clone(),
                right: rhs.shape.clone(),
            })?;
        if self.shape == rhs.shape {
            let data = self.data.iter().zip(rhs.data.iter()).map(|(&a, &b)| a * b).collect();
            return Ok(Self { shape, data });
        }

        let lhs_strides = self.shape.broadcast_strides(&shape);
        let rhs_strides = rhs.shape.broadcast_strides(&shape);
        let dims = shape.dims();
        let data = (0..shape.numel())
            .map(|flat| {
                let (mut rem, mut l, mut r) = (flat, 0, 0);
                for axis in (0..dims.len()).rev() {
                    let i = rem % dims[axis];
                    rem /= dims[axis];
                    l += i * lhs_strides[axis];
                    r += i * rhs_strides[axis];
                }
                self.data[l] * rhs.data[r]
            })
            .collect();
        Ok(Self { shape, data })
    }

    /// Matrix product of two rank-2 tensors.
    pub fn matmul(&self, rhs: &Self) -> Result<Self, ShapeMismatch> {
        let shape = self.shape.matmul(&rhs.shape).ok_or_else(|| ShapeMismatch {
            left: self.shape.clone(),
            right: rhs.shape.clone(),
        })?;
        let (k, n) = (self.shape.0[1], rhs.shape.0[1]);
        let row = |i: usize| -> Vec<R> {
            (0..n)
                .map(|j| {
                    (0..k).fold(R::ADD_IDENTITY, |acc, t| {
                        acc + self.data[i * k + t] * rhs.data[t * n + j]
                    })
                })
                .collect()
        };
        let rows: Vec<Vec<R>> = if cfg!(feature = "rayon") {
            (0..shape.0[0]).into_par_iter().map(row).collect()
        } else {
            (0..shape.0[0]).map(row).collect()
        };
        let data = rows.into_iter().flatten().collect();
        Ok(Self { shape, data })
    }
}

impl<R: Ring> std::ops::Neg for Tensor<R> {
    type Output = Self;

    fn neg(mut self) -> Self::Output {
        self.data.iter_mut().for_each(|a| *a = -*a);
        self
    }
}

impl<R> std::ops::Index<usize> for Tensor<R> {
    type Output = R;

    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl<R> AsRef<[R]> for Tensor<R> {
    fn as_ref(&self) -> &[R] {
        &self.data
    }
}

#[cfg(test)]
mod test {
    use crate::algebra::ring::{Z2k, Z32};

    use super::*;

    fn t(shape: impl Into<Shape>, vals: &[u64]) -> Tensor<Z32> {
        Tensor::from_u64s(shape, vals).unwrap()
    }

    #[test]
    fn add() {
        let a = t([2], &[1, 2]);
        let b = t([2], &[3, 4]);
        let c = a.try_add(&b).unwrap();
        assert_eq!(c, t([2], &[4, 6]));
    }

    #[test]
    fn sub_wraps() {
        let a = t([2], &[3, 1]);
        let b = t([2], &[1, 2]);
        let c = a.try_sub(&b).unwrap();
        assert_eq!(c, Tensor::from_vec([2], vec![Z2k(2), Z2k(u32::MAX)]).unwrap());
    }

    #[test]
    fn add_rejects_other_shapes() {
        let a = t([2], &[1, 2]);
        let b = t([1, 2], &[3, 4]);
        let err = a.try_add(&b).unwrap_err();
        assert_eq!(err.left, Shape::from([2]));
        assert_eq!(err.right, Shape::from([1, 2]));
    }

    #[test]
    fn from_vec_checks_length() {
        assert!(Tensor::<Z32>::from_u64s([2, 2], &[1, 2, 3]).is_err());
        assert_eq!(Tensor::<Z32>::scalar(Z2k(1)).shape().numel(), 1);
    }

    #[test]
    fn mul_elementwise() {
        let a = t([2, 2], &[1, 2, 3, 4]);
        let b = t([2, 2], &[5, 6, 7, 8]);
        assert_eq!(a.mul(&b).unwrap(), t([2, 2], &[5, 12, 21, 32]));
    }

    #[test]
    fn mul_broadcasts() {
        let a = t([2, 3], &[1, 2, 3, 4, 5, 6]);
        let row = t([3], &[1, 10, 100]);
        assert_eq!(a.mul(&row).unwrap(), t([2, 3], &[1, 20, 300, 4, 50, 600]));

        let col = t([2, 1], &[2, 3]);
        assert_eq!(a.mul(&col).unwrap(), t([2, 3], &[2, 4, 6, 12, 15, 18]));

        let s = Tensor::scalar(Z2k(7));
        assert_eq!(s.mul(&col).unwrap(), t([2, 1], &[14, 21]));
    }

    #[test]
    fn mul_incompatible() {
        let a = t([2, 3], &[1, 2, 3, 4, 5, 6]);
        let b = t([2], &[1, 2]);
        assert!(a.mul(&b).is_err());
    }

    #[test]
    fn matmul() {
        let a = t([2, 3], &[1, 2, 3, 4, 5, 6]);
        let b = t([3, 2], &[7, 8, 9, 10, 11, 12]);
        assert_eq!(a.matmul(&b).unwrap(), t([2, 2], &[58, 64, 139, 154]));
        assert!(b.matmul(&b).is_err());
    }

    #[test]
    fn identity_is_neutral() {
        let a = t([3, 3], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let id = Tensor::identity(3);
        assert_eq!(a.matmul(&id).unwrap(), a);
        assert_eq!(id.matmul(&a).unwrap(), a);
    }

    #[test]
    fn scale_and_neg() {
        let a = t([2], &[3, 4]);
        assert_eq!(a.clone().scale(Z2k(2)), t([2], &[6, 8]));
        assert_eq!((-a).try_add(&t([2], &[3, 4])).unwrap(), Tensor::zeros([2]));
    }

    #[test]
    fn shape_display() {
        assert_eq!(Shape::from([2, 3]).to_string(), "[2, 3]");
        assert_eq!(Shape::scalar().to_string(), "[]");
    }

    #[test]
    fn deserialize_checks_shape() {
        let ok: Tensor<Z32> = serde_json::from_str(r#"{"shape":[2],"data":[1,2]}"#).unwrap();
        assert_eq!(ok, t([2], &[1, 2]));
        let short = serde_json::from_str::<Tensor<Z32>>(r#"{"shape":[2,2],"data":[1]}"#);
        assert!(short.is_err());
        let huge = format!(r#"{{"shape":[{m},{m}],"data":[]}}"#, m = usize::MAX);
        assert!(serde_json::from_str::<Tensor<Z32>>(&huge).is_err());
    }
}
