//! Arithmetic all shares and triples live in.
//!
//! Additive sharing only needs a commutative ring, so besides prime fields we
//! support the integer rings `Z_{2^k}`, where arithmetic is plain wrapping
//! machine arithmetic.

use std::{
    fmt::{Debug, Display},
    ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign},
};

use num_traits::{WrappingAdd, WrappingMul, WrappingNeg, WrappingSub};
use rand::{Rng, RngCore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// The modulus a ring reduces by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modulus {
    /// `2^k`
    PowerOfTwo(u32),
    Prime(u64),
}

impl Display for Modulus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modulus::PowerOfTwo(k) => write!(f, "2^{k}"),
            Modulus::Prime(p) => write!(f, "{p}"),
        }
    }
}

/// Numeric representation of the shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dtype {
    Int32,
    Int64,
    Field32,
}

/// Commutative ring with a fixed modulus.
pub trait Ring:
    Copy
    + Send
    + Sync
    + 'static
    + Debug
    + PartialEq
    + Eq
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + Serialize
    + DeserializeOwned
{
    /// Additive identity.
    const ADD_IDENTITY: Self;
    /// Multiplicative identity.
    const MUL_IDENTITY: Self;
    const MODULUS: Modulus;
    const DTYPE: Dtype;

    /// Sample a uniformly random element.
    fn random(rng: &mut impl RngCore) -> Self;

    /// Embed an integer, reducing it by the modulus.
    fn from_u64(val: u64) -> Self;
}

/// Integers modulo `2^k` where `k` is the bit width of `T`.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Z2k<T>(pub T);

pub type Z32 = Z2k<u32>;
pub type Z64 = Z2k<u64>;

impl<T: WrappingAdd> Add for Z2k<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Z2k(self.0.wrapping_add(&rhs.0))
    }
}

impl<T: WrappingSub> Sub for Z2k<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Z2k(self.0.wrapping_sub(&rhs.0))
    }
}

impl<T: WrappingMul> Mul for Z2k<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        Z2k(self.0.wrapping_mul(&rhs.0))
    }
}

impl<T: WrappingNeg> Neg for Z2k<T> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Z2k(self.0.wrapping_neg())
    }
}

impl<T: WrappingAdd + Copy> AddAssign for Z2k<T> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<T: WrappingSub + Copy> SubAssign for Z2k<T> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<T: WrappingMul + Copy> MulAssign for Z2k<T> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

macro_rules! z2k_ring {
    ($int:ty, $dtype:expr) => {
        impl Ring for Z2k<$int> {
            const ADD_IDENTITY: Self = Z2k(0);
            const MUL_IDENTITY: Self = Z2k(1);
            const MODULUS: Modulus = Modulus::PowerOfTwo(<$int>::BITS);
            const DTYPE: Dtype = $dtype;

            fn random(rng: &mut impl RngCore) -> Self {
                Z2k(rng.gen())
            }

            fn from_u64(val: u64) -> Self {
                Z2k(val as $int)
            }
        }

        impl From<$int> for Z2k<$int> {
            fn from(val: $int) -> Self {
                Z2k(val)
            }
        }
    };
}

z2k_ring!(u32, Dtype::Int32);
z2k_ring!(u64, Dtype::Int64);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wraps_around() {
        let a = Z32::from(u32::MAX);
        assert_eq!(a + Z32::MUL_IDENTITY, Z32::ADD_IDENTITY);
        assert_eq!(Z32::ADD_IDENTITY - Z32::MUL_IDENTITY, a);
        assert_eq!(-Z32::MUL_IDENTITY, a);
        assert_eq!(Z32::from(1 << 31) * Z32::from(2), Z32::ADD_IDENTITY);
    }

    #[test]
    fn from_u64_reduces() {
        let x = Z32::from_u64((1 << 32) + 5);
        assert_eq!(x, Z32::from(5));
        let y = Z64::from_u64(u64::MAX);
        assert_eq!(y + Z64::MUL_IDENTITY, Z64::ADD_IDENTITY);
    }

    #[test]
    fn modulus_of_rings() {
        assert_eq!(Z32::MODULUS, Modulus::PowerOfTwo(32));
        assert_eq!(Z64::MODULUS.to_string(), "2^64");
        assert_eq!(Z64::DTYPE, Dtype::Int64);
    }
}
