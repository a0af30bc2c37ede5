//! Concrete prime field.
//! Here we have a prime field that is very close to 2^32.
use ff::{Field, PrimeField};
use rand::RngCore;

use crate::algebra::ring::{Dtype, Modulus, Ring};

// Not `ZERO`/`ONE`: those clash with `ff::Field` in the derive.

#[derive(PrimeField, serde::Serialize, serde::Deserialize)]
#[PrimeFieldModulus = "4294967291"]
#[PrimeFieldGenerator = "2"]
#[PrimeFieldReprEndianness = "little"]
pub struct Element32([u64; 1]);

impl From<Element32> for u32 {
    /// Convert a element into u32
    ///
    /// * `val`: Element to convert
    fn from(val: Element32) -> Self {
        let arr = val.to_repr().0;
        let arr = [arr[0], arr[1], arr[2], arr[3]];
        u32::from_le_bytes(arr)
    }
}

impl From<Element32> for u64 {
    fn from(val: Element32) -> Self {
        u64::from_le_bytes(val.to_repr().0)
    }
}

impl Ring for Element32 {
    const ADD_IDENTITY: Self = <Self as Field>::ZERO;
    const MUL_IDENTITY: Self = <Self as Field>::ONE;
    const MODULUS: Modulus = Modulus::Prime(4294967291);
    const DTYPE: Dtype = Dtype::Field32;

    fn random(rng: &mut impl RngCore) -> Self {
        <Self as Field>::random(rng)
    }

    fn from_u64(val: u64) -> Self {
        // `From<u64>` on a `PrimeField` reduces by the modulus.
        Element32::from(val)
    }
}
