//! Secret sharing schemes.
//!
//! Only additive sharing is needed for Beaver multiplication: shares are
//! summed to reconstruct, and linear operations are applied share by share.

pub mod additive;
