//! Additive secret sharing of tensors.
//!
//! A secret `x` is represented by one share per location, `x = Σ x_i` over the
//! ring. Linear operations are local: every party applies them to its own
//! share, except public additions, which only one party performs.

use std::collections::{BTreeMap, BTreeSet};

use rand::RngCore;
use thiserror::Error;

use crate::{
    algebra::{
        ring::{Dtype, Modulus},
        Ring, Shape, ShapeMismatch, Tensor,
    },
    net::Id,
};

/// Per-type metadata carried from operands to results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Meta {
    pub modulus: Modulus,
    pub dtype: Dtype,
}

impl Meta {
    pub fn of<R: Ring>() -> Self {
        Meta {
            modulus: R::MODULUS,
            dtype: R::DTYPE,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SharingError {
    #[error("Cannot share among zero locations")]
    NoLocations,
    #[error("{0} appears more than once")]
    DuplicateLocation(Id),
    #[error("Shares are held by different locations")]
    LocationSetMismatch,
    #[error("{0} is not a holder of this value")]
    UnknownLocation(Id),
    #[error(transparent)]
    Shape(#[from] ShapeMismatch),
}

/// A tensor additively shared among a set of locations.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawShared<R>", bound(deserialize = "R: Ring"))]
pub struct SecretShared<R> {
    shares: BTreeMap<Id, Tensor<R>>,
    meta: Meta,
}

#[derive(serde::Deserialize)]
struct RawShared<R> {
    shares: BTreeMap<Id, Tensor<R>>,
    meta: Meta,
}

impl<R: Ring> TryFrom<RawShared<R>> for SecretShared<R> {
    type Error = SharingError;

    fn try_from(RawShared { shares, meta }: RawShared<R>) -> Result<Self, Self::Error> {
        Self::from_shares(shares, meta)
    }
}

impl<R: Ring> SecretShared<R> {
    /// Split `secret` into random shares, one per location.
    ///
    /// * `secret`: value to share
    /// * `locations`: who receives a share
    /// * `rng`: randomness for the shares
    pub fn share(
        secret: &Tensor<R>,
        locations: &[Id],
        rng: &mut impl RngCore,
    ) -> Result<Self, SharingError> {
        let (&last, rest) = locations.split_last().ok_or(SharingError::NoLocations)?;
        let mut shares = BTreeMap::new();
        let mut remainder = secret.clone();
        for &id in rest {
            let share = Tensor::random(secret.shape().clone(), rng);
            remainder = remainder.try_sub(&share)?;
            if shares.insert(id, share).is_some() {
                return Err(SharingError::DuplicateLocation(id));
            }
        }
        if shares.insert(last, remainder).is_some() {
            return Err(SharingError::DuplicateLocation(last));
        }
        Ok(Self {
            shares,
            meta: Meta::of::<R>(),
        })
    }

    /// Assemble a shared value from shares that are already distributed.
    pub fn from_shares(
        shares: impl IntoIterator<Item = (Id, Tensor<R>)>,
        meta: Meta,
    ) -> Result<Self, SharingError> {
        let mut map = BTreeMap::new();
        for (id, share) in shares {
            if map.insert(id, share).is_some() {
                return Err(SharingError::DuplicateLocation(id));
            }
        }
        let mut iter = map.values();
        let first = iter.next().ok_or(SharingError::NoLocations)?;
        if let Some(other) = iter.find(|s| s.shape() != first.shape()) {
            return Err(ShapeMismatch {
                left: first.shape().clone(),
                right: other.shape().clone(),
            }
            .into());
        }
        Ok(Self { shares: map, meta })
    }

    /// Sum all shares, revealing the secret.
    pub fn reconstruct(&self) -> Tensor<R> {
        let mut shares = self.shares.values();
        let first = shares.next().cloned().unwrap_or_else(|| Tensor::zeros(Shape::scalar()));
        // All shares have the same shape, checked on construction.
        shares.fold(first, |acc, s| {
            acc.try_add(s).unwrap_or_else(|e| unreachable!("{e}"))
        })
    }

    pub fn get(&self, id: Id) -> Option<&Tensor<R>> {
        self.shares.get(&id)
    }

    pub fn shares(&self) -> impl Iterator<Item = (Id, &Tensor<R>)> {
        self.shares.iter().map(|(&id, s)| (id, s))
    }

    pub fn into_shares(self) -> BTreeMap<Id, Tensor<R>> {
        self.shares
    }

    /// Locations holding a share, in ascending order.
    pub fn locations(&self) -> Vec<Id> {
        self.shares.keys().copied().collect()
    }

    pub fn location_set(&self) -> BTreeSet<Id> {
        self.shares.keys().copied().collect()
    }

    pub fn shape(&self) -> &Shape {
        self.shares
            .values()
            .next()
            .map(Tensor::shape)
            .unwrap_or(&EMPTY)
    }

    pub fn meta(&self) -> Meta {
        self.meta
    }

    fn zip_with(
        &self,
        other: &Self,
        f: impl Fn(Tensor<R>, &Tensor<R>) -> Result<Tensor<R>, ShapeMismatch>,
    ) -> Result<Self, SharingError> {
        if self.location_set() != other.location_set() {
            return Err(SharingError::LocationSetMismatch);
        }
        let shares = self
            .shares
            .iter()
            .zip(other.shares.values())
            .map(|((&id, a), b)| Ok((id, f(a.clone(), b)?)))
            .collect::<Result<_, ShapeMismatch>>()?;
        Ok(Self {
            shares,
            meta: self.meta,
        })
    }

    pub fn add(&self, other: &Self) -> Result<Self, SharingError> {
        self.zip_with(other, |a, b| a.try_add(b))
    }

    pub fn sub(&self, other: &Self) -> Result<Self, SharingError> {
        self.zip_with(other, |a, b| a.try_sub(b))
    }

    /// Add a public value; only `owner` adds it to its share.
    pub fn add_public(&self, val: &Tensor<R>, owner: Id) -> Result<Self, SharingError> {
        let mut shares = self.shares.clone();
        let share = shares
            .get_mut(&owner)
            .ok_or(SharingError::UnknownLocation(owner))?;
        *share = share.clone().try_add(val)?;
        Ok(Self {
            shares,
            meta: self.meta,
        })
    }

    /// Multiply by a public constant.
    #[must_use]
    pub fn mul_public(&self, scalar: R) -> Self {
        let shares = self
            .shares
            .iter()
            .map(|(&id, s)| (id, s.clone().scale(scalar)))
            .collect();
        Self {
            shares,
            meta: self.meta,
        }
    }
}

static EMPTY: Shape = Shape(Vec::new());

impl<R: Ring> std::ops::Neg for SecretShared<R> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        let shares = self.shares.into_iter().map(|(id, s)| (id, -s)).collect();
        Self {
            shares,
            meta: self.meta,
        }
    }
}
