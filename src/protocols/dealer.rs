//! Trusted dealer producing correlated triples.
//!
//! The dealer knows the plain `(a, b, c)`, so it must not be a party to the
//! multiplications it provisions for.

use std::collections::BTreeMap;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

use crate::{
    algebra::{Ring, Tensor},
    net::Id,
    protocols::{triples::zip_shares, ProtocolError, Triple, TripleId, TripleKey},
    schemes::additive::{SecretShared, SharingError},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DealerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Could not share triple: {0}")]
    Sharing(#[from] SharingError),
}

pub struct Dealer {
    rng: ChaCha20Rng,
    next_id: u64,
}

impl Dealer {
    pub fn from_entropy() -> Self {
        Self::with_rng(ChaCha20Rng::from_entropy())
    }

    /// Deterministic dealer, for tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(ChaCha20Rng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: ChaCha20Rng) -> Self {
        let next_id = u64::from(rng.next_u32());
        Self { rng, next_id }
    }

    /// Generate `count` triples for `key`, shared among `locations`.
    ///
    /// Returns each location's shares, in the same order for all locations.
    /// Shares of the same triple carry the same [`TripleId`], and ids increase
    /// with every triple this dealer hands out.
    #[tracing::instrument(skip(self), fields(%key))]
    pub fn deal<R: Ring>(
        &mut self,
        key: &TripleKey,
        count: usize,
        locations: &[Id],
    ) -> Result<BTreeMap<Id, Vec<(TripleId, Triple<R>)>>, DealerError> {
        key.validate()?;
        let kernel = key
            .op
            .kernel::<R>()
            .ok_or(ProtocolError::UnsupportedOperation(key.op))?;

        if count == 0 {
            return Ok(locations.iter().map(|&id| (id, Vec::new())).collect());
        }
        let mut parts: BTreeMap<Id, (Vec<_>, Vec<_>, Vec<_>)> = BTreeMap::new();
        let ids: Vec<_> = (self.next_id..).take(count).map(TripleId).collect();
        self.next_id += count as u64;
        for _ in 0..count {
            let a = Tensor::<R>::random(key.left.clone(), &mut self.rng);
            let b = Tensor::<R>::random(key.right.clone(), &mut self.rng);
            let c = kernel(&a, &b).map_err(|e| ProtocolError::shapes(key.op, e))?;
            let a = SecretShared::share(&a, locations, &mut self.rng)?;
            let b = SecretShared::share(&b, locations, &mut self.rng)?;
            let c = SecretShared::share(&c, locations, &mut self.rng)?;
            for (id, a) in a.into_shares() {
                parts.entry(id).or_default().0.push(a);
            }
            for (id, b) in b.into_shares() {
                parts.entry(id).or_default().1.push(b);
            }
            for (id, c) in c.into_shares() {
                parts.entry(id).or_default().2.push(c);
            }
        }
        tracing::debug!(count, parties = locations.len(), "dealt triples");
        Ok(parts
            .into_iter()
            .map(|(id, (a, b, c))| (id, zip_shares(&ids, a, b, c)))
            .collect())
    }
}
