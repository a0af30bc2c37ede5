//! Per-party storage of multiplication triples.
//!
//! A triple is single use: once the masked deltas derived from it have left
//! the party it must never be used again, not even after an abort.

use std::{
    collections::{HashMap, VecDeque},
    fmt::Display,
    sync::{Mutex, MutexGuard},
};

use itertools::izip;

use crate::{
    algebra::{Ring, Shape, Tensor},
    net::Id,
    protocols::{Operation, ProtocolError},
};

/// What a triple is correlated for: an operation and the operand shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TripleKey {
    pub op: Operation,
    pub left: Shape,
    pub right: Shape,
}

impl TripleKey {
    pub fn new(op: Operation, left: impl Into<Shape>, right: impl Into<Shape>) -> Self {
        Self {
            op,
            left: left.into(),
            right: right.into(),
        }
    }

    /// Check that the key describes something we can have Beaver triples for,
    /// returning the shape of `c`.
    pub fn validate(&self) -> Result<Shape, ProtocolError> {
        if !self.op.is_multiplicative() {
            return Err(ProtocolError::UnsupportedOperation(self.op));
        }
        self.op
            .output_shape(&self.left, &self.right)
            .map_err(|e| ProtocolError::shapes(self.op, e))
    }
}

impl Display for TripleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}, {})", self.op, self.left, self.right)
    }
}

/// Beaver (Multiplication) Triple
///
/// One party's additive share of `(a, b, c)` where `c = op(a, b)`
/// holds for the sum of the shares.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Triple<R> {
    pub a: Tensor<R>,
    pub b: Tensor<R>,
    pub c: Tensor<R>,
}

impl<R: Ring> Triple<R> {
    fn fits(&self, key: &TripleKey, out: &Shape) -> bool {
        self.a.shape() == &key.left && self.b.shape() == &key.right && self.c.shape() == out
    }

    /// Sum the shares of a triple, recovering the plain triple.
    ///
    /// Returns `None` for zero shares or shares of differing shapes.
    pub fn combine(shares: &[Self]) -> Option<Self> {
        let (first, rest) = shares.split_first()?;
        rest.iter().try_fold(first.clone(), |acc, t| {
            Some(Triple {
                a: acc.a.try_add(&t.a).ok()?,
                b: acc.b.try_add(&t.b).ok()?,
                c: acc.c.try_add(&t.c).ok()?,
            })
        })
    }

    /// Whether `c = op(a, b)` for this (plain) triple.
    pub fn satisfies(&self, op: Operation) -> bool {
        op.kernel::<R>()
            .and_then(|kernel| kernel(&self.a, &self.b).ok())
            .is_some_and(|c| c == self.c)
    }
}

/// Names one dealt triple; every party's share of it carries the same id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TripleId(pub u64);

impl Display for TripleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

/// Session a reserved triple is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn random() -> Self {
        SessionId(rand::random())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug)]
struct Inner<R> {
    pool: HashMap<TripleKey, VecDeque<(TripleId, Triple<R>)>>,
    reserved: HashMap<SessionId, (TripleKey, TripleId, Triple<R>)>,
}

/// Triple fuel tank for a single party.
///
/// All access goes through one lock, so reserving or removing a triple is
/// atomic with respect to concurrent multiplications.
#[derive(Debug)]
pub struct TripleStore<R> {
    owner: Id,
    inner: Mutex<Inner<R>>,
}

impl<R: Ring> TripleStore<R> {
    pub fn new(owner: Id) -> Self {
        Self {
            owner,
            inner: Mutex::new(Inner {
                pool: HashMap::new(),
                reserved: HashMap::new(),
            }),
        }
    }

    pub fn owner(&self) -> Id {
        self.owner
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        // Every mutation is a single call under the lock, so the state is
        // consistent even if another holder panicked.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add triples for `key`, rejecting the whole batch if any of them has the
    /// wrong shapes.
    pub fn insert(
        &self,
        key: TripleKey,
        triples: impl IntoIterator<Item = (TripleId, Triple<R>)>,
    ) -> Result<(), ProtocolError> {
        let out = key.validate()?;
        let triples: Vec<_> = triples.into_iter().collect();
        if !triples.iter().all(|(_, t)| t.fits(&key, &out)) {
            return Err(ProtocolError::MalformedTriple { key });
        }
        tracing::trace!(party = %self.owner, %key, count = triples.len(), "Storing triples");
        self.lock().pool.entry(key).or_default().extend(triples);
        Ok(())
    }

    /// Number of unreserved triples for `key`.
    pub fn available(&self, key: &TripleKey) -> usize {
        self.lock().pool.get(key).map_or(0, VecDeque::len)
    }

    /// Get `count` triples for `key`, removing them if `consume` is set.
    ///
    /// Without `consume` the triples stay in the store and the next call
    /// returns the same ones.
    pub fn acquire(
        &self,
        key: &TripleKey,
        count: usize,
        consume: bool,
    ) -> Result<Vec<Triple<R>>, ProtocolError> {
        key.validate()?;
        let mut inner = self.lock();
        let available = inner.pool.get(key).map_or(0, VecDeque::len);
        if available < count {
            return Err(ProtocolError::TripleExhausted {
                key: key.clone(),
                requested: count,
                available,
            });
        }
        let Some(queue) = inner.pool.get_mut(key) else {
            return Ok(Vec::new());
        };
        let triples = if consume {
            queue.drain(..count).map(|(_, t)| t).collect()
        } else {
            queue.iter().take(count).map(|(_, t)| t.clone()).collect()
        };
        Ok(triples)
    }

    /// Pin the next triple for `key` to `session`.
    ///
    /// The triple leaves the pool but is not consumed until
    /// [`TripleStore::consume`] is called for the same session.
    ///
    /// * `after`: drop every triple up to and including this id first. Ids
    ///   increase in the order triples were dealt, so these are the triples the
    ///   other parties have already burnt.
    pub fn reserve(
        &self,
        session: SessionId,
        key: &TripleKey,
        after: Option<TripleId>,
    ) -> Result<(TripleId, Triple<R>), ProtocolError> {
        key.validate()?;
        let mut inner = self.lock();
        if inner.reserved.contains_key(&session) {
            // One triple per party per session.
            return Err(ProtocolError::TripleExhausted {
                key: key.clone(),
                requested: 1,
                available: 0,
            });
        }
        let exhausted = || ProtocolError::TripleExhausted {
            key: key.clone(),
            requested: 1,
            available: 0,
        };
        let queue = inner.pool.get_mut(key).ok_or_else(exhausted)?;
        if let Some(after) = after {
            let stale = queue.iter().take_while(|(id, _)| *id <= after).count();
            if stale > 0 {
                queue.drain(..stale);
                tracing::warn!(party = %self.owner, %key, stale, "Dropped triples burnt elsewhere");
            }
        }
        let (id, triple) = queue.pop_front().ok_or_else(exhausted)?;
        inner
            .reserved
            .insert(session, (key.clone(), id, triple.clone()));
        Ok((id, triple))
    }

    /// Remove and return the triple reserved for `session`.
    ///
    /// Fails if nothing is reserved (never masked, or already consumed), or if
    /// the reservation was made for a different key. In the latter case the
    /// reservation is dropped all the same.
    pub fn consume(
        &self,
        session: SessionId,
        key: &TripleKey,
    ) -> Result<(TripleId, Triple<R>), ProtocolError> {
        let (reserved_key, id, triple) =
            self.lock()
                .reserved
                .remove(&session)
                .ok_or_else(|| ProtocolError::TripleExhausted {
                    key: key.clone(),
                    requested: 1,
                    available: 0,
                })?;
        if &reserved_key != key {
            return Err(ProtocolError::ShapeMismatch {
                op: key.op,
                left: key.left.clone(),
                right: key.right.clone(),
            });
        }
        Ok((id, triple))
    }

    /// Drop the reservation for `session`, if any. The triple is lost.
    pub fn discard(&self, session: SessionId) -> bool {
        let dropped = self.lock().reserved.remove(&session).is_some();
        if dropped {
            tracing::debug!(party = %self.owner, %session, "Discarded reserved triple");
        }
        dropped
    }

    pub fn reserved(&self) -> usize {
        self.lock().reserved.len()
    }
}

/// Put one party's shares of `a`, `b` and `c` together as triples.
pub(crate) fn zip_shares<R>(
    ids: &[TripleId],
    a: Vec<Tensor<R>>,
    b: Vec<Tensor<R>>,
    c: Vec<Tensor<R>>,
) -> Vec<(TripleId, Triple<R>)> {
    izip!(ids.iter().copied(), a, b, c)
        .map(|(id, a, b, c)| (id, Triple { a, b, c }))
        .collect()
}
