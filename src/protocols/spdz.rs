//! The SPDZ-style multiplication steps.
//!
//! To multiply `[x]` and `[y]` with a triple `([a], [b], [c])`:
//! 1. every party masks its shares: `δ_i = x_i - a_i`, `ε_i = y_i - b_i`,
//! 2. the masked deltas are summed to the public `Δ = x - a`, `E = y - b`,
//! 3. every party computes `z_i = op(Δ, b_i) + op(a_i, E) + c_i`, and exactly
//!    one party (the cross term owner) also adds `op(Δ, E)`.
//!
//! Since `op(x, y) = op(Δ + a, E + b) = op(Δ, E) + op(Δ, b) + op(a, E) + op(a, b)`
//! the `z_i` sum to `op(x, y)`.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::{
    algebra::{Ring, ShapeMismatch, Tensor},
    net::Id,
    protocols::{
        triples::{SessionId, TripleStore},
        Operation, ProtocolError, Triple, TripleId, TripleKey,
    },
};

/// One party's blinded operands.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MaskedDelta<R> {
    /// The triple that was used for blinding.
    pub triple: TripleId,
    pub delta: Tensor<R>,
    pub epsilon: Tensor<R>,
}

/// The publicly reconstructed masked operands `(Δ, E)`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Aggregate<R> {
    pub triple: TripleId,
    pub delta: Tensor<R>,
    pub epsilon: Tensor<R>,
}

/// The party that adds the public cross term `op(Δ, E)` to its share.
///
/// Must be the same party for every participant of a multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CrossTermOwner(pub Id);

/// A participant in the protocol, owning its triples.
#[derive(Debug)]
pub struct Party<R> {
    id: Id,
    store: TripleStore<R>,
}

impl<R: Ring> Party<R> {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            store: TripleStore::new(id),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn store(&self) -> &TripleStore<R> {
        &self.store
    }

    /// Blind our shares of `x` and `y` with the next triple for
    /// `(op, shape(x), shape(y))` whose id is past `after`.
    ///
    /// The triple is reserved for `session` but not consumed.
    #[tracing::instrument(skip_all, fields(party = %self.id, %session, %op))]
    pub fn mask(
        &self,
        session: SessionId,
        x: &Tensor<R>,
        y: &Tensor<R>,
        op: Operation,
        after: Option<TripleId>,
    ) -> Result<MaskedDelta<R>, ProtocolError> {
        let key = TripleKey::new(op, x.shape().clone(), y.shape().clone());
        let (triple, Triple { a, b, .. }) = self.store.reserve(session, &key, after)?;
        let delta = x.clone().try_sub(&a);
        let epsilon = y.clone().try_sub(&b);
        match (delta, epsilon) {
            (Ok(delta), Ok(epsilon)) => Ok(MaskedDelta {
                triple,
                delta,
                epsilon,
            }),
            (Err(e), _) | (_, Err(e)) => {
                self.store.discard(session);
                Err(ProtocolError::shapes(op, e))
            }
        }
    }

    /// Derive our share of `op(x, y)` from the public `(Δ, E)`,
    /// consuming the triple reserved for `session`.
    ///
    /// * `participants`: every location taking part in the multiplication
    #[tracing::instrument(skip_all, fields(party = %self.id, %session, %op))]
    pub fn compute(
        &self,
        session: SessionId,
        aggregate: &Aggregate<R>,
        op: Operation,
        owner: CrossTermOwner,
        participants: &BTreeSet<Id>,
    ) -> Result<Tensor<R>, ProtocolError> {
        let CrossTermOwner(owner) = owner;
        for id in [owner, self.id] {
            if !participants.contains(&id) {
                self.store.discard(session);
                return Err(ProtocolError::IndexOutOfRange(id));
            }
        }
        let Aggregate {
            triple,
            delta,
            epsilon,
        } = aggregate;
        let key = TripleKey::new(op, delta.shape().clone(), epsilon.shape().clone());
        let kernel = op
            .kernel::<R>()
            .ok_or(ProtocolError::UnsupportedOperation(op))?;
        let (id, Triple { a, b, c }) = self.store.consume(session, &key)?;
        if id != *triple {
            return Err(ProtocolError::MisalignedTriples {
                used: vec![(self.id, id)],
            });
        }

        let shapes = |e| ProtocolError::shapes(op, e);
        let delta_b = kernel(delta, &b).map_err(shapes)?;
        let a_epsilon = kernel(&a, epsilon).map_err(shapes)?;
        let mut share = delta_b
            .try_add(&a_epsilon)
            .and_then(|s| s.try_add(&c))
            .map_err(shapes)?;
        if self.id == owner {
            let delta_epsilon = kernel(delta, epsilon).map_err(shapes)?;
            share = share.try_add(&delta_epsilon).map_err(shapes)?;
        }
        Ok(share)
    }

    /// Give up on `session`, dropping its reserved triple.
    pub fn abort(&self, session: SessionId) -> bool {
        self.store.discard(session)
    }
}

/// Sum the masked deltas of exactly the `expected` parties.
///
/// A missing, duplicate or foreign contribution would silently yield a wrong
/// product, so each of them is an error. So is blinding with shares of
/// different triples.
pub fn reconstruct<R: Ring>(
    expected: &BTreeSet<Id>,
    contributions: impl IntoIterator<Item = (Id, MaskedDelta<R>)>,
) -> Result<Aggregate<R>, ProtocolError> {
    let mut received = BTreeMap::new();
    for (id, masked) in contributions {
        if !expected.contains(&id) {
            return Err(ProtocolError::UnexpectedContribution(id));
        }
        if received.insert(id, masked).is_some() {
            return Err(ProtocolError::DuplicateContribution(id));
        }
    }
    let missing = expected
        .iter()
        .filter(|id| !received.contains_key(id))
        .copied()
        .collect_vec();
    if !missing.is_empty() {
        return Err(ProtocolError::PartialReconstruction { missing });
    }

    if !received.values().map(|m| m.triple).all_equal() {
        let used = received.iter().map(|(&id, m)| (id, m.triple)).collect();
        return Err(ProtocolError::MisalignedTriples { used });
    }

    let mut deltas = received.into_values();
    let Some(first) = deltas.next() else {
        return Err(ProtocolError::PartialReconstruction { missing: vec![] });
    };
    deltas
        .try_fold(first, |acc, m| {
            Ok::<_, ShapeMismatch>(MaskedDelta {
                triple: acc.triple,
                delta: acc.delta.try_add(&m.delta)?,
                epsilon: acc.epsilon.try_add(&m.epsilon)?,
            })
        })
        .map(|m| Aggregate {
            triple: m.triple,
            delta: m.delta,
            epsilon: m.epsilon,
        })
        .map_err(|e| ProtocolError::shapes(Operation::Mul, e))
}
