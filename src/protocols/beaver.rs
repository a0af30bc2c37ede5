//! Beaver multiplication without a coordinator.
//!
//! Every party broadcasts its masked deltas to every other party and
//! reconstructs `(Δ, E)` itself. The parties must agree on the session id and
//! the cross term owner beforehand.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::{
    algebra::{Ring, Tensor},
    net::{agency::Broadcast, Id},
    protocols::{
        spdz::{self, CrossTermOwner, MaskedDelta, Party},
        triples::SessionId,
        Operation, ProtocolError,
    },
};

#[derive(Debug, Error)]
pub enum BeaverError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Could not exchange masked deltas")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Multiply our shares of `x` and `y`, returning our share of `op(x, y)`.
///
/// * `party`: our triples, its id must be our index in `network`
/// * `session`: session id shared by all parties
/// * `owner`: the party adding the cross term
/// * `network`: network to exchange masked deltas over
#[tracing::instrument(skip_all, fields(me = network.id(), %session, %op))]
pub async fn beaver_multiply<R: Ring>(
    party: &Party<R>,
    session: SessionId,
    x: &Tensor<R>,
    y: &Tensor<R>,
    op: Operation,
    owner: CrossTermOwner,
    network: &mut impl Broadcast,
) -> Result<Tensor<R>, BeaverError> {
    if party.id() != Id(network.id()) {
        return Err(ProtocolError::IndexOutOfRange(party.id()).into());
    }
    let masked = party.mask(session, x, y, op, None)?;
    let deltas: Vec<MaskedDelta<R>> = match network.symmetric_broadcast(masked).await {
        Ok(deltas) => deltas,
        Err(e) => {
            party.abort(session);
            return Err(BeaverError::Network(Box::new(e)));
        }
    };

    let participants: BTreeSet<Id> = (0..network.size()).map(Id).collect();
    let contributions = deltas.into_iter().enumerate().map(|(i, d)| (Id(i), d));
    let aggregate = match spdz::reconstruct(&participants, contributions) {
        Ok(aggregate) => aggregate,
        Err(e) => {
            party.abort(session);
            return Err(e.into());
        }
    };
    tracing::debug!("reconstructed masked operands");
    let share = party.compute(session, &aggregate, op, owner, &participants)?;
    Ok(share)
}
