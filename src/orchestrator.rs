//! Coordinating multiplications among remote parties.
//!
//! The orchestrator never sees a share of the operands or the triples, only
//! the masked deltas, which are public anyway. A multiplication moves through
//! [`Stage`]s; if any of them fails every party is told to abort so no
//! reservation is left dangling.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_concurrency::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Instrument;

use crate::{
    algebra::{Ring, Tensor},
    net::Id,
    protocols::{
        dealer::{Dealer, DealerError},
        spdz::{self, Aggregate, CrossTermOwner, MaskedDelta},
        triples::SessionId,
        Operation, ProtocolError, TripleId, TripleKey,
    },
    schemes::additive::{SecretShared, SharingError},
    transport::{Remote, Request, Response, TransportError},
};

/// Where the triples come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provisioning {
    /// Parties are loaded with triples up front; running out is an error.
    #[default]
    Preloaded,
    /// The orchestrator deals fresh triples when a party runs out.
    OnDemand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// How long to wait for any single party to answer.
    pub timeout_ms: u64,
    /// Party adding the cross term, the smallest location if unset.
    pub cross_term_owner: Option<Id>,
    pub provisioning: Provisioning,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            cross_term_owner: None,
            provisioning: Provisioning::Preloaded,
        }
    }
}

impl OrchestratorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Stage {
    #[display(fmt = "requested")]
    Requested,
    #[display(fmt = "masked")]
    Masked,
    #[display(fmt = "reconstructed")]
    Reconstructed,
    #[display(fmt = "computed")]
    Computed,
    #[display(fmt = "assembled")]
    Assembled,
}

#[derive(Debug, Error)]
pub enum MultiplicationError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Failed talking to {location}")]
    Transport {
        location: Id,
        #[source]
        source: TransportError,
    },
    #[error("Aborted after stage '{stage}'")]
    Aborted {
        stage: Stage,
        #[source]
        source: Box<MultiplicationError>,
    },
    #[error("No dealer to provision triples with")]
    NoDealer,
    #[error(transparent)]
    Dealer(#[from] DealerError),
    #[error(transparent)]
    Sharing(#[from] SharingError),
}

impl MultiplicationError {
    /// The protocol error behind this, looking through aborts.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            MultiplicationError::Protocol(e) => Some(e),
            MultiplicationError::Aborted { source, .. } => source.protocol(),
            MultiplicationError::Dealer(DealerError::Protocol(e)) => Some(e),
            _ => None,
        }
    }

    fn is_exhausted(&self) -> bool {
        matches!(self.protocol(), Some(ProtocolError::TripleExhausted { .. }))
    }

    fn unexpected(location: Id, request: &'static str) -> Self {
        MultiplicationError::Transport {
            location,
            source: TransportError::UnexpectedResponse { location, request },
        }
    }
}

type Party<R> = Arc<dyn Remote<R>>;

fn mark_burnt(burnt: &mut HashMap<TripleKey, TripleId>, key: &TripleKey, seen: Option<TripleId>) {
    if let Some(id) = seen {
        let mark = burnt.entry(key.clone()).or_insert(id);
        *mark = (*mark).max(id);
    }
}

/// Drives multiplications of secret-shared tensors among a fixed set of parties.
pub struct Orchestrator<R> {
    parties: BTreeMap<Id, Party<R>>,
    dealer: Option<Mutex<Dealer>>,
    config: OrchestratorConfig,
    // Every party takes triples from the front of its queue, so masking
    // rounds must reach all parties in the same order. Holds the newest triple
    // id per key that some party has burnt in a failed round.
    masking: tokio::sync::Mutex<HashMap<TripleKey, TripleId>>,
}

impl<R: Ring> Orchestrator<R> {
    pub fn new(parties: impl IntoIterator<Item = Party<R>>, config: OrchestratorConfig) -> Self {
        let parties = parties.into_iter().map(|p| (p.location(), p)).collect();
        Self {
            parties,
            dealer: None,
            config,
            masking: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Use `dealer` for provisioning triples.
    #[must_use]
    pub fn with_dealer(mut self, dealer: Dealer) -> Self {
        self.dealer = Some(Mutex::new(dealer));
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn locations(&self) -> Vec<Id> {
        self.parties.keys().copied().collect()
    }

    /// Compute `[op(x, y)]` from `[x]` and `[y]`.
    ///
    /// Both operands must be shared over the same locations, each with a
    /// known remote. Consumes one triple per party.
    pub async fn multiply(
        &self,
        x: &SecretShared<R>,
        y: &SecretShared<R>,
        op: Operation,
    ) -> Result<SecretShared<R>, MultiplicationError> {
        let participants = x.location_set();
        if participants != y.location_set() {
            return Err(ProtocolError::LocationSetMismatch {
                left: x.locations(),
                right: y.locations(),
            }
            .into());
        }
        let key = TripleKey::new(op, x.shape().clone(), y.shape().clone());
        key.validate()?;
        let remotes = self.remotes(&participants)?;
        let owner = match self.config.cross_term_owner {
            Some(owner) => owner,
            None => *participants
                .first()
                .ok_or(ProtocolError::PartialReconstruction { missing: vec![] })?,
        };
        if !participants.contains(&owner) {
            return Err(ProtocolError::IndexOutOfRange(owner).into());
        }

        let span = tracing::info_span!("multiply", %key, parties = participants.len());
        let shares = self
            .run(&key, &participants, &remotes, x, y, CrossTermOwner(owner))
            .instrument(span)
            .await?;
        let z = SecretShared::from_shares(shares, x.meta())?;
        tracing::debug!(stage = %Stage::Assembled, %key);
        Ok(z)
    }

    async fn run(
        &self,
        key: &TripleKey,
        participants: &BTreeSet<Id>,
        remotes: &[Party<R>],
        x: &SecretShared<R>,
        y: &SecretShared<R>,
        owner: CrossTermOwner,
    ) -> Result<Vec<(Id, Tensor<R>)>, MultiplicationError> {
        let op = key.op;
        let mut session = SessionId::random();
        tracing::debug!(stage = %Stage::Requested, %session);

        let mut burnt = self.masking.lock().await;
        let mut after = burnt.get(key).copied();
        let mut seen = None;

        let masked = match self
            .mask_all(session, remotes, x, y, op, after, &mut seen)
            .await
        {
            Ok(masked) => masked,
            Err(e) if e.is_exhausted() && self.config.provisioning == Provisioning::OnDemand => {
                tracing::info!("out of triples, provisioning more");
                self.abort_all(session, remotes).await;
                after = after.max(seen);
                let locations: Vec<_> = participants.iter().copied().collect();
                if let Err(e) = self.provision_among(key, 1, &locations).await {
                    mark_burnt(&mut burnt, key, seen);
                    return Err(e);
                }
                session = SessionId::random();
                match self
                    .mask_all(session, remotes, x, y, op, after, &mut seen)
                    .await
                {
                    Ok(masked) => masked,
                    Err(e) => {
                        mark_burnt(&mut burnt, key, seen);
                        return Err(self.abort(session, remotes, Stage::Requested, e).await);
                    }
                }
            }
            Err(e) => {
                mark_burnt(&mut burnt, key, seen);
                return Err(self.abort(session, remotes, Stage::Requested, e).await);
            }
        };
        tracing::debug!(stage = %Stage::Masked, %session);

        let aggregate = match spdz::reconstruct(participants, masked) {
            Ok(aggregate) => aggregate,
            Err(e) => {
                mark_burnt(&mut burnt, key, seen);
                return Err(self.abort(session, remotes, Stage::Masked, e.into()).await);
            }
        };
        drop(burnt);
        tracing::debug!(stage = %Stage::Reconstructed, %session);

        let shares = match self
            .compute_all(session, remotes, aggregate, op, owner, participants)
            .await
        {
            Ok(shares) => shares,
            Err(e) => return Err(self.abort(session, remotes, Stage::Reconstructed, e).await),
        };
        tracing::debug!(stage = %Stage::Computed, %session);
        Ok(shares)
    }

    fn remotes(&self, locations: &BTreeSet<Id>) -> Result<Vec<Party<R>>, MultiplicationError> {
        locations
            .iter()
            .map(|&location| {
                self.parties
                    .get(&location)
                    .cloned()
                    .ok_or_else(|| MultiplicationError::Transport {
                        location,
                        source: TransportError::Unreachable(location),
                    })
            })
            .collect()
    }

    async fn call(
        &self,
        remote: &Party<R>,
        request: Request<R>,
    ) -> Result<Response<R>, TransportError> {
        let location = remote.location();
        tokio::time::timeout(self.config.timeout(), remote.call(request))
            .await
            .map_err(|_| TransportError::TimedOut(location))?
    }

    /// Collect masked deltas from everyone who answers.
    ///
    /// Parties that cannot be reached are left out, so reconstruction will
    /// report them as missing. `seen` is raised to the newest triple id any
    /// party masked with, even if the round fails.
    #[allow(clippy::too_many_arguments)]
    async fn mask_all(
        &self,
        session: SessionId,
        remotes: &[Party<R>],
        x: &SecretShared<R>,
        y: &SecretShared<R>,
        op: Operation,
        after: Option<TripleId>,
        seen: &mut Option<TripleId>,
    ) -> Result<Vec<(Id, MaskedDelta<R>)>, MultiplicationError> {
        let mut requests = Vec::with_capacity(remotes.len());
        for remote in remotes {
            let location = remote.location();
            let (Some(x), Some(y)) = (x.get(location), y.get(location)) else {
                return Err(ProtocolError::UnexpectedContribution(location).into());
            };
            let request = Request::Mask {
                session,
                op,
                x: x.clone(),
                y: y.clone(),
                after,
            };
            requests.push(async move { (location, self.call(remote, request).await) });
        }
        let responses = requests.join().await;

        let newest = responses.iter().filter_map(|(_, response)| match response {
            Ok(Response::Masked(delta)) => Some(delta.triple),
            _ => None,
        });
        *seen = (*seen).max(newest.max());

        let mut masked = Vec::with_capacity(responses.len());
        for (location, response) in responses {
            match response {
                Ok(Response::Masked(delta)) => masked.push((location, delta)),
                Ok(Response::Failed(e)) => return Err(e.into()),
                Ok(_) => return Err(MultiplicationError::unexpected(location, "mask")),
                Err(e) => tracing::warn!(%location, "no masked deltas: {e}"),
            }
        }
        Ok(masked)
    }

    async fn compute_all(
        &self,
        session: SessionId,
        remotes: &[Party<R>],
        aggregate: Aggregate<R>,
        op: Operation,
        owner: CrossTermOwner,
        participants: &BTreeSet<Id>,
    ) -> Result<Vec<(Id, Tensor<R>)>, MultiplicationError> {
        let requests: Vec<_> = remotes
            .iter()
            .map(|remote| {
                let request = Request::Compute {
                    session,
                    op,
                    aggregate: aggregate.clone(),
                    owner,
                    participants: participants.clone(),
                };
                async move { (remote.location(), self.call(remote, request).await) }
            })
            .collect();
        let responses = requests.join().await;

        responses
            .into_iter()
            .map(|(location, response)| match response {
                Ok(Response::Computed(share)) => Ok((location, share)),
                Ok(Response::Failed(e)) => Err(e.into()),
                Ok(_) => Err(MultiplicationError::unexpected(location, "compute")),
                Err(source) => Err(MultiplicationError::Transport { location, source }),
            })
            .collect()
    }

    async fn abort(
        &self,
        session: SessionId,
        remotes: &[Party<R>],
        stage: Stage,
        source: MultiplicationError,
    ) -> MultiplicationError {
        tracing::warn!(%session, %stage, "aborting multiplication: {source}");
        self.abort_all(session, remotes).await;
        MultiplicationError::Aborted {
            stage,
            source: Box::new(source),
        }
    }

    /// Tell every party to drop its reservation for `session`.
    async fn abort_all(&self, session: SessionId, remotes: &[Party<R>]) {
        let requests: Vec<_> = remotes
            .iter()
            .map(|remote| async move {
                (
                    remote.location(),
                    self.call(remote, Request::Abort { session }).await,
                )
            })
            .collect();
        for (location, response) in requests.join().await {
            match response {
                Ok(Response::Ack) => (),
                Ok(other) => tracing::warn!(%location, "unexpected answer to abort: {other:?}"),
                Err(e) => tracing::warn!(%location, "could not abort: {e}"),
            }
        }
    }

    /// Deal `count` fresh triples for `key` to every party.
    pub async fn provision(
        &self,
        key: &TripleKey,
        count: usize,
    ) -> Result<(), MultiplicationError> {
        let locations = self.locations();
        self.provision_among(key, count, &locations).await
    }

    #[tracing::instrument(skip(self), fields(%key))]
    async fn provision_among(
        &self,
        key: &TripleKey,
        count: usize,
        locations: &[Id],
    ) -> Result<(), MultiplicationError> {
        let mut dealt = {
            let dealer = self.dealer.as_ref().ok_or(MultiplicationError::NoDealer)?;
            let mut dealer = dealer
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            dealer.deal::<R>(key, count, locations)?
        };
        let remotes = self.remotes(&locations.iter().copied().collect())?;
        let requests: Vec<_> = remotes
            .iter()
            .map(|remote| {
                let location = remote.location();
                let triples = dealt.remove(&location).unwrap_or_default();
                let request = Request::Provision {
                    key: key.clone(),
                    triples,
                };
                async move { (location, self.call(remote, request).await) }
            })
            .collect();

        for (location, response) in requests.join().await {
            match response {
                Ok(Response::Ack) => (),
                Ok(Response::Failed(e)) => return Err(e.into()),
                Ok(_) => return Err(MultiplicationError::unexpected(location, "provision")),
                Err(source) => return Err(MultiplicationError::Transport { location, source }),
            }
        }
        Ok(())
    }

    /// Number of unreserved triples each party holds for `key`.
    pub async fn available(
        &self,
        key: &TripleKey,
    ) -> Result<BTreeMap<Id, usize>, MultiplicationError> {
        let requests: Vec<_> = self
            .parties
            .values()
            .map(|remote| {
                let request = Request::Available { key: key.clone() };
                async move { (remote.location(), self.call(remote, request).await) }
            })
            .collect();
        requests
            .join()
            .await
            .into_iter()
            .map(|(location, response)| match response {
                Ok(Response::Available(n)) => Ok((location, n)),
                Ok(Response::Failed(e)) => Err(e.into()),
                Ok(_) => Err(MultiplicationError::unexpected(location, "available")),
                Err(source) => Err(MultiplicationError::Transport { location, source }),
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config() {
        let config: OrchestratorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn parse_config() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{"timeout_ms": 250, "cross_term_owner": 2, "provisioning": "on_demand"}"#,
        )
        .unwrap();
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.cross_term_owner, Some(Id(2)));
        assert_eq!(config.provisioning, Provisioning::OnDemand);
    }

    #[test]
    fn nested_protocol_error() {
        let err = MultiplicationError::Aborted {
            stage: Stage::Masked,
            source: Box::new(
                ProtocolError::PartialReconstruction {
                    missing: vec![Id(1)],
                }
                .into(),
            ),
        };
        assert_eq!(
            err.protocol(),
            Some(&ProtocolError::PartialReconstruction {
                missing: vec![Id(1)]
            })
        );
        assert_eq!(err.to_string(), "Aborted after stage 'masked'");
    }
}
