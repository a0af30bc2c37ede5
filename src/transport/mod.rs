//! Request/response calls to a single party.
//!
//! Every request gets an explicit response, so the orchestrator knows when a
//! step has been carried out. Protocol failures inside a party travel back as
//! [`Response::Failed`]; anything else is a [`TransportError`].

pub mod local;
pub mod tcp;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    algebra::{Ring, Tensor},
    net::{connection::ConnectionError, Id},
    protocols::{
        spdz::{Aggregate, CrossTermOwner, MaskedDelta, Party},
        triples::SessionId,
        Operation, ProtocolError, Triple, TripleId, TripleKey,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "R: Ring")]
pub enum Request<R> {
    Mask {
        session: SessionId,
        op: Operation,
        x: Tensor<R>,
        y: Tensor<R>,
        /// Skip triples up to this id, the others have burnt them.
        after: Option<TripleId>,
    },
    Compute {
        session: SessionId,
        op: Operation,
        aggregate: Aggregate<R>,
        owner: CrossTermOwner,
        participants: BTreeSet<Id>,
    },
    Provision {
        key: TripleKey,
        triples: Vec<(TripleId, Triple<R>)>,
    },
    Abort {
        session: SessionId,
    },
    Available {
        key: TripleKey,
    },
}

impl<R> Request<R> {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Mask { .. } => "mask",
            Request::Compute { .. } => "compute",
            Request::Provision { .. } => "provision",
            Request::Abort { .. } => "abort",
            Request::Available { .. } => "available",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "R: Ring")]
pub enum Response<R> {
    Masked(MaskedDelta<R>),
    Computed(Tensor<R>),
    Ack,
    Available(usize),
    Failed(ProtocolError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{0} is unreachable")]
    Unreachable(Id),
    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectionError),
    #[error("{0} did not answer in time")]
    TimedOut(Id),
    #[error("{location} gave an unexpected answer to {request}")]
    UnexpectedResponse {
        location: Id,
        request: &'static str,
    },
}

/// A handle to a party that can carry out protocol steps.
#[async_trait]
pub trait Remote<R>: Send + Sync {
    /// The party this handle talks to.
    fn location(&self) -> Id;

    async fn call(&self, request: Request<R>) -> Result<Response<R>, TransportError>;
}

impl<R: Ring> Party<R> {
    /// Carry out a single request.
    pub fn handle(&self, request: Request<R>) -> Response<R> {
        let res = match request {
            Request::Mask {
                session,
                op,
                x,
                y,
                after,
            } => self.mask(session, &x, &y, op, after).map(Response::Masked),
            Request::Compute {
                session,
                op,
                aggregate,
                owner,
                participants,
            } => self
                .compute(session, &aggregate, op, owner, &participants)
                .map(Response::Computed),
            Request::Provision { key, triples } => {
                self.store().insert(key, triples).map(|()| Response::Ack)
            }
            Request::Abort { session } => {
                if self.abort(session) {
                    tracing::debug!(party = %self.id(), %session, "dropped reserved triple");
                }
                Ok(Response::Ack)
            }
            Request::Available { key } => Ok(Response::Available(self.store().available(&key))),
        };
        res.unwrap_or_else(Response::Failed)
    }
}
