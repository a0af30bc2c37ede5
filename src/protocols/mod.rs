pub mod beaver;
pub mod dealer;
pub mod operation;
pub mod spdz;
pub mod triples;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    algebra::{Shape, ShapeMismatch},
    net::Id,
};

pub use operation::Operation;
pub use triples::{Triple, TripleId, TripleKey, TripleStore};

/// Everything that can go wrong in the multiplication protocol itself.
///
/// These are sent back over the transport, so they are serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("{op} cannot be applied to shapes {left} and {right}")]
    ShapeMismatch {
        op: Operation,
        left: Shape,
        right: Shape,
    },
    #[error("Not enough triples for {key}: requested {requested}, {available} available")]
    TripleExhausted {
        key: TripleKey,
        requested: usize,
        available: usize,
    },
    #[error("There are no Beaver triples for {0}")]
    UnsupportedOperation(Operation),
    #[error("Operands are shared over different locations: {left:?} and {right:?}")]
    LocationSetMismatch { left: Vec<Id>, right: Vec<Id> },
    #[error("Missing masked deltas from {missing:?}")]
    PartialReconstruction { missing: Vec<Id> },
    #[error("{0} contributed more than once")]
    DuplicateContribution(Id),
    #[error("{0} is not a participant")]
    UnexpectedContribution(Id),
    #[error("{0} is not among the participants")]
    IndexOutOfRange(Id),
    #[error("Triple does not fit {key}")]
    MalformedTriple { key: TripleKey },
    #[error("Parties used different triples: {used:?}")]
    MisalignedTriples { used: Vec<(Id, TripleId)> },
}

impl ProtocolError {
    pub(crate) fn shapes(op: Operation, err: ShapeMismatch) -> Self {
        let ShapeMismatch { left, right } = err;
        ProtocolError::ShapeMismatch { op, left, right }
    }
}
