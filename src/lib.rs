#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]

pub mod algebra;
pub mod net;
pub mod orchestrator;
pub mod protocols;
pub mod schemes;
pub mod transport;

#[cfg(test)]
mod testing;

pub use orchestrator::{MultiplicationError, Orchestrator, OrchestratorConfig, Provisioning};
pub use protocols::{spdz::Party, Operation, ProtocolError};
pub use schemes::additive::SecretShared;
