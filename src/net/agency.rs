//! This module describes traits for 'communication' functionalities.
//! These are the broadcast: send a message to many
//! and receive all: receive a message from each.
//!
//! The function of these is to provide an interface over the
//! concrete `Network` struct, allowing a looser API,
//! since `Network` carries the type parameters for the reader/writer.
//!
//! Protocols take `&mut impl Broadcast` so they run the same over
//! in-memory duplex streams and TCP.

use std::error::Error;

use futures::Future;

pub trait Broadcast {
    type Error: Error + Send + Sync + 'static;

    /// Send a message to every other party.
    fn broadcast(
        &mut self,
        msg: &(impl serde::Serialize + Sync),
    ) -> impl Future<Output = Result<(), Self::Error>>;

    /// Broadcast a message to all parties and await their messages.
    /// Messages are ordered by their index, including our own.
    fn symmetric_broadcast<T>(
        &mut self,
        msg: T,
    ) -> impl Future<Output = Result<Vec<T>, Self::Error>>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync;

    /// Receive a message from every other party, ordered by index.
    fn receive_all<T: serde::de::DeserializeOwned>(
        &mut self,
    ) -> impl Future<Output = Result<Vec<T>, Self::Error>>;

    /// Our own index.
    fn id(&self) -> usize;

    /// Number of parties, including ourselves.
    fn size(&self) -> usize;
}
