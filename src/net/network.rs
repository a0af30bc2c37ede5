use std::{collections::BTreeMap, time::Duration};

use futures::prelude::*;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};

use crate::net::{
    agency::Broadcast,
    connection::{Connection, ConnectionError, DuplexConnection},
    Id,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer-2-peer network
///
/// This acts as a single waypoint to all other (connected) parties in the network.
///
/// * `connections`: Connections, one for each peer, sorted by their index, skipping our own index.
/// * `index`: My own index
pub struct Network<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    connections: Vec<Connection<R, W>>,
    pub index: usize,
}

#[derive(thiserror::Error, Debug)]
#[error("Error communicating with {id}: {source}")]
pub struct NetworkError {
    pub id: Id,
    pub source: ConnectionError,
}

// Connection `i` of party `me` leads to party `i` if `i` is below `me`,
// otherwise to `i + 1`.
fn peer(me: usize, i: usize) -> Id {
    Id(if i < me { i } else { i + 1 })
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Network<R, W> {
    /// Broadcast a message to all other parties.
    ///
    /// Asymmetric, non-waiting
    ///
    /// * `msg`: Message to send
    pub async fn broadcast(&mut self, msg: &impl serde::Serialize) -> Result<(), NetworkError> {
        let my_id = self.index;
        let outgoing = self.connections.iter_mut().enumerate().map(|(i, conn)| {
            let id = peer(my_id, i);
            conn.send(msg).map_err(move |source| NetworkError { id, source })
        });
        future::try_join_all(outgoing).await?;
        Ok(())
    }

    /// Receive a message for each party.
    ///
    /// Asymmetric, waiting
    ///
    /// Returns: A list sorted by the connections (skipping yourself)
    pub async fn receive_all<T: serde::de::DeserializeOwned>(
        &mut self,
    ) -> Result<Vec<T>, NetworkError> {
        let my_id = self.index;
        let messages = self.connections.iter_mut().enumerate().map(|(i, conn)| {
            let id = peer(my_id, i);
            let msg = tokio::time::timeout(RECV_TIMEOUT, conn.recv::<T>());
            async move { (id, msg.await) }
        });
        future::join_all(messages)
            .await
            .into_iter()
            .map(|(id, m)| match m {
                Ok(m) => m.map_err(|source| NetworkError { id, source }),
                Err(elapsed) => Err(NetworkError {
                    id,
                    source: ConnectionError::TimeOut(elapsed),
                }),
            })
            .collect()
    }

    /// Broadcast a message to all parties and await their messages
    /// Messages are ordered by their index.
    ///
    /// * `msg`: message to send and receive
    #[tracing::instrument(skip_all, fields(me = self.index))]
    pub async fn symmetric_broadcast<T>(&mut self, msg: T) -> Result<Vec<T>, NetworkError>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let my_id = self.index;
        let (mut rx, mut tx): (Vec<_>, Vec<_>) =
            self.connections.iter_mut().map(|c| c.split()).unzip();

        let outgoing = tx.iter_mut().enumerate().map(|(i, conn)| {
            let id = peer(my_id, i);
            conn.send(&msg)
                .map_err(move |source| NetworkError { source, id })
        });

        let messages = rx.iter_mut().enumerate().map(|(i, conn)| {
            let id = peer(my_id, i);
            let msg = tokio::time::timeout(RECV_TIMEOUT, conn.recv::<T>());
            async move { (id, msg.await) }
        });
        let (receipts, messages) =
            futures::join!(future::try_join_all(outgoing), future::join_all(messages));
        receipts?;

        let mut messages: Vec<_> = messages
            .into_iter()
            .map(|(id, m)| match m {
                Ok(m) => m.map_err(|source| NetworkError { id, source }),
                Err(elapsed) => Err(NetworkError {
                    id,
                    source: ConnectionError::TimeOut(elapsed),
                }),
            })
            .collect::<Result<_, _>>()?;

        messages.insert(self.index, msg);
        Ok(messages)
    }

    /// Drop the connection to the party with the given id.
    ///
    /// Anything sent to or awaited from them afterwards fails.
    pub fn disconnect(&mut self, id: Id) -> Option<Connection<R, W>> {
        let i = (0..self.connections.len()).find(|&i| peer(self.index, i) == id)?;
        Some(self.connections.remove(i))
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Broadcast for Network<R, W> {
    type Error = NetworkError;

    async fn broadcast(&mut self, msg: &(impl serde::Serialize + Sync)) -> Result<(), Self::Error> {
        self.broadcast(msg).await
    }

    async fn symmetric_broadcast<T>(&mut self, msg: T) -> Result<Vec<T>, Self::Error>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync,
    {
        self.symmetric_broadcast(msg).await
    }

    async fn receive_all<T: serde::de::DeserializeOwned>(&mut self) -> Result<Vec<T>, Self::Error> {
        self.receive_all().await
    }

    fn id(&self) -> usize {
        self.index
    }

    fn size(&self) -> usize {
        self.connections.len() + 1
    }
}

/// Network containing only duplex connections.
/// Used for local testing.
pub type InMemoryNetwork = Network<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

impl InMemoryNetwork {
    /// Construct a list of networks for each 'peer' in the peer-2-peer network.
    ///
    /// * `player_count`: Size of the network in terms of peers.
    pub fn in_memory(player_count: usize) -> Vec<Self> {
        let mut internet = BTreeMap::new();
        for i in 0..player_count {
            for j in 0..i {
                let (c1, c2) = DuplexConnection::in_memory();
                internet.insert((i, j), c1);
                internet.insert((j, i), c2);
            }
        }

        (0..player_count)
            .map(|i| {
                let connections = (0..player_count)
                    .filter(|&j| j != i)
                    .filter_map(|j| internet.remove(&(i, j)))
                    .collect();
                Network {
                    connections,
                    index: i,
                }
            })
            .collect()
    }
}
