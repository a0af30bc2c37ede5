//! Parties behind TCP sockets.
//!
//! Requests and responses are bincode frames on a [`TcpConnection`], one
//! response per request, in order. Every frame carries the sequence number of
//! its request, so a client whose call was cancelled can tell a late response
//! from the one it is waiting for.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::Mutex,
};
use tracing::Instrument;

use crate::{
    algebra::Ring,
    net::{
        connection::{ConnectionError, TcpConnection},
        Id,
    },
    protocols::spdz::Party,
    transport::{Remote, Request, Response, TransportError},
};

/// Serve requests for `party` on every connection accepted by `listener`.
///
/// Runs until accepting fails.
pub async fn serve<R: Ring>(party: Arc<Party<R>>, listener: TcpListener) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let party = party.clone();
        let span = tracing::info_span!("connection", location = %party.id(), %peer);
        tokio::spawn(
            async move {
                match handle_connection(&party, stream).await {
                    Ok(()) => tracing::debug!("client disconnected"),
                    Err(e) => tracing::warn!("connection dropped: {e}"),
                }
            }
            .instrument(span),
        );
    }
}

async fn handle_connection<R: Ring>(
    party: &Party<R>,
    stream: TcpStream,
) -> Result<(), ConnectionError> {
    let mut conn = TcpConnection::from_tcp(stream);
    loop {
        let (seq, request): (u64, Request<R>) = match conn.recv().await {
            Ok(frame) => frame,
            Err(ConnectionError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };
        tracing::trace!(seq, request = request.name(), "received");
        let response = party.handle(request);
        conn.send(&(seq, response)).await?;
    }
}

struct Link {
    conn: TcpConnection,
    next_seq: u64,
}

/// Client side of [`serve`].
///
/// Calls are cancel safe: a call dropped before its response arrived leaves
/// that response to be skipped by the next call.
pub struct TcpRemote {
    location: Id,
    link: Mutex<Link>,
}

impl TcpRemote {
    pub async fn connect(addr: impl ToSocketAddrs, location: Id) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|_| TransportError::Unreachable(location))?;
        Ok(Self {
            location,
            link: Mutex::new(Link {
                conn: TcpConnection::from_tcp(stream),
                next_seq: 0,
            }),
        })
    }
}

#[async_trait]
impl<R: Ring> Remote<R> for TcpRemote {
    fn location(&self) -> Id {
        self.location
    }

    async fn call(&self, request: Request<R>) -> Result<Response<R>, TransportError> {
        let mut link = self.link.lock().await;
        let seq = link.next_seq;
        link.next_seq += 1;
        link.conn.send(&(seq, &request)).await?;
        loop {
            let (answered, response): (u64, Response<R>) = link.conn.recv().await?;
            if answered == seq {
                return Ok(response);
            }
            tracing::debug!(location = %self.location, answered, seq, "skipping stale response");
        }
    }
}
