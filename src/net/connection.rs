//! Module for doing arbitrary communication in 'some' medium.
//! This 'medium' can be anything that implements `AsyncRead`/`AsyncWrite`.
//! There is built-in support for TCP and in-memory duplex-based connections.
//!
//! Messages are serialized with bincode and length delimited.

use std::error::Error;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    time::error::Elapsed,
};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub struct Connection<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    reader: FramedRead<R, LengthDelimitedCodec>,
    writer: FramedWrite<W, LengthDelimitedCodec>,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Deserialization failed")]
    MalformedMessage(#[from] bincode::Error),
    #[error("Connection timed out after {0}")]
    TimeOut(Elapsed),
    #[error("No message to receive")]
    Closed,
    #[error("Unknown error")]
    Unknown(#[from] Box<dyn Error + Send + Sync>),
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// Construct a new connection from a reader and writer
    ///
    /// * `reader`: Reader to receive messages from
    /// * `writer`: Writer to send messages to
    pub fn new(reader: R, writer: W) -> Self {
        let codec = LengthDelimitedCodec::new();
        let reader = FramedRead::new(reader, codec.clone());
        let writer = FramedWrite::new(writer, codec);

        Connection { reader, writer }
    }

    /// Send a message, waiting until it has been flushed
    ///
    /// * `msg`: Message to send
    pub async fn send(&mut self, msg: &impl serde::Serialize) -> Result<(), ConnectionError> {
        let (_, mut tx) = self.split();
        tx.send(msg).await
    }

    /// Receive a message waiting for arrival
    pub async fn recv<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, ConnectionError> {
        let (mut rx, _) = self.split();
        rx.recv().await
    }

    pub fn split(&mut self) -> (Receiving<R>, Sending<W>) {
        (Receiving(&mut self.reader), Sending(&mut self.writer))
    }
}

pub struct Receiving<'a, R: AsyncRead>(&'a mut FramedRead<R, LengthDelimitedCodec>);
pub struct Sending<'a, W: AsyncWrite>(&'a mut FramedWrite<W, LengthDelimitedCodec>);

impl<'a, R: AsyncRead + Unpin> Receiving<'a, R> {
    pub async fn recv<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, ConnectionError> {
        let buf = self
            .0
            .next()
            .await
            .ok_or(ConnectionError::Closed)?
            .map_err(|e| ConnectionError::Unknown(Box::new(e)))?;
        let buf = std::io::Cursor::new(buf);
        bincode::deserialize_from(buf).map_err(ConnectionError::MalformedMessage)
    }
}

impl<'a, W: AsyncWrite + Unpin> Sending<'a, W> {
    pub async fn send(&mut self, msg: &impl serde::Serialize) -> Result<(), ConnectionError> {
        let msg = bincode::serialize(msg)?;
        self.0
            .send(tokio_util::bytes::Bytes::from(msg))
            .await
            .map_err(|_| ConnectionError::Closed)
    }
}

pub type DuplexConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

impl DuplexConnection {
    /// Construct a pair of connected in-memory connections.
    pub fn in_memory() -> (Self, Self) {
        let (s1, s2) = tokio::io::duplex(1 << 16);
        let (r1, w1) = tokio::io::split(s1);
        let (r2, w2) = tokio::io::split(s2);
        (Self::new(r1, w1), Self::new(r2, w2))
    }
}

pub type TcpConnection = Connection<OwnedReadHalf, OwnedWriteHalf>;

impl TcpConnection {
    /// New TCP-based connection from a stream
    ///
    /// * `stream`: TCP stream to use
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn in_memory() {
        let (mut c1, mut c2) = DuplexConnection::in_memory();
        let h1 = async move {
            c1.send(&"Hello".to_owned()).await.unwrap();
            let msg: String = c1.recv().await.unwrap();
            assert_eq!(msg, "Greetings friend");
        };
        let h2 = async move {
            let msg: String = c2.recv().await.unwrap();
            assert_eq!(msg, "Hello");
            c2.send(&"Greetings friend".to_owned()).await.unwrap();
        };
        futures::join!(h1, h2);
    }

    #[tokio::test]
    async fn closed() {
        let (mut c1, c2) = DuplexConnection::in_memory();
        drop(c2);
        let res: Result<u32, _> = c1.recv().await;
        assert!(matches!(res, Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut con = TcpConnection::from_tcp(stream);
            let msg: (u32, String) = con.recv().await.unwrap();
            con.send(&msg).await.unwrap();
        };
        let client = async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut con = TcpConnection::from_tcp(stream);
            con.send(&(7u32, "seven".to_owned())).await.unwrap();
            let echo: (u32, String) = con.recv().await.unwrap();
            assert_eq!(echo, (7, "seven".to_owned()));
        };
        futures::join!(server, client);
    }
}
