//! # Transport
//!
//! TCP plumbing shared by the server and client services: the
//! CR-delimited record codec, a dial helper, and the outbound handle a
//! connection task hands out so other tasks can queue records to it.
//!
//! Each connection is driven by exactly one task that owns the framed
//! stream; everyone else talks to the connection through its [`PeerLink`].

pub mod framing;

pub use framing::RecordCodec;

use crate::config::TransportConfig;
use crate::error::{ProtocolError, Result};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

/// Dial a peer and wrap the stream in the record codec.
#[instrument(skip(config))]
pub async fn connect(addr: &str, config: &TransportConfig) -> Result<Framed<TcpStream, RecordCodec>> {
    let stream = TcpStream::connect(addr).await?;
    debug!(peer = %addr, "Connection established");
    Ok(Framed::new(stream, RecordCodec::from_config(config)))
}

/// Outbound handle for one connection.
///
/// Cloneable; all clones feed the same bounded queue, drained by the
/// connection task that owns the socket. Sends fail once that task has
/// exited.
#[derive(Debug, Clone)]
pub struct PeerLink {
    addr: SocketAddr,
    tx: mpsc::Sender<String>,
}

impl PeerLink {
    /// Create a link and the queue its connection task drains.
    pub fn channel(addr: SocketAddr, depth: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self { addr, tx }, rx)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queue one record for transmission, waiting if the queue is full.
    pub async fn send(&self, record: String) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}
