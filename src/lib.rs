//! # Rendezvous Protocol
//!
//! A peer-rendezvous messaging core: clients register with a relay
//! server, negotiate end-to-end encrypted sessions with each other
//! through a three-stage RSA/AES handshake, and exchange payloads the
//! relay cannot read. Every record travels as structured text in a
//! line-oriented format with tolerant parsing.
//!
//! ## Layers
//! - [`codec`]: the `Field`/`Value` text format and its tolerant parser
//! - [`crypto`]: RSA and AES-256-OFB primitives plus key material types
//! - [`protocol`]: identities, packets, the handshake, sessions, dispatch
//! - [`transport`]: CR-delimited framing over TCP
//! - [`service`]: the relay server and the client handle
//!
//! ## Quick start
//! ```no_run
//! use rendezvous_protocol::config::RendezvousConfig;
//! use rendezvous_protocol::service::{RendezvousClient, RendezvousServer};
//!
//! # async fn run() -> rendezvous_protocol::Result<()> {
//! let server = RendezvousServer::bind(RendezvousConfig::default()).await?;
//! tokio::spawn(server.run());
//!
//! let client = RendezvousClient::connect(RendezvousConfig::default()).await?;
//! client.register().await?;
//! let me = client.wait_registered().await?;
//! println!("registered as {me}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Security properties
//! Confidentiality against the relay only. The cipher is unauthenticated
//! and there is no MAC, no forward secrecy across sessions, and no replay
//! protection beyond per-message IV freshness; the sole integrity check
//! is the handshake sentinel comparison.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use codec::{Field, Reader, Value};
pub use config::RendezvousConfig;
pub use error::{ProtocolError, Result};
pub use protocol::dispatcher::{Dispatcher, HandlerId, MessageEvent, Priority};
pub use protocol::session::{HandshakeStage, Session, SessionRegistry};
pub use service::{RendezvousClient, RendezvousServer};
