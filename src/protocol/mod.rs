//! # Rendezvous Protocol
//!
//! Everything above the codec and below the transport: peer identities,
//! packet construction and extraction, the three-stage key exchange, the
//! per-peer session state it produces, and delivery of decrypted traffic
//! to the application.
//!
//! ## Components
//! - **`identity`**: the `name:port` identity scheme and its normalization
//! - **`packet`**: handshake and message record layouts over [`crate::codec`]
//! - **`handshake`**: the stage-1/2/3 key exchange functions
//! - **`session`**: per-peer crypto state and the shared registry
//! - **`dispatcher`**: priority-ordered fan-out of decrypted messages
//!
//! ## Flow
//! ```text
//! initiate ── stage 1 ──▶ respond
//!    ◀─────── stage 2 ───────┘
//! confirm ── stage 3 ──▶ finalize
//! ```
//!
//! After `finalize`, both sides hold the same AES key and IV and exchange
//! `CryptoCommunication` records through [`session::Session::encode_message`]
//! and [`session::Session::decode_message`].

pub mod dispatcher;
pub mod handshake;
pub mod identity;
pub mod packet;
pub mod session;

pub use dispatcher::{Dispatcher, HandlerId, MessageEvent, Priority};
pub use identity::format_identity;
pub use session::{HandshakeStage, RegistryStats, Session, SessionRegistry};
