//! # Services
//!
//! The two runnable faces of the protocol: the relay server and the
//! client handle. Both are thin drivers over [`crate::protocol`] wired to
//! [`crate::transport`]; neither adds protocol behavior of its own.

pub mod client;
pub mod server;

pub use client::RendezvousClient;
pub use server::RendezvousServer;
