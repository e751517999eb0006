//! # Cryptographic Primitives
//!
//! RSA and AES building blocks for the rendezvous handshake and message
//! encryption.
//!
//! The split of duties mirrors the wire protocol: RSA (PKCS#1 v1.5)
//! protects the small handshake payloads that bootstrap a session, and
//! AES-256 in OFB mode carries everything after that. Neither layer
//! authenticates ciphertext; the only integrity signal in the protocol is
//! the sentinel comparison at the end of the handshake.
//!
//! ## Components
//! - **rsa**: Keypair generation, PKCS#1 v1.5 blocks, SPKI DER transport
//! - **aes**: AES-256-OFB keystream application, random keys and IVs
//! - **material**: Typed key material with zeroing and redacted debug output

pub mod aes;
pub mod material;
pub mod rsa;

pub use material::{LocalIdentity, RemoteIdentity, SessionKey};
