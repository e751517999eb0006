//! # Error Types
//!
//! Comprehensive error handling for the rendezvous protocol.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level I/O errors to handshake and session failures.
//!
//! ## Error Categories
//! - **I/O Errors**: Network failures on the underlying transport
//! - **Cryptographic Errors**: Key material, encryption and decryption failures
//! - **Handshake Errors**: Malformed or out-of-order handshake packets
//! - **Session Errors**: Unknown peers, sessions used before establishment
//! - **Configuration Errors**: Invalid settings, unsupported environment
//!
//! Wire parse failures are deliberately absent from this taxonomy: the codec
//! skips malformed lines instead of surfacing them (see [`crate::codec`]).
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use rendezvous_protocol::error::{ProtocolError, Result};
//! use tracing::error;
//!
//! fn guard_established(peer: &str, established: bool) -> Result<()> {
//!     if !established {
//!         return Err(ProtocolError::NotEstablished(peer.to_string()));
//!     }
//!     Ok(())
//! }
//!
//! fn main() {
//!     if let Err(e) = guard_established("203.0.113.7:51820", false) {
//!         error!(error = %e, "Refusing to send");
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";
    pub const ERR_IDENTITY_LOCK: &str = "Failed to acquire identity lock";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_HANDSHAKE_TIMEOUT: &str = "Handshake timed out before completion";

    /// Cryptographic errors
    pub const ERR_ENCRYPTION_FAILED: &str = "Encryption failed";
    pub const ERR_DECRYPTION_FAILED: &str = "Decryption failed";
    pub const ERR_RSA_KEYGEN_FAILED: &str = "RSA key generation failed";
    pub const ERR_KEY_MATERIAL_LENGTH: &str = "Key or IV has wrong length";

    /// Handshake packet errors
    pub const ERR_MISSING_RSA: &str = "Handshake packet missing 'rsa' field";
    pub const ERR_MISSING_SECRET: &str = "Handshake packet missing 'secret' field";
    pub const ERR_MISSING_IV: &str = "Packet missing 'iv' field";
    pub const ERR_MISSING_CONTENT: &str = "Packet missing 'content' field";
    pub const ERR_MISSING_STAGE: &str = "Handshake packet missing 'stage' field";
    pub const ERR_MISSING_RECEIVER: &str = "Packet missing 'receiver' field";
    pub const ERR_MISSING_SENDER: &str = "Packet missing 'sender' field";
    pub const ERR_UNKNOWN_STAGE: &str = "Unknown handshake stage";
    pub const ERR_BAD_BASE64: &str = "Value is not valid base64";
    pub const ERR_BAD_PUBLIC_KEY: &str = "Value is not a valid DER public key";
    pub const ERR_SENTINEL_MISMATCH: &str = "Confirmation sentinel did not match";
    pub const ERR_STAGE_ORDER: &str = "Handshake packet arrived out of order";

    /// Session errors
    pub const ERR_NO_SESSION_KEY: &str = "Session has no negotiated key material";
    pub const ERR_NO_REMOTE_KEY: &str = "Session has no remote public key";
    pub const ERR_NO_LOCAL_KEY: &str = "Session has no local keypair";
    pub const ERR_NO_IDENTITY: &str = "Session has no local identity assigned";
    pub const ERR_SESSION_FAILED: &str = "Session is in the failed state";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Session with {0} is not established")]
    NotEstablished(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Line too long: {0} bytes")]
    OversizedLine(usize),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
