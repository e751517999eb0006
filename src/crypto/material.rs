//! Typed key material held by endpoints and sessions.
//!
//! Three shapes cover everything the protocol handles: the local RSA
//! keypair, a peer's public key, and the negotiated AES session secret.
//! Secret-bearing types never expose their bytes through `Debug`, and the
//! session secret is zeroed when dropped.

use crate::config::{AES_IV_LEN, AES_KEY_LEN};
use crate::crypto::{aes, rsa as rsa_ops};
use crate::error::{constants, ProtocolError, Result};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// RSA keypair identifying the local endpoint.
#[derive(Clone)]
pub struct LocalIdentity {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

impl LocalIdentity {
    /// Generate a fresh identity keypair.
    pub fn generate() -> Result<Self> {
        let (private, public) = rsa_ops::generate_keypair()?;
        Ok(Self { private, public })
    }

    /// SPKI DER bytes of the public half, as sent on the wire.
    pub fn public_der(&self) -> Result<Vec<u8>> {
        rsa_ops::public_key_to_der(&self.public)
    }
}

impl fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalIdentity").finish_non_exhaustive()
    }
}

/// Public key learned from a peer during the handshake.
#[derive(Debug, Clone)]
pub struct RemoteIdentity {
    pub public: RsaPublicKey,
}

impl RemoteIdentity {
    /// Reconstruct a peer identity from its wire DER bytes.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            public: rsa_ops::public_key_from_der(der)?,
        })
    }

    /// SPKI DER bytes of this key.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        rsa_ops::public_key_to_der(&self.public)
    }
}

/// Negotiated AES key and handshake IV for one established session.
///
/// The IV stored here is the one exchanged during the handshake;
/// application messages each carry their own fresh IV on the wire.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    pub key: [u8; AES_KEY_LEN],
    pub iv: [u8; AES_IV_LEN],
}

impl SessionKey {
    /// Generate fresh random session material.
    pub fn generate() -> Self {
        Self {
            key: aes::generate_key(),
            iv: aes::generate_iv(),
        }
    }

    /// Build from exact-size parts.
    pub fn from_parts(key: [u8; AES_KEY_LEN], iv: [u8; AES_IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Build from decrypted wire bytes, validating lengths.
    pub fn from_slices(key: &[u8], iv: &[u8]) -> Result<Self> {
        let key: [u8; AES_KEY_LEN] = key
            .try_into()
            .map_err(|_| ProtocolError::InvalidKey(constants::ERR_KEY_MATERIAL_LENGTH.to_string()))?;
        let iv: [u8; AES_IV_LEN] = iv
            .try_into()
            .map_err(|_| ProtocolError::InvalidKey(constants::ERR_KEY_MATERIAL_LENGTH.to_string()))?;
        Ok(Self { key, iv })
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_material_has_expected_lengths() {
        let sk = SessionKey::generate();
        assert_eq!(sk.key.len(), AES_KEY_LEN);
        assert_eq!(sk.iv.len(), AES_IV_LEN);
    }

    #[test]
    fn generated_material_is_unique() {
        let a = SessionKey::generate();
        let b = SessionKey::generate();
        assert_ne!(a.key, b.key);
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn from_slices_validates_lengths() {
        let good = SessionKey::from_slices(&[7u8; AES_KEY_LEN], &[9u8; AES_IV_LEN]).unwrap();
        assert_eq!(good.key, [7u8; AES_KEY_LEN]);
        assert_eq!(good.iv, [9u8; AES_IV_LEN]);

        assert!(matches!(
            SessionKey::from_slices(&[0u8; 16], &[0u8; AES_IV_LEN]),
            Err(ProtocolError::InvalidKey(_))
        ));
        assert!(matches!(
            SessionKey::from_slices(&[0u8; AES_KEY_LEN], &[0u8; 32]),
            Err(ProtocolError::InvalidKey(_))
        ));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let sk = SessionKey::from_parts([0xAA; AES_KEY_LEN], [0xBB; AES_IV_LEN]);
        assert_eq!(format!("{sk:?}"), "SessionKey { .. }");
    }
}
