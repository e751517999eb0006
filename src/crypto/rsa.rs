//! RSA keypair generation and PKCS#1 v1.5 block encryption.
//!
//! RSA carries only small handshake payloads (session keys, IVs, the
//! confirmation sentinel), never application data. Public keys travel as
//! SPKI DER so either side can reconstruct them from raw wire bytes.

use crate::config::RSA_KEY_BITS;
use crate::error::{constants, ProtocolError, Result};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

/// Generate a fresh RSA-2048 keypair for one endpoint.
///
/// Key generation is CPU-heavy; call this once per endpoint, not per
/// session.
pub fn generate_keypair() -> Result<(RsaPrivateKey, RsaPublicKey)> {
    let mut rng = OsRng;
    // Keygen only fails when the environment cannot do RSA at all.
    let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| ProtocolError::ConfigError(format!("{}: {e}", constants::ERR_RSA_KEYGEN_FAILED)))?;
    let public = RsaPublicKey::from(&private);
    Ok((private, public))
}

/// Encrypt a small payload under the receiver's public key.
///
/// PKCS#1 v1.5 limits the plaintext to modulus size minus 11 bytes
/// (245 for RSA-2048); larger inputs fail.
pub fn encrypt(public: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut rng = OsRng;
    public
        .encrypt(&mut rng, Pkcs1v15Encrypt, data)
        .map_err(|_| ProtocolError::EncryptionFailure)
}

/// Decrypt an RSA block with the local private key.
pub fn decrypt(private: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    private
        .decrypt(Pkcs1v15Encrypt, data)
        .map_err(|_| ProtocolError::DecryptionFailure)
}

/// Serialize a public key to SPKI DER for the wire.
pub fn public_key_to_der(public: &RsaPublicKey) -> Result<Vec<u8>> {
    public
        .to_public_key_der()
        .map(|doc| doc.into_vec())
        .map_err(|e| ProtocolError::InvalidKey(format!("{}: {e}", constants::ERR_BAD_PUBLIC_KEY)))
}

/// Reconstruct a public key from SPKI DER bytes.
pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der)
        .map_err(|e| ProtocolError::InvalidKey(format!("{}: {e}", constants::ERR_BAD_PUBLIC_KEY)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    // Keygen dominates test runtime, so every test shares one pair.
    fn keypair() -> &'static (RsaPrivateKey, RsaPublicKey) {
        static KEYS: OnceLock<(RsaPrivateKey, RsaPublicKey)> = OnceLock::new();
        KEYS.get_or_init(|| generate_keypair().unwrap())
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (private, public) = keypair();
        let plaintext = b"32 bytes of session key material";

        let ciphertext = encrypt(public, plaintext).unwrap();
        assert_ne!(&ciphertext[..], &plaintext[..]);

        let recovered = decrypt(private, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn ciphertext_randomized_per_call() {
        let (_, public) = keypair();
        let a = encrypt(public, b"same input").unwrap();
        let b = encrypt(public, b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_plaintext_rejected() {
        let (_, public) = keypair();
        // 2048-bit modulus caps PKCS#1 v1.5 input at 245 bytes.
        let too_big = vec![0x42u8; 246];
        assert!(matches!(
            encrypt(public, &too_big),
            Err(ProtocolError::EncryptionFailure)
        ));
    }

    #[test]
    fn der_roundtrip_preserves_key() {
        let (private, public) = keypair();
        let der = public_key_to_der(public).unwrap();
        let restored = public_key_from_der(&der).unwrap();

        let ciphertext = encrypt(&restored, b"via restored key").unwrap();
        assert_eq!(decrypt(private, &ciphertext).unwrap(), b"via restored key");
    }

    #[test]
    fn garbage_der_rejected() {
        assert!(matches!(
            public_key_from_der(b"not a DER document"),
            Err(ProtocolError::InvalidKey(_))
        ));
    }

    #[test]
    fn decrypt_of_garbage_fails() {
        let (private, _) = keypair();
        let garbage = vec![0xFFu8; 256];
        assert!(matches!(
            decrypt(private, &garbage),
            Err(ProtocolError::DecryptionFailure)
        ));
    }
}
