//! AES-256-OFB payload encryption.
//!
//! OFB turns AES into a stream cipher: no padding, ciphertext length
//! equals plaintext length, and applying the keystream twice restores the
//! input. Confidentiality only; nothing here detects tampering.

use crate::config::{AES_IV_LEN, AES_KEY_LEN};
use crate::error::{constants, ProtocolError, Result};
use aes::Aes256;
use ofb::cipher::{KeyIvInit, StreamCipher};
use ofb::Ofb;
use rand::rngs::OsRng;
use rand::RngCore;

type Aes256Ofb = Ofb<Aes256>;

/// Generate a random 32-byte AES key from the OS RNG.
pub fn generate_key() -> [u8; AES_KEY_LEN] {
    let mut key = [0u8; AES_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a random 16-byte IV from the OS RNG.
pub fn generate_iv() -> [u8; AES_IV_LEN] {
    let mut iv = [0u8; AES_IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypt raw bytes under AES-256-OFB.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut cipher = Aes256Ofb::new_from_slices(key, iv)
        .map_err(|_| ProtocolError::InvalidKey(constants::ERR_KEY_MATERIAL_LENGTH.to_string()))?;
    let mut buf = plaintext.to_vec();
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

/// Decrypt AES-256-OFB ciphertext.
///
/// OFB is its own inverse, so this is the same keystream application as
/// [`encrypt`].
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    encrypt(key, iv, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_restores_plaintext() {
        let key = generate_key();
        let iv = generate_iv();
        let plaintext = b"Relay this through the rendezvous server.";

        let ciphertext = encrypt(&key, &iv, plaintext).unwrap();
        assert_ne!(&ciphertext[..], &plaintext[..]);
        assert_eq!(ciphertext.len(), plaintext.len());

        let recovered = decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn empty_plaintext_allowed() {
        let key = generate_key();
        let iv = generate_iv();
        assert_eq!(encrypt(&key, &iv, b"").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn wrong_key_length_rejected() {
        let iv = generate_iv();
        let result = encrypt(&[0u8; 16], &iv, b"payload");
        assert!(matches!(result, Err(ProtocolError::InvalidKey(_))));
    }

    #[test]
    fn wrong_iv_length_rejected() {
        let key = generate_key();
        let result = encrypt(&key, &[0u8; 8], b"payload");
        assert!(matches!(result, Err(ProtocolError::InvalidKey(_))));
    }

    #[test]
    fn different_iv_different_ciphertext() {
        let key = generate_key();
        let a = encrypt(&key, &generate_iv(), b"same plaintext").unwrap();
        let b = encrypt(&key, &generate_iv(), b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_iv_garbles_output() {
        let key = generate_key();
        let iv = generate_iv();
        let ciphertext = encrypt(&key, &iv, b"expected text").unwrap();

        let other_iv = generate_iv();
        let garbled = decrypt(&key, &other_iv, &ciphertext).unwrap();
        assert_ne!(garbled, b"expected text");
    }
}
