//! Wire records for handshake and application traffic.
//!
//! Every packet is a single inline Field: `CryptoHandshake` carries the
//! three handshake stages and `CryptoCommunication` carries encrypted
//! application messages. Builders emit values in a fixed order so the same
//! input always serializes to the same bytes; extractors pull required
//! values out of parsed records and undo the base64 transport encoding.

use crate::codec::Field;
use crate::error::{constants, ProtocolError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Record name for the three handshake stages.
pub const FIELD_HANDSHAKE: &str = "CryptoHandshake";
/// Record name for encrypted application messages.
pub const FIELD_MESSAGE: &str = "CryptoCommunication";

pub const KEY_RSA: &str = "rsa";
pub const KEY_SECRET: &str = "secret";
pub const KEY_IV: &str = "iv";
pub const KEY_CONTENT: &str = "content";
pub const KEY_STAGE: &str = "stage";
pub const KEY_SENDER: &str = "sender";
pub const KEY_RECEIVER: &str = "receiver";
pub const KEY_NAME: &str = "name";

/// Base64 used for every binary payload on the wire.
pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 wire value.
pub fn decode_b64(value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|_| ProtocolError::MalformedPacket(constants::ERR_BAD_BASE64.into()))
}

/// Stage 1: the initiator announces its public key.
///
/// `sender` is absent when a client first registers with the server,
/// before any identity has been assigned to it.
pub fn hello(public_der: &[u8], sender: Option<&str>, receiver: &str) -> Field {
    let mut field = Field::inline(FIELD_HANDSHAKE)
        .put(KEY_RSA, encode_b64(public_der))
        .put(KEY_STAGE, "1");
    if let Some(sender) = sender {
        field = field.put(KEY_SENDER, sender);
    }
    field.put(KEY_RECEIVER, receiver)
}

/// Stage 2: the responder offers session material wrapped for the
/// initiator, plus an assigned identity when the server is responding to
/// a registration.
pub fn offer(
    public_der: &[u8],
    wrapped_key: &[u8],
    wrapped_iv: &[u8],
    sender: &str,
    receiver: &str,
    assigned_name: Option<&str>,
) -> Field {
    let mut field = Field::inline(FIELD_HANDSHAKE)
        .put(KEY_RSA, encode_b64(public_der))
        .put(KEY_SECRET, encode_b64(wrapped_key))
        .put(KEY_IV, encode_b64(wrapped_iv))
        .put(KEY_STAGE, "2")
        .put(KEY_SENDER, sender)
        .put(KEY_RECEIVER, receiver);
    if let Some(name) = assigned_name {
        field = field.put(KEY_NAME, name);
    }
    field
}

/// Stage 3: the initiator proves it recovered the session material by
/// returning the sentinel encrypted under it.
pub fn confirm(wrapped_iv: &[u8], ciphertext: &[u8], sender: &str, receiver: &str) -> Field {
    Field::inline(FIELD_HANDSHAKE)
        .put(KEY_IV, encode_b64(wrapped_iv))
        .put(KEY_CONTENT, encode_b64(ciphertext))
        .put(KEY_STAGE, "3")
        .put(KEY_SENDER, sender)
        .put(KEY_RECEIVER, receiver)
}

/// Encrypted application message.
pub fn message(wrapped_iv: &[u8], ciphertext: &[u8], sender: &str, receiver: &str) -> Field {
    Field::inline(FIELD_MESSAGE)
        .put(KEY_IV, encode_b64(wrapped_iv))
        .put(KEY_CONTENT, encode_b64(ciphertext))
        .put(KEY_SENDER, sender)
        .put(KEY_RECEIVER, receiver)
}

/// True for a `CryptoHandshake` record.
pub fn is_handshake(field: &Field) -> bool {
    field.name() == FIELD_HANDSHAKE
}

/// True for a `CryptoCommunication` record.
pub fn is_message(field: &Field) -> bool {
    field.name() == FIELD_MESSAGE
}

/// Look up a required value, mapping absence to a malformed-packet error.
pub fn require<'a>(field: &'a Field, key: &str, missing: &'static str) -> Result<&'a str> {
    field
        .value(key)
        .ok_or_else(|| ProtocolError::MalformedPacket(missing.into()))
}

/// Decode the base64 payload stored under `key`.
pub fn binary_value(field: &Field, key: &str, missing: &'static str) -> Result<Vec<u8>> {
    decode_b64(require(field, key, missing)?)
}

/// Handshake stage number (1, 2 or 3).
pub fn stage(field: &Field) -> Result<u8> {
    match require(field, KEY_STAGE, constants::ERR_MISSING_STAGE)? {
        "1" => Ok(1),
        "2" => Ok(2),
        "3" => Ok(3),
        _ => Err(ProtocolError::HandshakeError(
            constants::ERR_UNKNOWN_STAGE.into(),
        )),
    }
}

/// Sender identity, absent only on a registration hello.
pub fn sender(field: &Field) -> Option<&str> {
    field.value(KEY_SENDER)
}

/// Receiver identity; required on every packet for routing.
pub fn receiver(field: &Field) -> Result<&str> {
    require(field, KEY_RECEIVER, constants::ERR_MISSING_RECEIVER)
}
