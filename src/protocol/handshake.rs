//! Three-stage RSA/AES handshake.
//!
//! Stage 1 (hello) announces the initiator's fresh RSA public key. Stage 2
//! (offer) returns the responder's public key plus AES session material,
//! each piece RSA-wrapped for the initiator. Stage 3 (confirm) proves the
//! initiator recovered that material by returning the sentinel encrypted
//! under it; the responder compares byte-for-byte.
//!
//! Every handshake mints fresh keypairs on both sides. The functions here
//! are synchronous and transport-free: callers feed them parsed records
//! and send whatever records they return. Stage-order violations leave the
//! session untouched so late duplicates cannot kill a live session; all
//! other failures mark it `Failed`, and the caller is expected to close
//! the connection.

use crate::codec::Field;
use crate::config::HANDSHAKE_SENTINEL;
use crate::crypto::{aes, rsa as rsa_ops, LocalIdentity, RemoteIdentity, SessionKey};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::identity;
use crate::protocol::packet;
use crate::protocol::session::{HandshakeStage, Session};
use tracing::{debug, instrument};

/// Start a handshake toward `peer`.
///
/// Returns the new session (stage `HelloSent`) together with the stage-1
/// record to send. `sender` is `None` when registering with the server,
/// before any identity has been assigned.
#[instrument]
pub fn initiate(peer: &str, sender: Option<&str>) -> Result<(Session, Field)> {
    let peer_id = identity::format_identity(peer);
    let sender_id = sender.map(identity::format_identity);

    let local = LocalIdentity::generate()?;
    let hello = packet::hello(&local.public_der()?, sender_id.as_deref(), &peer_id);
    let session = Session::initiator(&peer_id, sender_id.as_deref(), local);

    debug!(peer = %peer_id, "Handshake hello prepared");
    Ok((session, hello))
}

/// Respond to a stage-1 record from `peer`.
///
/// Generates the responder keypair and fresh session material, wraps the
/// material under the initiator's public key, and returns the session
/// (stage `OfferSent`) with the stage-2 record. `assigned_name`, when
/// present, tells the initiator which identity this server picked for it.
#[instrument(skip(hello))]
pub fn respond(
    peer: &str,
    own_id: &str,
    hello: &Field,
    assigned_name: Option<&str>,
) -> Result<(Session, Field)> {
    let initiator_der = packet::binary_value(hello, packet::KEY_RSA, constants::ERR_MISSING_RSA)?;
    let remote = RemoteIdentity::from_der(&initiator_der)?;

    let peer_id = identity::format_identity(peer);
    let own = identity::format_identity(own_id);
    let assigned = assigned_name.map(identity::format_identity);

    let local = LocalIdentity::generate()?;
    let key = SessionKey::generate();

    let wrapped_key = rsa_ops::encrypt(&remote.public, &key.key)?;
    let wrapped_iv = rsa_ops::encrypt(&remote.public, &key.iv)?;
    let offer = packet::offer(
        &local.public_der()?,
        &wrapped_key,
        &wrapped_iv,
        &own,
        &peer_id,
        assigned.as_deref(),
    );

    let session = Session::responder(&peer_id, &own, local, remote, key);
    debug!(peer = %peer_id, "Handshake offer prepared");
    Ok((session, offer))
}

/// Initiator processing of a stage-2 record.
///
/// Recovers the session material, adopts any server-assigned identity,
/// and returns the stage-3 confirmation to send. On success the session
/// is `Established`; on failure it is `Failed`.
#[instrument(skip(session, offer))]
pub fn confirm(session: &mut Session, offer: &Field) -> Result<Field> {
    if session.stage() != HandshakeStage::HelloSent {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_STAGE_ORDER.into(),
        ));
    }
    match confirm_inner(session, offer) {
        Ok(record) => {
            debug!(peer = %session.peer(), "Handshake confirmed");
            Ok(record)
        }
        Err(e) => {
            session.fail();
            Err(e)
        }
    }
}

fn confirm_inner(session: &mut Session, offer: &Field) -> Result<Field> {
    let responder_der = packet::binary_value(offer, packet::KEY_RSA, constants::ERR_MISSING_RSA)?;
    let wrapped_key = packet::binary_value(offer, packet::KEY_SECRET, constants::ERR_MISSING_SECRET)?;
    let wrapped_iv = packet::binary_value(offer, packet::KEY_IV, constants::ERR_MISSING_IV)?;

    let remote = RemoteIdentity::from_der(&responder_der)?;
    let key_bytes = rsa_ops::decrypt(session.local_private()?, &wrapped_key)?;
    let iv_bytes = rsa_ops::decrypt(session.local_private()?, &wrapped_iv)?;
    let key = SessionKey::from_slices(&key_bytes, &iv_bytes)?;

    if let Some(name) = offer.value(packet::KEY_NAME) {
        session.adopt_identity(name);
    }
    let sender = session
        .own_identity()
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_NO_IDENTITY.into()))?
        .to_string();
    let receiver = session.peer().to_string();

    let sentinel_cipher = aes::encrypt(&key.key, &key.iv, HANDSHAKE_SENTINEL.as_bytes())?;
    let wrapped_confirm_iv = rsa_ops::encrypt(&remote.public, &key.iv)?;
    let record = packet::confirm(&wrapped_confirm_iv, &sentinel_cipher, &sender, &receiver);

    session.complete(remote, key);
    Ok(record)
}

/// Responder verification of a stage-3 record.
///
/// Byte-for-byte sentinel equality establishes the session. A mismatch or
/// any decryption error marks it `Failed` and the caller must close the
/// connection; the peer stays locked out until a new stage-1 restarts the
/// handshake.
#[instrument(skip(session, record))]
pub fn finalize(session: &mut Session, record: &Field) -> Result<()> {
    if session.stage() != HandshakeStage::OfferSent {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_STAGE_ORDER.into(),
        ));
    }
    match verify_confirmation(session, record) {
        Ok(()) => {
            session.confirm_established();
            debug!(peer = %session.peer(), "Handshake established");
            Ok(())
        }
        Err(e) => {
            session.fail();
            Err(e)
        }
    }
}

fn verify_confirmation(session: &Session, record: &Field) -> Result<()> {
    let wrapped_iv = packet::binary_value(record, packet::KEY_IV, constants::ERR_MISSING_IV)?;
    let ciphertext = packet::binary_value(record, packet::KEY_CONTENT, constants::ERR_MISSING_CONTENT)?;

    let iv = rsa_ops::decrypt(session.local_private()?, &wrapped_iv)?;
    let plaintext = aes::decrypt(&session.session_key()?.key, &iv, &ciphertext)?;

    if plaintext != HANDSHAKE_SENTINEL.as_bytes() {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_SENTINEL_MISMATCH.into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Reader;
    use crate::protocol::packet::FIELD_HANDSHAKE;

    /// Serialize and reparse, as the wire would.
    fn roundtrip(record: &Field) -> Field {
        let doc = Reader::parse(&record.encode());
        doc.field(FIELD_HANDSHAKE).unwrap().clone()
    }

    #[test]
    fn registration_flow_with_server() {
        // Client registers: no sender identity yet.
        let (mut client, hello) = initiate("server", None).unwrap();
        let hello = roundtrip(&hello);
        assert_eq!(packet::stage(&hello).unwrap(), 1);
        assert_eq!(packet::sender(&hello), None);
        assert_eq!(packet::receiver(&hello).unwrap(), "server");

        // Server answers with wrapped material and an assigned name.
        let (mut server_side, offer) =
            respond("203.0.113.7:51820", "server", &hello, Some("user-1")).unwrap();
        let offer = roundtrip(&offer);
        assert_eq!(packet::stage(&offer).unwrap(), 2);
        assert_eq!(offer.value(packet::KEY_NAME), Some("user-1:000001"));

        // Client recovers the material, adopts the name, confirms.
        let confirmation = confirm(&mut client, &offer).unwrap();
        assert!(client.is_established());
        assert_eq!(client.own_identity(), Some("user-1:000001"));

        let confirmation = roundtrip(&confirmation);
        assert_eq!(packet::stage(&confirmation).unwrap(), 3);
        assert_eq!(packet::sender(&confirmation), Some("user-1:000001"));

        finalize(&mut server_side, &confirmation).unwrap();
        assert!(server_side.is_established());

        // Both sides hold identical session material.
        assert_eq!(
            client.session_key().unwrap().key,
            server_side.session_key().unwrap().key
        );
        assert_eq!(
            client.session_key().unwrap().iv,
            server_side.session_key().unwrap().iv
        );

        // And can exchange traffic in both directions.
        let to_server = client.encode_message("status").unwrap();
        assert_eq!(server_side.decode_message(&to_server).unwrap(), "status");

        let to_client = server_side.encode_message("ack").unwrap();
        assert_eq!(client.decode_message(&to_client).unwrap(), "ack");
    }

    #[test]
    fn tampered_confirmation_fails_direct_session() {
        let (mut a, hello) = initiate("10.0.0.2:4000", Some("10.0.0.1:4000")).unwrap();
        let hello = roundtrip(&hello);
        assert_eq!(packet::sender(&hello), Some("10.0.0.1:4000"));

        let (mut b, offer) = respond("10.0.0.1:4000", "10.0.0.2:4000", &hello, None).unwrap();
        let offer = roundtrip(&offer);
        assert_eq!(offer.value(packet::KEY_NAME), None);

        let genuine = confirm(&mut a, &offer).unwrap();
        assert!(a.is_established());

        // Flip one ciphertext byte in transit.
        let wrapped_iv =
            packet::binary_value(&genuine, packet::KEY_IV, constants::ERR_MISSING_IV).unwrap();
        let mut ciphertext =
            packet::binary_value(&genuine, packet::KEY_CONTENT, constants::ERR_MISSING_CONTENT)
                .unwrap();
        ciphertext[0] ^= 0x01;
        let tampered = packet::confirm(&wrapped_iv, &ciphertext, "10.0.0.1:4000", "10.0.0.2:4000");

        let err = finalize(&mut b, &tampered).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeError(_)));
        assert_eq!(b.stage(), HandshakeStage::Failed);

        // Failed sessions refuse traffic and ignore late confirmations.
        assert!(matches!(
            b.decode_message(&packet::message(&[1], &[2], "a:1", "b:2")),
            Err(ProtocolError::NotEstablished(_))
        ));
        let late = finalize(&mut b, &genuine).unwrap_err();
        assert!(matches!(late, ProtocolError::HandshakeError(_)));
        assert_eq!(b.stage(), HandshakeStage::Failed);
    }

    #[test]
    fn confirm_out_of_order_leaves_session_untouched() {
        let mut session = Session::stub("10.0.0.5:9", HandshakeStage::Established);
        let offer = Field::inline(FIELD_HANDSHAKE).put(packet::KEY_STAGE, "2");

        let err = confirm(&mut session, &offer).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeError(_)));
        assert_eq!(session.stage(), HandshakeStage::Established);
    }

    #[test]
    fn finalize_requires_offer_sent() {
        let mut session = Session::stub("10.0.0.5:9", HandshakeStage::Init);
        let record = Field::inline(FIELD_HANDSHAKE).put(packet::KEY_STAGE, "3");

        let err = finalize(&mut session, &record).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeError(_)));
        assert_eq!(session.stage(), HandshakeStage::Init);
    }

    #[test]
    fn respond_requires_rsa_value() {
        let hello = Field::inline(FIELD_HANDSHAKE)
            .put(packet::KEY_STAGE, "1")
            .put(packet::KEY_RECEIVER, "server");

        let err = respond("10.0.0.1:4000", "server", &hello, None).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPacket(_)));
    }
}
