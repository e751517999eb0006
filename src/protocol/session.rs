//! Per-peer session state, message encryption, and the identity-keyed
//! session registry.
//!
//! A [`Session`] tracks one handshake with one peer: its stage, the local
//! RSA keypair minted for that handshake, the peer's public key, and the
//! negotiated AES material. Sessions are keyed by canonical identity in a
//! [`SessionRegistry`] shared across connection tasks. Stage transitions
//! for a single peer always happen on that peer's connection task; the
//! registry lock only guards the map itself.

use crate::crypto::{aes, rsa as rsa_ops, LocalIdentity, RemoteIdentity, SessionKey};
use crate::codec::Field;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::identity;
use crate::protocol::packet;
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Handshake progress for one session.
///
/// Initiators move `Init → HelloSent → Established`; responders move
/// `Init → OfferSent → Established`. `Failed` is terminal until a new
/// stage-1 record restarts the session from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    Init,
    HelloSent,
    OfferSent,
    Established,
    Failed,
}

impl HandshakeStage {
    /// True once the session may carry application traffic.
    pub fn is_established(self) -> bool {
        matches!(self, HandshakeStage::Established)
    }

    /// True while the handshake is still in flight.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            HandshakeStage::Init | HandshakeStage::HelloSent | HandshakeStage::OfferSent
        )
    }
}

/// Negotiated state for one peer.
#[derive(Debug)]
pub struct Session {
    peer: String,
    own_id: Option<String>,
    stage: HandshakeStage,
    local: Option<LocalIdentity>,
    remote: Option<RemoteIdentity>,
    key: Option<SessionKey>,
    touched: Instant,
}

impl Session {
    /// Initiator-side session, created when the hello goes out.
    pub(crate) fn initiator(peer: &str, own_id: Option<&str>, local: LocalIdentity) -> Self {
        Self {
            peer: identity::format_identity(peer),
            own_id: own_id.map(identity::format_identity),
            stage: HandshakeStage::HelloSent,
            local: Some(local),
            remote: None,
            key: None,
            touched: Instant::now(),
        }
    }

    /// Responder-side session, created when the offer goes out. Material
    /// is complete at this point; only the confirmation is outstanding.
    pub(crate) fn responder(
        peer: &str,
        own_id: &str,
        local: LocalIdentity,
        remote: RemoteIdentity,
        key: SessionKey,
    ) -> Self {
        Self {
            peer: identity::format_identity(peer),
            own_id: Some(identity::format_identity(own_id)),
            stage: HandshakeStage::OfferSent,
            local: Some(local),
            remote: Some(remote),
            key: Some(key),
            touched: Instant::now(),
        }
    }

    /// Canonical identity of the peer this session talks to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Identity used as `sender` on outgoing records.
    pub fn own_identity(&self) -> Option<&str> {
        self.own_id.as_deref()
    }

    pub fn stage(&self) -> HandshakeStage {
        self.stage
    }

    pub fn is_established(&self) -> bool {
        self.stage.is_established()
    }

    /// Time since the last stage transition.
    pub fn idle_for(&self) -> Duration {
        self.touched.elapsed()
    }

    pub(crate) fn local_private(&self) -> Result<&RsaPrivateKey> {
        self.local
            .as_ref()
            .map(|l| &l.private)
            .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_NO_LOCAL_KEY.into()))
    }

    pub(crate) fn remote_public(&self) -> Result<&RsaPublicKey> {
        self.remote
            .as_ref()
            .map(|r| &r.public)
            .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_NO_REMOTE_KEY.into()))
    }

    pub(crate) fn session_key(&self) -> Result<&SessionKey> {
        self.key
            .as_ref()
            .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_NO_SESSION_KEY.into()))
    }

    /// Adopt a server-assigned identity as our own sender identity.
    pub(crate) fn adopt_identity(&mut self, name: &str) {
        self.own_id = Some(identity::format_identity(name));
    }

    /// Initiator completion: store the recovered material and establish.
    pub(crate) fn complete(&mut self, remote: RemoteIdentity, key: SessionKey) {
        self.remote = Some(remote);
        self.key = Some(key);
        self.stage = HandshakeStage::Established;
        self.touched = Instant::now();
    }

    /// Responder completion: material was stored at the offer stage.
    pub(crate) fn confirm_established(&mut self) {
        self.stage = HandshakeStage::Established;
        self.touched = Instant::now();
    }

    pub(crate) fn fail(&mut self) {
        self.stage = HandshakeStage::Failed;
        self.touched = Instant::now();
    }

    /// Encrypt `plaintext` for this session's peer as a
    /// `CryptoCommunication` record.
    ///
    /// Each call mints a fresh IV and RSA-wraps it for the recipient; the
    /// handshake IV never carries application traffic.
    pub fn encode_message(&self, plaintext: &str) -> Result<Field> {
        if !self.is_established() {
            return Err(ProtocolError::NotEstablished(self.peer.clone()));
        }
        let key = self.session_key()?;
        let remote = self.remote_public()?;
        let sender = self
            .own_identity()
            .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_NO_IDENTITY.into()))?;

        let iv = aes::generate_iv();
        let ciphertext = aes::encrypt(&key.key, &iv, plaintext.as_bytes())?;
        let wrapped_iv = rsa_ops::encrypt(remote, &iv)?;
        Ok(packet::message(&wrapped_iv, &ciphertext, sender, &self.peer))
    }

    /// Decrypt a `CryptoCommunication` record addressed to us.
    ///
    /// OFB carries no integrity tag, so a tampered ciphertext decrypts to
    /// garbage rather than an error; invalid UTF-8 in the result is
    /// replaced, not rejected.
    pub fn decode_message(&self, record: &Field) -> Result<String> {
        if !self.is_established() {
            return Err(ProtocolError::NotEstablished(self.peer.clone()));
        }
        let wrapped_iv = packet::binary_value(record, packet::KEY_IV, constants::ERR_MISSING_IV)?;
        let ciphertext =
            packet::binary_value(record, packet::KEY_CONTENT, constants::ERR_MISSING_CONTENT)?;

        let iv = rsa_ops::decrypt(self.local_private()?, &wrapped_iv)?;
        let plain = aes::decrypt(&self.session_key()?.key, &iv, &ciphertext)?;
        Ok(String::from_utf8_lossy(&plain).into_owned())
    }

    #[cfg(test)]
    pub(crate) fn stub(peer: &str, stage: HandshakeStage) -> Self {
        Self {
            peer: identity::format_identity(peer),
            own_id: None,
            stage,
            local: None,
            remote: None,
            key: None,
            touched: Instant::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, age: Duration) {
        self.touched = Instant::now() - age;
    }
}

/// Identity-keyed session store shared across connection tasks.
///
/// Clones share one underlying map. All methods take the lock briefly;
/// closures passed to [`SessionRegistry::with_session`] run under it, so
/// they must stay synchronous and short.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Session>,
    total_inserts: u64,
    total_evictions: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. A new stage-1 for a known identity restarts its
    /// session state wholesale; no merging of partial handshakes.
    pub async fn put(&self, session: Session) {
        let key = session.peer().to_string();
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(key, session);
        inner.total_inserts += 1;
        trace!(session_count = inner.sessions.len(), "Session stored");
    }

    /// Insert only if the identity is absent; returns false when occupied.
    pub async fn put_if_absent(&self, session: Session) -> bool {
        let key = session.peer().to_string();
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&key) {
            return false;
        }
        inner.sessions.insert(key, session);
        inner.total_inserts += 1;
        true
    }

    /// Run `f` over the session for `peer`, if present.
    pub async fn with_session<F, T>(&self, peer: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let key = identity::format_identity(peer);
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(&key) {
            Some(session) => f(session),
            None => Err(ProtocolError::UnknownPeer(key)),
        }
    }

    pub async fn contains(&self, peer: &str) -> bool {
        let key = identity::format_identity(peer);
        self.inner.lock().await.sessions.contains_key(&key)
    }

    /// Remove and return the session for `peer`.
    pub async fn remove(&self, peer: &str) -> Option<Session> {
        let key = identity::format_identity(peer);
        let mut inner = self.inner.lock().await;
        let removed = inner.sessions.remove(&key);
        if removed.is_some() {
            inner.total_evictions += 1;
            debug!(peer = %key, "Session removed");
        }
        removed
    }

    /// Evict sessions that never reached `Established` within `deadline`.
    /// Returns the evicted identities so the caller can close their
    /// connections.
    pub async fn sweep_stalled(&self, deadline: Duration) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let stalled: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_established() && s.idle_for() > deadline)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &stalled {
            inner.sessions.remove(key);
            inner.total_evictions += 1;
        }
        if !stalled.is_empty() {
            debug!(
                evicted = stalled.len(),
                remaining = inner.sessions.len(),
                "Stalled handshakes evicted"
            );
        }
        stalled
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.sessions.is_empty()
    }

    /// Current registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().await;
        let established = inner
            .sessions
            .values()
            .filter(|s| s.is_established())
            .count();
        RegistryStats {
            total_sessions: inner.sessions.len(),
            established,
            pending: inner.sessions.len() - established,
            total_inserts: inner.total_inserts,
            total_evictions: inner.total_evictions,
        }
    }
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
    pub total_sessions: usize,
    pub established: usize,
    pub pending: usize,
    pub total_inserts: u64,
    pub total_evictions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn shared_identities() -> &'static (LocalIdentity, LocalIdentity) {
        static IDS: OnceLock<(LocalIdentity, LocalIdentity)> = OnceLock::new();
        IDS.get_or_init(|| {
            (
                LocalIdentity::generate().unwrap(),
                LocalIdentity::generate().unwrap(),
            )
        })
    }

    /// Two established sessions holding mirrored views of one another.
    fn crossed_pair() -> (Session, Session) {
        let (la, lb) = shared_identities().clone();
        let key = SessionKey::generate();

        let remote_b = RemoteIdentity {
            public: lb.public.clone(),
        };
        let remote_a = RemoteIdentity {
            public: la.public.clone(),
        };

        let mut a = Session::initiator("10.0.0.2:4000", Some("10.0.0.1:4000"), la);
        a.complete(remote_b, key.clone());

        let mut b = Session::responder("10.0.0.1:4000", "10.0.0.2:4000", lb, remote_a, key);
        b.confirm_established();

        (a, b)
    }

    #[test]
    fn encode_decode_roundtrip() {
        let (a, b) = crossed_pair();
        let record = a.encode_message("hello").unwrap();
        assert_eq!(b.decode_message(&record).unwrap(), "hello");
    }

    #[test]
    fn each_message_gets_fresh_iv() {
        let (a, _) = crossed_pair();
        let first = a.encode_message("same text").unwrap();
        let second = a.encode_message("same text").unwrap();
        assert_ne!(
            first.value(packet::KEY_IV).unwrap(),
            second.value(packet::KEY_IV).unwrap()
        );
        assert_ne!(
            first.value(packet::KEY_CONTENT).unwrap(),
            second.value(packet::KEY_CONTENT).unwrap()
        );
    }

    #[test]
    fn tampered_content_decodes_to_garbage_not_error() {
        let (a, b) = crossed_pair();
        let record = a.encode_message("original text").unwrap();

        let mut ciphertext = packet::decode_b64(record.value(packet::KEY_CONTENT).unwrap()).unwrap();
        ciphertext[0] ^= 0xFF;
        let tampered = packet::message(
            &packet::decode_b64(record.value(packet::KEY_IV).unwrap()).unwrap(),
            &ciphertext,
            "10.0.0.1:4000",
            "10.0.0.2:4000",
        );

        let decoded = b.decode_message(&tampered).unwrap();
        assert_ne!(decoded, "original text");
    }

    #[test]
    fn unestablished_session_refuses_traffic() {
        let session = Session::stub("10.0.0.9:1", HandshakeStage::HelloSent);
        assert!(matches!(
            session.encode_message("hi"),
            Err(ProtocolError::NotEstablished(_))
        ));
        let record = packet::message(&[1], &[2], "a:1", "b:2");
        assert!(matches!(
            session.decode_message(&record),
            Err(ProtocolError::NotEstablished(_))
        ));
    }

    #[tokio::test]
    async fn put_and_lookup() {
        let registry = SessionRegistry::new();
        registry
            .put(Session::stub("10.0.0.1:4000", HandshakeStage::HelloSent))
            .await;

        assert!(registry.contains("10.0.0.1:4000").await);
        let stage = registry
            .with_session("10.0.0.1:4000", |s| Ok(s.stage()))
            .await
            .unwrap();
        assert_eq!(stage, HandshakeStage::HelloSent);
    }

    #[tokio::test]
    async fn unknown_peer_surfaces_as_error() {
        let registry = SessionRegistry::new();
        let result = registry.with_session("10.9.9.9:1", |_| Ok(())).await;
        assert!(matches!(result, Err(ProtocolError::UnknownPeer(_))));
    }

    #[tokio::test]
    async fn put_replaces_existing_session() {
        let registry = SessionRegistry::new();
        registry
            .put(Session::stub("10.0.0.1:4000", HandshakeStage::Failed))
            .await;
        registry
            .put(Session::stub("10.0.0.1:4000", HandshakeStage::HelloSent))
            .await;

        assert_eq!(registry.len().await, 1);
        let stage = registry
            .with_session("10.0.0.1:4000", |s| Ok(s.stage()))
            .await
            .unwrap();
        assert_eq!(stage, HandshakeStage::HelloSent);
    }

    #[tokio::test]
    async fn put_if_absent_single_winner() {
        let registry = SessionRegistry::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .put_if_absent(Session::stub("10.0.0.1:4000", HandshakeStage::Init))
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn lookup_normalizes_identity() {
        let registry = SessionRegistry::new();
        registry
            .put(Session::stub("user-3", HandshakeStage::OfferSent))
            .await;

        // Stored under the canonical spelling, reachable by either form.
        assert!(registry.contains("user-3:000001").await);
        assert!(registry.contains("user-3").await);
    }

    #[tokio::test]
    async fn sweep_evicts_only_stalled_handshakes() {
        let registry = SessionRegistry::new();

        let mut stalled = Session::stub("10.0.0.1:1", HandshakeStage::HelloSent);
        stalled.backdate(Duration::from_secs(120));
        registry.put(stalled).await;

        let mut old_established = Session::stub("10.0.0.2:2", HandshakeStage::Established);
        old_established.backdate(Duration::from_secs(120));
        registry.put(old_established).await;

        registry
            .put(Session::stub("10.0.0.3:3", HandshakeStage::OfferSent))
            .await;

        let evicted = registry.sweep_stalled(Duration::from_secs(30)).await;
        assert_eq!(evicted, vec!["10.0.0.1:1".to_string()]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn stats_reflect_contents() {
        let registry = SessionRegistry::new();
        registry
            .put(Session::stub("10.0.0.1:1", HandshakeStage::Established))
            .await;
        registry
            .put(Session::stub("10.0.0.2:2", HandshakeStage::HelloSent))
            .await;
        registry.remove("10.0.0.2:2").await;

        let stats = registry.stats().await;
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.established, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.total_inserts, 2);
        assert_eq!(stats.total_evictions, 1);
    }
}
