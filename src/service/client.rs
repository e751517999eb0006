//! The rendezvous client.
//!
//! Holds one TCP connection to the server and multiplexes every session
//! over it: the registration session with `"server"` plus any number of
//! direct peer sessions, each end-to-end encrypted so the relay sees only
//! opaque records.
//!
//! A reader task drives all inbound processing; a writer task drains the
//! outbound queue. Handshake progress is asynchronous, so callers that
//! need an established session use [`RendezvousClient::wait_registered`]
//! or [`RendezvousClient::wait_established`] before sending.

use crate::codec::{Field, Reader};
use crate::config::{RendezvousConfig, RESERVED_SERVER_IDENTITY};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, MessageEvent};
use crate::protocol::handshake;
use crate::protocol::identity;
use crate::protocol::packet;
use crate::protocol::session::{HandshakeStage, SessionRegistry};
use crate::transport::{self, PeerLink, RecordCodec};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{with_timeout, SHUTDOWN_TIMEOUT};

use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, trace, warn};

/// State shared between the client handle and its reader task.
#[derive(Clone)]
struct ClientState {
    registry: SessionRegistry,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    identity: Arc<Mutex<Option<String>>>,
    link: PeerLink,
}

/// Handle to one client connection.
pub struct RendezvousClient {
    config: Arc<RendezvousConfig>,
    registry: SessionRegistry,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    identity: Arc<Mutex<Option<String>>>,
    link: PeerLink,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RendezvousClient {
    /// Dial the configured server and start the reader and writer tasks.
    #[instrument(skip(config))]
    pub async fn connect(config: RendezvousConfig) -> Result<Self> {
        config.validate_strict()?;
        let framed = with_timeout(
            config.client.connect_timeout,
            transport::connect(&config.client.server_address, &config.transport),
        )
        .await?;
        let addr = framed.get_ref().peer_addr()?;

        let metrics = Arc::new(Metrics::new());
        metrics.connection_opened();

        let (link, mut outbound) = PeerLink::channel(addr, config.transport.send_queue_depth);
        let (mut sink, stream) = framed.split();

        let writer_metrics = Arc::clone(&metrics);
        let writer = tokio::spawn(async move {
            while let Some(record) = outbound.recv().await {
                let bytes = record.len();
                if let Err(e) = sink.send(record).await {
                    warn!(error = %e, "Write to server failed");
                    break;
                }
                writer_metrics.record_sent(bytes);
            }
            let _ = sink.close().await;
        });

        let registry = SessionRegistry::new();
        let dispatcher = Dispatcher::new();
        let identity = Arc::new(Mutex::new(None));
        let state = ClientState {
            registry: registry.clone(),
            dispatcher: dispatcher.clone(),
            metrics: Arc::clone(&metrics),
            identity: Arc::clone(&identity),
            link: link.clone(),
        };
        let reader = tokio::spawn(read_loop(state, stream));

        info!(server = %addr, "Connected to rendezvous server");
        Ok(Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            metrics,
            identity,
            link,
            reader,
            writer,
        })
    }

    /// Handlers registered here receive decrypted peer payloads.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// The server-assigned identity, once registration completes.
    pub fn identity(&self) -> Option<String> {
        self.identity.lock().ok().and_then(|g| g.as_ref().cloned())
    }

    /// Begin registration: a stage-1 hello to `"server"` with no sender.
    pub async fn register(&self) -> Result<()> {
        let (session, hello) = handshake::initiate(RESERVED_SERVER_IDENTITY, None)?;
        self.metrics.handshake_started();
        self.registry.put(session).await;
        self.link.send(hello.encode()).await
    }

    /// Begin a direct session toward a registered peer.
    pub async fn connect_peer(&self, peer: &str) -> Result<()> {
        let own = self.identity().ok_or_else(|| {
            ProtocolError::HandshakeError(constants::ERR_NO_IDENTITY.to_string())
        })?;
        let (session, hello) = handshake::initiate(peer, Some(&own))?;
        self.metrics.handshake_started();
        self.registry.put(session).await;
        self.link.send(hello.encode()).await
    }

    /// Encrypt and queue one payload for an established peer session.
    pub async fn send_message(&self, peer: &str, text: &str) -> Result<()> {
        let record = self
            .registry
            .with_session(peer, |session| {
                session.encode_message(text).map(|field| field.encode())
            })
            .await?;
        self.metrics.message_encrypted();
        self.link.send(record).await
    }

    /// Block until registration assigned an identity.
    pub async fn wait_registered(&self) -> Result<String> {
        with_timeout(self.config.client.handshake_timeout, async {
            loop {
                if let Some(id) = self.identity() {
                    return Ok(id);
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
    }

    /// Block until the session with `peer` is established or failed.
    pub async fn wait_established(&self, peer: &str) -> Result<()> {
        with_timeout(self.config.client.handshake_timeout, async {
            loop {
                match self
                    .registry
                    .with_session(peer, |session| Ok(session.stage()))
                    .await
                {
                    Ok(HandshakeStage::Established) => return Ok(()),
                    Ok(HandshakeStage::Failed) => {
                        return Err(ProtocolError::HandshakeError(
                            constants::ERR_SESSION_FAILED.to_string(),
                        ))
                    }
                    Ok(_) | Err(ProtocolError::UnknownPeer(_)) => {}
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
    }

    /// Stop both tasks, flushing anything already queued.
    pub async fn close(self) -> Result<()> {
        self.reader.abort();
        drop(self.link);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.writer)
            .await
            .is_err()
        {
            debug!("Writer task did not finish before the shutdown deadline");
        }
        Ok(())
    }
}

async fn read_loop(state: ClientState, mut stream: SplitStream<Framed<TcpStream, RecordCodec>>) {
    while let Some(next) = stream.next().await {
        match next {
            Ok(raw) => {
                state.metrics.record_received(raw.len());
                if let Err(e) = handle_inbound(&state, &raw).await {
                    warn!(error = %e, "Inbound record failed");
                }
            }
            Err(e) => {
                warn!(error = %e, "Read from server failed");
                break;
            }
        }
    }
    state.metrics.connection_closed();
    debug!("Server connection closed");
}

async fn handle_inbound(state: &ClientState, raw: &str) -> Result<()> {
    let doc = Reader::parse(raw);
    if let Some(record) = doc.field(packet::FIELD_HANDSHAKE) {
        handle_handshake(state, record).await
    } else if let Some(record) = doc.field(packet::FIELD_MESSAGE) {
        handle_message(state, record).await
    } else {
        state.metrics.record_ignored();
        trace!("Record carries no known field");
        Ok(())
    }
}

/// Drive the client side of a handshake one inbound record forward.
async fn handle_handshake(state: &ClientState, record: &Field) -> Result<()> {
    let sender = packet::sender(record).ok_or_else(|| {
        ProtocolError::MalformedPacket(constants::ERR_MISSING_SENDER.to_string())
    })?;
    let peer = identity::format_identity(sender);

    match packet::stage(record)? {
        1 => {
            // A peer wants a direct session; answering needs our name.
            let own = own_identity(state)?.ok_or_else(|| {
                ProtocolError::HandshakeError(constants::ERR_NO_IDENTITY.to_string())
            })?;
            state.metrics.handshake_started();
            let (session, offer) = handshake::respond(&peer, &own, record, None)?;
            state.registry.put(session).await;
            state.link.send(offer.encode()).await?;
            debug!(peer = %peer, "Direct session offer sent");
            Ok(())
        }
        2 => {
            let outcome = state
                .registry
                .with_session(&peer, |session| {
                    let confirmation = handshake::confirm(session, record)?;
                    Ok((confirmation.encode(), session.own_identity().map(String::from)))
                })
                .await;
            match outcome {
                Ok((confirmation, own)) => {
                    state.link.send(confirmation).await?;
                    state.metrics.handshake_completed();
                    if identity::is_server(&peer) {
                        if let Some(own) = own {
                            set_own_identity(state, own.clone())?;
                            info!(identity = %own, "Registered with server");
                        }
                    } else {
                        info!(peer = %peer, "Direct session established");
                    }
                    Ok(())
                }
                Err(e) => {
                    state.metrics.handshake_failed();
                    Err(e)
                }
            }
        }
        3 => {
            let outcome = state
                .registry
                .with_session(&peer, |session| handshake::finalize(session, record))
                .await;
            match outcome {
                Ok(()) => {
                    state.metrics.handshake_completed();
                    info!(peer = %peer, "Direct session established");
                    Ok(())
                }
                Err(e) => {
                    // The session is failed; the peer stays locked out
                    // until a new stage 1, but the server link stays up.
                    state.metrics.handshake_failed();
                    warn!(peer = %peer, error = %e, "Peer session failed");
                    Err(e)
                }
            }
        }
        _ => Err(ProtocolError::HandshakeError(
            constants::ERR_UNKNOWN_STAGE.to_string(),
        )),
    }
}

async fn handle_message(state: &ClientState, record: &Field) -> Result<()> {
    let sender = packet::sender(record).ok_or_else(|| {
        ProtocolError::MalformedPacket(constants::ERR_MISSING_SENDER.to_string())
    })?;
    let peer = identity::format_identity(sender);
    let plaintext = state
        .registry
        .with_session(&peer, |session| session.decode_message(record))
        .await?;
    state.metrics.message_decrypted();

    let event = MessageEvent { peer, plaintext };
    let handlers = state.dispatcher.dispatch(&event)?;
    trace!(peer = %event.peer, handlers, "Message dispatched");
    Ok(())
}

fn own_identity(state: &ClientState) -> Result<Option<String>> {
    let guard = state
        .identity
        .lock()
        .map_err(|_| ProtocolError::Custom(constants::ERR_IDENTITY_LOCK.to_string()))?;
    Ok(guard.clone())
}

fn set_own_identity(state: &ClientState, id: String) -> Result<()> {
    let mut guard = state
        .identity
        .lock()
        .map_err(|_| ProtocolError::Custom(constants::ERR_IDENTITY_LOCK.to_string()))?;
    *guard = Some(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::FIELD_HANDSHAKE;
    use tokio::sync::mpsc;

    fn test_state() -> (ClientState, mpsc::Receiver<String>) {
        let (link, rx) = PeerLink::channel("127.0.0.1:1887".parse().unwrap(), 8);
        let state = ClientState {
            registry: SessionRegistry::new(),
            dispatcher: Dispatcher::new(),
            metrics: Arc::new(Metrics::new()),
            identity: Arc::new(Mutex::new(None)),
            link,
        };
        (state, rx)
    }

    #[tokio::test]
    async fn junk_records_are_ignored() {
        let (state, _rx) = test_state();
        handle_inbound(&state, "# just a comment").await.unwrap();
        assert_eq!(state.metrics.snapshot().ignored_records, 1);
    }

    #[tokio::test]
    async fn inbound_hello_needs_an_own_identity() {
        let (state, _rx) = test_state();
        let raw = Field::inline(FIELD_HANDSHAKE)
            .put(packet::KEY_RSA, "AQI=")
            .put(packet::KEY_STAGE, "1")
            .put(packet::KEY_SENDER, "bob:000001")
            .put(packet::KEY_RECEIVER, "alice:000001")
            .encode();

        let err = handle_inbound(&state, &raw).await.unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeError(_)));
    }

    #[tokio::test]
    async fn message_from_unknown_peer_is_an_error() {
        let (state, _rx) = test_state();
        let raw = packet::message(&[1, 2], &[3, 4], "ghost:000001", "alice:000001").encode();

        let err = handle_inbound(&state, &raw).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn server_offer_adopts_identity_and_confirms() {
        let (state, mut rx) = test_state();

        let (session, hello) = handshake::initiate(RESERVED_SERVER_IDENTITY, None).unwrap();
        state.registry.put(session).await;

        let hello_doc = Reader::parse(&hello.encode());
        let hello = hello_doc.field(FIELD_HANDSHAKE).unwrap();
        let (_server_session, offer) =
            handshake::respond("user-5", RESERVED_SERVER_IDENTITY, hello, Some("user-5")).unwrap();

        handle_inbound(&state, &offer.encode()).await.unwrap();

        assert_eq!(own_identity(&state).unwrap().as_deref(), Some("user-5:000001"));
        let confirmation = rx.recv().await.unwrap();
        let doc = Reader::parse(&confirmation);
        let confirmation = doc.field(FIELD_HANDSHAKE).unwrap();
        assert_eq!(packet::stage(confirmation).unwrap(), 3);
        assert_eq!(packet::sender(confirmation), Some("user-5:000001"));

        let established = state
            .registry
            .with_session(RESERVED_SERVER_IDENTITY, |s| Ok(s.is_established()))
            .await
            .unwrap();
        assert!(established);
    }
}
