//! The rendezvous server.
//!
//! Accepts TCP clients, answers registration handshakes addressed to
//! `"server"`, and relays everything else verbatim to the named receiver.
//! The server can decrypt only its own registration sessions; client to
//! client traffic passes through as opaque records.
//!
//! Each connection runs in its own task. A connection becomes addressable
//! once its registration handshake completes; until then it may send, but
//! nothing can be routed to it. Connections that never register within
//! the handshake deadline are closed.

use crate::codec::{Field, Reader};
use crate::config::{RendezvousConfig, RESERVED_SERVER_IDENTITY};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, MessageEvent};
use crate::protocol::handshake;
use crate::protocol::identity;
use crate::protocol::packet;
use crate::protocol::session::SessionRegistry;
use crate::transport::{PeerLink, RecordCodec};
use crate::utils::metrics::Metrics;

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, trace, warn};

/// Shared state every connection task clones.
#[derive(Clone)]
struct ServerState {
    config: Arc<RendezvousConfig>,
    registry: SessionRegistry,
    links: Arc<Mutex<HashMap<String, PeerLink>>>,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
    next_guest: Arc<AtomicU64>,
}

impl ServerState {
    fn new(config: RendezvousConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: SessionRegistry::new(),
            links: Arc::new(Mutex::new(HashMap::new())),
            dispatcher: Dispatcher::new(),
            metrics: Arc::new(Metrics::new()),
            next_guest: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_guest_name(&self) -> String {
        let n = self.next_guest.fetch_add(1, Ordering::Relaxed) + 1;
        format!("user-{n}")
    }

    async fn bind_link(&self, id: String, link: PeerLink) {
        self.links.lock().await.insert(id, link);
    }

    async fn unbind_link(&self, id: &str) {
        self.links.lock().await.remove(id);
    }

    /// Forward a raw record to the receiver's connection, unmodified.
    async fn relay(&self, receiver: &str, raw: &str) {
        let target = {
            let links = self.links.lock().await;
            links.get(receiver).cloned()
        };
        match target {
            Some(link) => {
                if link.send(raw.to_string()).await.is_ok() {
                    self.metrics.message_relayed();
                    trace!(receiver, bytes = raw.len(), "Record relayed");
                } else {
                    self.metrics.unknown_peer_dropped();
                    self.unbind_link(receiver).await;
                    warn!(receiver, "Relay target is gone, record dropped");
                }
            }
            None => {
                self.metrics.unknown_peer_dropped();
                debug!(receiver, "No connection for receiver, record dropped");
            }
        }
    }
}

/// Listener plus the state its connections share.
pub struct RendezvousServer {
    listener: TcpListener,
    state: ServerState,
}

impl RendezvousServer {
    /// Validate the configuration and bind the listening socket.
    #[instrument(skip(config))]
    pub async fn bind(config: RendezvousConfig) -> Result<Self> {
        config.validate_strict()?;
        let listener = TcpListener::bind(&config.server.address).await?;
        info!(address = %listener.local_addr()?, "Rendezvous server listening");
        Ok(Self {
            listener,
            state: ServerState::new(config),
        })
    }

    /// The bound address. Useful when the configured port was `0`.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handlers registered here receive payloads addressed to `"server"`.
    pub fn dispatcher(&self) -> Dispatcher {
        self.state.dispatcher.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.state.metrics)
    }

    pub fn registry(&self) -> SessionRegistry {
        self.state.registry.clone()
    }

    /// Run until CTRL+C.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });
        self.run_with_shutdown(shutdown_rx).await
    }

    /// Run until the shutdown channel fires, then drain connections.
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let Self { listener, state } = self;
        let mut sweep = tokio::time::interval(state.config.server.sweep_interval);
        sweep.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for connections to close...");
                    drop(listener);

                    let timeout = tokio::time::sleep(state.config.server.shutdown_timeout);
                    tokio::pin!(timeout);
                    loop {
                        tokio::select! {
                            _ = &mut timeout => {
                                warn!("Shutdown timeout reached, forcing exit");
                                break;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(500)) => {
                                let active = state.metrics.connections_active.load(Ordering::Relaxed);
                                info!(connections = active, "Waiting for connections to close");
                                if active == 0 {
                                    info!("All connections closed, shutting down");
                                    break;
                                }
                            }
                        }
                    }
                    state.metrics.log_metrics();
                    return Ok(());
                }

                _ = sweep.tick() => {
                    let deadline = state.config.server.handshake_timeout;
                    for id in state.registry.sweep_stalled(deadline).await {
                        state.unbind_link(&id).await;
                    }
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let active = state.metrics.connections_active.load(Ordering::Relaxed);
                            if active as usize >= state.config.server.max_connections {
                                warn!(peer = %addr, active, "Connection limit reached, rejecting");
                                continue;
                            }
                            state.metrics.connection_opened();
                            let state = state.clone();
                            tokio::spawn(async move {
                                serve_connection(state, stream, addr).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }
    }
}

#[instrument(skip(state, stream), fields(client = %addr))]
async fn serve_connection(state: ServerState, stream: TcpStream, addr: SocketAddr) {
    let mut framed = Framed::new(stream, RecordCodec::from_config(&state.config.transport));
    let (link, mut outbound) = PeerLink::channel(addr, state.config.transport.send_queue_depth);

    // Identity this connection answers to, bound at stage 3.
    let mut bound: Option<String> = None;
    // Identity of a registration still waiting for its stage 3.
    let mut pending: Option<String> = None;

    let deadline = tokio::time::sleep(state.config.server.handshake_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline, if bound.is_none() => {
                warn!("No completed registration within the deadline, closing");
                break;
            }

            queued = outbound.recv() => {
                let Some(record) = queued else { break };
                let bytes = record.len();
                if let Err(e) = framed.send(record).await {
                    warn!(error = %e, "Write failed, closing");
                    break;
                }
                state.metrics.record_sent(bytes);
            }

            inbound = framed.next() => {
                match inbound {
                    Some(Ok(raw)) => {
                        state.metrics.record_received(raw.len());
                        match handle_record(&state, &raw, addr, &link, &mut bound, &mut pending).await {
                            Ok(Some(reply)) => {
                                let bytes = reply.len();
                                if let Err(e) = framed.send(reply).await {
                                    warn!(error = %e, "Write failed, closing");
                                    break;
                                }
                                state.metrics.record_sent(bytes);
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(error = %e, "Protocol failure, closing connection");
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Read failed, closing");
                        break;
                    }
                    None => {
                        debug!("Client disconnected");
                        break;
                    }
                }
            }
        }
    }

    if let Some(id) = bound {
        state.unbind_link(&id).await;
        state.registry.remove(&id).await;
        info!(peer = %id, "Peer unregistered");
    }
    if let Some(id) = pending {
        state.registry.remove(&id).await;
    }
    state.metrics.connection_closed();
}

/// Route one inbound record. `Ok(Some(_))` is a reply for this
/// connection; `Err` closes it.
async fn handle_record(
    state: &ServerState,
    raw: &str,
    addr: SocketAddr,
    link: &PeerLink,
    bound: &mut Option<String>,
    pending: &mut Option<String>,
) -> Result<Option<String>> {
    let doc = Reader::parse(raw);
    let (record, is_handshake) = if let Some(f) = doc.field(packet::FIELD_HANDSHAKE) {
        (f, true)
    } else if let Some(f) = doc.field(packet::FIELD_MESSAGE) {
        (f, false)
    } else {
        state.metrics.record_ignored();
        trace!(peer = %addr, "Record carries no known field");
        return Ok(None);
    };

    let receiver = match record.value(packet::KEY_RECEIVER) {
        Some(r) => identity::format_identity(r),
        None => {
            state.metrics.record_ignored();
            debug!(peer = %addr, "Record has no receiver, dropped");
            return Ok(None);
        }
    };

    if !identity::is_server(&receiver) {
        state.relay(&receiver, raw).await;
        return Ok(None);
    }

    if is_handshake {
        handle_registration(state, record, addr, link, bound, pending).await
    } else {
        decrypt_for_server(state, record).await.map(|()| None)
    }
}

/// Server side of the registration handshake.
async fn handle_registration(
    state: &ServerState,
    record: &Field,
    addr: SocketAddr,
    link: &PeerLink,
    bound: &mut Option<String>,
    pending: &mut Option<String>,
) -> Result<Option<String>> {
    match packet::stage(record)? {
        1 => {
            state.metrics.handshake_started();
            // A hello without a sender is a fresh registration and earns
            // an assigned name; a named sender is renegotiating.
            let (peer_name, assigned) = match packet::sender(record) {
                Some(sender) => (identity::format_identity(sender), None),
                None => {
                    let name = state.next_guest_name();
                    (identity::format_identity(&name), Some(name))
                }
            };
            let (session, offer) = handshake::respond(
                &peer_name,
                RESERVED_SERVER_IDENTITY,
                record,
                assigned.as_deref(),
            )?;
            state.registry.put(session).await;
            *pending = Some(peer_name.clone());
            info!(peer = %peer_name, client = %addr, "Registration started");
            Ok(Some(offer.encode()))
        }
        3 => {
            let sender = packet::sender(record).ok_or_else(|| {
                ProtocolError::MalformedPacket(constants::ERR_MISSING_SENDER.to_string())
            })?;
            let key = identity::format_identity(sender);
            let outcome = state
                .registry
                .with_session(&key, |session| handshake::finalize(session, record))
                .await;
            match outcome {
                Ok(()) => {
                    state.metrics.handshake_completed();
                    if let Some(old) = bound.replace(key.clone()) {
                        if old != key {
                            state.unbind_link(&old).await;
                        }
                    }
                    *pending = None;
                    state.bind_link(key.clone(), link.clone()).await;
                    info!(peer = %key, client = %addr, "Peer registered");
                    Ok(None)
                }
                Err(e) => {
                    state.metrics.handshake_failed();
                    Err(e)
                }
            }
        }
        // The server never initiates, so stage 2 can only be misuse.
        _ => Err(ProtocolError::HandshakeError(
            constants::ERR_STAGE_ORDER.to_string(),
        )),
    }
}

/// Decrypt and dispatch a payload addressed to `"server"`.
async fn decrypt_for_server(state: &ServerState, record: &Field) -> Result<()> {
    let sender = packet::sender(record).ok_or_else(|| {
        ProtocolError::MalformedPacket(constants::ERR_MISSING_SENDER.to_string())
    })?;
    let plaintext = state
        .registry
        .with_session(sender, |session| session.decode_message(record))
        .await?;
    state.metrics.message_decrypted();

    let event = MessageEvent {
        peer: identity::format_identity(sender),
        plaintext,
    };
    let handlers = state.dispatcher.dispatch(&event)?;
    debug!(peer = %event.peer, handlers, "Message for server dispatched");
    Ok(())
}
