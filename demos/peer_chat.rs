//! Example: Two Peers Chatting Through the Relay
//!
//! Self-contained demo: starts a relay on an ephemeral loopback port, then
//! registers two clients that negotiate a direct encrypted session and
//! exchange a few messages. The relay only ever sees opaque records.
//!
//! Run with: `cargo run --example peer_chat`

use rendezvous_protocol::config::RendezvousConfig;
use rendezvous_protocol::service::{RendezvousClient, RendezvousServer};
use rendezvous_protocol::{MessageEvent, Priority};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Relay on an ephemeral port.
    let server_config = RendezvousConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
    });
    let server = RendezvousServer::bind(server_config).await?;
    let addr = server.local_addr()?;
    let metrics = server.metrics();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(server.run_with_shutdown(shutdown_rx));
    println!("Relay started on {addr}\n");

    // Both clients register and receive their identities.
    let alice = connect_client(addr).await?;
    alice.register().await?;
    let alice_id = alice.wait_registered().await?;
    println!("Alice registered as {alice_id}");

    let bob = connect_client(addr).await?;
    bob.register().await?;
    let bob_id = bob.wait_registered().await?;
    println!("Bob registered as {bob_id}\n");

    // Print whatever arrives, and mirror it into a channel so this demo
    // can wait for delivery before shutting down.
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    for (who, client) in [("Alice", &alice), ("Bob", &bob)] {
        let seen_tx = seen_tx.clone();
        client
            .dispatcher()
            .register(Priority::Normal, move |event: &MessageEvent| {
                println!("{who} received from {}: {}", event.peer, event.plaintext);
                let _ = seen_tx.send(());
            })?;
    }

    // Alice opens the direct session; the handshake relays through the
    // server but the negotiated key never leaves the two peers.
    alice.connect_peer(&bob_id).await?;
    alice.wait_established(&bob_id).await?;
    bob.wait_established(&alice_id).await?;
    println!("Direct session established\n");

    alice.send_message(&bob_id, "Hey Bob, the relay can't read this.").await?;
    bob.send_message(&alice_id, "Hey Alice, loud and clear.").await?;

    // Wait for both deliveries.
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(10), seen.recv()).await?;
    }

    let snapshot = metrics.snapshot();
    println!("\nRelayed records: {}", snapshot.messages_relayed);
    println!("Relay decrypted messages: {}", snapshot.messages_decrypted);

    alice.close().await?;
    bob.close().await?;
    let _ = shutdown_tx.send(()).await;
    Ok(())
}

async fn connect_client(addr: std::net::SocketAddr) -> rendezvous_protocol::Result<RendezvousClient> {
    let config = RendezvousConfig::default_with_overrides(|c| {
        c.client.server_address = addr.to_string();
    });
    RendezvousClient::connect(config).await
}
