//! Example: Running a Relay Server
//!
//! Binds the rendezvous relay and serves until CTRL+C. Clients register to
//! receive an identity, then find each other by identity and exchange
//! end-to-end encrypted messages the relay cannot read.
//!
//! Configuration comes from `RENDEZVOUS_*` environment variables, falling
//! back to defaults (127.0.0.1:1887).
//!
//! Run with: `cargo run --example relay_server`

use rendezvous_protocol::config::RendezvousConfig;
use rendezvous_protocol::service::RendezvousServer;
use rendezvous_protocol::utils::logging::init_logging;
use rendezvous_protocol::{MessageEvent, Priority};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = RendezvousConfig::from_env()?;
    init_logging(&config.logging)?;

    let server = RendezvousServer::bind(config).await?;
    println!("Relay listening on {}", server.local_addr()?);
    println!("Press CTRL+C to stop.");

    // Decrypted payloads addressed to "server" itself land here.
    server
        .dispatcher()
        .register(Priority::Normal, |event: &MessageEvent| {
            println!("[{}] -> server: {}", event.peer, event.plaintext);
        })?;

    server.run().await?;
    Ok(())
}
