//! Runs a server and two clients in one process and shows messages flowing
//! both ways.
//!
//! ```text
//! RUST_LOG=debug cargo run -p loopback -- 127.0.0.1 8888
//! ```

use std::sync::Arc;
use std::time::Duration;

use hostlink::prelude::*;
use tracing_subscriber::EnvFilter;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Echo server
// ---------------------------------------------------------------------------

/// Rebroadcasts every message a client sends.
fn spawn_echo(server: Arc<BridgeServer>) -> tokio::task::JoinHandle<()> {
    let mut inbox = server.subscribe_data();
    tokio::spawn(async move {
        while let Ok(event) = inbox.recv().await {
            let from = event.peer.map(|id| id.to_string()).unwrap_or_default();
            tracing::info!(%from, kind = event.message.type_name(), "echoing");
            if !server.send(&event.message).await {
                tracing::warn!("echo did not reach every client");
            }
        }
    })
}

async fn join(init: &InitData, name: &str) -> Result<BridgeClient, HostlinkError> {
    let client = BridgeClient::new(init.clone());
    if !client.connect(None).await {
        return Err(HostlinkError::NotConnected);
    }
    let id = client
        .wait_for_client_id(HANDSHAKE_TIMEOUT)
        .await
        .ok_or(HostlinkError::NotConnected)?;
    tracing::info!(%name, %id, "client joined");
    Ok(client)
}

async fn run(init: InitData) -> Result<(), HostlinkError> {
    let server = Arc::new(BridgeServer::new(init.clone()));
    if !server.connect(None).await {
        return Err(HostlinkError::NotConnected);
    }
    let echo = spawn_echo(Arc::clone(&server));

    let alice = join(&init, "alice").await?;
    let bob = join(&init, "bob").await?;
    let mut bob_inbox = bob.subscribe_data();

    alice.send(&Message::payload(b"hello from alice".to_vec())).await;
    let entry = LogEntry::now(LogLevel::Info, "alice says hi")?;
    alice.send(&Message::log(entry)).await;

    for _ in 0..2 {
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, bob_inbox.recv()).await {
            Ok(Ok(DataReceived { message: Message::Log { entry }, .. })) => {
                println!("bob got log {}", entry.to_output_pane_string());
            }
            Ok(Ok(DataReceived { message: Message::Payload { data }, .. })) => {
                println!("bob got payload {:?}", String::from_utf8_lossy(&data));
            }
            Ok(Ok(other)) => println!("bob got {}", other.message.type_name()),
            Ok(Err(e)) => tracing::warn!(error = %e, "inbox closed"),
            Err(_) => tracing::warn!("timed out waiting for the echo"),
        }
    }

    alice.disconnect().await;
    bob.disconnect().await;
    server.disconnect().await;
    echo.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => InitData::default().port(),
    };

    run(InitData::new(address, port)?).await?;
    Ok(())
}
