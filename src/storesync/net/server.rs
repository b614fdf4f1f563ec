use std::sync::Arc;

use log::{info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::storesync::handler::RelayHandler;
use crate::storesync::net::connection::{Direction, PeerConnection};

/// Accepts peer connections until `shutdown` fires
pub async fn run_relay_server(
    listener: TcpListener,
    relay: Arc<RelayHandler>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!("Relay server for node {} running on {}", relay.node_id, listener.local_addr()?);

    loop {
        let (stream, addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        info!("New connection from {}", addr);

        // The peer registers itself once its SyncInit arrives
        if let Err(e) = PeerConnection::spawn(stream, Direction::Inbound, relay.clone(), &shutdown) {
            warn!("Failed to set up connection from {}: {}", addr, e);
        }
    }

    info!("Relay server stopped");
    Ok(())
}
