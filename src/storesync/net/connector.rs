use std::sync::Arc;

use log::{debug, error, info};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, Result, StoreError};
use crate::storesync::broadcaster::PeerSender;
use crate::storesync::config::PeerInfo;
use crate::storesync::handler::RelayHandler;
use crate::storesync::net::connection::{Direction, PeerConnection};

/// Exactly one side of each pair dials: the node with the lower id
pub fn should_dial(self_id: &str, peer_id: &str) -> bool {
    self_id < peer_id
}

/// Dials a peer and starts the handshake. The peer is registered when its SyncAck arrives.
pub async fn connect_to_peer(
    addr: &str,
    relay: Arc<RelayHandler>,
    shutdown: &CancellationToken,
) -> Result<Arc<PeerConnection>> {
    let stream = TcpStream::connect(addr).await.map_err(|e| {
        StoreError::new(ErrorCode::ConnectionFailed, format!("Connection to {} failed: {}", addr, e))
    })?;

    let connection = PeerConnection::spawn(stream, Direction::Outbound, relay.clone(), shutdown)?;
    connection.send(&relay.sync_init_frame())?;
    debug!("SyncInit sent to {}", addr);
    Ok(connection)
}

/// Dials every configured peer this node is responsible for
pub async fn connect_to_peers(peers: &[PeerInfo], relay: Arc<RelayHandler>, shutdown: &CancellationToken) {
    info!("Connecting to {} known peers", peers.len());

    for peer in peers {
        if !should_dial(&relay.node_id, &peer.id) {
            debug!("Waiting for peer {} to dial us", peer.id);
            continue;
        }
        match connect_to_peer(&peer.addr, relay.clone(), shutdown).await {
            Ok(_) => info!("Dialed peer {} at {}", peer.id, peer.addr),
            Err(e) => error!("Connection to peer {} failed: {}", peer.id, e),
        }
    }
}
