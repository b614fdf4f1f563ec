use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::storesync::config::PeerInfo;
use crate::storesync::handler::RelayHandler;
use crate::storesync::net::connector::{connect_to_peer, should_dial};

/// Upper bound of the random delay added to every check
const MAX_JITTER_MS: u64 = 1_000;

/// Starts a background task that periodically redials configured peers
/// this node is responsible for and that are not connected.
pub fn start_reconnection_task(
    peers: Vec<PeerInfo>,
    relay: Arc<RelayHandler>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    info!("Starting peer reconnection task (every {:?})", interval);

    tokio::spawn(async move {
        loop {
            let jitter = Duration::from_millis(rand::rng().random_range(0..MAX_JITTER_MS));
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(interval + jitter) => {},
            }
            check_and_reconnect_peers(&peers, &relay, &shutdown).await;
        }
        info!("Peer reconnection task stopped");
    })
}

/// Peers that should be dialed but have no registered connection
pub fn missing_peers<'a>(peers: &'a [PeerInfo], relay: &RelayHandler) -> Vec<&'a PeerInfo> {
    peers
        .iter()
        .filter(|peer| should_dial(&relay.node_id, &peer.id))
        .filter(|peer| !relay.peers.contains(&peer.id))
        .collect()
}

async fn check_and_reconnect_peers(peers: &[PeerInfo], relay: &Arc<RelayHandler>, shutdown: &CancellationToken) {
    debug!("Checking for disconnected peers");

    for peer in missing_peers(peers, relay) {
        info!("Attempting to reconnect to peer {} at {}", peer.id, peer.addr);
        match connect_to_peer(&peer.addr, relay.clone(), shutdown).await {
            Ok(_) => info!("Redialed peer {} at {}", peer.id, peer.addr),
            Err(e) => error!("Reconnection to peer {} failed: {}", peer.id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storesync::broadcaster::tests::RecordingSender;
    use crate::storesync::broadcaster::PeerRegistry;

    fn peer(id: &str) -> PeerInfo {
        PeerInfo { id: id.into(), addr: format!("127.0.0.1:0#{}", id) }
    }

    #[test]
    fn only_unconnected_higher_peers_are_missing() {
        let relay = RelayHandler::new("node-b", "demo", Arc::new(PeerRegistry::new()));
        let peers = vec![peer("node-a"), peer("node-c"), peer("node-d")];
        relay.peers.register("node-d".into(), RecordingSender::new());

        let missing: Vec<&str> = missing_peers(&peers, &relay).iter().map(|p| p.id.as_str()).collect();
        assert_eq!(missing, vec!["node-c"]);
    }
}
