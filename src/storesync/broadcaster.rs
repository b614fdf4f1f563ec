use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use uuid::Uuid;
use crate::error::Result;
use crate::tlv::message::TLVMessage;

/// Outbound side of a connection to a peer process
pub trait PeerSender: Send + Sync {
    /// Identifies the underlying connection, not the peer
    fn connection_id(&self) -> Uuid;

    fn send(&self, msg: &TLVMessage) -> Result<()>;
}

/// Registry of peers that completed the handshake, keyed by node id
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, Arc<dyn PeerSender>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn PeerSender>>> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a peer, replacing an older connection for the same id
    pub fn register(&self, id: String, sender: Arc<dyn PeerSender>) {
        info!("Registering peer with ID: {}", id);
        if let Some(previous) = self.lock().insert(id.clone(), sender) {
            debug!("Peer {} replaced connection {}", id, previous.connection_id());
        }
    }

    /// Unregisters `id` only while it is still served by `connection_id`
    pub fn unregister_connection(&self, id: &str, connection_id: Uuid) -> bool {
        let mut peers = self.lock();
        let matches = peers
            .get(id)
            .map_or(false, |sender| sender.connection_id() == connection_id);
        if matches {
            peers.remove(id);
            info!("Unregistered peer {} (connection {})", id, connection_id);
        }
        matches
    }

    /// Sends the message to every peer except `exclude_peer_id`; returns how many accepted it
    pub fn broadcast_to_peers(&self, msg: &TLVMessage, exclude_peer_id: Option<&str>) -> usize {
        let peers = self.lock();
        let peer_count = peers.len();
        debug!("Broadcasting {:?} to {} peers (excluding: {:?})", msg.event_type, peer_count, exclude_peer_id);

        let mut sent_count = 0;
        for (id, sender) in peers.iter() {
            if Some(id.as_str()) == exclude_peer_id {
                continue;
            }
            match sender.send(msg) {
                Ok(()) => sent_count += 1,
                Err(e) => warn!("Failed to send to peer {}: {}", id, e),
            }
        }

        debug!("Broadcast completed. Sent to {}/{} peers", sent_count, peer_count);
        sent_count
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.lock().contains_key(peer_id)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tlv::types::EventType;

    /// Records every frame handed to it
    pub(crate) struct RecordingSender {
        pub id: Uuid,
        pub sent: Mutex<Vec<TLVMessage>>,
    }

    impl RecordingSender {
        pub fn new() -> Arc<Self> {
            Arc::new(Self { id: Uuid::new_v4(), sent: Mutex::new(Vec::new()) })
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl PeerSender for RecordingSender {
        fn connection_id(&self) -> Uuid {
            self.id
        }

        fn send(&self, msg: &TLVMessage) -> Result<()> {
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }
    }

    #[test]
    fn broadcast_skips_excluded_peer() {
        let registry = PeerRegistry::new();
        let a = RecordingSender::new();
        let b = RecordingSender::new();
        registry.register("a".into(), a.clone());
        registry.register("b".into(), b.clone());

        let sent = registry.broadcast_to_peers(&TLVMessage::new(EventType::Clear), Some("a"));
        assert_eq!(sent, 1);
        assert_eq!(a.count(), 0);
        assert_eq!(b.count(), 1);
    }

    #[test]
    fn stale_connection_does_not_unregister_replacement() {
        let registry = PeerRegistry::new();
        let old = RecordingSender::new();
        let new = RecordingSender::new();
        registry.register("a".into(), old.clone());
        registry.register("a".into(), new.clone());

        assert!(!registry.unregister_connection("a", old.id));
        assert!(registry.contains("a"));
        assert!(registry.unregister_connection("a", new.id));
        assert!(registry.is_empty());
    }
}
