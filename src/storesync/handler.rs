use std::sync::{Arc, RwLock};

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use crate::error::{ErrorCode, Result, StoreError};
use crate::storesync::broadcaster::PeerRegistry;
use crate::storesync::medium::{BackingMedium, ChangeFeed};
use crate::storesync::types::ChangeEvent;
use crate::tlv::message::{TLVMessage, MAX_MESSAGE_SIZE};
use crate::tlv::types::{EventType, FieldType};

/// Moves change events between this process and its peers
pub struct RelayHandler {
    pub node_id: String,
    pub namespace: String,
    pub peers: Arc<PeerRegistry>,
    /// This node's own medium; peer changes are written here before delivery
    local: RwLock<Option<Arc<dyn BackingMedium>>>,
    inbound: ChangeFeed,
}

impl RelayHandler {
    pub fn new(node_id: impl Into<String>, namespace: impl Into<String>, peers: Arc<PeerRegistry>) -> Self {
        Self {
            node_id: node_id.into(),
            namespace: namespace.into(),
            peers,
            local: RwLock::new(None),
            inbound: ChangeFeed::new(),
        }
    }

    /// Sets the medium that peer changes are applied to
    pub fn attach_medium(&self, medium: Arc<dyn BackingMedium>) {
        *self.local.write().unwrap_or_else(|e| e.into_inner()) = Some(medium);
    }

    /// Announces a change made by this process to every connected peer.
    /// A change too large for one frame stays local.
    pub fn publish_local(&self, event: &ChangeEvent) -> usize {
        let frame = change_to_frame(event, &self.node_id);
        if !frame.fits_on_wire() {
            warn!(
                "Change for {:?} needs a {} byte frame, over the {} byte limit; not relayed",
                event.key,
                frame.encoded_len(),
                MAX_MESSAGE_SIZE
            );
            return 0;
        }

        let sent = self.peers.broadcast_to_peers(&frame, None);
        debug!("Relayed local change for {:?} to {} peers", event.key, sent);
        sent
    }

    /// Reports a change found in the local medium outside the relay (for
    /// example an edit by a process that is not a peer) to local watchers and peers
    pub fn announce_external(&self, event: &ChangeEvent) {
        self.inbound.publish(event);
        self.publish_local(event);
    }

    /// Called for every change frame received from a registered peer.
    /// The change is applied to the local medium, then delivered to watchers;
    /// it is never forwarded again.
    pub fn handle_change(&self, msg: &TLVMessage, source_peer: &str) {
        let event = match frame_to_change(msg) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping malformed change frame from peer {}: {}", source_peer, e);
                return;
            }
        };

        info!("Received change for {:?} from peer {}", event.key, source_peer);
        if let Err(e) = self.apply(&event) {
            warn!("Failed to apply change for {:?} from peer {}: {}", event.key, source_peer, e);
            return;
        }
        self.inbound.publish(&event);
    }

    fn apply(&self, event: &ChangeEvent) -> Result<()> {
        let local = self.local.read().unwrap_or_else(|e| e.into_inner()).clone();
        let Some(medium) = local else {
            return Ok(());
        };

        match (&event.key, &event.new_value) {
            (None, _) => medium.delete_all(),
            (Some(key), Some(raw)) => medium.write(key, raw),
            (Some(key), None) => medium.delete(key),
        }
    }

    /// Opens a receiver for changes coming from peers
    pub fn watch(&self) -> UnboundedReceiver<ChangeEvent> {
        self.inbound.subscribe()
    }

    pub fn sync_init_frame(&self) -> TLVMessage {
        self.handshake_frame(EventType::SyncInit)
    }

    pub fn sync_ack_frame(&self) -> TLVMessage {
        self.handshake_frame(EventType::SyncAck)
    }

    fn handshake_frame(&self, event_type: EventType) -> TLVMessage {
        TLVMessage::new(event_type)
            .with_field(FieldType::Origin, self.node_id.clone())
            .with_field(FieldType::Namespace, self.namespace.clone())
    }

    /// Validates a SyncInit/SyncAck frame and returns the peer's node id
    pub fn accept_handshake(&self, msg: &TLVMessage) -> Result<String> {
        let origin = msg
            .get_str(FieldType::Origin)?
            .ok_or_else(|| StoreError::new(ErrorCode::MalformedTlv, "Handshake without origin"))?;
        let namespace = msg.get_str(FieldType::Namespace)?.unwrap_or_default();

        if namespace != self.namespace {
            return Err(StoreError::new(
                ErrorCode::NamespaceMismatch,
                format!("Peer {} uses namespace '{}', expected '{}'", origin, namespace, self.namespace),
            ));
        }
        if origin == self.node_id {
            return Err(StoreError::new(
                ErrorCode::SyncDenied,
                format!("Peer announced our own id '{}'", origin),
            ));
        }
        Ok(origin.to_string())
    }
}

/// Encodes a change as a relay frame
pub fn change_to_frame(event: &ChangeEvent, origin: &str) -> TLVMessage {
    let event_type = match (&event.key, &event.new_value) {
        (None, _) => EventType::Clear,
        (Some(_), Some(_)) => EventType::Set,
        (Some(_), None) => EventType::Delete,
    };

    let mut frame = TLVMessage::new(event_type).with_field(FieldType::Origin, origin.to_string());
    if let Some(key) = &event.key {
        frame.insert_field(FieldType::Key, key.clone());
    }
    if let Some(raw) = &event.new_value {
        frame.insert_field(FieldType::Value, raw.clone());
    }
    frame
}

/// Decodes a Set/Delete/Clear frame
pub fn frame_to_change(msg: &TLVMessage) -> Result<ChangeEvent> {
    match msg.event_type {
        EventType::Clear => Ok(ChangeEvent::cleared()),
        EventType::Set => {
            let key = required_str(msg, FieldType::Key)?;
            let raw = required_str(msg, FieldType::Value)?;
            Ok(ChangeEvent::set(key, raw))
        },
        EventType::Delete => Ok(ChangeEvent::removed(required_str(msg, FieldType::Key)?)),
        other => Err(StoreError::new(
            ErrorCode::InvalidEventType,
            format!("{:?} is not a change frame", other),
        )),
    }
}

fn required_str(msg: &TLVMessage, field: FieldType) -> Result<String> {
    msg.get_str(field)?
        .map(str::to_string)
        .ok_or_else(|| StoreError::new(ErrorCode::MalformedTlv, format!("Missing field {:?}", field)))
}
