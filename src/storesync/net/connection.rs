use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ErrorCode, Result, StoreError};
use crate::storesync::broadcaster::PeerSender;
use crate::storesync::handler::RelayHandler;
use crate::tlv::message::{TLVMessage, HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::tlv::types::{EventType, FieldType};

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by our relay server; the peer must send SyncInit
    Inbound,
    /// Dialed by this node; the peer must answer with SyncAck
    Outbound,
}

/// One TCP connection to a peer process, with its own read and write tasks
pub struct PeerConnection {
    id: Uuid,
    remote: SocketAddr,
    direction: Direction,
    write_tx: UnboundedSender<TLVMessage>,
    cancel_token: CancellationToken,
    peer_id: Mutex<Option<String>>,
    relay: Arc<RelayHandler>,
}

impl PeerConnection {
    /// Starts the read and write tasks; both stop when `shutdown` fires or the socket closes
    pub fn spawn(
        stream: TcpStream,
        direction: Direction,
        relay: Arc<RelayHandler>,
        shutdown: &CancellationToken,
    ) -> Result<Arc<Self>> {
        let remote = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", remote, e);
        }
        let (reader, writer) = stream.into_split();
        let (write_tx, write_rx) = unbounded_channel::<TLVMessage>();

        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            remote,
            direction,
            write_tx,
            cancel_token: shutdown.child_token(),
            peer_id: Mutex::new(None),
            relay,
        });
        info!("Connection {} opened with {} ({:?})", connection.id, remote, direction);

        let conn_read = connection.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = conn_read.cancel_token.cancelled() => Ok(()),
                res = conn_read.read_loop(reader) => res,
            };
            if let Err(e) = result {
                warn!("Read task error on connection {}: {}", conn_read.id, e);
            }
            conn_read.detach();
        });

        let cancel = connection.cancel_token.clone();
        let conn_id = connection.id;
        tokio::spawn(async move {
            if let Err(e) = write_task(writer, write_rx, cancel).await {
                warn!("Write task error on connection {}: {}", conn_id, e);
            }
        });

        Ok(connection)
    }

    async fn read_loop<R: AsyncRead + Unpin>(self: &Arc<Self>, mut reader: R) -> Result<()> {
        debug!("Starting read loop for connection {}", self.id);
        while let Some(raw) = read_frame(&mut reader).await? {
            let msg = TLVMessage::parse(raw)?;
            self.handle_frame(msg)?;
        }
        info!("Connection {} closed by {}", self.id, self.remote);
        Ok(())
    }

    fn handle_frame(self: &Arc<Self>, msg: TLVMessage) -> Result<()> {
        match msg.event_type {
            EventType::SyncInit => {
                self.expect_handshake(EventType::SyncInit)?;
                let peer = self.accept(&msg)?;
                self.send(&self.relay.sync_ack_frame())?;
                info!("Peer {} joined from {}", peer, self.remote);
                Ok(())
            },
            EventType::SyncAck => {
                self.expect_handshake(EventType::SyncAck)?;
                let peer = self.accept(&msg)?;
                info!("Peer {} acknowledged sync", peer);
                Ok(())
            },
            event_type if event_type.is_change() => {
                match self.peer() {
                    Some(peer) => self.relay.handle_change(&msg, &peer),
                    None => warn!("Ignoring {:?} from {} before handshake", event_type, self.remote),
                }
                Ok(())
            },
            EventType::Error => {
                let text = msg.get_str(FieldType::ErrorText)?.unwrap_or("unknown error").to_string();
                error!("Peer at {} reported: {}", self.remote, text);
                Err(StoreError::new(ErrorCode::SyncDenied, text))
            },
            _ => {
                debug!("Ignoring {:?} from {}", msg.event_type, self.remote);
                Ok(())
            },
        }
    }

    /// SyncInit is only valid on inbound connections, SyncAck only on ones we dialed
    fn expect_handshake(&self, event_type: EventType) -> Result<()> {
        let expected = match self.direction {
            Direction::Inbound => EventType::SyncInit,
            Direction::Outbound => EventType::SyncAck,
        };
        if event_type != expected {
            warn!("Unexpected {:?} on {:?} connection from {}", event_type, self.direction, self.remote);
            return Err(StoreError::new(
                ErrorCode::SyncDenied,
                format!("{:?} is not valid on an {:?} connection", event_type, self.direction),
            ));
        }
        Ok(())
    }

    /// Validates a handshake frame and registers this connection for the peer
    fn accept(self: &Arc<Self>, msg: &TLVMessage) -> Result<String> {
        let peer = match self.relay.accept_handshake(msg) {
            Ok(peer) => peer,
            Err(e) => {
                let (code, text) = e.to_tlv_error();
                let reply = TLVMessage::new(EventType::Error)
                    .with_field(FieldType::ErrorCode, Bytes::copy_from_slice(&code.to_be_bytes()))
                    .with_field(FieldType::ErrorText, text);
                if let Err(send_err) = self.send(&reply) {
                    error!("Failed to send handshake rejection: {}", send_err);
                }
                return Err(e);
            }
        };

        *self.peer_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(peer.clone());
        self.relay.peers.register(peer.clone(), self.clone());
        Ok(peer)
    }

    /// Node id of the peer, once the handshake completed
    pub fn peer(&self) -> Option<String> {
        self.peer_id.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn detach(&self) {
        self.cancel_token.cancel();
        let peer = self.peer_id.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(peer) = peer {
            self.relay.peers.unregister_connection(&peer, self.id);
        }
        debug!("Connection {} detached", self.id);
    }
}

impl PeerSender for PeerConnection {
    fn connection_id(&self) -> Uuid {
        self.id
    }

    fn send(&self, msg: &TLVMessage) -> Result<()> {
        debug!("Queueing {:?} for {}", msg.event_type, self.remote);
        self.write_tx.send(msg.clone()).map_err(|e| {
            StoreError::new(ErrorCode::SendFailed, format!("Connection {} is closed: {}", self.id, e))
        })
    }
}

/// Reads one length-prefixed frame; `None` on a clean end of stream
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len < HEADER_SIZE {
        return Err(StoreError::new(ErrorCode::MalformedTlv, format!("Frame length {} is below header size", len)));
    }
    if len > MAX_MESSAGE_SIZE {
        return Err(StoreError::new(ErrorCode::MessageTooLarge, format!("Frame length {} exceeds maximum", len)));
    }

    let mut full = BytesMut::with_capacity(len);
    full.extend_from_slice(&len_buf);
    full.resize(len, 0);
    reader.read_exact(&mut full[4..]).await.map_err(|e| {
        StoreError::new(ErrorCode::IncompleteMessage, format!("Failed to read frame body: {}", e))
    })?;

    Ok(Some(full.freeze()))
}

/// Writes queued frames until cancelled, then flushes what is already queued
async fn write_task<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: UnboundedReceiver<TLVMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        write_frame(&mut writer, &msg).await?;
    }

    while let Ok(msg) = rx.try_recv() {
        write_frame(&mut writer, &msg).await?;
    }
    let _ = writer.shutdown().await;
    debug!("Write task completed");
    Ok(())
}

/// Writes one frame. A frame that cannot be encoded is dropped and the link kept.
async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &TLVMessage) -> Result<()> {
    let encoded = match msg.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!("Dropping {:?} frame: {}", msg.event_type, e);
            return Ok(());
        }
    };
    writer.write_all(&encoded).await.map_err(|e| {
        StoreError::new(ErrorCode::SendFailed, format!("Failed to write frame: {}", e))
    })?;
    debug!("Wrote {} bytes", encoded.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use crate::storesync::broadcaster::PeerRegistry;

    /// Accepts one loopback connection as `node-a` and returns the dialing side
    async fn inbound_pair(relay: Arc<RelayHandler>, shutdown: &CancellationToken) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        PeerConnection::spawn(server, Direction::Inbound, relay, shutdown).unwrap();
        client
    }

    fn relay() -> Arc<RelayHandler> {
        Arc::new(RelayHandler::new("node-a", "demo", Arc::new(PeerRegistry::new())))
    }

    #[tokio::test]
    async fn inbound_sync_init_is_acknowledged() {
        let relay = relay();
        let shutdown = CancellationToken::new();
        let mut client = inbound_pair(relay.clone(), &shutdown).await;

        let init = RelayHandler::new("node-b", "demo", Arc::new(PeerRegistry::new())).sync_init_frame();
        write_frame(&mut client, &init).await.unwrap();

        let raw = timeout(Duration::from_secs(2), read_frame(&mut client)).await.unwrap().unwrap().unwrap();
        assert_eq!(TLVMessage::extract_event(&raw).unwrap(), EventType::SyncAck);
        assert!(relay.peers.contains("node-b"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn unsolicited_sync_ack_is_refused() {
        let relay = relay();
        let shutdown = CancellationToken::new();
        let mut client = inbound_pair(relay.clone(), &shutdown).await;

        let ack = RelayHandler::new("node-b", "demo", Arc::new(PeerRegistry::new())).sync_ack_frame();
        write_frame(&mut client, &ack).await.unwrap();

        // the connection is dropped without registering anyone
        let closed = timeout(Duration::from_secs(2), read_frame(&mut client)).await.unwrap().unwrap();
        assert!(closed.is_none());
        assert!(!relay.peers.contains("node-b"));
    }

    #[tokio::test]
    async fn frames_survive_the_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let msg = TLVMessage::new(EventType::Delete).with_field(FieldType::Key, "user");
        write_frame(&mut client, &msg).await.unwrap();
        drop(client);

        let raw = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(TLVMessage::parse(raw).unwrap(), msg);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn undersized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 1]).await.unwrap();
        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedTlv);
    }

    #[tokio::test]
    async fn truncated_body_is_incomplete() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 20, 0x01, 0x01]).await.unwrap();
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IncompleteMessage);
    }

    #[tokio::test]
    async fn oversized_frame_is_skipped_not_fatal() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (tx, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        let huge = vec![b'x'; MAX_MESSAGE_SIZE];
        tx.send(TLVMessage::new(EventType::Set).with_field(FieldType::Value, huge)).unwrap();
        tx.send(TLVMessage::new(EventType::Delete).with_field(FieldType::Key, "user")).unwrap();
        drop(tx);

        write_task(client, rx, cancel).await.unwrap();
        let raw = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(TLVMessage::extract_event(&raw).unwrap(), EventType::Delete);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn write_task_flushes_queue_on_cancel() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (tx, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        tx.send(TLVMessage::new(EventType::Clear)).unwrap();
        cancel.cancel();

        write_task(client, rx, cancel).await.unwrap();
        let raw = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(TLVMessage::extract_event(&raw).unwrap(), EventType::Clear);
    }
}
