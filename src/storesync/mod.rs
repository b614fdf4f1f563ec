pub mod binding;
pub mod broadcaster;
pub mod config;
pub mod handler;
pub mod medium;
pub mod net;
pub mod store;
pub mod subscriptions;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, Result, StoreError};
use broadcaster::PeerRegistry;
use config::NodeConfig;
use handler::RelayHandler;
use medium::{FileMedium, RelayedMedium};
use net::connector::connect_to_peers;
use net::reconnector::start_reconnection_task;
use net::server::run_relay_server;
use store::ObservableStore;

/// A running store process: the store over its own durable document, plus the
/// relay that keeps it in step with peer processes.
pub struct Node {
    pub store: Arc<ObservableStore>,
    pub relay: Arc<RelayHandler>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Address the relay server actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the relay and detaches the change listener
    pub async fn shutdown(self) {
        info!("Shutting down node {}", self.relay.node_id);
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Task ended abnormally during shutdown: {}", e);
            }
        }
        info!("Node {} stopped", self.relay.node_id);
    }
}

/// Opens the store and starts the relay with peer sync
pub async fn start(config: NodeConfig) -> Result<Node> {
    let peers = Arc::new(PeerRegistry::new());
    let relay = Arc::new(RelayHandler::new(config.id.clone(), config.namespace.clone(), peers));

    let file = FileMedium::open_with_quota(&config.data_path, config.quota_bytes)?;
    let medium = Arc::new(RelayedMedium::new(file, relay.clone()));
    let store = Arc::new(ObservableStore::new(medium.clone()));

    let listener = TcpListener::bind(&config.addr).await.map_err(|e| {
        StoreError::new(ErrorCode::ConnectionFailed, format!("Failed to bind {}: {}", config.addr, e))
    })?;
    let local_addr = listener.local_addr()?;

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if let Some(listener_task) = store.spawn_change_listener(shutdown.clone()) {
        tasks.push(listener_task);
    }

    let server_relay = relay.clone();
    let server_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = run_relay_server(listener, server_relay, server_shutdown).await {
            warn!("Relay server error: {}", e);
        }
    }));

    if let Some(secs) = config.reload_interval_secs {
        tasks.push(start_reload_task(medium, Duration::from_secs(secs), shutdown.clone()));
    }

    connect_to_peers(&config.peers, relay.clone(), &shutdown).await;
    tasks.push(start_reconnection_task(
        config.peers.clone(),
        relay.clone(),
        Duration::from_secs(config.reconnect_interval_secs),
        shutdown.clone(),
    ));

    info!("Node {} started on {} (namespace '{}')", config.id, local_addr, config.namespace);
    Ok(Node {
        store,
        relay,
        local_addr,
        shutdown,
        tasks,
    })
}

/// Periodically re-reads the document so edits made outside the relay reach
/// local listeners and peers
fn start_reload_task(
    medium: Arc<RelayedMedium<FileMedium>>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    info!("Reloading {} every {:?}", medium.inner().path().display(), interval);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {},
            }
            match medium.inner().reload_changes() {
                Ok(events) => {
                    debug!("Reload found {} external changes", events.len());
                    for event in &events {
                        medium.relay().announce_external(event);
                    }
                },
                Err(e) => warn!("Failed to reload {}: {}", medium.inner().path().display(), e),
            }
        }
        debug!("Reload task stopped");
    })
}
