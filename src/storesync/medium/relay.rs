use std::sync::Arc;

use log::debug;
use tokio::sync::mpsc::UnboundedReceiver;
use crate::error::Result;
use crate::storesync::handler::RelayHandler;
use crate::storesync::medium::BackingMedium;
use crate::storesync::types::{ChangeEvent, Key};

/// Medium kept in step with peer processes.
///
/// Reads and writes go to the wrapped medium. Each successful mutation is
/// announced to connected peers. Mutations peers announce to us are written
/// to the wrapped medium first and then carried by the change-event channel,
/// so a listener never sees a peer value that `read` would not return.
pub struct RelayedMedium<M> {
    inner: Arc<M>,
    relay: Arc<RelayHandler>,
}

impl<M: BackingMedium + 'static> RelayedMedium<M> {
    pub fn new(inner: M, relay: Arc<RelayHandler>) -> Self {
        let inner = Arc::new(inner);
        relay.attach_medium(inner.clone());
        Self { inner, relay }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn relay(&self) -> &Arc<RelayHandler> {
        &self.relay
    }
}

impl<M: BackingMedium + 'static> BackingMedium for RelayedMedium<M> {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, raw: &str) -> Result<()> {
        self.inner.write(key, raw)?;
        self.relay.publish_local(&ChangeEvent::set(key, raw));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)?;
        self.relay.publish_local(&ChangeEvent::removed(key));
        Ok(())
    }

    fn delete_all(&self) -> Result<()> {
        self.inner.delete_all()?;
        self.relay.publish_local(&ChangeEvent::cleared());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<Key>> {
        self.inner.keys()
    }

    fn watch(&self) -> UnboundedReceiver<ChangeEvent> {
        debug!("Watching peer changes for node {}", self.relay.node_id);
        self.relay.watch()
    }
}
