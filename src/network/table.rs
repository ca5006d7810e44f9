//! ConnectionTable — the single authority for "who am I connected to"
//!
//! Holds the writer half of every live outbound connection, keyed by
//! canonical peer identity. All mutation is linearized through one
//! `RwLock`, so racing dial completions cannot create duplicate entries.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock};

use crate::error::CollectiveError;
use crate::protocol::{codec, Command, PeerAddress, PeerId};

/// The writer side of one live connection to a peer.
#[derive(Clone)]
pub struct PeerHandle {
    addr: PeerAddress,
    writer: Arc<Mutex<OwnedWriteHalf>>,
}

impl PeerHandle {
    pub fn new(addr: PeerAddress, writer: OwnedWriteHalf) -> Self {
        Self {
            addr,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn addr(&self) -> &PeerAddress {
        &self.addr
    }

    /// Encode and write one frame. A failure means the connection is
    /// dead; the caller is expected to drop this handle from the table.
    pub async fn send(&self, command: &Command) -> Result<(), CollectiveError> {
        let frame = codec::encode_frame(command);
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Set of live peer connections, keyed by `"host:port"` identity.
#[derive(Clone, Default)]
pub struct ConnectionTable {
    inner: Arc<RwLock<HashMap<PeerId, PeerHandle>>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection unless the identity is already present.
    /// Returns false (and leaves the table untouched) on a duplicate,
    /// so the later of two racing dials is deterministically dropped.
    pub async fn add_if_absent(&self, id: PeerId, handle: PeerHandle) -> bool {
        let mut table = self.inner.write().await;
        if table.contains_key(&id) {
            return false;
        }
        table.insert(id, handle);
        true
    }

    pub async fn remove(&self, id: &PeerId) -> Option<PeerHandle> {
        self.inner.write().await.remove(id)
    }

    pub async fn get(&self, id: &PeerId) -> Option<PeerHandle> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &PeerId) -> bool {
        self.inner.read().await.contains_key(id)
    }

    /// Snapshot of all live connections, for broadcast fan-out.
    pub async fn all(&self) -> Vec<(PeerId, PeerHandle)> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}
