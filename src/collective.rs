//! Collective — the mesh coordinator and local API
//!
//! Orchestrates startup (bind, dial every candidate, announce), the
//! join handshake (`New`/`Accept` with a single snapshot transfer), and
//! ongoing dispatch of decoded commands. Every connection's read loop
//! feeds one mpsc channel; the single dispatcher task behind it is the
//! only writer of the document store, so all mutation is linearized.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use rand::Rng;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

use crate::error::CollectiveError;
use crate::network::{connection, ConnectionTable, PeerEvent, PeerHandle};
use crate::protocol::{Command, Operation, PeerAddress, PeerId};
use crate::store::DocumentStore;

const DISPATCH_QUEUE: usize = 256;

/// One mesh node: a listener, an outbound connection per peer, and the
/// shared document. Construct with [`Collective::start`]; the returned
/// node is Ready (listener bound, candidates dialed, join announced).
pub struct Collective {
    local: PeerAddress,
    store: RwLock<DocumentStore>,
    connections: ConnectionTable,
    commands: mpsc::Sender<Command>,
}

impl Collective {
    /// Bind the local listen address, dial every candidate except self
    /// concurrently, then announce ourselves to every connection that
    /// came up — asking exactly one uniformly-chosen peer for a full
    /// document snapshot. Resolves once the node is live; gossip keeps
    /// running in the background for the process lifetime.
    ///
    /// A bind failure is fatal; a failed dial just drops that candidate.
    pub async fn start(
        local: PeerAddress,
        candidates: Vec<PeerAddress>,
    ) -> Result<Arc<Self>, CollectiveError> {
        let listener = TcpListener::bind((local.host.as_str(), local.port))
            .await
            .map_err(|source| CollectiveError::Bind {
                addr: local.to_string(),
                source,
            })?;
        log::info!("listening on {local}");

        let (tx, rx) = mpsc::channel(DISPATCH_QUEUE);
        let node = Arc::new(Self {
            local,
            store: RwLock::new(DocumentStore::new()),
            connections: ConnectionTable::new(),
            commands: tx,
        });

        Arc::clone(&node).spawn_dispatcher(rx);
        Arc::clone(&node).spawn_accept_loop(listener);

        let self_id = node.local.id();
        let dials = candidates
            .into_iter()
            .filter(|candidate| candidate.id() != self_id)
            .map(|candidate| {
                let node = Arc::clone(&node);
                async move {
                    node.connect_peer(&candidate).await;
                }
            });
        join_all(dials).await;

        node.announce().await;
        Ok(node)
    }

    pub fn local_addr(&self) -> &PeerAddress {
        &self.local
    }

    /// Number of live outbound connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.count().await
    }

    /// Read a dot-separated path; `None` if any segment is absent.
    pub async fn get(&self, path: &str) -> Option<Value> {
        self.store.read().await.read(path).cloned()
    }

    /// Assign a value at a path and broadcast the write.
    pub async fn set(&self, path: &str, value: Value) {
        self.mutate(path, value, Operation::Set).await;
    }

    /// Add `delta` (possibly negative) to a numeric leaf and broadcast.
    pub async fn increment(&self, path: &str, delta: i64) {
        self.mutate(path, json!(delta), Operation::Increment).await;
    }

    /// Remove a leaf entry and broadcast the delete.
    pub async fn delete(&self, path: &str) {
        self.mutate(path, Value::Null, Operation::Delete).await;
    }

    /// Dial a dynamically-discovered peer and announce ourselves to it
    /// (without requesting a snapshot).
    pub async fn add_peer(self: &Arc<Self>, addr: PeerAddress) {
        if addr.id() == self.local.id() {
            return;
        }
        if let Some(handle) = self.connect_peer(&addr).await {
            let hello = Command::New {
                addr: self.local.clone(),
                want_snapshot: false,
            };
            self.send_or_drop(&addr.id(), &handle, &hello).await;
        }
    }

    /// Tear down the connection to a departed peer, if any.
    pub async fn remove_peer(&self, addr: &PeerAddress) {
        if self.connections.remove(&addr.id()).await.is_some() {
            log::info!("removed peer {addr}");
        }
    }

    /// Wire a discovery beacon's event stream into the candidate set.
    pub fn attach_discovery(self: &Arc<Self>, mut events: mpsc::Receiver<PeerEvent>) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PeerEvent::Added(addr) => node.add_peer(addr).await,
                    PeerEvent::Removed(addr) => node.remove_peer(&addr).await,
                }
            }
        });
    }

    /// Stamp a local mutation, apply it, and fan it out to every live
    /// connection. Never blocks on peer acknowledgement.
    async fn mutate(&self, path: &str, value: Value, op: Operation) {
        let timestamp = Utc::now().timestamp_millis();
        self.store
            .write()
            .await
            .apply(path, timestamp, value.clone(), op);

        let command = Command::Data {
            path: path.to_string(),
            timestamp,
            value,
            op,
        };
        for (id, handle) in self.connections.all().await {
            self.send_or_drop(&id, &handle, &command).await;
        }
    }

    /// Send `New(self, wantSnapshot)` to every held connection, with
    /// `wantSnapshot` true for exactly one random index: one
    /// already-converged peer transfers the document, the rest just
    /// complete the mesh back-edges.
    async fn announce(&self) {
        let connections = self.connections.all().await;
        if connections.is_empty() {
            return;
        }
        let snapshot_index = rand::thread_rng().gen_range(0..connections.len());

        for (i, (id, handle)) in connections.iter().enumerate() {
            let command = Command::New {
                addr: self.local.clone(),
                want_snapshot: i == snapshot_index,
            };
            self.send_or_drop(id, handle, &command).await;
        }
    }

    /// Idempotent dial: reuse the existing connection when one is open,
    /// otherwise connect, register, and start the read loop. A lost
    /// registration race drops the fresh stream and reuses the winner.
    async fn connect_peer(self: &Arc<Self>, peer: &PeerAddress) -> Option<PeerHandle> {
        let id = peer.id();
        if let Some(existing) = self.connections.get(&id).await {
            return Some(existing);
        }

        let stream = match connection::dial(peer).await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("dial {peer} failed: {e}");
                return None;
            }
        };

        let (read_half, write_half) = stream.into_split();
        let handle = PeerHandle::new(peer.clone(), write_half);
        if !self.connections.add_if_absent(id.clone(), handle.clone()).await {
            return self.connections.get(&id).await;
        }
        log::info!("connected to peer {id}");

        let node = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = connection::read_loop(read_half, node.commands.clone()).await {
                log::warn!("connection to {id} failed: {e}");
            }
            node.connections.remove(&id).await;
            log::info!("peer {id} disconnected");
        });

        Some(handle)
    }

    fn spawn_accept_loop(self: Arc<Self>, listener: TcpListener) {
        tokio::spawn(async move {
            loop {
                let (socket, remote) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::warn!("accept failed: {e}");
                        continue;
                    }
                };
                log::debug!("inbound stream from {remote}");

                let commands = self.commands.clone();
                tokio::spawn(async move {
                    // Hold the write half open for the stream's lifetime;
                    // dropping it would half-close the peer's socket.
                    let (read_half, _write_half) = socket.into_split();
                    if let Err(e) = connection::read_loop(read_half, commands).await {
                        log::warn!("inbound stream from {remote} closed: {e}");
                    }
                });
            }
        });
    }

    fn spawn_dispatcher(self: Arc<Self>, mut commands: mpsc::Receiver<Command>) {
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                self.handle_command(command).await;
            }
        });
    }

    /// Dispatch one decoded command. Runs for the whole process
    /// lifetime, not just during the join round.
    async fn handle_command(self: &Arc<Self>, command: Command) {
        match command {
            // A peer announced itself: complete the back-edge of the
            // mesh, and transfer our document if it asked for one.
            Command::New {
                addr,
                want_snapshot,
            } => {
                let Some(handle) = self.connect_peer(&addr).await else {
                    return;
                };
                let snapshot = if want_snapshot {
                    Some(self.store.read().await.snapshot())
                } else {
                    None
                };
                self.send_or_drop(&addr.id(), &handle, &Command::Accept { snapshot })
                    .await;
            }
            // Snapshot bootstrap; a null payload is a bare acknowledgement.
            Command::Accept { snapshot } => {
                if let Some(document) = snapshot {
                    log::info!("bootstrapping document from peer snapshot");
                    self.store.write().await.replace_all(document);
                }
            }
            // Remote mutation: apply locally, never re-broadcast.
            Command::Data {
                path,
                timestamp,
                value,
                op,
            } => {
                self.store.write().await.apply(&path, timestamp, value, op);
            }
        }
    }

    async fn send_or_drop(&self, id: &PeerId, handle: &PeerHandle, command: &Command) {
        if let Err(e) = handle.send(command).await {
            log::warn!("write to {id} failed, dropping connection: {e}");
            self.connections.remove(id).await;
        }
    }
}
