//! Fan-out of build notifications to connected clients.

use std::sync::{Mutex, MutexGuard, PoisonError};

use hmr_protocol::{BuildHash, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::compiler::CompileResult;
use crate::watcher::BuildListener;

/// Identifier of a registered client.
pub type ClientId = u64;

/// A sender for push events to a specific client.
pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Default)]
struct ClientSet {
    /// Registration order is delivery order.
    clients: Vec<(ClientId, ClientSender)>,
    last_hash: Option<BuildHash>,
    next_id: ClientId,
}

/// Connected clients plus the last completed build hash.
///
/// Every broadcast is delivered synchronously under one lock, so a client
/// registering concurrently either receives the new hash on join or as part
/// of the broadcast, never neither.
#[derive(Default)]
pub struct NotificationBroadcaster {
    inner: Mutex<ClientSet>,
}

impl NotificationBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, ClientSet> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a client. The last known hash (if any) and a ready signal are
    /// queued before any later broadcast.
    pub fn register_client(&self) -> (ClientId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut set = self.clients();

        if let Some(hash) = &set.last_hash {
            let _ = tx.send(ServerEvent::hash(hash.clone()));
        }
        let _ = tx.send(ServerEvent::Ready);

        let id = set.next_id;
        set.next_id += 1;
        set.clients.push((id, tx));
        info!("Registered client {} ({} connected)", id, set.clients.len());
        (id, rx)
    }

    pub fn unregister_client(&self, id: ClientId) {
        let mut set = self.clients();
        let before = set.clients.len();
        set.clients.retain(|(client, _)| *client != id);
        if set.clients.len() < before {
            info!("Unregistered client {} ({} connected)", id, set.clients.len());
        }
    }

    /// Remember `hash` and send `hash` then `ready` to every client in
    /// registration order. Clients whose receiver is gone are dropped.
    pub fn on_build_complete(&self, hash: BuildHash) {
        let mut set = self.clients();
        set.last_hash = Some(hash.clone());

        let before = set.clients.len();
        set.clients.retain(|(id, tx)| {
            let delivered = tx.send(ServerEvent::hash(hash.clone())).is_ok()
                && tx.send(ServerEvent::Ready).is_ok();
            if !delivered {
                debug!("Dropping disconnected client {}", id);
            }
            delivered
        });

        info!(
            "Broadcast {} to {} clients ({} pruned)",
            hash,
            set.clients.len(),
            before - set.clients.len()
        );
    }

    pub fn last_hash(&self) -> Option<BuildHash> {
        self.clients().last_hash.clone()
    }

    pub fn client_count(&self) -> usize {
        self.clients().clients.len()
    }
}

impl BuildListener for NotificationBroadcaster {
    fn build_completed(&self, result: &CompileResult) {
        self.on_build_complete(result.hash.clone());
    }
}
