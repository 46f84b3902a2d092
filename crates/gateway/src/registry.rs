// Session registry: the live mapping between authenticated users and
// their open connections.
//
// Connections are attached anonymously at accept time and bound to a
// user on a successful `register`. Both directions of the mapping live
// behind one lock so insertion and removal stay atomic. Guards are
// held only for map mutation or snapshotting, never across an await.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lagoon_common::protocol::events::ServerEvent;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::metrics;

/// Outbound handle for one connection. The lifecycle controller drains
/// the receiving end; every other component delivers through clones.
pub type OutboundSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Every open connection, registered or not.
    connections: HashMap<Uuid, ConnectionEntry>,
    /// Forward map: user -> live connections. Kept strictly in step
    /// with the reverse links held in `connections`.
    users: HashMap<Uuid, HashSet<Uuid>>,
}

#[derive(Debug)]
struct ConnectionEntry {
    sender: OutboundSender,
    user_id: Option<Uuid>,
}

impl SessionRegistry {
    /// Record a newly accepted connection. The connection is reachable
    /// for room broadcast immediately, before any `register`.
    pub async fn attach(&self, connection_id: Uuid, sender: OutboundSender) {
        let mut guard = self.state.write().await;
        guard.connections.insert(connection_id, ConnectionEntry { sender, user_id: None });
        metrics::set_open_connections(guard.connections.len());
    }

    /// Bind an attached connection to a verified user identity.
    ///
    /// Returns false when the connection is no longer attached (it
    /// disconnected while the credential was being verified). A
    /// re-register moves the connection between user entries.
    pub async fn bind_user(&self, connection_id: Uuid, user_id: Uuid) -> bool {
        let mut guard = self.state.write().await;
        let Some(entry) = guard.connections.get_mut(&connection_id) else {
            return false;
        };

        let previous = entry.user_id.replace(user_id);
        if let Some(previous_user) = previous {
            if previous_user != user_id {
                remove_user_link(&mut guard.users, previous_user, connection_id);
            }
        }
        guard.users.entry(user_id).or_default().insert(connection_id);
        true
    }

    /// Remove a connection from both directions of the mapping.
    /// Idempotent; called exactly once per connection close by the
    /// lifecycle controller, which also clears room membership.
    pub async fn detach(&self, connection_id: Uuid) {
        let mut guard = self.state.write().await;
        if let Some(entry) = guard.connections.remove(&connection_id) {
            if let Some(user_id) = entry.user_id {
                remove_user_link(&mut guard.users, user_id, connection_id);
            }
        }
        metrics::set_open_connections(guard.connections.len());
    }

    /// Live connection ids for a user. Empty means offline.
    pub async fn resolve(&self, user_id: Uuid) -> Vec<Uuid> {
        let guard = self.state.read().await;
        guard
            .users
            .get(&user_id)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The user a connection registered as, if any.
    pub async fn user_for(&self, connection_id: Uuid) -> Option<Uuid> {
        self.state.read().await.connections.get(&connection_id).and_then(|entry| entry.user_id)
    }

    /// Outbound senders for a set of connections. Snapshot only;
    /// callers send after the guard is released.
    pub(crate) async fn senders_for(
        &self,
        connection_ids: &[Uuid],
    ) -> Vec<(Uuid, OutboundSender)> {
        let guard = self.state.read().await;
        connection_ids
            .iter()
            .filter_map(|id| guard.connections.get(id).map(|entry| (*id, entry.sender.clone())))
            .collect()
    }

    /// Deliver an event to every live connection of a user. Best
    /// effort: a closed channel is counted and skipped, never an error.
    pub async fn send_to_user(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        let recipients = {
            let guard = self.state.read().await;
            let Some(connections) = guard.users.get(&user_id) else {
                return 0;
            };
            connections
                .iter()
                .filter_map(|id| {
                    guard.connections.get(id).map(|entry| (*id, entry.sender.clone()))
                })
                .collect::<Vec<_>>()
        };

        let mut sent = 0;
        for (connection_id, sender) in recipients {
            if sender.send(event.clone()).is_ok() {
                sent += 1;
            } else {
                metrics::increment_delivery_failures();
                debug!(connection_id = %connection_id, "dropped delivery to closed connection");
            }
        }
        sent
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }
}

fn remove_user_link(users: &mut HashMap<Uuid, HashSet<Uuid>>, user_id: Uuid, connection_id: Uuid) {
    if let Some(connections) = users.get_mut(&user_id) {
        connections.remove(&connection_id);
        if connections.is_empty() {
            users.remove(&user_id);
        }
    }
}
