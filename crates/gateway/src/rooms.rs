// Room membership: topic-scoped subscriber sets used for broadcast.
//
// Membership is connection-scoped, not user-scoped: a connection is in
// a room only after an explicit join and leaves on explicit leave or
// disconnect cleanup. Broadcast snapshots the subscriber set under a
// read guard, releases it, then sends. One gone subscriber never
// stalls or fails delivery to the rest.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use lagoon_common::protocol::events::ServerEvent;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::metrics;
use crate::registry::SessionRegistry;

/// Identifies one broadcast topic. Message rooms carry conversation
/// chatter; call rooms carry signaling for the same conversation and
/// are kept disjoint by the `call_` prefix on the wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Conversation(Uuid),
    Call(Uuid),
}

impl RoomId {
    pub const fn conversation(conversation_id: Uuid) -> Self {
        Self::Conversation(conversation_id)
    }

    pub const fn call(conversation_id: Uuid) -> Self {
        Self::Call(conversation_id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "{id}"),
            Self::Call(id) => write!(f, "call_{id}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<RoomId, HashSet<Uuid>>>>,
}

impl RoomRegistry {
    /// Add a connection to a room. Joining twice is a no-op.
    pub async fn join(&self, room_id: RoomId, connection_id: Uuid) {
        let mut guard = self.rooms.write().await;
        guard.entry(room_id).or_default().insert(connection_id);
    }

    /// Remove a connection from a room. Leaving a room the connection
    /// never joined is a no-op.
    pub async fn leave(&self, room_id: RoomId, connection_id: Uuid) {
        let mut guard = self.rooms.write().await;
        if let Some(members) = guard.get_mut(&room_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                guard.remove(&room_id);
            }
        }
    }

    /// Current subscriber snapshot for a room.
    pub async fn members(&self, room_id: RoomId) -> Vec<Uuid> {
        let guard = self.rooms.read().await;
        guard.get(&room_id).map(|members| members.iter().copied().collect()).unwrap_or_default()
    }

    pub async fn is_member(&self, room_id: RoomId, connection_id: Uuid) -> bool {
        let guard = self.rooms.read().await;
        guard.get(&room_id).is_some_and(|members| members.contains(&connection_id))
    }

    /// Drop a connection from every room it belongs to (disconnect
    /// cleanup). Never fails.
    pub async fn remove_connection(&self, connection_id: Uuid) {
        let mut guard = self.rooms.write().await;
        guard.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
    }

    /// Deliver an event to every current subscriber of a room.
    /// Best-effort per connection; returns the number delivered.
    pub async fn broadcast(
        &self,
        registry: &SessionRegistry,
        room_id: RoomId,
        event: &ServerEvent,
    ) -> usize {
        self.broadcast_inner(registry, room_id, event, None).await
    }

    /// Same as [`broadcast`], skipping one connection (the sender).
    pub async fn broadcast_excluding(
        &self,
        registry: &SessionRegistry,
        room_id: RoomId,
        event: &ServerEvent,
        exclude: Uuid,
    ) -> usize {
        self.broadcast_inner(registry, room_id, event, Some(exclude)).await
    }

    async fn broadcast_inner(
        &self,
        registry: &SessionRegistry,
        room_id: RoomId,
        event: &ServerEvent,
        exclude: Option<Uuid>,
    ) -> usize {
        let mut members = self.members(room_id).await;
        if let Some(excluded) = exclude {
            members.retain(|id| *id != excluded);
        }
        if members.is_empty() {
            return 0;
        }

        let mut sent = 0;
        for (connection_id, sender) in registry.senders_for(&members).await {
            if sender.send(event.clone()).is_ok() {
                sent += 1;
            } else {
                metrics::increment_delivery_failures();
                debug!(
                    connection_id = %connection_id,
                    room_id = %room_id,
                    "dropped room delivery to closed connection"
                );
            }
        }
        sent
    }
}
