// Message relay: persist an inbound chat message, fan it out to the
// conversation room, and nudge online members who are not watching the
// room.

use std::collections::HashSet;

use lagoon_common::protocol::events::{
    NotificationPayload, ReceiveMessagePayload, SendMessagePayload, ServerEvent,
};
use lagoon_common::types::{ChatMessage, ReplySummary};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::registry::SessionRegistry;
use crate::rooms::{RoomId, RoomRegistry};
use crate::store::{ConversationStore, NewMessage, UserDirectory};

/// Handle a `sendMessage` event from `connection_id`.
///
/// The sender must have registered on this connection; identity comes
/// from the session registry, never from the payload. Persistence is
/// atomic with the conversation's last-message pointer; nothing is
/// broadcast unless the create committed.
pub async fn send_message(
    registry: &SessionRegistry,
    rooms: &RoomRegistry,
    users: &UserDirectory,
    conversations: &ConversationStore,
    connection_id: Uuid,
    payload: SendMessagePayload,
) -> Result<ChatMessage, GatewayError> {
    let sender_id =
        registry.user_for(connection_id).await.ok_or(GatewayError::Unauthenticated)?;
    let sender = users
        .find_by_id(sender_id)
        .await
        .map_err(GatewayError::Persistence)?
        .ok_or(GatewayError::UserNotFound)?;

    let conversation_id = payload.conversation_id;
    let members = conversations
        .members(conversation_id)
        .await
        .map_err(GatewayError::Persistence)?
        .ok_or(GatewayError::ConversationNotFound)?;

    let stored = conversations
        .create_message(NewMessage {
            conversation_id,
            sender_id,
            content: payload.message,
            kind: payload.kind,
            reply_to: payload.replying_to,
        })
        .await
        .map_err(GatewayError::Persistence)?;

    let replying_to = match stored.reply_to {
        Some(reply_id) => resolve_reply(users, conversations, reply_id).await,
        None => None,
    };

    let message = ChatMessage {
        id: stored.id,
        conversation_id,
        sender: sender.clone(),
        content: stored.content,
        kind: stored.kind,
        replying_to,
        created_at: stored.created_at,
        seen: stored.seen,
    };

    let room = RoomId::conversation(conversation_id);
    let delivered = rooms
        .broadcast(
            registry,
            room,
            &ServerEvent::ReceiveMessage(ReceiveMessagePayload {
                new_message: message.clone(),
                conversation_id,
            }),
        )
        .await;
    debug!(
        conversation_id = %conversation_id,
        message_id = %message.id,
        delivered,
        "relayed message to room"
    );

    // Members who are online somewhere but not watching this room get a
    // targeted notification on every device instead.
    let room_members: HashSet<Uuid> = rooms.members(room).await.into_iter().collect();
    let notification = ServerEvent::Notification(NotificationPayload {
        sender: sender.username.clone(),
        conversation_id,
        message: message.clone(),
    });
    for member_id in members {
        if member_id == sender_id {
            continue;
        }
        let connections = registry.resolve(member_id).await;
        if connections.is_empty() {
            continue; // offline everywhere
        }
        if connections.iter().any(|id| room_members.contains(id)) {
            continue; // already watching the room
        }
        registry.send_to_user(member_id, &notification).await;
    }

    Ok(message)
}

/// Best-effort reply population. A vanished replied-to message or a
/// failed lookup degrades to an un-summarized reply rather than
/// failing a message that is already persisted.
async fn resolve_reply(
    users: &UserDirectory,
    conversations: &ConversationStore,
    reply_id: Uuid,
) -> Option<ReplySummary> {
    let summary = match conversations.message_summary(reply_id).await {
        Ok(Some(summary)) => summary,
        Ok(None) => return None,
        Err(error) => {
            warn!(reply_id = %reply_id, error = ?error, "failed to load replied-to message");
            return None;
        }
    };

    let sender_username = match users.find_by_id(summary.sender_id).await {
        Ok(Some(profile)) => profile.username,
        Ok(None) => return None,
        Err(error) => {
            warn!(reply_id = %reply_id, error = ?error, "failed to load reply sender");
            return None;
        }
    };

    Some(ReplySummary {
        id: summary.id,
        content: summary.content,
        kind: summary.kind,
        sender_username,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lagoon_common::types::{MessageKind, UserProfile};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    struct Harness {
        registry: SessionRegistry,
        rooms: RoomRegistry,
        users: UserDirectory,
        conversations: ConversationStore,
    }

    impl Harness {
        async fn new() -> Self {
            Self {
                registry: SessionRegistry::default(),
                rooms: RoomRegistry::default(),
                users: UserDirectory::for_tests(),
                conversations: ConversationStore::for_tests(),
            }
        }

        async fn user(&self, name: &str) -> Uuid {
            let id = Uuid::new_v4();
            self.users
                .insert_for_tests(UserProfile {
                    id,
                    username: name.to_string(),
                    profile_picture: None,
                })
                .await;
            id
        }

        async fn connect(&self, user_id: Option<Uuid>) -> (Uuid, UnboundedReceiver<ServerEvent>) {
            let connection_id = Uuid::new_v4();
            let (sender, receiver) = unbounded_channel();
            self.registry.attach(connection_id, sender).await;
            if let Some(user_id) = user_id {
                self.registry.bind_user(connection_id, user_id).await;
            }
            (connection_id, receiver)
        }

        async fn send(
            &self,
            connection_id: Uuid,
            conversation_id: Uuid,
            body: &str,
        ) -> Result<ChatMessage, GatewayError> {
            send_message(
                &self.registry,
                &self.rooms,
                &self.users,
                &self.conversations,
                connection_id,
                SendMessagePayload {
                    conversation_id,
                    message: body.to_string(),
                    replying_to: None,
                    kind: MessageKind::Text,
                },
            )
            .await
        }
    }

    fn expect_receive_message(event: ServerEvent) -> ReceiveMessagePayload {
        match event {
            ServerEvent::ReceiveMessage(payload) => payload,
            other => panic!("expected receiveMessage, got {other:?}"),
        }
    }

    fn expect_notification(event: ServerEvent) -> NotificationPayload {
        match event {
            ServerEvent::Notification(payload) => payload,
            other => panic!("expected notification, got {other:?}"),
        }
    }

    // ── The canonical fan-out scenario ─────────────────────────────

    #[tokio::test]
    async fn room_broadcast_plus_notification_for_off_room_member() {
        let harness = Harness::new().await;
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let conversation_id = Uuid::new_v4();
        harness
            .conversations
            .insert_conversation_for_tests(conversation_id, vec![alice, bob])
            .await;

        let (a1, mut a1_rx) = harness.connect(Some(alice)).await;
        let (_b1, mut b1_rx) = harness.connect(Some(bob)).await;
        harness.rooms.join(RoomId::conversation(conversation_id), a1).await;

        let message = harness.send(a1, conversation_id, "hi").await.unwrap();

        // a1 joined the room, so it receives its own broadcast.
        let received = expect_receive_message(a1_rx.try_recv().unwrap());
        assert_eq!(received.new_message.id, message.id);
        assert_eq!(received.new_message.sender.username, "alice");
        assert!(a1_rx.try_recv().is_err(), "sender must not also be notified");

        // b1 is online but off-room: exactly one notification, no broadcast.
        let notification = expect_notification(b1_rx.try_recv().unwrap());
        assert_eq!(notification.sender, "alice");
        assert_eq!(notification.conversation_id, conversation_id);
        assert_eq!(notification.message.id, message.id);
        assert!(b1_rx.try_recv().is_err());

        // The conversation now points at the new message.
        assert_eq!(
            harness.conversations.last_message_id(conversation_id).await.unwrap(),
            Some(message.id)
        );
    }

    #[tokio::test]
    async fn notification_reaches_every_device_of_an_off_room_member() {
        let harness = Harness::new().await;
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let conversation_id = Uuid::new_v4();
        harness
            .conversations
            .insert_conversation_for_tests(conversation_id, vec![alice, bob])
            .await;

        let (a1, _a1_rx) = harness.connect(Some(alice)).await;
        let (_b1, mut b1_rx) = harness.connect(Some(bob)).await;
        let (_b2, mut b2_rx) = harness.connect(Some(bob)).await;
        harness.rooms.join(RoomId::conversation(conversation_id), a1).await;

        harness.send(a1, conversation_id, "hi").await.unwrap();

        expect_notification(b1_rx.try_recv().unwrap());
        expect_notification(b2_rx.try_recv().unwrap());
    }

    #[tokio::test]
    async fn member_watching_the_room_on_any_device_is_not_notified() {
        let harness = Harness::new().await;
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let conversation_id = Uuid::new_v4();
        harness
            .conversations
            .insert_conversation_for_tests(conversation_id, vec![alice, bob])
            .await;

        let (a1, _a1_rx) = harness.connect(Some(alice)).await;
        let (b1, mut b1_rx) = harness.connect(Some(bob)).await;
        let (_b2, mut b2_rx) = harness.connect(Some(bob)).await;
        harness.rooms.join(RoomId::conversation(conversation_id), a1).await;
        harness.rooms.join(RoomId::conversation(conversation_id), b1).await;

        harness.send(a1, conversation_id, "hi").await.unwrap();

        // b1 sees the room broadcast; b2 sees nothing at all.
        expect_receive_message(b1_rx.try_recv().unwrap());
        assert!(b1_rx.try_recv().is_err());
        assert!(b2_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_members_are_skipped_silently() {
        let harness = Harness::new().await;
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let conversation_id = Uuid::new_v4();
        harness
            .conversations
            .insert_conversation_for_tests(conversation_id, vec![alice, bob])
            .await;

        let (a1, _a1_rx) = harness.connect(Some(alice)).await;
        harness.rooms.join(RoomId::conversation(conversation_id), a1).await;

        // Bob has no connection anywhere; the send still succeeds.
        harness.send(a1, conversation_id, "hi").await.unwrap();
    }

    #[tokio::test]
    async fn sender_alone_in_room_errors_nothing() {
        let harness = Harness::new().await;
        let alice = harness.user("alice").await;
        let conversation_id = Uuid::new_v4();
        harness
            .conversations
            .insert_conversation_for_tests(conversation_id, vec![alice])
            .await;

        let (a1, mut a1_rx) = harness.connect(Some(alice)).await;
        harness.rooms.join(RoomId::conversation(conversation_id), a1).await;

        let message = harness.send(a1, conversation_id, "talking to myself").await.unwrap();
        assert_eq!(expect_receive_message(a1_rx.try_recv().unwrap()).new_message.id, message.id);
    }

    // ── Failure paths ──────────────────────────────────────────────

    #[tokio::test]
    async fn unregistered_connection_cannot_send() {
        let harness = Harness::new().await;
        let conversation_id = Uuid::new_v4();
        harness.conversations.insert_conversation_for_tests(conversation_id, vec![]).await;

        let (anonymous, _rx) = harness.connect(None).await;
        let error = harness.send(anonymous, conversation_id, "hi").await.unwrap_err();

        assert!(matches!(error, GatewayError::Unauthenticated));
        assert_eq!(harness.conversations.last_message_id(conversation_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_conversation_aborts_before_any_broadcast() {
        let harness = Harness::new().await;
        let alice = harness.user("alice").await;
        let (a1, mut a1_rx) = harness.connect(Some(alice)).await;
        let ghost_conversation = Uuid::new_v4();
        harness.rooms.join(RoomId::conversation(ghost_conversation), a1).await;

        let error = harness.send(a1, ghost_conversation, "hi").await.unwrap_err();

        assert!(matches!(error, GatewayError::ConversationNotFound));
        assert!(a1_rx.try_recv().is_err(), "no partial broadcast on failure");
    }

    // ── Reply population ───────────────────────────────────────────

    #[tokio::test]
    async fn replies_carry_a_populated_summary() {
        let harness = Harness::new().await;
        let alice = harness.user("alice").await;
        let bob = harness.user("bob").await;
        let conversation_id = Uuid::new_v4();
        harness
            .conversations
            .insert_conversation_for_tests(conversation_id, vec![alice, bob])
            .await;

        let (a1, mut a1_rx) = harness.connect(Some(alice)).await;
        let (b1, mut b1_rx) = harness.connect(Some(bob)).await;
        harness.rooms.join(RoomId::conversation(conversation_id), a1).await;
        harness.rooms.join(RoomId::conversation(conversation_id), b1).await;

        let first = harness.send(a1, conversation_id, "original").await.unwrap();
        let _ = a1_rx.try_recv();
        let _ = b1_rx.try_recv();

        let reply = send_message(
            &harness.registry,
            &harness.rooms,
            &harness.users,
            &harness.conversations,
            b1,
            SendMessagePayload {
                conversation_id,
                message: "replying".to_string(),
                replying_to: Some(first.id),
                kind: MessageKind::Text,
            },
        )
        .await
        .unwrap();

        let summary = reply.replying_to.expect("reply should be populated");
        assert_eq!(summary.id, first.id);
        assert_eq!(summary.content, "original");
        assert_eq!(summary.sender_username, "alice");

        let broadcast = expect_receive_message(a1_rx.try_recv().unwrap());
        assert_eq!(
            broadcast.new_message.replying_to.expect("broadcast carries summary").id,
            first.id
        );
    }

    #[tokio::test]
    async fn vanished_reply_target_degrades_to_no_summary() {
        let harness = Harness::new().await;
        let alice = harness.user("alice").await;
        let conversation_id = Uuid::new_v4();
        harness
            .conversations
            .insert_conversation_for_tests(conversation_id, vec![alice])
            .await;
        let (a1, _rx) = harness.connect(Some(alice)).await;

        let message = send_message(
            &harness.registry,
            &harness.rooms,
            &harness.users,
            &harness.conversations,
            a1,
            SendMessagePayload {
                conversation_id,
                message: "reply to nothing".to_string(),
                replying_to: Some(Uuid::new_v4()),
                kind: MessageKind::Text,
            },
        )
        .await
        .unwrap();

        assert!(message.replying_to.is_none());
    }
}
