// Conversation + message persistence.
//
// The message insert and the conversation's last-message pointer
// update are one transaction: no reader may observe the pointer before
// the message row is queryable.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use lagoon_common::types::MessageKind;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Input for a message create.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to: Option<Uuid>,
}

/// The persisted row shape. Display fields are resolved separately by
/// the relay; the row keeps ids only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub seen: bool,
}

/// What the relay needs from a replied-to message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub sender_id: Uuid,
}

#[derive(Clone)]
pub enum ConversationStore {
    Postgres(sqlx::PgPool),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<MemoryConversations>>),
}

#[derive(Debug, Default)]
pub struct MemoryConversations {
    conversations: HashMap<Uuid, MemoryConversation>,
    messages: HashMap<Uuid, StoredMessage>,
}

#[derive(Debug)]
struct MemoryConversation {
    members: Vec<Uuid>,
    last_message_id: Option<Uuid>,
}

impl ConversationStore {
    /// Member user ids of a conversation; `None` when the conversation
    /// does not exist.
    pub async fn members(&self, conversation_id: Uuid) -> anyhow::Result<Option<Vec<Uuid>>> {
        match self {
            Self::Postgres(pool) => {
                let exists = sqlx::query_scalar::<_, Uuid>(
                    "SELECT id FROM conversations WHERE id = $1",
                )
                .bind(conversation_id)
                .fetch_optional(pool)
                .await
                .context("failed to query conversation")?;

                if exists.is_none() {
                    return Ok(None);
                }

                let members = sqlx::query_scalar::<_, Uuid>(
                    "SELECT user_id FROM conversation_members WHERE conversation_id = $1",
                )
                .bind(conversation_id)
                .fetch_all(pool)
                .await
                .context("failed to query conversation members")?;

                Ok(Some(members))
            }
            Self::Memory(store) => Ok(store
                .read()
                .await
                .conversations
                .get(&conversation_id)
                .map(|conversation| conversation.members.clone())),
        }
    }

    /// Persist a message and repoint the conversation's last message,
    /// atomically.
    pub async fn create_message(&self, new: NewMessage) -> anyhow::Result<StoredMessage> {
        let message = StoredMessage {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            kind: new.kind,
            reply_to: new.reply_to,
            created_at: Utc::now(),
            seen: false,
        };

        match self {
            Self::Postgres(pool) => {
                let mut tx = pool.begin().await.context("failed to begin message transaction")?;

                sqlx::query(
                    r#"
                    INSERT INTO messages
                        (id, conversation_id, sender_id, content, kind, reply_to_id, created_at, seen)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(message.id)
                .bind(message.conversation_id)
                .bind(message.sender_id)
                .bind(&message.content)
                .bind(message.kind.as_str())
                .bind(message.reply_to)
                .bind(message.created_at)
                .bind(message.seen)
                .execute(&mut *tx)
                .await
                .context("failed to insert message")?;

                let updated = sqlx::query(
                    "UPDATE conversations SET last_message_id = $1 WHERE id = $2",
                )
                .bind(message.id)
                .bind(message.conversation_id)
                .execute(&mut *tx)
                .await
                .context("failed to update conversation last message")?;

                if updated.rows_affected() == 0 {
                    bail!("conversation {} does not exist", message.conversation_id);
                }

                tx.commit().await.context("failed to commit message transaction")?;
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let Some(conversation) = guard.conversations.get_mut(&message.conversation_id)
                else {
                    bail!("conversation {} does not exist", message.conversation_id);
                };
                conversation.last_message_id = Some(message.id);
                guard.messages.insert(message.id, message.clone());
            }
        }

        Ok(message)
    }

    /// Summary fields of a message, for reply population.
    pub async fn message_summary(
        &self,
        message_id: Uuid,
    ) -> anyhow::Result<Option<MessageSummary>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, (Uuid, String, String, Uuid)>(
                    "SELECT id, content, kind, sender_id FROM messages WHERE id = $1",
                )
                .bind(message_id)
                .fetch_optional(pool)
                .await
                .context("failed to query replied-to message")?;

                row.map(|(id, content, kind, sender_id)| {
                    let kind = MessageKind::from_str(&kind)
                        .with_context(|| format!("message {id} has invalid kind"))?;
                    Ok(MessageSummary { id, content, kind, sender_id })
                })
                .transpose()
            }
            Self::Memory(store) => Ok(store.read().await.messages.get(&message_id).map(
                |message| MessageSummary {
                    id: message.id,
                    content: message.content.clone(),
                    kind: message.kind,
                    sender_id: message.sender_id,
                },
            )),
        }
    }

    /// The conversation's current last-message pointer.
    pub async fn last_message_id(&self, conversation_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        match self {
            Self::Postgres(pool) => {
                let pointer = sqlx::query_scalar::<_, Option<Uuid>>(
                    "SELECT last_message_id FROM conversations WHERE id = $1",
                )
                .bind(conversation_id)
                .fetch_optional(pool)
                .await
                .context("failed to query conversation last message")?;

                Ok(pointer.flatten())
            }
            Self::Memory(store) => Ok(store
                .read()
                .await
                .conversations
                .get(&conversation_id)
                .and_then(|conversation| conversation.last_message_id)),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryConversations::default())))
    }

    #[cfg(test)]
    pub(crate) async fn insert_conversation_for_tests(
        &self,
        conversation_id: Uuid,
        members: Vec<Uuid>,
    ) {
        if let Self::Memory(store) = self {
            store.write().await.conversations.insert(
                conversation_id,
                MemoryConversation { members, last_message_id: None },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(conversation_id: Uuid, sender_id: Uuid, content: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            sender_id,
            content: content.to_string(),
            kind: MessageKind::Text,
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn create_message_sets_the_last_message_pointer() {
        let store = ConversationStore::for_tests();
        let conversation_id = Uuid::new_v4();
        let sender_id = Uuid::new_v4();
        store.insert_conversation_for_tests(conversation_id, vec![sender_id]).await;

        let message = store.create_message(new_message(conversation_id, sender_id, "hi")).await.unwrap();

        assert_eq!(store.last_message_id(conversation_id).await.unwrap(), Some(message.id));
        // The message itself is queryable together with the pointer.
        let summary = store.message_summary(message.id).await.unwrap().unwrap();
        assert_eq!(summary.content, "hi");
        assert_eq!(summary.sender_id, sender_id);
    }

    #[tokio::test]
    async fn last_message_tracks_the_latest_create() {
        let store = ConversationStore::for_tests();
        let conversation_id = Uuid::new_v4();
        let sender_id = Uuid::new_v4();
        store.insert_conversation_for_tests(conversation_id, vec![sender_id]).await;

        store.create_message(new_message(conversation_id, sender_id, "first")).await.unwrap();
        let second =
            store.create_message(new_message(conversation_id, sender_id, "second")).await.unwrap();

        assert_eq!(store.last_message_id(conversation_id).await.unwrap(), Some(second.id));
    }

    #[tokio::test]
    async fn missing_conversation_has_no_members() {
        let store = ConversationStore::for_tests();
        assert_eq!(store.members(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_into_missing_conversation_fails_without_side_effects() {
        let store = ConversationStore::for_tests();
        let conversation_id = Uuid::new_v4();

        let result = store
            .create_message(new_message(conversation_id, Uuid::new_v4(), "orphan"))
            .await;

        assert!(result.is_err());
        assert_eq!(store.last_message_id(conversation_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn message_summary_for_unknown_message_is_none() {
        let store = ConversationStore::for_tests();
        assert_eq!(store.message_summary(Uuid::new_v4()).await.unwrap(), None);
    }
}
