// Core domain types shared across the Lagoon crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public display fields for a user, resolved by the gateway when it
/// populates broadcast payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

/// The payload kind of a chat message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Voice,
    Image,
}

impl MessageKind {
    /// The stable string form stored in the database `kind` column.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
            Self::Image => "image",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message kind '{0}'")]
pub struct ParseMessageKindError(String);

impl std::str::FromStr for MessageKind {
    type Err = ParseMessageKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(Self::Text),
            "voice" => Ok(Self::Voice),
            "image" => Ok(Self::Image),
            other => Err(ParseMessageKindError(other.to_owned())),
        }
    }
}

/// Summary of the message a chat message replies to, embedded in
/// broadcast payloads so clients can render the quoted preview without
/// a second fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplySummary {
    pub id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender_username: String,
}

/// A fully populated chat message as delivered over the event channel.
///
/// This is the broadcast shape: sender display fields and the reply
/// summary are already resolved. The persisted row keeps only the ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: UserProfile,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replying_to: Option<ReplySummary>,
    pub created_at: DateTime<Utc>,
    pub seen: bool,
}
