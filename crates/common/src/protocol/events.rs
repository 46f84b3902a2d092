// Event types for the lagoon gateway channel.
//
// Wire format is JSON text frames, adjacently tagged:
// `{"event": "<name>", "data": <payload>}`. Event names are camelCase
// and match the protocol the mobile/web clients already speak.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChatMessage, MessageKind};

/// All client -> server events.
///
/// `register` carries no payload: the credential travels in the
/// connection handshake (the `jwt` cookie of the upgrade request), not
/// in the event body. `joinConversation`/`leaveConversation` carry a
/// bare conversation id as `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Register,
    JoinConversation(Uuid),
    LeaveConversation(Uuid),
    SendMessage(SendMessagePayload),
    StartCall(StartCallPayload),
    AcceptCall(AcceptCallPayload),
    Candidate(CandidatePayload),
    EndCall(EndCallPayload),
    Typing(TypingPayload),
}

/// All server -> client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage(ReceiveMessagePayload),
    Notification(NotificationPayload),
    IncomingCall(IncomingCallPayload),
    CallAccepted(CallAcceptedPayload),
    /// ICE candidate, relayed verbatim.
    Candidate(serde_json::Value),
    UserLeft(UserLeftPayload),
    Typing(TypingPayload),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: Uuid,
    /// The message body.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replying_to: Option<Uuid>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartCallPayload {
    pub conversation_id: Uuid,
    pub is_video_call: bool,
    /// SDP offer, opaque to the gateway.
    pub offer: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptCallPayload {
    pub conversation_id: Uuid,
    /// SDP answer, opaque to the gateway.
    pub answer: serde_json::Value,
    pub my_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: serde_json::Value,
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndCallPayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessagePayload {
    pub new_message: ChatMessage,
    pub conversation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    /// Sender's username.
    pub sender: String,
    pub conversation_id: Uuid,
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCallPayload {
    pub conversation_id: Uuid,
    pub caller_id: Uuid,
    pub caller_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_image: Option<String>,
    pub is_video_call: bool,
    pub offer: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallAcceptedPayload {
    pub answer: serde_json::Value,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserLeftPayload {
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub message: String,
}

impl ServerEvent {
    /// Convenience constructor for the `error` event.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload { message: message.into() })
    }
}
