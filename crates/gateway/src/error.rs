// Operation error taxonomy for the gateway.
//
// Every failure is scoped to the single operation that triggered it
// and surfaces to the offending connection only, as an `error` event.
// Delivery failures (a target connection vanishing mid-broadcast) are
// deliberately NOT part of this taxonomy: they are counted and logged
// by the broadcast paths and never surfaced to the sender.

use lagoon_common::protocol::events::ServerEvent;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing/invalid/expired credential, or an operation that
    /// requires registration arriving on an anonymous connection.
    #[error("authentication failed")]
    Unauthenticated,

    /// The target conversation does not exist. No state change.
    #[error("conversation not found")]
    ConversationNotFound,

    /// A referenced user does not exist in the directory.
    #[error("user not found")]
    UserNotFound,

    /// The external store rejected or failed the operation. The
    /// surrounding transaction is rolled back; no partial broadcast.
    #[error("persistence failed: {0}")]
    Persistence(anyhow::Error),
}

impl GatewayError {
    /// The client-facing `error` event for this failure.
    ///
    /// `operation_message` is the per-operation fallback (e.g.
    /// `"Failed to send message"`); auth and not-found failures use
    /// their own well-known strings, matching what clients already
    /// display.
    pub fn to_client_event(&self, operation_message: &str) -> ServerEvent {
        match self {
            Self::Unauthenticated => ServerEvent::error("Authentication failed"),
            Self::ConversationNotFound => ServerEvent::error("Conversation not found"),
            Self::UserNotFound | Self::Persistence(_) => ServerEvent::error(operation_message),
        }
    }
}
