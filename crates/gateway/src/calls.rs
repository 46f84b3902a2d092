// Call signaling broker.
//
// A call is per-conversation ephemeral coordination: its only state is
// the call-room subscriber set. The broker relays offer/answer/ICE
// payloads verbatim; media never passes through the gateway.

use lagoon_common::protocol::events::{
    AcceptCallPayload, CallAcceptedPayload, CandidatePayload, EndCallPayload,
    IncomingCallPayload, ServerEvent, StartCallPayload, TypingPayload, UserLeftPayload,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::registry::SessionRegistry;
use crate::rooms::{RoomId, RoomRegistry};
use crate::store::{ConversationStore, UserDirectory};

/// Handle `startCall`: the caller joins the call-room and every live
/// connection of every *other* conversation member is rung directly.
///
/// No room broadcast is used for the ring; callees have not joined
/// any call-room yet.
pub async fn start_call(
    registry: &SessionRegistry,
    rooms: &RoomRegistry,
    users: &UserDirectory,
    conversations: &ConversationStore,
    connection_id: Uuid,
    payload: StartCallPayload,
) -> Result<(), GatewayError> {
    let caller_id =
        registry.user_for(connection_id).await.ok_or(GatewayError::Unauthenticated)?;
    let caller = users
        .find_by_id(caller_id)
        .await
        .map_err(GatewayError::Persistence)?
        .ok_or(GatewayError::UserNotFound)?;

    let conversation_id = payload.conversation_id;
    let members = conversations
        .members(conversation_id)
        .await
        .map_err(GatewayError::Persistence)?
        .ok_or(GatewayError::ConversationNotFound)?;

    rooms.join(RoomId::call(conversation_id), connection_id).await;

    let ring = ServerEvent::IncomingCall(IncomingCallPayload {
        conversation_id,
        caller_id,
        caller_name: caller.username.clone(),
        caller_image: caller.profile_picture.clone(),
        is_video_call: payload.is_video_call,
        offer: payload.offer,
    });
    for member_id in members {
        if member_id == caller_id {
            continue;
        }
        registry.send_to_user(member_id, &ring).await;
    }

    info!(
        caller = %caller.username,
        conversation_id = %conversation_id,
        video = payload.is_video_call,
        "call started"
    );
    Ok(())
}

/// Handle `acceptCall`: broadcast the answer to the call-room (at this
/// point, the caller).
///
/// The accepter is looked up by the `myId` payload field and is NOT
/// validated against conversation membership or against the
/// connection's registered user. This relaxation is preserved
/// from the deployed protocol (clients enforce it). The accepter does
/// not join the call-room and so does not receive its own accept.
pub async fn accept_call(
    registry: &SessionRegistry,
    rooms: &RoomRegistry,
    users: &UserDirectory,
    payload: AcceptCallPayload,
) -> Result<(), GatewayError> {
    let accepter = users
        .find_by_id(payload.my_id)
        .await
        .map_err(GatewayError::Persistence)?
        .ok_or(GatewayError::UserNotFound)?;

    let delivered = rooms
        .broadcast(
            registry,
            RoomId::call(payload.conversation_id),
            &ServerEvent::CallAccepted(CallAcceptedPayload {
                answer: payload.answer,
                username: accepter.username.clone(),
                image: accepter.profile_picture,
            }),
        )
        .await;

    info!(
        accepter = %accepter.username,
        conversation_id = %payload.conversation_id,
        delivered,
        "call accepted"
    );
    Ok(())
}

/// Relay an ICE candidate to the call-room, verbatim.
pub async fn candidate(
    registry: &SessionRegistry,
    rooms: &RoomRegistry,
    payload: CandidatePayload,
) {
    rooms
        .broadcast(
            registry,
            RoomId::call(payload.conversation_id),
            &ServerEvent::Candidate(payload.candidate),
        )
        .await;
}

/// Handle `endCall`: announce the departure to the conversation room.
///
/// The conversation room, not the call-room: only callers ever join
/// the call-room, so the conversation room is the subscriber set that
/// actually reaches the remaining participants.
pub async fn end_call(registry: &SessionRegistry, rooms: &RoomRegistry, payload: EndCallPayload) {
    debug!(
        user_id = %payload.user_id,
        conversation_id = %payload.conversation_id,
        "call ended"
    );
    rooms
        .broadcast(
            registry,
            RoomId::conversation(payload.conversation_id),
            &ServerEvent::UserLeft(UserLeftPayload { user_id: payload.user_id }),
        )
        .await;
}

/// Fire-and-forget typing indicator to conversation peers, excluding
/// the sender's own connection. Independent of call state.
pub async fn typing(
    registry: &SessionRegistry,
    rooms: &RoomRegistry,
    connection_id: Uuid,
    payload: TypingPayload,
) {
    rooms
        .broadcast_excluding(
            registry,
            RoomId::conversation(payload.conversation_id),
            &ServerEvent::Typing(payload),
            connection_id,
        )
        .await;
}
