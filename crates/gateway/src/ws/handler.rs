use super::protocol as ws_protocol;
use crate::auth::{token_from_cookie_header, TokenVerifier};
use crate::calls;
use crate::error::GatewayError;
use crate::metrics;
use crate::registry::SessionRegistry;
use crate::relay;
use crate::rooms::{RoomId, RoomRegistry};
use crate::store::{ConversationStore, UserDirectory};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::COOKIE, HeaderMap},
    response::IntoResponse,
    routing::get,
    Router,
};
use lagoon_common::protocol::events::{ClientEvent, ServerEvent};
use lagoon_common::types::UserProfile;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: u32 = 262_144;

/// Shared handles for every component the event channel dispatches to.
/// All fields are cheap clones over `Arc`'d state.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: SessionRegistry,
    pub rooms: RoomRegistry,
    pub users: UserDirectory,
    pub conversations: ConversationStore,
    pub verifier: Arc<TokenVerifier>,
}

pub fn router(state: GatewayState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

pub async fn ws_upgrade(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // The credential rides in the handshake cookie; it is captured now
    // and consulted only when a `register` event arrives.
    let credential =
        token_from_cookie_header(headers.get(COOKIE).and_then(|value| value.to_str().ok()));

    ws.max_frame_size(MAX_FRAME_BYTES as usize)
        .on_upgrade(move |socket| handle_socket(state, credential, socket))
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

async fn handle_socket(state: GatewayState, credential: Option<String>, mut socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();
    state.registry.attach(connection_id, outbound_sender).await;
    info!(connection_id = %connection_id, "connection accepted");

    // Heartbeat: server pings every HEARTBEAT_INTERVAL_MS, disconnects
    // if no pong arrives within HEARTBEAT_TIMEOUT_MS.
    let mut heartbeat_interval =
        tokio::time::interval(std::time::Duration::from_millis(HEARTBEAT_INTERVAL_MS));
    heartbeat_interval.reset(); // skip immediate first tick
    let mut last_pong = Instant::now();
    let heartbeat_timeout = std::time::Duration::from_millis(HEARTBEAT_TIMEOUT_MS);

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > heartbeat_timeout {
                    warn!(connection_id = %connection_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound_event) => {
                        if ws_protocol::send_event(&mut socket, &outbound_event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if raw_message.len() > MAX_FRAME_BYTES as usize {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let event = match ws_protocol::decode_event(&raw_message) {
                            Ok(event) => event,
                            Err(error) => {
                                debug!(
                                    connection_id = %connection_id,
                                    error = %error,
                                    "discarding unrecognized frame"
                                );
                                if ws_protocol::send_event(
                                    &mut socket,
                                    &ServerEvent::error("unrecognized event"),
                                )
                                .await
                                .is_err()
                                {
                                    break;
                                }
                                continue;
                            }
                        };

                        if let Err(error_event) =
                            dispatch_event(&state, connection_id, credential.as_deref(), event)
                                .await
                        {
                            if ws_protocol::send_event(&mut socket, &error_event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    // Teardown is owned here and must never fail: membership first so
    // no broadcast targets the dying connection, then the registry.
    state.rooms.remove_connection(connection_id).await;
    state.registry.detach(connection_id).await;
    info!(connection_id = %connection_id, "connection closed");
}

fn event_name(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::Register => "register",
        ClientEvent::JoinConversation(_) => "joinConversation",
        ClientEvent::LeaveConversation(_) => "leaveConversation",
        ClientEvent::SendMessage(_) => "sendMessage",
        ClientEvent::StartCall(_) => "startCall",
        ClientEvent::AcceptCall(_) => "acceptCall",
        ClientEvent::Candidate(_) => "candidate",
        ClientEvent::EndCall(_) => "endCall",
        ClientEvent::Typing(_) => "typing",
    }
}

/// Route one inbound event to its component. `Err` carries the `error`
/// event to report back to this connection only.
async fn dispatch_event(
    state: &GatewayState,
    connection_id: Uuid,
    credential: Option<&str>,
    event: ClientEvent,
) -> Result<(), ServerEvent> {
    let name = event_name(&event);
    let started_at = Instant::now();

    let result = match event {
        ClientEvent::Register => {
            handle_register(state, connection_id, credential).await.map(|profile| {
                info!(
                    connection_id = %connection_id,
                    user_id = %profile.id,
                    username = %profile.username,
                    "connection registered"
                );
            })
        }
        ClientEvent::JoinConversation(conversation_id) => {
            state.rooms.join(RoomId::conversation(conversation_id), connection_id).await;
            debug!(connection_id = %connection_id, conversation_id = %conversation_id, "joined conversation");
            Ok(())
        }
        ClientEvent::LeaveConversation(conversation_id) => {
            state.rooms.leave(RoomId::conversation(conversation_id), connection_id).await;
            debug!(connection_id = %connection_id, conversation_id = %conversation_id, "left conversation");
            Ok(())
        }
        ClientEvent::SendMessage(payload) => relay::send_message(
            &state.registry,
            &state.rooms,
            &state.users,
            &state.conversations,
            connection_id,
            payload,
        )
        .await
        .map(|_| ()),
        ClientEvent::StartCall(payload) => calls::start_call(
            &state.registry,
            &state.rooms,
            &state.users,
            &state.conversations,
            connection_id,
            payload,
        )
        .await,
        ClientEvent::AcceptCall(payload) => {
            calls::accept_call(&state.registry, &state.rooms, &state.users, payload).await
        }
        ClientEvent::Candidate(payload) => {
            calls::candidate(&state.registry, &state.rooms, payload).await;
            Ok(())
        }
        ClientEvent::EndCall(payload) => {
            calls::end_call(&state.registry, &state.rooms, payload).await;
            Ok(())
        }
        ClientEvent::Typing(payload) => {
            calls::typing(&state.registry, &state.rooms, connection_id, payload).await;
            Ok(())
        }
    };

    let elapsed_ms = started_at.elapsed().as_millis() as u64;
    match result {
        Ok(()) => {
            metrics::record_event(name, false, elapsed_ms);
            Ok(())
        }
        Err(error) => {
            metrics::record_event(name, true, elapsed_ms);
            warn!(connection_id = %connection_id, event = name, error = %error, "event failed");
            Err(error.to_client_event(operation_message(name)))
        }
    }
}

fn operation_message(event: &str) -> &'static str {
    match event {
        "register" => "Authentication failed",
        "startCall" => "Failed to start call",
        "acceptCall" => "Failed to accept call",
        _ => "Failed to send message",
    }
}

async fn handle_register(
    state: &GatewayState,
    connection_id: Uuid,
    credential: Option<&str>,
) -> Result<UserProfile, GatewayError> {
    let raw_token = credential.ok_or(GatewayError::Unauthenticated)?;
    let claims = state.verifier.verify(raw_token).map_err(|error| {
        debug!(connection_id = %connection_id, error = %error, "credential rejected");
        GatewayError::Unauthenticated
    })?;

    let profile = state
        .users
        .find_by_id(claims.user_id)
        .await
        .map_err(GatewayError::Persistence)?
        .ok_or(GatewayError::Unauthenticated)?;

    if !state.registry.bind_user(connection_id, claims.user_id).await {
        // The connection vanished while the credential was in flight.
        return Err(GatewayError::Unauthenticated);
    }
    Ok(profile)
}
