use lagoon_common::protocol::events::{ClientEvent, ServerEvent, TypingPayload};
use serde_json::Value;
use uuid::Uuid;

const GATEWAY_WS_HANDLER_SOURCE: &str = include_str!("../src/ws/handler.rs");

#[test]
fn websocket_contract_heartbeat_and_frame_limit_are_pinned() {
    let heartbeat_interval_ms = parse_u64_const(GATEWAY_WS_HANDLER_SOURCE, "HEARTBEAT_INTERVAL_MS");
    let heartbeat_timeout_ms = parse_u64_const(GATEWAY_WS_HANDLER_SOURCE, "HEARTBEAT_TIMEOUT_MS");
    let max_frame_bytes = parse_u64_const(GATEWAY_WS_HANDLER_SOURCE, "MAX_FRAME_BYTES");

    assert_eq!(heartbeat_interval_ms, 15_000);
    assert_eq!(heartbeat_timeout_ms, 10_000);
    assert_eq!(max_frame_bytes, 262_144);
    assert!(
        heartbeat_timeout_ms < heartbeat_interval_ms,
        "pong timeout must be shorter than heartbeat interval",
    );
}

#[test]
fn websocket_contract_inbound_event_names_are_stable() {
    let conversation_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    let samples = [
        (serde_json::to_value(ClientEvent::Register).expect("register"), "register"),
        (
            serde_json::to_value(ClientEvent::JoinConversation(conversation_id))
                .expect("joinConversation"),
            "joinConversation",
        ),
        (
            serde_json::to_value(ClientEvent::Typing(TypingPayload { conversation_id, user_id }))
                .expect("typing"),
            "typing",
        ),
    ];

    for (value, expected_name) in samples {
        assert_eq!(value["event"], expected_name);
    }
}

#[test]
fn websocket_contract_error_frames_carry_a_message_only() {
    let error = serde_json::to_value(ServerEvent::error("Conversation not found"))
        .expect("error should serialize");

    assert_eq!(error["event"], "error");
    assert_eq!(object_keys(&error["data"]), vec!["message".to_string()]);
}

#[test]
fn websocket_contract_call_room_prefix_is_stable() {
    // Call rooms live beside message rooms under a `call_` prefix; the
    // wire name must not drift.
    assert!(GATEWAY_WS_HANDLER_SOURCE.contains("RoomId"));
    let rooms_source = include_str!("../src/rooms.rs");
    assert!(rooms_source.contains("write!(f, \"call_{id}\")"));
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}

fn parse_u64_const(source: &str, name: &str) -> u64 {
    let needle = format!("const {name}:");
    let index = source.find(&needle).expect("constant must be declared");
    let line = source[index..].lines().next().expect("constant declaration line must exist");
    let raw_value = line
        .split('=')
        .nth(1)
        .expect("constant must have assignment")
        .trim()
        .trim_end_matches(';')
        .replace('_', "");
    raw_value
        .parse::<u64>()
        .unwrap_or_else(|error| panic!("failed to parse `{name}` from `{line}`: {error}"))
}
