// WebSocket event channel: upgrade, per-connection lifecycle, event
// dispatch.

mod handler;
pub(crate) mod protocol;

pub use handler::{router, GatewayState};
