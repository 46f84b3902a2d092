// lagoon-common: shared types and the event protocol for the Lagoon workspace

pub mod protocol;
pub mod types;
