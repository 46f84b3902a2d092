// Event channel protocol shared by the gateway and its clients.

pub mod events;
