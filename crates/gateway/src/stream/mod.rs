//! Streaming transport: the per-session event bus, the WebSocket attach
//! surface, and paced assistant-text emission.

pub mod bus;
pub mod typing;
pub mod ws;
