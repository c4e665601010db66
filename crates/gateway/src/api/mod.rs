//! HTTP surface: health, tool discovery, and the WebSocket attach route.

pub mod router;
