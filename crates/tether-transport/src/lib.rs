//! Transport layer for tether clients.
//!
//! Provides:
//! - Wire protocol (JSON + base64)
//! - WebSocket transport (feature: websocket)

pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{ClientFrame, ServerFrame};
