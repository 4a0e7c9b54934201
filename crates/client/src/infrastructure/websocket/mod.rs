//! WebSocket transport for the rosbridge connection
//!
//! - `core`: runtime-agnostic reconnection backoff math and URL validation
//! - `desktop`: tokio-tungstenite based connector

mod core;
mod desktop;

pub use self::core::{validate_bus_url, ReconnectPolicy};
pub use desktop::WsConnector;
