//! Infrastructure layer - adapters behind the outbound ports

pub mod messaging;
pub mod platform;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod websocket;
