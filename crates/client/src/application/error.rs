//! Service layer error types

use thiserror::Error;

/// Errors returned by operator commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The bus is not connected; nothing was sent
    #[error("Not connected to rosbridge")]
    NotConnected,

    #[error("QR code is empty")]
    EmptyQrCode,

    /// The code is not a node of the loaded navigation graph
    #[error("QR code {0} not found in graph")]
    UnknownQrCode(String),

    #[error("Invalid goal: {0}")]
    InvalidGoal(String),
}
