//! Transport Port - opens the physical bus connection
//!
//! The bus connection never touches sockets directly. It asks a
//! [`TransportConnector`] for a [`TransportLink`]: a pair of channels carrying
//! outbound text frames and inbound link events. Dropping the outbound sender
//! closes the socket.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Socket-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Invalid bus URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Socket error: {0}")]
    Socket(String),
}

/// Something that happened on an established link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One inbound text frame
    Frame(String),
    /// The peer closed the connection
    Closed,
    /// The socket failed
    Failed(TransportError),
}

/// An open connection, as seen by the bus.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Port for opening bus connections
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a connection; resolves once the link is usable.
    async fn connect(&self, url: &str) -> Result<TransportLink, TransportError>;
}
