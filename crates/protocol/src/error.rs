//! Protocol error types.

use thiserror::Error;

/// Failure to interpret something received from the bus.
///
/// None of these affect the connection itself; the offending frame or message
/// is logged by the caller and dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not a valid rosbridge operation.
    #[error("Invalid rosbridge frame: {0}")]
    InvalidFrame(#[source] serde_json::Error),

    /// The `msg` body did not match the expected ROS message type.
    #[error("Malformed payload on {topic}: {source}")]
    MalformedPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// A `std_msgs/String` carried JSON that did not match the expected shape.
    #[error("Malformed embedded JSON on {topic}: {source}")]
    MalformedEmbeddedJson {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// A message could not be encoded for publishing.
    #[error("Failed to encode {msg_type}: {source}")]
    Encode {
        msg_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
