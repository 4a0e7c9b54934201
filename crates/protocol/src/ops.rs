//! rosbridge v2 operations
//!
//! Every frame on the socket is a JSON object tagged by `op`. The client only
//! ever emits the operations below; the server side is parsed leniently so
//! unknown operations (fragments, PNG-compressed frames, ...) are ignored
//! rather than treated as errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

// =============================================================================
// Client Operations (console → rosbridge)
// =============================================================================

/// Operations sent from the console to the rosbridge server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientOp {
    /// Declare intent to publish on a topic
    Advertise {
        id: String,
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
    },
    /// Withdraw a previous advertisement
    Unadvertise { id: String, topic: String },
    /// Start receiving messages published on a topic
    Subscribe {
        id: String,
        topic: String,
        #[serde(rename = "type")]
        msg_type: String,
    },
    /// Stop receiving messages for a subscription id
    Unsubscribe { id: String, topic: String },
    /// Publish one message
    Publish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        topic: String,
        msg: Value,
    },
    /// Call a ROS service; answered by a `service_response` with the same id
    CallService {
        id: String,
        service: String,
        #[serde(default)]
        args: Value,
    },
}

impl ClientOp {
    /// Topic (or service, for calls) this operation refers to.
    pub fn topic(&self) -> &str {
        match self {
            ClientOp::Advertise { topic, .. }
            | ClientOp::Unadvertise { topic, .. }
            | ClientOp::Subscribe { topic, .. }
            | ClientOp::Unsubscribe { topic, .. }
            | ClientOp::Publish { topic, .. } => topic,
            ClientOp::CallService { service, .. } => service,
        }
    }

    /// Encode as a text frame.
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            msg_type: "rosbridge operation",
            source,
        })
    }
}

/// Build a registration id in the `<op>:<topic>:<n>` form rosbridge clients use.
pub fn registration_id(op: &str, topic: &str, sequence: u64) -> String {
    format!("{op}:{topic}:{sequence}")
}

// =============================================================================
// Server Operations (rosbridge → console)
// =============================================================================

/// Operations received from the rosbridge server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerOp {
    /// A message published on a subscribed topic
    Publish { topic: String, msg: Value },
    /// Server-side status report (warnings about bad requests, etc.)
    Status {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        level: Option<String>,
        msg: String,
    },
    /// Answer to a `call_service`
    ServiceResponse {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        service: Option<String>,
        #[serde(default)]
        values: Value,
        /// Older rosbridge servers omit it on success
        #[serde(default = "succeeded")]
        result: bool,
    },
    /// Anything the console does not act on
    #[serde(other)]
    Unsupported,
}

fn succeeded() -> bool {
    true
}

/// Parse one inbound text frame.
pub fn parse_server_op(text: &str) -> Result<ServerOp, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::InvalidFrame)
}
