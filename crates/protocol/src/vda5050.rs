//! VDA5050 payloads
//!
//! The robot bridges its fleet-protocol traffic onto ROS as JSON text inside
//! `std_msgs/String` messages (`/vda5050/order`, `/vda5050/status`). Field
//! names follow the VDA5050 camelCase convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A VDA5050 order as currently held by the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    #[serde(default)]
    pub order_update_id: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub nodes: Vec<OrderNode>,
}

impl Order {
    /// Nodes the vehicle is allowed to drive to, in sequence order.
    pub fn released_nodes(&self) -> impl Iterator<Item = &OrderNode> {
        self.nodes.iter().filter(|node| node.released)
    }

    /// The first node of the horizon (not yet released), if any.
    pub fn horizon_start(&self) -> Option<&OrderNode> {
        self.nodes
            .iter()
            .filter(|node| !node.released)
            .min_by_key(|node| node.sequence_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNode {
    pub node_id: String,
    #[serde(default)]
    pub sequence_id: u32,
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub actions: Vec<OrderAction>,
}

/// Node action: bridges in the field send either the bare action type or the
/// full VDA5050 action object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderAction {
    Named(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        action_type: String,
        #[serde(default)]
        action_id: Option<String>,
        #[serde(default)]
        blocking_type: Option<String>,
    },
}

impl OrderAction {
    pub fn action_type(&self) -> &str {
        match self {
            OrderAction::Named(name) => name,
            OrderAction::Detailed { action_type, .. } => action_type,
        }
    }
}

/// Bridge status published on `/vda5050/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VdaStatus {
    #[serde(default)]
    pub connection_state: Option<String>,
}

impl VdaStatus {
    /// The bridge omits the field while its own link is healthy.
    pub fn connection_label(&self) -> &str {
        self.connection_state.as_deref().unwrap_or("Connected")
    }
}
