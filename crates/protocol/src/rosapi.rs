//! rosapi introspection services
//!
//! Request and response bodies of the rosapi services the console calls to
//! show what is running on the robot.

use serde::{Deserialize, Serialize};

pub const NODES_SERVICE: &str = "/rosapi/nodes";
pub const TOPICS_SERVICE: &str = "/rosapi/topics";

/// `rosapi/Nodes` response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodesResponse {
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// `rosapi/Topics` response: parallel lists of names and types
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TopicsResponse {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub types: Vec<String>,
}

/// Type reported for a topic rosapi listed without one.
pub const UNKNOWN_TYPE: &str = "unknown";

/// One advertised topic and its message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicInfo {
    pub name: String,
    pub msg_type: String,
}

impl TopicsResponse {
    /// Pair names with types. A name without a type gets [`UNKNOWN_TYPE`].
    pub fn into_topics(self) -> Vec<TopicInfo> {
        let mut types = self.types.into_iter();
        self.topics
            .into_iter()
            .map(|name| TopicInfo {
                name,
                msg_type: types.next().unwrap_or_else(|| UNKNOWN_TYPE.to_string()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topics_are_paired_with_types() {
        let response: TopicsResponse = serde_json::from_value(json!({
            "topics": ["/cmd_vel", "/rosout", "/odd"],
            "types": ["geometry_msgs/Twist", "rcl_interfaces/msg/Log"],
        }))
        .expect("decode");

        let topics = response.into_topics();
        assert_eq!(topics.len(), 3);
        assert_eq!(topics[0].msg_type, "geometry_msgs/Twist");
        assert_eq!(
            topics[2],
            TopicInfo {
                name: "/odd".into(),
                msg_type: UNKNOWN_TYPE.into(),
            }
        );
    }

    #[test]
    fn missing_lists_decode_empty() {
        let response: NodesResponse = serde_json::from_value(json!({})).expect("decode");
        assert!(response.nodes.is_empty());
    }
}
