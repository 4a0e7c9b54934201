//! System status - what is running on the robot, via rosapi

use std::time::Duration;

use robodeck_protocol::rosapi::{NODES_SERVICE, TOPICS_SERVICE};
use robodeck_protocol::{NodesResponse, TopicInfo, TopicsResponse};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::infrastructure::messaging::{BusConnection, ServiceError, DEFAULT_CALL_TIMEOUT};

pub struct SystemStatusService {
    connection: BusConnection,
    timeout: Duration,
}

impl SystemStatusService {
    pub fn new(connection: &BusConnection) -> Self {
        Self {
            connection: connection.clone(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Names of the running ROS nodes.
    pub async fn list_nodes(&self) -> Result<Vec<String>, ServiceError> {
        let response: NodesResponse = self.call(NODES_SERVICE).await?;
        Ok(response.nodes)
    }

    /// Every advertised topic with its message type.
    pub async fn list_topics(&self) -> Result<Vec<TopicInfo>, ServiceError> {
        let response: TopicsResponse = self.call(TOPICS_SERVICE).await?;
        Ok(response.into_topics())
    }

    async fn call<T: DeserializeOwned>(&self, service: &str) -> Result<T, ServiceError> {
        let values = self
            .connection
            .call_service_with_timeout(service, json!({}), self.timeout)
            .await?;
        serde_json::from_value(values).map_err(|e| ServiceError::MalformedResponse {
            service: service.to_string(),
            reason: e.to_string(),
        })
    }
}
