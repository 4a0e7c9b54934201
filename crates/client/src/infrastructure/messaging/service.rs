//! Service calls - request/response over the bus.
//!
//! A call is registered under the link lock together with the socket handle,
//! so the bridge can fail every outstanding call when the link goes away.

use std::collections::HashMap;
use std::time::Duration;

use robodeck_protocol::{registration_id, ClientOp};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use super::connection::BusConnection;

/// How long a call waits for its `service_response` by default.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("Not connected to rosbridge")]
    NotConnected,

    #[error("Connection lost before {service} answered")]
    LinkLost { service: String },

    #[error("{service} did not answer within {timeout:?}")]
    Timeout { service: String, timeout: Duration },

    #[error("{service} failed: {message}")]
    Failed { service: String, message: String },

    #[error("Unexpected response from {service}: {reason}")]
    MalformedResponse { service: String, reason: String },
}

/// `values` of a successful response, or the failure text.
pub(crate) type Reply = Result<Value, String>;

/// Calls sent on the current link and not answered yet.
#[derive(Default)]
pub(crate) struct PendingCalls {
    sequence: u64,
    waiting: HashMap<String, oneshot::Sender<Reply>>,
}

impl PendingCalls {
    pub(crate) fn register(&mut self, service: &str) -> (String, oneshot::Receiver<Reply>) {
        self.sequence += 1;
        let id = registration_id("call_service", service, self.sequence);
        let (tx, rx) = oneshot::channel();
        self.waiting.insert(id.clone(), tx);
        (id, rx)
    }

    pub(crate) fn cancel(&mut self, id: &str) -> bool {
        self.waiting.remove(id).is_some()
    }

    /// Hand `reply` to the caller waiting on `id`.
    ///
    /// Returns true if a pending call was found.
    pub(crate) fn resolve(&mut self, id: &str, reply: Reply) -> bool {
        match self.waiting.remove(id) {
            Some(waiter) => {
                // Caller may have given up already
                let _ = waiter.send(reply);
                true
            }
            None => false,
        }
    }

    /// Drop every pending call; their callers see the link as lost.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.waiting.len();
        self.waiting.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.waiting.len()
    }
}

/// Failure text of a `result: false` response.
pub(crate) fn failure_message(values: &Value) -> String {
    match values {
        Value::String(message) => message.clone(),
        Value::Null => "service call failed".to_string(),
        other => other.to_string(),
    }
}

impl BusConnection {
    /// Call `service` with `args` and wait for its response values.
    pub async fn call_service(&self, service: &str, args: Value) -> Result<Value, ServiceError> {
        self.call_service_with_timeout(service, args, DEFAULT_CALL_TIMEOUT)
            .await
    }

    /// [`BusConnection::call_service`] with an explicit deadline.
    ///
    /// Fails with `NotConnected` when there is no link, and with `LinkLost`
    /// when the link drops before the response arrives. Calls are never
    /// retried on a later link.
    pub async fn call_service_with_timeout(
        &self,
        service: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, ServiceError> {
        let (id, reply) = {
            let mut slot = self.shared().link();
            let Some(handle) = slot.handle.clone() else {
                return Err(ServiceError::NotConnected);
            };
            let (id, reply) = slot.calls.register(service);
            let op = ClientOp::CallService {
                id: id.clone(),
                service: service.to_string(),
                args,
            };
            if !handle.send(&op) {
                slot.calls.cancel(&id);
                return Err(ServiceError::NotConnected);
            }
            (id, reply)
        };
        tracing::debug!(%service, %id, "Service call sent");

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(values))) => Ok(values),
            Ok(Ok(Err(message))) => Err(ServiceError::Failed {
                service: service.to_string(),
                message,
            }),
            Ok(Err(_)) => Err(ServiceError::LinkLost {
                service: service.to_string(),
            }),
            Err(_) => {
                self.shared().link().calls.cancel(&id);
                tracing::warn!(%service, ?timeout, "Service call timed out");
                Err(ServiceError::Timeout {
                    service: service.to_string(),
                    timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::messaging::ConnectionState;
    use crate::infrastructure::testing::{BusRig, ScriptedConnector};
    use crate::infrastructure::websocket::ReconnectPolicy;
    use serde_json::json;

    #[test]
    fn pending_calls_resolve_once() {
        let mut calls = PendingCalls::default();
        let (first, mut first_rx) = calls.register("/rosapi/nodes");
        let (second, _second_rx) = calls.register("/rosapi/nodes");
        assert_ne!(first, second);

        assert!(calls.resolve(&first, Ok(json!({ "nodes": [] }))));
        assert!(!calls.resolve(&first, Ok(json!({}))));
        assert_eq!(first_rx.try_recv().expect("reply"), Ok(json!({ "nodes": [] })));

        assert_eq!(calls.clear(), 1);
        assert_eq!(calls.len(), 0);
    }

    #[test]
    fn failure_text_prefers_plain_strings() {
        assert_eq!(failure_message(&json!("no such service")), "no such service");
        assert_eq!(failure_message(&json!({ "code": 3 })), r#"{"code":3}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn response_is_matched_by_id() {
        let mut rig = BusRig::connected().await;
        let bus = rig.bus.clone();
        let call = tokio::spawn(async move { bus.call_service("/rosapi/nodes", json!({})).await });

        let Some(ClientOp::CallService { id, service, .. }) = rig.server.next_op().await else {
            panic!("expected a service call");
        };
        assert_eq!(service, "/rosapi/nodes");

        // An answer to some other call is ignored
        rig.server.send_raw(
            json!({ "op": "service_response", "id": "call_service:/other:99", "values": {}, "result": true })
                .to_string(),
        );
        rig.server.send_raw(
            json!({ "op": "service_response", "id": id, "values": { "nodes": ["/rosapi"] }, "result": true })
                .to_string(),
        );

        let values = call.await.expect("join").expect("response");
        assert_eq!(values, json!({ "nodes": ["/rosapi"] }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_response_is_an_error() {
        let mut rig = BusRig::connected().await;
        let bus = rig.bus.clone();
        let call = tokio::spawn(async move { bus.call_service("/missing", json!({})).await });

        let Some(ClientOp::CallService { id, .. }) = rig.server.next_op().await else {
            panic!("expected a service call");
        };
        rig.server.send_raw(
            json!({ "op": "service_response", "id": id, "values": "Service /missing does not exist", "result": false })
                .to_string(),
        );

        assert_eq!(
            call.await.expect("join"),
            Err(ServiceError::Failed {
                service: "/missing".into(),
                message: "Service /missing does not exist".into(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_link_fails_pending_calls() {
        let mut rig = BusRig::connected().await;
        let bus = rig.bus.clone();
        let call = tokio::spawn(async move { bus.call_service("/rosapi/topics", json!({})).await });

        assert!(matches!(rig.server.next_op().await, Some(ClientOp::CallService { .. })));
        rig.server.close();
        assert!(rig.recorder.wait_for(ConnectionState::Disconnected).await);

        assert_eq!(
            call.await.expect("join"),
            Err(ServiceError::LinkLost {
                service: "/rosapi/topics".into()
            })
        );
        assert_eq!(rig.bus.shared().link().calls.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_call_times_out_and_is_forgotten() {
        let rig = BusRig::connected().await;

        let result = rig
            .bus
            .call_service_with_timeout("/slow", json!({}), Duration::from_secs(2))
            .await;

        assert_eq!(
            result,
            Err(ServiceError::Timeout {
                service: "/slow".into(),
                timeout: Duration::from_secs(2),
            })
        );
        assert_eq!(rig.bus.shared().link().calls.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_need_a_link() {
        let bus = BusConnection::new(ScriptedConnector::refusing(), ReconnectPolicy::default());

        assert_eq!(
            bus.call_service("/rosapi/nodes", json!({})).await,
            Err(ServiceError::NotConnected)
        );
    }
}
