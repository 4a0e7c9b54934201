//! Topic channels - typed publish/subscribe endpoints on the bus.

use std::marker::PhantomData;

use robodeck_protocol::{ClientOp, RosMessage};
use serde_json::Value;
use tokio::sync::mpsc;

use super::connection::BusConnection;
use super::registry::{Direction, Registration, SUBSCRIBER_BUFFER};

/// Untyped registration of one topic on the bus.
///
/// Registers under the link lock: if the bus is up the register op goes out
/// immediately, otherwise it is sent when the next link opens. Dropping the
/// binding disposes it.
pub(crate) struct TopicBinding {
    connection: BusConnection,
    id: String,
    topic: String,
    direction: Direction,
    disposed: bool,
}

impl TopicBinding {
    pub(crate) fn open(
        connection: &BusConnection,
        topic: String,
        msg_type: &str,
        direction: Direction,
    ) -> (Self, Option<mpsc::Receiver<Value>>) {
        let (sink, inbound) = match direction {
            Direction::Subscribe => {
                let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
                (Some(tx), Some(rx))
            }
            Direction::Publish => (None, None),
        };

        let id = {
            let mut slot = connection.shared().link();
            let id = slot.registry.next_id(direction, &topic);
            let registration = Registration {
                id: id.clone(),
                topic: topic.clone(),
                msg_type: msg_type.to_string(),
                direction,
                sink,
                lagging: false,
            };
            match slot.handle.as_ref() {
                Some(handle) => {
                    handle.send(&registration.register_op());
                }
                None => tracing::debug!(%topic, "Bus not connected, registration deferred"),
            }
            slot.registry.insert(registration);
            id
        };

        let binding = Self {
            connection: connection.clone(),
            id,
            topic,
            direction,
            disposed: false,
        };
        (binding, inbound)
    }

    pub(crate) fn topic(&self) -> &str {
        &self.topic
    }

    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub(crate) fn publish_value(&self, msg: Value) -> bool {
        if self.disposed {
            return false;
        }
        let Some(handle) = self.connection.current_handle() else {
            tracing::trace!(topic = %self.topic, "Bus not connected, publish dropped");
            return false;
        };
        handle.send(&ClientOp::Publish {
            id: None,
            topic: self.topic.clone(),
            msg,
        })
    }

    pub(crate) fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let mut slot = self.connection.shared().link();
        let Some(registration) = slot.registry.remove(&self.id) else {
            return;
        };
        if let Some(handle) = slot.handle.as_ref() {
            handle.send(&registration.unregister_op());
        }
    }
}

impl Drop for TopicBinding {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Typed endpoint for one topic.
///
/// A publisher advertises the topic, a subscriber subscribes to it. Both
/// survive reconnects: the bus re-registers them on every new link.
pub struct TopicChannel<M: RosMessage> {
    binding: TopicBinding,
    inbound: Option<mpsc::Receiver<Value>>,
    _message: PhantomData<fn() -> M>,
}

impl<M: RosMessage> TopicChannel<M> {
    pub fn new(connection: &BusConnection, topic: impl Into<String>, direction: Direction) -> Self {
        let (binding, inbound) = TopicBinding::open(connection, topic.into(), M::TYPE, direction);
        Self {
            binding,
            inbound,
            _message: PhantomData,
        }
    }

    /// Advertise `topic` for publishing.
    pub fn publisher(connection: &BusConnection, topic: impl Into<String>) -> Self {
        Self::new(connection, topic, Direction::Publish)
    }

    /// Subscribe to `topic`.
    pub fn subscriber(connection: &BusConnection, topic: impl Into<String>) -> Self {
        Self::new(connection, topic, Direction::Subscribe)
    }

    pub fn topic(&self) -> &str {
        self.binding.topic()
    }

    pub fn direction(&self) -> Direction {
        self.binding.direction()
    }

    pub fn is_disposed(&self) -> bool {
        self.binding.is_disposed()
    }

    /// Publish one message.
    ///
    /// Returns false without touching the transport when the bus is not
    /// connected. Messages are never queued for a later link.
    pub fn publish(&self, message: &M) -> bool {
        if self.binding.direction() != Direction::Publish {
            tracing::warn!(topic = %self.topic(), "Publish on a subscriber channel ignored");
            return false;
        }
        match serde_json::to_value(message) {
            Ok(msg) => self.binding.publish_value(msg),
            Err(e) => {
                tracing::warn!(topic = %self.topic(), error = %e, "Failed to encode {}", M::TYPE);
                false
            }
        }
    }

    /// Next message received on the topic.
    ///
    /// Malformed payloads are logged and skipped. Returns `None` once the
    /// channel is disposed or for publisher channels.
    pub async fn recv(&mut self) -> Option<M> {
        let inbound = self.inbound.as_mut()?;
        loop {
            let value = inbound.recv().await?;
            match serde_json::from_value::<M>(value) {
                Ok(message) => return Some(message),
                Err(e) => tracing::warn!(
                    topic = %self.binding.topic(),
                    error = %e,
                    "Dropping malformed {} message",
                    M::TYPE
                ),
            }
        }
    }

    /// Unregister from the bus. Idempotent.
    pub fn dispose(&mut self) {
        self.binding.dispose();
        self.inbound = None;
    }
}

impl<M: RosMessage> std::fmt::Debug for TopicChannel<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicChannel")
            .field("topic", &self.topic())
            .field("type", &M::TYPE)
            .field("direction", &self.direction())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
