//! Topic registrations known to the bus.
//!
//! The bus keeps every live advertise/subscribe here so it can route inbound
//! publishes and re-register everything on a fresh link.

use robodeck_protocol::{registration_id, ClientOp};
use serde_json::Value;
use tokio::sync::mpsc;

use super::connection::TransportHandle;

/// Inbound messages buffered per subscriber before new ones are dropped.
pub(crate) const SUBSCRIBER_BUFFER: usize = 64;

/// Which way messages flow on a topic channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Outbound: the topic is advertised and published to
    Publish,
    /// Inbound: the topic is subscribed to
    Subscribe,
}

impl Direction {
    fn register_op(self) -> &'static str {
        match self {
            Direction::Publish => "advertise",
            Direction::Subscribe => "subscribe",
        }
    }
}

pub(crate) struct Registration {
    pub(crate) id: String,
    pub(crate) topic: String,
    pub(crate) msg_type: String,
    pub(crate) direction: Direction,
    pub(crate) sink: Option<mpsc::Sender<Value>>,
    pub(crate) lagging: bool,
}

impl Registration {
    pub(crate) fn register_op(&self) -> ClientOp {
        match self.direction {
            Direction::Publish => ClientOp::Advertise {
                id: self.id.clone(),
                topic: self.topic.clone(),
                msg_type: self.msg_type.clone(),
            },
            Direction::Subscribe => ClientOp::Subscribe {
                id: self.id.clone(),
                topic: self.topic.clone(),
                msg_type: self.msg_type.clone(),
            },
        }
    }

    pub(crate) fn unregister_op(&self) -> ClientOp {
        match self.direction {
            Direction::Publish => ClientOp::Unadvertise {
                id: self.id.clone(),
                topic: self.topic.clone(),
            },
            Direction::Subscribe => ClientOp::Unsubscribe {
                id: self.id.clone(),
                topic: self.topic.clone(),
            },
        }
    }
}

#[derive(Default)]
pub(crate) struct TopicRegistry {
    sequence: u64,
    entries: Vec<Registration>,
}

impl TopicRegistry {
    pub(crate) fn next_id(&mut self, direction: Direction, topic: &str) -> String {
        self.sequence += 1;
        registration_id(direction.register_op(), topic, self.sequence)
    }

    pub(crate) fn insert(&mut self, registration: Registration) {
        self.entries.push(registration);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<Registration> {
        let index = self.entries.iter().position(|r| r.id == id)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Send every registration over `handle`, in creation order.
    pub(crate) fn replay(&self, handle: &TransportHandle) -> usize {
        self.entries
            .iter()
            .filter(|r| handle.send(&r.register_op()))
            .count()
    }

    /// Hand an inbound message to every subscriber of `topic`.
    ///
    /// A subscriber whose buffer is full misses the message; the bus never
    /// waits for a slow reader.
    pub(crate) fn deliver(&mut self, topic: &str, msg: &Value) -> usize {
        let mut delivered = 0;
        for registration in self.entries.iter_mut().filter(|r| r.topic == topic) {
            let Some(sink) = registration.sink.as_ref() else {
                continue;
            };
            match sink.try_send(msg.clone()) {
                Ok(()) => {
                    if registration.lagging {
                        tracing::debug!(%topic, id = %registration.id, "Subscriber caught up");
                        registration.lagging = false;
                    }
                    delivered += 1;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    if !registration.lagging {
                        tracing::warn!(%topic, id = %registration.id, "Subscriber not keeping up, dropping messages");
                        registration.lagging = true;
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscription(
        registry: &mut TopicRegistry,
        topic: &str,
    ) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = registry.next_id(Direction::Subscribe, topic);
        registry.insert(Registration {
            id,
            topic: topic.to_string(),
            msg_type: "sensor_msgs/BatteryState".to_string(),
            direction: Direction::Subscribe,
            sink: Some(tx),
            lagging: false,
        });
        rx
    }

    #[test]
    fn ids_are_unique_per_registration() {
        let mut registry = TopicRegistry::default();
        let first = registry.next_id(Direction::Publish, "/cmd_vel");
        let second = registry.next_id(Direction::Publish, "/cmd_vel");

        assert_eq!(first, "advertise:/cmd_vel:1");
        assert_ne!(first, second);
    }

    #[test]
    fn deliver_reaches_only_matching_topic() {
        let mut registry = TopicRegistry::default();
        let mut battery = subscription(&mut registry, "/battery_data");
        let mut pose = subscription(&mut registry, "/robot_pose");

        let delivered = registry.deliver("/battery_data", &json!({ "percentage": 0.5 }));

        assert_eq!(delivered, 1);
        assert_eq!(battery.try_recv().expect("message"), json!({ "percentage": 0.5 }));
        assert!(pose.try_recv().is_err());
    }

    #[test]
    fn full_subscriber_drops_instead_of_growing() {
        let mut registry = TopicRegistry::default();
        let mut slow = subscription(&mut registry, "/rosout");

        let delivered: usize = (0..SUBSCRIBER_BUFFER + 10)
            .map(|n| registry.deliver("/rosout", &json!({ "n": n })))
            .sum();
        assert_eq!(delivered, SUBSCRIBER_BUFFER);

        // Oldest messages are kept, the overflow is gone
        assert_eq!(slow.try_recv().expect("first"), json!({ "n": 0 }));
        assert_eq!(registry.deliver("/rosout", &json!({ "n": "late" })), 1);
        let rest: Vec<Value> = std::iter::from_fn(|| slow.try_recv().ok()).collect();
        assert_eq!(rest.len(), SUBSCRIBER_BUFFER);
        assert_eq!(rest.last(), Some(&json!({ "n": "late" })));
    }

    #[test]
    fn removed_registration_is_not_replayed() {
        let mut registry = TopicRegistry::default();
        let _battery = subscription(&mut registry, "/battery_data");
        let _pose = subscription(&mut registry, "/robot_pose");
        let removed = registry.remove("subscribe:/battery_data:1").expect("registered");

        assert_eq!(removed.topic, "/battery_data");
        assert_eq!(registry.len(), 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TransportHandle::new(1, tx);
        assert_eq!(registry.replay(&handle), 1);

        let frame = rx.try_recv().expect("replayed frame");
        assert!(frame.contains("\"topic\":\"/robot_pose\""));
        assert!(frame.contains("\"op\":\"subscribe\""));
    }

    #[test]
    fn unregister_op_mirrors_direction() {
        let registration = Registration {
            id: "advertise:/cmd_vel:1".into(),
            topic: "/cmd_vel".into(),
            msg_type: "geometry_msgs/Twist".into(),
            direction: Direction::Publish,
            sink: None,
            lagging: false,
        };

        assert!(matches!(registration.register_op(), ClientOp::Advertise { .. }));
        assert!(matches!(registration.unregister_op(), ClientOp::Unadvertise { .. }));
    }
}
