//! Telemetry feed - typed stream of everything the robot reports

use std::pin::Pin;

use futures_util::stream::{self, SelectAll, Stream, StreamExt};
use robodeck_protocol::{Telemetry, TelemetryTopic};
use serde_json::Value;

use crate::infrastructure::messaging::{BusConnection, Direction, TopicBinding};

type TaggedStream = Pin<Box<dyn Stream<Item = (TelemetryTopic, Value)> + Send>>;

/// Subscriptions to a set of telemetry topics, merged into one stream.
///
/// Messages from the same topic arrive in order; across topics no order is
/// guaranteed. Dropping the feed unsubscribes every topic.
pub struct TelemetryFeed {
    bindings: Vec<(TelemetryTopic, TopicBinding)>,
    inbound: SelectAll<TaggedStream>,
}

impl TelemetryFeed {
    /// Subscribe to `topics` under their default names.
    pub fn subscribe(
        connection: &BusConnection,
        topics: impl IntoIterator<Item = TelemetryTopic>,
    ) -> Self {
        Self::subscribe_named(
            connection,
            topics
                .into_iter()
                .map(|topic| (topic, topic.default_name().to_string())),
        )
    }

    /// Subscribe to the whole catalogue.
    pub fn all(connection: &BusConnection) -> Self {
        Self::subscribe(connection, TelemetryTopic::ALL)
    }

    /// Subscribe to topic kinds published under non-default names.
    pub fn subscribe_named(
        connection: &BusConnection,
        topics: impl IntoIterator<Item = (TelemetryTopic, String)>,
    ) -> Self {
        let mut bindings = Vec::new();
        let mut inbound = SelectAll::new();

        for (kind, name) in topics {
            let (binding, rx) =
                TopicBinding::open(connection, name, kind.message_type(), Direction::Subscribe);
            if let Some(rx) = rx {
                let tagged = stream::unfold(rx, move |mut rx| async move {
                    rx.recv().await.map(|msg| ((kind, msg), rx))
                });
                inbound.push(Box::pin(tagged) as TaggedStream);
            }
            bindings.push((kind, binding));
        }

        tracing::debug!(topics = bindings.len(), "Telemetry feed subscribed");
        Self { bindings, inbound }
    }

    pub fn topics(&self) -> Vec<TelemetryTopic> {
        self.bindings.iter().map(|(kind, _)| *kind).collect()
    }

    /// Next decoded message.
    ///
    /// Malformed payloads are logged and skipped. Returns `None` once every
    /// subscription has ended.
    pub async fn next(&mut self) -> Option<Telemetry> {
        loop {
            let (kind, msg) = self.inbound.next().await?;
            match Telemetry::decode(kind, msg) {
                Ok(telemetry) => return Some(telemetry),
                Err(e) => tracing::warn!(topic = ?kind, error = %e, "Dropping malformed telemetry"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::testing::BusRig;
    use robodeck_protocol::{ClientOp, MissionState};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn subscribes_with_catalogue_types() {
        let mut rig = BusRig::connected().await;
        let _feed = TelemetryFeed::subscribe(
            &rig.bus,
            [TelemetryTopic::Battery, TelemetryTopic::MissionStatus],
        );

        let ops = rig.server.drain_ops();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], ClientOp::Subscribe { topic, msg_type, .. }
            if topic == "/battery_data" && msg_type == "sensor_msgs/BatteryState"));
        assert!(matches!(&ops[1], ClientOp::Subscribe { topic, msg_type, .. }
            if topic == "/mission_status" && msg_type == "std_msgs/String"));
    }

    #[tokio::test(start_paused = true)]
    async fn decodes_tagged_messages_and_skips_garbage() {
        let rig = BusRig::connected().await;
        let mut feed = TelemetryFeed::subscribe(
            &rig.bus,
            [TelemetryTopic::RobotState, TelemetryTopic::MissionStatus],
        );

        rig.server.publish("/mission_status", json!({ "data": "{not json" }));
        rig.server.publish(
            "/mission_status",
            json!({ "data": r#"{"id":"m-1","progress":40.0,"state":"ACTIVE"}"# }),
        );

        match feed.next().await {
            Some(Telemetry::MissionStatus(status)) => {
                assert_eq!(status.id, "m-1");
                assert_eq!(status.state, MissionState::Active);
            }
            other => panic!("expected mission status, got {other:?}"),
        }

        rig.server.publish("/robot_state", json!({ "data": "IDLE" }));
        assert_eq!(
            feed.next().await,
            Some(Telemetry::RobotState("IDLE".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn custom_names_are_honoured() {
        let rig = BusRig::connected().await;
        let mut feed = TelemetryFeed::subscribe_named(
            &rig.bus,
            [(TelemetryTopic::GraphNodes, "/fleet/graph".to_string())],
        );

        rig.server.publish("/fleet/graph", json!({ "data": r#"["QR_1","QR_2"]"# }));

        assert_eq!(
            feed.next().await,
            Some(Telemetry::GraphNodes(vec!["QR_1".into(), "QR_2".into()]))
        );
        assert_eq!(feed.topics(), vec![TelemetryTopic::GraphNodes]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_feed_unsubscribes() {
        let mut rig = BusRig::connected().await;
        let feed = TelemetryFeed::subscribe(&rig.bus, [TelemetryTopic::Log]);
        drop(feed);

        let ops = rig.server.drain_ops();
        assert!(matches!(&ops[..], [ClientOp::Subscribe { .. }, ClientOp::Unsubscribe { topic, .. }]
            if topic == "/rosout"));
    }
}
