//! Velocity controller - teleoperation command stream
//!
//! Runs as one task owning the `/cmd_vel` publisher, the input state and the
//! publish cadence. Handle methods only post events to it, so input is
//! applied in the order it arrives and commands leave in the order they are
//! computed.
//!
//! Fail-safes:
//! - releasing the last key, lifting the pointer or pressing stop publishes
//!   zero immediately
//! - losing the bus connection drops all held input
//! - shutting the controller down (or dropping it) publishes zero

use std::time::Duration;

use robodeck_protocol::Twist;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use crate::application::input::{DriveInput, DriveKey, PointerVector, SpeedLimits, VelocityCommand};
use crate::infrastructure::messaging::{BusConnection, ConnectionState, StatusSubscription, TopicChannel};

pub const DEFAULT_COMMAND_TOPIC: &str = "/cmd_vel";
pub const DEFAULT_CADENCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub topic: String,
    /// Interval between repeated publishes while keys are held
    pub cadence: Duration,
    pub limits: SpeedLimits,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_COMMAND_TOPIC.to_string(),
            cadence: DEFAULT_CADENCE,
            limits: SpeedLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ControlEvent {
    KeyDown(DriveKey),
    KeyUp(DriveKey),
    PointerDown,
    PointerMove(PointerVector),
    PointerUp,
    ReleaseAll,
    Brake(bool),
    LinkLost,
    Shutdown,
}

/// Handle to the running controller.
///
/// One per console, owned by the shell. Dropping it stops the robot and
/// withdraws the command topic.
pub struct VelocityController {
    events: mpsc::UnboundedSender<ControlEvent>,
    task: Option<JoinHandle<()>>,
    _link_watch: StatusSubscription,
}

impl VelocityController {
    /// Start the controller on `connection`. Must be called within a tokio runtime.
    pub fn spawn(connection: &BusConnection, config: ControllerConfig) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();

        let link_events = events.clone();
        let link_watch = connection.on_status_change(move |state| {
            if state != ConnectionState::Connected {
                let _ = link_events.send(ControlEvent::LinkLost);
            }
        });

        let channel = TopicChannel::<Twist>::publisher(connection, config.topic.clone());
        let task = tokio::spawn(
            ControlLoop {
                channel,
                input: DriveInput::new(),
                ticker: None,
                cadence: config.cadence,
                limits: config.limits,
            }
            .run(events_rx),
        );

        Self {
            events,
            task: Some(task),
            _link_watch: link_watch,
        }
    }

    /// Keyboard key pressed. Returns false for keys the controller ignores.
    pub fn key_down(&self, key: &str) -> bool {
        match DriveKey::from_key(key) {
            Some(key) => {
                self.press(key);
                true
            }
            None => false,
        }
    }

    /// Keyboard key released. Returns false for keys the controller ignores.
    pub fn key_up(&self, key: &str) -> bool {
        match DriveKey::from_key(key) {
            Some(key) if key.is_direction() => {
                self.release(key);
                true
            }
            _ => false,
        }
    }

    pub fn press(&self, key: DriveKey) {
        self.post(ControlEvent::KeyDown(key));
    }

    pub fn release(&self, key: DriveKey) {
        self.post(ControlEvent::KeyUp(key));
    }

    pub fn pointer_down(&self) {
        self.post(ControlEvent::PointerDown);
    }

    /// Joystick moved to `vector` (unit radius, screen axes).
    pub fn pointer_move(&self, vector: PointerVector) {
        self.post(ControlEvent::PointerMove(vector));
    }

    pub fn pointer_up(&self) {
        self.post(ControlEvent::PointerUp);
    }

    /// Release every input and publish zero.
    pub fn stop(&self) {
        self.post(ControlEvent::ReleaseAll);
    }

    pub fn set_brake(&self, engaged: bool) {
        self.post(ControlEvent::Brake(engaged));
    }

    /// Stop the robot, withdraw the topic and wait for the task to finish.
    pub async fn shutdown(mut self) {
        self.post(ControlEvent::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Velocity controller task failed");
            }
        }
    }

    fn post(&self, event: ControlEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!(?event, "Velocity controller is not running");
        }
    }
}

impl Drop for VelocityController {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.events.send(ControlEvent::Shutdown);
        }
    }
}

struct ControlLoop {
    channel: TopicChannel<Twist>,
    input: DriveInput,
    ticker: Option<Interval>,
    cadence: Duration,
    limits: SpeedLimits,
}

impl ControlLoop {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControlEvent>) {
        loop {
            tokio::select! {
                // Input first: a tick must see every event posted before it
                biased;
                event = events.recv() => match event {
                    Some(ControlEvent::Shutdown) | None => break,
                    Some(event) => self.apply(event),
                },
                () = next_tick(&mut self.ticker) => {
                    let command = self.input.current();
                    self.publish(command);
                }
            }
        }

        self.ticker = None;
        self.publish(VelocityCommand::STOP);
        self.channel.dispose();
        tracing::debug!("Velocity controller stopped");
    }

    fn apply(&mut self, event: ControlEvent) {
        let immediate = match event {
            ControlEvent::KeyDown(key) => self.input.key_down(key),
            ControlEvent::KeyUp(key) => self.input.key_up(key),
            ControlEvent::PointerDown => self.input.pointer_down(),
            ControlEvent::PointerMove(vector) => self.input.pointer_move(vector),
            ControlEvent::PointerUp => self.input.pointer_up(),
            ControlEvent::ReleaseAll => {
                self.input.release_all();
                Some(VelocityCommand::STOP)
            }
            ControlEvent::Brake(engaged) => {
                tracing::info!(engaged, "Brake toggled");
                self.input.set_brake(engaged)
            }
            ControlEvent::LinkLost => {
                let released = self.input.release_all();
                if released.is_some() {
                    tracing::warn!("Bus connection lost, input released");
                }
                released
            }
            ControlEvent::Shutdown => None,
        };

        self.sync_ticker();
        if let Some(command) = immediate {
            self.publish(command);
        }
    }

    fn sync_ticker(&mut self) {
        match (self.input.looping(), self.ticker.is_some()) {
            (true, false) => {
                // First tick completes immediately
                let mut ticker = tokio::time::interval(self.cadence);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
            }
            (false, true) => self.ticker = None,
            _ => {}
        }
    }

    fn publish(&self, command: VelocityCommand) {
        let twist = command.scaled(&self.limits);
        if !self.channel.publish(&twist) {
            tracing::trace!(?command, "Velocity command not sent");
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::testing::{BusRig, ServerEnd};
    use robodeck_protocol::ClientOp;

    /// Velocity publishes seen by the server, as (linear.x, angular.z).
    fn published(server: &mut ServerEnd) -> Vec<(f64, f64)> {
        server
            .drain_ops()
            .into_iter()
            .filter_map(|op| match op {
                ClientOp::Publish { msg, .. } => {
                    let twist: Twist = serde_json::from_value(msg).expect("twist");
                    Some((twist.linear_x(), twist.angular_z()))
                }
                _ => None,
            })
            .collect()
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn held_keys_stream_until_release() {
        let mut rig = BusRig::connected().await;
        let controller = VelocityController::spawn(&rig.bus, ControllerConfig::default());

        controller.press(DriveKey::Forward);
        advance(50).await;
        controller.press(DriveKey::Left);
        advance(100).await;
        controller.release(DriveKey::Forward);
        advance(100).await;
        controller.release(DriveKey::Left);
        advance(1).await;

        assert_eq!(
            published(&mut rig.server),
            vec![(1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn release_publishes_one_zero_then_goes_quiet() {
        let mut rig = BusRig::connected().await;
        let controller = VelocityController::spawn(&rig.bus, ControllerConfig::default());

        controller.press(DriveKey::Forward);
        advance(250).await;
        controller.release(DriveKey::Forward);
        advance(1_000).await;

        let sent = published(&mut rig.server);
        assert_eq!(sent, vec![(1.0, 0.0), (1.0, 0.0), (1.0, 0.0), (0.0, 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn keyboard_keys_map_to_drive_keys() {
        let mut rig = BusRig::connected().await;
        let controller = VelocityController::spawn(&rig.bus, ControllerConfig::default());

        assert!(controller.key_down("S"));
        assert!(!controller.key_down("x"));
        assert!(!controller.key_up(" "));
        advance(1).await;
        assert!(controller.key_up("s"));
        advance(1).await;

        assert_eq!(published(&mut rig.server), vec![(-1.0, 0.0), (0.0, 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_key_halts_immediately() {
        let mut rig = BusRig::connected().await;
        let controller = VelocityController::spawn(&rig.bus, ControllerConfig::default());

        controller.key_down("d");
        advance(1).await;
        controller.key_down(" ");
        advance(1_000).await;

        assert_eq!(published(&mut rig.server), vec![(0.0, -1.0), (0.0, 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn pointer_publishes_clamped_vectors_immediately() {
        let mut rig = BusRig::connected().await;
        let controller = VelocityController::spawn(&rig.bus, ControllerConfig::default());

        controller.pointer_move(PointerVector::new(0.0, -1.0));
        controller.pointer_down();
        controller.pointer_move(PointerVector::new(3.0, 4.0));
        controller.pointer_up();
        advance(1_000).await;

        let sent = published(&mut rig.server);
        assert_eq!(sent.len(), 2);
        assert!((sent[0].0 + 0.8).abs() < 1e-12);
        assert!((sent[0].1 + 0.6).abs() < 1e-12);
        assert_eq!(sent[1], (0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn non_finite_pointer_publishes_zero() {
        let mut rig = BusRig::connected().await;
        let controller = VelocityController::spawn(&rig.bus, ControllerConfig::default());

        controller.pointer_down();
        controller.pointer_move(PointerVector::new(f64::NAN, 0.5));
        advance(1).await;

        assert_eq!(published(&mut rig.server), vec![(0.0, 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn brake_blocks_motion_until_released() {
        let mut rig = BusRig::connected().await;
        let controller = VelocityController::spawn(&rig.bus, ControllerConfig::default());

        controller.press(DriveKey::Forward);
        advance(1).await;
        controller.set_brake(true);
        controller.press(DriveKey::Forward);
        controller.pointer_down();
        controller.pointer_move(PointerVector::new(0.0, -1.0));
        advance(1_000).await;
        assert_eq!(published(&mut rig.server), vec![(1.0, 0.0), (0.0, 0.0)]);

        controller.set_brake(false);
        controller.press(DriveKey::Forward);
        advance(1).await;
        assert_eq!(published(&mut rig.server), vec![(1.0, 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_link_releases_input() {
        let mut rig = BusRig::connected().await;
        let controller = VelocityController::spawn(&rig.bus, ControllerConfig::default());

        controller.press(DriveKey::Forward);
        advance(1).await;
        assert_eq!(published(&mut rig.server), vec![(1.0, 0.0)]);

        rig.server.close();
        assert!(rig.recorder.wait_for(ConnectionState::Disconnected).await);
        assert!(rig.recorder.wait_for(ConnectionState::Connected).await);
        let mut second = rig.connector.next_server().await;
        advance(1_000).await;

        // Only the replayed advertise: the held key did not survive the drop
        let ops = second.drain_ops();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], ClientOp::Advertise { topic, .. } if topic == "/cmd_vel"));
        drop(controller);
    }

    #[tokio::test(start_paused = true)]
    async fn limits_scale_published_speeds() {
        let mut rig = BusRig::connected().await;
        let config = ControllerConfig {
            limits: SpeedLimits {
                max_linear: 0.5,
                max_angular: 2.0,
            },
            ..ControllerConfig::default()
        };
        let controller = VelocityController::spawn(&rig.bus, config);

        controller.press(DriveKey::Forward);
        controller.press(DriveKey::Right);
        advance(1).await;

        assert_eq!(published(&mut rig.server), vec![(0.5, -2.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_and_withdraws_topic() {
        let mut rig = BusRig::connected().await;
        let controller = VelocityController::spawn(&rig.bus, ControllerConfig::default());

        controller.press(DriveKey::Forward);
        advance(1).await;
        controller.shutdown().await;

        let ops = rig.server.drain_ops();
        let kinds: Vec<&str> = ops
            .iter()
            .map(|op| match op {
                ClientOp::Advertise { .. } => "advertise",
                ClientOp::Publish { .. } => "publish",
                ClientOp::Unadvertise { .. } => "unadvertise",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["advertise", "publish", "publish", "unadvertise"]);
        match &ops[2] {
            ClientOp::Publish { msg, .. } => {
                let twist: Twist = serde_json::from_value(msg.clone()).expect("twist");
                assert_eq!(twist, Twist::planar(0.0, 0.0));
            }
            other => panic!("expected publish, got {other:?}"),
        }
    }
}
