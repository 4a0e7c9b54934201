//! Navigation commands - goals, QR navigation and docking

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use robodeck_protocol::{Int32Msg, Pose, PoseStamped, StringMsg, Telemetry, TelemetryTopic};
use tokio::task::JoinHandle;

use crate::application::error::CommandError;
use crate::application::services::TelemetryFeed;
use crate::infrastructure::messaging::{BusConnection, TopicChannel};

pub const GOAL_TOPIC: &str = "/goal_pose";
pub const QR_NAVIGATION_TOPIC: &str = "/navigate_to_qr";
pub const CHARGE_TOPIC: &str = "/charge_battery";
pub const GOAL_FRAME: &str = "map";
/// Time given to the robot to reach the charge QR before charging starts
pub const DEFAULT_CHARGE_DELAY: Duration = Duration::from_secs(2);

const CHARGE_COMMAND: i32 = 1;

pub struct NavigationService {
    connection: BusConnection,
    goals: TopicChannel<PoseStamped>,
    qr_targets: TopicChannel<StringMsg>,
    charge: TopicChannel<Int32Msg>,
    known_qrs: Arc<RwLock<Vec<String>>>,
    graph_watch: JoinHandle<()>,
    charge_delay: Duration,
}

impl NavigationService {
    /// Must be called within a tokio runtime: the service follows
    /// `/graph_nodes` to keep its list of known QR codes current.
    pub fn new(connection: &BusConnection) -> Self {
        let known_qrs = Arc::new(RwLock::new(Vec::new()));
        let graph = TelemetryFeed::subscribe(connection, [TelemetryTopic::GraphNodes]);
        let graph_watch = tokio::spawn(watch_graph(graph, Arc::clone(&known_qrs)));

        Self {
            connection: connection.clone(),
            goals: TopicChannel::publisher(connection, GOAL_TOPIC),
            qr_targets: TopicChannel::publisher(connection, QR_NAVIGATION_TOPIC),
            charge: TopicChannel::publisher(connection, CHARGE_TOPIC),
            known_qrs,
            graph_watch,
            charge_delay: DEFAULT_CHARGE_DELAY,
        }
    }

    pub fn with_charge_delay(mut self, delay: Duration) -> Self {
        self.charge_delay = delay;
        self
    }

    /// Replace the QR codes of the loaded navigation graph.
    ///
    /// An empty list disables validation.
    pub fn set_known_qrs(&self, codes: Vec<String>) {
        replace_known(&self.known_qrs, codes);
    }

    pub fn known_qrs(&self) -> Vec<String> {
        self.known_qrs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send a navigation goal in the map frame.
    pub fn send_goal(&self, x: f64, y: f64, theta: f64) -> Result<(), CommandError> {
        if ![x, y, theta].iter().all(|v| v.is_finite()) {
            return Err(CommandError::InvalidGoal(format!("({x}, {y}, {theta})")));
        }
        self.ensure_connected()?;

        let goal = PoseStamped::in_frame(GOAL_FRAME, Pose::planar(x, y, theta));
        sent(self.goals.publish(&goal))?;
        tracing::info!(x, y, theta, "Navigation goal sent");
        Ok(())
    }

    /// Navigate to a QR code of the navigation graph.
    pub fn navigate_to_qr(&self, code: &str) -> Result<(), CommandError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CommandError::EmptyQrCode);
        }
        {
            let known = self.known_qrs.read().unwrap_or_else(PoisonError::into_inner);
            if !known.is_empty() && !known.iter().any(|k| k == code) {
                return Err(CommandError::UnknownQrCode(code.to_string()));
            }
        }
        self.ensure_connected()?;

        sent(self.qr_targets.publish(&StringMsg::new(code)))?;
        tracing::info!(qr = code, "QR navigation started");
        Ok(())
    }

    /// Drive to the charge station QR, then start charging once the robot
    /// had time to get there.
    pub async fn dock_and_charge(&self, charge_qr: &str) -> Result<(), CommandError> {
        let charge_qr = charge_qr.trim();
        if charge_qr.is_empty() {
            return Err(CommandError::EmptyQrCode);
        }
        self.ensure_connected()?;

        sent(self.qr_targets.publish(&StringMsg::new(charge_qr)))?;
        tracing::info!(qr = charge_qr, "Navigating to charge station");

        tokio::time::sleep(self.charge_delay).await;
        sent(self.charge.publish(&Int32Msg {
            data: CHARGE_COMMAND,
        }))?;
        tracing::info!("Charging started");
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), CommandError> {
        if self.connection.is_connected() {
            Ok(())
        } else {
            Err(CommandError::NotConnected)
        }
    }
}

impl Drop for NavigationService {
    fn drop(&mut self) {
        self.graph_watch.abort();
    }
}

async fn watch_graph(mut graph: TelemetryFeed, known: Arc<RwLock<Vec<String>>>) {
    while let Some(update) = graph.next().await {
        if let Telemetry::GraphNodes(codes) = update {
            replace_known(&known, codes);
        }
    }
}

fn replace_known(known: &RwLock<Vec<String>>, codes: Vec<String>) {
    tracing::debug!(count = codes.len(), "Navigation graph nodes updated");
    *known.write().unwrap_or_else(PoisonError::into_inner) = codes;
}

fn sent(published: bool) -> Result<(), CommandError> {
    if published {
        Ok(())
    } else {
        Err(CommandError::NotConnected)
    }
}
