//! Typed telemetry catalogue
//!
//! Every inbound topic the console understands has one [`TelemetryTopic`]
//! kind and decodes into exactly one [`Telemetry`] variant, so consumers get
//! exhaustive matching instead of poking at untyped JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::messages::{
    BatteryState, DiagnosticArray, Log, PoseStamped, RosMessage, StringMsg, Twist,
};
use crate::vda5050::{Order, VdaStatus};

/// Inbound topic kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryTopic {
    Battery,
    Pose,
    RobotState,
    /// Echo of the velocity commands actually applied
    Velocity,
    MissionStatus,
    Diagnostics,
    Log,
    MissionQueue,
    /// QR codes known to the navigation graph
    GraphNodes,
    VdaStatus,
    VdaOrder,
}

impl TelemetryTopic {
    pub const ALL: [TelemetryTopic; 11] = [
        TelemetryTopic::Battery,
        TelemetryTopic::Pose,
        TelemetryTopic::RobotState,
        TelemetryTopic::Velocity,
        TelemetryTopic::MissionStatus,
        TelemetryTopic::Diagnostics,
        TelemetryTopic::Log,
        TelemetryTopic::MissionQueue,
        TelemetryTopic::GraphNodes,
        TelemetryTopic::VdaStatus,
        TelemetryTopic::VdaOrder,
    ];

    /// Topic name used by the robot's default launch configuration.
    pub fn default_name(&self) -> &'static str {
        match self {
            TelemetryTopic::Battery => "/battery_data",
            TelemetryTopic::Pose => "/robot_pose",
            TelemetryTopic::RobotState => "/robot_state",
            TelemetryTopic::Velocity => "/cmd_vel",
            TelemetryTopic::MissionStatus => "/mission_status",
            TelemetryTopic::Diagnostics => "/diagnostics",
            TelemetryTopic::Log => "/rosout",
            TelemetryTopic::MissionQueue => "/mission_queue",
            TelemetryTopic::GraphNodes => "/graph_nodes",
            TelemetryTopic::VdaStatus => "/vda5050/status",
            TelemetryTopic::VdaOrder => "/vda5050/order",
        }
    }

    /// ROS type carried on the wire.
    pub fn message_type(&self) -> &'static str {
        match self {
            TelemetryTopic::Battery => BatteryState::TYPE,
            TelemetryTopic::Pose => PoseStamped::TYPE,
            TelemetryTopic::Velocity => Twist::TYPE,
            TelemetryTopic::Diagnostics => DiagnosticArray::TYPE,
            TelemetryTopic::Log => Log::TYPE,
            TelemetryTopic::RobotState
            | TelemetryTopic::MissionStatus
            | TelemetryTopic::MissionQueue
            | TelemetryTopic::GraphNodes
            | TelemetryTopic::VdaStatus
            | TelemetryTopic::VdaOrder => StringMsg::TYPE,
        }
    }
}

/// Lifecycle state of a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MissionState {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// Progress report for the mission being executed (`/mission_status`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionStatus {
    pub id: String,
    #[serde(default)]
    pub progress: f64,
    pub state: MissionState,
}

/// One entry of the mission queue (`/mission_queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub priority: i32,
    pub status: MissionState,
    #[serde(default)]
    pub progress: f64,
}

/// One decoded inbound message, tagged by topic kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Battery(BatteryState),
    Pose(PoseStamped),
    RobotState(String),
    Velocity(Twist),
    MissionStatus(MissionStatus),
    Diagnostics(DiagnosticArray),
    Log(Log),
    MissionQueue(Vec<Mission>),
    GraphNodes(Vec<String>),
    VdaStatus(VdaStatus),
    VdaOrder(Order),
}

impl Telemetry {
    /// Decode a rosbridge `msg` body received on a topic of the given kind.
    pub fn decode(topic: TelemetryTopic, msg: Value) -> Result<Self, ProtocolError> {
        let name = topic.default_name();
        Ok(match topic {
            TelemetryTopic::Battery => Telemetry::Battery(from_msg(name, msg)?),
            TelemetryTopic::Pose => Telemetry::Pose(from_msg(name, msg)?),
            TelemetryTopic::RobotState => {
                Telemetry::RobotState(from_msg::<StringMsg>(name, msg)?.data)
            }
            TelemetryTopic::Velocity => Telemetry::Velocity(from_msg(name, msg)?),
            TelemetryTopic::MissionStatus => Telemetry::MissionStatus(embedded(name, msg)?),
            TelemetryTopic::Diagnostics => Telemetry::Diagnostics(from_msg(name, msg)?),
            TelemetryTopic::Log => Telemetry::Log(from_msg(name, msg)?),
            TelemetryTopic::MissionQueue => Telemetry::MissionQueue(embedded(name, msg)?),
            TelemetryTopic::GraphNodes => Telemetry::GraphNodes(embedded(name, msg)?),
            TelemetryTopic::VdaStatus => Telemetry::VdaStatus(embedded(name, msg)?),
            TelemetryTopic::VdaOrder => Telemetry::VdaOrder(embedded(name, msg)?),
        })
    }

    pub fn topic(&self) -> TelemetryTopic {
        match self {
            Telemetry::Battery(_) => TelemetryTopic::Battery,
            Telemetry::Pose(_) => TelemetryTopic::Pose,
            Telemetry::RobotState(_) => TelemetryTopic::RobotState,
            Telemetry::Velocity(_) => TelemetryTopic::Velocity,
            Telemetry::MissionStatus(_) => TelemetryTopic::MissionStatus,
            Telemetry::Diagnostics(_) => TelemetryTopic::Diagnostics,
            Telemetry::Log(_) => TelemetryTopic::Log,
            Telemetry::MissionQueue(_) => TelemetryTopic::MissionQueue,
            Telemetry::GraphNodes(_) => TelemetryTopic::GraphNodes,
            Telemetry::VdaStatus(_) => TelemetryTopic::VdaStatus,
            Telemetry::VdaOrder(_) => TelemetryTopic::VdaOrder,
        }
    }
}

fn from_msg<T: DeserializeOwned>(topic: &str, msg: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(msg).map_err(|source| ProtocolError::MalformedPayload {
        topic: topic.to_string(),
        source,
    })
}

/// Decode JSON text carried inside a `std_msgs/String`.
fn embedded<T: DeserializeOwned>(topic: &str, msg: Value) -> Result<T, ProtocolError> {
    let text: StringMsg = from_msg(topic, msg)?;
    serde_json::from_str(&text.data).map_err(|source| ProtocolError::MalformedEmbeddedJson {
        topic: topic.to_string(),
        source,
    })
}
