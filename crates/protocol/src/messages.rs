//! ROS message types exchanged with the robot
//!
//! Field names follow the ROS 2 message definitions so the structs serialize
//! straight into rosbridge `msg` bodies. Only the types the console actually
//! publishes or consumes are modelled here.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// A ROS message type that can travel in a rosbridge `msg` body.
pub trait RosMessage: Serialize + DeserializeOwned + Send + 'static {
    /// Fully qualified ROS type name, e.g. `geometry_msgs/Twist`.
    const TYPE: &'static str;
}

/// rosbridge encodes NaN as `null`; map it back so numeric fields stay numeric.
fn nullable_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

// =============================================================================
// geometry_msgs
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// `geometry_msgs/Twist`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    pub linear: Vector3,
    pub angular: Vector3,
}

impl Twist {
    /// A ground-robot twist: only forward speed and yaw rate are populated.
    pub fn planar(linear_x: f64, angular_z: f64) -> Self {
        Self {
            linear: Vector3 {
                x: linear_x,
                ..Vector3::default()
            },
            angular: Vector3 {
                z: angular_z,
                ..Vector3::default()
            },
        }
    }

    pub fn linear_x(&self) -> f64 {
        self.linear.x
    }

    pub fn angular_z(&self) -> f64 {
        self.angular.z
    }
}

impl RosMessage for Twist {
    const TYPE: &'static str = "geometry_msgs/Twist";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

impl Pose {
    /// Planar pose in the robot's convention: the heading rides in
    /// `orientation.z` with `w` fixed at 1.
    pub fn planar(x: f64, y: f64, theta: f64) -> Self {
        Self {
            position: Point { x, y, z: 0.0 },
            orientation: Quaternion {
                x: 0.0,
                y: 0.0,
                z: theta,
                w: 1.0,
            },
        }
    }

    /// Heading as reported by the robot (see [`Pose::planar`]).
    pub fn heading(&self) -> f64 {
        self.orientation.z
    }
}

/// `builtin_interfaces/Time`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    #[serde(default)]
    pub sec: i32,
    #[serde(default)]
    pub nanosec: u32,
}

/// `std_msgs/Header`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub stamp: Time,
    #[serde(default)]
    pub frame_id: String,
}

/// `geometry_msgs/PoseStamped`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseStamped {
    #[serde(default)]
    pub header: Header,
    pub pose: Pose,
}

impl PoseStamped {
    pub fn in_frame(frame_id: impl Into<String>, pose: Pose) -> Self {
        Self {
            header: Header {
                stamp: Time::default(),
                frame_id: frame_id.into(),
            },
            pose,
        }
    }
}

impl RosMessage for PoseStamped {
    const TYPE: &'static str = "geometry_msgs/PoseStamped";
}

// =============================================================================
// std_msgs
// =============================================================================

/// `std_msgs/String`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringMsg {
    pub data: String,
}

impl StringMsg {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

impl RosMessage for StringMsg {
    const TYPE: &'static str = "std_msgs/String";
}

/// `std_msgs/Int32`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Int32Msg {
    pub data: i32,
}

impl RosMessage for Int32Msg {
    const TYPE: &'static str = "std_msgs/Int32";
}

// =============================================================================
// sensor_msgs
// =============================================================================

/// `sensor_msgs/BatteryState` (the fields the console reads)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    #[serde(default, deserialize_with = "nullable_f64")]
    pub voltage: f64,
    #[serde(default, deserialize_with = "nullable_f64")]
    pub temperature: f64,
    #[serde(default, deserialize_with = "nullable_f64")]
    pub current: f64,
    /// Charge ratio in `[0, 1]`
    #[serde(default, deserialize_with = "nullable_f64")]
    pub percentage: f64,
    #[serde(default)]
    pub power_supply_status: u8,
}

impl BatteryState {
    pub const POWER_SUPPLY_STATUS_CHARGING: u8 = 1;

    /// Charge as a percentage in `[0, 100]`.
    pub fn percent(&self) -> f64 {
        self.percentage * 100.0
    }

    pub fn is_charging(&self) -> bool {
        self.power_supply_status == Self::POWER_SUPPLY_STATUS_CHARGING
    }
}

impl RosMessage for BatteryState {
    const TYPE: &'static str = "sensor_msgs/BatteryState";
}

// =============================================================================
// diagnostic_msgs
// =============================================================================

/// Severity of a `diagnostic_msgs/DiagnosticStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
    Stale,
}

impl DiagnosticLevel {
    pub fn from_byte(level: u8) -> Self {
        match level {
            0 => DiagnosticLevel::Ok,
            1 => DiagnosticLevel::Warn,
            2 => DiagnosticLevel::Error,
            _ => DiagnosticLevel::Stale,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// `diagnostic_msgs/DiagnosticStatus`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticStatus {
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub hardware_id: String,
    #[serde(default)]
    pub values: Vec<KeyValue>,
}

impl DiagnosticStatus {
    pub fn severity(&self) -> DiagnosticLevel {
        DiagnosticLevel::from_byte(self.level)
    }
}

/// `diagnostic_msgs/DiagnosticArray`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticArray {
    #[serde(default)]
    pub header: Header,
    #[serde(default)]
    pub status: Vec<DiagnosticStatus>,
}

impl RosMessage for DiagnosticArray {
    const TYPE: &'static str = "diagnostic_msgs/DiagnosticArray";
}

// =============================================================================
// rcl_interfaces
// =============================================================================

/// Log severity as carried by `rcl_interfaces/msg/Log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Unknown levels are reported as `Info`.
    pub fn from_byte(level: u8) -> Self {
        match level {
            10 => LogLevel::Debug,
            20 => LogLevel::Info,
            30 => LogLevel::Warn,
            40 => LogLevel::Error,
            50 => LogLevel::Fatal,
            _ => LogLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

/// `rcl_interfaces/msg/Log`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Log {
    #[serde(default)]
    pub stamp: Time,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub line: u32,
}

impl Log {
    pub fn severity(&self) -> LogLevel {
        LogLevel::from_byte(self.level)
    }
}

impl RosMessage for Log {
    const TYPE: &'static str = "rcl_interfaces/msg/Log";
}
