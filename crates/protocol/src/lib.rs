//! robodeck Protocol - wire types shared by everything that talks to the robot
//!
//! This crate contains the types exchanged with a rosbridge server:
//! - rosbridge v2 operations (`ClientOp`, `ServerOp`)
//! - rosapi introspection service bodies
//! - ROS message types used by the operator console
//! - VDA5050 order / status payloads carried as JSON strings
//! - The typed telemetry catalogue (`TelemetryTopic`, `Telemetry`)
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde, serde_json, chrono and thiserror
//! 2. **No I/O** - Pure data types and serialization
//! 3. **Tagged payloads** - inbound messages decode into one variant per topic kind

pub mod error;
pub mod messages;
pub mod ops;
pub mod rosapi;
pub mod telemetry;
pub mod vda5050;

pub use error::ProtocolError;
pub use messages::{
    BatteryState, DiagnosticArray, DiagnosticLevel, DiagnosticStatus, Header, Int32Msg, Log,
    LogLevel, Point, Pose, PoseStamped, Quaternion, RosMessage, StringMsg, Time, Twist, Vector3,
};
pub use ops::{parse_server_op, registration_id, ClientOp, ServerOp};
pub use rosapi::{NodesResponse, TopicInfo, TopicsResponse};
pub use telemetry::{Mission, MissionState, MissionStatus, Telemetry, TelemetryTopic};
pub use vda5050::{Order, OrderAction, OrderNode, VdaStatus};
