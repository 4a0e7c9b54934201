//! Application services built on the bus connection

pub mod navigation_service;
pub mod system_status_service;
pub mod telemetry_service;
pub mod velocity_controller;

pub use navigation_service::NavigationService;
pub use system_status_service::SystemStatusService;
pub use telemetry_service::TelemetryFeed;
pub use velocity_controller::{ControllerConfig, VelocityController};
