//! robodeck Client - connection manager and teleoperation core
//!
//! Keeps one rosbridge connection alive across failures and turns operator
//! input into a fail-safe stream of velocity commands.
//!
//! Layout:
//! - `ports`: interfaces to the outside world (transport, settings storage)
//! - `infrastructure`: the bus connection, topic channels and adapters
//! - `application`: input model and services built on the bus
//! - `config` / `logging`: startup plumbing for the shell
//! - `console`: composition root

pub mod application;
pub mod config;
pub mod console;
pub mod infrastructure;
pub mod logging;
pub mod ports;

pub use application::services::{
    ControllerConfig, NavigationService, SystemStatusService, TelemetryFeed, VelocityController,
};
pub use application::{CommandError, DriveKey, PointerVector, SpeedLimits, VelocityCommand};
pub use config::{ClientConfig, ConfigError};
pub use console::Console;
pub use infrastructure::messaging::{
    BusConnection, ConnectionState, Direction, ServiceError, StatusSubscription, TopicChannel,
};
pub use infrastructure::websocket::{ReconnectPolicy, WsConnector};
pub use logging::init_logging;
