//! Test-only infrastructure fakes.
//!
//! These helpers implement outbound ports for unit tests, so the bus and the
//! services on top of it run without a real rosbridge server.

pub mod rig;
pub mod scripted_connector;
pub mod state_recorder;

pub use rig::BusRig;
pub use scripted_connector::{Attempt, ScriptedConnector, ServerEnd, Step};
pub use state_recorder::StateRecorder;
