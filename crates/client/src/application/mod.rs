//! Application layer - Use cases and orchestration

pub mod error;
pub mod input;
pub mod services;

// Re-export common types
pub use error::CommandError;
pub use input::{DriveInput, DriveKey, InputState, KeySet, PointerVector, SpeedLimits, VelocityCommand};
