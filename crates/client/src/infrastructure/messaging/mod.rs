//! Messaging infrastructure - the single rosbridge connection and its topics
//!
//! - `connection`: [`BusConnection`] handle, state and observers
//! - `bridge`: the task owning the socket, the retry timer and transitions
//! - `registry`: live advertise/subscribe registrations
//! - `topic`: typed [`TopicChannel`] endpoints
//! - `service`: request/response service calls

mod bridge;
mod connection;
mod registry;
mod service;
mod topic;

pub use connection::{
    BusConnection, ConnectionState, StatusObserver, StatusSubscription, TransportHandle,
};
pub use registry::Direction;
pub use service::{ServiceError, DEFAULT_CALL_TIMEOUT};
pub use topic::TopicChannel;

pub(crate) use topic::TopicBinding;
