//! Outbound ports - Interfaces for external services
//!
//! These ports define the contracts that infrastructure adapters must implement,
//! so the bus connection and the settings layer can be exercised against
//! in-memory implementations.

pub mod storage_port;
pub mod transport_port;

pub use storage_port::{storage_keys, StorageError, StorageProvider};
pub use transport_port::{LinkEvent, TransportConnector, TransportError, TransportLink};

#[cfg(any(test, feature = "testing"))]
pub use storage_port::MockStorageProvider;
#[cfg(any(test, feature = "testing"))]
pub use transport_port::MockTransportConnector;
