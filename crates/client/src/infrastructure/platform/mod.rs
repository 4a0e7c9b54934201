//! Platform adapters

mod storage;

pub use storage::{FileStorage, MemoryStorage};
