//! # Store Module
//!
//! Hash-store abstraction and the process-local backend.

pub mod in_memory;
pub mod traits;

pub use in_memory::{InMemoryConnector, InMemoryHashStore};
pub use traits::{Connector, HashStore, KeyTtl, SharedStore};
