//! Consumed external interfaces.
//!
//! The engine never talks to a concrete backend directly: metadata lookup
//! and persistence both live behind async traits implemented by the host
//! application (HTTP clients, local library, test doubles).

pub mod traits;

pub use traits::{MetadataProvider, PersistenceGateway};
