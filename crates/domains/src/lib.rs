//! techconnect/crates/domains/src/lib.rs
//!
//! Domain models, the error taxonomy, and the backing-store port for TechConnect.

pub mod error;
pub mod models;
pub mod ports;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use ports::*;
