//! domains
//!
//! Entities, error taxonomy and port traits for the ad delivery core.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::*;
pub use models::*;
pub use ports::*;
