//! auth-adapters
//!
//! Client for the remote game-account token validation service.

pub mod remote;

pub use remote::{HttpTokenValidator, ValidatorConfig};
