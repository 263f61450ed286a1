//! # DomainError
//!
//! Centralized error handling for the ad delivery core.
//! Adapters map their library errors into these variants so services can
//! decide between failing, degrading and serving stale data.

use thiserror::Error;

use crate::models::SlotType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Resource not found (e.g., Advertisement, Owner)
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, String),

    /// Every candidate for the slot was filtered out.
    #[error("no ads available for slot {0}")]
    NoAdsAvailable(SlotType),

    /// Malformed input (e.g., unknown slot type, empty token)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Auth failure (e.g., rejected game token, not the ad owner)
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The remote validator failed or timed out.
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// The relational store or filesystem failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Request conflicts with current state (e.g., not enough boosts)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rate limit exceeded
    #[error("too many requests: {0}")]
    RateLimitExceeded(String),
}

impl DomainError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        DomainError::Storage(err.to_string())
    }

    pub fn upstream(err: impl std::fmt::Display) -> Self {
        DomainError::Upstream(err.to_string())
    }

    pub fn ad_not_found(id: i64) -> Self {
        DomainError::NotFound("advertisement", id.to_string())
    }

    pub fn owner_not_found(id: &str) -> Self {
        DomainError::NotFound("owner", id.to_string())
    }
}

/// A specialized Result type for domain logic.
pub type Result<T> = std::result::Result<T, DomainError>;
