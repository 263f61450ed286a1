//! # Ports
//!
//! Contracts the core consumes from its collaborators. Adapters live in
//! `storage-adapters` (relational store, in-memory store, image files,
//! rate limiter) and `auth-adapters` (remote token validator).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::models::{
    AdEvent, AdId, Advertisement, Engagement, GlobalStats, ImageSweepReport, NewAdvertisement,
    Owner, SlotType, TokenVerdict, TrustRecord,
};

/// Row-level access to advertisements.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AdRepository: Send + Sync {
    /// Every advertisement, ordered by id descending.
    async fn list_all(&self) -> Result<Vec<Advertisement>>;
    async fn get(&self, id: AdId) -> Result<Option<Advertisement>>;
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Advertisement>>;

    /// Inserts a pending row and returns it with its assigned id.
    async fn create(&self, ad: NewAdvertisement) -> Result<Advertisement>;
    /// Clears `pending` and resets `created_at` to `at`.
    async fn approve(&self, id: AdId, at: DateTime<Utc>) -> Result<Option<Advertisement>>;
    async fn delete(&self, id: AdId) -> Result<Option<Advertisement>>;
    async fn set_image_url(&self, id: AdId, url: &str) -> Result<Option<Advertisement>>;

    /// Moves `boosts` from the owner's balance onto the ad in one transaction.
    /// Fails with `Conflict` when the balance is too small.
    async fn boost(&self, id: AdId, owner_id: &str, boosts: u32) -> Result<Advertisement>;

    async fn ad_stats(&self, id: AdId) -> Result<Option<Engagement>>;
    /// Increments the counter for `event` and returns the updated row.
    async fn record_event(&self, id: AdId, event: AdEvent) -> Result<Option<Advertisement>>;

    /// Deletes rows created strictly before `cutoff`; returns the count.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Advertiser accounts and their aggregates.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_owner(&self, id: &str) -> Result<Option<Owner>>;
    async fn owner_totals(&self, id: &str) -> Result<Engagement>;
    async fn credit_owner(&self, id: &str, event: AdEvent) -> Result<()>;
    async fn set_banned(&self, id: &str, banned: bool) -> Result<Option<Owner>>;
    /// Totals over non-banned owners plus the count of live ads.
    async fn global_stats(&self) -> Result<GlobalStats>;
}

/// Persisted token-trust records.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TrustRepository: Send + Sync {
    async fn get_trust(&self, account_id: i64) -> Result<Option<TrustRecord>>;
    /// Insert-or-update the token and reset `validated_at` to `at`.
    async fn upsert_trust(&self, account_id: i64, token: &str, at: DateTime<Utc>) -> Result<()>;
}

/// Remote game-account token validation.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Transport failures, timeouts, non-200 answers and malformed bodies
    /// are `Upstream` errors, never an invalid verdict.
    async fn validate(&self, account_id: i64, token: &str) -> Result<TokenVerdict>;
}

/// Image files under `{root}/{slot}/{owner}-{id}.webp`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(&self, slot: SlotType, owner_id: &str, id: AdId, data: Bytes) -> Result<()>;
    /// Returns false when there was nothing to remove.
    async fn remove(&self, slot: SlotType, owner_id: &str, id: AdId) -> Result<bool>;
    /// Resets the modification time, restarting the file retention window.
    async fn touch(&self, slot: SlotType, owner_id: &str, id: AdId) -> Result<()>;
    /// Removes files in the slot directory modified longer than `max_age` ago.
    async fn sweep_expired(&self, slot: SlotType, max_age: Duration) -> Result<ImageSweepReport>;
}

/// Per-client admission control.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait RateLimiter: Send + Sync {
    /// Withdraws one token for `client`; false means reject.
    fn allow(&self, client: &str) -> bool;
    /// Periodic maintenance. Returns true when the tracked set was reset.
    fn sweep(&self) -> bool;
    fn tracked(&self) -> usize;
}
