//! # Token Trust Cache
//!
//! Answers "is this game-account token valid?" without calling the remote
//! validator on every view/click report. Lookup order:
//!
//! 1. negative cache, keyed by account only; a hit is final
//! 2. positive cache, keyed by account and matched on the exact token
//! 3. the persisted trust record, if validated within the freshness window
//! 4. the remote validator
//!
//! Remote failures are errors, never an "invalid" verdict.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use domains::{DomainError, Result, TokenValidator, TrustRepository, Validation};
use tracing::{debug, error, info, warn};

use crate::ttl_map::TtlMap;

pub const DEFAULT_TRUST_TTL: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_STORE_FRESHNESS: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustTtls {
    pub positive: Duration,
    pub negative: Duration,
    /// Maximum age of a persisted record that is trusted without a remote call.
    pub store_freshness: Duration,
}

impl Default for TrustTtls {
    fn default() -> Self {
        Self {
            positive: DEFAULT_TRUST_TTL,
            negative: DEFAULT_NEGATIVE_TTL,
            store_freshness: DEFAULT_STORE_FRESHNESS,
        }
    }
}

pub struct TokenTrustCache {
    store: Arc<dyn TrustRepository>,
    remote: Arc<dyn TokenValidator>,
    /// account -> last token confirmed valid
    positive: TtlMap<i64, String>,
    /// account -> cause of the last rejection
    negative: TtlMap<i64, String>,
    store_freshness: Duration,
}

impl TokenTrustCache {
    pub fn new(store: Arc<dyn TrustRepository>, remote: Arc<dyn TokenValidator>, ttls: TrustTtls) -> Self {
        Self {
            store,
            remote,
            positive: TtlMap::new(ttls.positive),
            negative: TtlMap::new(ttls.negative),
            store_freshness: ttls.store_freshness,
        }
    }

    pub async fn validate(&self, account_id: i64, token: &str) -> Result<Validation> {
        if account_id <= 0 {
            return Err(DomainError::ValidationError(format!("invalid account id {account_id}")));
        }
        if token.is_empty() {
            return Err(DomainError::ValidationError("missing auth token".into()));
        }

        if let Some(cause) = self.negative.get(&account_id) {
            debug!(account_id, "negative trust cache hit");
            return Ok(Validation::Invalid { cause });
        }

        if self.positive.get(&account_id).is_some_and(|cached| cached == token) {
            debug!(account_id, "positive trust cache hit");
            return Ok(Validation::Valid);
        }

        if self.store_vouches(account_id, token).await {
            self.positive.insert(account_id, token.to_string());
            return Ok(Validation::Valid);
        }

        let verdict = self.remote.validate(account_id, token).await?;
        if verdict.valid {
            if let Err(err) = self.store.upsert_trust(account_id, token, Utc::now()).await {
                error!(account_id, error = %err, "failed to persist trust record");
            }
            self.positive.insert(account_id, token.to_string());
            info!(account_id, token_len = token.len(), "token validated remotely");
            Ok(Validation::Valid)
        } else {
            info!(account_id, cause = %verdict.cause, "token rejected remotely");
            self.negative.insert(account_id, verdict.cause.clone());
            Ok(Validation::Invalid { cause: verdict.cause })
        }
    }

    /// True when the persisted record holds this token and is still fresh.
    /// Store failures only cost the shortcut.
    async fn store_vouches(&self, account_id: i64, token: &str) -> bool {
        let record = match self.store.get_trust(account_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return false,
            Err(err) => {
                warn!(account_id, error = %err, "trust store read failed, asking validator");
                return false;
            }
        };

        let age = Utc::now() - record.validated_at;
        let fresh = age.to_std().map_or(true, |age| age < self.store_freshness);
        if record.token == token && fresh {
            debug!(account_id, "trust record is fresh");
            true
        } else {
            false
        }
    }

    /// Drops expired entries from both caches; returns how many.
    pub fn purge_expired(&self) -> usize {
        let removed = self.positive.purge_expired() + self.negative.purge_expired();
        if removed > 0 {
            debug!(removed, "expired trust entries purged");
        }
        removed
    }

    /// (positive, negative) entry counts.
    pub fn sizes(&self) -> (usize, usize) {
        (self.positive.len(), self.negative.len())
    }
}
