//! Short-lived cache over the sitewide engagement aggregate, so the
//! freshness bonus does not cost a full table scan per draw.

use std::sync::Arc;
use std::time::{Duration, Instant};

use domains::{GlobalStats, Result, UserRepository};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_STATS_TTL: Duration = Duration::from_secs(10 * 60);

pub struct GlobalStatsCache {
    users: Arc<dyn UserRepository>,
    ttl: Duration,
    slot: Mutex<Option<(GlobalStats, Instant)>>,
}

impl GlobalStatsCache {
    pub fn new(users: Arc<dyn UserRepository>, ttl: Duration) -> Self {
        Self {
            users,
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Cached aggregate, recomputed once the TTL has passed. Holding the
    /// lock across the query keeps concurrent callers from recomputing.
    pub async fn get(&self) -> Result<GlobalStats> {
        let mut slot = self.slot.lock().await;
        if let Some((stats, at)) = *slot {
            if at.elapsed() < self.ttl {
                return Ok(stats);
            }
        }

        let stats = self.users.global_stats().await?;
        debug!(clicks = stats.total_clicks, views = stats.total_views, "global stats recomputed");
        *slot = Some((stats, Instant::now()));
        Ok(stats)
    }

    /// Sitewide click volume, at least 1. Falls back to 1 on storage errors.
    pub async fn click_volume(&self) -> u64 {
        match self.get().await {
            Ok(stats) => stats.total_clicks.max(1),
            Err(err) => {
                warn!(error = %err, "global stats unavailable, assuming minimal click volume");
                1
            }
        }
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
