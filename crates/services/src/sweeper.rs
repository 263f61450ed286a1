//! # Expiry Sweeper
//!
//! Removes advertisements past the retention window. The row sweep and the
//! image sweep are independent: a row may disappear slightly before or
//! after its file. Both delete by age, so re-running either is harmless.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domains::{AdRepository, ImageStore, ImageSweepReport, Result, SlotType};
use tracing::{error, info, warn};

use crate::ad_cache::AdMirrorCache;
use crate::stats_cache::GlobalStatsCache;

pub struct ExpirySweeper {
    ads: Arc<dyn AdRepository>,
    images: Arc<dyn ImageStore>,
    cache: Arc<AdMirrorCache>,
    stats: Option<Arc<GlobalStatsCache>>,
    retention: Duration,
}

impl ExpirySweeper {
    pub fn new(
        ads: Arc<dyn AdRepository>,
        images: Arc<dyn ImageStore>,
        cache: Arc<AdMirrorCache>,
        retention: Duration,
    ) -> Self {
        Self {
            ads,
            images,
            cache,
            stats: None,
            retention,
        }
    }

    /// Also drop the cached global aggregate after a storage sweep, since
    /// its live ad count is then out of date.
    pub fn with_stats(mut self, stats: Arc<GlobalStatsCache>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub async fn sweep_storage(&self) -> Result<u64> {
        self.sweep_storage_at(Utc::now()).await
    }

    /// Deletes rows created before `now - retention`, then invalidates the
    /// mirror cache so the next read reloads.
    pub async fn sweep_storage_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - self.retention;
        let deleted = self.ads.delete_created_before(cutoff).await?;

        self.cache.invalidate().await;
        if let Some(stats) = &self.stats {
            stats.invalidate().await;
        }
        info!(deleted, %cutoff, "expired advertisements deleted");
        Ok(deleted)
    }

    /// Sweeps every slot directory. A failing slot is logged and skipped.
    pub async fn sweep_files(&self) -> ImageSweepReport {
        let max_age = match self.retention.to_std() {
            Ok(max_age) => max_age,
            Err(err) => {
                error!(error = %err, "negative retention, skipping file sweep");
                return ImageSweepReport::default();
            }
        };

        let mut total = ImageSweepReport::default();
        for slot in SlotType::ALL {
            match self.images.sweep_expired(slot, max_age).await {
                Ok(report) => {
                    info!(
                        %slot,
                        removed = report.removed,
                        retained = report.retained,
                        failed = report.failed,
                        "image directory swept"
                    );
                    total.removed += report.removed;
                    total.retained += report.retained;
                    total.failed += report.failed;
                }
                Err(err) => warn!(%slot, error = %err, "image sweep failed for slot"),
            }
        }
        total
    }
}
