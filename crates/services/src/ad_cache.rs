//! # Advertisement Mirror Cache
//!
//! Process-local copy of every advertisement row. Reads go through
//! [`AdMirrorCache::list`], which reloads the whole table when the snapshot
//! is older than the TTL or empty. Write paths call [`AdMirrorCache::upsert`]
//! / [`AdMirrorCache::remove`] right after their storage write, so a process
//! always reads its own writes regardless of TTL state.
//!
//! Reloads are single-flight: concurrent readers that find the snapshot
//! stale queue on one reload lock and all but the first see the refreshed
//! snapshot. Mutations that land while a reload is reading storage are
//! journaled and replayed over the reloaded rows.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use domains::{AdId, AdRepository, Advertisement, Result};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Full-reload interval.
pub const DEFAULT_AD_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
enum Mutation {
    Upsert(Advertisement),
    Remove(AdId),
    Invalidate,
}

#[derive(Debug, Default)]
struct MirrorState {
    ads: BTreeMap<AdId, Advertisement>,
    loaded_at: Option<Instant>,
    reloading: bool,
    journal: Vec<Mutation>,
}

impl MirrorState {
    fn is_fresh(&self, ttl: Duration) -> bool {
        !self.ads.is_empty() && self.loaded_at.is_some_and(|at| at.elapsed() <= ttl)
    }

    /// Ordered by id descending, like the storage listing.
    fn snapshot(&self) -> Vec<Advertisement> {
        self.ads.values().rev().cloned().collect()
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Upsert(ad) => {
                self.ads.insert(ad.id, ad);
            }
            Mutation::Remove(id) => {
                self.ads.remove(&id);
            }
            Mutation::Invalidate => {
                self.ads.clear();
                self.loaded_at = None;
            }
        }
    }

    fn record(&mut self, mutation: Mutation) {
        if self.reloading {
            self.journal.push(mutation.clone());
        }
        self.apply(mutation);
    }
}

pub struct AdMirrorCache {
    repo: Arc<dyn AdRepository>,
    ttl: Duration,
    state: RwLock<MirrorState>,
    reload_lock: Mutex<()>,
}

impl AdMirrorCache {
    pub fn new(repo: Arc<dyn AdRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            state: RwLock::new(MirrorState::default()),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// All advertisements, reloading from storage first when stale.
    ///
    /// A failed reload serves the previous snapshot when there is one and
    /// only surfaces the error when nothing is cached.
    pub async fn list(&self) -> Result<Vec<Advertisement>> {
        {
            let state = self.state.read().await;
            if state.is_fresh(self.ttl) {
                debug!(count = state.ads.len(), "serving cached advertisement list");
                return Ok(state.snapshot());
            }
        }

        let _reload = self.reload_lock.lock().await;

        // Another caller may have finished a reload while we queued.
        {
            let state = self.state.read().await;
            if state.is_fresh(self.ttl) {
                return Ok(state.snapshot());
            }
        }

        match self.reload_locked().await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                let state = self.state.read().await;
                if state.ads.is_empty() {
                    return Err(err);
                }
                warn!(error = %err, count = state.ads.len(), "advertisement reload failed, serving stale cache");
                Ok(state.snapshot())
            }
        }
    }

    /// Forces a full reload and propagates storage failures. The previous
    /// contents stay in place when the reload fails.
    pub async fn refresh(&self) -> Result<usize> {
        let _reload = self.reload_lock.lock().await;
        let snapshot = self.reload_locked().await?;
        Ok(snapshot.len())
    }

    /// Caller must hold `reload_lock`.
    async fn reload_locked(&self) -> Result<Vec<Advertisement>> {
        {
            let mut state = self.state.write().await;
            state.reloading = true;
            state.journal.clear();
        }

        let loaded = self.repo.list_all().await;

        let mut state = self.state.write().await;
        state.reloading = false;
        let journal = std::mem::take(&mut state.journal);

        let rows = match loaded {
            Ok(rows) => rows,
            Err(err) => return Err(err),
        };

        state.ads = rows.into_iter().map(|ad| (ad.id, ad)).collect();
        state.loaded_at = Some(Instant::now());
        let replayed = journal.len();
        for mutation in journal {
            state.apply(mutation);
        }
        info!(count = state.ads.len(), replayed, "advertisement cache reloaded");
        Ok(state.snapshot())
    }

    /// Cached copy only; never triggers a reload.
    pub async fn get(&self, id: AdId) -> Option<Advertisement> {
        self.state.read().await.ads.get(&id).cloned()
    }

    pub async fn upsert(&self, ad: Advertisement) {
        debug!(ad_id = ad.id, "caching advertisement");
        self.state.write().await.record(Mutation::Upsert(ad));
    }

    pub async fn remove(&self, id: AdId) {
        debug!(ad_id = id, "evicting advertisement");
        self.state.write().await.record(Mutation::Remove(id));
    }

    /// Drops everything; the next [`list`](Self::list) reloads.
    pub async fn invalidate(&self) {
        info!("advertisement cache invalidated");
        self.state.write().await.record(Mutation::Invalidate);
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.ads.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.ads.is_empty()
    }
}
