//! # In-Memory Store
//!
//! DashMap-backed implementation of the advertisement, user and trust
//! repositories. Used when no database is configured and by the service
//! and integration tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domains::{
    AdEvent, AdId, AdRepository, Advertisement, DomainError, Engagement, GlobalStats,
    NewAdvertisement, Owner, Result, TrustRecord, TrustRepository, UserRepository,
};
use tracing::debug;

pub struct InMemoryStore {
    ads: DashMap<AdId, Advertisement>,
    owners: DashMap<String, Owner>,
    trust: DashMap<i64, TrustRecord>,
    next_id: AtomicI64,
    /// Serializes multi-map updates (boosts).
    tx: Mutex<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            ads: DashMap::new(),
            owners: DashMap::new(),
            trust: DashMap::new(),
            next_id: AtomicI64::new(1),
            tx: Mutex::new(()),
        }
    }

    pub fn insert_owner(&self, owner: Owner) {
        self.owners.insert(owner.id.clone(), owner);
    }

    pub fn owner(&self, id: &str) -> Option<Owner> {
        self.owners.get(id).map(|o| o.clone())
    }

    /// Inserts a row as-is, keeping its id. Later `create` calls allocate
    /// ids above it.
    pub fn insert_ad(&self, ad: Advertisement) {
        self.next_id.fetch_max(ad.id + 1, Ordering::SeqCst);
        self.ads.insert(ad.id, ad);
    }

    pub fn insert_trust(&self, record: TrustRecord) {
        self.trust.insert(record.account_id, record);
    }

    fn update_ad<F>(&self, id: AdId, f: F) -> Option<Advertisement>
    where
        F: FnOnce(&mut Advertisement),
    {
        self.ads.get_mut(&id).map(|mut ad| {
            f(&mut ad);
            ad.clone()
        })
    }

    fn sorted_desc(mut ads: Vec<Advertisement>) -> Vec<Advertisement> {
        ads.sort_unstable_by(|a, b| b.id.cmp(&a.id));
        ads
    }
}

#[async_trait]
impl AdRepository for InMemoryStore {
    async fn list_all(&self) -> Result<Vec<Advertisement>> {
        let ads = self.ads.iter().map(|e| e.value().clone()).collect();
        Ok(Self::sorted_desc(ads))
    }

    async fn get(&self, id: AdId) -> Result<Option<Advertisement>> {
        Ok(self.ads.get(&id).map(|ad| ad.clone()))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Advertisement>> {
        let ads = self
            .ads
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .map(|e| e.value().clone())
            .collect();
        Ok(Self::sorted_desc(ads))
    }

    async fn create(&self, new: NewAdvertisement) -> Result<Advertisement> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let ad = Advertisement {
            id,
            owner_id: new.owner_id,
            level_id: new.level_id,
            slot: new.slot,
            image_url: String::new(),
            created_at: Utc::now(),
            pending: true,
            boost_count: 0,
            views: 0,
            clicks: 0,
        };
        self.ads.insert(id, ad.clone());
        debug!(ad_id = id, "advertisement row created");
        Ok(ad)
    }

    async fn approve(&self, id: AdId, at: DateTime<Utc>) -> Result<Option<Advertisement>> {
        Ok(self.update_ad(id, |ad| {
            ad.pending = false;
            ad.created_at = at;
        }))
    }

    async fn delete(&self, id: AdId) -> Result<Option<Advertisement>> {
        Ok(self.ads.remove(&id).map(|(_, ad)| ad))
    }

    async fn set_image_url(&self, id: AdId, url: &str) -> Result<Option<Advertisement>> {
        Ok(self.update_ad(id, |ad| ad.image_url = url.to_string()))
    }

    async fn boost(&self, id: AdId, owner_id: &str, boosts: u32) -> Result<Advertisement> {
        let _tx = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.ads.contains_key(&id) {
            return Err(DomainError::ad_not_found(id));
        }
        {
            let mut owner = self
                .owners
                .get_mut(owner_id)
                .ok_or_else(|| DomainError::owner_not_found(owner_id))?;
            if owner.boost_count < boosts {
                return Err(DomainError::Conflict(format!(
                    "owner {owner_id} has {} boosts, {boosts} requested",
                    owner.boost_count
                )));
            }
            owner.boost_count -= boosts;
        }

        self.update_ad(id, |ad| ad.boost_count = ad.boost_count.saturating_add(boosts))
            .ok_or_else(|| DomainError::ad_not_found(id))
    }

    async fn ad_stats(&self, id: AdId) -> Result<Option<Engagement>> {
        Ok(self.ads.get(&id).map(|ad| Engagement {
            views: ad.views,
            clicks: ad.clicks,
        }))
    }

    async fn record_event(&self, id: AdId, event: AdEvent) -> Result<Option<Advertisement>> {
        Ok(self.update_ad(id, |ad| match event {
            AdEvent::View => ad.views += 1,
            AdEvent::Click => ad.clicks += 1,
        }))
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.ads.len();
        self.ads.retain(|_, ad| ad.created_at >= cutoff);
        Ok(before.saturating_sub(self.ads.len()) as u64)
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get_owner(&self, id: &str) -> Result<Option<Owner>> {
        Ok(self.owner(id))
    }

    async fn owner_totals(&self, id: &str) -> Result<Engagement> {
        Ok(self
            .owners
            .get(id)
            .map(|o| Engagement {
                views: o.total_views,
                clicks: o.total_clicks,
            })
            .unwrap_or_default())
    }

    async fn credit_owner(&self, id: &str, event: AdEvent) -> Result<()> {
        let mut owner = self
            .owners
            .get_mut(id)
            .ok_or_else(|| DomainError::owner_not_found(id))?;
        match event {
            AdEvent::View => owner.total_views += 1,
            AdEvent::Click => owner.total_clicks += 1,
        }
        Ok(())
    }

    async fn set_banned(&self, id: &str, banned: bool) -> Result<Option<Owner>> {
        Ok(self.owners.get_mut(id).map(|mut owner| {
            owner.banned = banned;
            owner.clone()
        }))
    }

    async fn global_stats(&self) -> Result<GlobalStats> {
        let (total_views, total_clicks) = self
            .owners
            .iter()
            .filter(|o| !o.banned)
            .fold((0u64, 0u64), |(v, c), o| (v + o.total_views, c + o.total_clicks));
        let ad_count = self.ads.iter().filter(|ad| !ad.pending).count() as u64;
        Ok(GlobalStats {
            total_views,
            total_clicks,
            ad_count,
        })
    }
}

#[async_trait]
impl TrustRepository for InMemoryStore {
    async fn get_trust(&self, account_id: i64) -> Result<Option<TrustRecord>> {
        Ok(self.trust.get(&account_id).map(|r| r.clone()))
    }

    async fn upsert_trust(&self, account_id: i64, token: &str, at: DateTime<Utc>) -> Result<()> {
        self.trust
            .entry(account_id)
            .and_modify(|r| {
                r.token = token.to_string();
                r.validated_at = at;
            })
            .or_insert_with(|| TrustRecord {
                account_id,
                token: token.to_string(),
                validated_at: at,
            });
        Ok(())
    }
}
