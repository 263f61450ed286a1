//! # Ad Catalog
//!
//! Write paths for advertisements. Each operation writes storage first and
//! then updates the mirror cache, so the next draw in this process already
//! sees the change.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use domains::{
    AdId, AdRepository, Advertisement, DomainError, ImageStore, NewAdvertisement, Owner, Result,
    SlotType, UserRepository,
};
use tracing::{error, info, warn};

use crate::ad_cache::AdMirrorCache;

pub struct AdCatalog {
    cache: Arc<AdMirrorCache>,
    ads: Arc<dyn AdRepository>,
    users: Arc<dyn UserRepository>,
    images: Arc<dyn ImageStore>,
}

impl AdCatalog {
    pub fn new(
        cache: Arc<AdMirrorCache>,
        ads: Arc<dyn AdRepository>,
        users: Arc<dyn UserRepository>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            cache,
            ads,
            users,
            images,
        }
    }

    /// Files a new pending advertisement. With an image, the file is stored
    /// and the canonical URL under `domain` is recorded.
    pub async fn submit(
        &self,
        owner_id: &str,
        level_id: i64,
        slot: SlotType,
        image: Option<Bytes>,
        domain: &str,
    ) -> Result<Advertisement> {
        if owner_id.trim().is_empty() {
            return Err(DomainError::ValidationError("owner id is required".into()));
        }
        if level_id <= 0 {
            return Err(DomainError::ValidationError(format!("invalid level id {level_id}")));
        }
        if image.as_ref().is_some_and(Bytes::is_empty) {
            return Err(DomainError::ValidationError("image is empty".into()));
        }

        let owner = self.active_owner(owner_id).await?;

        let mut ad = self
            .ads
            .create(NewAdvertisement {
                owner_id: owner.id.clone(),
                level_id,
                slot,
            })
            .await?;

        if let Some(data) = image {
            if let Err(err) = self.images.store(slot, &ad.owner_id, ad.id, data).await {
                error!(ad_id = ad.id, error = %err, "image store failed, rolling back submission");
                if let Err(rollback) = self.ads.delete(ad.id).await {
                    error!(ad_id = ad.id, error = %rollback, "rollback of submission failed");
                }
                return Err(err);
            }
            let url = ad.canonical_image_url(domain);
            ad = self
                .ads
                .set_image_url(ad.id, &url)
                .await?
                .ok_or_else(|| DomainError::ad_not_found(ad.id))?;
        }

        info!(ad_id = ad.id, owner_id = %ad.owner_id, %slot, "advertisement submitted");
        self.cache.upsert(ad.clone()).await;
        Ok(ad)
    }

    /// Clears `pending` and restarts the retention window of the row and
    /// of its image file.
    pub async fn approve(&self, id: AdId) -> Result<Advertisement> {
        let ad = self
            .ads
            .approve(id, Utc::now())
            .await?
            .ok_or_else(|| DomainError::ad_not_found(id))?;

        if let Err(err) = self.images.touch(ad.slot, &ad.owner_id, ad.id).await {
            warn!(ad_id = id, error = %err, "could not refresh image mtime");
        }

        info!(ad_id = id, "advertisement approved");
        self.cache.upsert(ad.clone()).await;
        Ok(ad)
    }

    /// Deletes the row and its image. Only the owner and moderators may.
    pub async fn delete(&self, id: AdId, requester_id: &str) -> Result<()> {
        let ad = self.find(id).await?;

        if ad.owner_id != requester_id {
            let requester = self.users.get_owner(requester_id).await?;
            if !requester.as_ref().is_some_and(Owner::is_moderator) {
                return Err(DomainError::Unauthorized(format!(
                    "{requester_id} may not delete advertisement {id}"
                )));
            }
        }

        if self.ads.delete(id).await?.is_none() {
            // already gone in storage; make sure this process forgets it too
            self.cache.remove(id).await;
            return Err(DomainError::ad_not_found(id));
        }

        match self.images.remove(ad.slot, &ad.owner_id, id).await {
            Ok(true) => {}
            Ok(false) => warn!(ad_id = id, "no image file to remove"),
            Err(err) => warn!(ad_id = id, error = %err, "failed to remove image file"),
        }

        info!(ad_id = id, requester_id, "advertisement deleted");
        self.cache.remove(id).await;
        Ok(())
    }

    /// Spends `boosts` of the requester's balance on the ad.
    pub async fn boost(&self, id: AdId, requester_id: &str, boosts: u32) -> Result<Advertisement> {
        if boosts == 0 {
            return Err(DomainError::ValidationError("boost count must be positive".into()));
        }
        let ad = self.ads.boost(id, requester_id, boosts).await?;

        info!(ad_id = id, requester_id, boosts, total = ad.boost_count, "advertisement boosted");
        self.cache.upsert(ad.clone()).await;
        Ok(ad)
    }

    pub async fn fix_image_url(&self, id: AdId, url: &str) -> Result<Advertisement> {
        if url.trim().is_empty() {
            return Err(DomainError::ValidationError("image url is empty".into()));
        }
        let ad = self
            .ads
            .set_image_url(id, url)
            .await?
            .ok_or_else(|| DomainError::ad_not_found(id))?;

        self.cache.upsert(ad.clone()).await;
        Ok(ad)
    }

    /// Bans the owner and removes their image files. Their rows stay; draws
    /// exclude them while the ban holds.
    pub async fn ban_owner(&self, owner_id: &str) -> Result<Owner> {
        let owner = self
            .users
            .set_banned(owner_id, true)
            .await?
            .ok_or_else(|| DomainError::owner_not_found(owner_id))?;

        let ads = self.ads.list_by_owner(owner_id).await?;
        let mut removed = 0usize;
        for ad in &ads {
            match self.images.remove(ad.slot, &ad.owner_id, ad.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => warn!(ad_id = ad.id, error = %err, "failed to remove banned owner's image"),
            }
        }

        info!(owner_id, ads = ads.len(), removed, "owner banned");
        Ok(owner)
    }

    pub async fn unban_owner(&self, owner_id: &str) -> Result<Owner> {
        let owner = self
            .users
            .set_banned(owner_id, false)
            .await?
            .ok_or_else(|| DomainError::owner_not_found(owner_id))?;
        info!(owner_id, "owner unbanned");
        Ok(owner)
    }

    pub async fn get(&self, id: AdId) -> Result<Option<Advertisement>> {
        if let Some(ad) = self.cache.get(id).await {
            return Ok(Some(ad));
        }
        Ok(self.cache.list().await?.into_iter().find(|ad| ad.id == id))
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Advertisement>> {
        let ads = self.cache.list().await?;
        Ok(ads.into_iter().filter(|ad| ad.owner_id == owner_id).collect())
    }

    /// Moderation queue, newest first.
    pub async fn list_pending(&self) -> Result<Vec<Advertisement>> {
        let ads = self.cache.list().await?;
        Ok(ads.into_iter().filter(|ad| ad.pending).collect())
    }

    async fn find(&self, id: AdId) -> Result<Advertisement> {
        self.get(id).await?.ok_or_else(|| DomainError::ad_not_found(id))
    }

    async fn active_owner(&self, owner_id: &str) -> Result<Owner> {
        let owner = self
            .users
            .get_owner(owner_id)
            .await?
            .ok_or_else(|| DomainError::owner_not_found(owner_id))?;
        if owner.banned {
            return Err(DomainError::Unauthorized(format!("owner {owner_id} is banned")));
        }
        Ok(owner)
    }
}
