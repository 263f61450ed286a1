//! View and click reporting from game clients.

use std::sync::Arc;

use domains::{AdEvent, AdId, AdRepository, Advertisement, DomainError, Result, UserRepository};
use tracing::{debug, error};

use crate::ad_cache::AdMirrorCache;

pub struct EngagementRecorder {
    cache: Arc<AdMirrorCache>,
    ads: Arc<dyn AdRepository>,
    users: Arc<dyn UserRepository>,
}

impl EngagementRecorder {
    pub fn new(cache: Arc<AdMirrorCache>, ads: Arc<dyn AdRepository>, users: Arc<dyn UserRepository>) -> Self {
        Self { cache, ads, users }
    }

    pub async fn record_view(&self, ad_id: AdId, user_id: &str) -> Result<Advertisement> {
        self.record(ad_id, user_id, AdEvent::View).await
    }

    pub async fn record_click(&self, ad_id: AdId, user_id: &str) -> Result<Advertisement> {
        self.record(ad_id, user_id, AdEvent::Click).await
    }

    /// Counts the event on the ad, credits its owner and refreshes the
    /// cached row. A failed owner credit does not fail the report.
    pub async fn record(&self, ad_id: AdId, user_id: &str, event: AdEvent) -> Result<Advertisement> {
        if user_id.trim().is_empty() {
            return Err(DomainError::ValidationError("user id is required".into()));
        }

        let ad = self
            .ads
            .record_event(ad_id, event)
            .await?
            .ok_or_else(|| DomainError::ad_not_found(ad_id))?;

        if let Err(err) = self.users.credit_owner(&ad.owner_id, event).await {
            error!(ad_id, owner_id = %ad.owner_id, event = event.as_str(), error = %err, "failed to credit owner");
        }

        debug!(ad_id, user_id, event = event.as_str(), "engagement recorded");
        self.cache.upsert(ad.clone()).await;
        Ok(ad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{Engagement, MockAdRepository, MockUserRepository, NewAdvertisement, Owner, SlotType};
    use std::time::Duration;
    use storage_adapters::memory::InMemoryStore;

    #[tokio::test]
    async fn view_and_click_update_ad_owner_and_cache() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_owner(Owner {
            id: "alice".into(),
            ..Owner::default()
        });
        let ad = store
            .create(NewAdvertisement {
                owner_id: "alice".into(),
                level_id: 3,
                slot: SlotType::Banner,
            })
            .await
            .unwrap();
        let cache = Arc::new(AdMirrorCache::new(store.clone(), Duration::from_secs(900)));
        let recorder = EngagementRecorder::new(cache.clone(), store.clone(), store.clone());

        recorder.record_view(ad.id, "viewer-1").await.unwrap();
        recorder.record_view(ad.id, "viewer-2").await.unwrap();
        let clicked = recorder.record_click(ad.id, "viewer-1").await.unwrap();

        assert_eq!((clicked.views, clicked.clicks), (2, 1));
        assert_eq!(cache.get(ad.id).await.unwrap().clicks, 1);
        assert_eq!(
            store.owner_totals("alice").await.unwrap(),
            Engagement { views: 2, clicks: 1 }
        );
    }

    #[tokio::test]
    async fn owner_credit_failure_is_not_fatal() {
        let mut ads = MockAdRepository::new();
        ads.expect_record_event().returning(|id, _| {
            Ok(Some(Advertisement {
                id,
                owner_id: "alice".into(),
                level_id: 1,
                slot: SlotType::Square,
                image_url: String::new(),
                created_at: chrono::Utc::now(),
                pending: false,
                boost_count: 0,
                views: 1,
                clicks: 0,
            }))
        });
        let mut users = MockUserRepository::new();
        users
            .expect_credit_owner()
            .returning(|_, _| Err(DomainError::Storage("deadlock".into())));
        let ads: Arc<dyn AdRepository> = Arc::new(ads);
        let cache = Arc::new(AdMirrorCache::new(ads.clone(), Duration::from_secs(900)));
        let recorder = EngagementRecorder::new(cache.clone(), ads, Arc::new(users));

        assert_eq!(recorder.record_view(5, "viewer").await.unwrap().views, 1);
        assert!(cache.get(5).await.is_some());
    }

    #[tokio::test]
    async fn rejects_empty_user_and_unknown_ad() {
        let mut ads = MockAdRepository::new();
        ads.expect_record_event().times(1).returning(|_, _| Ok(None));
        let ads: Arc<dyn AdRepository> = Arc::new(ads);
        let cache = Arc::new(AdMirrorCache::new(ads.clone(), Duration::from_secs(900)));
        let recorder = EngagementRecorder::new(cache, ads, Arc::new(MockUserRepository::new()));

        assert!(matches!(
            recorder.record_click(1, " ").await,
            Err(DomainError::ValidationError(_))
        ));
        assert!(matches!(
            recorder.record_click(404, "viewer").await,
            Err(DomainError::NotFound(..))
        ));
    }
}
