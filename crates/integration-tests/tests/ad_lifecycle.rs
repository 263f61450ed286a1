use std::fs::File;
use std::time::{Duration as StdDuration, SystemTime};

use chrono::Duration;
use domains::{DomainError, Owner, SlotType, UserRepository};
use integration_tests::{ad, owner, png, World, DOMAIN};

#[tokio::test]
async fn submission_is_served_only_after_approval() {
    let world = World::new(1).await;
    world.store.insert_owner(Owner { boost_count: 20, ..owner("alice") });

    let submitted = world
        .catalog
        .submit("alice", 128, SlotType::Banner, Some(png(8, 8)), DOMAIN)
        .await
        .unwrap();
    assert!(submitted.pending);
    assert_eq!(
        submitted.image_url,
        format!("{DOMAIN}/cdn/banner/alice-{}.webp", submitted.id)
    );
    assert!(world.images.image_path(SlotType::Banner, "alice", submitted.id).exists());
    assert_eq!(world.catalog.list_pending().await.unwrap().len(), 1);

    let ctx = world.ctx();
    assert!(matches!(
        world.selector.pick_ad(SlotType::Banner, &ctx).await,
        Err(DomainError::NoAdsAvailable(SlotType::Banner))
    ));

    world.catalog.approve(submitted.id).await.unwrap();
    let served = world.selector.pick_ad(SlotType::Banner, &ctx).await.unwrap();
    assert_eq!(served.ad.id, submitted.id);
    assert_eq!(served.glow, 0);
    assert_eq!(served.expiry, served.ad.created_at.timestamp() + 7 * 24 * 3600);
    assert!(world.catalog.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn engagement_and_boosts_flow_into_served_ads() {
    let world = World::new(2).await;
    world.store.insert_owner(Owner { boost_count: 20, ..owner("alice") });
    world.store.insert_ad(ad(1, "alice", SlotType::Square, Duration::hours(1)));
    let ctx = world.ctx();

    world.engagement.record_view(1, "viewer").await.unwrap();
    world.engagement.record_click(1, "viewer").await.unwrap();
    let totals = world.store.owner_totals("alice").await.unwrap();
    assert_eq!((totals.views, totals.clicks), (1, 1));

    let served = world.selector.serve_by_id(1, &ctx).await.unwrap();
    assert_eq!((served.ad.views, served.ad.clicks), (1, 1));

    let boosted = world.catalog.boost(1, "alice", 16).await.unwrap();
    assert_eq!(boosted.boost_count, 16);
    assert_eq!(world.store.owner("alice").unwrap().boost_count, 4);
    assert!(matches!(world.catalog.boost(1, "alice", 5).await, Err(DomainError::Conflict(_))));

    let served = world.selector.pick_ad(SlotType::Square, &ctx).await.unwrap();
    assert_eq!(served.glow, 3);
}

#[tokio::test]
async fn deleted_ad_leaves_cache_and_disk() {
    let world = World::new(3).await;
    world.store.insert_owner(owner("alice"));
    world.store.insert_owner(owner("mallory"));

    let submitted = world
        .catalog
        .submit("alice", 9, SlotType::Skyscraper, Some(png(4, 12)), DOMAIN)
        .await
        .unwrap();
    world.catalog.approve(submitted.id).await.unwrap();

    assert!(matches!(
        world.catalog.delete(submitted.id, "mallory").await,
        Err(DomainError::Unauthorized(_))
    ));
    world.catalog.delete(submitted.id, "alice").await.unwrap();

    assert!(world.cache.get(submitted.id).await.is_none());
    assert!(world.catalog.get(submitted.id).await.unwrap().is_none());
    assert!(!world.images.image_path(SlotType::Skyscraper, "alice", submitted.id).exists());
    assert!(matches!(
        world.selector.pick_ad(SlotType::Skyscraper, &world.ctx()).await,
        Err(DomainError::NoAdsAvailable(_))
    ));
}

#[tokio::test]
async fn banned_owner_disappears_until_unbanned() {
    let world = World::new(4).await;
    world.store.insert_owner(owner("alice"));
    world.store.insert_owner(owner("bob"));
    world.store.insert_ad(ad(1, "alice", SlotType::Banner, Duration::hours(30)));
    world.store.insert_ad(ad(2, "bob", SlotType::Banner, Duration::hours(30)));
    std::fs::write(world.images.image_path(SlotType::Banner, "alice", 1), b"webp").unwrap();
    let ctx = world.ctx();

    world.catalog.ban_owner("alice").await.unwrap();
    assert!(!world.images.image_path(SlotType::Banner, "alice", 1).exists());
    for _ in 0..50 {
        let served = world.selector.pick_ad(SlotType::Banner, &ctx).await.unwrap();
        assert_eq!(served.ad.owner_id, "bob");
    }
    assert!(matches!(
        world.selector.serve_by_id(1, &ctx).await,
        Err(DomainError::NotFound(..))
    ));

    world.catalog.unban_owner("alice").await.unwrap();
    let mut saw_alice = false;
    for _ in 0..50 {
        saw_alice |= world.selector.pick_ad(SlotType::Banner, &ctx).await.unwrap().ad.owner_id == "alice";
    }
    assert!(saw_alice);
}

#[tokio::test]
async fn sweeps_expire_rows_and_files_independently() {
    let world = World::new(5).await;
    world.store.insert_owner(owner("alice"));
    world.store.insert_ad(ad(1, "alice", SlotType::Banner, Duration::days(8)));
    world.store.insert_ad(ad(2, "alice", SlotType::Banner, Duration::days(2)));
    assert_eq!(world.cache.refresh().await.unwrap(), 2);

    let old = world.images.image_path(SlotType::Banner, "alice", 1);
    let fresh = world.images.image_path(SlotType::Banner, "alice", 2);
    std::fs::write(&old, b"old").unwrap();
    std::fs::write(&fresh, b"fresh").unwrap();
    File::options()
        .write(true)
        .open(&old)
        .unwrap()
        .set_modified(SystemTime::now() - StdDuration::from_secs(8 * 24 * 3600))
        .unwrap();

    assert_eq!(world.sweeper.sweep_storage().await.unwrap(), 1);
    let remaining: Vec<i64> = world.cache.list().await.unwrap().iter().map(|a| a.id).collect();
    assert_eq!(remaining, vec![2]);

    let report = world.sweeper.sweep_files().await;
    assert_eq!(report.removed, 1);
    assert!(report.retained >= 1);
    assert!(!old.exists());
    assert!(fresh.exists());
}

#[tokio::test]
async fn global_stats_follow_owner_credits() {
    let world = World::new(6).await;
    world.store.insert_owner(owner("alice"));
    world.store.insert_ad(ad(1, "alice", SlotType::Banner, Duration::hours(2)));

    for _ in 0..3 {
        world.engagement.record_click(1, "viewer").await.unwrap();
    }
    world.stats.invalidate().await;
    let stats = world.stats.get().await.unwrap();
    assert_eq!(stats.total_clicks, 3);
    assert_eq!(stats.ad_count, 1);
    assert_eq!(world.stats.click_volume().await, 3);
}
