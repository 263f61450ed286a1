//! Shared fixtures for the cross-crate scenarios in `tests/`.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use domains::{Advertisement, Owner, SlotType};
use rand::rngs::StdRng;
use rand::SeedableRng;
use services::{
    AdCatalog, AdMirrorCache, AdSelector, EngagementRecorder, ExpirySweeper, GlobalStatsCache,
    RequestContext, SelectionPolicy,
};
use storage_adapters::{InMemoryStore, LocalImageStore};
use tempfile::TempDir;

pub const DOMAIN: &str = "https://ads.test";

/// Every service wired over one in-memory store and a temporary image root.
pub struct World {
    pub store: Arc<InMemoryStore>,
    pub images: Arc<LocalImageStore>,
    pub cache: Arc<AdMirrorCache>,
    pub stats: Arc<GlobalStatsCache>,
    pub selector: AdSelector,
    pub catalog: AdCatalog,
    pub engagement: EngagementRecorder,
    pub sweeper: ExpirySweeper,
    _media: TempDir,
}

impl World {
    pub async fn new(seed: u64) -> Self {
        let media = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryStore::new());
        let images = Arc::new(LocalImageStore::new(media.path()));
        images.ensure_layout().await.expect("image layout");

        let cache = Arc::new(AdMirrorCache::new(store.clone(), Duration::from_secs(900)));
        let stats = Arc::new(GlobalStatsCache::new(store.clone(), Duration::from_secs(600)));
        let selector = AdSelector::new(
            cache.clone(),
            store.clone(),
            store.clone(),
            stats.clone(),
            SelectionPolicy::default(),
        )
        .with_rng(StdRng::seed_from_u64(seed));
        let catalog = AdCatalog::new(cache.clone(), store.clone(), store.clone(), images.clone());
        let engagement = EngagementRecorder::new(cache.clone(), store.clone(), store.clone());
        let sweeper = ExpirySweeper::new(store.clone(), images.clone(), cache.clone(), domains::ad_retention())
            .with_stats(stats.clone());

        Self {
            store,
            images,
            cache,
            stats,
            selector,
            catalog,
            engagement,
            sweeper,
            _media: media,
        }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::new(DOMAIN)
    }
}

pub fn owner(id: &str) -> Owner {
    Owner {
        id: id.to_string(),
        username: format!("{id}_name"),
        ..Owner::default()
    }
}

/// A live ad created `age` ago with an image URL already set.
pub fn ad(id: i64, owner_id: &str, slot: SlotType, age: chrono::Duration) -> Advertisement {
    let mut ad = Advertisement {
        id,
        owner_id: owner_id.to_string(),
        level_id: 1000 + id,
        slot,
        image_url: String::new(),
        created_at: Utc::now() - age,
        pending: false,
        boost_count: 0,
        views: 0,
        clicks: 0,
    };
    ad.image_url = ad.canonical_image_url(DOMAIN);
    ad
}

/// A small valid PNG upload.
pub fn png(width: u32, height: u32) -> Bytes {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("png encode");
    Bytes::from(out.into_inner())
}
