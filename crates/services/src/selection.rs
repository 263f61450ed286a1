//! # Ad Selection Engine
//!
//! Picks one advertisement for a slot request. Candidates come from the
//! mirror cache and are filtered (banned owners, pending, wrong slot)
//! before a weighted random draw. Weights favour boosted, verified, fresh
//! and well-performing ads; see [`score`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use domains::{
    AdId, AdRepository, Advertisement, DomainError, Engagement, Owner, Result, SlotType,
    UserRepository,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ad_cache::AdMirrorCache;
use crate::stats_cache::GlobalStatsCache;

/// Tunables of the weight formula.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionPolicy {
    /// Ads younger than this get the freshness bonus.
    pub fresh_window: Duration,
    /// Ads at least this old get the settled click-rate prior.
    pub settle_after: Duration,
    /// Fraction of sitewide clicks over which the freshness bonus decays.
    pub click_volume_fraction: f64,
    pub verified_bonus: f64,
    pub staff_bonus: f64,
    pub admin_bonus: f64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            fresh_window: Duration::hours(60),
            settle_after: Duration::hours(24),
            click_volume_fraction: 0.025,
            verified_bonus: 3.0,
            staff_bonus: 1.5,
            admin_bonus: 1.0,
        }
    }
}

/// Per-request inputs that do not come from storage.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Public origin used to synthesize missing image URLs
    /// (e.g. `https://ads.example.com`).
    pub domain: String,
}

impl RequestContext {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }
}

/// An advertisement as handed to a game client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServedAd {
    #[serde(flatten)]
    pub ad: Advertisement,
    /// Presentation tier, 0 to 3.
    pub glow: u8,
    /// Unix seconds at which the ad leaves rotation.
    pub expiry: i64,
}

impl ServedAd {
    fn new(ad: Advertisement, owner: Option<&Owner>) -> Self {
        let glow = glow_tier(&ad, owner);
        let expiry = ad.expires_at().timestamp();
        Self { ad, glow, expiry }
    }
}

/// 3 for heavily boosted ads, 2 for verified owners, 1 for any boost.
pub fn glow_tier(ad: &Advertisement, owner: Option<&Owner>) -> u8 {
    if ad.boost_count > 15 {
        3
    } else if owner.is_some_and(|o| o.verified) {
        2
    } else if ad.boost_count > 0 {
        1
    } else {
        0
    }
}

/// Weight of one candidate before the owner's aggregate click rate is added.
///
/// `global_clicks` is the sitewide click volume; the freshness bonus decays
/// faster on a quiet site.
pub fn score(
    ad: &Advertisement,
    owner: Option<&Owner>,
    global_clicks: u64,
    now: DateTime<Utc>,
    policy: &SelectionPolicy,
) -> f64 {
    let mut weight = 1.0 + f64::from(ad.boost_count);

    if let Some(owner) = owner {
        if owner.verified {
            weight += policy.verified_bonus;
        }
        if owner.is_staff {
            weight += policy.staff_bonus;
        }
        if owner.is_admin {
            weight += policy.admin_bonus;
        }
    }

    let age = now - ad.created_at;
    if age < policy.fresh_window {
        let decay = (policy.click_volume_fraction * global_clicks as f64).max(1.0);
        weight += 3.0 * (-(ad.clicks as f64) / decay).exp();
    }

    if age >= policy.settle_after {
        let prior = (ad.clicks as f64 + 1.0) / (ad.views as f64 + 2.0);
        weight += prior.clamp(0.0, 2.0);
    }

    if ad.clicks > 0 && ad.views > 0 {
        weight += 10.0 * ad.clicks as f64 / ad.views as f64;
    }

    weight
}

/// Bonus from the owner's lifetime click-through ratio.
pub fn owner_bonus(totals: Engagement) -> f64 {
    if totals.clicks > 0 && totals.views > 0 {
        totals.clicks as f64 / totals.views as f64
    } else {
        0.0
    }
}

/// Index drawn with probability proportional to its weight.
///
/// Weights are normalized by the maximum; negative and non-finite weights
/// count as zero. When no weight is positive the draw is uniform. Returns
/// `None` only for an empty slice.
pub fn weighted_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    if weights.is_empty() {
        return None;
    }

    let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
    let max = weights.iter().copied().map(clean).fold(0.0, f64::max);
    if max <= 0.0 {
        return Some(rng.gen_range(0..weights.len()));
    }

    let normalized: Vec<f64> = weights.iter().map(|&w| clean(w) / max).collect();
    let total: f64 = normalized.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Some(rng.gen_range(0..weights.len()));
    }

    let draw = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut last_positive = 0;
    for (idx, &w) in normalized.iter().enumerate() {
        if w <= 0.0 {
            continue;
        }
        cumulative += w;
        last_positive = idx;
        if draw < cumulative {
            return Some(idx);
        }
    }
    // float rounding can leave draw == total
    Some(last_positive)
}

pub struct AdSelector {
    cache: Arc<AdMirrorCache>,
    ads: Arc<dyn AdRepository>,
    users: Arc<dyn UserRepository>,
    stats: Arc<GlobalStatsCache>,
    policy: SelectionPolicy,
    rng: Mutex<StdRng>,
}

impl AdSelector {
    pub fn new(
        cache: Arc<AdMirrorCache>,
        ads: Arc<dyn AdRepository>,
        users: Arc<dyn UserRepository>,
        stats: Arc<GlobalStatsCache>,
        policy: SelectionPolicy,
    ) -> Self {
        Self {
            cache,
            ads,
            users,
            stats,
            policy,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the entropy-seeded generator, for reproducible draws.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    pub async fn pick_ad(&self, slot: SlotType, ctx: &RequestContext) -> Result<ServedAd> {
        self.pick_ad_at(slot, ctx, Utc::now()).await
    }

    pub async fn pick_ad_at(
        &self,
        slot: SlotType,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<ServedAd> {
        let (candidates, owners) = self.eligible(slot, now).await?;
        if candidates.is_empty() {
            info!(%slot, "no ads available");
            return Err(DomainError::NoAdsAvailable(slot));
        }

        let global_clicks = self.stats.click_volume().await;
        // one totals read per owner per draw
        let mut bonuses: HashMap<&str, f64> = HashMap::new();
        let mut weights = Vec::with_capacity(candidates.len());
        for ad in &candidates {
            let owner = owners.get(&ad.owner_id).and_then(Option::as_ref);
            let mut weight = score(ad, owner, global_clicks, now, &self.policy);
            let bonus = match bonuses.get(ad.owner_id.as_str()) {
                Some(bonus) => *bonus,
                None => {
                    let bonus = match self.users.owner_totals(&ad.owner_id).await {
                        Ok(totals) => owner_bonus(totals),
                        Err(err) => {
                            warn!(owner_id = %ad.owner_id, error = %err, "owner totals unavailable, keeping partial weight");
                            0.0
                        }
                    };
                    bonuses.insert(&ad.owner_id, bonus);
                    bonus
                }
            };
            weight += bonus;
            weights.push(weight);
        }

        let chosen = {
            let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            weighted_index(&weights, &mut *rng)
        };
        let Some(idx) = chosen else {
            return Err(DomainError::NoAdsAvailable(slot));
        };
        let ad = candidates[idx].clone();
        debug!(%slot, ad_id = ad.id, weight = weights[idx], pool = candidates.len(), "ad selected");

        let owner = owners.get(&ad.owner_id).and_then(Option::as_ref);
        let ad = self.finish(ad, ctx).await;
        Ok(ServedAd::new(ad, owner))
    }

    /// Serves one advertisement by id, pending ones included. Ads of banned
    /// owners are reported as missing.
    pub async fn serve_by_id(&self, id: AdId, ctx: &RequestContext) -> Result<ServedAd> {
        let ad = match self.cache.get(id).await {
            Some(ad) => ad,
            None => self
                .ads
                .get(id)
                .await?
                .ok_or_else(|| DomainError::ad_not_found(id))?,
        };

        let owner = self.users.get_owner(&ad.owner_id).await?;
        if owner.as_ref().is_some_and(|o| o.banned) {
            warn!(ad_id = id, owner_id = %ad.owner_id, "requested ad belongs to a banned owner");
            return Err(DomainError::ad_not_found(id));
        }

        let ad = self.finish(ad, ctx).await;
        Ok(ServedAd::new(ad, owner.as_ref()))
    }

    /// Live candidates for `slot` and the owner lookup made while filtering.
    /// Ads past their expiry are skipped even before the sweeper removes them.
    async fn eligible(
        &self,
        slot: SlotType,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Advertisement>, HashMap<String, Option<Owner>>)> {
        let all = self.cache.list().await?;
        let mut owners: HashMap<String, Option<Owner>> = HashMap::new();
        let mut candidates = Vec::new();

        let live = all
            .into_iter()
            .filter(|ad| !ad.pending && ad.slot == slot && !ad.is_expired_at(now));
        for ad in live {
            if !owners.contains_key(&ad.owner_id) {
                match self.users.get_owner(&ad.owner_id).await {
                    Ok(owner) => {
                        owners.insert(ad.owner_id.clone(), owner);
                    }
                    Err(err) => {
                        // banned status unknown, leave it out of this draw
                        warn!(ad_id = ad.id, owner_id = %ad.owner_id, error = %err, "owner lookup failed");
                        continue;
                    }
                }
            }
            let banned = owners
                .get(&ad.owner_id)
                .and_then(Option::as_ref)
                .is_some_and(|o| o.banned);
            if !banned {
                candidates.push(ad);
            }
        }

        Ok((candidates, owners))
    }

    /// Heals a missing image URL and refreshes counters from storage.
    async fn finish(&self, mut ad: Advertisement, ctx: &RequestContext) -> Advertisement {
        if ad.image_url.is_empty() {
            let url = ad.canonical_image_url(&ctx.domain);
            match self.ads.set_image_url(ad.id, &url).await {
                Ok(Some(updated)) => {
                    info!(ad_id = ad.id, %url, "image url repaired");
                    self.cache.upsert(updated).await;
                }
                Ok(None) => warn!(ad_id = ad.id, "ad vanished while repairing its image url"),
                Err(err) => warn!(ad_id = ad.id, error = %err, "failed to persist repaired image url"),
            }
            ad.image_url = url;
        }

        match self.ads.ad_stats(ad.id).await {
            Ok(Some(stats)) => {
                ad.views = stats.views;
                ad.clicks = stats.clicks;
            }
            Ok(None) => {}
            Err(err) => warn!(ad_id = ad.id, error = %err, "ad stats unavailable, serving cached counters"),
        }
        ad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{GlobalStats, MockAdRepository, MockUserRepository};
    use std::time::Duration as StdDuration;

    fn ad(id: AdId, owner: &str, slot: SlotType) -> Advertisement {
        Advertisement {
            id,
            owner_id: owner.to_string(),
            level_id: 1,
            slot,
            image_url: format!("https://cdn.test/{id}.webp"),
            created_at: Utc::now() - Duration::days(3),
            pending: false,
            boost_count: 0,
            views: 0,
            clicks: 0,
        }
    }

    fn owner(id: &str) -> Owner {
        Owner {
            id: id.to_string(),
            username: id.to_string(),
            ..Owner::default()
        }
    }

    fn selector(
        rows: Vec<Advertisement>,
        owners: Vec<Owner>,
        mut ads: MockAdRepository,
    ) -> AdSelector {
        ads.expect_list_all().returning(move || Ok(rows.clone()));
        ads.expect_ad_stats().returning(|_| Ok(None));
        let ads: Arc<dyn AdRepository> = Arc::new(ads);

        let mut users = MockUserRepository::new();
        let by_id: HashMap<String, Owner> = owners.into_iter().map(|o| (o.id.clone(), o)).collect();
        users
            .expect_get_owner()
            .returning(move |id| Ok(by_id.get(id).cloned()));
        users.expect_owner_totals().returning(|_| Ok(Engagement::default()));
        users.expect_global_stats().returning(|| Ok(GlobalStats::default()));
        let users: Arc<dyn UserRepository> = Arc::new(users);

        let cache = Arc::new(AdMirrorCache::new(ads.clone(), StdDuration::from_secs(900)));
        let stats = Arc::new(GlobalStatsCache::new(users.clone(), StdDuration::from_secs(600)));
        AdSelector::new(cache, ads, users, stats, SelectionPolicy::default())
            .with_rng(StdRng::seed_from_u64(7))
    }

    #[test]
    fn weighted_draw_matches_distribution() {
        let weights = [1.0, 2.0, 3.0, 4.0];
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let draws = 100_000;
        let mut counts = [0usize; 4];
        for _ in 0..draws {
            counts[weighted_index(&weights, &mut rng).unwrap()] += 1;
        }

        let total: f64 = weights.iter().sum();
        let chi_square: f64 = weights
            .iter()
            .zip(counts)
            .map(|(w, observed)| {
                let expected = draws as f64 * w / total;
                (observed as f64 - expected).powi(2) / expected
            })
            .sum();
        // 3 degrees of freedom, p = 0.001
        assert!(chi_square < 16.27, "chi-square {chi_square} for {counts:?}");
    }

    #[test]
    fn degenerate_weights_draw_uniformly() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut seen = [false; 3];
        for _ in 0..300 {
            let idx = weighted_index(&[0.0, -2.0, f64::NAN], &mut rng).unwrap();
            seen[idx] = true;
        }
        assert_eq!(seen, [true; 3]);
        assert_eq!(weighted_index(&[], &mut rng), None);
    }

    #[test]
    fn zero_weight_entries_are_never_drawn() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..1_000 {
            assert_eq!(weighted_index(&[0.0, 5.0, -1.0], &mut rng), Some(1));
        }
    }

    #[test]
    fn score_components() {
        let policy = SelectionPolicy::default();
        let now = Utc::now();
        let mut a = ad(1, "o", SlotType::Banner);
        a.created_at = now - Duration::hours(30);
        a.boost_count = 4;
        a.views = 100;
        a.clicks = 5;

        let mut o = owner("o");
        o.verified = true;
        o.is_staff = true;

        // 1 + 4 boosts + 3 verified + 1.5 staff
        // + fresh 3*exp(-5/max(1, 0.025*400)) + settled 6/102 + ctr 10*0.05
        let expected = 1.0 + 4.0 + 3.0 + 1.5 + 3.0 * (-0.5f64).exp() + 6.0 / 102.0 + 0.5;
        let got = score(&a, Some(&o), 400, now, &policy);
        assert!((got - expected).abs() < 1e-9, "{got} != {expected}");
    }

    #[test]
    fn brand_new_unowned_ad_gets_full_freshness_bonus() {
        let now = Utc::now();
        let mut a = ad(1, "o", SlotType::Banner);
        a.created_at = now;
        assert!((score(&a, None, 0, now, &SelectionPolicy::default()) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn glow_tiers() {
        let mut a = ad(1, "o", SlotType::Banner);
        let mut o = owner("o");
        assert_eq!(glow_tier(&a, Some(&o)), 0);
        a.boost_count = 2;
        assert_eq!(glow_tier(&a, Some(&o)), 1);
        o.verified = true;
        assert_eq!(glow_tier(&a, Some(&o)), 2);
        a.boost_count = 16;
        assert_eq!(glow_tier(&a, Some(&o)), 3);
    }

    #[test]
    fn owner_bonus_requires_both_counters() {
        assert_eq!(owner_bonus(Engagement { views: 0, clicks: 4 }), 0.0);
        assert_eq!(owner_bonus(Engagement { views: 8, clicks: 2 }), 0.25);
    }

    #[tokio::test]
    async fn never_serves_pending_banned_or_other_slot() {
        let mut pending = ad(1, "alice", SlotType::Banner);
        pending.pending = true;
        let banned = ad(2, "mallory", SlotType::Banner);
        let other_slot = ad(3, "alice", SlotType::Square);
        let live = ad(4, "alice", SlotType::Banner);

        let mut mallory = owner("mallory");
        mallory.banned = true;
        let sel = selector(
            vec![pending, banned, other_slot, live],
            vec![owner("alice"), mallory],
            MockAdRepository::new(),
        );

        for _ in 0..200 {
            let served = sel
                .pick_ad(SlotType::Banner, &RequestContext::new("https://ads.test"))
                .await
                .unwrap();
            assert_eq!(served.ad.id, 4);
        }
    }

    #[tokio::test]
    async fn expired_ads_are_not_drawn_before_the_sweep() {
        let mut expired = ad(1, "alice", SlotType::Banner);
        expired.created_at = Utc::now() - Duration::days(8);
        let live = ad(2, "alice", SlotType::Banner);
        let sel = selector(vec![expired.clone(), live], vec![owner("alice")], MockAdRepository::new());

        for _ in 0..100 {
            let served = sel.pick_ad(SlotType::Banner, &RequestContext::default()).await.unwrap();
            assert_eq!(served.ad.id, 2);
        }

        let only_expired = selector(vec![expired], vec![owner("alice")], MockAdRepository::new());
        assert_eq!(
            only_expired
                .pick_ad(SlotType::Banner, &RequestContext::default())
                .await
                .unwrap_err(),
            DomainError::NoAdsAvailable(SlotType::Banner)
        );
    }

    #[tokio::test]
    async fn owner_totals_read_once_per_owner_per_draw() {
        let rows = vec![
            ad(1, "alice", SlotType::Banner),
            ad(2, "alice", SlotType::Banner),
            ad(3, "alice", SlotType::Banner),
            ad(4, "bob", SlotType::Banner),
        ];
        let mut ads = MockAdRepository::new();
        ads.expect_list_all().returning(move || Ok(rows.clone()));
        ads.expect_ad_stats().returning(|_| Ok(None));
        let ads: Arc<dyn AdRepository> = Arc::new(ads);

        let mut users = MockUserRepository::new();
        users.expect_get_owner().returning(|id| Ok(Some(owner(id))));
        users
            .expect_owner_totals()
            .withf(|id| id == "alice")
            .times(1)
            .returning(|_| Ok(Engagement { views: 10, clicks: 1 }));
        users
            .expect_owner_totals()
            .withf(|id| id == "bob")
            .times(1)
            .returning(|_| Ok(Engagement::default()));
        users.expect_global_stats().returning(|| Ok(GlobalStats::default()));
        let users: Arc<dyn UserRepository> = Arc::new(users);

        let cache = Arc::new(AdMirrorCache::new(ads.clone(), StdDuration::from_secs(900)));
        let stats = Arc::new(GlobalStatsCache::new(users.clone(), StdDuration::from_secs(600)));
        let sel = AdSelector::new(cache, ads, users, stats, SelectionPolicy::default());

        sel.pick_ad(SlotType::Banner, &RequestContext::default()).await.unwrap();
    }

    #[tokio::test]
    async fn empty_pool_is_no_ads_available() {
        let mut pending = ad(1, "alice", SlotType::Skyscraper);
        pending.pending = true;
        let sel = selector(vec![pending], vec![owner("alice")], MockAdRepository::new());

        let err = sel
            .pick_ad(SlotType::Skyscraper, &RequestContext::default())
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::NoAdsAvailable(SlotType::Skyscraper));
    }

    #[tokio::test]
    async fn owner_lookup_failure_excludes_only_that_ad() {
        let rows = vec![ad(1, "ghost", SlotType::Banner), ad(2, "alice", SlotType::Banner)];
        let mut ads = MockAdRepository::new();
        ads.expect_list_all().returning(move || Ok(rows.clone()));
        ads.expect_ad_stats().returning(|_| Ok(None));
        let ads: Arc<dyn AdRepository> = Arc::new(ads);

        let mut users = MockUserRepository::new();
        users.expect_get_owner().returning(|id| {
            if id == "ghost" {
                Err(DomainError::Storage("timeout".into()))
            } else {
                Ok(Some(owner(id)))
            }
        });
        users
            .expect_owner_totals()
            .returning(|_| Err(DomainError::Storage("timeout".into())));
        users.expect_global_stats().returning(|| Ok(GlobalStats::default()));
        let users: Arc<dyn UserRepository> = Arc::new(users);

        let cache = Arc::new(AdMirrorCache::new(ads.clone(), StdDuration::from_secs(900)));
        let stats = Arc::new(GlobalStatsCache::new(users.clone(), StdDuration::from_secs(600)));
        let sel = AdSelector::new(cache, ads, users, stats, SelectionPolicy::default());

        for _ in 0..50 {
            let served = sel.pick_ad(SlotType::Banner, &RequestContext::default()).await.unwrap();
            assert_eq!(served.ad.id, 2);
        }
    }

    #[tokio::test]
    async fn missing_image_url_is_repaired_and_counters_refreshed() {
        let mut bare = ad(9, "alice", SlotType::Square);
        bare.image_url.clear();

        let mut ads = MockAdRepository::new();
        let rows = vec![bare.clone()];
        ads.expect_list_all().returning(move || Ok(rows.clone()));
        ads.expect_set_image_url()
            .withf(|id, url| *id == 9 && url == "https://ads.test/cdn/square/alice-9.webp")
            .times(1)
            .returning(move |_, url| {
                let mut fixed = bare.clone();
                fixed.image_url = url.to_string();
                Ok(Some(fixed))
            });
        ads.expect_ad_stats()
            .returning(|_| Ok(Some(Engagement { views: 12, clicks: 3 })));
        let ads: Arc<dyn AdRepository> = Arc::new(ads);

        let mut users = MockUserRepository::new();
        users.expect_get_owner().returning(|id| Ok(Some(owner(id))));
        users.expect_owner_totals().returning(|_| Ok(Engagement::default()));
        users.expect_global_stats().returning(|| Ok(GlobalStats::default()));
        let users: Arc<dyn UserRepository> = Arc::new(users);

        let cache = Arc::new(AdMirrorCache::new(ads.clone(), StdDuration::from_secs(900)));
        let stats = Arc::new(GlobalStatsCache::new(users.clone(), StdDuration::from_secs(600)));
        let sel = AdSelector::new(cache.clone(), ads, users, stats, SelectionPolicy::default());

        let served = sel
            .pick_ad(SlotType::Square, &RequestContext::new("https://ads.test/"))
            .await
            .unwrap();
        assert_eq!(served.ad.image_url, "https://ads.test/cdn/square/alice-9.webp");
        assert_eq!((served.ad.views, served.ad.clicks), (12, 3));
        assert_eq!(served.expiry, served.ad.expires_at().timestamp());
        assert_eq!(
            cache.get(9).await.unwrap().image_url,
            "https://ads.test/cdn/square/alice-9.webp"
        );
    }

    #[tokio::test]
    async fn serve_by_id_hides_banned_owners() {
        let mut mallory = owner("mallory");
        mallory.banned = true;
        let sel = selector(
            vec![ad(1, "mallory", SlotType::Banner), ad(2, "alice", SlotType::Banner)],
            vec![mallory, owner("alice")],
            MockAdRepository::new(),
        );
        sel.cache.list().await.unwrap();

        let ctx = RequestContext::default();
        assert!(matches!(
            sel.serve_by_id(1, &ctx).await,
            Err(DomainError::NotFound(..))
        ));
        assert_eq!(sel.serve_by_id(2, &ctx).await.unwrap().ad.id, 2);
    }
}
