//! # adserver
//!
//! Assembles the ad delivery service from configuration: storage, remote
//! token validation, caches, background sweeps and the HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use api_adapters::{build_router, ApiMetrics, AppState};
use auth_adapters::{HttpTokenValidator, ValidatorConfig};
use configs::{DatabaseSettings, LogFormat, LoggingSettings, Settings};
use domains::{AdRepository, TrustRepository, UserRepository};
use services::{
    AdMirrorCache, AdSelector, EngagementRecorder, ExpirySweeper, GlobalStatsCache,
    SelectionPolicy, TaskIntervals, TaskSupervisor, TokenTrustCache, TrustTtls,
};
use storage_adapters::{InMemoryRateLimiter, InMemoryStore, LocalImageStore, RateLimitPolicy};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// One backing store seen through each of its ports.
struct Stores {
    ads: Arc<dyn AdRepository>,
    users: Arc<dyn UserRepository>,
    trust: Arc<dyn TrustRepository>,
}

impl Stores {
    fn shared<S>(store: Arc<S>) -> Self
    where
        S: AdRepository + UserRepository + TrustRepository + 'static,
    {
        Self {
            ads: store.clone(),
            users: store.clone(),
            trust: store,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings = Settings::load().context("loading configuration")?;
    init_tracing(&settings.logging);
    info!(addr = %settings.bind_addr(), "starting adserver");

    let stores = open_stores(&settings.database).await?;

    let images = Arc::new(LocalImageStore::new(settings.sweeper.media_root.clone()));
    images
        .ensure_layout()
        .await
        .with_context(|| format!("preparing {}", settings.sweeper.media_root.display()))?;

    let mut validator = ValidatorConfig::new(settings.validator.endpoint.clone());
    validator.credential = settings.validator.credential.take();
    validator.timeout = settings.validator.timeout();
    validator.user_agent = settings.validator.user_agent.clone();
    let remote = Arc::new(HttpTokenValidator::new(validator).context("building validator client")?);

    let cache = Arc::new(AdMirrorCache::new(stores.ads.clone(), settings.cache.ad_ttl()));
    match cache.refresh().await {
        Ok(count) => info!(count, "advertisement cache warmed"),
        // Not fatal: the first request retries the load.
        Err(err) => warn!(error = %err, "advertisement cache warm-up failed"),
    }

    let stats = Arc::new(GlobalStatsCache::new(stores.users.clone(), settings.cache.stats_ttl()));
    let selector = AdSelector::new(
        cache.clone(),
        stores.ads.clone(),
        stores.users.clone(),
        stats.clone(),
        selection_policy(&settings),
    );
    let engagement = EngagementRecorder::new(cache.clone(), stores.ads.clone(), stores.users.clone());
    let trust = Arc::new(TokenTrustCache::new(
        stores.trust.clone(),
        remote,
        TrustTtls {
            positive: settings.cache.trust_ttl(),
            negative: settings.cache.negative_ttl(),
            store_freshness: settings.cache.trust_store_freshness(),
        },
    ));
    let limiter = Arc::new(InMemoryRateLimiter::new(RateLimitPolicy {
        per_second: settings.rate_limit.per_second,
        burst: settings.rate_limit.burst,
        max_tracked: settings.rate_limit.max_tracked,
    }));

    let sweeper = Arc::new(
        ExpirySweeper::new(
            stores.ads.clone(),
            images,
            cache,
            chrono::Duration::days(settings.sweeper.retention_days),
        )
        .with_stats(stats),
    );

    let mut supervisor = TaskSupervisor::new();
    supervisor.start_maintenance(
        TaskIntervals {
            expiry_sweep: settings.sweeper.interval(),
            limiter_sweep: settings.rate_limit.sweep_interval(),
            trust_purge: settings.cache.purge_interval(),
        },
        sweeper,
        limiter.clone(),
        trust.clone(),
    );
    info!(tasks = ?supervisor.task_names(), "background tasks started");

    let state = AppState {
        selector: Arc::new(selector),
        engagement: Arc::new(engagement),
        trust,
        limiter,
        metrics: Arc::new(ApiMetrics::new()),
        public_domain: Arc::from(settings.server.public_domain.as_str()),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr())
        .await
        .with_context(|| format!("binding {}", settings.bind_addr()))?;
    info!(addr = %settings.bind_addr(), "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    info!("http server stopped, waiting for background tasks");
    supervisor.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

async fn open_stores(db: &DatabaseSettings) -> anyhow::Result<Stores> {
    #[cfg(feature = "db-postgres")]
    {
        use secrecy::ExposeSecret;
        if let Some(url) = &db.url {
            let store = storage_adapters::PgStore::connect(url.expose_secret(), db.max_connections)
                .await
                .context("connecting to postgres")?;
            return Ok(Stores::shared(Arc::new(store)));
        }
    }

    if db.url.is_some() {
        warn!("database url set but postgres support is not compiled in");
    }
    warn!("running on the in-memory store; data is lost on restart");
    Ok(Stores::shared(Arc::new(InMemoryStore::new())))
}

fn selection_policy(settings: &Settings) -> SelectionPolicy {
    let s = &settings.selection;
    SelectionPolicy {
        fresh_window: chrono::Duration::hours(s.fresh_window_hours),
        settle_after: chrono::Duration::hours(s.settle_after_hours),
        click_volume_fraction: s.click_volume_fraction,
        verified_bonus: s.verified_bonus,
        staff_bonus: s.staff_bonus,
        admin_bonus: s.admin_bonus,
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
