//! configs
//!
//! Layered settings for the ad server: compiled-in defaults, then an
//! optional TOML file, then `ADSERVER__SECTION__KEY` environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

pub const ENV_PREFIX: &str = "ADSERVER";
pub const DEFAULT_CONFIG_FILE: &str = "config/adserver.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub validator: ValidatorSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub sweeper: SweeperSettings,
    pub selection: SelectionSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Origin used in synthesized image URLs.
    pub public_domain: String,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// Without a URL the server runs on the in-memory store.
    pub url: Option<SecretString>,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct ValidatorSettings {
    pub endpoint: String,
    pub credential: Option<SecretString>,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl ValidatorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub ad_ttl_secs: u64,
    pub stats_ttl_secs: u64,
    pub trust_ttl_secs: u64,
    pub negative_ttl_secs: u64,
    pub trust_store_freshness_secs: u64,
    pub purge_interval_secs: u64,
}

impl CacheSettings {
    pub fn ad_ttl(&self) -> Duration {
        Duration::from_secs(self.ad_ttl_secs)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }

    pub fn trust_ttl(&self) -> Duration {
        Duration::from_secs(self.trust_ttl_secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    pub fn trust_store_freshness(&self) -> Duration {
        Duration::from_secs(self.trust_store_freshness_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    pub per_second: f64,
    pub burst: u32,
    pub max_tracked: usize,
    pub sweep_interval_secs: u64,
}

impl RateLimitSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperSettings {
    pub interval_secs: u64,
    pub retention_days: i64,
    pub media_root: PathBuf,
}

impl SweeperSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionSettings {
    pub fresh_window_hours: i64,
    pub settle_after_hours: i64,
    pub click_volume_fraction: f64,
    pub verified_bonus: f64,
    pub staff_bonus: f64,
    pub admin_bonus: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    pub format: LogFormat,
}

impl Settings {
    /// Reads `.env`, then `config/adserver.toml` if present, then the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::build(Some(Path::new(DEFAULT_CONFIG_FILE)), None)
    }

    /// Like [`load`](Self::load) with an explicit file, which must exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        if !path.exists() {
            return Err(ConfigError::Invalid(format!("config file {} not found", path.display())));
        }
        Self::build(Some(path), None)
    }

    /// `env` replaces the process environment, for tests.
    fn build(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.public_domain", "http://localhost:8080")?
            .set_default("database.max_connections", 10)?
            .set_default("validator.endpoint", "https://argon.globed.dev/v1/validation/check")?
            .set_default("validator.timeout_secs", 15)?
            .set_default("validator.user_agent", "PlayerAdvertisements/1.0")?
            .set_default("cache.ad_ttl_secs", 900)?
            .set_default("cache.stats_ttl_secs", 600)?
            .set_default("cache.trust_ttl_secs", 21_600)?
            .set_default("cache.negative_ttl_secs", 3_600)?
            .set_default("cache.trust_store_freshness_secs", 86_400)?
            .set_default("cache.purge_interval_secs", 600)?
            .set_default("rate_limit.per_second", 15.0)?
            .set_default("rate_limit.burst", 40)?
            .set_default("rate_limit.max_tracked", 10_000)?
            .set_default("rate_limit.sweep_interval_secs", 21_600)?
            .set_default("sweeper.interval_secs", 43_200)?
            .set_default("sweeper.retention_days", 7)?
            .set_default("sweeper.media_root", "ad_storage")?
            .set_default("selection.fresh_window_hours", 60)?
            .set_default("selection.settle_after_hours", 24)?
            .set_default("selection.click_volume_fraction", 0.025)?
            .set_default("selection.verified_bonus", 3.0)?
            .set_default("selection.staff_bonus", 1.5)?
            .set_default("selection.admin_bonus", 1.0)?
            .set_default("logging.filter", "info")?
            .set_default("logging.format", "json")?;

        if let Some(path) = path {
            if path.exists() {
                debug!(path = %path.display(), "loading config file");
                builder = builder.add_source(config::File::from(path));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .ignore_empty(true)
                .source(env),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |what: &str| Err(ConfigError::Invalid(format!("{what} must be greater than zero")));

        if self.rate_limit.per_second <= 0.0 || !self.rate_limit.per_second.is_finite() {
            return zero("rate_limit.per_second");
        }
        if self.rate_limit.burst == 0 {
            return zero("rate_limit.burst");
        }
        if self.rate_limit.max_tracked == 0 {
            return zero("rate_limit.max_tracked");
        }
        let durations = [
            ("cache.ad_ttl_secs", self.cache.ad_ttl_secs),
            ("cache.stats_ttl_secs", self.cache.stats_ttl_secs),
            ("cache.trust_ttl_secs", self.cache.trust_ttl_secs),
            ("cache.negative_ttl_secs", self.cache.negative_ttl_secs),
            ("cache.trust_store_freshness_secs", self.cache.trust_store_freshness_secs),
            ("cache.purge_interval_secs", self.cache.purge_interval_secs),
            ("rate_limit.sweep_interval_secs", self.rate_limit.sweep_interval_secs),
            ("sweeper.interval_secs", self.sweeper.interval_secs),
            ("validator.timeout_secs", self.validator.timeout_secs),
        ];
        if let Some((name, _)) = durations.iter().copied().find(|(_, secs)| *secs == 0) {
            return zero(name);
        }
        if self.sweeper.retention_days <= 0 {
            return zero("sweeper.retention_days");
        }
        if self.database.max_connections == 0 {
            return zero("database.max_connections");
        }
        if self.selection.fresh_window_hours <= 0 || self.selection.settle_after_hours < 0 {
            return Err(ConfigError::Invalid("selection windows must not be negative".into()));
        }
        if self.selection.click_volume_fraction <= 0.0 {
            return zero("selection.click_volume_fraction");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    #[test]
    fn defaults_match_service_policy() {
        let s = Settings::build(None, env(&[])).unwrap();
        assert_eq!(s.cache.ad_ttl(), Duration::from_secs(15 * 60));
        assert_eq!(s.cache.trust_ttl(), Duration::from_secs(6 * 3600));
        assert_eq!(s.cache.negative_ttl(), Duration::from_secs(3600));
        assert_eq!((s.rate_limit.per_second, s.rate_limit.burst), (15.0, 40));
        assert_eq!(s.rate_limit.max_tracked, 10_000);
        assert_eq!(s.sweeper.retention_days, 7);
        assert_eq!(s.sweeper.media_root, PathBuf::from("ad_storage"));
        assert_eq!(s.validator.timeout(), Duration::from_secs(15));
        assert_eq!(s.logging.format, LogFormat::Json);
        assert!(s.database.url.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let s = Settings::build(
            None,
            env(&[
                ("ADSERVER__SERVER__PORT", "9090"),
                ("ADSERVER__RATE_LIMIT__BURST", "5"),
                ("ADSERVER__DATABASE__URL", "postgres://ads@db/ads"),
                ("ADSERVER__LOGGING__FORMAT", "pretty"),
            ]),
        )
        .unwrap();
        assert_eq!(s.bind_addr(), "0.0.0.0:9090");
        assert_eq!(s.rate_limit.burst, 5);
        assert_eq!(s.logging.format, LogFormat::Pretty);
        assert_eq!(
            s.database.url.as_ref().map(|u| u.expose_secret().to_string()),
            Some("postgres://ads@db/ads".to_string())
        );
    }

    #[test]
    fn file_layer_sits_between_defaults_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("adserver.toml");
        std::fs::write(
            &path,
            "[server]\npublic_domain = \"https://ads.example\"\nport = 7000\n\n[selection]\nverified_bonus = 4.5\n",
        )
        .unwrap();

        let s = Settings::build(Some(&path), env(&[("ADSERVER__SERVER__PORT", "7100")])).unwrap();
        assert_eq!(s.server.public_domain, "https://ads.example");
        assert_eq!(s.server.port, 7100);
        assert_eq!(s.selection.verified_bonus, 4.5);
    }

    #[test]
    fn zero_values_are_rejected() {
        for key in [
            "ADSERVER__RATE_LIMIT__BURST",
            "ADSERVER__CACHE__AD_TTL_SECS",
            "ADSERVER__SWEEPER__RETENTION_DAYS",
        ] {
            let err = Settings::build(None, env(&[(key, "0")])).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{key}: {err}");
        }
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(matches!(
            Settings::load_from(Path::new("/nonexistent/adserver.toml")),
            Err(ConfigError::Invalid(_))
        ));
    }
}
