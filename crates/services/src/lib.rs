//! services
//!
//! The ad delivery core: caches, selection, token trust, write paths and
//! the background sweeps that keep them bounded. Everything here talks to
//! the outside world only through the ports in `domains`.

pub mod ad_cache;
pub mod catalog;
pub mod engagement;
pub mod selection;
pub mod stats_cache;
pub mod sweeper;
pub mod tasks;
pub mod token_trust;
pub mod ttl_map;

pub use ad_cache::{AdMirrorCache, DEFAULT_AD_TTL};
pub use catalog::AdCatalog;
pub use engagement::EngagementRecorder;
pub use selection::{AdSelector, RequestContext, SelectionPolicy, ServedAd};
pub use stats_cache::{GlobalStatsCache, DEFAULT_STATS_TTL};
pub use sweeper::ExpirySweeper;
pub use tasks::{TaskIntervals, TaskSupervisor};
pub use token_trust::{TokenTrustCache, TrustTtls};
pub use ttl_map::TtlMap;
