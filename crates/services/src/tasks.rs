//! Background maintenance loops.
//!
//! Each task runs its job once at startup and then on a fixed interval
//! until shutdown is signalled.
//! The signal is only observed between runs, so a sweep already in progress
//! finishes before its task exits.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use domains::RateLimiter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::sweeper::ExpirySweeper;
use crate::token_trust::TokenTrustCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskIntervals {
    pub expiry_sweep: Duration,
    pub limiter_sweep: Duration,
    pub trust_purge: Duration,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            expiry_sweep: Duration::from_secs(12 * 60 * 60),
            limiter_sweep: Duration::from_secs(6 * 60 * 60),
            trust_purge: Duration::from_secs(10 * 60),
        }
    }
}

pub struct TaskSupervisor {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Runs `job` right away and then every `every`.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, every: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut stop = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(task = name, interval_secs = every.as_secs(), "background task started");

            loop {
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        debug!(task = name, "background task tick");
                        job().await;
                    }
                }
            }
            info!(task = name, "background task stopped");
        });
        self.tasks.push((name, handle));
    }

    /// Registers the standard maintenance jobs.
    pub fn start_maintenance(
        &mut self,
        intervals: TaskIntervals,
        sweeper: Arc<ExpirySweeper>,
        limiter: Arc<dyn RateLimiter>,
        trust: Arc<TokenTrustCache>,
    ) {
        let storage = sweeper.clone();
        self.spawn_periodic("expiry-storage-sweep", intervals.expiry_sweep, move || {
            let sweeper = storage.clone();
            async move {
                if let Err(err) = sweeper.sweep_storage().await {
                    error!(error = %err, "storage expiry sweep failed");
                }
            }
        });

        self.spawn_periodic("expiry-file-sweep", intervals.expiry_sweep, move || {
            let sweeper = sweeper.clone();
            async move {
                sweeper.sweep_files().await;
            }
        });

        self.spawn_periodic("rate-limiter-sweep", intervals.limiter_sweep, move || {
            let limiter = limiter.clone();
            async move {
                let tracked = limiter.tracked();
                if limiter.sweep() {
                    warn!(tracked, "rate limiter table reset");
                }
            }
        });

        self.spawn_periodic("trust-purge", intervals.trust_purge, move || {
            let trust = trust.clone();
            async move {
                trust.purge_expired();
            }
        });
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Signals every task and waits for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for (name, handle) in self.tasks {
            if let Err(err) = handle.await {
                error!(task = name, error = %err, "background task panicked");
            }
        }
        info!("background tasks stopped");
    }
}
