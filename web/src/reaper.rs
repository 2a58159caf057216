//! Stale session reaper.
//!
//! A single background task that runs for the lifetime of the process. Each
//! tick it lists the stored session records, reclaims every one idle past
//! the configured timeout (engine released, record deleted), and releases
//! any pool handle whose record is already gone so the pool converges with
//! the store after clients disappear without calling end-game.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use engine_pool::EnginePool;
use session_store::SessionStore;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::metrics;

pub struct SessionReaper {
    store: Arc<dyn SessionStore>,
    pool: Arc<EnginePool>,
    interval: Duration,
    timeout: Duration,
    shutdown_signal: AtomicBool,
}

impl SessionReaper {
    pub fn new(
        store: Arc<dyn SessionStore>,
        pool: Arc<EnginePool>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            pool,
            interval,
            timeout,
            shutdown_signal: AtomicBool::new(false),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }

    /// Run the sweep loop until shutdown. Never blocks request serving;
    /// everything happens on this task.
    pub async fn run(self: Arc<Self>) {
        info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "Session reaper started"
        );
        let mut timer = interval(self.interval);
        // The first tick fires immediately; skip it so a restart does not
        // sweep before the server is serving.
        timer.tick().await;

        loop {
            timer.tick().await;
            if self.shutdown_signal.load(Ordering::Relaxed) {
                info!("Session reaper stopping");
                break;
            }
            self.sweep_once().await;
        }
    }

    /// One full sweep. Public so tests can drive it deterministically.
    /// Returns the number of stale records deleted.
    pub async fn sweep_once(&self) -> usize {
        let records = match self.store.list().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to list session records: {e}");
                return 0;
            }
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let timeout_secs = self.timeout.as_secs();

        let mut live: HashSet<String> = HashSet::new();
        let mut stale: Vec<String> = Vec::new();
        for record in records {
            if record.age_secs(now) > timeout_secs {
                stale.push(record.game_id);
            } else {
                live.insert(record.game_id);
            }
        }

        // Everything without a live record loses its engine: stale games
        // and orphaned handles alike.
        let released = self.pool.sweep(|game_id| !live.contains(game_id)).await;

        let mut reaped = 0;
        for game_id in stale {
            match self.store.delete(&game_id).await {
                Ok(()) => {
                    reaped += 1;
                    debug!(game_id = %game_id, "Reaped stale session");
                }
                Err(e) => {
                    warn!(game_id = %game_id, "Failed to delete stale session: {e}");
                }
            }
        }

        if reaped > 0 || released > 0 {
            info!(reaped, released, "Stale session sweep complete");
            metrics::SESSIONS_REAPED.inc_by(reaped as u64);
        }
        reaped
    }
}
