use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use shared_database::{DbHandle, StoreError};

/// Expires confirmed appointments whose credential deadline has passed unused.
pub struct ExpirySweeper {
    store: DbHandle,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(store: DbHandle, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// One pass. Safe to repeat and to run alongside check-ins.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tx = self.store.begin().await?;
        let expired = tx.expire_stale(now).await?;
        tx.commit().await?;

        if expired > 0 {
            info!("Expired {} unredeemed appointments", expired);
        } else {
            debug!("Sweep found nothing to expire");
        }
        Ok(expired)
    }

    /// Sweeps on every tick until `shutdown` changes or its sender is dropped.
    /// The first tick is immediate.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Expiry sweeper started, interval {:?}", self.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        error!("Expiry sweep failed: {}", e);
                    }
                }
            }
        }
        info!("Expiry sweeper stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
