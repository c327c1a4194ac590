use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use shared_database::DbHandle;

use crate::error::LifecycleError;
use crate::models::{PollSummary, Resolution};
use crate::services::reconciliation::ReconciliationEngine;

const BATCH_SIZE: i64 = 50;

/// Retries payments the gateway never reported back on.
pub struct PaymentPoller {
    store: DbHandle,
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
    min_age: chrono::Duration,
}

impl PaymentPoller {
    pub fn new(
        store: DbHandle,
        engine: Arc<ReconciliationEngine>,
        interval: Duration,
        min_age: chrono::Duration,
    ) -> Self {
        Self {
            store,
            engine,
            interval,
            min_age,
        }
    }

    /// Resolves one batch of stale pending payments. Per-payment errors are counted, not returned.
    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<PollSummary, LifecycleError> {
        let stale = self
            .store
            .stale_pending_payments(now - self.min_age, BATCH_SIZE)
            .await?;

        let mut summary = PollSummary::default();
        for payment in stale {
            summary.checked += 1;
            match self.engine.resolve(&payment.transaction_uuid, now).await {
                Ok(Resolution::Settled { .. }) => summary.reconciled += 1,
                Ok(Resolution::Failed { .. }) => summary.failed += 1,
                Ok(Resolution::StillPending { .. }) => summary.pending += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!(
                        "Polling payment {} failed ({}): {}",
                        payment.transaction_uuid,
                        e.code(),
                        e
                    );
                }
            }
        }

        if summary.checked > 0 {
            info!(
                "Payment poll: {} checked, {} reconciled, {} failed, {} pending, {} errors",
                summary.checked, summary.reconciled, summary.failed, summary.pending, summary.errors
            );
        }
        Ok(summary)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Payment poller started, interval {:?}", self.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once(Utc::now()).await {
                        error!("Payment poll failed: {}", e);
                    }
                }
            }
        }
        info!("Payment poller stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
