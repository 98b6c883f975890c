//! Background maintenance on a fixed period.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::clock::ClubTime;
use crate::error::BookingError;
use crate::ledger::ClassPackLedger;

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;
    fn period(&self) -> Duration;
    async fn run(&self) -> Result<(), BookingError>;
}

/// Runs `task` every period until `shutdown` flips to `true` or its sender
/// is dropped. A failing run is logged and the next tick proceeds.
pub fn spawn_periodic(
    task: Arc<dyn PeriodicTask>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(task.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = task.run().await {
                        error!(task = task.name(), error = %err, "Periodic task failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(task = task.name(), "Periodic task stopped");
                        break;
                    }
                }
            }
        }
    })
}

/// Marks class-pack balances past their expiry as EXPIRED.
pub struct ExpireClassPackBalances {
    packs: Arc<dyn ClassPackLedger>,
    time: ClubTime,
    period: Duration,
}

impl ExpireClassPackBalances {
    pub fn new(packs: Arc<dyn ClassPackLedger>, time: ClubTime, period: Duration) -> Self {
        Self { packs, time, period }
    }
}

#[async_trait]
impl PeriodicTask for ExpireClassPackBalances {
    fn name(&self) -> &'static str {
        "expire-class-pack-balances"
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn run(&self) -> Result<(), BookingError> {
        let expired = self.packs.expire_due(self.time.now_utc()).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "Class pack balances expired");
        }
        Ok(())
    }
}
