use crate::core::types::Actor;
use crate::resolution::scheduler::{BatchReport, ResolutionScheduler};
use crate::resolution::settlement::{Settlement, SettlementReport};
use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs a grading batch, then settles what it committed, on every tick.
pub struct ResolutionActor {
    pub scheduler: ResolutionScheduler,
    pub settlement: Settlement,
    pub batch_interval: Duration,
    pub shutdown: CancellationToken,
}

impl ResolutionActor {
    pub fn new(
        scheduler: ResolutionScheduler,
        settlement: Settlement,
        batch_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            settlement,
            batch_interval,
            shutdown,
        }
    }

    pub async fn run_cycle(&self) -> Result<(BatchReport, SettlementReport)> {
        let report = self.scheduler.run_resolution_batch(Utc::now()).await?;
        let settled = self.settlement.settle(&report.committed).await;
        Ok((report, settled))
    }
}

#[async_trait::async_trait]
impl Actor for ResolutionActor {
    async fn run(mut self) -> Result<()> {
        info!("ResolutionActor started");
        let mut tick = tokio::time::interval(self.batch_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("ResolutionActor: shutdown requested");
                    break;
                }

                _ = tick.tick() => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            // pools not yet written stay pending for the next run
                            warn!("ResolutionActor: shutdown requested mid-cycle, abandoning it");
                            break;
                        }
                        outcome = self.run_cycle() => match outcome {
                            Ok((report, settled)) => info!(
                                committed = report.committed.len(),
                                claimed = settled.claimed_bets.len(),
                                announced = settled.announced.len(),
                                "Resolution cycle finished"
                            ),
                            Err(e) => error!("ResolutionActor: batch failed: {:#}", e),
                        },
                    }
                }
            }
        }
        info!("ResolutionActor stopped cleanly");
        Ok(())
    }
}
