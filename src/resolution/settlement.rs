use crate::config::config::GradingCfg;
use crate::core::retry::with_retries;
use crate::core::types::{GradedPool, PoolId};
use crate::ledger::client::LedgerClient;
use crate::social::announce;
use crate::social::client::SocialClient;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Default, PartialEq)]
pub struct SettlementReport {
    pub claimed_bets: Vec<u64>,
    pub claim_error: Option<String>,
    pub announced: Vec<PoolId>,
}

/// Claims payouts and posts close announcements for pools committed in a
/// batch run. Runs once per batch, after the ledger writes have had time
/// to finalize.
pub struct Settlement {
    ledger: Arc<dyn LedgerClient>,
    social: Arc<dyn SocialClient>,
    frontend_url_prefix: String,
    settle_delay: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl Settlement {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        social: Arc<dyn SocialClient>,
        frontend_url_prefix: String,
        cfg: &GradingCfg,
    ) -> Self {
        Self {
            ledger,
            social,
            frontend_url_prefix,
            settle_delay: cfg.settle_delay,
            max_attempts: cfg.max_attempts,
            retry_backoff: cfg.retry_backoff,
        }
    }

    pub async fn settle(&self, committed: &BTreeMap<PoolId, GradedPool>) -> SettlementReport {
        let mut report = SettlementReport::default();
        if committed.is_empty() {
            return report;
        }

        if !self.settle_delay.is_zero() {
            info!(delay = ?self.settle_delay, pools = committed.len(), "Waiting before claiming payouts");
            tokio::time::sleep(self.settle_delay).await;
        }

        let mut bet_ids = Vec::new();
        for pool_id in committed.keys() {
            match self.ledger.list_bets(*pool_id).await {
                Ok(bets) => bet_ids.extend(bets.into_iter().filter(|b| !b.payout_claimed).map(|b| b.id)),
                Err(e) => warn!(pool = %pool_id, "Could not list bets: {:#}", e),
            }
        }

        if !bet_ids.is_empty() {
            let claimed = with_retries(
                self.max_attempts,
                self.retry_backoff,
                |_: &anyhow::Error| true,
                |_| self.ledger.claim_payouts(&bet_ids),
            )
            .await;
            match claimed {
                Ok(receipt) => {
                    metrics::counter!("ledger_writes_total", "op" => "claimPayouts", "status" => "ok")
                        .increment(1);
                    info!(bets = bet_ids.len(), tx = %receipt.tx_hash, "Payouts claimed");
                    report.claimed_bets = bet_ids;
                }
                Err(exhausted) => {
                    metrics::counter!("ledger_writes_total", "op" => "claimPayouts", "status" => "error")
                        .increment(1);
                    error!(
                        bets = ?bet_ids,
                        attempts = exhausted.attempts,
                        "Claiming payouts failed: {:#}",
                        exhausted.last_error
                    );
                    report.claim_error = Some(format!("{:#}", exhausted.last_error));
                }
            }
        }

        for (pool_id, graded) in committed {
            if graded.pool.total_bets <= Decimal::ZERO {
                continue;
            }
            let Some(text) = announce::close_text(&graded.pool, graded.verdict.result, &self.frontend_url_prefix)
            else {
                continue;
            };
            match self.social.post_update(&text, None).await {
                Ok(post_id) => {
                    info!(pool = %pool_id, post = %post_id, "Posted close announcement");
                    report.announced.push(*pool_id);
                }
                Err(e) => warn!(pool = %pool_id, "Close announcement failed: {:#}", e),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Bet, GradeResult, Pool, PoolStatus, Verdict};
    use crate::ledger::simulator::{LedgerCall, SimLedgerClient};
    use crate::social::testing::RecordingSocial;
    use chrono::Utc;

    fn cfg(settle_delay: Duration) -> GradingCfg {
        GradingCfg {
            settle_delay,
            retry_backoff: Duration::ZERO,
            ..GradingCfg::default()
        }
    }

    fn graded(id: u64, result: GradeResult, total_bets: i64) -> GradedPool {
        let mut pool = Pool::sample(id, Utc::now(), chrono::Duration::days(1));
        pool.status = PoolStatus::Graded;
        pool.total_bets = Decimal::new(total_bets, 0);
        let mut verdict = Verdict::error("");
        verdict.result = result;
        GradedPool { pool, verdict }
    }

    async fn ledger_with_bets() -> Arc<SimLedgerClient> {
        let ledger = Arc::new(SimLedgerClient::new());
        for (id, pool, claimed) in [(1, 1, false), (2, 1, true), (3, 2, false), (4, 9, false)] {
            ledger
                .seed_bet(Bet {
                    id,
                    pool_id: PoolId(pool),
                    payout_claimed: claimed,
                })
                .await;
        }
        ledger
    }

    #[tokio::test]
    async fn test_claims_unpaid_bets_and_announces() {
        let ledger = ledger_with_bets().await;
        let social = Arc::new(RecordingSocial::default());
        let settlement = Settlement::new(ledger.clone(), social.clone(), "https://app/".to_string(), &cfg(Duration::ZERO));

        let committed = BTreeMap::from([
            (PoolId(1), graded(1, GradeResult::OptionA, 250)),
            (PoolId(2), graded(2, GradeResult::Push, 0)),
        ]);
        let report = settlement.settle(&committed).await;

        assert_eq!(report.claimed_bets, vec![1, 3]);
        assert_eq!(ledger.calls().await, vec![LedgerCall::ClaimPayouts(vec![1, 3])]);

        // pool 2 had no bets placed, so only pool 1 is announced
        assert_eq!(report.announced, vec![PoolId(1)]);
        let published = social.published();
        assert_eq!(published.len(), 1);
        assert!(published[0].0.starts_with("🎯 Market Closed!"));
        assert!(published[0].0.contains("Option A wins: Yes"));
    }

    #[tokio::test]
    async fn test_nothing_committed_is_a_no_op() {
        let ledger = ledger_with_bets().await;
        let social = Arc::new(RecordingSocial::default());
        let settlement = Settlement::new(ledger.clone(), social.clone(), String::new(), &cfg(Duration::from_secs(3600)));

        // returns immediately despite the long delay
        let report = settlement.settle(&BTreeMap::new()).await;
        assert_eq!(report, SettlementReport::default());
        assert!(ledger.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_announcement_failure_does_not_stop_others() {
        let ledger = Arc::new(SimLedgerClient::new());
        let social = Arc::new(RecordingSocial {
            fail_posts: true,
            ..RecordingSocial::default()
        });
        let settlement = Settlement::new(ledger, social, String::new(), &cfg(Duration::ZERO));

        let committed = BTreeMap::from([
            (PoolId(1), graded(1, GradeResult::OptionB, 10)),
            (PoolId(2), graded(2, GradeResult::OptionA, 10)),
        ]);
        let report = settlement.settle(&committed).await;
        assert!(report.announced.is_empty());
        assert!(report.claimed_bets.is_empty());
    }

    #[tokio::test]
    async fn test_failed_claim_is_retried() {
        let ledger = ledger_with_bets().await;
        ledger.fail_next_claims(2).await;
        let social = Arc::new(RecordingSocial::default());
        let settlement = Settlement::new(ledger.clone(), social, String::new(), &cfg(Duration::ZERO));

        let committed = BTreeMap::from([(PoolId(1), graded(1, GradeResult::OptionA, 0))]);
        let report = settlement.settle(&committed).await;

        assert_eq!(report.claimed_bets, vec![1]);
        assert_eq!(report.claim_error, None);
        assert!(ledger.list_bets(PoolId(1)).await.unwrap().iter().all(|b| b.payout_claimed));
    }

    #[tokio::test]
    async fn test_claim_failure_after_retries_is_reported() {
        let ledger = ledger_with_bets().await;
        ledger.fail_next_claims(10).await;
        let social = Arc::new(RecordingSocial::default());
        let settlement = Settlement::new(ledger.clone(), social.clone(), String::new(), &cfg(Duration::ZERO));

        let committed = BTreeMap::from([(PoolId(1), graded(1, GradeResult::OptionA, 40))]);
        let report = settlement.settle(&committed).await;

        assert!(report.claimed_bets.is_empty());
        assert!(report.claim_error.unwrap().contains("claimPayouts"));
        assert_eq!(ledger.state.lock().await.failing_claims, 7);
        assert!(ledger.calls().await.is_empty());
        // the close announcement still goes out
        assert_eq!(report.announced, vec![PoolId(1)]);
    }
}
