use crate::config::config::GradingCfg;
use crate::core::error::{GradingError, LedgerWriteError};
use crate::core::retry::with_retries;
use crate::core::types::{GradeResult, GradedPool, GradingAttempt, Pool, PoolId, PoolStatus, Verdict};
use crate::grading::{EvidenceGatherer, OutcomeDecider};
use crate::kv::client::KvStore;
use crate::ledger::client::LedgerClient;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub const LEASE_KEY: &str = "grading:lease";

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Pools whose verdict reached the ledger in this run.
    pub committed: BTreeMap<PoolId, GradedPool>,
    pub unresolved: Vec<PoolId>,
    pub abandoned: Vec<GradingAttempt>,
    pub ledger_failures: Vec<LedgerWriteError>,
    /// Another run held the lease; nothing was graded.
    pub skipped: bool,
}

/// A terminal verdict is forced back to Unresolved before the pool's
/// decision date or while the named period is still running, whatever
/// the decider concluded.
pub fn apply_temporal_override(verdict: Verdict, pool: &Pool, now: DateTime<Utc>) -> Verdict {
    if !verdict.result.is_terminal() {
        return verdict;
    }
    if !pool.decision_date_reached(now) || !verdict.time_period_analysis.period_has_passed {
        warn!(
            pool = %pool.id,
            result = ?verdict.result,
            decision_date = %pool.decision_date,
            "Terminal verdict before the decision period ended, forcing unresolved"
        );
        let explanation = format!(
            "Decision date {} not reached at {}. {}",
            pool.decision_date, now, verdict.explanation
        );
        return Verdict::unresolved(pool, explanation, verdict.time_period_analysis);
    }
    verdict
}

pub struct ResolutionScheduler {
    ledger: Arc<dyn LedgerClient>,
    gatherer: EvidenceGatherer,
    decider: OutcomeDecider,
    kv: Arc<dyn KvStore>,
    cfg: GradingCfg,
    holder: String,
}

impl ResolutionScheduler {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        gatherer: EvidenceGatherer,
        decider: OutcomeDecider,
        kv: Arc<dyn KvStore>,
        cfg: GradingCfg,
    ) -> Self {
        Self {
            ledger,
            gatherer,
            decider,
            kv,
            cfg,
            holder: format!("pid-{}", std::process::id()),
        }
    }

    /// Grades every pending pool whose betting window has closed. Per-pool
    /// failures are collected in the report; only failing to list pools or
    /// to reach the lease store fails the run.
    pub async fn run_resolution_batch(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let acquired = self
            .kv
            .acquire_lease(LEASE_KEY, &self.holder, self.cfg.lease_ttl)
            .await
            .context("acquiring grading lease")?;
        if !acquired {
            warn!("Another grading run holds the lease, skipping this batch");
            return Ok(BatchReport {
                skipped: true,
                ..BatchReport::default()
            });
        }

        let outcome = self.run_locked(now).await;

        match self.kv.release_lease(LEASE_KEY, &self.holder).await {
            Ok(true) => {}
            Ok(false) => warn!("Grading lease expired before the run finished"),
            Err(e) => error!("Failed to release grading lease: {:#}", e),
        }
        outcome
    }

    async fn run_locked(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let started = Instant::now();
        let pending = self
            .ledger
            .list_pending_pools()
            .await
            .context("listing pending pools")?;

        // the ledger's own PENDING status is the only guard against regrading
        let eligible: Vec<Pool> = pending
            .into_iter()
            .filter(|p| p.status == PoolStatus::Pending && p.betting_closed(now))
            .collect();
        info!(eligible = eligible.len(), "Starting grading batch");

        let mut report = BatchReport::default();
        for pool in eligible {
            self.resolve_pool(pool, now, &mut report).await;
        }

        metrics::histogram!("grading_batch_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(
            committed = report.committed.len(),
            unresolved = report.unresolved.len(),
            abandoned = report.abandoned.len(),
            ledger_failures = report.ledger_failures.len(),
            "Grading batch finished"
        );
        Ok(report)
    }

    #[tracing::instrument(skip_all, fields(pool = %pool.id))]
    async fn resolve_pool(&self, mut pool: Pool, now: DateTime<Utc>, report: &mut BatchReport) {
        let pool_id = pool.id;
        let graded = with_retries(
            self.cfg.max_attempts,
            self.cfg.retry_backoff,
            GradingError::is_retryable,
            |attempt| self.grade_once(&pool, now, attempt),
        )
        .await;

        let verdict = match graded {
            Ok(verdict) => apply_temporal_override(verdict, &pool, now),
            Err(exhausted) => {
                metrics::counter!("grading_attempts_total", "outcome" => "abandoned").increment(1);
                error!(
                    pool = %pool_id,
                    attempts = exhausted.attempts,
                    "Giving up on pool for this run: {}",
                    exhausted.last_error
                );
                report.abandoned.push(GradingAttempt {
                    pool_id,
                    attempt_count: exhausted.attempts,
                    last_error: Some(exhausted.last_error.to_string()),
                });
                return;
            }
        };

        if !verdict.result.is_terminal() {
            info!(pool = %pool_id, explanation = %verdict.explanation, "Pool not ready to grade");
            report.unresolved.push(pool_id);
            return;
        }

        debug_assert!((verdict.probability_sum() - 1.0).abs() < 1e-6);
        match self.ledger.grade_bet(pool_id, verdict.result).await {
            Ok(receipt) => {
                metrics::counter!("ledger_writes_total", "op" => "gradeBet", "status" => "ok")
                    .increment(1);
                metrics::counter!("pools_graded_total", "result" => verdict.result.as_label())
                    .increment(1);
                info!(pool = %pool_id, result = ?verdict.result, tx = %receipt.tx_hash, "Pool graded");
                if let Err(e) = pool.transition(PoolStatus::Graded) {
                    warn!(pool = %pool_id, "{:#}", e);
                }
                report.committed.insert(pool_id, GradedPool { pool, verdict });
            }
            Err(e) => {
                metrics::counter!("ledger_writes_total", "op" => "gradeBet", "status" => "error")
                    .increment(1);
                let failure = LedgerWriteError {
                    op: "gradeBet",
                    pool_id,
                    reason: format!("{e:#}"),
                };
                error!("{}", failure);
                report.ledger_failures.push(failure);
            }
        }
    }

    async fn grade_once(&self, pool: &Pool, now: DateTime<Utc>, attempt: u32) -> Result<Verdict, GradingError> {
        info!(pool = %pool.id, attempt, "Grading pool");
        let evidence = self.gatherer.gather(pool).await.inspect_err(|_| {
            metrics::counter!("grading_attempts_total", "outcome" => "failed").increment(1);
        })?;

        let verdict = self.decider.decide(pool, &evidence, now).await;
        if verdict.result == GradeResult::Error {
            metrics::counter!("grading_attempts_total", "outcome" => "failed").increment(1);
            return Err(GradingError::Decider(verdict.explanation));
        }
        metrics::counter!("grading_attempts_total", "outcome" => "ok").increment(1);
        Ok(verdict)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::harness;
    use super::*;
    use crate::grading::decider::testing::grader_reply;
    use crate::grading::evidence::testing::{CannedSearch, doc};
    use crate::ledger::simulator::LedgerCall;
    use std::time::Duration;

    const IR: &str = "https://ir.acme.com/q1-2024";
    const WIRE: &str = "https://www.reuters.com/acme-q1";

    fn plan() -> Result<String, String> {
        Ok(r#"{"evidence_search_queries": ["acme q1 results", "acme announcement", "acme verification"]}"#.to_string())
    }

    fn summary(text: &str) -> Result<String, String> {
        Ok(serde_json::json!({ "relevant": true, "summary": text }).to_string())
    }

    fn two_sources() -> CannedSearch {
        CannedSearch::with(&[
            ("acme q1 results", vec![doc(IR, "Q1 revenue $1.2B")]),
            ("acme announcement", vec![doc(WIRE, "Acme tops $1B")]),
            ("acme verification", vec![]),
        ])
    }

    fn no_documents() -> CannedSearch {
        CannedSearch::with(&[
            ("acme q1 results", vec![]),
            ("acme announcement", vec![]),
            ("acme verification", vec![]),
        ])
    }

    #[tokio::test]
    async fn test_corroborated_pool_is_committed() {
        let h = harness(
            vec![
                plan(),
                summary("Acme reported $1.2B."),
                summary("Reuters: Acme revenue $1.2B."),
                grader_reply("option A", &[("Yes", 0.9), ("No", 0.1)], &[IR, WIRE], true, true),
            ],
            two_sources(),
        );
        let now = Utc::now();
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::days(2))).await;

        let report = h.scheduler.run_resolution_batch(now).await.unwrap();

        let graded = &report.committed[&PoolId(1)];
        assert_eq!(graded.verdict.result, GradeResult::OptionA);
        assert_eq!(graded.pool.status, PoolStatus::Graded);
        assert!((graded.verdict.probabilities["Yes"] - 0.9).abs() < 1e-9);
        assert!((graded.verdict.probability_sum() - 1.0).abs() < 1e-6);
        assert_eq!(
            h.ledger.calls().await,
            vec![LedgerCall::GradeBet(PoolId(1), GradeResult::OptionA)]
        );
        assert_eq!(h.ledger.pool(PoolId(1)).await.unwrap().status, PoolStatus::Graded);
    }

    #[tokio::test]
    async fn test_second_run_does_not_regrade() {
        let h = harness(
            vec![
                plan(),
                summary("Acme reported $1.2B."),
                summary("Reuters: Acme revenue $1.2B."),
                grader_reply("option A", &[("Yes", 0.9), ("No", 0.1)], &[IR, WIRE], true, true),
            ],
            two_sources(),
        );
        let now = Utc::now();
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::days(2))).await;

        let first = h.scheduler.run_resolution_batch(now).await.unwrap();
        assert_eq!(first.committed.len(), 1);
        let calls_after_first = h.llm.call_count();

        let second = h.scheduler.run_resolution_batch(now).await.unwrap();
        assert!(second.committed.is_empty());
        assert_eq!(h.llm.call_count(), calls_after_first);
        assert_eq!(h.ledger.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_future_decision_date_overrides_terminal_verdict() {
        // the grader wrongly claims the period is over
        let h = harness(
            vec![
                plan(),
                summary("Acme reported $1.2B."),
                summary("Reuters: Acme revenue $1.2B."),
                grader_reply("option A", &[("Yes", 0.9), ("No", 0.1)], &[IR, WIRE], true, true),
            ],
            two_sources(),
        );
        let now = Utc::now();
        // betting closed at `now`, decision date an hour away
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::hours(-1))).await;

        let report = h.scheduler.run_resolution_batch(now).await.unwrap();

        assert!(report.committed.is_empty());
        assert_eq!(report.unresolved, vec![PoolId(1)]);
        assert!(h.ledger.calls().await.is_empty());
        assert_eq!(h.ledger.pool(PoolId(1)).await.unwrap().status, PoolStatus::Pending);
    }

    #[test]
    fn test_override_zeroes_probabilities() {
        let now = Utc::now();
        let pool = Pool::sample(1, now, chrono::Duration::hours(-1));
        let verdict = Verdict {
            result: GradeResult::Push,
            probabilities: BTreeMap::from([("Yes".to_string(), 0.5), ("No".to_string(), 0.5)]),
            sources: [IR.to_string()].into(),
            explanation: "conflicting".to_string(),
            time_period_analysis: crate::core::types::TimePeriodAnalysis {
                period_mentioned: "Q1 2024".to_string(),
                period_has_passed: true,
                official_results_available: false,
            },
        };

        let overridden = apply_temporal_override(verdict, &pool, now);
        assert_eq!(overridden.result, GradeResult::Unresolved);
        assert_eq!(overridden.probabilities["Yes"], 0.0);
        assert_eq!(overridden.probabilities["No"], 0.0);
        assert!(overridden.sources.is_empty());
    }

    #[tokio::test]
    async fn test_zero_evidence_yields_verdict() {
        let h = harness(
            vec![plan(), grader_reply("not resolved yet", &[], &[], true, false)],
            no_documents(),
        );
        let now = Utc::now();
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::days(1))).await;

        let report = h.scheduler.run_resolution_batch(now).await.unwrap();
        assert_eq!(report.unresolved, vec![PoolId(1)]);
        assert!(report.abandoned.is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_sources_push() {
        let h = harness(
            vec![
                plan(),
                summary("Acme says revenue was $1.2B."),
                summary("Analyst says revenue was $0.9B."),
                grader_reply("push", &[("Yes", 0.5), ("No", 0.5)], &[IR, WIRE], true, false),
            ],
            two_sources(),
        );
        let now = Utc::now();
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::days(1))).await;

        let report = h.scheduler.run_resolution_batch(now).await.unwrap();
        assert_eq!(report.committed[&PoolId(1)].verdict.result, GradeResult::Push);
        assert_eq!(
            h.ledger.calls().await,
            vec![LedgerCall::GradeBet(PoolId(1), GradeResult::Push)]
        );
    }

    #[tokio::test]
    async fn test_retry_ceiling_leaves_pool_pending() {
        let h = harness(
            vec![
                Err("rate limited".to_string()),
                Err("rate limited".to_string()),
                Err("rate limited".to_string()),
            ],
            no_documents(),
        );
        let now = Utc::now();
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::days(1))).await;

        let report = h.scheduler.run_resolution_batch(now).await.unwrap();

        assert_eq!(h.llm.call_count(), 3);
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].attempt_count, 3);
        assert!(report.abandoned[0].last_error.as_deref().unwrap().contains("rate limited"));
        assert_eq!(h.ledger.pool(PoolId(1)).await.unwrap().status, PoolStatus::Pending);
        assert!(h.ledger.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_error_verdict_is_retried() {
        let h = harness(
            vec![
                plan(),
                Ok("I cannot decide".to_string()),
                plan(),
                grader_reply("not resolved yet", &[], &[], false, false),
            ],
            no_documents(),
        );
        let now = Utc::now();
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::days(1))).await;

        let report = h.scheduler.run_resolution_batch(now).await.unwrap();
        assert_eq!(report.unresolved, vec![PoolId(1)]);
        assert_eq!(h.llm.call_count(), 4);
    }

    #[tokio::test]
    async fn test_open_betting_window_is_skipped() {
        let h = harness(vec![], no_documents());
        let now = Utc::now();
        // betting closes two hours from now
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::hours(-3))).await;

        let report = h.scheduler.run_resolution_batch(now).await.unwrap();
        assert!(report.unresolved.is_empty() && report.abandoned.is_empty());
        assert_eq!(h.llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ledger_failure_is_scoped_to_one_pool() {
        let grade = || {
            vec![
                plan(),
                summary("Acme reported $1.2B."),
                summary("Reuters: Acme revenue $1.2B."),
                grader_reply("option A", &[("Yes", 0.9), ("No", 0.1)], &[IR, WIRE], true, true),
            ]
        };
        let h = harness([grade(), grade()].concat(), two_sources());
        let now = Utc::now();
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::days(1))).await;
        h.ledger.seed_pool(Pool::sample(2, now, chrono::Duration::days(1))).await;
        h.ledger.fail_grades_for(PoolId(1)).await;

        let report = h.scheduler.run_resolution_batch(now).await.unwrap();

        assert_eq!(report.ledger_failures.len(), 1);
        assert_eq!(report.ledger_failures[0].pool_id, PoolId(1));
        assert_eq!(report.ledger_failures[0].op, "gradeBet");
        assert!(report.committed.contains_key(&PoolId(2)));
        assert_eq!(h.ledger.pool(PoolId(1)).await.unwrap().status, PoolStatus::Pending);
    }

    #[tokio::test]
    async fn test_held_lease_skips_batch() {
        let h = harness(vec![], no_documents());
        let now = Utc::now();
        h.ledger.seed_pool(Pool::sample(1, now, chrono::Duration::days(1))).await;
        h.kv
            .acquire_lease(LEASE_KEY, "other-host", Duration::from_secs(60))
            .await
            .unwrap();

        let report = h.scheduler.run_resolution_batch(now).await.unwrap();
        assert!(report.skipped);
        assert_eq!(h.llm.call_count(), 0);

        // the lease belongs to the other run and is left alone
        assert!(!h.kv.acquire_lease(LEASE_KEY, "third", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_lease_released_after_run() {
        let h = harness(vec![], no_documents());
        h.scheduler.run_resolution_batch(Utc::now()).await.unwrap();
        assert!(h.kv.acquire_lease(LEASE_KEY, "next", Duration::from_secs(60)).await.unwrap());
    }
}
