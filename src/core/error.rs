use crate::core::types::PoolId;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Malformed pool-creation parameters. Fatal to the one creation request.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("a pool needs exactly two options, got {0}")]
    OptionCount(usize),
    #[error("pool options must be two distinct, non-empty labels")]
    DuplicateOptions,
    #[error("bets close at {bets_close_at} which is after the decision date {decision_date}")]
    InvertedDates {
        bets_close_at: DateTime<Utc>,
        decision_date: DateTime<Utc>,
    },
    #[error("pool question is empty")]
    EmptyQuestion,
}

/// One failed grading attempt. Both kinds are recovered by retrying.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GradingError {
    #[error("transient grading failure: {0}")]
    Transient(String),
    #[error("grader output does not fit the verdict schema: {0}")]
    Schema(String),
    #[error("decider returned an error verdict: {0}")]
    Decider(String),
}

impl GradingError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GradingError::Transient(_) | GradingError::Schema(_) | GradingError::Decider(_)
        )
    }
}

/// A mutating ledger call failed. Scoped to a single pool.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("ledger {op} failed for pool {pool_id}: {reason}")]
pub struct LedgerWriteError {
    pub op: &'static str,
    pub pool_id: PoolId,
    pub reason: String,
}

/// Why a pool proposal did not become a ledger pool.
#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("invalid pool proposal: {0}")]
    Validation(#[from] ValidationError),
    #[error("could not create the pool on the ledger: {0:#}")]
    Ledger(anyhow::Error),
}
