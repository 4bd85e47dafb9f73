use crate::core::error::{ProposalError, ValidationError};
use crate::core::types::{Pool, PoolId, PoolProposal, PoolStatus, TxReceipt};
use crate::ledger::client::LedgerClient;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

impl PoolStatus {
    /// Pending is the only state with outgoing edges; nothing returns to it.
    pub fn can_transition_to(self, next: PoolStatus) -> bool {
        matches!(
            (self, next),
            (PoolStatus::Pending, PoolStatus::Graded) | (PoolStatus::Pending, PoolStatus::Error)
        )
    }
}

impl Pool {
    pub fn transition(&mut self, next: PoolStatus) -> Result<()> {
        anyhow::ensure!(
            self.status.can_transition_to(next),
            "pool {} cannot move from {:?} to {:?}",
            self.id,
            self.status,
            next
        );
        self.status = next;
        Ok(())
    }
}

pub fn validate_proposal(proposal: &PoolProposal) -> Result<(), ValidationError> {
    if proposal.question.trim().is_empty() {
        return Err(ValidationError::EmptyQuestion);
    }
    if proposal.options.len() != 2 {
        return Err(ValidationError::OptionCount(proposal.options.len()));
    }
    let (a, b) = (proposal.options[0].trim(), proposal.options[1].trim());
    if a.is_empty() || b.is_empty() || a.eq_ignore_ascii_case(b) {
        return Err(ValidationError::DuplicateOptions);
    }
    if proposal.bets_close_at > proposal.decision_date {
        return Err(ValidationError::InvertedDates {
            bets_close_at: proposal.bets_close_at,
            decision_date: proposal.decision_date,
        });
    }
    Ok(())
}

/// Betting closes `offset` from now, but never later than `margin` before
/// the decision date.
pub fn derive_bets_close_at(
    now: DateTime<Utc>,
    decision_date: DateTime<Utc>,
    offset: Duration,
    margin: Duration,
) -> DateTime<Utc> {
    let offset = chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::zero());
    let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
    let candidate = now + offset;
    if candidate > decision_date {
        decision_date - margin
    } else {
        candidate
    }
}

/// Creates pools on the ledger and links them to their announcement posts.
pub struct PoolLifecycleManager {
    ledger: Arc<dyn LedgerClient>,
}

impl PoolLifecycleManager {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub async fn propose_pool(&self, proposal: &PoolProposal) -> Result<PoolId, ProposalError> {
        validate_proposal(proposal)?;

        let pool_id = self
            .ledger
            .create_pool(proposal)
            .await
            .map_err(ProposalError::Ledger)?;

        metrics::counter!("pools_created_total").increment(1);
        info!(
            pool = %pool_id,
            creator = %proposal.creator.name,
            decision_date = %proposal.decision_date,
            "Pool created"
        );
        Ok(pool_id)
    }

    /// Overwrites any earlier link.
    pub async fn record_external_post(&self, pool_id: PoolId, post_id: &str) -> Result<TxReceipt> {
        let receipt = self.ledger.set_external_post_id(pool_id, post_id).await?;
        info!(pool = %pool_id, post = %post_id, tx = %receipt.tx_hash, "Linked announcement post");
        Ok(receipt)
    }
}
