use crate::core::types::{Bet, GradeResult, Pool, PoolId, PoolProposal, TxReceipt};
use anyhow::Result;
use async_trait::async_trait;

/// The pool contract plus its indexer. Reads reflect the ledger's own view;
/// mutating calls share one signing account.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    async fn create_pool(&self, proposal: &PoolProposal) -> Result<PoolId>;
    async fn set_external_post_id(&self, pool_id: PoolId, post_id: &str) -> Result<TxReceipt>;
    /// Only terminal results are accepted.
    async fn grade_bet(&self, pool_id: PoolId, result: GradeResult) -> Result<TxReceipt>;
    async fn claim_payouts(&self, bet_ids: &[u64]) -> Result<TxReceipt>;
    async fn list_pending_pools(&self) -> Result<Vec<Pool>>;
    async fn list_bets(&self, pool_id: PoolId) -> Result<Vec<Bet>>;
}
