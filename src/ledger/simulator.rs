use crate::core::types::{
    Bet, GradeResult, Pool, PoolId, PoolProposal, PoolStatus, TxReceipt,
};
use crate::ledger::client::LedgerClient;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

/// A mutating call as the simulated ledger received it.
#[derive(Clone, Debug, PartialEq)]
pub enum LedgerCall {
    CreatePool(PoolId),
    SetExternalPostId(PoolId, String),
    GradeBet(PoolId, GradeResult),
    ClaimPayouts(Vec<u64>),
}

#[derive(Debug, Default)]
pub struct SimState {
    pub pools: BTreeMap<PoolId, Pool>,
    pub bets: Vec<Bet>,
    pub calls: Vec<LedgerCall>,
    pub next_id: u64,
    /// Pools whose gradeBet calls fail, to exercise partial-failure paths.
    pub failing_grades: HashSet<PoolId>,
    /// How many upcoming claimPayouts calls fail.
    pub failing_claims: u32,
}

/// In-memory ledger with the contract's visible semantics: grading moves a
/// pool out of the pending listing and claiming marks bets as paid.
#[derive(Debug, Default)]
pub struct SimLedgerClient {
    pub state: Mutex<SimState>,
}

impl SimLedgerClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                next_id: 1,
                ..SimState::default()
            }),
        }
    }

    pub async fn seed_pool(&self, pool: Pool) {
        let mut state = self.state.lock().await;
        state.next_id = state.next_id.max(pool.id.0 + 1);
        state.pools.insert(pool.id, pool);
    }

    pub async fn seed_bet(&self, bet: Bet) {
        self.state.lock().await.bets.push(bet);
    }

    pub async fn fail_grades_for(&self, pool_id: PoolId) {
        self.state.lock().await.failing_grades.insert(pool_id);
    }

    pub async fn fail_next_claims(&self, count: u32) {
        self.state.lock().await.failing_claims = count;
    }

    pub async fn pool(&self, pool_id: PoolId) -> Option<Pool> {
        self.state.lock().await.pools.get(&pool_id).cloned()
    }

    pub async fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().await.calls.clone()
    }

    fn receipt(state: &SimState) -> TxReceipt {
        TxReceipt {
            tx_hash: format!("0xsim{:04}", state.calls.len()),
        }
    }
}

#[async_trait]
impl LedgerClient for SimLedgerClient {
    async fn create_pool(&self, proposal: &PoolProposal) -> Result<PoolId> {
        let options: [String; 2] = proposal
            .options
            .clone()
            .try_into()
            .map_err(|o: Vec<String>| anyhow::anyhow!("createPool needs two options, got {}", o.len()))?;

        let mut state = self.state.lock().await;
        let id = PoolId(state.next_id.max(1));
        state.next_id = id.0 + 1;
        state.pools.insert(
            id,
            Pool {
                id,
                question: proposal.question.clone(),
                options,
                bets_close_at: proposal.bets_close_at,
                decision_date: proposal.decision_date,
                closure_criteria: proposal.closure_criteria.clone(),
                closure_instructions: proposal.closure_instructions.clone(),
                status: PoolStatus::Pending,
                external_post_id: None,
                total_bets: Decimal::ZERO,
            },
        );
        state.calls.push(LedgerCall::CreatePool(id));
        Ok(id)
    }

    async fn set_external_post_id(&self, pool_id: PoolId, post_id: &str) -> Result<TxReceipt> {
        let mut state = self.state.lock().await;
        let pool = state
            .pools
            .get_mut(&pool_id)
            .ok_or_else(|| anyhow::anyhow!("unknown pool {pool_id}"))?;
        pool.external_post_id = Some(post_id.to_string());
        state
            .calls
            .push(LedgerCall::SetExternalPostId(pool_id, post_id.to_string()));
        Ok(Self::receipt(&state))
    }

    async fn grade_bet(&self, pool_id: PoolId, result: GradeResult) -> Result<TxReceipt> {
        if !result.is_terminal() {
            anyhow::bail!("refusing to grade pool {} with non-terminal result {:?}", pool_id, result);
        }
        let mut state = self.state.lock().await;
        if state.failing_grades.contains(&pool_id) {
            anyhow::bail!("execution reverted: gradeBet({pool_id})");
        }
        let pool = state
            .pools
            .get_mut(&pool_id)
            .ok_or_else(|| anyhow::anyhow!("unknown pool {pool_id}"))?;
        if pool.status != PoolStatus::Pending {
            anyhow::bail!("pool {} already {:?}", pool_id, pool.status);
        }
        pool.status = PoolStatus::Graded;
        state.calls.push(LedgerCall::GradeBet(pool_id, result));
        Ok(Self::receipt(&state))
    }

    async fn claim_payouts(&self, bet_ids: &[u64]) -> Result<TxReceipt> {
        let mut state = self.state.lock().await;
        if state.failing_claims > 0 {
            state.failing_claims -= 1;
            anyhow::bail!("execution reverted: claimPayouts");
        }
        for bet in state.bets.iter_mut().filter(|b| bet_ids.contains(&b.id)) {
            bet.payout_claimed = true;
        }
        state.calls.push(LedgerCall::ClaimPayouts(bet_ids.to_vec()));
        Ok(Self::receipt(&state))
    }

    async fn list_pending_pools(&self) -> Result<Vec<Pool>> {
        let state = self.state.lock().await;
        Ok(state
            .pools
            .values()
            .filter(|p| p.status == PoolStatus::Pending)
            .cloned()
            .collect())
    }

    async fn list_bets(&self, pool_id: PoolId) -> Result<Vec<Bet>> {
        let state = self.state.lock().await;
        Ok(state
            .bets
            .iter()
            .filter(|b| b.pool_id == pool_id)
            .cloned()
            .collect())
    }
}
