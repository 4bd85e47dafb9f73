use crate::config::config::LedgerCfg;
use crate::core::types::{Bet, GradeResult, Pool, PoolId, PoolProposal, TxReceipt};
use crate::ledger::client::LedgerClient;
use crate::ledger::subgraph::SubgraphReader;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::info;

sol! {
    #[sol(rpc)]
    contract BettingPools {
        struct CreatePoolParams {
            string question;
            string[2] options;
            uint256 betsCloseAt;
            uint256 decisionDate;
            string imageUrl;
            string category;
            string creatorName;
            string creatorId;
            string closureCriteria;
            string closureInstructions;
        }

        function createPool(CreatePoolParams calldata params) external returns (uint256);
        function setTwitterPostId(uint256 poolId, string calldata twitterPostId) external;
        function gradeBet(uint256 poolId, uint8 responseOption) external;
        function claimPayouts(uint256[] calldata betIds) external;
    }
}

type PoolsContract = BettingPools::BettingPoolsInstance<DynProvider>;

/// Writes through the pool contract with a single signing account; reads
/// come from the indexer.
pub struct EvmLedgerClient {
    contract: PoolsContract,
    subgraph: SubgraphReader,
    gas_limit: u64,
    // one in-flight transaction at a time keeps nonces ordered
    write_lock: Mutex<()>,
}

impl EvmLedgerClient {
    pub fn new(cfg: &LedgerCfg, http: Client) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(&cfg.private_key).context("parsing ledger private key")?;
        let address = Address::from_str(&cfg.contract_address).context("parsing contract address")?;
        let rpc_url = cfg.rpc_url.parse().context("parsing rpc url")?;

        info!(signer = %signer.address(), contract = %address, "Initializing ledger client");

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url)
            .erased();

        Ok(Self {
            contract: BettingPools::new(address, provider),
            subgraph: SubgraphReader::new(http, cfg.subgraph_url.clone()),
            gas_limit: cfg.gas_limit,
            write_lock: Mutex::new(()),
        })
    }
}

fn unix_seconds(ts: DateTime<Utc>) -> Result<U256> {
    let secs = u64::try_from(ts.timestamp()).with_context(|| format!("timestamp before epoch: {ts}"))?;
    Ok(U256::from(secs))
}

fn confirmed(receipt: TransactionReceipt, op: &str) -> Result<TxReceipt> {
    if !receipt.status() {
        anyhow::bail!("{} reverted in tx {}", op, receipt.transaction_hash);
    }
    Ok(TxReceipt {
        tx_hash: receipt.transaction_hash.to_string(),
    })
}

/// The created pool id is the first word of the first emitted log's data.
fn pool_id_from_receipt(receipt: &TransactionReceipt) -> Result<PoolId> {
    let log = receipt
        .inner
        .logs()
        .first()
        .context("createPool receipt has no logs")?;
    let data = &log.inner.data.data;
    if data.len() < 32 {
        anyhow::bail!("createPool log data is {} bytes, expected at least 32", data.len());
    }
    let raw = U256::from_be_slice(&data[..32]);
    let id = u64::try_from(raw).context("pool id does not fit in u64")?;
    Ok(PoolId(id))
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    async fn create_pool(&self, proposal: &PoolProposal) -> Result<PoolId> {
        let options: [String; 2] = proposal
            .options
            .clone()
            .try_into()
            .map_err(|o: Vec<String>| anyhow::anyhow!("createPool needs two options, got {}", o.len()))?;
        let params = BettingPools::CreatePoolParams {
            question: proposal.question.clone(),
            options,
            betsCloseAt: unix_seconds(proposal.bets_close_at)?,
            decisionDate: unix_seconds(proposal.decision_date)?,
            imageUrl: proposal.image_url.clone(),
            category: proposal.category.clone(),
            creatorName: proposal.creator.name.clone(),
            creatorId: proposal.creator.id.clone(),
            closureCriteria: proposal.closure_criteria.clone(),
            closureInstructions: proposal.closure_instructions.clone(),
        };

        let _guard = self.write_lock.lock().await;
        let receipt = self
            .contract
            .createPool(params)
            .gas(self.gas_limit)
            .send()
            .await
            .context("sending createPool")?
            .get_receipt()
            .await
            .context("awaiting createPool receipt")?;

        let tx = confirmed(receipt.clone(), "createPool")?;
        let pool_id = pool_id_from_receipt(&receipt)?;
        info!(pool = %pool_id, tx = %tx.tx_hash, "Pool created");
        Ok(pool_id)
    }

    async fn set_external_post_id(&self, pool_id: PoolId, post_id: &str) -> Result<TxReceipt> {
        let _guard = self.write_lock.lock().await;
        let receipt = self
            .contract
            .setTwitterPostId(U256::from(pool_id.0), post_id.to_string())
            .gas(self.gas_limit)
            .send()
            .await
            .context("sending setTwitterPostId")?
            .get_receipt()
            .await
            .context("awaiting setTwitterPostId receipt")?;
        confirmed(receipt, "setTwitterPostId")
    }

    async fn grade_bet(&self, pool_id: PoolId, result: GradeResult) -> Result<TxReceipt> {
        if !result.is_terminal() {
            anyhow::bail!("refusing to grade pool {} with non-terminal result {:?}", pool_id, result);
        }
        let _guard = self.write_lock.lock().await;
        let receipt = self
            .contract
            .gradeBet(U256::from(pool_id.0), result.code())
            .gas(self.gas_limit)
            .send()
            .await
            .context("sending gradeBet")?
            .get_receipt()
            .await
            .context("awaiting gradeBet receipt")?;
        confirmed(receipt, "gradeBet")
    }

    async fn claim_payouts(&self, bet_ids: &[u64]) -> Result<TxReceipt> {
        let ids: Vec<U256> = bet_ids.iter().map(|id| U256::from(*id)).collect();
        let _guard = self.write_lock.lock().await;
        let receipt = self
            .contract
            .claimPayouts(ids)
            .gas(self.gas_limit)
            .send()
            .await
            .context("sending claimPayouts")?
            .get_receipt()
            .await
            .context("awaiting claimPayouts receipt")?;
        confirmed(receipt, "claimPayouts")
    }

    async fn list_pending_pools(&self) -> Result<Vec<Pool>> {
        self.subgraph.pending_pools().await
    }

    async fn list_bets(&self, pool_id: PoolId) -> Result<Vec<Bet>> {
        self.subgraph.bets(pool_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_seconds() {
        let ts = DateTime::from_timestamp(1735171200, 0).unwrap();
        assert_eq!(unix_seconds(ts).unwrap(), U256::from(1735171200u64));
        let before_epoch = DateTime::from_timestamp(-5, 0).unwrap();
        assert!(unix_seconds(before_epoch).is_err());
    }

    #[test]
    fn test_rejects_bad_key() {
        let cfg = LedgerCfg {
            private_key: "not-a-key".to_string(),
            contract_address: "0x0000000000000000000000000000000000000001".to_string(),
            ..LedgerCfg::default()
        };
        assert!(EvmLedgerClient::new(&cfg, Client::new()).is_err());
    }
}
