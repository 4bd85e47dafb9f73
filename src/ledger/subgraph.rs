use crate::core::types::{Bet, Pool, PoolId, PoolStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::str::FromStr;

const PENDING_POOLS_QUERY: &str = r#"
query {
  pools(where: {status: "PENDING"}) {
    id
    poolIntId
    status
    question
    options
    betsCloseAt
    decisionDate
    closureCriteria
    closureInstructions
    totalBets
    totalBetsByOption
    xPostId
  }
}
"#;

const POOL_BETS_QUERY: &str = r#"
query($poolId: Int!) {
  bets(where: {poolIntId: $poolId}) {
    id
    betIntId
    poolIntId
    payoutClaimed
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PoolsData {
    pools: Vec<SubgraphPool>,
}

#[derive(Debug, Deserialize)]
struct BetsData {
    bets: Vec<SubgraphBet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphPool {
    pub pool_int_id: String,
    pub status: String,
    pub question: String,
    pub options: Vec<String>,
    pub bets_close_at: String,
    pub decision_date: String,
    #[serde(default)]
    pub closure_criteria: String,
    #[serde(default)]
    pub closure_instructions: String,
    #[serde(default)]
    pub total_bets: Option<String>,
    #[serde(default)]
    pub x_post_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphBet {
    pub bet_int_id: String,
    pub pool_int_id: String,
    #[serde(default)]
    pub payout_claimed: bool,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid timestamp '{raw}'"))?;
    DateTime::from_timestamp(secs, 0).with_context(|| format!("timestamp out of range: {secs}"))
}

impl TryFrom<SubgraphPool> for Pool {
    type Error = anyhow::Error;

    fn try_from(raw: SubgraphPool) -> Result<Self> {
        let id = PoolId::from_str(&raw.pool_int_id)?;
        let options: [String; 2] = raw
            .options
            .try_into()
            .map_err(|o: Vec<String>| anyhow::anyhow!("pool {id} has {} options", o.len()))?;
        let total_bets = match raw.total_bets.as_deref() {
            Some(t) if !t.is_empty() => {
                Decimal::from_str(t).with_context(|| format!("invalid totalBets '{t}'"))?
            }
            _ => Decimal::ZERO,
        };

        Ok(Pool {
            id,
            question: raw.question,
            options,
            bets_close_at: parse_timestamp(&raw.bets_close_at)?,
            decision_date: parse_timestamp(&raw.decision_date)?,
            closure_criteria: raw.closure_criteria,
            closure_instructions: raw.closure_instructions,
            status: PoolStatus::from_str(&raw.status)?,
            external_post_id: raw.x_post_id.filter(|p| !p.is_empty()),
            total_bets,
        })
    }
}

impl TryFrom<SubgraphBet> for Bet {
    type Error = anyhow::Error;

    fn try_from(raw: SubgraphBet) -> Result<Self> {
        Ok(Bet {
            id: raw
                .bet_int_id
                .parse()
                .with_context(|| format!("invalid betIntId '{}'", raw.bet_int_id))?,
            pool_id: PoolId::from_str(&raw.pool_int_id)?,
            payout_claimed: raw.payout_claimed,
        })
    }
}

/// Read side of the ledger: the pool indexer's GraphQL endpoint.
#[derive(Clone)]
pub struct SubgraphReader {
    client: Client,
    url: String,
}

impl SubgraphReader {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }

    async fn query<T: DeserializeOwned>(&self, body: serde_json::Value) -> Result<T> {
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .context("requesting subgraph")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Subgraph error: status={}, body={}", status, text);
        }

        let parsed: GraphQlResponse<T> = resp.json().await.context("parsing subgraph response")?;
        if !parsed.errors.is_empty() {
            let messages: Vec<_> = parsed.errors.into_iter().map(|e| e.message).collect();
            anyhow::bail!("Subgraph query failed: {}", messages.join("; "));
        }
        parsed.data.context("subgraph response has no data")
    }

    /// Pools the indexer reports as PENDING. Rows that fail to convert are
    /// logged and skipped so one bad record cannot block the batch.
    pub async fn pending_pools(&self) -> Result<Vec<Pool>> {
        let data: PoolsData = self.query(json!({ "query": PENDING_POOLS_QUERY })).await?;
        let mut pools = Vec::with_capacity(data.pools.len());
        for raw in data.pools {
            let raw_id = raw.pool_int_id.clone();
            match Pool::try_from(raw) {
                Ok(pool) => pools.push(pool),
                Err(e) => tracing::warn!(pool = %raw_id, "skipping malformed pool record: {:#}", e),
            }
        }
        Ok(pools)
    }

    pub async fn bets(&self, pool_id: PoolId) -> Result<Vec<Bet>> {
        let data: BetsData = self
            .query(json!({
                "query": POOL_BETS_QUERY,
                "variables": { "poolId": pool_id.0 },
            }))
            .await?;
        data.bets.into_iter().map(Bet::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_pool(options: &[&str]) -> SubgraphPool {
        SubgraphPool {
            pool_int_id: "36".to_string(),
            status: "PENDING".to_string(),
            question: "Will it snow in Denver on Dec 25?".to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            bets_close_at: "1735000000".to_string(),
            decision_date: "1735171200".to_string(),
            closure_criteria: "NWS daily summary".to_string(),
            closure_instructions: "Yes if measurable snowfall".to_string(),
            total_bets: Some("1500000".to_string()),
            x_post_id: Some("".to_string()),
        }
    }

    #[test]
    fn test_pool_conversion() {
        let pool = Pool::try_from(raw_pool(&["Yes", "No"])).unwrap();
        assert_eq!(pool.id, PoolId(36));
        assert_eq!(pool.status, PoolStatus::Pending);
        assert_eq!(pool.options[1], "No");
        assert_eq!(pool.bets_close_at.timestamp(), 1735000000);
        assert_eq!(pool.total_bets, Decimal::new(1500000, 0));
        assert_eq!(pool.external_post_id, None);
    }

    #[test]
    fn test_pool_conversion_rejects_wrong_option_count() {
        assert!(Pool::try_from(raw_pool(&["Yes", "No", "Maybe"])).is_err());
    }

    #[test]
    fn test_graphql_envelope_parses_pools() {
        let body = r#"{"data": {"pools": [{
            "id": "0x24", "poolIntId": "36", "status": "PENDING",
            "question": "Q?", "options": ["Yes", "No"],
            "betsCloseAt": "1", "decisionDate": "2",
            "closureCriteria": "c", "closureInstructions": "i",
            "totalBets": "0", "totalBetsByOption": ["0", "0"], "xPostId": "99"
        }]}}"#;
        let parsed: GraphQlResponse<PoolsData> = serde_json::from_str(body).unwrap();
        let pool = Pool::try_from(parsed.data.unwrap().pools.remove(0)).unwrap();
        assert_eq!(pool.external_post_id.as_deref(), Some("99"));
    }

    #[test]
    fn test_bet_conversion() {
        let bet = Bet::try_from(SubgraphBet {
            bet_int_id: "17".to_string(),
            pool_int_id: "36".to_string(),
            payout_claimed: false,
        })
        .unwrap();
        assert_eq!(bet.id, 17);
        assert_eq!(bet.pool_id, PoolId(36));
    }
}
