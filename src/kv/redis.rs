use crate::kv::client::KvStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fred::prelude::*;
use fred::types::{Expiration, SetOptions};
use std::time::Duration;
use tracing::info;

/// Deletes the lease key only if it still holds the caller's value.
const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisKvStore {
    client: RedisClient,
}

impl RedisKvStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let config = RedisConfig::from_url(redis_url).context("parsing redis url")?;
        let client = RedisClient::new(config, None, None, None);
        client.connect();
        client
            .wait_for_connect()
            .await
            .context("connecting to redis")?;
        info!("Connected to Redis");
        Ok(Self { client })
    }
}

fn expiration(ttl: Option<Duration>) -> Option<Expiration> {
    ttl.map(|t| Expiration::EX(t.as_secs().max(1) as i64))
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.client
            .set::<(), _, _>(key, value, expiration(ttl), None, false)
            .await?;
        Ok(())
    }

    async fn members(&self, set_key: &str) -> Result<Vec<String>> {
        let members: Vec<String> = self.client.smembers(set_key).await?;
        Ok(members)
    }

    async fn add(&self, set_key: &str, member: &str) -> Result<()> {
        self.client.sadd::<(), _, _>(set_key, member).await?;
        Ok(())
    }

    async fn acquire_lease(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        // SET NX replies OK when written and nil when the key already exists
        let reply: Option<String> = self
            .client
            .set(key, holder, expiration(Some(ttl)), Some(SetOptions::NX), false)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_lease(&self, key: &str, holder: &str) -> Result<bool> {
        let deleted: i64 = self
            .client
            .eval(RELEASE_LEASE_SCRIPT, vec![key], vec![holder])
            .await?;
        Ok(deleted == 1)
    }
}
