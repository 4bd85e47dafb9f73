use crate::kv::client::KvStore;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, (String, Option<Instant>)>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl MemoryState {
    fn live_value(&mut self, key: &str) -> Option<String> {
        match self.values.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                self.values.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

/// Process-local store for simulation runs and tests.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    state: Mutex<MemoryState>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().await.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires = ttl.map(|t| Instant::now() + t);
        self.state
            .lock()
            .await
            .values
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn members(&self, set_key: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(set_key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add(&self, set_key: &str, member: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn acquire_lease(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.live_value(key).is_some() {
            return Ok(false);
        }
        state.values.insert(
            key.to_string(),
            (holder.to_string(), Some(Instant::now() + ttl)),
        );
        Ok(true)
    }

    async fn release_lease(&self, key: &str, holder: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.live_value(key).as_deref() != Some(holder) {
            return Ok(false);
        }
        state.values.remove(key);
        Ok(true)
    }
}
