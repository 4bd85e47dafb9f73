use crate::core::types::Post;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait SocialClient: Send + Sync + 'static {
    /// Posts mentioning `handle` since `since`, newest first.
    async fn fetch_mentions(&self, handle: &str, since: DateTime<Utc>) -> Result<Vec<Post>>;
    async fn fetch_post(&self, post_id: &str) -> Result<Option<Post>>;
    /// Publishes `text` and returns the new post id.
    async fn post_update(&self, text: &str, in_reply_to: Option<&str>) -> Result<String>;
}
