use crate::core::types::Document;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait EvidenceSearchService: Send + Sync + 'static {
    async fn search(&self, query: &str) -> Result<Vec<Document>>;
}
