pub mod client;

pub use client::LlmClient;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// A chat-style text generation service that answers with JSON.
#[async_trait]
pub trait TextGenerator: Send + Sync + 'static {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Parses a JSON reply, tolerating a surrounding markdown code fence.
pub fn parse_json_reply<T: DeserializeOwned>(content: &str) -> Result<T> {
    let clean_content = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(clean_content)
        .with_context(|| format!("Failed to parse LLM JSON: {}", clean_content))
}
