use crate::config::config::LlmCfg;
use crate::llm::TextGenerator;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    cfg: LlmCfg,
    // shared across clones so every caller draws from one quota
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl LlmClient {
    pub fn new(cfg: LlmCfg) -> Self {
        let rpm = NonZeroU32::new(cfg.rate_limit_rpm).unwrap_or(NonZeroU32::MIN);
        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        let openai_config = OpenAIConfig::new()
            .with_api_key(&cfg.api_key)
            .with_api_base(&cfg.base_url);

        Self {
            client: Client::with_config(openai_config),
            cfg,
            limiter,
        }
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.limiter.until_ready().await;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.cfg.model)
            .temperature(self.cfg.temperature)
            .response_format(ResponseFormat::JsonObject)
            .messages([
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user)
                    .build()?
                    .into(),
            ])
            .build()?;

        debug!(model = %self.cfg.model, "calling LLM");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .context("LLM request failed")?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .context("No choices in LLM response")?;
        choice.message.content.context("No content in LLM response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::AppCfg;

    #[tokio::test]
    #[ignore] // needs a real API key: cargo test -- --ignored
    async fn test_real_llm_call() -> Result<()> {
        let cfg = AppCfg::load("config.yml")?;
        let client = LlmClient::new(cfg.llm.clone());
        println!("Testing with model: {}", client.model());

        let reply = client
            .complete(
                "You are a helpful assistant that outputs JSON.",
                "Return {\"ok\": true}",
            )
            .await?;
        let value: serde_json::Value = crate::llm::parse_json_reply(&reply)?;
        assert_eq!(value["ok"], true);
        Ok(())
    }
}
