use crate::config::config::ProposalCfg;
use crate::core::types::{Creator, PoolProposal};
use crate::lifecycle::pool::derive_bets_close_at;
use crate::llm::{TextGenerator, parse_json_reply};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// Structured pool idea as returned by the idea generator.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PoolIdea {
    #[serde(rename = "betting_pool_idea")]
    pub question: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub closure_summary: String,
    #[serde(default)]
    pub closure_instructions: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub closure_date: String,
}

fn default_category() -> String {
    "Unknown".to_string()
}

impl PoolIdea {
    /// `closure_date` is ISO 8601 in UTC, with or without a trailing `Z`.
    pub fn decision_date(&self) -> Result<DateTime<Utc>> {
        let raw = self.closure_date.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        let naive = raw.strip_suffix('Z').unwrap_or(raw);
        let parsed = NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S")
            .with_context(|| format!("invalid closure_date '{raw}'"))?;
        Ok(parsed.and_utc())
    }

    pub fn into_proposal(
        self,
        creator: Creator,
        now: DateTime<Utc>,
        cfg: &ProposalCfg,
    ) -> Result<PoolProposal> {
        let decision_date = self.decision_date()?;
        if self.options.len() > 2 {
            warn!(
                question = %self.question,
                dropped = ?&self.options[2..],
                "Idea generator returned more than two options, keeping the first two"
            );
        }
        let bets_close_at = derive_bets_close_at(
            now,
            decision_date,
            cfg.bets_close_offset,
            cfg.close_safety_margin,
        );
        Ok(PoolProposal {
            question: self.question,
            // keep the first two; validation still rejects fewer
            options: self.options.into_iter().take(2).collect(),
            bets_close_at,
            decision_date,
            closure_criteria: self.closure_summary,
            closure_instructions: self.closure_instructions,
            category: self.category,
            creator,
            image_url: String::new(),
        })
    }
}

#[async_trait]
pub trait IdeaGenerator: Send + Sync + 'static {
    /// `request` is the mention text with the trigger command removed;
    /// `thread` is the preceding conversation, possibly empty.
    async fn generate(&self, request: &str, thread: &str, now: DateTime<Utc>) -> Result<PoolIdea>;
}

const IDEA_SYSTEM_PROMPT: &str = "You turn a social media request into a prediction market. \
Return a JSON object with keys: betting_pool_idea (one sentence), options (exactly two mutually \
exclusive, collectively exhaustive strings), closure_summary, closure_instructions, category \
(one of Politics, Sports, Crypto, Entertainment, AI, Unknown) and closure_date \
(UTC, format YYYY-MM-DDTHH:MM:SS, in the future).";

pub struct LlmIdeaGenerator {
    llm: Arc<dyn TextGenerator>,
}

impl LlmIdeaGenerator {
    pub fn new(llm: Arc<dyn TextGenerator>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl IdeaGenerator for LlmIdeaGenerator {
    async fn generate(&self, request: &str, thread: &str, now: DateTime<Utc>) -> Result<PoolIdea> {
        let mut user = format!(
            "Current time (UTC): {}\n\n<message>{}</message>",
            now.format("%Y-%m-%d %H:%M:%S"),
            request
        );
        if !thread.is_empty() {
            user.push_str(&format!("\n\n<thread>\n{thread}\n</thread>"));
        }

        let reply = self.llm.complete(IDEA_SYSTEM_PROMPT, &user).await?;
        parse_json_reply(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;
    use chrono::TimeZone;

    fn idea(closure_date: &str) -> PoolIdea {
        PoolIdea {
            question: "Will an AI agent launch a token this week?".to_string(),
            options: vec!["Yes".to_string(), "No".to_string()],
            closure_summary: "Public launch announcement by Sunday".to_string(),
            closure_instructions: "Yes if a verified launch is reported".to_string(),
            category: "AI".to_string(),
            closure_date: closure_date.to_string(),
        }
    }

    #[test]
    fn test_closure_date_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 2, 23, 59, 0).unwrap();
        assert_eq!(idea("2025-03-02T23:59:00").decision_date().unwrap(), expected);
        assert_eq!(idea("2025-03-02T23:59:00Z").decision_date().unwrap(), expected);
        assert!(idea("next sunday").decision_date().is_err());
    }

    #[test]
    fn test_into_proposal_derives_close() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let proposal = idea("2025-03-01T18:00:00")
            .into_proposal(Creator::default(), now, &ProposalCfg::default())
            .unwrap();
        assert_eq!(
            proposal.bets_close_at,
            Utc.with_ymd_and_hms(2025, 3, 1, 17, 59, 55).unwrap()
        );
        assert_eq!(proposal.closure_criteria, "Public launch announcement by Sunday");
    }

    #[test]
    fn test_extra_options_are_dropped() {
        let mut extra = idea("2025-03-01T18:00:00");
        extra.options.push("Maybe".to_string());
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let proposal = extra
            .into_proposal(Creator::default(), now, &ProposalCfg::default())
            .unwrap();
        assert_eq!(proposal.options, vec!["Yes", "No"]);
    }

    #[tokio::test]
    async fn test_llm_generator_parses_reply() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(r#"```json
            {"betting_pool_idea": "Will it snow in Denver on Friday?",
             "options": ["Yes", "No"],
             "closure_summary": "NWS report",
             "closure_instructions": "Yes if measurable snow",
             "closure_date": "2025-03-07T23:59:59Z",
             "odds_format": "decimal"}
            ```"#
            .to_string())]));
        let generator = LlmIdeaGenerator::new(llm.clone());

        let idea = generator
            .generate("will it snow in Denver on friday?", "", Utc::now())
            .await
            .unwrap();
        assert_eq!(idea.options, vec!["Yes", "No"]);
        assert_eq!(idea.category, "Unknown");
        assert!(llm.calls.lock().unwrap()[0].contains("<message>will it snow"));
    }
}
