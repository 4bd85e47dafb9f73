use crate::core::error::GradingError;
use crate::core::types::{Document, Evidence, Pool};
use crate::grading::prompts;
use crate::llm::{TextGenerator, parse_json_reply};
use crate::search::client::EvidenceSearchService;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MAX_QUERIES: usize = 3;

#[derive(Debug, Deserialize)]
struct QueryPlan {
    #[serde(default)]
    evidence_search_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryReply {
    #[serde(default = "default_relevant")]
    relevant: bool,
    #[serde(default)]
    summary: String,
}

fn default_relevant() -> bool {
    true
}

/// Turns a pool's claim into search queries and each retrieved document
/// into one evidence record.
pub struct EvidenceGatherer {
    llm: Arc<dyn TextGenerator>,
    search: Arc<dyn EvidenceSearchService>,
}

impl EvidenceGatherer {
    pub fn new(llm: Arc<dyn TextGenerator>, search: Arc<dyn EvidenceSearchService>) -> Self {
        Self { llm, search }
    }

    /// Failing to plan queries fails the attempt. Failed searches and
    /// summaries are skipped, so the result may be empty.
    pub async fn gather(&self, pool: &Pool) -> Result<Vec<Evidence>, GradingError> {
        let queries = self.plan_queries(pool).await?;
        let mut seen_urls = HashSet::new();
        let mut evidence = Vec::new();

        for query in &queries {
            let docs = match self.search.search(query).await {
                Ok(docs) => docs,
                Err(e) => {
                    metrics::counter!("evidence_search_failures_total").increment(1);
                    warn!(pool = %pool.id, query = %query, "Search failed, skipping query: {:#}", e);
                    continue;
                }
            };

            for doc in docs {
                if doc.content.trim().is_empty() || !seen_urls.insert(doc.url.clone()) {
                    continue;
                }
                if let Some(record) = self.summarize(pool, query, &doc).await {
                    evidence.push(record);
                }
            }
        }

        metrics::counter!("evidence_records_total").increment(evidence.len() as u64);
        info!(pool = %pool.id, queries = queries.len(), records = evidence.len(), "Evidence gathered");
        Ok(evidence)
    }

    pub async fn plan_queries(&self, pool: &Pool) -> Result<Vec<String>, GradingError> {
        let reply = self
            .llm
            .complete(prompts::QUERY_PLANNER_SYSTEM, &prompts::query_planner_user(pool))
            .await
            .map_err(|e| GradingError::Transient(format!("query planning: {e:#}")))?;
        let plan: QueryPlan =
            parse_json_reply(&reply).map_err(|e| GradingError::Schema(format!("{e:#}")))?;

        let queries: Vec<String> = plan
            .evidence_search_queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(MAX_QUERIES)
            .collect();
        if queries.is_empty() {
            return Err(GradingError::Schema("query plan has no queries".to_string()));
        }
        debug!(pool = %pool.id, ?queries, "Planned evidence queries");
        Ok(queries)
    }

    /// None when the document has nothing on the outcome or the summary
    /// call fails; nothing is recorded that the document does not support.
    async fn summarize(&self, pool: &Pool, query: &str, doc: &Document) -> Option<Evidence> {
        let reply = match self
            .llm
            .complete(prompts::SUMMARIZER_SYSTEM, &prompts::summarizer_user(pool, query, doc))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(pool = %pool.id, url = %doc.url, "Summary failed: {:#}", e);
                return None;
            }
        };

        match parse_json_reply::<SummaryReply>(&reply) {
            Ok(s) if s.relevant && !s.summary.trim().is_empty() => Some(Evidence {
                url: doc.url.clone(),
                summary: s.summary.trim().to_string(),
                source_query: query.to_string(),
            }),
            Ok(_) => {
                debug!(pool = %pool.id, url = %doc.url, "Source not relevant");
                None
            }
            Err(e) => {
                warn!(pool = %pool.id, url = %doc.url, "Unparseable summary: {:#}", e);
                None
            }
        }
    }
}
