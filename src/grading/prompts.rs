use crate::core::types::{Document, Evidence, Pool};
use chrono::{DateTime, Utc};

pub const QUERY_PLANNER_SYSTEM: &str = "You plan web searches that settle a prediction market. \
Write exactly 3 search queries: one for official results, one for official announcements and one \
for reliable third-party verification. Aim each query at the specific time period the question \
names. Reply with JSON only: {\"evidence_search_queries\": [\"...\", \"...\", \"...\"]}";

pub const SUMMARIZER_SYSTEM: &str = "You summarize one search result for a prediction market grader. \
Use only facts present in the supplied content. If the content says nothing about the market's \
outcome, set relevant to false and leave summary empty. Otherwise write 2-3 sentences. \
Reply with JSON only: {\"relevant\": true, \"summary\": \"...\"}";

pub const GRADER_SYSTEM: &str = "You grade a two-option prediction market from the evidence provided. \
First identify the exact time period the question refers to and decide whether it has passed, \
regardless of the pool's decision date. If it has not passed, or official results are not yet \
available, the result is \"not resolved yet\". Pick \"option A\" or \"option B\" only when official \
results are available and more than one source confirms them. Pick \"push\" when official results \
show neither option is correct or reliable sources conflict with no official tiebreaker. \
Probabilities for the two options must sum to 1. Only cite URLs that appear in the evidence. \
Reply with JSON only: {\"result\": \"not resolved yet\" | \"option A\" | \"option B\" | \"push\", \
\"probabilities\": {\"<option A>\": 0.0, \"<option B>\": 0.0}, \"sources\": [\"<url>\"], \
\"explanation\": \"...\", \"time_period_analysis\": {\"period_mentioned\": \"...\", \
\"period_has_passed\": false, \"official_results_available\": false}}";

// raw page text can run to megabytes
const MAX_CONTENT_CHARS: usize = 12_000;

fn pool_context(pool: &Pool) -> String {
    format!(
        "Question: {}\nOption A: {}\nOption B: {}\nClosure criteria: {}\nClosure instructions: {}",
        pool.question,
        pool.options[0],
        pool.options[1],
        pool.closure_criteria,
        pool.closure_instructions,
    )
}

pub fn query_planner_user(pool: &Pool) -> String {
    pool_context(pool)
}

pub fn summarizer_user(pool: &Pool, query: &str, doc: &Document) -> String {
    format!(
        "{}\n\nSearch query: {}\nSource URL: {}\nContent:\n{}",
        pool_context(pool),
        query,
        doc.url,
        doc.content.chars().take(MAX_CONTENT_CHARS).collect::<String>(),
    )
}

pub fn grader_user(pool: &Pool, evidence: &[Evidence], now: DateTime<Utc>) -> String {
    let evidence_json = serde_json::to_string_pretty(evidence).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Evidence:\n{}\n\n{}\n\nDecision date: {}\nCurrent time: {}",
        evidence_json,
        pool_context(pool),
        pool.decision_date.format("%Y-%m-%d %H:%M:%S UTC"),
        now.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}
