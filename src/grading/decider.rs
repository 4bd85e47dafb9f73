use crate::config::config::GradingCfg;
use crate::core::error::GradingError;
use crate::core::types::{Evidence, GradeResult, Pool, TimePeriodAnalysis, Verdict};
use crate::grading::prompts;
use crate::llm::{TextGenerator, parse_json_reply};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw probabilities may drift this far from 1 before renormalization.
const SUM_TOLERANCE: f64 = 0.02;
/// A push must come with option probabilities at most this far apart.
const TIE_TOLERANCE: f64 = 0.02;

#[derive(Debug, Deserialize)]
struct GraderReply {
    result: String,
    #[serde(default)]
    probabilities: BTreeMap<String, f64>,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    time_period_analysis: Option<TimePeriodAnalysis>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    pub probability_floor: f64,
    pub min_corroborating_sources: usize,
}

impl From<&GradingCfg> for DecisionPolicy {
    fn from(cfg: &GradingCfg) -> Self {
        Self {
            probability_floor: cfg.probability_floor,
            min_corroborating_sources: cfg.min_corroborating_sources,
        }
    }
}

pub struct OutcomeDecider {
    llm: Arc<dyn TextGenerator>,
    policy: DecisionPolicy,
}

fn normalize_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

fn lookup(raw: &BTreeMap<String, f64>, option: &str, alias: &str) -> Option<f64> {
    raw.iter()
        .find(|(k, _)| {
            let k = k.trim();
            k.eq_ignore_ascii_case(option) || k.eq_ignore_ascii_case(alias)
        })
        .map(|(_, v)| *v)
}

/// Maps the grader's probabilities onto the two options, renormalized to
/// sum to 1. A nonzero value under `floor` is clamped to exactly `floor`
/// and the other option takes the remainder.
fn option_probabilities(
    pool: &Pool,
    result: GradeResult,
    raw: &BTreeMap<String, f64>,
    floor: f64,
) -> Result<[f64; 2], GradingError> {
    let a = lookup(raw, &pool.options[0], "option A");
    let b = lookup(raw, &pool.options[1], "option B");
    let (a, b) = match (a, b) {
        (Some(a), Some(b)) => (a, b),
        (Some(a), None) => (a, 1.0 - a),
        (None, Some(b)) => (1.0 - b, b),
        (None, None) if result == GradeResult::Push => (0.5, 0.5),
        (None, None) => {
            return Err(GradingError::Schema(format!(
                "no probabilities for options {:?}",
                pool.options
            )));
        }
    };

    for p in [a, b] {
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(GradingError::Schema(format!("probability {p} outside [0, 1]")));
        }
    }

    let sum = a + b;
    if sum == 0.0 && result == GradeResult::Push {
        return Ok([0.5, 0.5]);
    }
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(GradingError::Schema(format!("probabilities sum to {sum}")));
    }

    let (a, b) = (a / sum, b / sum);
    // zero means ruled out and stays zero
    let probs = if a > 0.0 && a < floor {
        [floor, 1.0 - floor]
    } else if b > 0.0 && b < floor {
        [1.0 - floor, floor]
    } else {
        [a, b]
    };
    Ok(probs)
}

impl OutcomeDecider {
    pub fn new(llm: Arc<dyn TextGenerator>, policy: DecisionPolicy) -> Self {
        Self { llm, policy }
    }

    /// Never fails: insufficient evidence is Unresolved, and a grader
    /// answer that cannot be turned into a verdict is an Error verdict.
    pub async fn decide(&self, pool: &Pool, evidence: &[Evidence], now: DateTime<Utc>) -> Verdict {
        match self.try_decide(pool, evidence, now).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(pool = %pool.id, "Decider could not produce a verdict: {}", e);
                Verdict::error(e.to_string())
            }
        }
    }

    async fn try_decide(
        &self,
        pool: &Pool,
        evidence: &[Evidence],
        now: DateTime<Utc>,
    ) -> Result<Verdict, GradingError> {
        let reply = self
            .llm
            .complete(prompts::GRADER_SYSTEM, &prompts::grader_user(pool, evidence, now))
            .await
            .map_err(|e| GradingError::Transient(format!("grader call: {e:#}")))?;
        let reply: GraderReply =
            parse_json_reply(&reply).map_err(|e| GradingError::Schema(format!("{e:#}")))?;
        debug!(pool = %pool.id, result = %reply.result, "Grader replied");

        self.verdict_from_reply(pool, evidence, reply)
    }

    fn verdict_from_reply(
        &self,
        pool: &Pool,
        evidence: &[Evidence],
        reply: GraderReply,
    ) -> Result<Verdict, GradingError> {
        let result = GradeResult::from_label(&reply.result)
            .ok_or_else(|| GradingError::Schema(format!("unknown result label '{}'", reply.result)))?;

        let analysis = match reply.time_period_analysis {
            Some(a) => a,
            None if result.is_terminal() => {
                return Err(GradingError::Schema(
                    "terminal result without time_period_analysis".to_string(),
                ));
            }
            None => TimePeriodAnalysis::default(),
        };

        if result == GradeResult::Unresolved {
            return Ok(Verdict::unresolved(pool, reply.explanation, analysis));
        }

        if !analysis.period_has_passed {
            let explanation = format!(
                "Period '{}' has not passed yet. {}",
                analysis.period_mentioned, reply.explanation
            );
            return Ok(Verdict::unresolved(pool, explanation, analysis));
        }

        let [pa, pb] =
            option_probabilities(pool, result, &reply.probabilities, self.policy.probability_floor)?;

        // only sources the evidence actually contains count as cited
        let known: BTreeMap<&str, &str> = evidence
            .iter()
            .map(|e| (normalize_url(&e.url), e.url.as_str()))
            .collect();
        let sources: BTreeSet<String> = reply
            .sources
            .iter()
            .filter_map(|s| known.get(normalize_url(s)).map(|u| u.to_string()))
            .collect();

        if result == GradeResult::Push && (pa - pb).abs() > TIE_TOLERANCE {
            return Err(GradingError::Schema(format!(
                "push contradicts probabilities {:.3}/{:.3}",
                pa, pb
            )));
        }

        let mut result = result;
        if matches!(result, GradeResult::OptionA | GradeResult::OptionB) {
            if pa == pb {
                result = GradeResult::Push;
            } else {
                let favoured = if pa > pb {
                    GradeResult::OptionA
                } else {
                    GradeResult::OptionB
                };
                if favoured != result {
                    return Err(GradingError::Schema(format!(
                        "result {:?} contradicts probabilities {:.3}/{:.3}",
                        result, pa, pb
                    )));
                }
                if !analysis.official_results_available
                    || sources.len() < self.policy.min_corroborating_sources
                {
                    let explanation = format!(
                        "Insufficient corroboration ({} of {} sources, official results available: {}). {}",
                        sources.len(),
                        self.policy.min_corroborating_sources,
                        analysis.official_results_available,
                        reply.explanation
                    );
                    return Ok(Verdict::unresolved(pool, explanation, analysis));
                }
            }
        }

        Ok(Verdict {
            result,
            probabilities: BTreeMap::from([
                (pool.options[0].clone(), pa),
                (pool.options[1].clone(), pb),
            ]),
            sources,
            explanation: reply.explanation,
            time_period_analysis: analysis,
        })
    }
}

#[cfg(test)]
pub mod testing {
    use serde_json::json;

    /// A grader reply in the wire shape.
    pub fn grader_reply(
        result: &str,
        probabilities: &[(&str, f64)],
        sources: &[&str],
        period_has_passed: bool,
        official: bool,
    ) -> Result<String, String> {
        let probabilities: serde_json::Map<String, serde_json::Value> = probabilities
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        Ok(json!({
            "result": result,
            "probabilities": probabilities,
            "sources": sources,
            "explanation": "test grading",
            "time_period_analysis": {
                "period_mentioned": "Q1 2024",
                "period_has_passed": period_has_passed,
                "official_results_available": official,
            }
        })
        .to_string())
    }
}
