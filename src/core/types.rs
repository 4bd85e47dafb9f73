use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[async_trait::async_trait]
pub trait Actor: Send + Sync + 'static {
    async fn run(self) -> Result<()>;
}

/// Ledger-assigned pool identifier. Decimal integer is the canonical form;
/// hex only appears in frontend links.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolId(pub u64);

impl PoolId {
    pub fn to_hex(self) -> String {
        let mut digits = format!("{:x}", self.0);
        if digits.len() % 2 != 0 {
            digits.insert(0, '0');
        }
        format!("0x{digits}")
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PoolId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let id = match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse::<u64>(),
        }
        .with_context(|| format!("invalid pool id '{s}'"))?;
        Ok(PoolId(id))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolStatus {
    Pending,
    Graded,
    Error,
}

impl FromStr for PoolStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(PoolStatus::Pending),
            "GRADED" => Ok(PoolStatus::Graded),
            "ERROR" => Ok(PoolStatus::Error),
            other => anyhow::bail!("unknown pool status '{other}'"),
        }
    }
}

// ----------- Domain records -----------------
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub question: String,
    pub options: [String; 2],
    pub bets_close_at: DateTime<Utc>,
    pub decision_date: DateTime<Utc>,
    pub closure_criteria: String,
    pub closure_instructions: String,
    pub status: PoolStatus,
    pub external_post_id: Option<String>,
    /// Total amount wagered, in the ledger's base units.
    pub total_bets: Decimal,
}

impl Pool {
    pub fn betting_closed(&self, now: DateTime<Utc>) -> bool {
        self.bets_close_at <= now
    }

    pub fn decision_date_reached(&self, now: DateTime<Utc>) -> bool {
        self.decision_date <= now
    }

    pub fn option_label(&self, result: GradeResult) -> Option<&str> {
        match result {
            GradeResult::OptionA => Some(&self.options[0]),
            GradeResult::OptionB => Some(&self.options[1]),
            _ => None,
        }
    }

    /// Yes/No pool whose betting window and decision date are both `age` in the past
    /// (negative `age` puts them in the future).
    #[cfg(test)]
    pub fn sample(id: u64, now: DateTime<Utc>, age: chrono::Duration) -> Self {
        Pool {
            id: PoolId(id),
            question: "Will Acme report Q1 2024 revenue above $1B?".to_string(),
            options: ["Yes".to_string(), "No".to_string()],
            bets_close_at: now - age - chrono::Duration::hours(1),
            decision_date: now - age,
            closure_criteria: "Acme's official Q1 2024 earnings release".to_string(),
            closure_instructions: "Yes if reported revenue exceeds $1B, otherwise No".to_string(),
            status: PoolStatus::Pending,
            external_post_id: Some("1850000000000000000".to_string()),
            total_bets: Decimal::new(250, 0),
        }
    }
}

/// Parameters for a new ledger pool, before the ledger assigns an id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolProposal {
    pub question: String,
    pub options: Vec<String>,
    pub bets_close_at: DateTime<Utc>,
    pub decision_date: DateTime<Utc>,
    pub closure_criteria: String,
    pub closure_instructions: String,
    pub category: String,
    pub creator: Creator,
    #[serde(default)]
    pub image_url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: u64,
    pub pool_id: PoolId,
    pub payout_claimed: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub text: String,
    pub url: String,
    pub author_handle: String,
    pub author_id: String,
    pub in_reply_to: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub url: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub url: String,
    pub summary: String,
    pub source_query: String,
}

// ----------- Verdicts -----------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GradeResult {
    Unresolved,
    OptionA,
    OptionB,
    Push,
    Error,
}

impl GradeResult {
    /// Result code understood by the ledger's `gradeBet`.
    pub fn code(self) -> u8 {
        match self {
            GradeResult::Unresolved => 0,
            GradeResult::OptionA => 1,
            GradeResult::OptionB => 2,
            GradeResult::Push => 3,
            GradeResult::Error => 4,
        }
    }

    /// Whether this result may be committed to the ledger.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GradeResult::OptionA | GradeResult::OptionB | GradeResult::Push
        )
    }

    /// Parses the grader's textual label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "not resolved yet" | "unresolved" => Some(GradeResult::Unresolved),
            "option a" => Some(GradeResult::OptionA),
            "option b" => Some(GradeResult::OptionB),
            "push" => Some(GradeResult::Push),
            _ => None,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            GradeResult::Unresolved => "unresolved",
            GradeResult::OptionA => "option_a",
            GradeResult::OptionB => "option_b",
            GradeResult::Push => "push",
            GradeResult::Error => "error",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimePeriodAnalysis {
    #[serde(default)]
    pub period_mentioned: String,
    #[serde(default)]
    pub period_has_passed: bool,
    #[serde(default)]
    pub official_results_available: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub result: GradeResult,
    pub probabilities: BTreeMap<String, f64>,
    pub sources: BTreeSet<String>,
    pub explanation: String,
    pub time_period_analysis: TimePeriodAnalysis,
}

impl Verdict {
    /// Not ready to grade: every option at zero and nothing cited.
    pub fn unresolved(
        pool: &Pool,
        explanation: impl Into<String>,
        time_period_analysis: TimePeriodAnalysis,
    ) -> Self {
        Self {
            result: GradeResult::Unresolved,
            probabilities: pool.options.iter().map(|o| (o.clone(), 0.0)).collect(),
            sources: BTreeSet::new(),
            explanation: explanation.into(),
            time_period_analysis,
        }
    }

    pub fn error(explanation: impl Into<String>) -> Self {
        Self {
            result: GradeResult::Error,
            probabilities: BTreeMap::new(),
            sources: BTreeSet::new(),
            explanation: explanation.into(),
            time_period_analysis: TimePeriodAnalysis::default(),
        }
    }

    pub fn probability_sum(&self) -> f64 {
        self.probabilities.values().sum()
    }
}

/// A pool whose verdict was committed to the ledger in this batch run.
#[derive(Clone, Debug, PartialEq)]
pub struct GradedPool {
    pub pool: Pool,
    pub verdict: Verdict,
}

/// Retry bookkeeping for one pool within one batch run.
#[derive(Clone, Debug, PartialEq)]
pub struct GradingAttempt {
    pub pool_id: PoolId,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}
