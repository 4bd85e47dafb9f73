use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub llm: LlmCfg,
    #[serde(default)]
    pub ledger: LedgerCfg,
    #[serde(default)]
    pub search: SearchCfg,
    #[serde(default)]
    pub social: SocialCfg,
    #[serde(default)]
    pub redis: RedisCfg,
    #[serde(default)]
    pub grading: GradingCfg,
    #[serde(default)]
    pub proposals: ProposalCfg,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpCfg {
    #[serde(rename = "userAgent", alias = "useragent", default = "default_ua")]
    pub user_agent: String,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(rename = "poolIdleTimeout", alias = "poolidletimeout", with = "humantime_serde", default = "default_idle")]
    pub pool_idle_timeout: Duration,
    #[serde(rename = "poolMaxIdlePerHost", alias = "poolmaxidleperhost", default = "default_pool")]
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            user_agent: default_ua(),
            timeout: default_timeout(),
            pool_idle_timeout: default_idle(),
            pool_max_idle_per_host: default_pool(),
        }
    }
}
fn default_ua() -> String {
    "poolgrader/0.1".into()
}
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_idle() -> Duration {
    Duration::from_secs(90)
}
fn default_pool() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmCfg {
    #[serde(rename = "baseUrl", alias = "baseurl")]
    pub base_url: String,
    #[serde(rename = "apiKey", alias = "apikey", default)]
    pub api_key: String,
    pub model: String,
    #[serde(rename = "rateLimitRpm", alias = "ratelimitrpm", default = "default_rpm")]
    pub rate_limit_rpm: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmCfg {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "".to_string(),
            model: "gpt-4o".to_string(),
            rate_limit_rpm: default_rpm(),
            temperature: default_temperature(),
        }
    }
}
fn default_rpm() -> u32 {
    60
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerCfg {
    #[serde(rename = "rpcUrl", alias = "rpcurl")]
    pub rpc_url: String,
    #[serde(rename = "contractAddress", alias = "contractaddress", default)]
    pub contract_address: String,
    #[serde(rename = "privateKey", alias = "privatekey", default)]
    pub private_key: String,
    #[serde(rename = "subgraphUrl", alias = "subgraphurl")]
    pub subgraph_url: String,
    #[serde(rename = "gasLimit", alias = "gaslimit", default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Run against the in-memory ledger instead of the chain.
    #[serde(default)]
    pub simulate: bool,
}

impl Default for LedgerCfg {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: "".to_string(),
            private_key: "".to_string(),
            subgraph_url: "http://localhost:8000/subgraphs/name/betting-pools".to_string(),
            gas_limit: default_gas_limit(),
            simulate: false,
        }
    }
}
fn default_gas_limit() -> u64 {
    3_000_000
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchCfg {
    #[serde(rename = "baseUrl", alias = "baseurl")]
    pub base_url: String,
    #[serde(rename = "apiKey", alias = "apikey", default)]
    pub api_key: String,
    #[serde(rename = "maxResults", alias = "maxresults", default = "default_max_results")]
    pub max_results: u32,
}

impl Default for SearchCfg {
    fn default() -> Self {
        Self {
            base_url: "https://api.tavily.com/search".to_string(),
            api_key: "".to_string(),
            max_results: default_max_results(),
        }
    }
}
fn default_max_results() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SocialCfg {
    #[serde(rename = "readBaseUrl", alias = "readbaseurl")]
    pub read_base_url: String,
    #[serde(rename = "readApiKey", alias = "readapikey", default)]
    pub read_api_key: String,
    #[serde(rename = "writeBaseUrl", alias = "writebaseurl")]
    pub write_base_url: String,
    #[serde(rename = "tokenUrl", alias = "tokenurl")]
    pub token_url: String,
    #[serde(default)]
    pub handle: String,
    #[serde(rename = "pollingWindow", alias = "pollingwindow", with = "humantime_serde", default = "default_window")]
    pub polling_window: Duration,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(rename = "frontendUrlPrefix", alias = "frontendurlprefix", default)]
    pub frontend_url_prefix: String,
}

impl Default for SocialCfg {
    fn default() -> Self {
        Self {
            read_base_url: "https://api.twitterapi.io/twitter".to_string(),
            read_api_key: "".to_string(),
            write_base_url: "https://api.twitter.com/2".to_string(),
            token_url: "https://api.twitter.com/2/oauth2/token".to_string(),
            handle: "".to_string(),
            polling_window: default_window(),
            command: default_command(),
            frontend_url_prefix: "".to_string(),
        }
    }
}
fn default_window() -> Duration {
    Duration::from_secs(3600)
}
fn default_command() -> String {
    "@CanIBetOn".into()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RedisCfg {
    pub url: String,
}

impl Default for RedisCfg {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GradingCfg {
    #[serde(rename = "maxAttempts", alias = "maxattempts", default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(rename = "retryBackoff", alias = "retrybackoff", with = "humantime_serde", default = "default_backoff")]
    pub retry_backoff: Duration,
    #[serde(rename = "settleDelay", alias = "settledelay", with = "humantime_serde", default = "default_settle")]
    pub settle_delay: Duration,
    #[serde(rename = "batchInterval", alias = "batchinterval", with = "humantime_serde", default = "default_batch")]
    pub batch_interval: Duration,
    #[serde(rename = "leaseTtl", alias = "leasettl", with = "humantime_serde", default = "default_lease")]
    pub lease_ttl: Duration,
    #[serde(rename = "probabilityFloor", alias = "probabilityfloor", default = "default_floor")]
    pub probability_floor: f64,
    #[serde(rename = "minCorroboratingSources", alias = "mincorroboratingsources", default = "default_corroboration")]
    pub min_corroborating_sources: usize,
}

impl Default for GradingCfg {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff: default_backoff(),
            settle_delay: default_settle(),
            batch_interval: default_batch(),
            lease_ttl: default_lease(),
            probability_floor: default_floor(),
            min_corroborating_sources: default_corroboration(),
        }
    }
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff() -> Duration {
    Duration::from_secs(2)
}
fn default_settle() -> Duration {
    Duration::from_secs(60)
}
fn default_batch() -> Duration {
    Duration::from_secs(3600)
}
fn default_lease() -> Duration {
    Duration::from_secs(30 * 60)
}
fn default_floor() -> f64 {
    0.01
}
fn default_corroboration() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProposalCfg {
    #[serde(rename = "pollInterval", alias = "pollinterval", with = "humantime_serde", default = "default_poll")]
    pub poll_interval: Duration,
    #[serde(rename = "betsCloseOffset", alias = "betscloseoffset", with = "humantime_serde", default = "default_close_offset")]
    pub bets_close_offset: Duration,
    #[serde(rename = "closeSafetyMargin", alias = "closesafetymargin", with = "humantime_serde", default = "default_margin")]
    pub close_safety_margin: Duration,
}

impl Default for ProposalCfg {
    fn default() -> Self {
        Self {
            poll_interval: default_poll(),
            bets_close_offset: default_close_offset(),
            close_safety_margin: default_margin(),
        }
    }
}
fn default_poll() -> Duration {
    Duration::from_secs(30)
}
fn default_close_offset() -> Duration {
    Duration::from_secs(24 * 3600)
}
fn default_margin() -> Duration {
    Duration::from_secs(5)
}

impl AppCfg {
    pub fn load(path: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(config::Environment::default().separator("__"))
            .build()
            .context("building config")?;

        let app: AppCfg = cfg.try_deserialize().context("deserializing config")?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.llm.base_url.is_empty(), "llm.baseUrl missing");
        anyhow::ensure!(!self.llm.model.is_empty(), "llm.model missing");
        anyhow::ensure!(
            !self.ledger.subgraph_url.is_empty(),
            "ledger.subgraphUrl missing"
        );
        if !self.ledger.simulate {
            anyhow::ensure!(
                !self.ledger.contract_address.is_empty(),
                "ledger.contractAddress required unless ledger.simulate is set"
            );
            anyhow::ensure!(
                !self.ledger.private_key.is_empty(),
                "ledger.privateKey required unless ledger.simulate is set"
            );
        }
        anyhow::ensure!(
            self.grading.max_attempts > 0,
            "grading.maxAttempts must be > 0"
        );
        anyhow::ensure!(
            (0.0..0.5).contains(&self.grading.probability_floor),
            "grading.probabilityFloor must be in [0, 0.5)"
        );
        anyhow::ensure!(
            self.grading.min_corroborating_sources > 0,
            "grading.minCorroboratingSources must be > 0"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_load_yaml_with_env_override() {
        let path = env::temp_dir().join(format!("poolgrader-cfg-{}.yml", std::process::id()));
        std::fs::write(
            &path,
            r#"
llm:
  baseUrl: https://llm.internal/v1
  apiKey: from-file
  model: gpt-4o-mini
ledger:
  simulate: true
social:
  readBaseUrl: https://read.example/twitter
  frontendUrlPrefix: https://app.example/pools/
grading:
  settleDelay: 5s
  minCorroboratingSources: 3
"#,
        )
        .unwrap();
        unsafe {
            env::set_var("LLM__APIKEY", "from-env");
        }

        let cfg = AppCfg::load(path.to_str().unwrap());

        unsafe {
            env::remove_var("LLM__APIKEY");
        }
        std::fs::remove_file(&path).unwrap();

        let cfg = cfg.unwrap();
        assert_eq!(cfg.llm.api_key, "from-env");
        assert_eq!(cfg.llm.base_url, "https://llm.internal/v1");
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.social.read_base_url, "https://read.example/twitter");
        assert_eq!(cfg.social.frontend_url_prefix, "https://app.example/pools/");
        assert_eq!(cfg.grading.settle_delay, Duration::from_secs(5));
        assert_eq!(cfg.grading.min_corroborating_sources, 3);
        // untouched sections and keys keep their defaults
        assert_eq!(cfg.social.command, "@CanIBetOn");
        assert_eq!(cfg.grading.max_attempts, 3);
    }

    #[test]
    fn test_defaults_match_grading_policy() {
        let cfg = AppCfg::default();
        assert_eq!(cfg.grading.max_attempts, 3);
        assert_eq!(cfg.grading.settle_delay, Duration::from_secs(60));
        assert_eq!(cfg.grading.min_corroborating_sources, 2);
        assert_eq!(cfg.search.max_results, 2);
    }

    #[test]
    fn test_validate_requires_signing_key_for_live_ledger() {
        let mut cfg = AppCfg::default();
        assert!(cfg.validate().is_err());

        cfg.ledger.simulate = true;
        assert!(cfg.validate().is_ok());

        cfg.grading.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
