mod config;
mod core;
mod grading;
mod ideas;
mod kv;
mod ledger;
mod lifecycle;
mod llm;
mod resolution;
mod search;
mod social;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::config::AppCfg;
use core::types::Actor;
use grading::{DecisionPolicy, EvidenceGatherer, OutcomeDecider};
use ideas::LlmIdeaGenerator;
use kv::client::KvStore;
use kv::memory::MemoryKvStore;
use kv::redis::RedisKvStore;
use ledger::client::LedgerClient;
use ledger::evm::EvmLedgerClient;
use ledger::simulator::SimLedgerClient;
use lifecycle::PoolLifecycleManager;
use llm::{LlmClient, TextGenerator};
use reqwest::Client;
use resolution::{ResolutionActor, ResolutionScheduler, Settlement};
use search::tavily::TavilySearchClient;
use social::client::SocialClient;
use social::mentions::{MentionActor, MentionPoller};
use social::twitter::TwitterClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Creates prediction pools from mentions and grades them", long_about = None)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "config.yml")]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one grading batch, settle it, and exit
    Grade,
    /// Run one mention polling pass and exit
    Poll,
    /// Run the mention poller and the grading scheduler until Ctrl-C
    Run,
}

/// Collaborators shared by every command, built once from config.
struct Services {
    cfg: AppCfg,
    ledger: Arc<dyn LedgerClient>,
    kv: Arc<dyn KvStore>,
    llm: Arc<dyn TextGenerator>,
    social: Arc<dyn SocialClient>,
    http: Client,
}

impl Services {
    async fn build(cfg: AppCfg) -> Result<Self> {
        info!("Initializing Client");
        let http = Client::builder()
            .user_agent(cfg.http.user_agent.clone())
            .pool_idle_timeout(cfg.http.pool_idle_timeout)
            .pool_max_idle_per_host(cfg.http.pool_max_idle_per_host)
            .timeout(cfg.http.timeout)
            .build()
            .context("building http client")?;

        let (ledger, kv): (Arc<dyn LedgerClient>, Arc<dyn KvStore>) = if cfg.ledger.simulate {
            info!("Using simulated ledger and in-memory KV store");
            (Arc::new(SimLedgerClient::new()), Arc::new(MemoryKvStore::new()))
        } else {
            (
                Arc::new(EvmLedgerClient::new(&cfg.ledger, http.clone())?),
                Arc::new(RedisKvStore::connect(&cfg.redis.url).await?),
            )
        };

        let llm_client = LlmClient::new(cfg.llm.clone());
        info!(model = %llm_client.model(), "Initializing LLM client");
        let llm: Arc<dyn TextGenerator> = Arc::new(llm_client);
        let social: Arc<dyn SocialClient> =
            Arc::new(TwitterClient::new(cfg.social.clone(), http.clone(), kv.clone()));

        Ok(Self {
            cfg,
            ledger,
            kv,
            llm,
            social,
            http,
        })
    }

    fn resolution_actor(&self, shutdown: CancellationToken) -> ResolutionActor {
        let search = Arc::new(TavilySearchClient::new(self.cfg.search.clone(), self.http.clone()));
        let scheduler = ResolutionScheduler::new(
            self.ledger.clone(),
            EvidenceGatherer::new(self.llm.clone(), search),
            OutcomeDecider::new(self.llm.clone(), DecisionPolicy::from(&self.cfg.grading)),
            self.kv.clone(),
            self.cfg.grading.clone(),
        );
        let settlement = Settlement::new(
            self.ledger.clone(),
            self.social.clone(),
            self.cfg.social.frontend_url_prefix.clone(),
            &self.cfg.grading,
        );
        ResolutionActor::new(scheduler, settlement, self.cfg.grading.batch_interval, shutdown)
    }

    fn mention_poller(&self) -> MentionPoller {
        MentionPoller::new(
            self.social.clone(),
            Arc::new(LlmIdeaGenerator::new(self.llm.clone())),
            Arc::new(PoolLifecycleManager::new(self.ledger.clone())),
            self.kv.clone(),
            self.cfg.social.clone(),
            self.cfg.proposals.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let cfg = AppCfg::load(&cli.config)?;

    // Root span for the supervisor/main thread
    let span = info_span!(
        "Supervisor",
        pid = %std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
    );
    let _enter = span.enter();

    info!("Starting up");
    let services = Services::build(cfg).await?;

    match cli.command {
        Commands::Grade => {
            let actor = services.resolution_actor(CancellationToken::new());
            let (report, settled) = actor.run_cycle().await?;
            for attempt in &report.abandoned {
                warn!(
                    pool = %attempt.pool_id,
                    attempts = attempt.attempt_count,
                    error = ?attempt.last_error,
                    "Pool left pending after exhausting retries"
                );
            }
            if let Some(e) = &settled.claim_error {
                warn!("Payout claim failed, bets stay unclaimed: {}", e);
            }
            info!(
                skipped = report.skipped,
                committed = report.committed.len(),
                unresolved = report.unresolved.len(),
                abandoned = report.abandoned.len(),
                ledger_failures = report.ledger_failures.len(),
                claimed = settled.claimed_bets.len(),
                announced = settled.announced.len(),
                "Grading run complete"
            );
        }
        Commands::Poll => {
            let report = services.mention_poller().poll_once(Utc::now()).await?;
            info!(
                created = report.created.len(),
                already_reviewed = report.already_reviewed,
                failed = report.failed,
                "Mention pass complete"
            );
        }
        Commands::Run => supervise(&services).await,
    }

    info!("Supervisor exit");
    Ok(())
}

async fn supervise(services: &Services) {
    let shutdown = CancellationToken::new();

    info!("Building actors");
    let resolution = services.resolution_actor(shutdown.clone());
    let mentions = MentionActor::new(
        services.mention_poller(),
        services.cfg.proposals.clone(),
        shutdown.clone(),
    );

    info!("Spawning actors");
    let mut actors = tokio::task::JoinSet::new();
    actors.spawn(resolution.run().instrument(info_span!("Resolution")));
    actors.spawn(mentions.run().instrument(info_span!("Mentions")));

    info!("Waiting for actors");
    tokio::select! {
        _ = async {
            while let Some(res) = actors.join_next().await {
                match res {
                    Ok(Ok(())) => info!("Actor exited cleanly"),
                    Ok(Err(e)) => error!(?e, "Actor returned error"),
                    Err(panic) => error!(?panic, "Actor panicked/cancelled"),
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down supervisor loop");
            shutdown.cancel();
        }
    }

    info!("Waiting for graceful shutdown of actors");
    while let Some(res) = actors.join_next().await {
        match res {
            Ok(Ok(())) => info!("Actor exited cleanly"),
            Ok(Err(e)) => error!(?e, "Actor returned error"),
            Err(panic) => error!(?panic, "Actor panicked/cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses_subcommands() {
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from(["poolgrader", "grade"]).unwrap();
        assert!(matches!(cli.command, Commands::Grade));
        assert_eq!(cli.config, "config.yml");

        let cli = Cli::try_parse_from(["poolgrader", "--config", "prod.yml", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run));
        assert_eq!(cli.config, "prod.yml");

        assert!(Cli::try_parse_from(["poolgrader"]).is_err());
    }
}
