use crate::config::config::{ProposalCfg, SocialCfg};
use crate::core::types::{Actor, Creator, Post, PoolId};
use crate::ideas::IdeaGenerator;
use crate::kv::client::KvStore;
use crate::lifecycle::PoolLifecycleManager;
use crate::social::announce;
use crate::social::client::SocialClient;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const REVIEWED_SET: &str = "reviewed_tweets";
const THREAD_SEPARATOR: &str = "\n----------\n";
const MAX_THREAD_DEPTH: usize = 25;

#[derive(Debug, Default, PartialEq)]
pub struct PollReport {
    pub created: Vec<PoolId>,
    pub already_reviewed: usize,
    pub failed: usize,
}

/// Turns new mentions of the listener handle into ledger pools.
pub struct MentionPoller {
    social: Arc<dyn SocialClient>,
    ideas: Arc<dyn IdeaGenerator>,
    lifecycle: Arc<PoolLifecycleManager>,
    kv: Arc<dyn KvStore>,
    social_cfg: SocialCfg,
    proposal_cfg: ProposalCfg,
}

impl MentionPoller {
    pub fn new(
        social: Arc<dyn SocialClient>,
        ideas: Arc<dyn IdeaGenerator>,
        lifecycle: Arc<PoolLifecycleManager>,
        kv: Arc<dyn KvStore>,
        social_cfg: SocialCfg,
        proposal_cfg: ProposalCfg,
    ) -> Self {
        Self {
            social,
            ideas,
            lifecycle,
            kv,
            social_cfg,
            proposal_cfg,
        }
    }

    pub async fn poll_once(&self, now: DateTime<Utc>) -> Result<PollReport> {
        let window = chrono::Duration::from_std(self.social_cfg.polling_window)
            .context("polling window out of range")?;
        let mentions = self
            .social
            .fetch_mentions(&self.social_cfg.handle, now - window)
            .await
            .context("fetching mentions")?;

        let mut report = PollReport::default();
        if mentions.is_empty() {
            info!("No mentions in polling window");
            return Ok(report);
        }

        let reviewed: HashSet<String> = self.kv.members(REVIEWED_SET).await?.into_iter().collect();
        for mention in mentions {
            if reviewed.contains(&mention.id) {
                report.already_reviewed += 1;
                continue;
            }
            match self.propose_from_mention(&mention, now).await {
                Ok(pool_id) => report.created.push(pool_id),
                Err(e) => {
                    report.failed += 1;
                    metrics::counter!("mention_proposals_failed_total").increment(1);
                    error!(post = %mention.id, author = %mention.author_handle, "Pool proposal failed: {:#}", e);
                }
            }
        }
        Ok(report)
    }

    /// `@handle: text` for each ancestor of `post`, nearest first.
    async fn thread_context(&self, post: &Post) -> String {
        let mut lines = Vec::new();
        let mut parent = post.in_reply_to.clone();
        while let Some(parent_id) = parent {
            if lines.len() >= MAX_THREAD_DEPTH {
                break;
            }
            match self.social.fetch_post(&parent_id).await {
                Ok(Some(prior)) => {
                    lines.push(format!("@{}: {}", prior.author_handle, prior.text));
                    parent = prior.in_reply_to;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(post = %parent_id, "Could not fetch thread parent: {:#}", e);
                    break;
                }
            }
        }
        lines.join(THREAD_SEPARATOR)
    }

    async fn propose_from_mention(&self, mention: &Post, now: DateTime<Utc>) -> Result<PoolId> {
        let thread = self.thread_context(mention).await;
        let request = mention.text.replace(&self.social_cfg.command, "");
        let request = request.trim();
        info!(post = %mention.id, author = %mention.author_handle, "Proposing pool for mention");

        let idea = self.ideas.generate(request, &thread, now).await?;
        let proposal = idea.into_proposal(
            Creator {
                name: mention.author_handle.clone(),
                id: mention.author_id.clone(),
            },
            now,
            &self.proposal_cfg,
        )?;
        let pool_id = self.lifecycle.propose_pool(&proposal).await?;

        // only after the ledger write, so failed proposals are retried next pass
        self.kv.add(REVIEWED_SET, &mention.id).await?;

        let text = announce::creation_text(
            pool_id,
            &proposal.question,
            &proposal.options,
            &self.social_cfg.frontend_url_prefix,
            &mention.url,
        );
        match self.social.post_update(&text, None).await {
            Ok(post_id) => {
                if let Err(e) = self.lifecycle.record_external_post(pool_id, &post_id).await {
                    warn!(pool = %pool_id, "Could not link announcement post: {:#}", e);
                }
            }
            Err(e) => warn!(pool = %pool_id, "Creation announcement failed: {:#}", e),
        }
        Ok(pool_id)
    }
}

pub struct MentionActor {
    pub poller: MentionPoller,
    pub proposal_cfg: ProposalCfg,
    pub shutdown: CancellationToken,
}

impl MentionActor {
    pub fn new(poller: MentionPoller, proposal_cfg: ProposalCfg, shutdown: CancellationToken) -> Self {
        Self {
            poller,
            proposal_cfg,
            shutdown,
        }
    }
}

#[async_trait::async_trait]
impl Actor for MentionActor {
    async fn run(mut self) -> Result<()> {
        info!("MentionActor started");
        let mut tick = tokio::time::interval(self.proposal_cfg.poll_interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("MentionActor: shutdown requested");
                    break;
                }

                _ = tick.tick() => {
                    match self.poller.poll_once(Utc::now()).await {
                        Ok(report) if !report.created.is_empty() || report.failed > 0 => {
                            info!(created = report.created.len(), failed = report.failed, "Mention pass finished");
                        }
                        Ok(_) => {}
                        Err(e) => warn!("MentionActor: mention pass failed, waiting for next tick: {:#}", e),
                    }
                }
            }
        }
        info!("MentionActor stopped cleanly");
        Ok(())
    }
}
