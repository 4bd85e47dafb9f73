use crate::config::config::SocialCfg;
use crate::core::types::Post;
use crate::kv::client::KvStore;
use crate::social::client::SocialClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const ACCESS_TOKEN_KEY: &str = "TWITTER_ACCESS_TOKEN";
pub const REFRESH_TOKEN_KEY: &str = "TWITTER_REFRESH_TOKEN";
pub const CLIENT_ID_KEY: &str = "TWITTER_CLIENT_ID";
pub const CLIENT_SECRET_KEY: &str = "TWITTER_CLIENT_SECRET";

const TOKEN_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[derive(Debug, Deserialize)]
struct TweetsResponse {
    #[serde(default)]
    tweets: Vec<ApiTweet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTweet {
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    is_reply: bool,
    #[serde(default)]
    in_reply_to_id: Option<String>,
    author: ApiAuthor,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAuthor {
    user_name: String,
    id: String,
}

impl From<ApiTweet> for Post {
    fn from(t: ApiTweet) -> Self {
        let in_reply_to = if t.is_reply {
            t.in_reply_to_id.filter(|id| !id.is_empty())
        } else {
            None
        };
        Post {
            id: t.id,
            text: t.text,
            url: t.url,
            author_handle: t.author.user_name,
            author_id: t.author.id,
            in_reply_to,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    data: CreatedTweetData,
}

#[derive(Debug, Deserialize)]
struct CreatedTweetData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
}

/// Reads go through the third-party mentions API; writes go to the
/// platform API with an OAuth2 user token kept in the KV store.
pub struct TwitterClient {
    http: Client,
    cfg: SocialCfg,
    kv: Arc<dyn KvStore>,
}

impl TwitterClient {
    pub fn new(cfg: SocialCfg, http: Client, kv: Arc<dyn KvStore>) -> Self {
        Self { http, cfg, kv }
    }

    async fn read_tweets(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<Post>> {
        let resp = self
            .http
            .get(url)
            .header("x-api-key", &self.cfg.read_api_key)
            .query(query)
            .send()
            .await
            .context("requesting tweets")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Tweet read error: status={}, body={}", status, text);
        }

        let parsed: TweetsResponse = resp.json().await.context("parsing tweets response")?;
        Ok(parsed.tweets.into_iter().map(Post::from).collect())
    }

    async fn try_post(&self, token: &str, text: &str, in_reply_to: Option<&str>) -> Result<String> {
        let mut body = json!({ "text": text });
        if let Some(parent) = in_reply_to {
            body["reply"] = json!({ "in_reply_to_tweet_id": parent });
        }

        let resp = self
            .http
            .post(format!("{}/tweets", self.cfg.write_base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("posting tweet")?;

        if resp.status() != StatusCode::CREATED {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Tweet posting failed: status={}, body={}", status, text);
        }

        let created: CreatedTweet = resp.json().await.context("parsing created tweet")?;
        Ok(created.data.id)
    }

    async fn required(&self, key: &str) -> Result<String> {
        self.kv
            .get(key)
            .await?
            .with_context(|| format!("{key} not found in KV store"))
    }

    /// Runs the refresh-token grant and stores both new tokens.
    async fn refresh_tokens(&self) -> Result<String> {
        let refresh_token = self.required(REFRESH_TOKEN_KEY).await?;
        let client_id = self.required(CLIENT_ID_KEY).await?;
        let client_secret = self.required(CLIENT_SECRET_KEY).await?;

        info!("Refreshing social access token");
        let resp = self
            .http
            .post(&self.cfg.token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("requesting token refresh")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Token refresh failed: status={}, body={}", status, text);
        }

        let grant: TokenGrant = resp.json().await.context("parsing token grant")?;
        self.kv
            .set(ACCESS_TOKEN_KEY, &grant.access_token, Some(TOKEN_TTL))
            .await?;
        self.kv
            .set(REFRESH_TOKEN_KEY, &grant.refresh_token, Some(TOKEN_TTL))
            .await?;
        Ok(grant.access_token)
    }
}

#[async_trait]
impl SocialClient for TwitterClient {
    async fn fetch_mentions(&self, handle: &str, since: DateTime<Utc>) -> Result<Vec<Post>> {
        let url = format!("{}/user/mentions", self.cfg.read_base_url);
        self.read_tweets(
            &url,
            &[
                ("userName", handle.to_string()),
                ("sinceTime", since.timestamp().to_string()),
            ],
        )
        .await
    }

    async fn fetch_post(&self, post_id: &str) -> Result<Option<Post>> {
        let url = format!("{}/tweets", self.cfg.read_base_url);
        let posts = self
            .read_tweets(&url, &[("tweet_ids", post_id.to_string())])
            .await?;
        Ok(posts.into_iter().next())
    }

    async fn post_update(&self, text: &str, in_reply_to: Option<&str>) -> Result<String> {
        let first = match self.kv.get(ACCESS_TOKEN_KEY).await? {
            Some(token) => self.try_post(&token, text, in_reply_to).await,
            None => Err(anyhow::anyhow!("no access token cached")),
        };

        match first {
            Ok(id) => {
                info!(post = %id, "Posted update");
                Ok(id)
            }
            Err(e) => {
                warn!("Post failed, refreshing token: {:#}", e);
                let token = self.refresh_tokens().await?;
                let id = self
                    .try_post(&token, text, in_reply_to)
                    .await
                    .context("posting after token refresh")?;
                info!(post = %id, "Posted update after token refresh");
                Ok(id)
            }
        }
    }
}
