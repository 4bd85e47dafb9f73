use crate::config::config::SearchCfg;
use crate::core::types::Document;
use crate::search::client::EvidenceSearchService;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
    include_answer: bool,
    include_raw_content: bool,
    include_images: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

impl From<SearchHit> for Document {
    fn from(hit: SearchHit) -> Self {
        // raw page text when present, the snippet otherwise
        let content = match hit.raw_content {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => hit.content,
        };
        Document {
            url: hit.url,
            content,
        }
    }
}

pub struct TavilySearchClient {
    client: Client,
    cfg: SearchCfg,
}

impl TavilySearchClient {
    pub fn new(cfg: SearchCfg, client: Client) -> Self {
        Self { client, cfg }
    }
}

#[async_trait]
impl EvidenceSearchService for TavilySearchClient {
    async fn search(&self, query: &str) -> Result<Vec<Document>> {
        let body = SearchRequest {
            api_key: &self.cfg.api_key,
            query,
            max_results: self.cfg.max_results,
            include_answer: true,
            include_raw_content: true,
            include_images: false,
        };

        let resp = self
            .client
            .post(&self.cfg.base_url)
            .json(&body)
            .send()
            .await
            .context("requesting search results")?
            .error_for_status()
            .with_context(|| format!("search API rejected query '{query}'"))?;

        let parsed: SearchResponse = resp.json().await.context("parsing search response")?;
        Ok(parsed
            .results
            .into_iter()
            .filter(|hit| !hit.url.is_empty())
            .map(Document::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_prefers_raw_content() {
        let hit: SearchHit = serde_json::from_str(
            r#"{"url": "https://ir.acme.com/q1", "content": "snippet", "raw_content": "full page"}"#,
        )
        .unwrap();
        let doc = Document::from(hit);
        assert_eq!(doc.content, "full page");

        let hit: SearchHit = serde_json::from_str(
            r#"{"url": "https://news.example/q1", "content": "snippet", "raw_content": null}"#,
        )
        .unwrap();
        assert_eq!(Document::from(hit).content, "snippet");
    }

    #[tokio::test]
    async fn test_error_status_fails_the_query() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 401 Unauthorized\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        });

        let cfg = SearchCfg {
            base_url: format!("http://{addr}/search"),
            ..SearchCfg::default()
        };
        let client = TavilySearchClient::new(cfg, Client::new());
        let err = client.search("acme q1 revenue").await.unwrap_err();
        assert!(format!("{err:#}").contains("401"));
    }

    #[tokio::test]
    #[ignore] // needs a search API key
    async fn test_real_search() {
        let mut cfg = SearchCfg::default();
        cfg.api_key = std::env::var("SEARCH__APIKEY").unwrap_or_default();
        let client = TavilySearchClient::new(cfg, Client::new());
        let docs = client.search("Apple Q1 2024 earnings revenue").await.unwrap();
        assert!(!docs.is_empty());
    }
}
