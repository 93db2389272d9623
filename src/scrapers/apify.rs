//! Apify cloud-actor backend.
//!
//! Starts a `website-content-crawler` run for a single URL, polls the run
//! until it reaches a terminal state, then concatenates the text of the
//! run's default dataset.

use super::{ensure_viable, finish, ExtractionOptions, ScrapeError, Scraped, ScraperBackend};
use crate::config::ScraperConfig;
use crate::schema::{BackendId, BackendKind, ExtractionResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cloud dispatch is slow; give it well over the self-hosted budget.
pub const DEFAULT_APIFY_TIMEOUT: Duration = Duration::from_secs(90);
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ApifyBackend {
    client: reqwest::Client,
    token: Option<String>,
    actor_id: String,
    base_url: String,
    poll_interval: Duration,
}

// ── Apify API request/response types ───────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CrawlerInput<'a> {
    start_urls: Vec<StartUrl<'a>>,
    max_crawl_depth: u32,
    save_html: bool,
}

#[derive(Serialize)]
struct StartUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunData {
    id: String,
    status: String,
    default_dataset_id: String,
}

#[derive(Deserialize)]
struct DatasetItem {
    #[serde(default)]
    text: Option<String>,
}

fn is_terminal(status: &str) -> bool {
    matches!(status, "SUCCEEDED" | "FAILED" | "ABORTED" | "TIMED-OUT")
}

// ── Backend implementation ──────────────────────────────────────────────────

impl ApifyBackend {
    pub fn from_config(client: reqwest::Client, config: &ScraperConfig) -> Self {
        Self {
            client,
            token: config.apify_token.clone(),
            actor_id: config.apify_actor.clone(),
            base_url: config.apify_api_base.trim_end_matches('/').to_string(),
            poll_interval: POLL_INTERVAL,
        }
    }

    fn token(&self) -> Result<&str, ScrapeError> {
        self.token.as_deref().ok_or_else(|| {
            ScrapeError::Configuration("Apify API token not found (APIFY_API_TOKEN)".to_string())
        })
    }

    async fn scrape(&self, url: &str) -> Result<Scraped, ScrapeError> {
        let token = self.token()?;

        // "user/actor" is addressed as "user~actor" in API paths.
        let actor_path = self.actor_id.replace('/', "~");
        let input = CrawlerInput {
            start_urls: vec![StartUrl { url }],
            max_crawl_depth: 0,
            save_html: false,
        };
        let response = self
            .client
            .post(format!("{}/acts/{}/runs", self.base_url, actor_path))
            .bearer_auth(token)
            .json(&input)
            .send()
            .await?;
        let mut run: RunData = read_data(response).await?;
        info!(run_id = %run.id, url, "Apify run started");

        while !is_terminal(&run.status) {
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .client
                .get(format!("{}/actor-runs/{}", self.base_url, run.id))
                .bearer_auth(token)
                .send()
                .await?;
            run = read_data(response).await?;
            debug!(run_id = %run.id, status = %run.status, "Apify run polled");
        }

        if run.status != "SUCCEEDED" {
            return Err(ScrapeError::Job(format!(
                "Apify actor run {} finished with status {}",
                run.id, run.status
            )));
        }

        let response = self
            .client
            .get(format!(
                "{}/datasets/{}/items?format=json",
                self.base_url, run.default_dataset_id
            ))
            .bearer_auth(token)
            .send()
            .await?;
        let items: Vec<DatasetItem> = read_json(response).await?;

        let text = items
            .into_iter()
            .filter_map(|item| item.text)
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if text.is_empty() {
            return Err(ScrapeError::Content(
                "Could not extract any text content from the URL using Apify".to_string(),
            ));
        }

        Ok(Scraped {
            text: ensure_viable(&text)?,
            run_id: Some(run.id),
        })
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ScrapeError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ScrapeError::Upstream {
            status: status.as_u16(),
            message,
        });
    }
    let raw = response.text().await?;
    serde_json::from_str(&raw).map_err(|e| ScrapeError::Upstream {
        status: status.as_u16(),
        message: format!("unexpected Apify response format: {}", e),
    })
}

async fn read_data<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ScrapeError> {
    read_json::<ApiResponse<T>>(response).await.map(|r| r.data)
}

#[async_trait::async_trait]
impl ScraperBackend for ApifyBackend {
    fn id(&self) -> BackendId {
        BackendId::Apify
    }

    fn display_name(&self) -> &str {
        "Apify"
    }

    fn description(&self) -> &str {
        "Cloud-based web scraping service. Reliable and handles complex websites, but requires an API token and costs money per use."
    }

    fn kind(&self) -> BackendKind {
        BackendKind::PaidApi
    }

    fn is_available(&self) -> bool {
        self.token.is_some()
    }

    async fn extract_text(&self, url: &str, options: &ExtractionOptions) -> ExtractionResult {
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(DEFAULT_APIFY_TIMEOUT);
        // The deadline covers submit, polling and the dataset fetch alike.
        let outcome = tokio::time::timeout(timeout, self.scrape(url))
            .await
            .unwrap_or_else(|_| {
                Err(ScrapeError::Timeout(format!(
                    "Apify run did not complete within {} ms",
                    timeout.as_millis()
                )))
            });
        finish(BackendId::Apify, url, started, outcome)
    }
}
