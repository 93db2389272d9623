//! Plain HTTP backend: one GET, regex markup stripping, no JavaScript.

use super::html::{html_to_text, normalize_whitespace};
use super::{ensure_viable, finish, ExtractionOptions, ScrapeError, Scraped, ScraperBackend};
use super::{DEFAULT_TIMEOUT, USER_AGENT};
use crate::schema::{BackendId, BackendKind, ExtractionResult};
use std::time::{Duration, Instant};
use tracing::debug;

pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn scrape(&self, url: &str, timeout: Duration) -> Result<Scraped, ScrapeError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml,text/plain")
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ScrapeError::Upstream {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);

        let body = response.text().await?;
        debug!(url, bytes = body.len(), is_html, "HTTP body received");

        let text = if is_html {
            html_to_text(&body)
        } else {
            normalize_whitespace(&body)
        };
        ensure_viable(&text).map(Scraped::from)
    }
}

#[async_trait::async_trait]
impl ScraperBackend for HttpBackend {
    fn id(&self) -> BackendId {
        BackendId::Http
    }

    fn display_name(&self) -> &str {
        "Plain HTTP"
    }

    fn description(&self) -> &str {
        "Fetches raw HTML and strips markup. Fast and free, but cannot see content rendered by JavaScript."
    }

    fn kind(&self) -> BackendKind {
        BackendKind::SelfHosted
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn extract_text(&self, url: &str, options: &ExtractionOptions) -> ExtractionResult {
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let outcome = self.scrape(url, timeout).await;
        finish(BackendId::Http, url, started, outcome)
    }
}
