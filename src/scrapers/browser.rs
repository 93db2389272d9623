//! Headless-browser backend, generic over the automation driver.
//!
//! The backend owns the navigation/settle/evaluate sequence and the teardown
//! guarantee; drivers only know how to open a session and talk to a page.

use super::html::normalize_whitespace;
use super::{
    ensure_viable, finish, ExtractionOptions, ScrapeError, Scraped, ScraperBackend,
    DEFAULT_TIMEOUT,
};
use crate::schema::{BackendId, BackendKind, ExtractionResult};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// In-page script: drop noise elements, then prefer a main content container
/// over the full body text.
pub const EXTRACT_TEXT_SCRIPT: &str = r#"(() => {
  document
    .querySelectorAll('script, style, noscript, nav, header, footer')
    .forEach((el) => el.remove());
  const selectors = ['main', '[role="main"]', '.main', '#main', '.content', '#content'];
  for (const selector of selectors) {
    const el = document.querySelector(selector);
    if (el && el.innerText && el.innerText.trim().length > 0) {
      return el.innerText.trim();
    }
  }
  return document.body ? document.body.innerText.trim() : '';
})()"#;

/// How long to let client-side rendering settle after navigation.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Launches or attaches to a browser. Each call yields a fresh, isolated
/// session that the caller must close.
#[async_trait::async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Whether the runtime dependency is present. No network I/O.
    fn is_available(&self) -> bool;
    async fn open(&self) -> Result<Box<dyn BrowserSession>, ScrapeError>;
}

/// One isolated page. Implementations release every process/connection they
/// hold in `close`.
#[async_trait::async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), ScrapeError>;
    async fn evaluate_text(&mut self, script: &str) -> Result<String, ScrapeError>;
    async fn close(&mut self);
}

pub struct BrowserBackend<D> {
    id: BackendId,
    display_name: &'static str,
    description: &'static str,
    driver: D,
    settle: Duration,
}

impl<D: BrowserDriver> BrowserBackend<D> {
    pub fn new(
        id: BackendId,
        display_name: &'static str,
        description: &'static str,
        driver: D,
    ) -> Self {
        Self {
            id,
            display_name,
            description,
            driver,
            settle: SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    async fn scrape(&self, url: &str, timeout: Duration) -> Result<Scraped, ScrapeError> {
        // One deadline covers launch/attach as well as rendering.
        let deadline = tokio::time::Instant::now() + timeout;

        let mut session = match tokio::time::timeout_at(deadline, self.driver.open()).await {
            Ok(opened) => opened?,
            Err(_) => {
                return Err(ScrapeError::Timeout(format!(
                    "browser did not start within {} ms",
                    timeout.as_millis()
                )))
            }
        };
        debug!(backend = %self.id, url, ?timeout, "Browser session opened");

        let rendered = tokio::time::timeout_at(deadline, self.render(session.as_mut(), url)).await;

        // Every path past `open` goes through here exactly once.
        session.close().await;
        debug!(backend = %self.id, url, "Browser session closed");

        let text = match rendered {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScrapeError::Timeout(format!(
                    "page did not finish rendering within {} ms",
                    timeout.as_millis()
                )))
            }
        };

        ensure_viable(&normalize_whitespace(&text)).map(Scraped::from)
    }

    async fn render(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
    ) -> Result<String, ScrapeError> {
        session.navigate(url).await?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        session.evaluate_text(EXTRACT_TEXT_SCRIPT).await
    }
}

#[async_trait::async_trait]
impl<D: BrowserDriver> ScraperBackend for BrowserBackend<D> {
    fn id(&self) -> BackendId {
        self.id
    }

    fn display_name(&self) -> &str {
        self.display_name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn kind(&self) -> BackendKind {
        BackendKind::SelfHosted
    }

    fn is_available(&self) -> bool {
        self.driver.is_available()
    }

    async fn extract_text(&self, url: &str, options: &ExtractionOptions) -> ExtractionResult {
        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT);
        info!(backend = %self.id, url, "Scraping with headless browser");
        let outcome = self.scrape(url, timeout).await;
        finish(self.id, url, started, outcome)
    }
}
