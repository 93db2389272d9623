//! Pluggable URL text-extraction backends.
//!
//! Defines the [`ScraperBackend`] trait and the shared result plumbing so the
//! registry can swap headless browsers, the Apify cloud actor, and a plain
//! HTTP fetcher per request.

pub mod apify;
pub mod browser;
pub mod chromium;
pub mod html;
pub mod http;
pub mod registry;

use crate::schema::{
    BackendDescriptor, BackendId, BackendKind, ExtractionMetadata, ExtractionResult,
};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Anything shorter than this after trimming is treated as a failed scrape.
pub const MIN_TEXT_LENGTH: usize = 50;

/// Navigation budget for the browser and HTTP backends.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent presented by every self-hosted backend.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Per-call options. A `None` timeout means "use the backend default".
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionOptions {
    pub timeout: Option<Duration>,
}

impl ExtractionOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Missing credential or runtime dependency. Retrying will not help.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("timeout exceeded: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("remote job failed: {0}")]
    Job(String),
    #[error("browser error: {0}")]
    Browser(String),
    /// Page fetched but the text is missing or too short to be useful.
    #[error("{0}")]
    Content(String),
}

impl ScrapeError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, ScrapeError::Configuration(_))
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ScrapeError::Timeout(err.to_string())
        } else if err.is_decode() {
            ScrapeError::Content(format!("undecodable response body: {}", err))
        } else {
            ScrapeError::Network(err.to_string())
        }
    }
}

/// Text produced by a backend before it is wrapped into an [`ExtractionResult`].
#[derive(Debug, Clone, Default)]
pub struct Scraped {
    pub text: String,
    pub run_id: Option<String>,
}

impl From<String> for Scraped {
    fn from(text: String) -> Self {
        Self { text, run_id: None }
    }
}

/// Async trait implemented by each extraction backend.
///
/// `extract_text` never fails past its own boundary: every internal error is
/// folded into an unsuccessful [`ExtractionResult`].
#[async_trait::async_trait]
pub trait ScraperBackend: Send + Sync {
    fn id(&self) -> BackendId;
    fn display_name(&self) -> &str;
    fn description(&self) -> &str;
    fn kind(&self) -> BackendKind;
    /// Dependency/credential check. Must not perform network I/O.
    fn is_available(&self) -> bool;
    async fn extract_text(&self, url: &str, options: &ExtractionOptions) -> ExtractionResult;

    fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor {
            id: self.id(),
            display_name: self.display_name().to_string(),
            description: self.description().to_string(),
            kind: self.kind(),
            available: self.is_available(),
        }
    }
}

/// Reject near-empty shells. Returns the trimmed text on success.
pub fn ensure_viable(text: &str) -> Result<String, ScrapeError> {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_TEXT_LENGTH {
        return Err(ScrapeError::Content(
            "Could not extract sufficient text content from the URL".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Wrap a backend outcome into the uniform result shape.
pub fn finish(
    backend: BackendId,
    url: &str,
    started: Instant,
    outcome: Result<Scraped, ScrapeError>,
) -> ExtractionResult {
    let elapsed = started.elapsed().as_millis() as u64;
    let mut metadata = ExtractionMetadata::new(Some(backend), url, elapsed);

    match outcome {
        Ok(scraped) => {
            metadata.run_id = scraped.run_id;
            let result = ExtractionResult::success(scraped.text, metadata);
            info!(
                backend = %backend,
                url,
                chars = result.metadata.text_length,
                elapsed_ms = elapsed,
                "Scrape succeeded"
            );
            result
        }
        Err(err) => {
            warn!(
                backend = %backend,
                url,
                elapsed_ms = elapsed,
                configuration = err.is_configuration(),
                error = %err,
                "Scrape failed"
            );
            ExtractionResult::failure(err.to_string(), metadata)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process backend double used by registry and generator tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct StubBackend {
        pub id: BackendId,
        pub available: bool,
        outcome: Result<String, String>,
        calls: AtomicUsize,
        pub seen_timeouts: Mutex<Vec<Option<Duration>>>,
    }

    impl StubBackend {
        pub fn succeeding(id: BackendId, text: &str) -> Self {
            Self::new(id, Ok(text.to_string()))
        }

        pub fn failing(id: BackendId, error: &str) -> Self {
            Self::new(id, Err(error.to_string()))
        }

        fn new(id: BackendId, outcome: Result<String, String>) -> Self {
            Self {
                id,
                available: true,
                outcome,
                calls: AtomicUsize::new(0),
                seen_timeouts: Mutex::new(Vec::new()),
            }
        }

        pub fn unavailable(mut self) -> Self {
            self.available = false;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ScraperBackend for StubBackend {
        fn id(&self) -> BackendId {
            self.id
        }

        fn display_name(&self) -> &str {
            "Stub"
        }

        fn description(&self) -> &str {
            "Scripted backend for tests"
        }

        fn kind(&self) -> BackendKind {
            BackendKind::SelfHosted
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn extract_text(&self, url: &str, options: &ExtractionOptions) -> ExtractionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_timeouts.lock().unwrap().push(options.timeout);
            let outcome = self
                .outcome
                .clone()
                .map_err(ScrapeError::Network)
                .and_then(|text| ensure_viable(&text))
                .map(Scraped::from);
            finish(self.id, url, Instant::now(), outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_rejected() {
        let err = ensure_viable("   too short   ").unwrap_err();
        assert!(matches!(err, ScrapeError::Content(_)));

        let exactly = "x".repeat(MIN_TEXT_LENGTH);
        assert_eq!(ensure_viable(&format!("  {}  ", exactly)).unwrap(), exactly);
    }

    #[test]
    fn test_finish_reports_short_text_as_failure() {
        let outcome = ensure_viable("tiny").map(Scraped::from);
        let result = finish(BackendId::Http, "https://example.com", Instant::now(), outcome);
        assert!(!result.success);
        assert!(result.text.is_empty());
        assert_eq!(
            result.error.as_deref(),
            Some("Could not extract sufficient text content from the URL")
        );
        assert_eq!(result.metadata.backend_id, Some(BackendId::Http));
    }

    #[test]
    fn test_finish_carries_run_id() {
        let scraped = Scraped {
            text: "a".repeat(80),
            run_id: Some("run-42".to_string()),
        };
        let result = finish(BackendId::Apify, "https://example.com", Instant::now(), Ok(scraped));
        assert!(result.success);
        assert_eq!(result.metadata.run_id.as_deref(), Some("run-42"));
        assert_eq!(result.metadata.text_length, 80);
    }

    #[test]
    fn test_configuration_errors_are_distinguishable() {
        assert!(ScrapeError::Configuration("no token".into()).is_configuration());
        assert!(!ScrapeError::Timeout("navigation".into()).is_configuration());
        assert!(!ScrapeError::Content("empty".into()).is_configuration());
    }
}
