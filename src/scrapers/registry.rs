//! Backend registry with primary -> fallback selection.
//!
//! Constructed once at startup and shared by reference. Strategy (which
//! backend first, which second, what timeout) is per call, never global.

use super::apify::ApifyBackend;
use super::chromium::{chromium_backend, remote_browser_backend};
use super::http::HttpBackend;
use super::{ExtractionOptions, ScraperBackend};
use crate::config::ScraperConfig;
use crate::schema::{BackendDescriptor, BackendId, ExtractionMetadata, ExtractionResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Order used when a caller asks for "whatever works best".
pub const DEFAULT_PREFERENCES: [BackendId; 4] = [
    BackendId::Chromium,
    BackendId::RemoteBrowser,
    BackendId::Apify,
    BackendId::Http,
];

/// Timeout applied by the diagnostic probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Unknown scraper backend: {0}")]
    UnknownBackend(String),
    #[error("Scraper backend {0} is not available (missing dependency or credential)")]
    BackendUnavailable(BackendId),
    #[error("No scraper backend is available")]
    NoBackendAvailable,
}

/// Which backends to try for one call. Ids are kept as strings because they
/// usually arrive straight from a request body.
#[derive(Debug, Clone)]
pub struct ScrapeStrategy {
    pub primary: String,
    pub fallback: Option<String>,
    /// `None` lets each backend apply its own default.
    pub timeout: Option<Duration>,
}

impl ScrapeStrategy {
    pub fn from_config(config: &ScraperConfig) -> Self {
        Self {
            primary: config.primary.clone(),
            fallback: config.fallback.clone(),
            timeout: config.timeout,
        }
    }

    /// Primary first, then the fallback when it names a different backend.
    fn candidates(&self) -> Vec<&str> {
        let mut ids = vec![self.primary.as_str()];
        if let Some(fallback) = self.fallback.as_deref() {
            if fallback != self.primary {
                ids.push(fallback);
            }
        }
        ids
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub url: String,
    pub options: ScrapeStrategy,
}

/// Result of a diagnostic run against a single backend.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendProbe {
    pub backend_id: BackendId,
    pub available: bool,
    pub success: bool,
    pub text_length: usize,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Default)]
pub struct ScraperRegistry {
    backends: HashMap<BackendId, Arc<dyn ScraperBackend>>,
    order: Vec<BackendId>,
}

impl ScraperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every built-in backend. Availability is checked lazily, so
    /// backends whose dependency is missing are still listed.
    pub fn from_config(config: &ScraperConfig, client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(chromium_backend(config)));
        registry.register(Arc::new(remote_browser_backend(config)));
        registry.register(Arc::new(ApifyBackend::from_config(client.clone(), config)));
        registry.register(Arc::new(HttpBackend::new(client)));

        for descriptor in registry.list_backends() {
            info!(
                backend = %descriptor.id,
                available = descriptor.available,
                "Registered scraper backend"
            );
        }
        registry
    }

    /// Add a backend. Re-registering an id replaces the previous instance but
    /// keeps its listing position.
    pub fn register(&mut self, backend: Arc<dyn ScraperBackend>) {
        let id = backend.id();
        if self.backends.insert(id, backend).is_none() {
            self.order.push(id);
        }
    }

    /// All registered backends in registration order, with live availability.
    pub fn list_backends(&self) -> Vec<BackendDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.backends.get(id))
            .map(|backend| backend.descriptor())
            .collect()
    }

    pub fn get_backend(&self, id: &str) -> Result<Arc<dyn ScraperBackend>, RegistryError> {
        let backend = id
            .parse::<BackendId>()
            .ok()
            .and_then(|parsed| self.backends.get(&parsed))
            .ok_or_else(|| RegistryError::UnknownBackend(id.to_string()))?;

        if !backend.is_available() {
            return Err(RegistryError::BackendUnavailable(backend.id()));
        }
        Ok(Arc::clone(backend))
    }

    /// First registered, available backend from `preferences`.
    pub fn preferred_backend(
        &self,
        preferences: &[BackendId],
    ) -> Result<Arc<dyn ScraperBackend>, RegistryError> {
        preferences
            .iter()
            .filter_map(|id| self.backends.get(id))
            .find(|backend| backend.is_available())
            .map(Arc::clone)
            .ok_or(RegistryError::NoBackendAvailable)
    }

    /// Try the primary, then the fallback. Never fails past this boundary:
    /// total failure is an unsuccessful result naming every backend tried.
    pub async fn extract_text(&self, request: &ExtractionRequest) -> ExtractionResult {
        let started = Instant::now();
        let url = request.url.as_str();
        let options = ExtractionOptions {
            timeout: request.options.timeout,
        };

        let mut attempted = Vec::new();
        let mut failures = Vec::new();

        for (position, id) in request.options.candidates().into_iter().enumerate() {
            let backend = match self.get_backend(id) {
                Ok(backend) => backend,
                Err(err) => {
                    warn!(backend = id, url, error = %err, "Skipping scraper backend");
                    failures.push(format!("{}: {}", id, err));
                    continue;
                }
            };

            if position > 0 {
                info!(backend = id, url, "Falling back to secondary scraper");
            }
            attempted.push(backend.id());

            let mut result = backend.extract_text(url, &options).await;
            if result.success {
                result.metadata.fallback_used = position > 0;
                result.metadata.attempted_backends = attempted;
                return result;
            }
            failures.push(format!(
                "{}: {}",
                id,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }

        let mut metadata =
            ExtractionMetadata::new(None, url, started.elapsed().as_millis() as u64);
        metadata.fallback_used = attempted.len() > 1;
        metadata.attempted_backends = attempted;

        let error = format!(
            "All scraper backends failed to extract content from the URL ({})",
            failures.join("; ")
        );
        warn!(url, %error, "Extraction failed");
        ExtractionResult::failure(error, metadata)
    }

    /// Run a single backend directly, bypassing fallback.
    pub async fn test_backend(&self, id: &str, url: &str) -> Result<BackendProbe, RegistryError> {
        let backend = self.get_backend(id)?;
        Ok(probe(backend.as_ref(), url).await)
    }

    /// Probe every registered backend in turn. Unavailable ones are reported
    /// without being called.
    pub async fn test_all(&self, url: &str) -> Vec<BackendProbe> {
        let mut probes = Vec::with_capacity(self.order.len());
        for id in &self.order {
            let Some(backend) = self.backends.get(id) else {
                continue;
            };
            if backend.is_available() {
                probes.push(probe(backend.as_ref(), url).await);
            } else {
                probes.push(BackendProbe {
                    backend_id: *id,
                    available: false,
                    success: false,
                    text_length: 0,
                    processing_time_ms: 0,
                    error: Some(RegistryError::BackendUnavailable(*id).to_string()),
                });
            }
        }
        probes
    }
}

async fn probe(backend: &dyn ScraperBackend, url: &str) -> BackendProbe {
    let result = backend
        .extract_text(url, &ExtractionOptions::with_timeout(PROBE_TIMEOUT))
        .await;
    BackendProbe {
        backend_id: backend.id(),
        available: true,
        success: result.success,
        text_length: result.metadata.text_length,
        processing_time_ms: result.metadata.processing_time_ms,
        error: result.error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::testing::StubBackend;

    const LOREM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor \
        incididunt ut labore et dolore magna aliqua. Ut enim ad minim veniam, quis nostrud \
        exercitation ullamco laboris nisi ut aliquip ex ea commodo.";

    fn registry(stubs: &[&Arc<StubBackend>]) -> ScraperRegistry {
        let mut registry = ScraperRegistry::new();
        for stub in stubs {
            let backend: Arc<StubBackend> = Arc::clone(stub);
            registry.register(backend);
        }
        registry
    }

    fn request(primary: &str, fallback: Option<&str>) -> ExtractionRequest {
        ExtractionRequest {
            url: "https://example.com/article".to_string(),
            options: ScrapeStrategy {
                primary: primary.to_string(),
                fallback: fallback.map(str::to_string),
                timeout: None,
            },
        }
    }

    #[tokio::test]
    async fn test_fallback_used_after_primary_timeout() {
        let primary = Arc::new(StubBackend::failing(BackendId::Chromium, "timeout"));
        let fallback = Arc::new(StubBackend::succeeding(BackendId::Apify, LOREM));
        let registry = registry(&[&primary, &fallback]);

        let result = registry.extract_text(&request("chromium", Some("apify"))).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.text, LOREM);
        assert!(result.metadata.fallback_used);
        assert_eq!(result.metadata.backend_id, Some(BackendId::Apify));
        assert_eq!(
            result.metadata.attempted_backends,
            vec![BackendId::Chromium, BackendId::Apify]
        );
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_all_backends_failing_names_each() {
        let primary = Arc::new(StubBackend::failing(BackendId::Chromium, "navigation timeout"));
        let fallback = Arc::new(StubBackend::failing(BackendId::Apify, "actor run FAILED"));
        let registry = registry(&[&primary, &fallback]);

        let result = registry.extract_text(&request("chromium", Some("apify"))).await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("chromium: network error: navigation timeout"), "{}", error);
        assert!(error.contains("apify: network error: actor run FAILED"), "{}", error);
        assert!(result.metadata.backend_id.is_none());
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn test_primary_success_never_calls_fallback() {
        let primary = Arc::new(StubBackend::succeeding(BackendId::Http, LOREM));
        let fallback = Arc::new(StubBackend::succeeding(BackendId::Apify, LOREM));
        let registry = registry(&[&primary, &fallback]);

        let result = registry.extract_text(&request("http", Some("apify"))).await;

        assert!(result.success);
        assert!(!result.metadata.fallback_used);
        assert_eq!(result.metadata.attempted_backends, vec![BackendId::Http]);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_short_primary_text_triggers_fallback() {
        let primary = Arc::new(StubBackend::succeeding(
            BackendId::Http,
            "Please enable JavaScript.",
        ));
        let fallback = Arc::new(StubBackend::succeeding(BackendId::Chromium, LOREM));
        let registry = registry(&[&primary, &fallback]);

        let result = registry.extract_text(&request("http", Some("chromium"))).await;

        assert!(result.success);
        assert_eq!(result.metadata.backend_id, Some(BackendId::Chromium));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_primary_skips_to_fallback() {
        let unavailable =
            Arc::new(StubBackend::succeeding(BackendId::Chromium, LOREM).unavailable());
        let fallback = Arc::new(StubBackend::succeeding(BackendId::Http, LOREM));
        let registry = registry(&[&unavailable, &fallback]);

        let result = registry.extract_text(&request("chromium", Some("http"))).await;
        assert!(result.success);
        assert!(result.metadata.fallback_used);
        assert_eq!(result.metadata.attempted_backends, vec![BackendId::Http]);
        assert_eq!(unavailable.calls(), 0);

        let result = registry.extract_text(&request("puppeteer", Some("http"))).await;
        assert!(result.success);
        assert_eq!(fallback.calls(), 2);
    }

    #[tokio::test]
    async fn test_nothing_resolvable_still_returns_result() {
        let registry = ScraperRegistry::new();
        let result = registry.extract_text(&request("puppeteer", Some("apify"))).await;

        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("puppeteer: Unknown scraper backend: puppeteer"));
        assert!(error.contains("apify: Unknown scraper backend: apify"));
        assert!(result.metadata.attempted_backends.is_empty());
    }

    #[tokio::test]
    async fn test_same_fallback_as_primary_is_not_retried() {
        let primary = Arc::new(StubBackend::failing(BackendId::Http, "connection reset"));
        let registry = registry(&[&primary]);

        let result = registry.extract_text(&request("http", Some("http"))).await;

        assert!(!result.success);
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_passed_through() {
        let primary = Arc::new(StubBackend::succeeding(BackendId::Http, LOREM));
        let registry = registry(&[&primary]);

        let mut req = request("http", None);
        registry.extract_text(&req).await;
        req.options.timeout = Some(Duration::from_millis(1500));
        registry.extract_text(&req).await;

        assert_eq!(
            *primary.seen_timeouts.lock().unwrap(),
            vec![None, Some(Duration::from_millis(1500))]
        );
    }

    #[test]
    fn test_get_backend_errors() {
        let unavailable = Arc::new(StubBackend::succeeding(BackendId::Apify, LOREM).unavailable());
        let registry = registry(&[&unavailable]);

        assert_eq!(
            registry.get_backend("selenium").err(),
            Some(RegistryError::UnknownBackend("selenium".to_string()))
        );
        assert_eq!(
            registry.get_backend("http").err(),
            Some(RegistryError::UnknownBackend("http".to_string()))
        );
        assert_eq!(
            registry.get_backend("apify").err(),
            Some(RegistryError::BackendUnavailable(BackendId::Apify))
        );
    }

    #[test]
    fn test_list_and_preferred_backend() {
        let chromium = Arc::new(StubBackend::succeeding(BackendId::Chromium, LOREM).unavailable());
        let apify = Arc::new(StubBackend::succeeding(BackendId::Apify, LOREM));
        let http = Arc::new(StubBackend::succeeding(BackendId::Http, LOREM));
        let registry = registry(&[&chromium, &apify, &http]);

        let listed: Vec<(BackendId, bool)> = registry
            .list_backends()
            .into_iter()
            .map(|d| (d.id, d.available))
            .collect();
        assert_eq!(
            listed,
            vec![
                (BackendId::Chromium, false),
                (BackendId::Apify, true),
                (BackendId::Http, true)
            ]
        );

        let preferred = registry.preferred_backend(&DEFAULT_PREFERENCES).unwrap();
        assert_eq!(preferred.id(), BackendId::Apify);

        let err = registry.preferred_backend(&[BackendId::Chromium]).err();
        assert_eq!(err, Some(RegistryError::NoBackendAvailable));
    }

    #[tokio::test]
    async fn test_probes() {
        let chromium = Arc::new(StubBackend::succeeding(BackendId::Chromium, LOREM).unavailable());
        let http = Arc::new(StubBackend::failing(BackendId::Http, "dns failure"));
        let apify = Arc::new(StubBackend::succeeding(BackendId::Apify, LOREM));
        let registry = registry(&[&chromium, &http, &apify]);

        let probe = registry.test_backend("apify", "https://example.com").await.unwrap();
        assert!(probe.success);
        assert_eq!(probe.text_length, LOREM.chars().count());
        assert_eq!(*apify.seen_timeouts.lock().unwrap(), vec![Some(PROBE_TIMEOUT)]);

        assert_eq!(
            registry.test_backend("chromium", "https://example.com").await.err(),
            Some(RegistryError::BackendUnavailable(BackendId::Chromium))
        );

        let probes = registry.test_all("https://example.com").await;
        assert_eq!(probes.len(), 3);
        assert!(!probes[0].available);
        assert_eq!(chromium.calls(), 0);
        assert!(!probes[1].success);
        assert_eq!(probes[1].error.as_deref(), Some("network error: dns failure"));
        assert!(probes[2].success);
    }
}
