//! Service configuration.
//!
//! Everything is read once from the environment (after `.env` is loaded) at
//! startup. Missing credentials are not startup errors: the backend or model
//! client that needs them reports itself unavailable instead.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_PRIMARY_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-1.0-pro";
pub const DEFAULT_APIFY_API_BASE: &str = "https://api.apify.com/v2";
pub const DEFAULT_APIFY_ACTOR: &str = "apify/website-content-crawler";

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub primary_model: String,
    /// `None` disables model fallback.
    pub fallback_model: Option<String>,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub apify_token: Option<String>,
    pub apify_actor: String,
    pub apify_api_base: String,
    pub chrome_executable: Option<PathBuf>,
    pub browser_ws_url: Option<String>,
    pub primary: String,
    /// `None` disables backend fallback.
    pub fallback: Option<String>,
    /// Per-call override; when unset each backend uses its own default.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub model: ModelConfig,
    pub scrapers: ScraperConfig,
    pub generate_missing_explanations: bool,
}

impl ServiceConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let non_empty = |key: &str| get(key).filter(|v| !v.is_empty());

        let model = ModelConfig {
            api_key: non_empty("GEMINI_API_KEY"),
            api_base: non_empty("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            primary_model: non_empty("GEMINI_PRIMARY_MODEL")
                .unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string()),
            fallback_model: match get("GEMINI_FALLBACK_MODEL") {
                Some(v) if v.is_empty() => None,
                Some(v) => Some(v),
                None => Some(DEFAULT_FALLBACK_MODEL.to_string()),
            },
            max_attempts: parse_or(&non_empty, "MODEL_MAX_ATTEMPTS", 2u32)?.max(1),
            backoff_base: Duration::from_millis(parse_or(
                &non_empty,
                "MODEL_BACKOFF_BASE_MS",
                1000u64,
            )?),
        };

        let scrapers = ScraperConfig {
            apify_token: non_empty("APIFY_API_TOKEN"),
            apify_actor: non_empty("APIFY_ACTOR_ID")
                .unwrap_or_else(|| DEFAULT_APIFY_ACTOR.to_string()),
            apify_api_base: non_empty("APIFY_API_BASE")
                .unwrap_or_else(|| DEFAULT_APIFY_API_BASE.to_string()),
            chrome_executable: non_empty("CHROME_EXECUTABLE").map(PathBuf::from),
            browser_ws_url: non_empty("BROWSER_WS_URL"),
            primary: non_empty("SCRAPER_PRIMARY").unwrap_or_else(|| "chromium".to_string()),
            fallback: match get("SCRAPER_FALLBACK") {
                Some(v) if v.is_empty() => None,
                Some(v) => Some(v),
                None => Some("apify".to_string()),
            },
            timeout: non_empty("SCRAPER_TIMEOUT_MS")
                .map(|v| {
                    v.parse::<u64>()
                        .with_context(|| format!("SCRAPER_TIMEOUT_MS is not a number: {:?}", v))
                })
                .transpose()?
                .map(Duration::from_millis),
        };

        Ok(Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            model,
            scrapers,
            generate_missing_explanations: parse_or(
                &non_empty,
                "GENERATE_MISSING_EXPLANATIONS",
                true,
            )?,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ServiceConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert!(config.model.api_key.is_none());
        assert_eq!(config.model.primary_model, DEFAULT_PRIMARY_MODEL);
        assert_eq!(config.model.fallback_model.as_deref(), Some(DEFAULT_FALLBACK_MODEL));
        assert_eq!(config.model.max_attempts, 2);
        assert_eq!(config.model.backoff_base, Duration::from_secs(1));
        assert_eq!(config.scrapers.primary, "chromium");
        assert_eq!(config.scrapers.fallback.as_deref(), Some("apify"));
        assert!(config.scrapers.timeout.is_none());
        assert!(config.generate_missing_explanations);
    }

    #[test]
    fn test_empty_fallbacks_disable_fallback() {
        let config = config_from(&[("SCRAPER_FALLBACK", ""), ("GEMINI_FALLBACK_MODEL", "  ")])
            .unwrap();
        assert!(config.scrapers.fallback.is_none());
        assert!(config.model.fallback_model.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "key-123"),
            ("MODEL_MAX_ATTEMPTS", "0"),
            ("MODEL_BACKOFF_BASE_MS", "250"),
            ("SCRAPER_PRIMARY", "http"),
            ("SCRAPER_TIMEOUT_MS", "15000"),
            ("GENERATE_MISSING_EXPLANATIONS", "false"),
        ])
        .unwrap();
        assert_eq!(config.model.api_key.as_deref(), Some("key-123"));
        // At least one attempt is always made.
        assert_eq!(config.model.max_attempts, 1);
        assert_eq!(config.model.backoff_base, Duration::from_millis(250));
        assert_eq!(config.scrapers.primary, "http");
        assert_eq!(config.scrapers.timeout, Some(Duration::from_secs(15)));
        assert!(!config.generate_missing_explanations);
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let err = config_from(&[("MODEL_MAX_ATTEMPTS", "two")]).unwrap_err();
        assert!(err.to_string().contains("MODEL_MAX_ATTEMPTS"));
    }
}
