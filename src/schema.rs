//! Shared data model for URL extraction results and backend introspection.
//!
//! These types are serialized as-is by the HTTP layer, so field names follow
//! the camelCase JSON the web client expects.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current UTC time as RFC 3339 with millisecond precision, e.g.
/// `2025-02-05T12:00:00.000Z`.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Closed set of scraper backend identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendId {
    /// Locally launched headless Chromium.
    Chromium,
    /// Already running browser reached through its DevTools websocket.
    RemoteBrowser,
    /// Apify website-content-crawler actor.
    Apify,
    /// Plain HTTP GET with regex stripping.
    Http,
}

impl BackendId {
    pub const ALL: [BackendId; 4] = [
        BackendId::Chromium,
        BackendId::RemoteBrowser,
        BackendId::Apify,
        BackendId::Http,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendId::Chromium => "chromium",
            BackendId::RemoteBrowser => "remote-browser",
            BackendId::Apify => "apify",
            BackendId::Http => "http",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Whether a backend runs on our own infrastructure or bills per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    SelfHosted,
    PaidApi,
}

/// Introspection entry for one registered backend. `available` is computed at
/// listing time, never cached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub display_name: String,
    pub description: String,
    pub kind: BackendKind,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<BackendId>,
    pub url: String,
    pub timestamp: String,
    pub processing_time_ms: u64,
    pub text_length: usize,
    /// Apify run id, when the cloud actor produced this result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attempted_backends: Vec<BackendId>,
}

impl ExtractionMetadata {
    pub fn new(backend_id: Option<BackendId>, url: &str, processing_time_ms: u64) -> Self {
        Self {
            backend_id,
            url: url.to_string(),
            timestamp: now_iso8601(),
            processing_time_ms,
            text_length: 0,
            run_id: None,
            fallback_used: false,
            attempted_backends: Vec::new(),
        }
    }
}

/// Outcome of one extraction. Either `success` with non-empty `text`, or a
/// failure with `error` set. Construct through [`ExtractionResult::success`]
/// and [`ExtractionResult::failure`] to keep that invariant.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub success: bool,
    pub text: String,
    pub metadata: ExtractionMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResult {
    /// Successful extraction. Empty text is downgraded to a failure.
    pub fn success(text: String, mut metadata: ExtractionMetadata) -> Self {
        if text.trim().is_empty() {
            return Self::failure("Extraction produced no text", metadata);
        }
        metadata.text_length = text.chars().count();
        Self {
            success: true,
            text,
            metadata,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, mut metadata: ExtractionMetadata) -> Self {
        metadata.text_length = 0;
        Self {
            success: false,
            text: String::new(),
            metadata,
            error: Some(error.into()),
        }
    }
}
