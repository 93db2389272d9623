//! Resilient generative-model calls.
//!
//! Each call runs a bounded retry loop with exponential backoff against the
//! primary model. When that loop gives up the same loop runs once against the
//! fallback model. Transient failures (5xx, 429, network) are retried;
//! permanent ones (other 4xx, malformed or empty bodies) skip straight to the
//! fallback.

use crate::config::ModelConfig;
use crate::gemini::{Content, GenerateContentRequest, GenerationConfig, InlineData, Part};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure of a single request against a single model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("model server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("model rejected the request ({status}): {message}")]
    Client { status: u16, message: String },
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("model returned an empty response")]
    EmptyResponse,
}

impl ModelError {
    /// Whether repeating the identical request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Network(_) | ModelError::Server { .. })
    }
}

/// Terminal failure of [`ResilientModelCaller::call`].
#[derive(Debug, Error)]
pub enum ModelCallError {
    #[error("model not configured: {0}")]
    Configuration(String),
    #[error("all models failed ({}); last error: {source}", .models.join(", "))]
    Exhausted {
        models: Vec<String>,
        #[source]
        source: ModelError,
    },
}

/// Sends one request to one model. Implementations must never return
/// `Ok` with blank text.
#[async_trait::async_trait]
pub trait ModelTransport: Send + Sync {
    /// Credential check, no network I/O.
    fn is_configured(&self) -> bool;
    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<String, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry `k` (1-based): `base * 2^(k-1)`.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// Bookkeeping for one scheduled retry.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub attempt_index: u32,
    pub delay: Duration,
    pub model_id: String,
}

#[derive(Debug, Clone)]
pub struct AttachedFile {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Request JSON output with a bounded token budget.
    pub structured_output: bool,
    pub attached_file: Option<AttachedFile>,
}

impl CallOptions {
    pub fn structured() -> Self {
        Self {
            structured_output: true,
            attached_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCallResult {
    pub raw_text: String,
    pub model_used: String,
}

pub struct ResilientModelCaller {
    transport: Arc<dyn ModelTransport>,
    primary_model: String,
    fallback_model: Option<String>,
    policy: RetryPolicy,
}

impl ResilientModelCaller {
    pub fn new(
        transport: Arc<dyn ModelTransport>,
        primary_model: impl Into<String>,
        fallback_model: Option<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            primary_model: primary_model.into(),
            fallback_model,
            policy,
        }
    }

    pub fn from_config(transport: Arc<dyn ModelTransport>, config: &ModelConfig) -> Self {
        Self::new(
            transport,
            config.primary_model.clone(),
            config.fallback_model.clone(),
            RetryPolicy::new(config.max_attempts, config.backoff_base),
        )
    }

    fn models(&self) -> Vec<&str> {
        let mut models = vec![self.primary_model.as_str()];
        if let Some(fallback) = self.fallback_model.as_deref() {
            if fallback != self.primary_model {
                models.push(fallback);
            }
        }
        models
    }

    pub async fn call(
        &self,
        prompt: &str,
        options: &CallOptions,
    ) -> Result<ModelCallResult, ModelCallError> {
        if !self.transport.is_configured() {
            return Err(ModelCallError::Configuration(
                "Gemini API key not found (GEMINI_API_KEY)".to_string(),
            ));
        }

        let request = build_request(prompt, options);
        let models = self.models();
        let mut last_error = ModelError::EmptyResponse;

        for (position, model) in models.iter().copied().enumerate() {
            if position > 0 {
                warn!(model, "Falling back to secondary model");
            }
            match self.call_with_retry(model, &request).await {
                Ok(raw_text) => {
                    info!(model, chars = raw_text.len(), "Model call succeeded");
                    return Ok(ModelCallResult {
                        raw_text,
                        model_used: model.to_string(),
                    });
                }
                Err(ModelError::Configuration(message)) => {
                    return Err(ModelCallError::Configuration(message));
                }
                Err(err) => {
                    warn!(model, error = %err, "Model gave up");
                    last_error = err;
                }
            }
        }

        Err(ModelCallError::Exhausted {
            models: models.into_iter().map(str::to_string).collect(),
            source: last_error,
        })
    }

    async fn call_with_retry(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<String, ModelError> {
        let mut attempt = 1;
        loop {
            let outcome = match self.transport.generate(model, request).await {
                Ok(text) if text.trim().is_empty() => Err(ModelError::EmptyResponse),
                other => other,
            };

            match outcome {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let context = AttemptContext {
                        attempt_index: attempt,
                        delay: self.policy.delay_before_retry(attempt),
                        model_id: model.to_string(),
                    };
                    warn!(
                        model = %context.model_id,
                        attempt = context.attempt_index,
                        delay_ms = context.delay.as_millis() as u64,
                        error = %err,
                        "Transient model error, retrying"
                    );
                    tokio::time::sleep(context.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(model, attempt, transient = err.is_transient(), "Not retrying");
                    return Err(err);
                }
            }
        }
    }
}

/// Prompt text first, then the inlined file, as one user turn.
pub fn build_request(prompt: &str, options: &CallOptions) -> GenerateContentRequest {
    let mut parts = vec![Part::Text(prompt.to_string())];
    if let Some(file) = &options.attached_file {
        parts.push(Part::InlineData(InlineData {
            mime_type: file.mime_type.clone(),
            data: BASE64.encode(&file.bytes),
        }));
    }

    GenerateContentRequest {
        contents: vec![Content { parts }],
        generation_config: options.structured_output.then(GenerationConfig::json),
    }
}
