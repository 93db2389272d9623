//! Gemini `generateContent` client.

use crate::config::ModelConfig;
use crate::model_caller::{ModelError, ModelTransport};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Output cap requested for structured (JSON) generations.
pub const MAX_OUTPUT_TOKENS: u32 = 8192;

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiClient {
    pub fn new(client: Client, config: &ModelConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait::async_trait]
impl ModelTransport for GeminiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<String, ModelError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ModelError::Configuration("Gemini API key not found (GEMINI_API_KEY)".to_string())
        })?;

        debug!(
            model,
            structured = request.generation_config.is_some(),
            "Sending request to Gemini"
        );

        let response = self
            .client
            .post(self.endpoint(model))
            .query(&[("key", api_key)])
            .json(request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(500).collect();
            let status_code = status.as_u16();
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                ModelError::Server {
                    status: status_code,
                    message,
                }
            } else {
                ModelError::Client {
                    status: status_code,
                    message,
                }
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;
        let parsed: GenerateContentResponse = serde_json::from_str(&raw).map_err(|e| {
            ModelError::MalformedResponse(format!(
                "{}: {}",
                e,
                raw.chars().take(200).collect::<String>()
            ))
        })?;

        if let Some(usage) = &parsed.usage_metadata {
            info!(
                model,
                total_tokens = usage.total_token_count,
                prompt_tokens = usage.prompt_token_count,
                completion_tokens = usage.candidates_token_count,
                "Gemini response received"
            );
        }

        parsed.text().ok_or(ModelError::EmptyResponse)
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(InlineData),
}

/// File content inlined as base64.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

impl GenerationConfig {
    pub fn json() -> Self {
        Self {
            max_output_tokens: MAX_OUTPUT_TOKENS,
            response_mime_type: "application/json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UsageMetadata {
    prompt_token_count: u32,
    candidates_token_count: u32,
    total_token_count: u32,
}

impl GenerateContentResponse {
    /// Text of the first candidate, or `None` when it has no non-blank text.
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn client(server: &MockServer, api_key: Option<&str>) -> GeminiClient {
        GeminiClient::new(
            Client::new(),
            &ModelConfig {
                api_key: api_key.map(str::to_string),
                api_base: server.uri(),
                primary_model: "gemini-1.5-flash".to_string(),
                fallback_model: None,
                max_attempts: 2,
                backoff_base: Duration::from_millis(1),
            },
        )
    }

    fn text_request(prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part::Text(prompt.to_string())],
            }],
            generation_config: Some(GenerationConfig::json()),
        }
    }

    fn candidate(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 4, "totalTokenCount": 14}
        })
    }

    #[test]
    fn test_request_wire_shape() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text("Extract the text".to_string()),
                    Part::InlineData(InlineData {
                        mime_type: "application/pdf".to_string(),
                        data: "JVBERi0=".to_string(),
                    }),
                ],
            }],
            generation_config: Some(GenerationConfig::json()),
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "contents": [{"parts": [
                    {"text": "Extract the text"},
                    {"inlineData": {"mimeType": "application/pdf", "data": "JVBERi0="}}
                ]}],
                "generationConfig": {"maxOutputTokens": 8192, "responseMimeType": "application/json"}
            })
        );
    }

    #[tokio::test]
    async fn test_generate_returns_candidate_text() {
        let server = MockServer::start().await;
        let request = text_request("Classify this");
        Mock::given(method("POST"))
            .and(path(MODEL_PATH))
            .and(query_param("key", "secret"))
            .and(body_json(&request))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate("Science")))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server, Some("secret"))
            .generate("gemini-1.5-flash", &request)
            .await
            .unwrap();
        assert_eq!(text, "Science");
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        let cases = [("overloaded", 503), ("limited", 429), ("bad", 400), ("forbidden", 403)];
        for (model, status) in cases {
            Mock::given(method("POST"))
                .and(path(format!("/v1beta/models/{}:generateContent", model)))
                .respond_with(ResponseTemplate::new(status).set_body_string("upstream says no"))
                .mount(&server)
                .await;
        }

        let gemini = client(&server, Some("secret"));
        let request = text_request("hi");

        let err = gemini.generate("overloaded", &request).await.unwrap_err();
        assert!(matches!(err, ModelError::Server { status: 503, .. }));
        assert!(err.is_transient());

        let err = gemini.generate("limited", &request).await.unwrap_err();
        assert!(err.is_transient());

        let err = gemini.generate("bad", &request).await.unwrap_err();
        assert!(matches!(
            err,
            ModelError::Client { status: 400, ref message } if message == "upstream says no"
        ));
        assert!(!err.is_transient());

        let err = gemini.generate("forbidden", &request).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_and_empty_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/garbled:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/blocked:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"finishReason": "SAFETY"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/blank:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate("  \n")))
            .mount(&server)
            .await;

        let gemini = client(&server, Some("secret"));
        let request = text_request("hi");

        let err = gemini.generate("garbled", &request).await.unwrap_err();
        assert!(matches!(err, ModelError::MalformedResponse(_)));
        assert!(!err.is_transient());

        let err = gemini.generate("blocked", &request).await.unwrap_err();
        assert!(matches!(err, ModelError::EmptyResponse));

        let err = gemini.generate("blank", &request).await.unwrap_err();
        assert!(matches!(err, ModelError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_missing_key_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate("x")))
            .expect(0)
            .mount(&server)
            .await;

        let gemini = client(&server, None);
        assert!(!gemini.is_configured());
        let err = gemini
            .generate("gemini-1.5-flash", &text_request("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Configuration(_)));
    }
}
