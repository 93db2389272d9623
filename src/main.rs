//! Quiz Generator - turns a URL, an uploaded file, or plain text into a quiz.

mod config;
mod gemini;
mod generator;
mod model_caller;
mod prompts;
mod quiz;
mod schema;
mod scrapers;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::ServiceConfig;
use gemini::GeminiClient;
use generator::{GeneratedQuiz, GenerationRequest, GeneratorSettings, QuizGenerator, UploadedFile};
use model_caller::ResilientModelCaller;
use schema::{BackendDescriptor, ExtractionResult};
use scrapers::ScraperBackend;
use scrapers::registry::{
    BackendProbe, ExtractionRequest, RegistryError, ScrapeStrategy, ScraperRegistry,
    DEFAULT_PREFERENCES,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<ScraperRegistry>,
    generator: Arc<QuizGenerator>,
    default_strategy: ScrapeStrategy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "quiz_generator=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::from_env()?;
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let gemini = GeminiClient::new(http.clone(), &config.model);
    if config.model.api_key.is_none() {
        warn!("GEMINI_API_KEY not set; quiz generation will fail until it is configured");
    }
    let model = ResilientModelCaller::from_config(Arc::new(gemini), &config.model);
    info!(
        primary = %config.model.primary_model,
        fallback = ?config.model.fallback_model,
        attempts = config.model.max_attempts,
        "Model caller initialized"
    );

    let registry = Arc::new(ScraperRegistry::from_config(&config.scrapers, http));
    let default_strategy = ScrapeStrategy::from_config(&config.scrapers);
    match registry.preferred_backend(&DEFAULT_PREFERENCES) {
        Ok(backend) => info!(backend = %backend.id(), "Preferred scraper backend"),
        Err(e) => warn!("{}; URL input will fail", e),
    }
    info!(
        primary = %default_strategy.primary,
        fallback = ?default_strategy.fallback,
        "Default scraper strategy"
    );

    let generator = QuizGenerator::new(
        Arc::clone(&registry),
        Arc::new(model),
        GeneratorSettings {
            default_strategy: default_strategy.clone(),
            generate_missing_explanations: config.generate_missing_explanations,
        },
    );

    let state = AppState {
        registry,
        generator: Arc::new(generator),
        default_strategy,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/scrapers/status", get(scrapers_status))
        .route("/api/scrapers/test", post(test_scraper))
        .route("/api/scrapers/test-all", post(test_all_scrapers))
        .route("/api/extract", post(extract_url))
        .route("/api/generateQuiz", post(generate_quiz))
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024)) // 25MB uploads
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct ScrapersStatus {
    scrapers: Vec<BackendDescriptor>,
}

/// List registered scraper backends with live availability.
async fn scrapers_status(State(state): State<AppState>) -> Json<ScrapersStatus> {
    Json(ScrapersStatus {
        scrapers: state.registry.list_backends(),
    })
}

#[derive(Debug, Deserialize)]
struct TestScraperBody {
    scraper: Option<String>,
    url: Option<String>,
}

/// Run one backend directly against a URL.
async fn test_scraper(
    State(state): State<AppState>,
    Json(body): Json<TestScraperBody>,
) -> Result<Json<BackendProbe>, ApiError> {
    let (Some(scraper), Some(url)) = (body.scraper, body.url) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Both 'scraper' and 'url' are required",
        ));
    };

    state
        .registry
        .test_backend(&scraper, &url)
        .await
        .map(Json)
        .map_err(|e| {
            let status = match e {
                RegistryError::UnknownBackend(_) => StatusCode::NOT_FOUND,
                RegistryError::BackendUnavailable(_) | RegistryError::NoBackendAvailable => {
                    StatusCode::CONFLICT
                }
            };
            api_error(status, e.to_string())
        })
}

#[derive(Debug, Deserialize)]
struct TestAllBody {
    url: Option<String>,
}

/// Probe every registered backend against a URL.
async fn test_all_scrapers(
    State(state): State<AppState>,
    Json(body): Json<TestAllBody>,
) -> Result<Json<Vec<BackendProbe>>, ApiError> {
    let url = body
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "'url' is required"))?;
    Ok(Json(state.registry.test_all(&url).await))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractBody {
    url: Option<String>,
    primary_backend_id: Option<String>,
    fallback_backend_id: Option<String>,
    timeout_ms: Option<u64>,
}

/// Extract text from a URL with primary -> fallback selection.
async fn extract_url(
    State(state): State<AppState>,
    Json(body): Json<ExtractBody>,
) -> Result<(StatusCode, Json<ExtractionResult>), ApiError> {
    let url = body
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "'url' is required"))?;

    let mut options = state.default_strategy.clone();
    if let Some(primary) = body.primary_backend_id {
        options.primary = primary;
    }
    if let Some(fallback) = body.fallback_backend_id {
        options.fallback = Some(fallback).filter(|f| !f.is_empty());
    }
    if let Some(ms) = body.timeout_ms {
        options.timeout = Some(Duration::from_millis(ms));
    }

    let result = state
        .registry
        .extract_text(&ExtractionRequest { url, options })
        .await;
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(result)))
}

/// Generate a quiz from a topic, URL, or uploaded file.
async fn generate_quiz(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<GeneratedQuiz>, ApiError> {
    let request = read_generation_form(multipart).await?;

    state.generator.generate(&request).await.map(Json).map_err(|e| {
        if e.is_client_fault() {
            warn!("Quiz request rejected: {}", e);
            api_error(StatusCode::BAD_REQUEST, e.to_string())
        } else {
            error!("Quiz generation failed: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("An error occurred: {}", e),
            )
        }
    })
}

async fn read_generation_form(mut multipart: Multipart) -> Result<GenerationRequest, ApiError> {
    let mut request = GenerationRequest::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(StatusCode::BAD_REQUEST, format!("Multipart error: {}", e))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" if request.file.is_none() => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e))
                })?;
                if !bytes.is_empty() {
                    info!("Received file: {} ({} bytes, {})", file_name, bytes.len(), mime_type);
                    request.file = Some(UploadedFile {
                        file_name,
                        mime_type,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            "topic" | "numQuestions" | "primaryScraper" | "fallbackScraper" => {
                let value = field.text().await.map_err(|e| {
                    api_error(StatusCode::BAD_REQUEST, format!("Failed to read '{}': {}", name, e))
                })?;
                let trimmed = value.trim();
                match name.as_str() {
                    "topic" => request.topic = Some(value),
                    "numQuestions" if !trimmed.is_empty() => {
                        let n = trimmed.parse::<u32>().map_err(|_| {
                            api_error(
                                StatusCode::BAD_REQUEST,
                                format!(
                                    "numQuestions must be a positive integer, got {:?}",
                                    trimmed
                                ),
                            )
                        })?;
                        request.num_questions = Some(n);
                    }
                    "primaryScraper" if !trimmed.is_empty() => {
                        request.primary_scraper = Some(trimmed.to_string())
                    }
                    "fallbackScraper" if !trimmed.is_empty() => {
                        request.fallback_scraper = Some(trimmed.to_string())
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    Ok(request)
}
