//! Quiz generation pipeline.
//!
//! Input resolution -> text extraction -> classification -> generation, with
//! an optional explanation backfill. All retry and fallback behaviour lives
//! in the scraper registry and the model caller; this layer only sequences
//! them and names the stage that failed.

use crate::model_caller::{AttachedFile, CallOptions, ModelCallError, ResilientModelCaller};
use crate::prompts::{
    classification_prompt, explanation_prompt, generation_prompt, Category,
    FILE_EXTRACTION_PROMPT,
};
use crate::quiz::{parse_quiz, Quiz, QuizParseError};
use crate::scrapers::registry::{ExtractionRequest, ScrapeStrategy, ScraperRegistry};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_NUM_QUESTIONS: u32 = 5;
pub const MAX_NUM_QUESTIONS: u32 = 50;
pub const EXPLANATION_PLACEHOLDER: &str = "Explanation unavailable.";

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// URL or plain text.
    pub topic: Option<String>,
    /// Takes precedence over `topic` when present.
    pub file: Option<UploadedFile>,
    pub num_questions: Option<u32>,
    pub primary_scraper: Option<String>,
    pub fallback_scraper: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    Start,
    InputResolved,
    TextExtracted,
    Classified,
    GeneratorSelected,
    ContentGenerated,
    ExplanationGenerated,
    Done,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GenerationStage::Start => "start",
            GenerationStage::InputResolved => "input resolution",
            GenerationStage::TextExtracted => "text extraction",
            GenerationStage::Classified => "classification",
            GenerationStage::GeneratorSelected => "generator selection",
            GenerationStage::ContentGenerated => "quiz generation",
            GenerationStage::ExplanationGenerated => "explanation generation",
            GenerationStage::Done => "done",
        })
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Input required. Please provide a file, URL, or text.")]
    MissingInput,
    #[error("Could not extract any text from {0}.")]
    NoContentExtracted(String),
    #[error("{0}")]
    Extraction(String),
    /// The model layer gave up while entering `stage`.
    #[error("{stage} failed: {source}")]
    Model {
        stage: GenerationStage,
        #[source]
        source: ModelCallError,
    },
    #[error("Could not determine a valid category for this content. The AI suggested \"{0}\".")]
    UnsupportedCategory(String),
    #[error("The AI returned a quiz that could not be parsed: {0}")]
    MalformedGenerationOutput(#[source] QuizParseError),
}

impl GenerationError {
    /// Failures caused by what the caller sent rather than by an upstream.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            GenerationError::MissingInput
                | GenerationError::NoContentExtracted(_)
                | GenerationError::UnsupportedCategory(_)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedQuiz {
    pub quiz: Quiz,
    pub category: Category,
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// Scraper strategy used when a request carries no overrides.
    pub default_strategy: ScrapeStrategy,
    pub generate_missing_explanations: bool,
}

enum ResolvedInput<'a> {
    File(&'a UploadedFile),
    Url(String),
    Text(&'a str),
}

impl ResolvedInput<'_> {
    fn describe(&self) -> String {
        match self {
            ResolvedInput::File(file) => format!("the file '{}'", file.file_name),
            ResolvedInput::Url(url) => format!("the URL '{}'", url),
            ResolvedInput::Text(_) => "the provided plain text".to_string(),
        }
    }
}

pub struct QuizGenerator {
    registry: Arc<ScraperRegistry>,
    model: Arc<ResilientModelCaller>,
    settings: GeneratorSettings,
}

impl QuizGenerator {
    pub fn new(
        registry: Arc<ScraperRegistry>,
        model: Arc<ResilientModelCaller>,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            registry,
            model,
            settings,
        }
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedQuiz, GenerationError> {
        let span = info_span!("generate_quiz", request_id = %Uuid::new_v4());
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: &GenerationRequest) -> Result<GeneratedQuiz, GenerationError> {
        debug!(
            stage = %GenerationStage::Start,
            has_file = request.file.is_some(),
            has_topic = request.topic.is_some()
        );
        let num_questions = request
            .num_questions
            .unwrap_or(DEFAULT_NUM_QUESTIONS)
            .clamp(1, MAX_NUM_QUESTIONS);

        let input = resolve_input(request)?;
        let source = input.describe();
        info!(stage = %GenerationStage::InputResolved, source = %source, num_questions);

        let text = self.extract_text(&input, request).await?;
        if text.trim().is_empty() {
            return Err(GenerationError::NoContentExtracted(source));
        }
        info!(stage = %GenerationStage::TextExtracted, chars = text.chars().count());

        let category = self.classify(&text).await?;
        info!(stage = %GenerationStage::GeneratorSelected, %category);

        let generated = self
            .model
            .call(
                &generation_prompt(category, &text, num_questions),
                &CallOptions::structured(),
            )
            .await
            .map_err(|source| GenerationError::Model {
                stage: GenerationStage::ContentGenerated,
                source,
            })?;
        let mut quiz =
            parse_quiz(&generated.raw_text).map_err(GenerationError::MalformedGenerationOutput)?;
        info!(
            stage = %GenerationStage::ContentGenerated,
            model = %generated.model_used,
            questions = quiz.questions.len()
        );

        if self.settings.generate_missing_explanations {
            self.fill_missing_explanations(&mut quiz).await;
            debug!(stage = %GenerationStage::ExplanationGenerated);
        }

        info!(stage = %GenerationStage::Done, title = %quiz.title);
        Ok(GeneratedQuiz { quiz, category })
    }

    async fn extract_text(
        &self,
        input: &ResolvedInput<'_>,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        match input {
            ResolvedInput::File(file) => {
                let options = CallOptions {
                    structured_output: false,
                    attached_file: Some(AttachedFile {
                        mime_type: file.mime_type.clone(),
                        bytes: file.bytes.clone(),
                    }),
                };
                let result = self
                    .model
                    .call(FILE_EXTRACTION_PROMPT, &options)
                    .await
                    .map_err(|source| GenerationError::Model {
                        stage: GenerationStage::TextExtracted,
                        source,
                    })?;
                Ok(result.raw_text)
            }
            ResolvedInput::Url(url) => {
                let mut strategy = self.settings.default_strategy.clone();
                if let Some(primary) = &request.primary_scraper {
                    strategy.primary = primary.clone();
                }
                if let Some(fallback) = &request.fallback_scraper {
                    strategy.fallback = Some(fallback.clone());
                }

                let result = self
                    .registry
                    .extract_text(&ExtractionRequest {
                        url: url.clone(),
                        options: strategy,
                    })
                    .await;
                if result.success {
                    Ok(result.text)
                } else {
                    Err(GenerationError::Extraction(
                        result
                            .error
                            .unwrap_or_else(|| "URL extraction failed".to_string()),
                    ))
                }
            }
            ResolvedInput::Text(text) => Ok(text.to_string()),
        }
    }

    async fn classify(&self, text: &str) -> Result<Category, GenerationError> {
        let result = self
            .model
            .call(&classification_prompt(text), &CallOptions::default())
            .await
            .map_err(|source| GenerationError::Model {
                stage: GenerationStage::Classified,
                source,
            })?;

        let label = result.raw_text.trim();
        info!(stage = %GenerationStage::Classified, label, "Content classified");
        label
            .parse::<Category>()
            .map_err(|_| GenerationError::UnsupportedCategory(label.to_string()))
    }

    /// Never fails: a question whose explanation cannot be generated gets the
    /// placeholder.
    async fn fill_missing_explanations(&self, quiz: &mut Quiz) {
        for question in quiz
            .questions
            .iter_mut()
            .filter(|q| q.explanation.trim().is_empty())
        {
            let prompt = explanation_prompt(&question.text, &question.answer_text());
            question.explanation = match self.model.call(&prompt, &CallOptions::default()).await {
                Ok(result) => result.raw_text.trim().to_string(),
                Err(err) => {
                    warn!(error = %err, question = %question.text, "Explanation generation failed");
                    EXPLANATION_PLACEHOLDER.to_string()
                }
            };
        }
    }
}

fn resolve_input(request: &GenerationRequest) -> Result<ResolvedInput<'_>, GenerationError> {
    if let Some(file) = &request.file {
        return Ok(ResolvedInput::File(file));
    }

    let topic = request
        .topic
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(GenerationError::MissingInput)?;

    match url::Url::parse(topic.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(ResolvedInput::Url(url.into())),
        _ => Ok(ResolvedInput::Text(topic)),
    }
}
