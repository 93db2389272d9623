//! Quiz payload produced by the generation step.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    MultipleChoice,
    CodeInput,
}

/// Option index for multiple-choice, expected code for code-input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrectAnswer {
    Index(usize),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub correct_answer: CorrectAnswer,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub learn_more_url: String,
}

impl Question {
    /// Human-readable form of the correct answer.
    pub fn answer_text(&self) -> String {
        match (&self.correct_answer, &self.options) {
            (CorrectAnswer::Index(i), Some(options)) => {
                options.get(*i).cloned().unwrap_or_else(|| i.to_string())
            }
            (CorrectAnswer::Index(i), None) => i.to_string(),
            (CorrectAnswer::Text(text), _) => text.clone(),
        }
    }

    fn validate(&self, position: usize) -> Result<(), QuizParseError> {
        let invalid = |reason: &str| {
            QuizParseError::Invalid(format!("question {}: {}", position + 1, reason))
        };

        if self.text.trim().is_empty() {
            return Err(invalid("empty text"));
        }
        match self.question_type {
            QuestionType::MultipleChoice => {
                let options = self
                    .options
                    .as_ref()
                    .filter(|o| o.len() >= 2)
                    .ok_or_else(|| invalid("multiple-choice needs at least two options"))?;
                match self.correct_answer {
                    CorrectAnswer::Index(i) if i < options.len() => Ok(()),
                    CorrectAnswer::Index(i) => Err(invalid(&format!(
                        "correctAnswer {} out of range for {} options",
                        i,
                        options.len()
                    ))),
                    CorrectAnswer::Text(_) => {
                        Err(invalid("multiple-choice correctAnswer must be an index"))
                    }
                }
            }
            QuestionType::CodeInput => match &self.correct_answer {
                CorrectAnswer::Text(code) if !code.trim().is_empty() => Ok(()),
                _ => Err(invalid("code-input correctAnswer must be a non-empty string")),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum QuizParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid quiz: {0}")]
    Invalid(String),
}

/// Parse raw model output into a validated quiz. Bare JSON is parsed as-is;
/// a markdown code fence around the JSON is only peeled off when that fails.
pub fn parse_quiz(raw: &str) -> Result<Quiz, QuizParseError> {
    let trimmed = raw.trim();
    let quiz: Quiz = match serde_json::from_str(trimmed) {
        Ok(quiz) => quiz,
        Err(e) => {
            let unfenced = strip_code_fence(trimmed);
            if unfenced == trimmed {
                return Err(e.into());
            }
            serde_json::from_str(unfenced)?
        }
    };

    if quiz.questions.is_empty() {
        return Err(QuizParseError::Invalid("no questions".to_string()));
    }
    for (position, question) in quiz.questions.iter().enumerate() {
        question.validate(position)?;
    }
    Ok(quiz)
}

/// Body between the first opening fence and the last closing fence, so fences
/// nested inside string values survive.
fn strip_code_fence(response: &str) -> &str {
    let Some(open) = response.find("```") else {
        return response;
    };
    let after_open = &response[open + 3..];
    // Skip the info string (`json`) on the opening fence line.
    let body = after_open
        .split_once('\n')
        .map_or(after_open, |(_, rest)| rest);
    body.rfind("```").map_or(body, |close| &body[..close]).trim()
}
