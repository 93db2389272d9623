//! Prompt templates for file extraction, classification, quiz generation,
//! and explanation backfill.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Characters of source text shown to the classifier.
pub const CLASSIFIER_EXCERPT_CHARS: usize = 1000;

pub const FILE_EXTRACTION_PROMPT: &str =
    "Extract all text from the attached document. Focus on the main content.";

pub const CLASSIFIER_PROMPT: &str = r#"You are a highly accurate content classifier. Decide which single category the user's topic belongs to.

Choose exactly one category from this list:
["Programming", "Science", "History", "Literature", "Mathematics", "Geography", "Arts", "Sports", "Technology", "Health", "Business", "Other"]

- Respond with a single word from the list and nothing else.
- No explanation, no punctuation.
- If the topic is ambiguous, nonsensical, or fits no category, answer "Other".

Example 1:
User Topic: "The American Civil War"
Category: History

Example 2:
User Topic: "The C# programming language"
Category: Programming

Example 3:
User Topic: "The best summer blockbuster movies"
Category: Other"#;

/// Categories that have a generation template. The classifier may also
/// answer "Other", which deliberately has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Programming,
    Science,
    History,
    Literature,
    Mathematics,
    Geography,
    Arts,
    Sports,
    Technology,
    Health,
    Business,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Programming,
        Category::Science,
        Category::History,
        Category::Literature,
        Category::Mathematics,
        Category::Geography,
        Category::Arts,
        Category::Sports,
        Category::Technology,
        Category::Health,
        Category::Business,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Programming => "Programming",
            Category::Science => "Science",
            Category::History => "History",
            Category::Literature => "Literature",
            Category::Mathematics => "Mathematics",
            Category::Geography => "Geography",
            Category::Arts => "Arts",
            Category::Sports => "Sports",
            Category::Technology => "Technology",
            Category::Health => "Health",
            Category::Business => "Business",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-sensitive; the label must already be trimmed.
impl FromStr for Category {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or(())
    }
}

pub fn classification_prompt(text: &str) -> String {
    let excerpt: String = text.chars().take(CLASSIFIER_EXCERPT_CHARS).collect();
    format!("{}\n\nUser Topic: \"{}...\"", CLASSIFIER_PROMPT, excerpt)
}

const QUESTION_FIELDS: &str = r#"Each object in the "questions" array must have:
- "text": the question.
- "type": "multiple-choice".
- "options": exactly 4 string options.
- "correctAnswer": the numeric index (0-3) of the correct option.
- "explanation": a short explanation of why the answer is correct."#;

const LATEX_RULES: &str = r#"Use LaTeX for all notation and enclose every expression in $ delimiters, for example $H_2O$ or $x^2$.
Inside JSON strings every backslash must be doubled: write \\frac{1}{2}, not \frac{1}{2}."#;

pub fn generation_prompt(category: Category, source_text: &str, num_questions: u32) -> String {
    match category {
        Category::Programming => programming_prompt(source_text, num_questions),
        Category::Science => latex_prompt("science", "Chemistry", source_text, num_questions),
        Category::Mathematics => latex_prompt("math", "Calculus", source_text, num_questions),
        _ => standard_prompt(category, source_text, num_questions),
    }
}

fn standard_prompt(category: Category, source_text: &str, num_questions: u32) -> String {
    format!(
        r#"Generate a {n}-question multiple-choice quiz about "{topic}".
Respond with a single valid JSON object with a "title", a "questions" array, and a "tags" array of relevant keywords.
{fields}
- "learnMoreUrl": a relevant URL for further reading, or an empty string.

Example:
{{
  "title": "Quiz on the topic",
  "tags": ["{category}"],
  "questions": [
    {{
      "text": "What is the capital of France?",
      "type": "multiple-choice",
      "options": ["Berlin", "Madrid", "Paris", "Rome"],
      "correctAnswer": 2,
      "explanation": "Paris is the capital and most populous city of France.",
      "learnMoreUrl": "https://en.wikipedia.org/wiki/Paris"
    }}
  ]
}}"#,
        n = num_questions,
        topic = source_text,
        fields = QUESTION_FIELDS,
        category = category,
    )
}

fn latex_prompt(subject: &str, example_tag: &str, source_text: &str, num_questions: u32) -> String {
    format!(
        r#"Generate a {n}-question multiple-choice quiz about the {subject} topic "{topic}".
{latex}
Respond with a single valid JSON object with a "title", a "questions" array, and a "tags" array of relevant keywords.
{fields} Use LaTeX there too where it helps.
- "learnMoreUrl": a relevant URL for further reading, or an empty string.

Example:
{{
  "title": "Quiz on the topic",
  "tags": ["{tag}"],
  "questions": [
    {{
      "text": "What is the derivative of $x^2$?",
      "type": "multiple-choice",
      "options": ["$x$", "$2x$", "$x^3$", "$2x^2$"],
      "correctAnswer": 1,
      "explanation": "By the power rule the derivative of $x^n$ is $nx^{{n-1}}$, so $x^2$ becomes $2x$.",
      "learnMoreUrl": "https://en.wikipedia.org/wiki/Derivative"
    }}
  ]
}}"#,
        n = num_questions,
        subject = subject,
        topic = source_text,
        latex = LATEX_RULES,
        fields = QUESTION_FIELDS,
        tag = example_tag,
    )
}

fn programming_prompt(source_text: &str, num_questions: u32) -> String {
    format!(
        r#"Generate a {n}-question quiz about the programming topic "{topic}".
Mix 'multiple-choice' and 'code-input' questions.
Respond with a single valid JSON object with a "title", a "questions" array, and a "tags" array of relevant keywords (e.g. "JavaScript", "Data Structures").

Multiple-choice questions use this shape:
{{
  "text": "Question text?",
  "type": "multiple-choice",
  "options": ["Option A", "Option B", "Option C", "Option D"],
  "correctAnswer": 0,
  "explanation": "Why the correct answer is correct.",
  "learnMoreUrl": "A relevant URL or an empty string"
}}

Code-input questions use this shape:
{{
  "text": "A question asking the user to write a line of code.",
  "type": "code-input",
  "correctAnswer": "The exact line of code.",
  "explanation": "Why this snippet is correct.",
  "learnMoreUrl": "A relevant URL or an empty string"
}}"#,
        n = num_questions,
        topic = source_text,
    )
}

/// Ask for a one-paragraph explanation of a single question's answer.
pub fn explanation_prompt(question: &str, answer: &str) -> String {
    format!(
        "Explain in two or three sentences why \"{}\" is the correct answer to the quiz question \"{}\". \
         Respond with the explanation only.",
        answer, question
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_matching_is_exact() {
        assert_eq!("Science".parse::<Category>(), Ok(Category::Science));
        assert_eq!("Business".parse::<Category>(), Ok(Category::Business));
        assert!("science".parse::<Category>().is_err());
        assert!("Science.".parse::<Category>().is_err());
        assert!("Other".parse::<Category>().is_err());
        assert!("Cooking".parse::<Category>().is_err());
    }

    #[test]
    fn test_classification_excerpt_is_truncated() {
        let text = "é".repeat(CLASSIFIER_EXCERPT_CHARS + 500);
        let prompt = classification_prompt(&text);
        assert!(prompt.starts_with(CLASSIFIER_PROMPT));
        let excerpt = "é".repeat(CLASSIFIER_EXCERPT_CHARS);
        assert!(prompt.ends_with(&format!("User Topic: \"{}...\"", excerpt)));
    }

    #[test]
    fn test_template_selection() {
        let science = generation_prompt(Category::Science, "Photosynthesis", 5);
        assert!(science.contains(
            "5-question multiple-choice quiz about the science topic \"Photosynthesis\""
        ));
        assert!(science.contains("LaTeX"));

        let math = generation_prompt(Category::Mathematics, "Derivatives", 3);
        assert!(math.contains("math topic"));
        assert!(math.contains("\\\\frac{1}{2}"));

        let programming = generation_prompt(Category::Programming, "Rust ownership", 4);
        assert!(programming.contains("code-input"));

        let history = generation_prompt(Category::History, "The French Revolution", 10);
        assert!(
            history.contains("10-question multiple-choice quiz about \"The French Revolution\"")
        );
        assert!(history.contains("\"tags\": [\"History\"]"));
        assert!(!history.contains("LaTeX"));
    }
}
