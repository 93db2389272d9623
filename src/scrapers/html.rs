//! Regex-based HTML to plain text conversion and whitespace cleanup.

use regex::Regex;
use std::sync::OnceLock;

/// Elements whose whole subtree is noise for quiz generation.
const NOISE_ELEMENTS: [&str; 7] = ["script", "style", "noscript", "nav", "header", "footer", "svg"];

struct Patterns {
    comments: Regex,
    noise: Vec<Regex>,
    main: Regex,
    body: Regex,
    block_break: Regex,
    tags: Regex,
    numeric_entity: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        comments: Regex::new(r"(?s)<!--.*?-->").expect("valid regex"),
        noise: NOISE_ELEMENTS
            .iter()
            .map(|tag| {
                Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).expect("valid regex")
            })
            .collect(),
        main: Regex::new(r#"(?is)<main\b[^>]*>(.*?)</main\s*>"#).expect("valid regex"),
        body: Regex::new(r"(?is)<body\b[^>]*>(.*?)</body\s*>").expect("valid regex"),
        block_break: Regex::new(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr|/section|/article)\b[^>]*>")
            .expect("valid regex"),
        tags: Regex::new(r"<[^>]*>").expect("valid regex"),
        numeric_entity: Regex::new(r"&#([xX]?[0-9a-fA-F]+);").expect("valid regex"),
    })
}

/// Strip markup from a raw HTML document, preferring the `<main>` element when
/// the page has one.
pub fn html_to_text(html: &str) -> String {
    let p = patterns();

    let mut text = p.comments.replace_all(html, " ").into_owned();
    for noise in &p.noise {
        text = noise.replace_all(&text, " ").into_owned();
    }

    let scoped = p
        .main
        .captures(&text)
        .or_else(|| p.body.captures(&text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or(text);

    let with_breaks = p.block_break.replace_all(&scoped, "\n");
    let stripped = p.tags.replace_all(&with_breaks, " ");
    normalize_whitespace(&decode_entities(&stripped))
}

fn decode_entities(text: &str) -> String {
    let decoded = patterns()
        .numeric_entity
        .replace_all(text, |caps: &regex::Captures| {
            let raw = &caps[1];
            let code = match raw.strip_prefix('x').or_else(|| raw.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => raw.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        });

    // &amp; last so "&amp;lt;" decodes to "&lt;" rather than "<".
    decoded
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Collapse runs of spaces/tabs, trim every line, and keep at most one blank
/// line between paragraphs.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        out.push_str(&collapsed);
        pending_blank = false;
    }

    out
}
