//! Text command classification and file name sanitation.

use {lembar_config::BotConfig, lembar_media::PDF_EXTENSION};

/// How an inbound text is interpreted before looking at the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// The completion keyword.
    Complete,
    /// The greeting keyword.
    Greet,
    /// Anything else (a file name, when one is expected).
    Text(&'a str),
}

/// Normalized command keywords.
#[derive(Debug, Clone)]
pub struct Keywords {
    completion: String,
    greeting: String,
}

impl Keywords {
    pub fn new(completion: &str, greeting: &str) -> Self {
        Self {
            completion: normalize(completion),
            greeting: normalize(greeting),
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(&config.completion_keyword, &config.greeting_keyword)
    }

    pub fn completion(&self) -> &str {
        &self.completion
    }

    /// Keywords match trimmed and case-insensitively.
    pub fn classify<'a>(&self, text: &'a str) -> Command<'a> {
        let normalized = normalize(text);
        if normalized == self.completion {
            Command::Complete
        } else if normalized == self.greeting {
            Command::Greet
        } else {
            Command::Text(text)
        }
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Keep ASCII letters, digits, whitespace, `_` and `-`, then trim the ends.
/// Inner spacing is left as typed.
///
/// Returns `None` when nothing survives.
pub fn sanitize_file_name(input: &str) -> Option<String> {
    let kept: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || matches!(c, '_' | '-'))
        .collect();
    let name = kept.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Final document name: the sanitized input, or `<prefix>-<now_ms>` when the
/// input has nothing usable, always with the PDF extension appended.
pub fn document_file_name(input: &str, fallback_prefix: &str, now_ms: u64) -> String {
    let base = sanitize_file_name(input).unwrap_or_else(|| format!("{fallback_prefix}-{now_ms}"));
    format!("{base}.{PDF_EXTENSION}")
}
