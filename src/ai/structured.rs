//! Typed decoding of model replies.
//!
//! A reply is first decoded as-is (after stripping markdown fences). If that
//! fails it is marked for recovery, and a single recovery pass pulls the first
//! well-formed JSON object out of the surrounding text. Nothing is cast into a
//! typed structure without going through serde.

use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum AiOutput<T> {
    Parsed(T),
    NeedsRecovery(String),
    Failed(String),
}

impl<T: DeserializeOwned> AiOutput<T> {
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<T>(strip_code_blocks(raw)) {
            Ok(value) => AiOutput::Parsed(value),
            Err(_) => AiOutput::NeedsRecovery(raw.to_string()),
        }
    }

    /// The one recovery attempt. Parsed and failed outputs pass through.
    pub fn recover(self) -> Self {
        match self {
            AiOutput::NeedsRecovery(raw) => match extract_first_json_object(&raw) {
                Some(candidate) => match serde_json::from_str::<T>(candidate) {
                    Ok(value) => AiOutput::Parsed(value),
                    Err(e) => AiOutput::Failed(format!("recovered JSON has wrong shape: {}", e)),
                },
                None => AiOutput::Failed("no JSON object in reply".to_string()),
            },
            other => other,
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            AiOutput::Parsed(value) => Ok(value),
            AiOutput::NeedsRecovery(raw) => Err(AppError::MalformedAiOutput(format!(
                "unrecovered reply: {}",
                preview(&raw)
            ))),
            AiOutput::Failed(reason) => Err(AppError::MalformedAiOutput(reason)),
        }
    }
}

/// Parse, recover once if needed, and return the typed value.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    AiOutput::<T>::parse(raw).recover().into_result()
}

/// Strip markdown code blocks from a response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// First balanced `{...}` span in `text` that is valid JSON.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&text[start..]) {
            let candidate = &text[start..start + end];
            if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                return Some(candidate);
            }
        }
        search_from = start + 1;
    }
    None
}

/// Byte length of the balanced object starting at `s[0] == '{'`.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (i, ch) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(raw: &str) -> String {
    raw.chars().take(120).collect()
}
