//! `generateContent` request/response wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GenerationParams;
use crate::error::GenerationFailure;

/// Request body: `{contents:[{role, parts:[{text}]}], generationConfig:{...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerateRequest {
    /// Single-turn user request.
    pub fn user(prompt: &str, params: &GenerationParams) -> Self {
        GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            },
        }
    }
}

/// Pull the generated text out of a 200 response body.
///
/// Accepts `candidates[0].content.parts[0].text` or, failing that,
/// `candidates[0].content.text`. Anything else, including blank text, is a
/// [`GenerationFailure::MalformedResponse`].
pub fn extract_text(body: &str) -> Result<String, GenerationFailure> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| GenerationFailure::MalformedResponse(format!("invalid JSON: {e}")))?;

    let content = value
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .ok_or_else(|| GenerationFailure::MalformedResponse("no candidates in response".into()))?;

    let text = content
        .get("parts")
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .or_else(|| content.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| GenerationFailure::MalformedResponse("candidate has no text".into()))?;

    if text.trim().is_empty() {
        return Err(GenerationFailure::MalformedResponse(
            "candidate text is empty".into(),
        ));
    }

    Ok(text.to_string())
}
