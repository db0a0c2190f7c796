//! Speech-to-text contract.
//!
//! The [`Transcriber`] trait is the seam to a remote STT engine. Engines
//! answer in different shapes, so adapters reduce their payloads with
//! [`normalize_transcript`] before building a [`TranscriptResult`].

use crate::error::{Result, SpeechError};
use crate::staging::{ArtifactRef, AudioArtifact};
use async_trait::async_trait;
use serde_json::Value;

/// Object fields searched, in order, for transcript text.
const TEXT_FIELDS: &[&str] = &["text", "transcript", "transcription"];

/// Transcript of one staged artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptResult {
    /// Trimmed transcript text. May be empty for silence.
    pub text: String,
    /// Language reported by the engine, if any.
    pub detected_language: Option<String>,
    /// The artifact this transcript was produced from.
    pub artifact: ArtifactRef,
}

/// Remote speech-to-text engine.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a staged artifact.
    ///
    /// `language_hint` is the caller's expected source language code.
    ///
    /// # Errors
    ///
    /// [`SpeechError::TranscriptionFailed`] on engine or transport errors and
    /// [`SpeechError::MalformedResponse`] when no text can be extracted.
    async fn transcribe(
        &self,
        artifact: &AudioArtifact,
        language_hint: Option<&str>,
    ) -> Result<TranscriptResult>;

    /// Model identifier reported in run metadata.
    fn model_id(&self) -> &str;
}

/// Reduce an engine response to plain trimmed text.
///
/// Order: a bare string, then the first non-blank string field among `text`,
/// `transcript` and `transcription`. Nested objects under those fields are
/// searched the same way. Anything else is a [`SpeechError::MalformedResponse`];
/// unknown shapes are never stringified.
pub fn normalize_transcript(value: &Value) -> Result<String> {
    extract_text(value, 0)
        .map(|text| text.trim().to_owned())
        .ok_or_else(|| {
            let shape = match value {
                Value::Null => "null",
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "array",
                Value::Object(_) => "object without a text field",
            };
            SpeechError::MalformedResponse(format!("transcript response was {shape}"))
        })
}

fn extract_text(value: &Value, depth: usize) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) if depth < 2 => {
            let mut found = TEXT_FIELDS
                .iter()
                .filter_map(|field| map.get(*field))
                .filter_map(|v| extract_text(v, depth + 1));
            // A blank field only counts when no later field carries text.
            let first = found.next()?;
            if !first.trim().is_empty() {
                return Some(first);
            }
            Some(found.find(|s| !s.trim().is_empty()).unwrap_or(first))
        }
        _ => None,
    }
}
