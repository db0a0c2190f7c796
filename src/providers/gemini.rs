//! Gemini adapter for machine translation.
//!
//! One-shot requests use `:generateContent`; streamed requests use
//! `:streamGenerateContent?alt=sse`, where each SSE event carries a partial
//! `GenerateContentResponse`. Session summaries go through the same
//! one-shot endpoint.

use super::http::{build_client, failure_detail, json_body};
use super::sse::SseLineParser;
use super::{FIELD_MODEL, FIELD_PROVIDER, SPAN_PROVIDER_REQUEST};
use crate::config::PolyvoxConfig;
use crate::error::{Result, SpeechError};
use crate::summary::Summarizer;
use crate::translation::{EngineInput, TextStream, TranslationEngine};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{Instrument, debug, info_span, warn};

const PROVIDER: &str = "gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Low temperature keeps interpretations literal.
const TEMPERATURE: f32 = 0.2;

/// Translation engine backed by the Gemini `generateContent` API.
#[derive(Clone)]
pub struct GeminiTranslator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for GeminiTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiTranslator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiTranslator {
    /// Create a translator for `model` against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Http`] if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            model: model.into(),
        })
    }

    /// Create a translator from configuration, reading the key from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Config`] if the key variable is unset.
    pub fn from_config(config: &PolyvoxConfig) -> Result<Self> {
        let providers = &config.providers;
        Self::new(
            providers.gemini_api_key()?,
            providers.gemini_base_url.clone(),
            config.translation.model.clone(),
            Duration::from_secs(providers.timeout_seconds),
        )
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/v1beta/models/{}:{method}", self.base_url, self.model)
    }

    async fn post(
        &self,
        url: String,
        body: &Value,
        fail: fn(String) -> SpeechError,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| fail(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(fail(failure_detail(response).await));
        }
        Ok(response)
    }
}

/// Request body for one interpreter prompt.
pub fn build_request(input: &EngineInput) -> Value {
    let mut body = prompt_request(&input.prompt());
    body["generationConfig"] = json!({ "temperature": TEMPERATURE });
    body
}

/// Single-turn request body for `prompt` with default generation settings.
pub fn prompt_request(prompt: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": prompt }],
        }],
    })
}

/// Concatenate `candidates[0].content.parts[*].text`.
///
/// Returns `None` when the response has no first candidate with parts.
/// A candidate whose parts carry no text yields `Some("")`.
pub fn candidate_text(response: &Value) -> Option<String> {
    let parts = response
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    Some(
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
    )
}

/// Reason a response carried no candidate, for error messages.
fn block_reason(response: &Value) -> String {
    response
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
        .map_or_else(
            || "response has no candidate text".to_owned(),
            |reason| format!("prompt blocked: {reason}"),
        )
}

/// Text carried by one streamed event. Events without candidates (usage
/// trailers) yield an empty string.
fn event_text(data: &str) -> Result<String> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| SpeechError::MalformedResponse(format!("stream event: {e}")))?;
    if let Some(text) = candidate_text(&value) {
        return Ok(text);
    }
    if value.get("promptFeedback").is_some() {
        return Err(SpeechError::TranslationFailed(block_reason(&value)));
    }
    Ok(String::new())
}

#[async_trait]
impl TranslationEngine for GeminiTranslator {
    async fn translate(&self, input: &EngineInput) -> Result<String> {
        let span = info_span!(
            SPAN_PROVIDER_REQUEST,
            { FIELD_PROVIDER } = PROVIDER,
            { FIELD_MODEL } = self.model.as_str(),
            operation = "generate_content",
        );
        async {
            let response = self
                .post(
                    self.endpoint("generateContent"),
                    &build_request(input),
                    SpeechError::TranslationFailed,
                )
                .await?;
            let body = json_body(response, "generateContent response").await?;
            let text = candidate_text(&body)
                .ok_or_else(|| SpeechError::MalformedResponse(block_reason(&body)))?;
            debug!(chars = text.len(), "translation received");
            Ok(text)
        }
        .instrument(span)
        .await
    }

    async fn translate_stream(&self, input: &EngineInput) -> Result<TextStream> {
        let span = info_span!(
            SPAN_PROVIDER_REQUEST,
            { FIELD_PROVIDER } = PROVIDER,
            { FIELD_MODEL } = self.model.as_str(),
            operation = "stream_generate_content",
        );
        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self
            .post(url, &build_request(input), SpeechError::TranslationFailed)
            .instrument(span)
            .await?;
        let mut bytes = Box::pin(response.bytes_stream());

        let stream = async_stream::stream! {
            let mut parser = SseLineParser::new();
            loop {
                let events = match bytes.next().await {
                    Some(Ok(chunk)) => parser.push(&chunk),
                    Some(Err(e)) => {
                        warn!(error = %e, "translation stream read failed");
                        yield Err(SpeechError::TranslationFailed(format!("stream read error: {e}")));
                        break;
                    }
                    None => {
                        if let Some(event) = parser.flush()
                            && !event.is_done()
                        {
                            yield event_text(&event.data);
                        }
                        break;
                    }
                };
                for event in events {
                    if event.is_done() {
                        continue;
                    }
                    match event_text(&event.data) {
                        Ok(text) if text.is_empty() => {}
                        Ok(text) => {
                            yield Ok(text);
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Summarizer for GeminiTranslator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let span = info_span!(
            SPAN_PROVIDER_REQUEST,
            { FIELD_PROVIDER } = PROVIDER,
            { FIELD_MODEL } = self.model.as_str(),
            operation = "summarize",
        );
        async {
            let response = self
                .post(
                    self.endpoint("generateContent"),
                    &prompt_request(prompt),
                    SpeechError::SummaryFailed,
                )
                .await?;
            let body = json_body(response, "summary response").await?;
            candidate_text(&body).ok_or_else(|| SpeechError::MalformedResponse(block_reason(&body)))
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::language;

    fn input() -> EngineInput {
        EngineInput {
            text: "Good morning".into(),
            source: language::normalize("en"),
            target: language::normalize("es").unwrap(),
        }
    }

    #[test]
    fn request_carries_prompt() {
        let body = build_request(&input());
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("Translate to Spanish."));
        assert!(prompt.ends_with("Source text: Good morning"));
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn summary_request_uses_default_generation_settings() {
        let body = prompt_request("Summarize this.");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Summarize this.");
        assert!(body.get("generationConfig").is_none());
        assert_eq!(build_request(&input())["generationConfig"]["temperature"], json!(0.2f32));
    }

    #[test]
    fn candidate_parts_are_joined() {
        let response = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Buenos "}, {"text": "días"}]}
            }]
        });
        assert_eq!(candidate_text(&response).as_deref(), Some("Buenos días"));
    }

    #[test]
    fn missing_candidates_is_none() {
        assert!(candidate_text(&json!({"candidates": []})).is_none());
        assert!(candidate_text(&json!({"error": "x"})).is_none());
    }

    #[test]
    fn blocked_prompt_is_reported() {
        let response = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert_eq!(block_reason(&response), "prompt blocked: SAFETY");
        assert!(matches!(
            event_text(&response.to_string()),
            Err(SpeechError::TranslationFailed(_))
        ));
    }

    #[test]
    fn usage_trailer_is_empty_text() {
        let trailer = r#"{"usageMetadata":{"totalTokenCount":12}}"#;
        assert_eq!(event_text(trailer).unwrap(), "");
    }

    #[test]
    fn invalid_event_is_malformed() {
        assert!(matches!(
            event_text("{not json"),
            Err(SpeechError::MalformedResponse(_))
        ));
    }

    #[test]
    fn endpoint_includes_model() {
        let translator =
            GeminiTranslator::new("k", "http://h/", "gemini-2.5-flash", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            translator.endpoint("generateContent"),
            "http://h/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(translator.model(), "gemini-2.5-flash");
    }
}
