//! ElevenLabs adapter: speech-to-text, instant voice cloning and streamed
//! text-to-speech behind one authenticated client.

use super::http::{build_client, failure_detail, json_body};
use super::{FIELD_MODEL, FIELD_PROVIDER, SPAN_PROVIDER_REQUEST};
use crate::config::PolyvoxConfig;
use crate::error::{Result, SpeechError};
use crate::staging::AudioArtifact;
use crate::synthesis::{AudioChunkStream, SynthesisRequest, Synthesizer};
use crate::transcription::{TranscriptResult, Transcriber, normalize_transcript};
use crate::voice_cache::VoiceCloner;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Instrument, debug, info, info_span};

const PROVIDER: &str = "elevenlabs";
const API_KEY_HEADER: &str = "xi-api-key";

/// Client for the ElevenLabs REST API.
#[derive(Clone)]
pub struct ElevenLabsClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    stt_model_id: String,
}

impl std::fmt::Debug for ElevenLabsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsClient")
            .field("base_url", &self.base_url)
            .field("stt_model_id", &self.stt_model_id)
            .finish_non_exhaustive()
    }
}

impl ElevenLabsClient {
    /// Create a client against `base_url` (no trailing slash needed).
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Http`] if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        stt_model_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            stt_model_id: stt_model_id.into(),
        })
    }

    /// Create a client from configuration, reading the key from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Config`] if the key variable is unset.
    pub fn from_config(config: &PolyvoxConfig) -> Result<Self> {
        let providers = &config.providers;
        Self::new(
            providers.elevenlabs_api_key()?,
            providers.elevenlabs_base_url.clone(),
            config.transcription.model_id.clone(),
            Duration::from_secs(providers.timeout_seconds),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn transcribe_inner(
        &self,
        artifact: &AudioArtifact,
        language_hint: Option<&str>,
    ) -> Result<TranscriptResult> {
        let stt_failure = |message: String| SpeechError::TranscriptionFailed {
            artifact: artifact.fingerprint.clone(),
            message,
        };

        let file = audio_part(&artifact.staged_path)
            .await
            .map_err(|e| stt_failure(e.to_string()))?;
        let mut form = multipart::Form::new()
            .text("model_id", self.stt_model_id.clone())
            .part("file", file);
        if let Some(code) = language_hint {
            form = form.text("language_code", code.to_owned());
        }

        debug!(fingerprint = %artifact.fingerprint, "sending audio for transcription");
        let response = self
            .client
            .post(self.url("/v1/speech-to-text"))
            .header(API_KEY_HEADER, &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| stt_failure(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(stt_failure(failure_detail(response).await));
        }

        let body = json_body(response, "speech-to-text response").await?;
        let text = normalize_transcript(&body)?;
        let detected_language = body
            .get("language_code")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_owned);
        info!(chars = text.len(), detected = ?detected_language, "transcription completed");

        Ok(TranscriptResult {
            text,
            detected_language,
            artifact: artifact.reference(),
        })
    }
}

/// Read a staged file into a multipart part named after the file.
async fn audio_part(path: &Path) -> Result<multipart::Part> {
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio.wav".to_owned());
    multipart::Part::bytes(bytes)
        .file_name(name)
        .mime_str("audio/wav")
        .map_err(|e| SpeechError::Http(format!("mime: {e}")))
}

#[async_trait]
impl Transcriber for ElevenLabsClient {
    async fn transcribe(
        &self,
        artifact: &AudioArtifact,
        language_hint: Option<&str>,
    ) -> Result<TranscriptResult> {
        let span = info_span!(
            SPAN_PROVIDER_REQUEST,
            { FIELD_PROVIDER } = PROVIDER,
            { FIELD_MODEL } = self.stt_model_id.as_str(),
            operation = "speech_to_text",
        );
        self.transcribe_inner(artifact, language_hint)
            .instrument(span)
            .await
    }

    fn model_id(&self) -> &str {
        &self.stt_model_id
    }
}

#[async_trait]
impl VoiceCloner for ElevenLabsClient {
    async fn create_voice(
        &self,
        name: &str,
        description: &str,
        files: &[PathBuf],
    ) -> Result<String> {
        let span = info_span!(
            SPAN_PROVIDER_REQUEST,
            { FIELD_PROVIDER } = PROVIDER,
            operation = "voice_clone",
        );
        async {
            let clone_failure = SpeechError::CloneCreationFailed;
            let mut form = multipart::Form::new()
                .text("name", name.to_owned())
                .text("description", description.to_owned());
            for path in files {
                let part = audio_part(path)
                    .await
                    .map_err(|e| clone_failure(e.to_string()))?;
                form = form.part("files", part);
            }

            let response = self
                .client
                .post(self.url("/v1/voices/add"))
                .header(API_KEY_HEADER, &self.api_key)
                .multipart(form)
                .send()
                .await
                .map_err(|e| clone_failure(format!("request failed: {e}")))?;
            if !response.status().is_success() {
                return Err(clone_failure(failure_detail(response).await));
            }

            let body = json_body(response, "voice clone response").await?;
            body.get("voice_id")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .ok_or_else(|| {
                    SpeechError::MalformedResponse("voice clone response has no voice_id".into())
                })
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioChunkStream> {
        request.validate()?;
        let span = info_span!(
            SPAN_PROVIDER_REQUEST,
            { FIELD_PROVIDER } = PROVIDER,
            { FIELD_MODEL } = request.model_id.as_str(),
            operation = "text_to_speech",
        );
        let url = self.url(&format!("/v1/text-to-speech/{}/stream", request.voice_id));
        let body = serde_json::json!({
            "text": request.text,
            "model_id": request.model_id,
        });

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("output_format", request.output_format.as_str())])
            .json(&body)
            .send()
            .instrument(span)
            .await
            .map_err(|e| SpeechError::SynthesisFailed(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(SpeechError::SynthesisFailed(failure_detail(response).await));
        }
        debug!(voice_id = %request.voice_id, "synthesis stream opened");

        let chunks = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| SpeechError::SynthesisFailed(format!("stream read error: {e}")))
        });
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn base_url_trailing_slash_is_dropped() {
        let client =
            ElevenLabsClient::new("k", "http://localhost:1/", "scribe_v1", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.url("/v1/voices/add"), "http://localhost:1/v1/voices/add");
    }

    #[test]
    fn debug_hides_key() {
        let client =
            ElevenLabsClient::new("secret", "http://x", "scribe_v1", Duration::from_secs(1))
                .unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("scribe_v1"));
    }

    #[tokio::test]
    async fn missing_audio_file_fails_transcription() {
        let client =
            ElevenLabsClient::new("k", "http://127.0.0.1:9", "scribe_v1", Duration::from_secs(1))
                .unwrap();
        let artifact = crate::voice_cache::tests::artifact("feedface");
        let err = client.transcribe(&artifact, None).await.unwrap_err();
        match err {
            SpeechError::TranscriptionFailed { artifact, .. } => assert_eq!(artifact, "feedface"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
