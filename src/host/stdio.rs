//! Stdin/stdout bridge: one JSON request in, raw audio bytes out.
//!
//! Stdout carries nothing but synthesized audio so a host can pipe it
//! straight into a player. Progress and diagnostics go through `tracing`,
//! which the binary routes to stderr.

use super::contract::BridgeRequest;
use crate::error::SpeechError;
use crate::pipeline::{PipelineEvent, PipelineFailure, PipelineOrchestrator, PipelineResult};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Largest request document accepted on stdin.
const MAX_REQUEST_BYTES: u64 = 64 * 1024 * 1024;

/// Why a bridge run did not complete.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The request was invalid or the audio could not be written.
    #[error(transparent)]
    Local(#[from] SpeechError),
    /// The pipeline run failed.
    #[error(transparent)]
    Pipeline(Box<PipelineFailure>),
    /// The event stream ended without a final event.
    #[error("pipeline ended without a result")]
    Incomplete,
}

/// Read the request document from `input`.
///
/// # Errors
///
/// [`SpeechError::Io`] on read failure and [`SpeechError::InvalidRequest`]
/// if the document is empty, oversized or not a valid request.
pub async fn read_request<R: AsyncRead + Unpin>(input: R) -> Result<BridgeRequest, SpeechError> {
    let mut raw = String::new();
    input.take(MAX_REQUEST_BYTES + 1).read_to_string(&mut raw).await?;
    if raw.len() as u64 > MAX_REQUEST_BYTES {
        return Err(SpeechError::InvalidRequest("request exceeds 64 MiB".into()));
    }
    if raw.trim().is_empty() {
        return Err(SpeechError::InvalidRequest("no request on stdin".into()));
    }
    BridgeRequest::parse(&raw)
}

/// Run one streaming translation, writing audio to `output` as it arrives.
///
/// Each chunk is flushed immediately. A write failure drops the event
/// stream, which stops the run.
///
/// # Errors
///
/// See [`BridgeError`].
pub async fn run_bridge<W: AsyncWrite + Unpin>(
    orchestrator: &PipelineOrchestrator,
    request: BridgeRequest,
    mut output: W,
    cancel: CancellationToken,
) -> Result<Box<PipelineResult>, BridgeError> {
    let request = request.into_pipeline_request()?;
    let mut events = orchestrator.run_streaming(request, cancel);
    let mut written = 0usize;

    while let Some(event) = events.next().await {
        match event {
            PipelineEvent::Stage(stage) => info!(%stage, "stage"),
            PipelineEvent::Fragment(fragment) => {
                debug!(fragment = %fragment.as_str(), "translation fragment");
            }
            PipelineEvent::Audio(chunk) => {
                output.write_all(&chunk).await.map_err(SpeechError::from)?;
                output.flush().await.map_err(SpeechError::from)?;
                written += chunk.len();
            }
            PipelineEvent::Completed(result) => {
                info!(
                    bytes = written,
                    transcript = %result.transcript.text,
                    translation = %result.translation.translated_text,
                    voice_id = %result.voice_id,
                    "translation complete"
                );
                return Ok(result);
            }
            PipelineEvent::Failed(failure) => return Err(BridgeError::Pipeline(failure)),
        }
    }
    Err(BridgeError::Incomplete)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::pipeline::PipelineStage;
    use crate::pipeline::coordinator::tests::Harness;

    fn request_for(path: &std::path::Path) -> BridgeRequest {
        BridgeRequest {
            from_lang: Some("en".into()),
            to_lang: "es".into(),
            audio_b64: None,
            wav_path: Some(path.to_path_buf()),
            voice_name: None,
            voice_description: None,
            sample_rate: None,
            channels: None,
            bit_depth: None,
            output_path: None,
        }
    }

    #[tokio::test]
    async fn reads_request_document() {
        let input: &[u8] = br#"{"to_lang":"es","wav_path":"/tmp/a.wav"}"#;
        let request = read_request(input).await.unwrap();
        assert_eq!(request.to_lang, "es");
    }

    #[tokio::test]
    async fn empty_stdin_is_invalid() {
        let input: &[u8] = b"  \n";
        let err = read_request(input).await.unwrap_err();
        assert!(matches!(err, SpeechError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn audio_streams_to_output() {
        let h = Harness::new("Hello. Bye.", vec!["Hola.", " Adiós."]);
        let wav = h.wav("hello.wav");
        let mut out = Vec::new();

        let result = run_bridge(
            &h.orchestrator(),
            request_for(&wav),
            &mut out,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Hola.#0;Hola.#1;Adiós.#0;Adiós.#1;");
        assert_eq!(result.stages_visited.last(), Some(&PipelineStage::Done));
    }

    #[tokio::test]
    async fn failed_run_surfaces_stage() {
        let h = Harness::new("Hello", vec!["Hola"]);
        let missing = h.dir.path().join("missing.txt");
        let err = run_bridge(
            &h.orchestrator(),
            request_for(&missing),
            Vec::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        match err {
            BridgeError::Pipeline(failure) => assert_eq!(failure.stage, PipelineStage::Staged),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
