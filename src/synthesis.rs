//! Text-to-speech contract.
//!
//! A [`Synthesizer`] returns audio as a lazy stream of byte chunks so
//! playback can start before the engine has finished speaking.

use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;

/// Lazily produced audio chunks, in engine order.
pub type AudioChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// One synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    /// Text to speak.
    pub text: String,
    /// Voice to speak with.
    pub voice_id: String,
    /// Engine model id.
    pub model_id: String,
    /// Engine output encoding, for example `mp3_44100_128`.
    pub output_format: String,
}

impl SynthesisRequest {
    /// Reject requests no engine can serve.
    ///
    /// # Errors
    ///
    /// [`SpeechError::SynthesisFailed`] for empty text or an empty voice id.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(SpeechError::SynthesisFailed("text is empty".into()));
        }
        if self.voice_id.trim().is_empty() {
            return Err(SpeechError::SynthesisFailed("voice id is empty".into()));
        }
        Ok(())
    }
}

/// Remote text-to-speech engine.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Start synthesizing. Chunks are forwarded as the engine sends them,
    /// never buffered whole.
    ///
    /// # Errors
    ///
    /// [`SpeechError::SynthesisFailed`] if the engine rejects the request.
    /// Failures after the stream starts arrive as `Err` items.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioChunkStream>;
}
