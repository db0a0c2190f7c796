//! Polyvox: speech-to-speech translation in the speaker's own voice.
//!
//! A run takes recorded speech through a cascade of remote services:
//! Audio → Staging → STT → Translation → Voice clone → TTS → Audio
//!
//! # Architecture
//!
//! - **Staging**: validates WAV/PCM input, fingerprints it and writes a
//!   uniquely named copy ([`staging`])
//! - **Transcription**: speech-to-text behind the [`transcription::Transcriber`] seam
//! - **Translation**: one-shot or streamed fragments via [`translation::TranslationClient`]
//! - **Voice cloning**: one clone per speaker recording, cached process-wide
//!   ([`voice_cache`])
//! - **Synthesis**: streamed text-to-speech chunks ([`synthesis`])
//! - **Orchestration**: one-shot and streaming runs with cancellation and
//!   partial results ([`pipeline`])
//! - **Summaries**: meeting summaries of a journaled session ([`summary`])
//!
//! Remote adapters for ElevenLabs and Gemini live in [`providers`]; the
//! `polyvox-host` binary drives a run over stdin/stdout ([`host`]).

pub mod config;
pub mod error;
pub mod host;
pub mod language;
pub mod pipeline;
pub mod providers;
pub mod segment;
pub mod staging;
pub mod summary;
pub mod synthesis;
pub mod transcription;
pub mod translation;
pub mod voice_cache;

pub use config::PolyvoxConfig;
pub use error::{Result, SpeechError};
pub use pipeline::coordinator::{Collaborators, PipelineOrchestrator};
pub use pipeline::messages::{PipelineEvent, PipelineRequest, PipelineResult, PipelineStage};
pub use staging::{AudioArtifact, AudioSource, AudioStager};
