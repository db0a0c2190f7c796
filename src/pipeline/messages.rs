//! Types exchanged between the orchestrator and its callers.

use crate::error::SpeechError;
use crate::staging::{ArtifactRef, AudioSource};
use crate::transcription::TranscriptResult;
use crate::translation::{TranslationFragment, TranslationResult};
use crate::voice_cache::{VoiceProvenance, VoiceResolution};
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// States of one pipeline run, in one-shot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Input audio staged and fingerprinted.
    Staged,
    /// Transcript available.
    Transcribed,
    /// Translation complete.
    Translated,
    /// Voice id resolved.
    VoiceReady,
    /// Synthesis requested.
    Synthesizing,
    /// All audio delivered.
    Done,
}

impl PipelineStage {
    /// Every stage in one-shot order.
    pub const ALL: [Self; 6] = [
        Self::Staged,
        Self::Transcribed,
        Self::Translated,
        Self::VoiceReady,
        Self::Synthesizing,
        Self::Done,
    ];

    /// Lower-case label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::Transcribed => "transcribed",
            Self::Translated => "translated",
            Self::VoiceReady => "voice_ready",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to one run.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Audio to translate.
    pub source: AudioSource,
    /// Source language code or name. `None` uses the detected language.
    pub from_lang: Option<String>,
    /// Target language code or name.
    pub to_lang: String,
    /// Name for the cloned voice.
    pub voice_name: Option<String>,
    /// Description for the cloned voice.
    pub voice_description: Option<String>,
    /// Also write the synthesized audio to this file.
    pub output_path: Option<PathBuf>,
}

impl PipelineRequest {
    /// Request translating `source` into `to_lang`.
    pub fn new(source: AudioSource, to_lang: impl Into<String>) -> Self {
        Self {
            source,
            from_lang: None,
            to_lang: to_lang.into(),
            voice_name: None,
            voice_description: None,
            output_path: None,
        }
    }

    /// Set the source language.
    pub fn from_lang(mut self, lang: impl Into<String>) -> Self {
        self.from_lang = Some(lang.into());
        self
    }

    /// Set the cloned voice's name and optional description.
    pub fn voice(mut self, name: impl Into<String>, description: Option<String>) -> Self {
        self.voice_name = Some(name.into());
        self.voice_description = description;
        self
    }

    /// Write synthesized audio to `path` as well.
    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }
}

/// Models and voice details of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMetadata {
    /// Run identifier, also present on every log line of the run.
    pub run_id: Uuid,
    /// Speech-to-text model.
    pub stt_model_id: String,
    /// Translation model.
    pub translation_model: String,
    /// Text-to-speech model.
    pub tts_model_id: String,
    /// Audio encoding requested from the synthesizer.
    pub output_format: String,
    /// Whether the voice was freshly cloned, reused, or the fallback.
    pub voice_provenance: VoiceProvenance,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl RunMetadata {
    /// Whether this run created a new voice clone.
    pub fn voice_cloned(&self) -> bool {
        self.voice_provenance == VoiceProvenance::Cloned
    }
}

/// Successful run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Transcript of the input.
    pub transcript: TranscriptResult,
    /// Translation of the transcript.
    pub translation: TranslationResult,
    /// Staged input audio.
    pub artifact: ArtifactRef,
    /// Voice used for synthesis. Never empty.
    pub voice_id: String,
    /// Synthesized audio in engine order. Empty in streaming mode, where
    /// chunks were already delivered as events.
    pub audio: Vec<Bytes>,
    /// Stages reached, in the order they were reached.
    pub stages_visited: Vec<PipelineStage>,
    /// Models and voice details.
    pub metadata: RunMetadata,
}

impl PipelineResult {
    /// Total synthesized bytes held in `audio`.
    pub fn audio_len(&self) -> usize {
        self.audio.iter().map(Bytes::len).sum()
    }
}

/// Results computed before a run failed.
#[derive(Debug, Default)]
pub struct PartialResults {
    /// Staged input, if staging succeeded.
    pub artifact: Option<ArtifactRef>,
    /// Transcript, if transcription succeeded.
    pub transcript: Option<TranscriptResult>,
    /// Complete translation, if translation succeeded.
    pub translation: Option<TranslationResult>,
    /// Streamed translation text received before the failure.
    pub partial_translation: Option<String>,
    /// Resolved voice, if resolution finished.
    pub voice: Option<VoiceResolution>,
}

/// A failed run: which step failed, why, and what was already computed.
#[derive(Debug)]
pub struct PipelineFailure {
    /// Run identifier.
    pub run_id: Uuid,
    /// Stage whose work failed.
    pub stage: PipelineStage,
    /// Underlying error.
    pub cause: SpeechError,
    /// Results of earlier stages.
    pub partial: PartialResults,
    /// Stages reached before the failure. Empty when staging failed.
    pub stages_visited: Vec<PipelineStage>,
    /// Wall time until the failure.
    pub elapsed: Duration,
}

impl PipelineFailure {
    /// Whether the run stopped because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cause.is_cancellation()
    }
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipeline failed at {}: {}", self.stage, self.cause)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Incremental output of a streaming run.
#[derive(Debug)]
pub enum PipelineEvent {
    /// A stage was reached.
    Stage(PipelineStage),
    /// A translated fragment. An error fragment is followed by `Failed`.
    Fragment(TranslationFragment),
    /// A synthesized audio chunk.
    Audio(Bytes),
    /// The run finished. Always the last event of a successful run.
    Completed(Box<PipelineResult>),
    /// The run failed. Always the last event of a failed run.
    Failed(Box<PipelineFailure>),
}

impl PipelineEvent {
    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}
