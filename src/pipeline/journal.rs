//! Post-run notifications and the session transcript journal.
//!
//! A [`RunNotifier`] is told about every finished run. Notification runs on
//! its own task after the result is decided; it cannot delay or change the
//! result, and its errors are only logged.

use super::messages::{PipelineFailure, PipelineResult, PipelineStage};
use crate::error::Result;
use crate::summary::SessionSummarizer;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{Instrument, warn};
use uuid::Uuid;

/// Speaker label used for translated lines in the journal.
pub const INTERPRETER_SPEAKER: &str = "interpreter";

/// What a notifier learns about a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: Uuid,
    /// Stage that failed, or `None` for a successful run.
    pub failed_stage: Option<PipelineStage>,
    /// Failure description.
    pub error: Option<String>,
    /// Transcript text, if transcription finished.
    pub transcript: Option<String>,
    /// Translated text, if translation finished.
    pub translation: Option<String>,
    /// Source language code (requested or detected).
    pub source_lang: Option<String>,
    /// Target language code, if translation finished.
    pub target_lang: Option<String>,
    /// Voice used, if resolved.
    pub voice_id: Option<String>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Whether the run completed.
    pub fn succeeded(&self) -> bool {
        self.failed_stage.is_none()
    }

    /// Summary of a successful run.
    pub fn from_result(result: &PipelineResult) -> Self {
        let source_lang = result
            .translation
            .from_lang
            .as_ref()
            .map(|l| l.code.clone())
            .or_else(|| result.transcript.detected_language.clone());
        Self {
            run_id: result.metadata.run_id,
            failed_stage: None,
            error: None,
            transcript: Some(result.transcript.text.clone()),
            translation: Some(result.translation.translated_text.clone()),
            source_lang,
            target_lang: Some(result.translation.to_lang.code.clone()),
            voice_id: Some(result.voice_id.clone()),
            elapsed: result.metadata.elapsed,
        }
    }

    /// Summary of a failed run.
    pub fn from_failure(failure: &PipelineFailure) -> Self {
        let partial = &failure.partial;
        Self {
            run_id: failure.run_id,
            failed_stage: Some(failure.stage),
            error: Some(failure.cause.to_string()),
            transcript: partial.transcript.as_ref().map(|t| t.text.clone()),
            translation: partial
                .translation
                .as_ref()
                .map(|t| t.translated_text.clone()),
            source_lang: partial
                .transcript
                .as_ref()
                .and_then(|t| t.detected_language.clone()),
            target_lang: partial.translation.as_ref().map(|t| t.to_lang.code.clone()),
            voice_id: partial.voice.as_ref().map(|v| v.voice_id.clone()),
            elapsed: failure.elapsed,
        }
    }
}

/// Side effect run after each pipeline run.
#[async_trait]
pub trait RunNotifier: Send + Sync {
    /// Handle a finished run.
    ///
    /// # Errors
    ///
    /// Errors are logged and otherwise ignored.
    async fn notify(&self, summary: &RunSummary) -> Result<()>;
}

/// Fire `notifier` on its own task.
pub(crate) fn dispatch(notifier: Option<&Arc<dyn RunNotifier>>, summary: RunSummary) {
    let Some(notifier) = notifier.map(Arc::clone) else {
        return;
    };
    tokio::spawn(
        async move {
            if let Err(e) = notifier.notify(&summary).await {
                warn!(run_id = %summary.run_id, error = %e, "run notification failed");
            }
        }
        .in_current_span(),
    );
}

/// One line of the session transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Sequence number, starting at 1.
    pub id: u64,
    /// Seconds since the journal started (or was last cleared).
    pub elapsed_secs: f64,
    /// Duration of the run that produced the line, in seconds.
    pub duration_secs: f64,
    /// Who said it.
    pub speaker: String,
    /// Language code of `text`.
    pub language: String,
    /// The line itself.
    pub text: String,
}

#[derive(Debug)]
struct JournalState {
    started: Instant,
    next_id: u64,
    entries: Vec<JournalEntry>,
}

/// In-memory transcript of a session: what was said and how it was rendered.
#[derive(Debug)]
pub struct TranscriptJournal {
    speaker: String,
    state: Mutex<JournalState>,
}

impl TranscriptJournal {
    /// Empty journal attributing source lines to `speaker`.
    pub fn new(speaker: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            state: Mutex::new(JournalState {
                started: Instant::now(),
                next_id: 1,
                entries: Vec::new(),
            }),
        }
    }

    /// Append a line, returning its id. Blank text is ignored and yields `None`.
    pub fn append(
        &self,
        speaker: &str,
        language: &str,
        text: &str,
        duration: Duration,
    ) -> Option<u64> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let id = state.next_id;
        state.next_id += 1;
        let elapsed_secs = state.started.elapsed().as_secs_f64();
        state.entries.push(JournalEntry {
            id,
            elapsed_secs,
            duration_secs: duration.as_secs_f64(),
            speaker: speaker.to_owned(),
            language: language.to_owned(),
            text: text.to_owned(),
        });
        Some(id)
    }

    /// Copy of every entry, oldest first.
    pub fn snapshot(&self) -> Vec<JournalEntry> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    /// Drop every entry and restart ids and elapsed time.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.clear();
        state.next_id = 1;
        state.started = Instant::now();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether the journal is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summarize the session so far in `target_lang`.
    ///
    /// # Errors
    ///
    /// See [`SessionSummarizer::summarize`].
    pub async fn summarize(
        &self,
        summarizer: &SessionSummarizer,
        target_lang: &str,
    ) -> Result<String> {
        let entries = self.snapshot();
        summarizer.summarize(&entries, target_lang).await
    }
}

#[async_trait]
impl RunNotifier for TranscriptJournal {
    async fn notify(&self, summary: &RunSummary) -> Result<()> {
        if !summary.succeeded() {
            return Ok(());
        }
        let source_lang = summary.source_lang.as_deref().unwrap_or("und");
        if let Some(text) = &summary.transcript {
            self.append(&self.speaker, source_lang, text, summary.elapsed);
        }
        if let (Some(text), Some(lang)) = (&summary.translation, &summary.target_lang) {
            self.append(INTERPRETER_SPEAKER, lang, text, summary.elapsed);
        }
        Ok(())
    }
}
