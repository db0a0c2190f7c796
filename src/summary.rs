//! Session summaries.
//!
//! A [`SessionSummarizer`] turns the lines collected by a
//! [`TranscriptJournal`](crate::pipeline::TranscriptJournal) into a
//! three-section meeting summary (overview, key topics, action items) written
//! in a target language. The prompt asks for more detail as the session grows.

use crate::error::{Result, SpeechError};
use crate::language;
use crate::pipeline::journal::JournalEntry;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span};

/// Longest speaker label passed to the model, in characters.
const MAX_SPEAKER_CHARS: usize = 20;
/// Longest language code passed to the model, in characters.
const MAX_LANG_CHARS: usize = 10;

/// Word-count ceilings of the brief and medium summary tiers.
const BRIEF_WORDS: usize = 400;
const MEDIUM_WORDS: usize = 1500;

/// Remote text generator used for summaries.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Complete `prompt` in a single request.
    ///
    /// # Errors
    ///
    /// [`SpeechError::SummaryFailed`] on engine or transport errors.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct PromptLine<'a> {
    t: f64,
    speaker: &'a str,
    lang: &'a str,
    text: &'a str,
}

fn clip(value: &str, max_chars: usize) -> &str {
    value
        .char_indices()
        .nth(max_chars)
        .map_or(value, |(end, _)| &value[..end])
}

/// Detail requested from the model for a transcript of this size.
pub fn length_hint<'a>(texts: impl IntoIterator<Item = &'a str>) -> &'static str {
    let words: usize = texts.into_iter().map(|t| t.split_whitespace().count()).sum();
    if words < BRIEF_WORDS {
        "Keep it brief: 4–6 bullets and a 2–3 sentence overview."
    } else if words < MEDIUM_WORDS {
        "Aim for 7–10 bullets and a concise 3–4 sentence overview."
    } else {
        "Aim for 10–15 bullets and a concise 4–6 sentence overview."
    }
}

/// Build the summary prompt for `entries`, written in `target`.
///
/// Entries with blank text are left out of the transcript and the word count.
///
/// # Errors
///
/// [`SpeechError::SummaryFailed`] if the transcript cannot be encoded.
pub fn build_summary_prompt(entries: &[JournalEntry], target: &str) -> Result<String> {
    let lines: Vec<PromptLine<'_>> = entries
        .iter()
        .filter(|e| !e.text.trim().is_empty())
        .map(|e| PromptLine {
            t: e.elapsed_secs,
            speaker: clip(&e.speaker, MAX_SPEAKER_CHARS),
            lang: clip(&e.language, MAX_LANG_CHARS),
            text: &e.text,
        })
        .collect();
    let transcript = serde_json::to_string(&lines)
        .map_err(|e| SpeechError::SummaryFailed(format!("transcript encoding: {e}")))?;
    let hint = length_hint(lines.iter().map(|l| l.text));
    Ok(format!(
        "You are an expert meeting summarizer. Summarize in {target}.\n\
         Output 3 sections:\n\
         1) Summary: 2–6 sentences.\n\
         2) Key Topics: 4–10 bullets (main ideas/themes).\n\
         3) Action Items: bullets (owner, task, due date if mentioned). If none, say 'None stated.'\n\n\
         Rules: Be concise. Do not invent facts. Keep names/dates. \
         {hint} Write the entire output in {target}.\n\n\
         Transcript as JSON lines with fields: t, speaker, lang, text:\n\
         {transcript}"
    ))
}

/// Summarizes session transcripts through a [`Summarizer`].
#[derive(Clone)]
pub struct SessionSummarizer {
    engine: Arc<dyn Summarizer>,
}

impl std::fmt::Debug for SessionSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSummarizer").finish_non_exhaustive()
    }
}

impl SessionSummarizer {
    /// Wrap an engine.
    pub fn new(engine: Arc<dyn Summarizer>) -> Self {
        Self { engine }
    }

    /// Summarize `entries` in `target_lang` (code or language name).
    ///
    /// # Errors
    ///
    /// - [`SpeechError::InvalidRequest`] if `target_lang` is blank or no entry
    ///   carries text; the engine is not called.
    /// - [`SpeechError::SummaryFailed`] if the engine fails or returns no text.
    pub async fn summarize(&self, entries: &[JournalEntry], target_lang: &str) -> Result<String> {
        let target = language::normalize(target_lang)
            .ok_or_else(|| SpeechError::InvalidRequest("summary target language is required".into()))?;
        if entries.iter().all(|e| e.text.trim().is_empty()) {
            return Err(SpeechError::InvalidRequest(
                "no transcript entries to summarize".into(),
            ));
        }
        let prompt = build_summary_prompt(entries, &target.display_name)?;

        let span = info_span!("polyvox.summary", target = %target.code, entries = entries.len());
        async {
            let summary = self.engine.generate(&prompt).await?;
            let summary = summary.trim();
            if summary.is_empty() {
                return Err(SpeechError::SummaryFailed("engine returned no text".into()));
            }
            debug!(chars = summary.len(), "session summarized");
            Ok(summary.to_owned())
        }
        .instrument(span)
        .await
    }
}
