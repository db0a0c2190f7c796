//! Machine translation contract and client.
//!
//! [`TranslationEngine`] is the seam to a remote translation service.
//! [`TranslationClient`] wraps an engine and owns the behavior that must hold
//! regardless of which engine is plugged in: language normalization, the
//! identity short-circuit, fragment whitespace, and the error sentinel that
//! terminates a failed stream.

use crate::error::{Result, SpeechError};
use crate::language::{self, Language};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use std::borrow::Cow;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix marking a fragment that reports a failed stream.
pub const ERROR_SENTINEL_PREFIX: &str = "[translation_error]";

/// Stream of raw text pieces from an engine.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Stream of normalized fragments from [`TranslationClient::translate_stream`].
pub type FragmentStream = Pin<Box<dyn Stream<Item = TranslationFragment> + Send>>;

/// What a caller asks to translate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    /// Source text.
    pub text: String,
    /// Source language code or name. `None` lets the engine detect it.
    pub from_lang: Option<String>,
    /// Target language code or name.
    pub to_lang: String,
}

impl TranslationRequest {
    /// Build a request.
    pub fn new(
        text: impl Into<String>,
        from_lang: Option<impl Into<String>>,
        to_lang: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            from_lang: from_lang.map(Into::into),
            to_lang: to_lang.into(),
        }
    }
}

/// Result of a one-shot translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    /// Translated text, trimmed.
    pub translated_text: String,
    /// Resolved source language, if one was given.
    pub from_lang: Option<Language>,
    /// Resolved target language.
    pub to_lang: Language,
    /// Text that was translated.
    pub source_text: String,
}

impl TranslationResult {
    /// Whether the result came from the identity short-circuit.
    pub fn is_identity(&self) -> bool {
        self.translated_text == self.source_text
            && self.from_lang.as_ref().is_some_and(|f| f.same_as(&self.to_lang))
    }
}

/// One piece of a streamed translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationFragment {
    /// Translated text, always ending in whitespace.
    Text(String),
    /// The stream failed. Always the last item of its stream.
    Error(String),
}

impl TranslationFragment {
    /// Text as concatenated by a caller. Errors render as the sentinel line.
    pub fn as_str(&self) -> Cow<'_, str> {
        match self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::Error(message) => Cow::Owned(format!("{ERROR_SENTINEL_PREFIX}: {message}\n")),
        }
    }

    /// Whether this is the failure sentinel.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Normalized input handed to an engine.
#[derive(Debug, Clone)]
pub struct EngineInput {
    /// Source text, never empty.
    pub text: String,
    /// Source language, when known.
    pub source: Option<Language>,
    /// Target language.
    pub target: Language,
}

impl EngineInput {
    /// Interpreter prompt for LLM-backed engines.
    pub fn prompt(&self) -> String {
        build_prompt(&self.text, self.source.as_ref(), &self.target)
    }
}

/// Remote translation engine.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    /// Translate in one request.
    ///
    /// # Errors
    ///
    /// [`SpeechError::TranslationFailed`] on engine or transport errors.
    async fn translate(&self, input: &EngineInput) -> Result<String>;

    /// Start a streamed translation. Items are yielded as the engine produces
    /// them; an `Err` item ends the stream.
    ///
    /// # Errors
    ///
    /// [`SpeechError::TranslationFailed`] if the stream cannot be opened.
    async fn translate_stream(&self, input: &EngineInput) -> Result<TextStream>;

    /// Model identifier reported in run metadata.
    fn model(&self) -> &str;
}

/// Build the interpreter prompt used by LLM-backed engines.
pub fn build_prompt(text: &str, source: Option<&Language>, target: &Language) -> String {
    let source_clause = match source {
        Some(lang) => format!("Source language is {}.", lang.display_name),
        None => "If unclear, auto-detect the source language.".to_owned(),
    };
    format!(
        "You are a low-latency meeting interpreter. {source_clause} \
         Translate to {target}. Preserve tone and intent. \
         Prefer short, simple sentences. If the source is incomplete, \
         translate the best-guess fragment without adding new facts. \
         Only output the translation, nothing else.\n\nSource text: {text}",
        target = target.display_name,
    )
}

/// Translation client wrapping a remote engine.
#[derive(Clone)]
pub struct TranslationClient {
    engine: Arc<dyn TranslationEngine>,
}

impl std::fmt::Debug for TranslationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationClient")
            .field("model", &self.engine.model())
            .finish()
    }
}

/// Outcome of resolving a request before any engine call.
enum Plan {
    Identity {
        from: Option<Language>,
        to: Language,
    },
    Remote(EngineInput),
}

impl TranslationClient {
    /// Wrap an engine.
    pub fn new(engine: Arc<dyn TranslationEngine>) -> Self {
        Self { engine }
    }

    /// Model name of the wrapped engine.
    pub fn model(&self) -> &str {
        self.engine.model()
    }

    /// Normalize a request's source and target languages.
    ///
    /// # Errors
    ///
    /// [`SpeechError::TranslationFailed`] when the target language is blank.
    pub fn resolve_languages(
        request: &TranslationRequest,
    ) -> Result<(Option<Language>, Language)> {
        let to = language::normalize(&request.to_lang).ok_or_else(|| {
            SpeechError::TranslationFailed("target language is required".into())
        })?;
        let from = request.from_lang.as_deref().and_then(language::normalize);
        Ok((from, to))
    }

    fn plan(request: &TranslationRequest) -> Result<Plan> {
        let (from, to) = Self::resolve_languages(request)?;

        let same_language = from.as_ref().is_some_and(|f| f.same_as(&to));
        if same_language || request.text.trim().is_empty() {
            return Ok(Plan::Identity { from, to });
        }
        Ok(Plan::Remote(EngineInput {
            text: request.text.clone(),
            source: from,
            target: to,
        }))
    }

    /// Translate in one request.
    ///
    /// Same-language requests and empty text return the source text
    /// unchanged without calling the engine.
    ///
    /// # Errors
    ///
    /// [`SpeechError::TranslationFailed`] when the target language is missing,
    /// the engine fails, or the engine answers with no text.
    pub async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResult> {
        match Self::plan(request)? {
            Plan::Identity { from, to } => {
                debug!(to = %to.code, "translation skipped: identity");
                Ok(TranslationResult {
                    translated_text: request.text.clone(),
                    from_lang: from,
                    to_lang: to,
                    source_text: request.text.clone(),
                })
            }
            Plan::Remote(input) => {
                let output = self.engine.translate(&input).await?;
                let translated = output.trim();
                if translated.is_empty() {
                    return Err(SpeechError::TranslationFailed(
                        "engine returned no text".into(),
                    ));
                }
                Ok(TranslationResult {
                    translated_text: translated.to_owned(),
                    from_lang: input.source,
                    to_lang: input.target,
                    source_text: request.text.clone(),
                })
            }
        }
    }

    /// Translate as a stream of fragments.
    ///
    /// Every text fragment ends in whitespace so naive concatenation reads
    /// correctly. A failure at any point yields one
    /// [`TranslationFragment::Error`] and ends the stream.
    pub fn translate_stream(&self, request: &TranslationRequest) -> FragmentStream {
        let engine = Arc::clone(&self.engine);
        let plan = Self::plan(request);
        let source_text = request.text.clone();

        Box::pin(async_stream::stream! {
            let input = match plan {
                Ok(Plan::Remote(input)) => input,
                Ok(Plan::Identity { .. }) => {
                    if !source_text.is_empty() {
                        yield TranslationFragment::Text(terminate_fragment(source_text));
                    }
                    return;
                }
                Err(e) => {
                    yield TranslationFragment::Error(failure_message(e));
                    return;
                }
            };

            let mut inner = match engine.translate_stream(&input).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "translation stream failed to open");
                    yield TranslationFragment::Error(failure_message(e));
                    return;
                }
            };

            while let Some(item) = inner.next().await {
                match item {
                    Ok(piece) if piece.is_empty() => {}
                    Ok(piece) => {
                        yield TranslationFragment::Text(terminate_fragment(piece));
                    }
                    Err(e) => {
                        warn!(error = %e, "translation stream failed mid-way");
                        yield TranslationFragment::Error(failure_message(e));
                        return;
                    }
                }
            }
        })
    }
}

/// Sentinel text for a failed stream. Translation failures drop their own
/// prefix so the sentinel and the resulting error read once.
fn failure_message(err: SpeechError) -> String {
    match err {
        SpeechError::TranslationFailed(message) => message,
        other => other.to_string(),
    }
}

/// Append a single space unless the fragment already ends in whitespace.
fn terminate_fragment(mut fragment: String) -> String {
    if !fragment.ends_with(char::is_whitespace) {
        fragment.push(' ');
    }
    fragment
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Engine replaying fixed pieces, optionally failing after `fail_after`.
    pub(crate) struct ScriptedEngine {
        pub pieces: Vec<&'static str>,
        pub fail_after: Option<usize>,
        pub calls: AtomicUsize,
    }

    impl ScriptedEngine {
        pub(crate) fn new(pieces: Vec<&'static str>) -> Self {
            Self {
                pieces,
                fail_after: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing_after(pieces: Vec<&'static str>, n: usize) -> Self {
            Self {
                fail_after: Some(n),
                ..Self::new(pieces)
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationEngine for ScriptedEngine {
        async fn translate(&self, _input: &EngineInput) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some() {
                return Err(SpeechError::TranslationFailed("engine down".into()));
            }
            Ok(self.pieces.concat())
        }

        async fn translate_stream(&self, _input: &EngineInput) -> Result<TextStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut items: Vec<Result<String>> =
                self.pieces.iter().map(|p| Ok((*p).to_owned())).collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(SpeechError::TranslationFailed(
                    "connection reset".into(),
                )));
            }
            Ok(Box::pin(futures_util::stream::iter(items)))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn client(engine: &Arc<ScriptedEngine>) -> TranslationClient {
        TranslationClient::new(Arc::clone(engine) as Arc<dyn TranslationEngine>)
    }

    async fn collect(stream: FragmentStream) -> Vec<TranslationFragment> {
        stream.collect().await
    }

    #[tokio::test]
    async fn identity_translation_skips_engine() {
        let engine = Arc::new(ScriptedEngine::new(vec!["should not be used"]));
        let client = client(&engine);

        for (from, to) in [("en", "en"), ("EN", "english"), ("Klingon", "klingon")] {
            let result = client
                .translate(&TranslationRequest::new("Hello there", Some(from), to))
                .await
                .unwrap();
            assert_eq!(result.translated_text, "Hello there");
            assert!(result.is_identity());
        }
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn identity_stream_yields_source_once() {
        let engine = Arc::new(ScriptedEngine::new(vec!["x"]));
        let fragments = collect(
            client(&engine).translate_stream(&TranslationRequest::new("Hola", Some("es"), "ES")),
        )
        .await;
        assert_eq!(fragments, vec![TranslationFragment::Text("Hola ".into())]);
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn empty_text_never_reaches_engine() {
        let engine = Arc::new(ScriptedEngine::new(vec!["x"]));
        let client = client(&engine);
        let result = client
            .translate(&TranslationRequest::new("", Some("en"), "es"))
            .await
            .unwrap();
        assert_eq!(result.translated_text, "");
        let fragments =
            collect(client.translate_stream(&TranslationRequest::new("", Some("en"), "es"))).await;
        assert!(fragments.is_empty());
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn one_shot_output_is_trimmed() {
        let engine = Arc::new(ScriptedEngine::new(vec!["  Hola ", "a todos\n"]));
        let result = client(&engine)
            .translate(&TranslationRequest::new("Hello everyone", Some("en"), "Spanish"))
            .await
            .unwrap();
        assert_eq!(result.translated_text, "Hola a todos");
        assert_eq!(result.to_lang.code, "es");
        assert_eq!(result.from_lang.unwrap().code, "en");
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn empty_engine_output_is_failure() {
        let engine = Arc::new(ScriptedEngine::new(vec!["   "]));
        let err = client(&engine)
            .translate(&TranslationRequest::new("Hello", None::<String>, "es"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::TranslationFailed(_)));
    }

    #[tokio::test]
    async fn missing_target_is_failure() {
        let engine = Arc::new(ScriptedEngine::new(vec!["x"]));
        let err = client(&engine)
            .translate(&TranslationRequest::new("Hello", Some("en"), "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::TranslationFailed(_)));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn fragments_end_in_whitespace_and_empties_drop() {
        let engine = Arc::new(ScriptedEngine::new(vec!["Hola", "", "a todos\n", "y"]));
        let fragments = collect(
            client(&engine).translate_stream(&TranslationRequest::new("hi", Some("en"), "es")),
        )
        .await;
        assert_eq!(
            fragments,
            vec![
                TranslationFragment::Text("Hola ".into()),
                TranslationFragment::Text("a todos\n".into()),
                TranslationFragment::Text("y ".into()),
            ]
        );
    }

    #[tokio::test]
    async fn streaming_reconstructs_one_shot_modulo_whitespace() {
        let engine = Arc::new(ScriptedEngine::new(vec!["Hola", " a", " todos.", " ¿Qué tal?"]));
        let client = client(&engine);
        let request = TranslationRequest::new("Hello all. How are you?", Some("en"), "es");

        let one_shot = client.translate(&request).await.unwrap().translated_text;
        let streamed: String = collect(client.translate_stream(&request))
            .await
            .iter()
            .map(|f| f.as_str().into_owned())
            .collect();

        let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(squash(&streamed), squash(&one_shot));
    }

    #[tokio::test]
    async fn mid_stream_failure_yields_sentinel_last() {
        let engine = Arc::new(ScriptedEngine::failing_after(vec!["Uno", "Dos", "Tres"], 2));
        let fragments = collect(
            client(&engine).translate_stream(&TranslationRequest::new("x", Some("en"), "es")),
        )
        .await;

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0], TranslationFragment::Text("Uno ".into()));
        assert_eq!(fragments[1], TranslationFragment::Text("Dos ".into()));
        assert!(fragments[2].is_error());
        let sentinel = fragments[2].as_str();
        assert!(sentinel.starts_with("[translation_error]: "));
        assert!(sentinel.contains("connection reset"));
        assert!(sentinel.ends_with('\n'));
    }

    #[test]
    fn prompt_names_languages() {
        let es = language::normalize("es").unwrap();
        let en = language::normalize("en").unwrap();

        let explicit = build_prompt("Hello", Some(&en), &es);
        assert!(explicit.contains("Source language is English."));
        assert!(explicit.contains("Translate to Spanish."));
        assert!(explicit.ends_with("Source text: Hello"));

        let detect = build_prompt("Hello", None, &es);
        assert!(detect.contains("auto-detect the source language"));
        assert!(detect.contains("Only output the translation"));
    }
}
