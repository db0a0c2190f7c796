//! Pipeline orchestrator that wires all stages together.
//!
//! One run moves through staging, transcription, translation, voice
//! resolution and synthesis. [`PipelineOrchestrator::run`] executes the
//! stages strictly in sequence and returns a single aggregated result.
//! [`PipelineOrchestrator::run_streaming`] emits events as they happen:
//! voice resolution runs concurrently with translation streaming, and each
//! completed sentence is synthesized while later fragments are still
//! arriving.

use super::SPAN_PIPELINE_RUN;
use super::journal::{self, RunNotifier, RunSummary};
use super::messages::{
    PartialResults, PipelineEvent, PipelineFailure, PipelineRequest, PipelineResult,
    PipelineStage, RunMetadata,
};
use super::output::AudioFileSink;
use crate::config::PolyvoxConfig;
use crate::error::{Result, SpeechError};
use crate::language;
use crate::segment::SentenceAccumulator;
use crate::staging::{AudioArtifact, AudioSource, AudioStager};
use crate::synthesis::{SynthesisRequest, Synthesizer};
use crate::transcription::{TranscriptResult, Transcriber};
use crate::translation::{
    TranslationClient, TranslationEngine, TranslationFragment, TranslationRequest,
    TranslationResult,
};
use crate::voice_cache::{VoiceCloneCache, VoiceCloner, VoiceProvenance, VoiceResolution};
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Buffered events between a streaming run and its consumer.
const EVENT_CHANNEL_SIZE: usize = 32;

/// Events of one streaming run. Ends with `Completed` or `Failed`.
pub type PipelineEventStream = Pin<Box<dyn Stream<Item = PipelineEvent> + Send>>;

/// Outcome of a one-shot run.
pub type RunOutcome = std::result::Result<PipelineResult, Box<PipelineFailure>>;

/// Remote services a pipeline runs against.
pub struct Collaborators {
    /// Speech-to-text engine.
    pub transcriber: Arc<dyn Transcriber>,
    /// Translation engine.
    pub translator: Arc<dyn TranslationEngine>,
    /// Voice-cloning service.
    pub cloner: Arc<dyn VoiceCloner>,
    /// Text-to-speech engine.
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Sequences the pipeline stages. Cheap to clone; clones share the voice cache.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    config: Arc<PolyvoxConfig>,
    stager: AudioStager,
    transcriber: Arc<dyn Transcriber>,
    translation: TranslationClient,
    voices: Arc<VoiceCloneCache>,
    synthesizer: Arc<dyn Synthesizer>,
    notifier: Option<Arc<dyn RunNotifier>>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("stager", &self.stager)
            .field("translation", &self.translation)
            .field("voices", &self.voices)
            .finish_non_exhaustive()
    }
}

/// Per-run bookkeeping: visited stages and results so far.
struct RunState {
    run_id: Uuid,
    started: Instant,
    visited: Vec<PipelineStage>,
    partial: PartialResults,
}

impl RunState {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started: Instant::now(),
            visited: Vec::with_capacity(PipelineStage::ALL.len()),
            partial: PartialResults::default(),
        }
    }

    fn reach(&mut self, stage: PipelineStage) {
        self.visited.push(stage);
        debug!(%stage, "stage reached");
    }

    /// Close the run as failed at `stage`, mapping `cause` to that stage's error.
    fn fail(&mut self, stage: PipelineStage, cause: SpeechError) -> Box<PipelineFailure> {
        let cause = self.stage_error(stage, cause);
        if cause.is_cancellation() {
            info!(%stage, "pipeline run cancelled");
        } else {
            warn!(%stage, error = %cause, "pipeline run failed");
        }
        Box::new(PipelineFailure {
            run_id: self.run_id,
            stage,
            cause,
            partial: std::mem::take(&mut self.partial),
            stages_visited: self.visited.clone(),
            elapsed: self.started.elapsed(),
        })
    }

    fn stage_error(&self, stage: PipelineStage, err: SpeechError) -> SpeechError {
        match err {
            SpeechError::CancellationRequested
            | SpeechError::MalformedResponse(_)
            | SpeechError::Io(_) => err,
            SpeechError::TranscriptionFailed { .. } if stage == PipelineStage::Transcribed => err,
            SpeechError::TranslationFailed(_) if stage == PipelineStage::Translated => err,
            SpeechError::SynthesisFailed(_) if stage == PipelineStage::Synthesizing => err,
            other => match stage {
                PipelineStage::Transcribed => SpeechError::TranscriptionFailed {
                    artifact: self
                        .partial
                        .artifact
                        .as_ref()
                        .map(|a| a.fingerprint.clone())
                        .unwrap_or_default(),
                    message: other.to_string(),
                },
                PipelineStage::Translated => SpeechError::TranslationFailed(other.to_string()),
                PipelineStage::Synthesizing => SpeechError::SynthesisFailed(other.to_string()),
                _ => other,
            },
        }
    }
}

/// Run `work` unless `cancel` fires first.
async fn guarded<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SpeechError::CancellationRequested),
        out = work => out,
    }
}

fn translation_request(
    transcript: &TranscriptResult,
    from_lang: Option<String>,
    to_lang: String,
) -> TranslationRequest {
    TranslationRequest {
        text: transcript.text.clone(),
        from_lang: from_lang.or_else(|| transcript.detected_language.clone()),
        to_lang,
    }
}

impl PipelineOrchestrator {
    /// Build an orchestrator over `collaborators`.
    pub fn new(config: PolyvoxConfig, collaborators: Collaborators) -> Self {
        let stager = AudioStager::new(&config.staging);
        let voices = Arc::new(VoiceCloneCache::new(&config.voice, collaborators.cloner));
        Self {
            config: Arc::new(config),
            stager,
            transcriber: collaborators.transcriber,
            translation: TranslationClient::new(collaborators.translator),
            voices,
            synthesizer: collaborators.synthesizer,
            notifier: None,
        }
    }

    /// Notify `notifier` after every run.
    pub fn with_notifier(mut self, notifier: Arc<dyn RunNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &PolyvoxConfig {
        &self.config
    }

    /// Shared voice cache.
    pub fn voices(&self) -> &VoiceCloneCache {
        &self.voices
    }

    /// Execute every stage in sequence and return the aggregated result.
    ///
    /// # Errors
    ///
    /// A [`PipelineFailure`] naming the failed stage and carrying the results
    /// computed before it. Clone failures are not errors; the default voice
    /// is used instead.
    pub async fn run(&self, request: PipelineRequest, cancel: &CancellationToken) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            SPAN_PIPELINE_RUN,
            %run_id,
            mode = "one_shot",
            to_lang = %request.to_lang,
        );
        let mut state = RunState::new(run_id);
        let outcome = self
            .run_one_shot(&mut state, request, cancel)
            .instrument(span.clone())
            .await;
        span.in_scope(|| self.notify(&outcome));
        outcome
    }

    /// Execute the pipeline, emitting events as results become available.
    ///
    /// The run continues on its own task. It stops when `cancel` fires or the
    /// returned stream is dropped; either way partial output files are removed
    /// and open remote streams are closed.
    pub fn run_streaming(
        &self,
        request: PipelineRequest,
        cancel: CancellationToken,
    ) -> PipelineEventStream {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let run_id = Uuid::new_v4();
        let span = info_span!(
            SPAN_PIPELINE_RUN,
            %run_id,
            mode = "streaming",
            to_lang = %request.to_lang,
        );
        let this = self.clone();

        tokio::spawn(
            async move {
                let events = EventSender {
                    tx,
                    cancel: cancel.child_token(),
                };
                // Stops the voice task if the run ends before joining it.
                let _stop_subtasks = events.cancel.clone().drop_guard();
                let mut state = RunState::new(run_id);
                let run = this.stream_run(&mut state, request, &events);
                tokio::pin!(run);
                let outcome = tokio::select! {
                    outcome = &mut run => outcome,
                    () = events.tx.closed() => {
                        debug!("event receiver dropped, stopping run");
                        events.cancel.cancel();
                        run.await
                    }
                };
                this.notify(&outcome);
                let last = match outcome {
                    Ok(result) => PipelineEvent::Completed(Box::new(result)),
                    Err(failure) => PipelineEvent::Failed(failure),
                };
                if events.tx.send(last).await.is_err() {
                    debug!("event receiver dropped before the final event");
                }
            }
            .instrument(span),
        );

        Box::pin(ReceiverStream::new(rx))
    }

    fn notify(&self, outcome: &RunOutcome) {
        if self.notifier.is_none() {
            return;
        }
        let summary = match outcome {
            Ok(result) => RunSummary::from_result(result),
            Err(failure) => RunSummary::from_failure(failure),
        };
        journal::dispatch(self.notifier.as_ref(), summary);
    }

    async fn stage_input(
        &self,
        state: &mut RunState,
        source: AudioSource,
        cancel: &CancellationToken,
    ) -> std::result::Result<AudioArtifact, Box<PipelineFailure>> {
        let artifact = guarded(cancel, self.stager.stage_async(source))
            .await
            .map_err(|e| state.fail(PipelineStage::Staged, e))?;
        info!(
            fingerprint = %artifact.fingerprint,
            path = %artifact.staged_path.display(),
            "audio staged"
        );
        state.partial.artifact = Some(artifact.reference());
        state.reach(PipelineStage::Staged);
        Ok(artifact)
    }

    async fn transcribe(
        &self,
        state: &mut RunState,
        artifact: &AudioArtifact,
        from_lang: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<TranscriptResult, Box<PipelineFailure>> {
        let hint = if self.config.transcription.language_hint {
            from_lang.and_then(language::normalize).map(|l| l.code)
        } else {
            None
        };
        let transcript = guarded(
            cancel,
            self.transcriber.transcribe(artifact, hint.as_deref()),
        )
        .await
        .map_err(|e| state.fail(PipelineStage::Transcribed, e))?;
        info!(
            chars = transcript.text.len(),
            detected = ?transcript.detected_language,
            "transcribed"
        );
        state.partial.transcript = Some(transcript.clone());
        state.reach(PipelineStage::Transcribed);
        Ok(transcript)
    }

    fn synthesis_request(&self, text: &str, voice_id: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_owned(),
            voice_id: voice_id.to_owned(),
            model_id: self.config.synthesis.model_id.clone(),
            output_format: self.config.synthesis.output_format.clone(),
        }
    }

    fn metadata(&self, state: &RunState, voice_provenance: VoiceProvenance) -> RunMetadata {
        RunMetadata {
            run_id: state.run_id,
            stt_model_id: self.transcriber.model_id().to_owned(),
            translation_model: self.translation.model().to_owned(),
            tts_model_id: self.config.synthesis.model_id.clone(),
            output_format: self.config.synthesis.output_format.clone(),
            voice_provenance,
            elapsed: state.started.elapsed(),
        }
    }

    fn spawn_voice(
        &self,
        artifact: &AudioArtifact,
        name: Option<String>,
        description: Option<String>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<VoiceResolution>> {
        let voices = Arc::clone(&self.voices);
        let artifact = artifact.clone();
        tokio::spawn(
            async move {
                voices
                    .get_or_create_voice(
                        &artifact,
                        name.as_deref(),
                        description.as_deref(),
                        &cancel,
                    )
                    .await
            }
            .in_current_span(),
        )
    }

    async fn run_one_shot(
        &self,
        state: &mut RunState,
        request: PipelineRequest,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        info!("pipeline run started");
        let PipelineRequest {
            source,
            from_lang,
            to_lang,
            voice_name,
            voice_description,
            output_path,
        } = request;

        let artifact = self.stage_input(state, source, cancel).await?;
        let transcript = self
            .transcribe(state, &artifact, from_lang.as_deref(), cancel)
            .await?;

        let translation_request = translation_request(&transcript, from_lang, to_lang);
        let translation = guarded(cancel, self.translation.translate(&translation_request))
            .await
            .map_err(|e| state.fail(PipelineStage::Translated, e))?;
        state.partial.translation = Some(translation.clone());
        state.reach(PipelineStage::Translated);

        let voice = self
            .voices
            .get_or_create_voice(
                &artifact,
                voice_name.as_deref(),
                voice_description.as_deref(),
                cancel,
            )
            .await
            .map_err(|e| state.fail(PipelineStage::VoiceReady, e))?;
        info!(voice_id = %voice.voice_id, provenance = %voice.provenance, "voice ready");
        state.partial.voice = Some(voice.clone());
        state.reach(PipelineStage::VoiceReady);

        state.reach(PipelineStage::Synthesizing);
        let mut sink = match &output_path {
            Some(path) => Some(
                AudioFileSink::create(path)
                    .await
                    .map_err(|e| state.fail(PipelineStage::Synthesizing, e))?,
            ),
            None => None,
        };

        let mut audio = Vec::new();
        let text = translation.translated_text.trim();
        if text.is_empty() {
            debug!("empty translation, nothing to synthesize");
        } else {
            let synthesis = self.synthesis_request(text, &voice.voice_id);
            let mut chunks = guarded(cancel, self.synthesizer.synthesize(&synthesis))
                .await
                .map_err(|e| state.fail(PipelineStage::Synthesizing, e))?;
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        return Err(state.fail(
                            PipelineStage::Synthesizing,
                            SpeechError::CancellationRequested,
                        ));
                    }
                    next = chunks.next() => next,
                };
                match next {
                    None => break,
                    Some(Err(e)) => return Err(state.fail(PipelineStage::Synthesizing, e)),
                    Some(Ok(chunk)) => {
                        if let Some(sink) = sink.as_mut() {
                            sink.write(&chunk)
                                .await
                                .map_err(|e| state.fail(PipelineStage::Synthesizing, e))?;
                        }
                        audio.push(chunk);
                    }
                }
            }
        }

        if let Some(sink) = sink {
            sink.commit()
                .await
                .map_err(|e| state.fail(PipelineStage::Done, e))?;
        }
        state.reach(PipelineStage::Done);
        info!(chunks = audio.len(), "pipeline run complete");

        Ok(PipelineResult {
            transcript,
            translation,
            artifact: artifact.reference(),
            voice_id: voice.voice_id,
            audio,
            stages_visited: state.visited.clone(),
            metadata: self.metadata(state, voice.provenance),
        })
    }

    async fn stream_run(
        &self,
        state: &mut RunState,
        request: PipelineRequest,
        events: &EventSender,
    ) -> RunOutcome {
        info!("pipeline run started");
        let cancel = &events.cancel;
        let PipelineRequest {
            source,
            from_lang,
            to_lang,
            voice_name,
            voice_description,
            output_path,
        } = request;

        let artifact = self.stage_input(state, source, cancel).await?;
        events.stage(state, PipelineStage::Staged).await?;
        let transcript = self
            .transcribe(state, &artifact, from_lang.as_deref(), cancel)
            .await?;
        events.stage(state, PipelineStage::Transcribed).await?;

        let sink = match &output_path {
            Some(path) => Some(
                AudioFileSink::create(path)
                    .await
                    .map_err(|e| state.fail(PipelineStage::Synthesizing, e))?,
            ),
            None => None,
        };
        let voice_task = self.spawn_voice(&artifact, voice_name, voice_description, cancel.clone());
        let mut lane = SynthesisLane {
            orchestrator: self,
            events,
            voice: VoiceSlot::Pending(voice_task),
            sink,
            started: false,
        };

        let translation_request = translation_request(&transcript, from_lang, to_lang);
        let mut fragments = self.translation.translate_stream(&translation_request);
        let mut sentences = SentenceAccumulator::new();

        loop {
            let fragment = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(state.fail(
                        PipelineStage::Translated,
                        SpeechError::CancellationRequested,
                    ));
                }
                fragment = fragments.next() => fragment,
            };
            match fragment {
                None => break,
                Some(TranslationFragment::Error(message)) => {
                    events
                        .send(PipelineEvent::Fragment(TranslationFragment::Error(
                            message.clone(),
                        )))
                        .await
                        .map_err(|e| state.fail(PipelineStage::Translated, e))?;
                    return Err(state.fail(
                        PipelineStage::Translated,
                        SpeechError::TranslationFailed(message),
                    ));
                }
                Some(TranslationFragment::Text(text)) => {
                    state
                        .partial
                        .partial_translation
                        .get_or_insert_with(String::new)
                        .push_str(&text);
                    let ready = sentences.push(&text);
                    events
                        .send(PipelineEvent::Fragment(TranslationFragment::Text(text)))
                        .await
                        .map_err(|e| state.fail(PipelineStage::Translated, e))?;
                    for sentence in ready {
                        lane.speak(state, &sentence).await?;
                    }
                }
            }
        }
        // Close the remote translation stream before the tail is synthesized.
        drop(fragments);

        let streamed = state.partial.partial_translation.take().unwrap_or_default();
        let (from, to) = TranslationClient::resolve_languages(&translation_request)
            .map_err(|e| state.fail(PipelineStage::Translated, e))?;
        let translated_text = streamed.trim().to_owned();
        if translated_text.is_empty() && !transcript.text.trim().is_empty() {
            return Err(state.fail(
                PipelineStage::Translated,
                SpeechError::TranslationFailed("engine returned no text".into()),
            ));
        }
        let translation = TranslationResult {
            translated_text,
            from_lang: from,
            to_lang: to,
            source_text: transcript.text.clone(),
        };
        state.partial.translation = Some(translation.clone());
        state.reach(PipelineStage::Translated);
        events.stage(state, PipelineStage::Translated).await?;

        if let Some(rest) = sentences.finish() {
            lane.speak(state, &rest).await?;
        }
        let voice = lane.voice(state).await?;
        lane.begin(state).await?;

        if let Some(sink) = lane.sink.take() {
            sink.commit()
                .await
                .map_err(|e| state.fail(PipelineStage::Done, e))?;
        }
        state.reach(PipelineStage::Done);
        events.stage(state, PipelineStage::Done).await?;
        info!("pipeline run complete");

        Ok(PipelineResult {
            transcript,
            translation,
            artifact: artifact.reference(),
            voice_id: voice.voice_id,
            audio: Vec::new(),
            stages_visited: state.visited.clone(),
            metadata: self.metadata(state, voice.provenance),
        })
    }
}

/// Sending half of a streaming run's event channel.
struct EventSender {
    tx: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
}

impl EventSender {
    /// Deliver an event. A dropped receiver cancels the run.
    async fn send(&self, event: PipelineEvent) -> Result<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SpeechError::CancellationRequested),
            sent = self.tx.send(event) => sent.map_err(|_| {
                debug!("event receiver dropped, stopping run");
                self.cancel.cancel();
                SpeechError::CancellationRequested
            }),
        }
    }

    async fn stage(
        &self,
        state: &mut RunState,
        stage: PipelineStage,
    ) -> std::result::Result<(), Box<PipelineFailure>> {
        self.send(PipelineEvent::Stage(stage))
            .await
            .map_err(|e| state.fail(stage, e))
    }
}

enum VoiceSlot {
    Pending(JoinHandle<Result<VoiceResolution>>),
    Ready(VoiceResolution),
}

/// Synthesis side of a streaming run.
struct SynthesisLane<'a> {
    orchestrator: &'a PipelineOrchestrator,
    events: &'a EventSender,
    voice: VoiceSlot,
    sink: Option<AudioFileSink>,
    started: bool,
}

impl SynthesisLane<'_> {
    /// Wait for the concurrently resolving voice; announces `VoiceReady` once.
    async fn voice(
        &mut self,
        state: &mut RunState,
    ) -> std::result::Result<VoiceResolution, Box<PipelineFailure>> {
        let handle = match &mut self.voice {
            VoiceSlot::Ready(voice) => return Ok(voice.clone()),
            VoiceSlot::Pending(handle) => handle,
        };
        let cancel = &self.events.cancel;
        let joined = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(state.fail(
                    PipelineStage::VoiceReady,
                    SpeechError::CancellationRequested,
                ));
            }
            joined = handle => joined,
        };
        let voice = match joined {
            Ok(Ok(voice)) => voice,
            Ok(Err(e)) => return Err(state.fail(PipelineStage::VoiceReady, e)),
            Err(e) => {
                warn!(error = %e, "voice task failed, using default voice");
                VoiceResolution {
                    voice_id: self.orchestrator.voices.default_voice_id().to_owned(),
                    provenance: VoiceProvenance::Fallback,
                }
            }
        };
        info!(voice_id = %voice.voice_id, provenance = %voice.provenance, "voice ready");
        self.voice = VoiceSlot::Ready(voice.clone());
        state.partial.voice = Some(voice.clone());
        state.reach(PipelineStage::VoiceReady);
        self.events.stage(state, PipelineStage::VoiceReady).await?;
        Ok(voice)
    }

    /// Announce `Synthesizing` once.
    async fn begin(&mut self, state: &mut RunState) -> std::result::Result<(), Box<PipelineFailure>> {
        if !self.started {
            self.started = true;
            state.reach(PipelineStage::Synthesizing);
            self.events.stage(state, PipelineStage::Synthesizing).await?;
        }
        Ok(())
    }

    /// Synthesize one sentence, forwarding each chunk as it arrives.
    async fn speak(
        &mut self,
        state: &mut RunState,
        text: &str,
    ) -> std::result::Result<(), Box<PipelineFailure>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let voice = self.voice(state).await?;
        self.begin(state).await?;

        let events = self.events;
        let request = self.orchestrator.synthesis_request(text, &voice.voice_id);
        let mut chunks = guarded(
            &events.cancel,
            self.orchestrator.synthesizer.synthesize(&request),
        )
        .await
        .map_err(|e| state.fail(PipelineStage::Synthesizing, e))?;

        loop {
            let next = tokio::select! {
                biased;
                () = events.cancel.cancelled() => {
                    return Err(state.fail(
                        PipelineStage::Synthesizing,
                        SpeechError::CancellationRequested,
                    ));
                }
                next = chunks.next() => next,
            };
            match next {
                None => return Ok(()),
                Some(Err(e)) => return Err(state.fail(PipelineStage::Synthesizing, e)),
                Some(Ok(chunk)) => {
                    if let Some(sink) = self.sink.as_mut() {
                        sink.write(&chunk)
                            .await
                            .map_err(|e| state.fail(PipelineStage::Synthesizing, e))?;
                    }
                    events
                        .send(PipelineEvent::Audio(chunk))
                        .await
                        .map_err(|e| state.fail(PipelineStage::Synthesizing, e))?;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::{DEFAULT_VOICE_ID, StagingConfig};
    use crate::pipeline::journal::TranscriptJournal;
    use crate::synthesis::tests::EchoSynthesizer;
    use crate::translation::tests::ScriptedEngine;
    use crate::voice_cache::tests::FakeCloner;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Transcriber answering with fixed text, optionally gated or failing.
    pub(crate) struct FakeTranscriber {
        pub text: &'static str,
        pub fail: bool,
        pub gate: Option<Arc<Semaphore>>,
        pub calls: AtomicUsize,
    }

    impl FakeTranscriber {
        pub(crate) fn saying(text: &'static str) -> Self {
            Self {
                text,
                fail: false,
                gate: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(
            &self,
            artifact: &AudioArtifact,
            _language_hint: Option<&str>,
        ) -> Result<TranscriptResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if self.fail {
                return Err(SpeechError::TranscriptionFailed {
                    artifact: artifact.fingerprint.clone(),
                    message: "HTTP 503".into(),
                });
            }
            Ok(TranscriptResult {
                text: self.text.to_owned(),
                detected_language: Some("en".into()),
                artifact: artifact.reference(),
            })
        }

        fn model_id(&self) -> &str {
            "fake-stt"
        }
    }

    /// Orchestrator over fakes with a private staging directory.
    pub(crate) struct Harness {
        pub dir: tempfile::TempDir,
        pub transcriber: Arc<FakeTranscriber>,
        pub engine: Arc<ScriptedEngine>,
        pub cloner: Arc<FakeCloner>,
        pub synthesizer: Arc<EchoSynthesizer>,
    }

    impl Harness {
        pub(crate) fn new(transcript: &'static str, pieces: Vec<&'static str>) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                transcriber: Arc::new(FakeTranscriber::saying(transcript)),
                engine: Arc::new(ScriptedEngine::new(pieces)),
                cloner: Arc::new(FakeCloner::ok()),
                synthesizer: Arc::new(EchoSynthesizer::new(2)),
            }
        }

        pub(crate) fn orchestrator(&self) -> PipelineOrchestrator {
            let config = PolyvoxConfig {
                staging: StagingConfig {
                    dir: self.dir.path().join("staging"),
                    fingerprint_len: 16,
                },
                ..PolyvoxConfig::default()
            };
            PipelineOrchestrator::new(
                config,
                Collaborators {
                    transcriber: Arc::clone(&self.transcriber) as Arc<dyn Transcriber>,
                    translator: Arc::clone(&self.engine) as Arc<dyn TranslationEngine>,
                    cloner: Arc::clone(&self.cloner) as Arc<dyn VoiceCloner>,
                    synthesizer: Arc::clone(&self.synthesizer) as Arc<dyn Synthesizer>,
                },
            )
        }

        pub(crate) fn wav(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            write_wav(&path);
            path
        }

        fn request(&self, to: &str) -> PipelineRequest {
            PipelineRequest::new(AudioSource::File(self.wav("hello.wav")), to).from_lang("en")
        }
    }

    pub(crate) fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in [0i16, 120, -120, 480] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    async fn collect_events(stream: PipelineEventStream) -> Vec<PipelineEvent> {
        tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await
            .expect("streaming run must finish")
    }

    fn stages(events: &[PipelineEvent]) -> Vec<PipelineStage> {
        events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Stage(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn one_shot_visits_every_stage() {
        let h = Harness::new("Hello there", vec!["Hola", " a todos"]);
        let result = h
            .orchestrator()
            .run(h.request("es"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.stages_visited, PipelineStage::ALL);
        assert_eq!(result.transcript.text, "Hello there");
        assert_eq!(result.translation.translated_text, "Hola a todos");
        assert_eq!(result.translation.to_lang.code, "es");
        assert_eq!(result.voice_id, "voice-1");
        assert!(!result.audio.is_empty());
        assert!(result.audio_len() > 0);
        assert!(result.metadata.voice_cloned());
        assert_eq!(result.metadata.stt_model_id, "fake-stt");
        assert_eq!(result.metadata.translation_model, "scripted");
        assert_eq!(result.metadata.tts_model_id, "eleven_multilingual_v2");
        assert_eq!(h.synthesizer.texts(), vec!["Hola a todos"]);
    }

    #[tokio::test]
    async fn unsupported_input_makes_no_progress() {
        let h = Harness::new("unused", vec!["x"]);
        let notes = h.dir.path().join("notes.txt");
        std::fs::write(&notes, "hello").unwrap();

        let failure = h
            .orchestrator()
            .run(
                PipelineRequest::new(AudioSource::File(notes), "es"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Staged);
        assert!(matches!(failure.cause, SpeechError::UnsupportedFormat(_)));
        assert!(failure.stages_visited.is_empty());
        assert!(failure.partial.artifact.is_none());
        assert_eq!(h.transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn same_language_skips_translation_engine() {
        let h = Harness::new("Hello there", vec!["never"]);
        let result = h
            .orchestrator()
            .run(h.request("English"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.translation.translated_text, "Hello there");
        assert_eq!(h.engine.calls(), 0);
    }

    #[tokio::test]
    async fn transcription_failure_keeps_artifact() {
        let mut h = Harness::new("unused", vec!["x"]);
        h.transcriber = Arc::new(FakeTranscriber {
            fail: true,
            ..FakeTranscriber::saying("")
        });

        let failure = h
            .orchestrator()
            .run(h.request("es"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Transcribed);
        assert_eq!(failure.stages_visited, vec![PipelineStage::Staged]);
        let artifact = failure.partial.artifact.as_ref().unwrap();
        match &failure.cause {
            SpeechError::TranscriptionFailed { artifact: fp, .. } => {
                assert_eq!(fp, &artifact.fingerprint);
            }
            other => panic!("unexpected cause {other:?}"),
        }
        assert_eq!(h.engine.calls(), 0);
    }

    #[tokio::test]
    async fn translation_failure_keeps_transcript() {
        let mut h = Harness::new("Hello there", vec![]);
        h.engine = Arc::new(ScriptedEngine::failing_after(vec![], 0));

        let failure = h
            .orchestrator()
            .run(h.request("es"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Translated);
        assert!(matches!(failure.cause, SpeechError::TranslationFailed(_)));
        assert_eq!(
            failure.partial.transcript.as_ref().unwrap().text,
            "Hello there"
        );
        assert!(failure.to_string().starts_with("pipeline failed at translated"));
        assert_eq!(h.cloner.calls(), 0);
        assert!(h.synthesizer.texts().is_empty());
    }

    #[tokio::test]
    async fn clone_failure_uses_default_voice() {
        let mut h = Harness::new("Hello there", vec!["Hola"]);
        h.cloner = Arc::new(FakeCloner::failing());

        let result = h
            .orchestrator()
            .run(h.request("es"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.voice_id, DEFAULT_VOICE_ID);
        assert_eq!(result.metadata.voice_provenance, VoiceProvenance::Fallback);
        assert_eq!(result.stages_visited, PipelineStage::ALL);
    }

    #[tokio::test]
    async fn synthesis_failure_reports_partials_and_removes_output() {
        let mut h = Harness::new("Hello there", vec!["Hola"]);
        h.synthesizer = Arc::new(EchoSynthesizer {
            fail_on_voice: Some("voice-1".into()),
            ..EchoSynthesizer::new(1)
        });
        let out = h.dir.path().join("out").join("speech.mp3");

        let failure = h
            .orchestrator()
            .run(
                h.request("es").output_path(&out),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(failure.stage, PipelineStage::Synthesizing);
        assert!(matches!(failure.cause, SpeechError::SynthesisFailed(_)));
        assert_eq!(
            failure.partial.translation.as_ref().unwrap().translated_text,
            "Hola"
        );
        assert_eq!(failure.partial.voice.as_ref().unwrap().voice_id, "voice-1");
        assert!(!out.exists());
        assert!(!out.with_file_name("speech.mp3.part").exists());
    }

    #[tokio::test]
    async fn empty_transcript_completes_without_synthesis() {
        let h = Harness::new("", vec!["never"]);
        let result = h
            .orchestrator()
            .run(h.request("es"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.translation.translated_text, "");
        assert!(result.audio.is_empty());
        assert_eq!(result.voice_id, "voice-1");
        assert_eq!(result.stages_visited, PipelineStage::ALL);
        assert_eq!(h.engine.calls(), 0);
        assert!(h.synthesizer.texts().is_empty());
    }

    #[tokio::test]
    async fn output_file_written_on_success() {
        let h = Harness::new("Hello there", vec!["Hola"]);
        let out = h.dir.path().join("speech.mp3");

        let result = h
            .orchestrator()
            .run(h.request("es").output_path(&out), &CancellationToken::new())
            .await
            .unwrap();

        let written = std::fs::read(&out).unwrap();
        let expected: Vec<u8> = result.audio.iter().flat_map(|c| c.to_vec()).collect();
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_at_staging() {
        let h = Harness::new("Hello there", vec!["Hola"]);
        let token = CancellationToken::new();
        token.cancel();

        let failure = h.orchestrator().run(h.request("es"), &token).await.unwrap_err();
        assert!(failure.is_cancelled());
        assert_eq!(failure.stage, PipelineStage::Staged);
        assert!(failure.stages_visited.is_empty());
    }

    #[tokio::test]
    async fn repeated_runs_reuse_cloned_voice() {
        let h = Harness::new("Hello there", vec!["Hola"]);
        let orchestrator = h.orchestrator();
        let token = CancellationToken::new();

        let first = orchestrator.run(h.request("es"), &token).await.unwrap();
        let second = orchestrator.run(h.request("es"), &token).await.unwrap();

        assert_eq!(first.voice_id, second.voice_id);
        assert_eq!(second.metadata.voice_provenance, VoiceProvenance::CacheHit);
        assert_eq!(h.cloner.calls(), 1);
    }

    #[tokio::test]
    async fn notifier_receives_successful_run() {
        let h = Harness::new("Hello there", vec!["Hola"]);
        let journal = Arc::new(TranscriptJournal::new("guest"));
        let orchestrator = h
            .orchestrator()
            .with_notifier(Arc::clone(&journal) as Arc<dyn RunNotifier>);

        orchestrator
            .run(h.request("es"), &CancellationToken::new())
            .await
            .unwrap();

        for _ in 0..100 {
            if journal.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let entries = journal.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "Hello there");
        assert_eq!(entries[1].text, "Hola");
        assert_eq!(entries[1].language, "es");
    }

    #[tokio::test]
    async fn streaming_emits_fragments_audio_and_result() {
        let h = Harness::new(
            "Hello everyone. How are you?",
            vec!["Hola", " a todos.", " ¿Cómo", " están?"],
        );
        let events = collect_events(
            h.orchestrator()
                .run_streaming(h.request("es"), CancellationToken::new()),
        )
        .await;

        let seen = stages(&events);
        assert_eq!(&seen[..2], &[PipelineStage::Staged, PipelineStage::Transcribed]);
        assert_eq!(seen.last(), Some(&PipelineStage::Done));
        for stage in PipelineStage::ALL {
            assert_eq!(seen.iter().filter(|s| **s == stage).count(), 1, "{stage}");
        }
        let voice_at = seen.iter().position(|s| *s == PipelineStage::VoiceReady).unwrap();
        let synth_at = seen.iter().position(|s| *s == PipelineStage::Synthesizing).unwrap();
        assert!(voice_at < synth_at);

        let fragments: String = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Fragment(f) => Some(f.as_str().into_owned()),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, "Hola  a todos.  ¿Cómo  están? ");

        let audio = events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Audio(_)))
            .count();
        assert_eq!(audio, 4);
        assert_eq!(
            h.synthesizer.texts(),
            vec!["Hola  a todos.", "¿Cómo  están?"]
        );

        match events.last().unwrap() {
            PipelineEvent::Completed(result) => {
                assert_eq!(result.translation.translated_text, "Hola  a todos.  ¿Cómo  están?");
                assert_eq!(result.voice_id, "voice-1");
                assert!(result.audio.is_empty());
                assert_eq!(result.stages_visited, seen);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn streaming_mid_stream_failure_ends_failed_at_translated() {
        let mut h = Harness::new("Hello there friend", vec![]);
        h.engine = Arc::new(ScriptedEngine::failing_after(vec!["Hola", "amigo", "mío"], 2));

        let events = collect_events(
            h.orchestrator()
                .run_streaming(h.request("es"), CancellationToken::new()),
        )
        .await;

        let fragments: Vec<&TranslationFragment> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Fragment(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(fragments.len(), 3);
        assert!(!fragments[0].is_error());
        assert!(!fragments[1].is_error());
        assert!(fragments[2].is_error());

        assert!(!stages(&events).contains(&PipelineStage::Done));
        match events.last().unwrap() {
            PipelineEvent::Failed(failure) => {
                assert_eq!(failure.stage, PipelineStage::Translated);
                assert!(matches!(failure.cause, SpeechError::TranslationFailed(_)));
                assert_eq!(
                    failure.partial.partial_translation.as_deref(),
                    Some("Hola amigo ")
                );
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn streaming_cancellation_releases_run() {
        let gate = Arc::new(Semaphore::new(0));
        let mut h = Harness::new("Hello", vec!["Hola"]);
        h.transcriber = Arc::new(FakeTranscriber {
            gate: Some(Arc::clone(&gate)),
            ..FakeTranscriber::saying("Hello")
        });
        let token = CancellationToken::new();
        let stream = h.orchestrator().run_streaming(h.request("es"), token.clone());

        while h.transcriber.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();

        let events = collect_events(stream).await;
        match events.last().unwrap() {
            PipelineEvent::Failed(failure) => {
                assert!(failure.is_cancelled());
                assert_eq!(failure.stage, PipelineStage::Transcribed);
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_stream_stops_blocked_run() {
        let gate = Arc::new(Semaphore::new(0));
        let mut h = Harness::new("Hello", vec!["Hola"]);
        h.transcriber = Arc::new(FakeTranscriber {
            gate: Some(Arc::clone(&gate)),
            ..FakeTranscriber::saying("Hello")
        });
        let stream = h
            .orchestrator()
            .run_streaming(h.request("es"), CancellationToken::new());

        while h.transcriber.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(stream);

        // The run task owns the only other handle to the transcriber.
        tokio::time::timeout(Duration::from_secs(2), async {
            while Arc::strong_count(&h.transcriber) > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("run must stop while transcription is still blocked");
        assert_eq!(gate.available_permits(), 0);
    }

    #[tokio::test]
    async fn streaming_empty_transcript_completes() {
        let h = Harness::new("", vec!["never"]);
        let events = collect_events(
            h.orchestrator()
                .run_streaming(h.request("es"), CancellationToken::new()),
        )
        .await;

        assert!(events.iter().all(|e| !matches!(e, PipelineEvent::Audio(_))));
        assert!(matches!(events.last(), Some(PipelineEvent::Completed(_))));
        assert_eq!(stages(&events).last(), Some(&PipelineStage::Done));
        assert_eq!(h.engine.calls(), 0);
    }

    #[tokio::test]
    async fn streaming_writes_output_file() {
        let h = Harness::new("Hello there", vec!["Hola."]);
        let out = h.dir.path().join("stream.mp3");
        let events = collect_events(
            h.orchestrator()
                .run_streaming(h.request("es").output_path(&out), CancellationToken::new()),
        )
        .await;

        let streamed: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Audio(chunk) => Some(chunk.to_vec()),
                _ => None,
            })
            .flatten()
            .collect();
        assert!(!streamed.is_empty());
        assert_eq!(std::fs::read(&out).unwrap(), streamed);
    }
}
