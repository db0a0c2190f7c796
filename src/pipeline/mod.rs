//! Pipeline orchestration: stage sequencing, events, output files and
//! post-run notifications.

pub mod coordinator;
pub mod journal;
pub mod messages;
pub mod output;

/// Root span of one pipeline run. Carries `run_id`, `mode` and `to_lang`.
pub const SPAN_PIPELINE_RUN: &str = "polyvox.pipeline.run";

pub use coordinator::{Collaborators, PipelineEventStream, PipelineOrchestrator, RunOutcome};
pub use journal::{JournalEntry, RunNotifier, RunSummary, TranscriptJournal};
pub use messages::{
    PartialResults, PipelineEvent, PipelineFailure, PipelineRequest, PipelineResult,
    PipelineStage, RunMetadata,
};
pub use output::AudioFileSink;
