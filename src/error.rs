//! Error types for the polyvox pipeline.

/// Top-level error type for staging, the remote collaborators and the
/// orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Input is neither a recognised audio container nor valid raw PCM.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Speech-to-text engine or transport failure.
    #[error("transcription failed for {artifact}: {message}")]
    TranscriptionFailed {
        /// Fingerprint of the artifact being transcribed.
        artifact: String,
        /// Engine or transport error description.
        message: String,
    },

    /// A remote response could not be reduced to the expected shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Translation engine or transport failure.
    #[error("translation failed: {0}")]
    TranslationFailed(String),

    /// Voice clone creation failed. Recovered locally by the voice cache.
    #[error("voice clone creation failed: {0}")]
    CloneCreationFailed(String),

    /// Text-to-speech engine rejected the request or the stream broke.
    #[error("synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Session summary could not be produced.
    #[error("summary failed: {0}")]
    SummaryFailed(String),

    /// The run was cancelled at a suspension point.
    #[error("cancellation requested")]
    CancellationRequested,

    /// A caller request could not be interpreted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP client construction or transport error outside a stage.
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    /// Whether this error is the cancellation signal rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::CancellationRequested)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SpeechError>;
