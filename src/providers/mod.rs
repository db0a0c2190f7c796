//! HTTP adapters for the remote speech, translation and voice services.
//!
//! - [`elevenlabs::ElevenLabsClient`]: transcription, voice cloning, synthesis
//! - [`gemini::GeminiTranslator`]: translation
//!
//! Every request runs inside a [`SPAN_PROVIDER_REQUEST`] span carrying the
//! provider name and, where one applies, the model.

pub mod elevenlabs;
pub mod gemini;
pub mod http;
pub mod sse;

/// Span wrapping one provider request.
pub const SPAN_PROVIDER_REQUEST: &str = "polyvox.provider.request";

/// Provider name field (`"elevenlabs"`, `"gemini"`).
pub const FIELD_PROVIDER: &str = "provider";

/// Model identifier field.
pub const FIELD_MODEL: &str = "model";

pub use elevenlabs::ElevenLabsClient;
pub use gemini::GeminiTranslator;
