//! Configuration types for the translation pipeline.

use crate::error::{Result, SpeechError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Voice used whenever a clone cannot be created.
pub const DEFAULT_VOICE_ID: &str = "JBFqnCBsd6RMkjVDRZzb";

/// Top-level configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolyvoxConfig {
    /// Audio staging settings.
    pub staging: StagingConfig,
    /// Speech-to-text settings.
    pub transcription: TranscriptionConfig,
    /// Machine translation settings.
    pub translation: TranslationConfig,
    /// Voice cloning and cache settings.
    pub voice: VoiceConfig,
    /// Text-to-speech settings.
    pub synthesis: SynthesisConfig,
    /// Remote provider endpoints and credentials.
    pub providers: ProviderConfig,
}

/// Where and how incoming audio is staged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Directory receiving staged WAV files. Created on demand.
    pub dir: PathBuf,
    /// Number of hex characters kept from the SHA-256 fingerprint.
    pub fingerprint_len: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            dir: base.join("polyvox").join("recordings"),
            fingerprint_len: 16,
        }
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Remote STT model id.
    pub model_id: String,
    /// Pass the request's source language to the engine as a hint.
    pub language_hint: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model_id: "scribe_v1".to_owned(),
            language_hint: true,
        }
    }
}

/// Machine translation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Remote translation model name.
    pub model: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_owned(),
        }
    }
}

/// Voice cloning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Voice id substituted when clone creation fails.
    pub default_voice_id: String,
    /// Clone name used when the request does not name the voice.
    pub default_name: String,
    /// Clone description used when the request gives none.
    pub default_description: String,
    /// Maximum cached voices. `None` keeps every voice for the process lifetime.
    pub cache_capacity: Option<u64>,
    /// Cache the fallback voice after a failed clone so the same input is
    /// not retried. When false, the next request for the key clones again.
    pub cache_failures: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            default_voice_id: DEFAULT_VOICE_ID.to_owned(),
            default_name: "polyvox-speaker".to_owned(),
            default_description: "Voice cloned from captured speech".to_owned(),
            cache_capacity: None,
            cache_failures: true,
        }
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Remote TTS model id.
    pub model_id: String,
    /// Output encoding requested from the engine.
    pub output_format: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model_id: "eleven_multilingual_v2".to_owned(),
            output_format: "mp3_44100_128".to_owned(),
        }
    }
}

/// Remote provider endpoints.
///
/// Keys are never stored in the file; only the names of the environment
/// variables holding them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// ElevenLabs API base URL (STT, voice cloning, TTS).
    pub elevenlabs_base_url: String,
    /// Gemini API base URL (translation).
    pub gemini_base_url: String,
    /// Environment variable holding the ElevenLabs key.
    pub elevenlabs_api_key_env: String,
    /// Environment variable holding the Gemini key.
    pub gemini_api_key_env: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            elevenlabs_base_url: "https://api.elevenlabs.io".to_owned(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_owned(),
            elevenlabs_api_key_env: "ELEVENLABS_API_KEY".to_owned(),
            gemini_api_key_env: "GEMINI_API_KEY".to_owned(),
            timeout_seconds: 60,
        }
    }
}

impl ProviderConfig {
    /// Read the ElevenLabs key from its environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Config`] if the variable is unset or empty.
    pub fn elevenlabs_api_key(&self) -> Result<String> {
        read_key(&self.elevenlabs_api_key_env)
    }

    /// Read the Gemini key from its environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Config`] if the variable is unset or empty.
    pub fn gemini_api_key(&self) -> Result<String> {
        read_key(&self.gemini_api_key_env)
    }
}

fn read_key(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_owned()),
        _ => Err(SpeechError::Config(format!("{var} is not set"))),
    }
}

impl PolyvoxConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| SpeechError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/polyvox/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("polyvox").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("polyvox")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/polyvox-config/config.toml")
        }
    }

    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.staging.fingerprint_len == 0 || self.staging.fingerprint_len > 64 {
            return Err(SpeechError::Config(
                "staging.fingerprint_len must be between 1 and 64".into(),
            ));
        }
        if self.voice.default_voice_id.trim().is_empty() {
            return Err(SpeechError::Config(
                "voice.default_voice_id must not be empty".into(),
            ));
        }
        if self.voice.cache_capacity == Some(0) {
            return Err(SpeechError::Config(
                "voice.cache_capacity must be greater than 0 when set".into(),
            ));
        }
        if self.transcription.model_id.trim().is_empty() {
            return Err(SpeechError::Config(
                "transcription.model_id must not be empty".into(),
            ));
        }
        if self.translation.model.trim().is_empty() {
            return Err(SpeechError::Config(
                "translation.model must not be empty".into(),
            ));
        }
        if self.synthesis.model_id.trim().is_empty() {
            return Err(SpeechError::Config(
                "synthesis.model_id must not be empty".into(),
            ));
        }
        if self.providers.timeout_seconds == 0 {
            return Err(SpeechError::Config(
                "providers.timeout_seconds must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
