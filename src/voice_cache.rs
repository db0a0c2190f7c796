//! Cloned-voice cache.
//!
//! Cloning a voice is the most expensive remote call in a run, so each
//! `(voice name, audio fingerprint)` pair is cloned at most once per process.
//! The cache's get-or-insert is a single synchronized step: concurrent
//! callers for one key wait on the in-flight clone instead of issuing their
//! own. Clone failures never reach the caller; the configured default voice
//! is substituted.

use crate::config::VoiceConfig;
use crate::error::{Result, SpeechError};
use crate::staging::AudioArtifact;
use async_trait::async_trait;
use moka::future::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Remote voice-cloning service.
#[async_trait]
pub trait VoiceCloner: Send + Sync {
    /// Create a cloned voice from reference recordings, returning its id.
    ///
    /// # Errors
    ///
    /// [`SpeechError::CloneCreationFailed`] on engine or transport errors.
    async fn create_voice(
        &self,
        name: &str,
        description: &str,
        files: &[PathBuf],
    ) -> Result<String>;
}

/// Cache key: voice name plus audio fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoiceKey {
    /// Voice name as sent to the cloner.
    pub name: String,
    /// Fingerprint of the reference recording.
    pub fingerprint: String,
}

#[derive(Debug, Clone)]
struct CachedVoice {
    voice_id: String,
    fallback: bool,
}

/// How a voice id was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceProvenance {
    /// This call created the clone.
    Cloned,
    /// A clone created earlier (or by a concurrent caller) was reused.
    CacheHit,
    /// Cloning failed and the default voice stands in.
    Fallback,
}

impl VoiceProvenance {
    /// Lower-case label for logs and metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloned => "cloned",
            Self::CacheHit => "cache_hit",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for VoiceProvenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved voice. `voice_id` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceResolution {
    /// Voice to synthesize with.
    pub voice_id: String,
    /// Where the id came from.
    pub provenance: VoiceProvenance,
}

/// Process-wide cache of cloned voices.
pub struct VoiceCloneCache {
    cache: Cache<VoiceKey, CachedVoice>,
    cloner: Arc<dyn VoiceCloner>,
    default_voice_id: String,
    default_name: String,
    default_description: String,
    cache_failures: bool,
}

impl std::fmt::Debug for VoiceCloneCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceCloneCache")
            .field("default_voice_id", &self.default_voice_id)
            .field("cache_failures", &self.cache_failures)
            .finish_non_exhaustive()
    }
}

impl VoiceCloneCache {
    /// Build a cache around `cloner`.
    ///
    /// With `cache_capacity` unset the cache never evicts.
    pub fn new(config: &VoiceConfig, cloner: Arc<dyn VoiceCloner>) -> Self {
        let mut builder = Cache::builder();
        if let Some(capacity) = config.cache_capacity {
            builder = builder.max_capacity(capacity);
        }
        Self {
            cache: builder.build(),
            cloner,
            default_voice_id: config.default_voice_id.clone(),
            default_name: config.default_name.clone(),
            default_description: config.default_description.clone(),
            cache_failures: config.cache_failures,
        }
    }

    /// Voice id substituted on clone failure.
    pub fn default_voice_id(&self) -> &str {
        &self.default_voice_id
    }

    /// Resolve the voice for `artifact`, cloning on first use.
    ///
    /// `name` and `description` fall back to the configured defaults when
    /// absent or blank. Clone failures resolve to the default voice.
    ///
    /// # Errors
    ///
    /// Only [`SpeechError::CancellationRequested`], when `cancel` fires
    /// before a voice is available. A cancelled waiter does not disturb the
    /// in-flight clone other callers are waiting on.
    pub async fn get_or_create_voice(
        &self,
        artifact: &AudioArtifact,
        name: Option<&str>,
        description: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<VoiceResolution> {
        let name = non_blank(name).unwrap_or(&self.default_name);
        let description = non_blank(description).unwrap_or(&self.default_description);
        let key = VoiceKey {
            name: name.to_owned(),
            fingerprint: artifact.fingerprint.clone(),
        };
        let path = artifact.staged_path.as_path();
        let initialized = AtomicBool::new(false);

        let lookup = async {
            if self.cache_failures {
                self.cache
                    .get_with(key, async {
                        initialized.store(true, Ordering::SeqCst);
                        match self.create_clone(name, description, path).await {
                            Ok(voice_id) => CachedVoice {
                                voice_id,
                                fallback: false,
                            },
                            Err(_) => self.fallback(),
                        }
                    })
                    .await
            } else {
                self.cache
                    .try_get_with(key, async {
                        initialized.store(true, Ordering::SeqCst);
                        self.create_clone(name, description, path)
                            .await
                            .map(|voice_id| CachedVoice {
                                voice_id,
                                fallback: false,
                            })
                    })
                    .await
                    .unwrap_or_else(|_| self.fallback())
            }
        };

        let cached = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SpeechError::CancellationRequested),
            cached = lookup => cached,
        };

        let provenance = if cached.fallback {
            VoiceProvenance::Fallback
        } else if initialized.load(Ordering::SeqCst) {
            VoiceProvenance::Cloned
        } else {
            VoiceProvenance::CacheHit
        };
        debug!(
            voice_id = %cached.voice_id,
            fingerprint = %artifact.fingerprint,
            %provenance,
            "voice resolved"
        );
        Ok(VoiceResolution {
            voice_id: cached.voice_id,
            provenance,
        })
    }

    /// Previously cached voice id for a key, without cloning.
    pub async fn cached_voice(&self, name: &str, fingerprint: &str) -> Option<String> {
        let key = VoiceKey {
            name: name.to_owned(),
            fingerprint: fingerprint.to_owned(),
        };
        self.cache.get(&key).await.map(|v| v.voice_id)
    }

    async fn create_clone(&self, name: &str, description: &str, path: &Path) -> Result<String> {
        let files = [path.to_path_buf()];
        let outcome = match self.cloner.create_voice(name, description, &files).await {
            Ok(id) if id.trim().is_empty() => Err(SpeechError::CloneCreationFailed(
                "cloner returned an empty voice id".into(),
            )),
            Ok(id) => Ok(id.trim().to_owned()),
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(voice_id) => info!(%voice_id, name, "voice cloned"),
            Err(e) => warn!(
                error = %e,
                name,
                fallback = %self.default_voice_id,
                "voice clone failed, using default voice"
            ),
        }
        outcome
    }

    fn fallback(&self) -> CachedVoice {
        CachedVoice {
            voice_id: self.default_voice_id.clone(),
            fallback: true,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
