//! JSON request accepted by the host bridge.
//!
//! ```json
//! {"from_lang": "en", "to_lang": "es", "wav_path": "/tmp/hello.wav"}
//! {"to_lang": "fr", "audio_b64": "...", "sample_rate": 16000, "channels": 1, "bit_depth": 16}
//! ```
//!
//! `audio_b64` carries a WAV container unless the three PCM layout fields are
//! present, in which case it is raw little-endian PCM.

use crate::error::{Result, SpeechError};
use crate::pipeline::PipelineRequest;
use crate::staging::{AudioFormat, AudioSource};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One translation request from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Source language code or name. Omitted means auto-detect.
    #[serde(default)]
    pub from_lang: Option<String>,
    /// Target language code or name.
    pub to_lang: String,
    /// Base64 audio: a WAV container, or PCM when the layout fields are set.
    #[serde(default)]
    pub audio_b64: Option<String>,
    /// Path to a WAV file.
    #[serde(default)]
    pub wav_path: Option<PathBuf>,
    /// Name for the cloned voice.
    #[serde(default)]
    pub voice_name: Option<String>,
    /// Description for the cloned voice.
    #[serde(default)]
    pub voice_description: Option<String>,
    /// PCM sample rate in Hz.
    #[serde(default)]
    pub sample_rate: Option<u32>,
    /// PCM channel count.
    #[serde(default)]
    pub channels: Option<u16>,
    /// PCM bits per sample.
    #[serde(default)]
    pub bit_depth: Option<u16>,
    /// Also write the synthesized audio here.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
}

impl BridgeRequest {
    /// Parse a request document.
    ///
    /// # Errors
    ///
    /// [`SpeechError::InvalidRequest`] if the JSON is malformed or `to_lang`
    /// is missing.
    pub fn parse(input: &str) -> Result<Self> {
        serde_json::from_str(input.trim())
            .map_err(|e| SpeechError::InvalidRequest(format!("request JSON: {e}")))
    }

    /// PCM layout, when all three layout fields are given.
    ///
    /// # Errors
    ///
    /// [`SpeechError::InvalidRequest`] when only some of them are given.
    pub fn pcm_format(&self) -> Result<Option<AudioFormat>> {
        match (self.sample_rate, self.channels, self.bit_depth) {
            (None, None, None) => Ok(None),
            (Some(sample_rate), Some(channels), Some(bit_depth)) => Ok(Some(AudioFormat {
                sample_rate,
                channels,
                bit_depth,
            })),
            _ => Err(SpeechError::InvalidRequest(
                "sample_rate, channels and bit_depth must be given together".into(),
            )),
        }
    }

    /// Convert into a pipeline request.
    ///
    /// # Errors
    ///
    /// [`SpeechError::InvalidRequest`] if `to_lang` is blank, if not exactly
    /// one of `audio_b64` and `wav_path` is given, or if `audio_b64` is not
    /// valid base64.
    pub fn into_pipeline_request(self) -> Result<PipelineRequest> {
        if self.to_lang.trim().is_empty() {
            return Err(SpeechError::InvalidRequest("to_lang is required".into()));
        }
        let format = self.pcm_format()?;
        let source = match (&self.audio_b64, &self.wav_path) {
            (Some(encoded), None) => {
                let compact: String = encoded.split_whitespace().collect();
                let bytes = STANDARD
                    .decode(compact)
                    .map_err(|e| SpeechError::InvalidRequest(format!("audio_b64: {e}")))?;
                let name = self.voice_name.clone();
                match format {
                    Some(format) => AudioSource::Pcm {
                        bytes,
                        format,
                        name,
                    },
                    None => AudioSource::Wav { bytes, name },
                }
            }
            (None, Some(path)) => AudioSource::File(path.clone()),
            _ => {
                return Err(SpeechError::InvalidRequest(
                    "exactly one of audio_b64 and wav_path is required".into(),
                ));
            }
        };

        let mut request = PipelineRequest::new(source, self.to_lang);
        request.from_lang = self.from_lang.filter(|l| !l.trim().is_empty());
        request.voice_name = self.voice_name;
        request.voice_description = self.voice_description;
        request.output_path = self.output_path;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn wav_path_request() {
        let request = BridgeRequest::parse(
            r#"{"from_lang":"en","to_lang":"es","wav_path":"/tmp/a.wav","voice_name":"Ana"}"#,
        )
        .unwrap()
        .into_pipeline_request()
        .unwrap();
        assert!(matches!(request.source, AudioSource::File(ref p) if p == &PathBuf::from("/tmp/a.wav")));
        assert_eq!(request.from_lang.as_deref(), Some("en"));
        assert_eq!(request.to_lang, "es");
        assert_eq!(request.voice_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn base64_without_layout_is_wav() {
        let encoded = STANDARD.encode(b"RIFF....WAVE");
        let json = format!(r#"{{"to_lang":"fr","audio_b64":"{encoded}"}}"#);
        let request = BridgeRequest::parse(&json)
            .unwrap()
            .into_pipeline_request()
            .unwrap();
        match request.source {
            AudioSource::Wav { bytes, .. } => assert_eq!(bytes, b"RIFF....WAVE"),
            other => panic!("unexpected source {other:?}"),
        }
        assert!(request.from_lang.is_none());
    }

    #[test]
    fn base64_with_layout_is_pcm() {
        let encoded = STANDARD.encode([0u8, 0, 1, 0]);
        let json = format!(
            r#"{{"to_lang":"fr","audio_b64":"{encoded}","sample_rate":16000,"channels":1,"bit_depth":16}}"#
        );
        let request = BridgeRequest::parse(&json)
            .unwrap()
            .into_pipeline_request()
            .unwrap();
        match request.source {
            AudioSource::Pcm { bytes, format, .. } => {
                assert_eq!(bytes.len(), 4);
                assert_eq!(format, AudioFormat::SPEECH_16K);
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn partial_layout_rejected() {
        let request = BridgeRequest::parse(
            r#"{"to_lang":"fr","audio_b64":"AAAA","sample_rate":16000}"#,
        )
        .unwrap();
        assert!(matches!(
            request.into_pipeline_request(),
            Err(SpeechError::InvalidRequest(_))
        ));
    }

    #[test]
    fn both_or_neither_source_rejected() {
        for json in [
            r#"{"to_lang":"fr"}"#,
            r#"{"to_lang":"fr","audio_b64":"AAAA","wav_path":"/a.wav"}"#,
        ] {
            let err = BridgeRequest::parse(json)
                .unwrap()
                .into_pipeline_request()
                .unwrap_err();
            assert!(err.to_string().contains("exactly one"), "{err}");
        }
    }

    #[test]
    fn bad_base64_and_blank_target_rejected() {
        let bad = BridgeRequest::parse(r#"{"to_lang":"fr","audio_b64":"***"}"#).unwrap();
        assert!(bad.into_pipeline_request().is_err());
        let blank = BridgeRequest::parse(r#"{"to_lang":" ","wav_path":"/a.wav"}"#).unwrap();
        assert!(blank.into_pipeline_request().is_err());
    }

    #[test]
    fn missing_target_is_parse_error() {
        let err = BridgeRequest::parse(r#"{"wav_path":"/a.wav"}"#).unwrap_err();
        assert!(matches!(err, SpeechError::InvalidRequest(_)));
    }
}
