//! Audio staging: persists incoming audio as uniquely named WAV artifacts.
//!
//! Accepts either a WAV file on disk or a raw PCM buffer with a declared
//! format. Every staged artifact carries a content fingerprint (truncated
//! SHA-256 of the staged WAV bytes) that downstream stages use as an
//! identity key, so identical recordings staged under different names or at
//! different times share a fingerprint.

use crate::config::StagingConfig;
use crate::error::{Result, SpeechError};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Read size used while hashing so large recordings never load whole.
const HASH_CHUNK_SIZE: usize = 65_536;

/// Number of fingerprint characters appended to staged file names.
const NAME_FINGERPRINT_CHARS: usize = 8;

/// Attempts at finding a free staged file name before giving up.
const MAX_NAME_ATTEMPTS: usize = 64;

/// Base name used when the source has none (raw PCM without a label).
const DEFAULT_BASE_NAME: &str = "recording";

/// Last timestamp handed out by [`next_stamp_millis`].
static LAST_STAMP_MS: AtomicU64 = AtomicU64::new(0);

/// Sample layout of an audio buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// Bits per sample (integer PCM).
    pub bit_depth: u16,
}

impl AudioFormat {
    /// 16 kHz mono 16-bit, the layout capture devices usually send.
    pub const SPEECH_16K: Self = Self {
        sample_rate: 16_000,
        channels: 1,
        bit_depth: 16,
    };

    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bit_depth / 8)
    }

    /// Check that a raw PCM buffer of `len` bytes can be described by this format.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::UnsupportedFormat`] describing the first problem.
    pub fn validate_pcm(&self, len: usize) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SpeechError::UnsupportedFormat(
                "sample rate must be greater than 0".into(),
            ));
        }
        if !(1..=8).contains(&self.channels) {
            return Err(SpeechError::UnsupportedFormat(format!(
                "channel count {} outside 1..=8",
                self.channels
            )));
        }
        if !matches!(self.bit_depth, 8 | 16 | 24 | 32) {
            return Err(SpeechError::UnsupportedFormat(format!(
                "bit depth {} (expected 8, 16, 24 or 32)",
                self.bit_depth
            )));
        }
        if len == 0 {
            return Err(SpeechError::UnsupportedFormat("PCM buffer is empty".into()));
        }
        if len % self.frame_bytes() != 0 {
            return Err(SpeechError::UnsupportedFormat(format!(
                "PCM buffer of {len} bytes is not a whole number of {}-byte frames",
                self.frame_bytes()
            )));
        }
        Ok(())
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bit_depth,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

impl From<hound::WavSpec> for AudioFormat {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bit_depth: spec.bits_per_sample,
        }
    }
}

/// Audio handed to the pipeline.
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// A WAV file on disk.
    File(PathBuf),
    /// A complete RIFF/WAVE container held in memory.
    Wav {
        /// Container bytes, header included.
        bytes: Vec<u8>,
        /// Optional label used as the staged file's base name.
        name: Option<String>,
    },
    /// Raw little-endian integer PCM (8-bit is unsigned, wider depths signed).
    Pcm {
        /// Interleaved sample bytes.
        bytes: Vec<u8>,
        /// Declared layout of `bytes`.
        format: AudioFormat,
        /// Optional label used as the staged file's base name.
        name: Option<String>,
    },
}

/// Where a staged artifact came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// Copied from this file.
    File(PathBuf),
    /// Copied from an in-memory WAV container of this many bytes.
    Wav { byte_len: usize },
    /// Encoded from a PCM buffer of this many bytes.
    Pcm { byte_len: usize },
}

/// A staged, fingerprinted recording. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioArtifact {
    /// Input the artifact was staged from.
    pub origin: ArtifactOrigin,
    /// Sample layout of the staged WAV.
    pub format: AudioFormat,
    /// Truncated hex SHA-256 of the staged WAV bytes.
    pub fingerprint: String,
    /// Location of the staged WAV.
    pub staged_path: PathBuf,
}

/// Lightweight handle to an artifact carried by downstream results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    /// Location of the staged WAV.
    pub staged_path: PathBuf,
    /// Content fingerprint.
    pub fingerprint: String,
}

impl AudioArtifact {
    /// Reference to this artifact for downstream results.
    pub fn reference(&self) -> ArtifactRef {
        ArtifactRef {
            staged_path: self.staged_path.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Stages audio into a dedicated directory.
#[derive(Debug, Clone)]
pub struct AudioStager {
    dir: PathBuf,
    fingerprint_len: usize,
}

impl AudioStager {
    /// Create a stager from configuration. The directory is created lazily.
    pub fn new(config: &StagingConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            fingerprint_len: config.fingerprint_len.clamp(1, 64),
        }
    }

    /// Staging directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stage `source`, returning the new artifact.
    ///
    /// Performs blocking file I/O; async callers should use
    /// [`stage_async`](Self::stage_async).
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::UnsupportedFormat`] for anything that is not a
    /// `.wav` RIFF/WAVE file or valid raw PCM, and [`SpeechError::Io`] if the
    /// input cannot be read or the staged file cannot be written.
    pub fn stage(&self, source: &AudioSource) -> Result<AudioArtifact> {
        match source {
            AudioSource::File(path) => self.stage_file(path),
            AudioSource::Wav { bytes, name } => self.stage_wav_bytes(bytes, name.as_deref()),
            AudioSource::Pcm {
                bytes,
                format,
                name,
            } => self.stage_pcm(bytes, *format, name.as_deref()),
        }
    }

    /// Stage on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Same as [`stage`](Self::stage).
    pub async fn stage_async(&self, source: AudioSource) -> Result<AudioArtifact> {
        let stager = self.clone();
        tokio::task::spawn_blocking(move || stager.stage(&source))
            .await
            .map_err(|e| SpeechError::Io(io::Error::other(format!("staging task failed: {e}"))))?
    }

    fn stage_file(&self, path: &Path) -> Result<AudioArtifact> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if ext != "wav" {
            return Err(SpeechError::UnsupportedFormat(format!(
                "extension '.{ext}' (expected .wav)"
            )));
        }
        if !path.is_file() {
            return Err(SpeechError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("input file not found: {}", path.display()),
            )));
        }

        let format = {
            let reader = hound::WavReader::open(path).map_err(|e| {
                SpeechError::UnsupportedFormat(format!(
                    "{} is not a RIFF/WAVE file: {e}",
                    path.display()
                ))
            })?;
            AudioFormat::from(reader.spec())
        };

        let fingerprint = fingerprint_reader(File::open(path)?, self.fingerprint_len)?;
        let base = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(sanitize_name)
            .unwrap_or_default();

        let staged_path = self.write_unique(&base, &fingerprint, |out| {
            let mut input = File::open(path)?;
            io::copy(&mut input, out)?;
            Ok(())
        })?;

        debug!(
            source = %path.display(),
            staged = %staged_path.display(),
            %fingerprint,
            "staged WAV file"
        );

        Ok(AudioArtifact {
            origin: ArtifactOrigin::File(path.to_path_buf()),
            format,
            fingerprint,
            staged_path,
        })
    }

    fn stage_wav_bytes(&self, bytes: &[u8], name: Option<&str>) -> Result<AudioArtifact> {
        let format = hound::WavReader::new(io::Cursor::new(bytes))
            .map(|reader| AudioFormat::from(reader.spec()))
            .map_err(|e| {
                SpeechError::UnsupportedFormat(format!("buffer is not a RIFF/WAVE container: {e}"))
            })?;
        let fingerprint = fingerprint_reader(bytes, self.fingerprint_len)?;
        let base = name.map(sanitize_name).unwrap_or_default();

        let staged_path = self.write_unique(&base, &fingerprint, |out| out.write_all(bytes))?;

        debug!(
            bytes = bytes.len(),
            staged = %staged_path.display(),
            %fingerprint,
            "staged WAV buffer"
        );

        Ok(AudioArtifact {
            origin: ArtifactOrigin::Wav {
                byte_len: bytes.len(),
            },
            format,
            fingerprint,
            staged_path,
        })
    }

    fn stage_pcm(
        &self,
        bytes: &[u8],
        format: AudioFormat,
        name: Option<&str>,
    ) -> Result<AudioArtifact> {
        format.validate_pcm(bytes.len())?;
        let wav = encode_wav(bytes, format)?;
        let fingerprint = fingerprint_reader(wav.as_slice(), self.fingerprint_len)?;
        let base = name.map(sanitize_name).unwrap_or_default();

        let staged_path = self.write_unique(&base, &fingerprint, |out| {
            out.write_all(&wav)?;
            Ok(())
        })?;

        debug!(
            bytes = bytes.len(),
            staged = %staged_path.display(),
            %fingerprint,
            "staged PCM buffer"
        );

        Ok(AudioArtifact {
            origin: ArtifactOrigin::Pcm {
                byte_len: bytes.len(),
            },
            format,
            fingerprint,
            staged_path,
        })
    }

    /// Create a fresh file named `{base}_{millis}_{fp8}.wav` and fill it.
    ///
    /// The file is opened with `create_new`, so an existing file is never
    /// overwritten. A failed write removes the partial file.
    fn write_unique(
        &self,
        base: &str,
        fingerprint: &str,
        fill: impl FnOnce(&mut File) -> io::Result<()>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let base = if base.is_empty() {
            DEFAULT_BASE_NAME
        } else {
            base
        };
        let short = &fingerprint[..fingerprint.len().min(NAME_FINGERPRINT_CHARS)];

        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self
                .dir
                .join(format!("{base}_{}_{short}.wav", next_stamp_millis()));
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };
            if let Err(e) = fill(&mut file).and_then(|()| file.sync_all()) {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(e.into());
            }
            return Ok(path);
        }

        Err(SpeechError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free staged file name for '{base}'"),
        )))
    }
}

/// Strictly increasing wall-clock milliseconds for this process.
///
/// Two calls never return the same value, even within one millisecond.
pub fn next_stamp_millis() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let mut last = LAST_STAMP_MS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_STAMP_MS.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Hex SHA-256 of everything `reader` yields, truncated to `len` characters.
///
/// Reads in 64 KiB chunks.
pub fn fingerprint_reader(mut reader: impl Read, len: usize) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = format!("{:x}", hasher.finalize());
    Ok(digest[..len.min(digest.len())].to_owned())
}

/// Wrap raw PCM in a WAV container.
fn encode_wav(bytes: &[u8], format: AudioFormat) -> Result<Vec<u8>> {
    let wav_err = |e: hound::Error| SpeechError::UnsupportedFormat(format!("WAV encoding: {e}"));

    let mut cursor = Cursor::new(Vec::with_capacity(bytes.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, format.wav_spec()).map_err(wav_err)?;
        match format.bit_depth {
            8 => {
                for &b in bytes {
                    // Raw 8-bit PCM is unsigned; hound takes it centred on zero.
                    writer
                        .write_sample((i16::from(b) - 128) as i8)
                        .map_err(wav_err)?;
                }
            }
            16 => {
                for s in bytes.chunks_exact(2) {
                    writer
                        .write_sample(i16::from_le_bytes([s[0], s[1]]))
                        .map_err(wav_err)?;
                }
            }
            24 => {
                for s in bytes.chunks_exact(3) {
                    let v = i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8;
                    writer.write_sample(v).map_err(wav_err)?;
                }
            }
            _ => {
                for s in bytes.chunks_exact(4) {
                    writer
                        .write_sample(i32::from_le_bytes([s[0], s[1], s[2], s[3]]))
                        .map_err(wav_err)?;
                }
            }
        }
        writer.finalize().map_err(wav_err)?;
    }
    Ok(cursor.into_inner())
}

/// Keep the caller's base name, replacing only characters that cannot
/// appear in a file name on common platforms.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                '_'
            } else {
                c
            }
        })
        .collect();
    cleaned
        .trim_matches(|c: char| matches!(c, '_' | '.' | ' '))
        .to_owned()
}
