//! Audio clips and lossless assembly.
//!
//! Clips stay in their compressed/container form end to end. The assembler
//! splices payloads at the byte level; only [`codec`] decodes, and only the
//! mastering stage calls it.

pub mod assembler;
pub mod codec;
pub mod mp3;
pub mod wav;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use assembler::{AssemblyPiece, PauseSpec, assemble};

/// A payload that does not conform to its declared format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {format} data: {reason}")]
pub struct AudioFormatError {
    pub format: AudioFormat,
    pub reason: String,
}

impl AudioFormatError {
    pub(crate) fn new(format: AudioFormat, reason: impl Into<String>) -> Self {
        Self {
            format,
            reason: reason.into(),
        }
    }
}

/// Supported compressed/container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/wav",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp3" | "mpeg" | "audio/mpeg" => Ok(AudioFormat::Mp3),
            "wav" | "wave" | "audio/wav" => Ok(AudioFormat::Wav),
            other => Err(format!("unsupported audio format: {other}")),
        }
    }
}

/// Immutable audio bytes with probed metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    bytes: Vec<u8>,
    format: AudioFormat,
    duration_ms: u64,
}

impl AudioClip {
    /// Wrap `bytes`, deriving the duration from the payload itself.
    pub fn probe(bytes: Vec<u8>, format: AudioFormat) -> Result<Self, AudioFormatError> {
        let duration_ms = match format {
            AudioFormat::Wav => wav::parse(&bytes)?.duration_ms(),
            AudioFormat::Mp3 => mp3::parse(&bytes)?.duration_ms(),
        };
        Ok(Self {
            bytes,
            format,
            duration_ms,
        })
    }

    pub(crate) fn from_parts(bytes: Vec<u8>, format: AudioFormat, duration_ms: u64) -> Self {
        Self {
            bytes,
            format,
            duration_ms,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("MP3".parse::<AudioFormat>().unwrap(), AudioFormat::Mp3);
        assert_eq!("audio/wav".parse::<AudioFormat>().unwrap(), AudioFormat::Wav);
        assert!("ogg".parse::<AudioFormat>().is_err());
        assert_eq!(AudioFormat::Mp3.content_type(), "audio/mpeg");
    }

    #[test]
    fn test_probe_rejects_garbage() {
        let err = AudioClip::probe(b"not audio at all".to_vec(), AudioFormat::Wav).unwrap_err();
        assert_eq!(err.format, AudioFormat::Wav);
        assert!(AudioClip::probe(vec![0u8; 64], AudioFormat::Mp3).is_err());
    }
}
