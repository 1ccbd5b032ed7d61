//! Error types for the podcast pipeline.

use std::fmt;

use thiserror::Error;

/// Why a script line was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The line does not start with a `[SPEAKER|emotion]` tag.
    MissingTag,
    /// The tag has an empty speaker label.
    EmptySpeaker,
    /// The tag has an empty emotion.
    EmptyEmotion,
    /// The tag is not followed by any text.
    EmptyText,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ParseErrorKind::MissingTag => "expected a [SPEAKER|emotion] tag",
            ParseErrorKind::EmptySpeaker => "speaker label is empty",
            ParseErrorKind::EmptyEmotion => "emotion is empty",
            ParseErrorKind::EmptyText => "line has no text after the tag",
        };
        f.write_str(reason)
    }
}

/// A malformed script line. Parsing stops at the first one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {kind}: {content:?}")]
pub struct ParseError {
    /// 1-based physical line number.
    pub line: usize,
    /// The offending line, verbatim.
    pub content: String,
    pub kind: ParseErrorKind,
}

#[derive(Error, Debug)]
pub enum PodcastError {
    #[error("Script parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Script validation failed: {0}")]
    Validation(String),

    #[error("Synthesis failed for segments {failed:?}: {message}")]
    Synthesis { failed: Vec<usize>, message: String },

    #[error("Audio assembly error: {0}")]
    Assembly(String),

    #[error("Mastering error: {0}")]
    Mastering(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TTS error: {0}")]
    TtsError(String),

    #[error("Script generation error: {0}")]
    ScriptGeneration(String),

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generation cancelled")]
    Cancelled,
}

impl PodcastError {
    /// Stable identifier for the structured error surface.
    pub fn kind(&self) -> &'static str {
        match self {
            PodcastError::Parse(_) => "parse_error",
            PodcastError::Validation(_) => "validation_error",
            PodcastError::Synthesis { .. } => "synthesis_failure",
            PodcastError::Assembly(_) => "assembly_error",
            PodcastError::Mastering(_) => "mastering_error",
            PodcastError::ConfigError(_) => "config_error",
            PodcastError::TtsError(_) => "tts_error",
            PodcastError::ScriptGeneration(_) | PodcastError::OpenAIError(_) => {
                "script_generation_error"
            }
            PodcastError::Io(_) => "io_error",
            PodcastError::Cancelled => "cancelled",
        }
    }

    /// Segment indices attached to the error, if any.
    pub fn segment_indices(&self) -> &[usize] {
        match self {
            PodcastError::Synthesis { failed, .. } => failed,
            _ => &[],
        }
    }

    /// True for contract breaches inside the pipeline rather than bad input.
    pub fn is_internal(&self) -> bool {
        matches!(self, PodcastError::Assembly(_) | PodcastError::Mastering(_))
    }
}

pub type Result<T> = std::result::Result<T, PodcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError {
            line: 3,
            content: "HOST|excited] no leading bracket".to_string(),
            kind: ParseErrorKind::MissingTag,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("line 3:"));
        assert!(msg.contains("HOST|excited] no leading bracket"));
    }

    #[test]
    fn test_error_kinds_and_severity() {
        let synth = PodcastError::Synthesis {
            failed: vec![1, 4],
            message: "upstream 503".to_string(),
        };
        assert_eq!(synth.kind(), "synthesis_failure");
        assert_eq!(synth.segment_indices(), &[1, 4]);
        assert!(!synth.is_internal());

        let assembly = PodcastError::Assembly("format mismatch".to_string());
        assert!(assembly.is_internal());
        assert!(assembly.segment_indices().is_empty());
        assert!(PodcastError::Mastering("nan".to_string()).is_internal());
        assert!(!PodcastError::Validation("empty".to_string()).is_internal());
    }
}
