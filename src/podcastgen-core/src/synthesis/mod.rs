//! Speech synthesis providers and the concurrent orchestrator.

pub mod http;
pub mod kokoro;
pub mod orchestrator;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::audio::AudioFormat;
use crate::error::Result;
use crate::prosody::ProsodySpec;

pub use http::{HttpSynthesizer, HttpSynthesizerConfig};
pub use kokoro::KokoroSynthesizer;
pub use orchestrator::{
    FailureMode, SegmentFailure, SynthesisOptions, SynthesisOrchestrator, SynthesisOutcome,
};

/// One segment's worth of work for a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Segment index the result belongs to.
    pub index: usize,
    pub text: String,
    pub voice_id: String,
    pub prosody: ProsodySpec,
}

/// An external text-to-speech capability.
///
/// All calls made for one generation must return audio in
/// [`SpeechSynthesizer::output_format`].
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn output_format(&self) -> AudioFormat;

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;
}

static TAGGED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:think|thinking|reasoning)\b[^>]*>.*?</(?:think|thinking|reasoning)>")
        .expect("valid regex")
});
static XML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][\w:-]*[^>]*>").expect("valid regex"));
static SPEAKER_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]|]+\|[^\]]*\]").expect("valid regex"));
static EMPHASIS_STARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*+|`+").expect("valid regex"));
static EMPHASIS_UNDERSCORES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_{1,2}([^_\s](?:[^_\n]*[^_\s])?)_{1,2}").expect("valid regex")
});
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip markup a speech engine would read aloud.
///
/// Returns the trimmed original if cleaning leaves nothing.
pub fn clean_text_for_speech(text: &str) -> String {
    let cleaned = TAGGED_BLOCK.replace_all(text, " ");
    let cleaned = XML_TAG.replace_all(&cleaned, "");
    let cleaned = SPEAKER_TAG.replace_all(&cleaned, " ");
    let cleaned = HEADING.replace_all(&cleaned, "");
    let cleaned = EMPHASIS_STARS.replace_all(&cleaned, "");
    let cleaned = strip_underscore_emphasis(&cleaned);
    let cleaned = WHITESPACE.replace_all(&cleaned, " ");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        text.trim().to_string()
    } else {
        cleaned.to_string()
    }
}

/// Unwrap `_word_` and `__word__` unless the underscores touch a word
/// character, so identifiers like `snake_case` survive.
fn strip_underscore_emphasis(text: &str) -> String {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in EMPHASIS_UNDERSCORES.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let before = text[..whole.start()].chars().next_back();
        let after = text[whole.end()..].chars().next();
        if is_word(before) || is_word(after) {
            continue;
        }
        out.push_str(&text[last..whole.start()]);
        out.push_str(inner.as_str());
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_strips_markdown_and_tags() {
        assert_eq!(
            clean_text_for_speech("**Welcome** to the <emphasis>show</emphasis>!"),
            "Welcome to the show!"
        );
    }

    #[test]
    fn test_clean_keeps_symbols_inside_words() {
        assert_eq!(
            clean_text_for_speech("We rewrote it in C# using snake_case names, issue #12."),
            "We rewrote it in C# using snake_case names, issue #12."
        );
    }

    #[test]
    fn test_clean_strips_headings_and_underscore_emphasis() {
        assert_eq!(
            clean_text_for_speech("## Part two: a _truly_ __bold__ idea with `code`"),
            "Part two: a truly bold idea with code"
        );
    }

    #[test]
    fn test_clean_strips_reasoning_blocks() {
        let input = "<think>\nplan the answer\n</think>The answer is 42.";
        assert_eq!(clean_text_for_speech(input), "The answer is 42.");
    }

    #[test]
    fn test_clean_strips_stray_speaker_tags() {
        assert_eq!(
            clean_text_for_speech("Thanks. [GUEST|calm] Sure thing."),
            "Thanks. Sure thing."
        );
    }

    #[test]
    fn test_clean_collapses_whitespace() {
        assert_eq!(clean_text_for_speech("  a \n\t b  "), "a b");
    }

    #[test]
    fn test_clean_falls_back_to_original() {
        assert_eq!(clean_text_for_speech(" *** "), "***");
    }
}
