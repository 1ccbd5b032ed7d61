//! Script parsing and validation.
//!
//! A script is one `[SPEAKER|emotion] text` directive per physical line.
//! Blank lines are ignored. The first malformed line aborts parsing.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ParseError, ParseErrorKind, PodcastError, Result};
use crate::prosody::ProsodyTable;

/// Fixed speaking rate used for every duration estimate.
pub const WORDS_PER_MINUTE: f64 = 150.0;

/// Default per-segment word budget before splitting.
pub const DEFAULT_MAX_SEGMENT_WORDS: usize = 500;

/// Default cap on the number of segments after splitting.
pub const DEFAULT_MAX_SEGMENTS: usize = 1000;

/// One spoken line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Position in the script, zero-based and contiguous.
    pub index: usize,
    /// Label as written in the tag, case preserved. Whitespace just inside
    /// the brackets is not part of the label.
    pub speaker: String,
    /// Lower-cased emotion key.
    pub emotion: String,
    pub text: String,
    /// True when this piece continues the previous segment after a split.
    pub continuation: bool,
}

impl Segment {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Serialize back into script syntax.
    pub fn to_line(&self) -> String {
        format!("[{}|{}] {}", self.speaker, self.emotion, self.text)
    }
}

/// An ordered, non-empty sequence of segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    segments: Vec<Segment>,
}

impl Script {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_words(&self) -> usize {
        self.segments.iter().map(Segment::word_count).sum()
    }

    /// Estimated spoken duration in minutes.
    pub fn estimated_minutes(&self) -> f64 {
        self.total_words() as f64 / WORDS_PER_MINUTE
    }

    /// Distinct speaker labels in order of first appearance.
    pub fn speakers(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if !seen.contains(&segment.speaker.as_str()) {
                seen.push(&segment.speaker);
            }
        }
        seen
    }

    /// Re-serialize as script text, one directive per line.
    ///
    /// Continuation pieces are joined back onto their directive, so parsing
    /// the output with the same [`ParserOptions`] reproduces this script.
    pub fn to_script_text(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        for segment in &self.segments {
            match lines.last_mut() {
                Some(line) if segment.continuation => {
                    line.push(' ');
                    line.push_str(&segment.text);
                }
                _ => lines.push(segment.to_line()),
            }
        }
        lines.join("\n")
    }
}

/// Limits applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    pub max_segment_words: usize,
    pub max_segments: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_segment_words: DEFAULT_MAX_SEGMENT_WORDS,
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }
}

/// Parse with default limits.
pub fn parse(text: &str) -> Result<Script> {
    parse_with(text, &ParserOptions::default())
}

/// Parse script text into validated segments.
pub fn parse_with(text: &str, options: &ParserOptions) -> Result<Script> {
    if options.max_segment_words == 0 {
        return Err(PodcastError::ConfigError(
            "max_segment_words must be at least 1".to_string(),
        ));
    }

    let mut segments = Vec::new();

    for (line_idx, raw) in text.lines().enumerate() {
        if raw.trim().is_empty() {
            continue;
        }

        let (speaker, emotion, body) = parse_line(raw).map_err(|kind| ParseError {
            line: line_idx + 1,
            content: raw.to_string(),
            kind,
        })?;

        for (piece_idx, piece) in split_words(body, options.max_segment_words)
            .into_iter()
            .enumerate()
        {
            segments.push(Segment {
                index: segments.len(),
                speaker: speaker.to_string(),
                emotion: emotion.clone(),
                text: piece,
                continuation: piece_idx > 0,
            });
        }

        if segments.len() > options.max_segments {
            return Err(PodcastError::Validation(format!(
                "script has more than {} segments after splitting",
                options.max_segments
            )));
        }
    }

    if segments.is_empty() {
        return Err(PodcastError::Validation(
            "script contains no segments".to_string(),
        ));
    }

    Ok(Script { segments })
}

/// Split one directive into speaker, lower-cased emotion and trimmed text.
fn parse_line(raw: &str) -> std::result::Result<(&str, String, &str), ParseErrorKind> {
    let line = raw.trim();
    let rest = line.strip_prefix('[').ok_or(ParseErrorKind::MissingTag)?;
    let (tag, body) = rest.split_once(']').ok_or(ParseErrorKind::MissingTag)?;
    let (speaker, emotion) = tag.split_once('|').ok_or(ParseErrorKind::MissingTag)?;

    if emotion.contains('|') {
        return Err(ParseErrorKind::MissingTag);
    }

    let speaker = speaker.trim();
    if speaker.is_empty() {
        return Err(ParseErrorKind::EmptySpeaker);
    }

    let emotion = emotion.trim();
    if emotion.is_empty() {
        return Err(ParseErrorKind::EmptyEmotion);
    }

    let body = body.trim();
    if body.is_empty() {
        return Err(ParseErrorKind::EmptyText);
    }

    Ok((speaker, emotion.to_lowercase(), body))
}

/// Split text into pieces of at most `budget` words.
///
/// Uses the minimum number of pieces and, within that, cuts after the
/// latest sentence-ending word that still leaves the remainder fitting.
/// Text within budget is returned unchanged.
fn split_words(text: &str, budget: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= budget {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0;

    while words.len() - start > budget {
        let remaining = words.len() - start;
        let pieces_left = remaining.div_ceil(budget);
        // smallest cut that keeps the rest within pieces_left - 1 pieces
        let min_cut = remaining - (pieces_left - 1) * budget;

        let cut = (min_cut..=budget)
            .rev()
            .find(|&len| ends_sentence(words[start + len - 1]))
            .unwrap_or(budget);

        pieces.push(words[start..start + cut].join(" "));
        start += cut;
    }

    pieces.push(words[start..].join(" "));
    pieces
}

fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(['"', '\'', ')'])
        .ends_with(['.', '!', '?'])
}

/// Per-speaker totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpeakerStats {
    pub segments: usize,
    pub words: usize,
}

/// Aggregate statistics for a script, computed without synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_segments: usize,
    pub total_words: usize,
    pub estimated_duration_minutes: f64,
    pub speakers: BTreeMap<String, SpeakerStats>,
    pub emotions: BTreeMap<String, usize>,
}

impl Statistics {
    pub fn from_script(script: &Script) -> Self {
        let mut speakers: BTreeMap<String, SpeakerStats> = BTreeMap::new();
        let mut emotions: BTreeMap<String, usize> = BTreeMap::new();

        for segment in script.segments() {
            let words = segment.word_count();
            let entry = speakers.entry(segment.speaker.clone()).or_default();
            entry.segments += 1;
            entry.words += words;
            *emotions.entry(segment.emotion.clone()).or_default() += 1;
        }

        Self {
            total_segments: script.len(),
            total_words: script.total_words(),
            estimated_duration_minutes: script.estimated_minutes(),
            speakers,
            emotions,
        }
    }

    /// Emotions that the table does not know and will synthesize as neutral.
    pub fn unrecognized_emotions(&self, table: &ProsodyTable) -> Vec<&str> {
        self.emotions
            .keys()
            .filter(|emotion| {
                !table.contains(emotion) && emotion.as_str() != crate::prosody::AUTO_EMOTION
            })
            .map(String::as_str)
            .collect()
    }
}

/// Parse with default limits and aggregate statistics.
pub fn validate(text: &str) -> Result<Statistics> {
    validate_with(text, &ParserOptions::default())
}

pub fn validate_with(text: &str, options: &ParserOptions) -> Result<Statistics> {
    parse_with(text, options).map(|script| Statistics::from_script(&script))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_parse_two_segments() {
        let script = parse("[HOST|enthusiastic] Hello!\n[GUEST|calm] Hi there!").unwrap();
        assert_eq!(script.len(), 2);

        let first = &script.segments()[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.speaker, "HOST");
        assert_eq!(first.emotion, "enthusiastic");
        assert_eq!(first.text, "Hello!");

        let second = &script.segments()[1];
        assert_eq!(second.index, 1);
        assert_eq!(second.speaker, "GUEST");
        assert_eq!(second.emotion, "calm");
        assert_eq!(second.text, "Hi there!");
    }

    #[test]
    fn test_blank_lines_do_not_affect_index() {
        let script = parse("\n\n[HOST|calm] One.\n   \n\t\n[GUEST|calm] Two.\n\n").unwrap();
        let indices: Vec<usize> = script.segments().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_missing_bracket_reports_line() {
        let text = "[HOST|calm] fine\n\nHOST|excited] no leading bracket";
        match parse(text) {
            Err(PodcastError::Parse(err)) => {
                assert_eq!(err.line, 3);
                assert_eq!(err.content, "HOST|excited] no leading bracket");
                assert_eq!(err.kind, ParseErrorKind::MissingTag);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_stops_at_first_error() {
        let err = match parse("no tag here\n[HOST] also bad") {
            Err(PodcastError::Parse(err)) => err,
            other => panic!("expected parse error, got {other:?}"),
        };
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_structural_errors() {
        let kind = |text: &str| match parse(text) {
            Err(PodcastError::Parse(err)) => err.kind,
            other => panic!("expected parse error for {text:?}, got {other:?}"),
        };
        assert_eq!(kind("[|calm] text"), ParseErrorKind::EmptySpeaker);
        assert_eq!(kind("[HOST|] text"), ParseErrorKind::EmptyEmotion);
        assert_eq!(kind("[HOST|calm]   "), ParseErrorKind::EmptyText);
        assert_eq!(kind("[HOST calm] text"), ParseErrorKind::MissingTag);
        assert_eq!(kind("[HOST|calm|x] text"), ParseErrorKind::MissingTag);
    }

    #[test]
    fn test_speaker_verbatim_emotion_lowercased() {
        let script = parse("[Dr. Chen|EXCITED] Wow.").unwrap();
        assert_eq!(script.segments()[0].speaker, "Dr. Chen");
        assert_eq!(script.segments()[0].emotion, "excited");
    }

    #[test]
    fn test_speaker_padding_inside_tag_is_dropped() {
        let script = parse("[ Dr. Chen |calm] Hello.\n[host|calm] Hi.").unwrap();
        assert_eq!(script.segments()[0].speaker, "Dr. Chen");
        assert_eq!(script.segments()[1].speaker, "host");
    }

    #[test]
    fn test_empty_script_is_validation_error() {
        assert!(matches!(parse(""), Err(PodcastError::Validation(_))));
        assert!(matches!(parse("\n  \n"), Err(PodcastError::Validation(_))));
    }

    #[test]
    fn test_round_trip() {
        let text = "[HOST|Greeting] Welcome to the show.\n\n[CO-HOST|excited]   Great to be here!\n[GUEST|unknown-mood] Thanks, both of you.";
        let script = parse(text).unwrap();
        let reparsed = parse(&script.to_script_text()).unwrap();
        assert_eq!(script, reparsed);
    }

    #[test]
    fn test_round_trip_with_split_segments() {
        let options = ParserOptions {
            max_segment_words: 3,
            ..ParserOptions::default()
        };
        let script = parse_with("[HOST|calm] a b c. d e f g\n[GUEST|sad] h i", &options).unwrap();
        assert_eq!(script.len(), 4);

        let text = script.to_script_text();
        assert_eq!(text.lines().count(), 2);
        assert_eq!(parse_with(&text, &options).unwrap(), script);
    }

    #[test]
    fn test_split_exactly_twice_budget() {
        let options = ParserOptions {
            max_segment_words: 10,
            ..ParserOptions::default()
        };
        let body = "One two three. Four five six seven. Eight nine ten eleven twelve. Thirteen fourteen fifteen sixteen seventeen eighteen nineteen twenty.";
        assert_eq!(body.split_whitespace().count(), 20);

        let script = parse_with(&format!("[HOST|calm] {body}"), &options).unwrap();
        assert_eq!(script.len(), 2);
        for segment in script.segments() {
            assert!(segment.word_count() <= 10);
            assert_eq!(segment.speaker, "HOST");
            assert_eq!(segment.emotion, "calm");
        }
        assert!(!script.segments()[0].continuation);
        assert!(script.segments()[1].continuation);

        let joined = script
            .segments()
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let normalized = body.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(joined, normalized);
    }

    #[test]
    fn test_split_default_budget() {
        let script = parse(&format!("[HOST|calm] {}", words(1000))).unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script.segments()[0].word_count(), 500);
        assert_eq!(script.segments()[1].word_count(), 500);
    }

    #[test]
    fn test_split_prefers_sentence_boundary() {
        let options = ParserOptions {
            max_segment_words: 5,
            ..ParserOptions::default()
        };
        let script = parse_with("[HOST|calm] a b c. d e f g", &options).unwrap();
        assert_eq!(script.segments()[0].text, "a b c.");
        assert_eq!(script.segments()[1].text, "d e f g");
    }

    #[test]
    fn test_split_indices_continue() {
        let options = ParserOptions {
            max_segment_words: 3,
            ..ParserOptions::default()
        };
        let script = parse_with("[HOST|calm] a b c d e f g\n[GUEST|sad] h", &options).unwrap();
        let view: Vec<(usize, &str, bool)> = script
            .segments()
            .iter()
            .map(|s| (s.index, s.speaker.as_str(), s.continuation))
            .collect();
        assert_eq!(
            view,
            vec![
                (0, "HOST", false),
                (1, "HOST", true),
                (2, "HOST", true),
                (3, "GUEST", false)
            ]
        );
    }

    #[test]
    fn test_split_never_breaks_words() {
        let options = ParserOptions {
            max_segment_words: 4,
            ..ParserOptions::default()
        };
        let body = "supercalifragilistic antidisestablishment pneumonoultramicroscopic floccinaucinihilipilification honorificabilitudinitatibus";
        let script = parse_with(&format!("[HOST|calm] {body}"), &options).unwrap();
        for segment in script.segments() {
            for word in segment.text.split_whitespace() {
                assert!(body.split_whitespace().any(|w| w == word));
            }
        }
    }

    #[test]
    fn test_max_segments_limit() {
        let options = ParserOptions {
            max_segment_words: 1,
            max_segments: 3,
        };
        let result = parse_with("[HOST|calm] a b c d", &options);
        assert!(matches!(result, Err(PodcastError::Validation(_))));
    }

    #[test]
    fn test_statistics() {
        let stats = validate(
            "[HOST|excited] one two three\n[GUEST|calm] four five\n[HOST|calm] six\n[HOST|bewildered] seven",
        )
        .unwrap();
        assert_eq!(stats.total_segments, 4);
        assert_eq!(stats.total_words, 7);
        assert!((stats.estimated_duration_minutes - 7.0 / 150.0).abs() < 1e-9);
        assert_eq!(
            stats.speakers["HOST"],
            SpeakerStats {
                segments: 3,
                words: 5
            }
        );
        assert_eq!(stats.emotions["calm"], 2);
        assert_eq!(
            stats.unrecognized_emotions(ProsodyTable::shared()),
            vec!["bewildered"]
        );
    }

    #[test]
    fn test_speakers_in_order() {
        let script = parse("[B|calm] x\n[A|calm] y\n[B|calm] z").unwrap();
        assert_eq!(script.speakers(), vec!["B", "A"]);
    }
}
