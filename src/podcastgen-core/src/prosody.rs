//! Emotion to prosody mapping.
//!
//! A [`ProsodyTable`] is a read-only map from lower-case emotion names to
//! rate/pitch/volume adjustments. The builtin table is built once per
//! process; callers that need extra emotions derive an augmented copy with
//! [`ProsodyTable::with_emotion`] instead of touching shared state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use serde::Serialize;

/// Rate/pitch/volume adjustment for one emotion.
///
/// Rate and pitch are signed percentages, volume is in decibels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct ProsodySpec {
    pub rate: i8,
    pub pitch: i8,
    pub volume: i8,
}

impl ProsodySpec {
    /// All-zero adjustments, used for unknown emotions.
    pub const NEUTRAL: ProsodySpec = ProsodySpec::new(0, 0, 0);

    pub const fn new(rate: i8, pitch: i8, volume: i8) -> Self {
        Self {
            rate,
            pitch,
            volume,
        }
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }

    /// SSML rate attribute, e.g. `+15%`.
    pub fn rate_attr(&self) -> String {
        format!("{:+}%", self.rate)
    }

    /// SSML pitch attribute, e.g. `-5%`.
    pub fn pitch_attr(&self) -> String {
        format!("{:+}%", self.pitch)
    }

    /// SSML volume attribute, e.g. `+2dB`.
    pub fn volume_attr(&self) -> String {
        format!("{:+}dB", self.volume)
    }

    /// Rate as a playback speed multiplier (`+20%` -> `1.2`).
    pub fn speed_factor(&self) -> f32 {
        1.0 + f32::from(self.rate) / 100.0
    }

    /// Volume as a linear amplitude multiplier.
    pub fn volume_gain(&self) -> f32 {
        10f32.powf(f32::from(self.volume) / 20.0)
    }
}

impl fmt::Display for ProsodySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate {} pitch {} volume {}",
            self.rate_attr(),
            self.pitch_attr(),
            self.volume_attr()
        )
    }
}

/// A table entry: the adjustments plus a human description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmotionProsody {
    pub spec: ProsodySpec,
    pub description: String,
}

/// Emotion name listed with its prosody, for display.
#[derive(Debug, Clone, Serialize)]
pub struct EmotionInfo<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub prosody: ProsodySpec,
}

/// Emotion written by script authors to request keyword detection.
pub const AUTO_EMOTION: &str = "auto";

const BUILTIN_EMOTIONS: &[(&str, ProsodySpec, &str)] = &[
    ("calm", ProsodySpec::new(0, 0, 0), "Neutral, measured speech"),
    ("enthusiastic", ProsodySpec::new(15, 5, 2), "Energetic and upbeat"),
    ("excited", ProsodySpec::new(20, 8, 3), "Very energetic, high enthusiasm"),
    ("sad", ProsodySpec::new(-15, -5, -3), "Slower, lower, quieter"),
    ("questioning", ProsodySpec::new(5, 3, 1), "Slightly higher pitch for questions"),
    ("explaining", ProsodySpec::new(-5, 0, 0), "Slightly slower for clarity"),
    ("thoughtful", ProsodySpec::new(-10, -2, 0), "Contemplative, measured pace"),
    ("serious", ProsodySpec::new(-5, -3, 1), "Lower pitch, authoritative"),
    ("grateful", ProsodySpec::new(0, 2, 0), "Warm and appreciative"),
    ("intrigued", ProsodySpec::new(10, 4, 1), "Curious and interested"),
    ("amazed", ProsodySpec::new(15, 7, 2), "Surprised and impressed"),
    ("greeting", ProsodySpec::new(5, 3, 1), "Welcoming and friendly"),
    ("closing", ProsodySpec::new(0, 1, 0), "Warm conclusion"),
    ("whisper", ProsodySpec::new(-25, -2, -15), "Soft, intimate speech"),
    ("storytelling", ProsodySpec::new(-8, 1, 0), "Engaging narrative pace"),
    ("urgent", ProsodySpec::new(25, 6, 4), "Fast, elevated, pressing"),
    ("warm", ProsodySpec::new(0, 2, 0), "Friendly and comforting"),
    ("optimistic", ProsodySpec::new(10, 5, 1), "Positive and hopeful"),
    ("understanding", ProsodySpec::new(-5, 1, 0), "Empathetic and patient"),
];

static SHARED: LazyLock<ProsodyTable> = LazyLock::new(ProsodyTable::builtin);

/// Read-only emotion lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProsodyTable {
    entries: BTreeMap<String, EmotionProsody>,
}

impl ProsodyTable {
    /// Build the table of canonical podcast emotions.
    pub fn builtin() -> Self {
        let entries = BUILTIN_EMOTIONS
            .iter()
            .map(|(name, spec, description)| {
                (
                    (*name).to_string(),
                    EmotionProsody {
                        spec: *spec,
                        description: (*description).to_string(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// The process-wide builtin table.
    pub fn shared() -> &'static ProsodyTable {
        &SHARED
    }

    /// Return a copy of this table with one emotion added or replaced.
    pub fn with_emotion(
        mut self,
        name: &str,
        spec: ProsodySpec,
        description: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            name.to_lowercase(),
            EmotionProsody {
                spec,
                description: description.into(),
            },
        );
        self
    }

    /// Look up an emotion. Case-insensitive exact match; misses are neutral.
    pub fn resolve(&self, emotion: &str) -> ProsodySpec {
        self.get(emotion)
            .map(|entry| entry.spec)
            .unwrap_or(ProsodySpec::NEUTRAL)
    }

    pub fn get(&self, emotion: &str) -> Option<&EmotionProsody> {
        self.entries.get(&emotion.to_lowercase())
    }

    pub fn contains(&self, emotion: &str) -> bool {
        self.get(emotion).is_some()
    }

    /// Resolve the emotion of a line, running keyword detection for `auto`.
    pub fn resolve_for_text(&self, emotion: &str, text: &str) -> ProsodySpec {
        if emotion.eq_ignore_ascii_case(AUTO_EMOTION) {
            self.resolve(detect_emotion(text))
        } else {
            self.resolve(emotion)
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All emotions in name order.
    pub fn list(&self) -> Vec<EmotionInfo<'_>> {
        self.entries
            .iter()
            .map(|(name, entry)| EmotionInfo {
                name,
                description: &entry.description,
                prosody: entry.spec,
            })
            .collect()
    }
}

impl Default for ProsodyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Render an SSML document applying `spec` to `text`.
pub fn build_ssml(text: &str, voice_id: &str, spec: &ProsodySpec) -> String {
    format!(
        concat!(
            r#"<speak version="1.0" xmlns="http://www.w3.org/2001/10/synthesis" xml:lang="en-US">"#,
            r#"<voice name="{voice}"><prosody rate="{rate}" pitch="{pitch}" volume="{volume}">"#,
            "{text}</prosody></voice></speak>"
        ),
        voice = escape_xml(voice_id),
        rate = spec.rate_attr(),
        pitch = spec.pitch_attr(),
        volume = spec.volume_attr(),
        text = escape_xml(text),
    )
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Guess an emotion from keywords in the text.
pub fn detect_emotion(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if has_any(&["amazing", "wow", "incredible", "fantastic", "awesome", "!"]) {
        "excited"
    } else if has_any(&["sadly", "unfortunately", "tragic", "disappointed"]) {
        "sad"
    } else if lower.contains('?') {
        "questioning"
    } else if has_any(&["think", "consider", "believe", "perhaps", "maybe"]) {
        "thoughtful"
    } else if has_any(&["hello", "welcome", "hi ", "hey"]) {
        "greeting"
    } else if has_any(&["goodbye", "thanks for", "see you", "that's all"]) {
        "closing"
    } else if has_any(&["thank you", "thanks", "grateful", "appreciate"]) {
        "grateful"
    } else {
        "calm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let table = ProsodyTable::builtin();
        assert_eq!(table.len(), 19);
        assert_eq!(table.resolve("excited"), ProsodySpec::new(20, 8, 3));
        assert_eq!(table.resolve("whisper"), ProsodySpec::new(-25, -2, -15));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = ProsodyTable::builtin();
        assert_eq!(table.resolve("EXCITED"), table.resolve("excited"));
        assert_eq!(table.resolve("Whisper"), table.resolve("whisper"));
    }

    #[test]
    fn test_unknown_emotion_is_neutral() {
        let table = ProsodyTable::builtin();
        assert_eq!(table.resolve("bewildered"), ProsodySpec::NEUTRAL);
        // exact key only
        assert_eq!(table.resolve("excite"), ProsodySpec::NEUTRAL);
        assert_eq!(table.resolve(""), ProsodySpec::NEUTRAL);
    }

    #[test]
    fn test_resolve_is_pure() {
        let a = ProsodyTable::builtin();
        let b = ProsodyTable::shared();
        for info in a.list() {
            assert_eq!(a.resolve(info.name), b.resolve(info.name));
            assert_eq!(a.resolve(info.name), a.resolve(info.name));
        }
    }

    #[test]
    fn test_with_emotion_does_not_touch_shared() {
        let custom = ProsodyTable::shared()
            .clone()
            .with_emotion("Sarcastic", ProsodySpec::new(-5, 4, 0), "Dry");
        assert_eq!(custom.resolve("sarcastic"), ProsodySpec::new(-5, 4, 0));
        assert_eq!(ProsodyTable::shared().resolve("sarcastic"), ProsodySpec::NEUTRAL);
    }

    #[test]
    fn test_attribute_formatting() {
        let spec = ProsodySpec::new(15, -5, 0);
        assert_eq!(spec.rate_attr(), "+15%");
        assert_eq!(spec.pitch_attr(), "-5%");
        assert_eq!(spec.volume_attr(), "+0dB");
        assert!((spec.speed_factor() - 1.15).abs() < 1e-6);
    }

    #[test]
    fn test_build_ssml_escapes_text() {
        let ssml = build_ssml("Tom & Jerry <3", "en-US-JennyNeural", &ProsodySpec::new(5, 3, 1));
        assert!(ssml.contains(r#"rate="+5%" pitch="+3%" volume="+1dB""#));
        assert!(ssml.contains("Tom &amp; Jerry &lt;3"));
        assert!(ssml.contains(r#"<voice name="en-US-JennyNeural">"#));
    }

    #[test]
    fn test_detect_emotion() {
        assert_eq!(detect_emotion("Wow, that is incredible"), "excited");
        assert_eq!(detect_emotion("Unfortunately it failed."), "sad");
        assert_eq!(detect_emotion("Where does it go?"), "questioning");
        assert_eq!(detect_emotion("I think so."), "thoughtful");
        assert_eq!(detect_emotion("It is what it is."), "calm");
    }

    #[test]
    fn test_auto_emotion_uses_detection() {
        let table = ProsodyTable::builtin();
        assert_eq!(
            table.resolve_for_text("auto", "Where does it go?"),
            table.resolve("questioning")
        );
        assert_eq!(table.resolve_for_text("sad", "Wow!"), table.resolve("sad"));
    }
}
