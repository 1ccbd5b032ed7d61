//! Speaker label to voice resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::script::Script;

/// Fallback voice when neither language nor roster supplies one.
pub const DEFAULT_FALLBACK_VOICE: &str = "en-US-AriaNeural";

/// Built-in voices for canonical podcast roles.
///
/// Role names are stored upper-case and matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRoster {
    roles: BTreeMap<String, String>,
    fallback: String,
}

impl VoiceRoster {
    pub fn new(roles: BTreeMap<String, String>, fallback: impl Into<String>) -> Self {
        Self {
            roles: roles
                .into_iter()
                .map(|(role, voice)| (role.to_uppercase(), voice))
                .collect(),
            fallback: fallback.into(),
        }
    }

    /// Neural voice roster for the HTTP speech provider.
    pub fn podcast_default() -> Self {
        Self::from_pairs(
            &[
                ("HOST", "en-US-JennyNeural"),
                ("GUEST", "en-US-GuyNeural"),
                ("NARRATOR", "en-US-AriaNeural"),
                ("CO-HOST", "en-US-DavisNeural"),
                ("EXPERT", "en-US-JasonNeural"),
            ],
            DEFAULT_FALLBACK_VOICE,
        )
    }

    /// Roster for the local Kokoro engine.
    pub fn kokoro_default() -> Self {
        Self::from_pairs(
            &[
                ("HOST", "bf_emma"),
                ("GUEST", "bm_george"),
                ("NARRATOR", "af_sky"),
                ("CO-HOST", "am_adam"),
                ("EXPERT", "bm_lewis"),
            ],
            "af_sky",
        )
    }

    fn from_pairs(pairs: &[(&str, &str)], fallback: &str) -> Self {
        Self {
            roles: pairs
                .iter()
                .map(|(role, voice)| ((*role).to_string(), (*voice).to_string()))
                .collect(),
            fallback: fallback.to_string(),
        }
    }

    /// Replace the fallback voice.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn role(&self, label: &str) -> Option<&str> {
        self.roles.get(&label.to_uppercase()).map(String::as_str)
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn roles(&self) -> impl Iterator<Item = (&str, &str)> {
        self.roles.iter().map(|(r, v)| (r.as_str(), v.as_str()))
    }
}

impl Default for VoiceRoster {
    fn default() -> Self {
        Self::podcast_default()
    }
}

/// Where a resolved voice came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceSource {
    Override,
    Roster,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedVoice {
    pub voice_id: String,
    pub source: VoiceSource,
}

/// Request-scoped speaker to voice mapping. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceAssignment {
    voices: BTreeMap<String, ResolvedVoice>,
    fallback: String,
}

impl VoiceAssignment {
    /// Resolve every distinct speaker in `script`.
    ///
    /// Priority: exact-label override, then roster role, then the roster
    /// fallback. Total: every label gets a voice.
    pub fn resolve(
        script: &Script,
        overrides: &BTreeMap<String, String>,
        roster: &VoiceRoster,
    ) -> Self {
        let voices = script
            .speakers()
            .into_iter()
            .map(|speaker| {
                let resolved = if let Some(voice) = overrides.get(speaker) {
                    ResolvedVoice {
                        voice_id: voice.clone(),
                        source: VoiceSource::Override,
                    }
                } else if let Some(voice) = roster.role(speaker) {
                    ResolvedVoice {
                        voice_id: voice.to_string(),
                        source: VoiceSource::Roster,
                    }
                } else {
                    ResolvedVoice {
                        voice_id: roster.fallback().to_string(),
                        source: VoiceSource::Fallback,
                    }
                };
                (speaker.to_string(), resolved)
            })
            .collect();

        Self {
            voices,
            fallback: roster.fallback().to_string(),
        }
    }

    /// Voice for a speaker label.
    pub fn voice_for(&self, speaker: &str) -> &str {
        self.voices
            .get(speaker)
            .map(|v| v.voice_id.as_str())
            .unwrap_or(&self.fallback)
    }

    pub fn get(&self, speaker: &str) -> Option<&ResolvedVoice> {
        self.voices.get(speaker)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResolvedVoice)> {
        self.voices.iter().map(|(s, v)| (s.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

/// Language-appropriate fallback voice for a locale such as `es-ES`.
pub fn default_voice_for_language(locale: &str) -> &'static str {
    match locale {
        "en-US" => "en-US-AriaNeural",
        "hi-IN" => "hi-IN-SwaraNeural",
        "es-ES" => "es-ES-ElviraNeural",
        "fr-FR" => "fr-FR-DeniseNeural",
        "de-DE" => "de-DE-KatjaNeural",
        "ja-JP" => "ja-JP-NanamiNeural",
        "zh-CN" => "zh-CN-XiaoxiaoNeural",
        "pt-BR" => "pt-BR-FranciscaNeural",
        "it-IT" => "it-IT-ElsaNeural",
        "ko-KR" => "ko-KR-SunHiNeural",
        _ => DEFAULT_FALLBACK_VOICE,
    }
}

/// Locale prefix of a voice id (`en-US-AriaNeural` -> `en-US`).
pub fn language_from_voice(voice_id: &str) -> String {
    let mut parts = voice_id.split('-');
    match (parts.next(), parts.next()) {
        (Some(lang), Some(region)) if !lang.is_empty() && !region.is_empty() => {
            format!("{lang}-{region}")
        }
        _ => "en-US".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse;

    #[test]
    fn test_priority_order() {
        let script = parse("[HOST|calm] a\n[GUEST|calm] b\n[Sidekick|calm] c").unwrap();
        let mut overrides = BTreeMap::new();
        overrides.insert("GUEST".to_string(), "custom-voice".to_string());

        let voices = VoiceAssignment::resolve(&script, &overrides, &VoiceRoster::podcast_default());
        assert_eq!(voices.len(), 3);
        assert_eq!(voices.voice_for("HOST"), "en-US-JennyNeural");
        assert_eq!(voices.get("HOST").unwrap().source, VoiceSource::Roster);
        assert_eq!(voices.voice_for("GUEST"), "custom-voice");
        assert_eq!(voices.get("GUEST").unwrap().source, VoiceSource::Override);
        assert_eq!(voices.voice_for("Sidekick"), DEFAULT_FALLBACK_VOICE);
        assert_eq!(voices.get("Sidekick").unwrap().source, VoiceSource::Fallback);
    }

    #[test]
    fn test_override_is_exact_label() {
        let script = parse("[host|calm] a").unwrap();
        let mut overrides = BTreeMap::new();
        overrides.insert("HOST".to_string(), "custom-voice".to_string());

        let voices = VoiceAssignment::resolve(&script, &overrides, &VoiceRoster::podcast_default());
        // roster lookup is case-insensitive, overrides are not
        assert_eq!(voices.voice_for("host"), "en-US-JennyNeural");
    }

    #[test]
    fn test_unmapped_labels_share_fallback() {
        let script = parse("[ALICE|calm] a\n[BOB|calm] b").unwrap();
        let roster = VoiceRoster::podcast_default().with_fallback("es-ES-ElviraNeural");
        let voices = VoiceAssignment::resolve(&script, &BTreeMap::new(), &roster);
        assert_eq!(voices.voice_for("ALICE"), voices.voice_for("BOB"));
        assert_eq!(voices.voice_for("ALICE"), "es-ES-ElviraNeural");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let script = parse("[HOST|calm] a\n[X|calm] b").unwrap();
        let roster = VoiceRoster::kokoro_default();
        let a = VoiceAssignment::resolve(&script, &BTreeMap::new(), &roster);
        let b = VoiceAssignment::resolve(&script, &BTreeMap::new(), &roster);
        assert_eq!(a, b);
    }

    #[test]
    fn test_language_helpers() {
        assert_eq!(default_voice_for_language("fr-FR"), "fr-FR-DeniseNeural");
        assert_eq!(default_voice_for_language("xx-YY"), DEFAULT_FALLBACK_VOICE);
        assert_eq!(language_from_voice("en-GB-SoniaNeural"), "en-GB");
        assert_eq!(language_from_voice("af_sky"), "en-US");
    }
}
