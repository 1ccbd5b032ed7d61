//! Configuration module for loading TOML config files.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{AudioFormat, PauseSpec};
use crate::error::PodcastError;
use crate::mastering::MasteringConfig;
use crate::script::{DEFAULT_MAX_SEGMENT_WORDS, DEFAULT_MAX_SEGMENTS, ParserOptions};
use crate::synthesis::{FailureMode, SynthesisOptions};
use crate::voices::{VoiceRoster, default_voice_for_language};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub synthesis: SynthesisConfig,
    pub voices: VoicesConfig,
    pub mastering: MasteringConfig,
    pub script: ScriptConfig,
}

/// Parser limits, synthesis scheduling and assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_segment_words: usize,
    pub max_segments: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub call_timeout_secs: u64,
    pub failure_mode: FailureMode,
    pub pause_ms: u64,
    pub mastering: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_segment_words: DEFAULT_MAX_SEGMENT_WORDS,
            max_segments: DEFAULT_MAX_SEGMENTS,
            concurrency: 4,
            max_attempts: 3,
            retry_backoff_ms: 500,
            call_timeout_secs: 30,
            failure_mode: FailureMode::Strict,
            pause_ms: 300,
            mastering: true,
        }
    }
}

/// Which speech backend renders segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI-compatible `/audio/speech` endpoint.
    #[default]
    Http,
    /// Local kokoro-tiny model.
    Kokoro,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Http => f.write_str("http"),
            Provider::Kokoro => f.write_str("kokoro"),
        }
    }
}

impl FromStr for Provider {
    type Err = PodcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Provider::Http),
            "kokoro" => Ok(Provider::Kokoro),
            other => Err(PodcastError::ConfigError(format!(
                "unknown synthesis provider '{}', expected http or kokoro",
                other
            ))),
        }
    }
}

/// Speech provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub provider: Provider,
    pub api_base: String,
    pub model: String,
    /// Format requested from the HTTP provider. Kokoro always renders WAV.
    pub format: AudioFormat,
    pub api_key: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Http,
            api_base: "http://localhost:5050/v1".to_string(),
            model: "tts-1".to_string(),
            format: AudioFormat::Mp3,
            api_key: None,
        }
    }
}

impl SynthesisConfig {
    /// Format every clip of a generation will arrive in.
    pub fn output_format(&self) -> AudioFormat {
        match self.provider {
            Provider::Http => self.format,
            Provider::Kokoro => AudioFormat::Wav,
        }
    }
}

/// Voice roster overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoicesConfig {
    /// Locale used to pick a fallback voice when none is given.
    pub language: String,
    pub fallback: Option<String>,
    /// Canonical role to voice id, merged over the provider's default roster.
    pub roles: BTreeMap<String, String>,
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            fallback: None,
            roles: BTreeMap::new(),
        }
    }
}

/// Chat-completion endpoint used to write scripts from a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub api_key: Option<String>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PodcastError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| PodcastError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, PodcastError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| PodcastError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PodcastError> {
        let pipeline = &self.pipeline;
        if pipeline.concurrency == 0 {
            return Err(PodcastError::ConfigError(
                "pipeline.concurrency must be at least 1".to_string(),
            ));
        }
        if pipeline.max_attempts == 0 {
            return Err(PodcastError::ConfigError(
                "pipeline.max_attempts must be at least 1".to_string(),
            ));
        }
        if pipeline.max_segment_words == 0 || pipeline.max_segments == 0 {
            return Err(PodcastError::ConfigError(
                "pipeline.max_segment_words and pipeline.max_segments must be at least 1"
                    .to_string(),
            ));
        }
        if pipeline.call_timeout_secs == 0 {
            return Err(PodcastError::ConfigError(
                "pipeline.call_timeout_secs must be at least 1".to_string(),
            ));
        }
        self.mastering.validate()
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            max_segment_words: self.pipeline.max_segment_words,
            max_segments: self.pipeline.max_segments,
        }
    }

    pub fn synthesis_options(&self) -> SynthesisOptions {
        SynthesisOptions {
            concurrency: self.pipeline.concurrency,
            max_attempts: self.pipeline.max_attempts,
            retry_backoff: Duration::from_millis(self.pipeline.retry_backoff_ms),
            call_timeout: Duration::from_secs(self.pipeline.call_timeout_secs),
            failure_mode: self.pipeline.failure_mode,
        }
    }

    pub fn pause(&self) -> PauseSpec {
        PauseSpec::new(self.pipeline.pause_ms)
    }

    /// The provider's default roster with configured roles and fallback applied.
    pub fn roster(&self) -> VoiceRoster {
        let base = match self.synthesis.provider {
            Provider::Http => VoiceRoster::podcast_default(),
            Provider::Kokoro => VoiceRoster::kokoro_default(),
        };

        let fallback = match (&self.voices.fallback, self.synthesis.provider) {
            (Some(voice), _) => voice.clone(),
            (None, Provider::Http) => default_voice_for_language(&self.voices.language).to_string(),
            (None, Provider::Kokoro) => base.fallback().to_string(),
        };

        let mut roles: BTreeMap<String, String> = base
            .roles()
            .map(|(role, voice)| (role.to_string(), voice.to_string()))
            .collect();
        roles.extend(
            self.voices
                .roles
                .iter()
                .map(|(role, voice)| (role.to_uppercase(), voice.clone())),
        );

        VoiceRoster::new(roles, fallback)
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.pause_ms, 300);
        assert_eq!(config.pipeline.failure_mode, FailureMode::Strict);
        assert!(config.pipeline.mastering);
        assert_eq!(config.mastering.mp3_bitrate_kbps, 192);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::from_str(
            r#"
[pipeline]
concurrency = 8
failure_mode = "best_effort"

[mastering]
highpass_cutoff_hz = 100.0
"#,
        )
        .unwrap();
        assert_eq!(config.pipeline.concurrency, 8);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.pipeline.failure_mode, FailureMode::BestEffort);
        assert_eq!(config.mastering.highpass_cutoff_hz, 100.0);
        assert_eq!(config.mastering.compressor_ratio, 1.8);
        assert_eq!(config.synthesis.provider, Provider::Http);
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let err = Config::from_str("[pipeline]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, PodcastError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_positive_final_gain() {
        let err = Config::from_str("[mastering]\nfinal_gain_db = 2.0\n").unwrap_err();
        assert!(err.to_string().contains("final_gain_db"));
    }

    #[test]
    fn test_rejects_unparseable_toml() {
        let err = Config::from_str("[pipeline\n").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_roster_merges_roles_and_language_fallback() {
        let config = Config::from_str(
            r#"
[voices]
language = "fr-FR"

[voices.roles]
host = "en-GB-SoniaNeural"
CRITIC = "en-US-TonyNeural"
"#,
        )
        .unwrap();
        let roster = config.roster();
        assert_eq!(roster.role("HOST"), Some("en-GB-SoniaNeural"));
        assert_eq!(roster.role("critic"), Some("en-US-TonyNeural"));
        assert_eq!(roster.role("GUEST"), Some("en-US-GuyNeural"));
        assert_eq!(roster.fallback(), "fr-FR-DeniseNeural");
    }

    #[test]
    fn test_kokoro_roster_and_format() {
        let config = Config::from_str("[synthesis]\nprovider = \"kokoro\"\nformat = \"mp3\"\n").unwrap();
        assert_eq!(config.synthesis.output_format(), AudioFormat::Wav);
        assert_eq!(config.roster().role("HOST"), Some("bf_emma"));
        assert_eq!(config.roster().fallback(), "af_sky");
    }

    #[test]
    fn test_synthesis_options() {
        let options = default_config().synthesis_options();
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.retry_backoff, Duration::from_millis(500));
        assert_eq!(options.call_timeout, Duration::from_secs(30));
    }
}
