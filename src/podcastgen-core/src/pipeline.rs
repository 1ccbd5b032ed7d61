//! End-to-end podcast generation.
//!
//! One request runs parse, voice resolution, synthesis, assembly and
//! mastering in order. Requests share only the prosody table and roster,
//! both read-only.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::audio::{AudioClip, AudioFormat, assemble};
use crate::config::{Config, Provider};
use crate::error::{PodcastError, Result};
use crate::mastering::MasteringChain;
use crate::prosody::ProsodyTable;
use crate::script::{self, Script};
use crate::script_gen::{ScriptGenerator, ScriptRequirements};
use crate::synthesis::orchestrator::SegmentProgress;
use crate::synthesis::{
    FailureMode, HttpSynthesizer, HttpSynthesizerConfig, KokoroSynthesizer, SpeechSynthesizer,
    SynthesisOrchestrator,
};
use crate::voices::{VoiceAssignment, VoiceRoster};

/// Where the script text comes from.
#[derive(Debug, Clone)]
pub enum ScriptSource {
    Text(String),
    Topic(ScriptRequirements),
}

/// One generation request. Unset options fall back to the configuration.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub source: ScriptSource,
    /// Exact speaker label to voice id.
    pub voice_overrides: BTreeMap<String, String>,
    pub mastering_enabled: Option<bool>,
    pub failure_mode: Option<FailureMode>,
}

impl GenerationRequest {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(ScriptSource::Text(text.into()))
    }

    pub fn from_topic(requirements: ScriptRequirements) -> Self {
        Self::new(ScriptSource::Topic(requirements))
    }

    fn new(source: ScriptSource) -> Self {
        Self {
            source,
            voice_overrides: BTreeMap::new(),
            mastering_enabled: None,
            failure_mode: None,
        }
    }

    pub fn with_voice(mut self, speaker: impl Into<String>, voice_id: impl Into<String>) -> Self {
        self.voice_overrides.insert(speaker.into(), voice_id.into());
        self
    }

    pub fn with_mastering(mut self, enabled: bool) -> Self {
        self.mastering_enabled = Some(enabled);
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = Some(mode);
        self
    }
}

/// Callback for generation events.
pub type GenerationCallback = Box<dyn Fn(GenerationEvent) + Send + Sync>;

/// Events emitted during a generation.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    ScriptGenerated { generator: &'static str, chars: usize },
    ScriptParsed {
        segments: usize,
        words: usize,
        estimated_minutes: f64,
    },
    VoicesResolved { voices: Vec<(String, String)> },
    SegmentSynthesized { index: usize, duration_ms: u64 },
    SegmentFailed { index: usize, message: String },
    Assembled { duration_ms: u64, bytes: usize },
    Mastered { duration_ms: u64 },
    MasteringFailed { message: String },
    Finished { duration_ms: u64, failed: Vec<usize> },
}

/// A finished episode.
#[derive(Debug, Clone, Serialize)]
pub struct PodcastOutput {
    #[serde(skip)]
    pub audio: AudioClip,
    pub format: AudioFormat,
    /// SHA-256 of the script text, hex encoded.
    pub script_hash: String,
    pub generated_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub segments: usize,
    pub failed_segments: Vec<usize>,
    pub warnings: Vec<String>,
    pub mastered: bool,
    #[serde(skip)]
    pub script: Script,
}

impl PodcastOutput {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    /// `podcast_YYYYMMDD_HHMMSS.<ext>`
    pub fn file_name(&self) -> String {
        format!(
            "podcast_{}.{}",
            self.generated_at.format("%Y%m%d_%H%M%S"),
            self.format.extension()
        )
    }
}

/// Hex SHA-256 of the script text.
pub fn script_hash(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Build the configured speech provider.
pub async fn synthesizer_from_config(config: &Config) -> Result<Arc<dyn SpeechSynthesizer>> {
    let synthesizer: Arc<dyn SpeechSynthesizer> = match config.synthesis.provider {
        Provider::Http => {
            let mut http = HttpSynthesizerConfig::new(
                config.synthesis.api_base.clone(),
                config.synthesis.model.clone(),
            )
            .with_format(config.synthesis.format)
            .with_timeout(config.synthesis_options().call_timeout);
            if let Some(key) = &config.synthesis.api_key {
                http = http.with_api_key(key.clone());
            }
            Arc::new(HttpSynthesizer::new(http)?)
        }
        Provider::Kokoro => Arc::new(KokoroSynthesizer::new().await?),
    };
    Ok(synthesizer)
}

/// Runs generation requests against one provider.
pub struct PodcastGenerator {
    config: Config,
    prosody: Arc<ProsodyTable>,
    roster: Arc<VoiceRoster>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    script_generator: Option<Arc<dyn ScriptGenerator>>,
    callback: Option<GenerationCallback>,
}

impl PodcastGenerator {
    pub fn new(config: Config, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        let roster = Arc::new(config.roster());
        Self {
            config,
            prosody: Arc::new(ProsodyTable::shared().clone()),
            roster,
            synthesizer,
            script_generator: None,
            callback: None,
        }
    }

    /// Set a callback for generation events.
    pub fn with_callback(mut self, callback: GenerationCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_script_generator(mut self, generator: Arc<dyn ScriptGenerator>) -> Self {
        self.script_generator = Some(generator);
        self
    }

    pub fn with_prosody(mut self, prosody: Arc<ProsodyTable>) -> Self {
        self.prosody = prosody;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn roster(&self) -> &VoiceRoster {
        &self.roster
    }

    /// Generate one episode.
    ///
    /// Cancellation is honoured between stages and during synthesis; a
    /// cancelled request returns [`PodcastError::Cancelled`] and no audio.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<PodcastOutput> {
        let text = self.script_text(&request.source, cancel).await?;
        let hash = script_hash(&text);
        let span = tracing::info_span!("generation", script_hash = %&hash[..12]);

        let result = self
            .run(text, hash, &request, cancel)
            .instrument(span.clone())
            .await;

        if let Err(e) = &result {
            let _enter = span.enter();
            if e.is_internal() {
                tracing::error!(kind = e.kind(), error = %e, "generation failed");
            } else {
                tracing::warn!(kind = e.kind(), error = %e, "generation failed");
            }
        }
        result
    }

    async fn script_text(&self, source: &ScriptSource, cancel: &CancellationToken) -> Result<String> {
        match source {
            ScriptSource::Text(text) => Ok(text.clone()),
            ScriptSource::Topic(requirements) => {
                let generator = self.script_generator.as_ref().ok_or_else(|| {
                    PodcastError::ConfigError("no script generator configured".to_string())
                })?;
                let text = tokio::select! {
                    _ = cancel.cancelled() => return Err(PodcastError::Cancelled),
                    text = generator.generate(requirements) => text?,
                };
                self.emit_event(GenerationEvent::ScriptGenerated {
                    generator: generator.name(),
                    chars: text.len(),
                });
                Ok(text)
            }
        }
    }

    async fn run(
        &self,
        text: String,
        hash: String,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<PodcastOutput> {
        check_cancelled(cancel)?;
        let script = script::parse_with(&text, &self.config.parser_options())?;
        tracing::info!(
            segments = script.len(),
            words = script.total_words(),
            "script parsed"
        );
        self.emit_event(GenerationEvent::ScriptParsed {
            segments: script.len(),
            words: script.total_words(),
            estimated_minutes: script.estimated_minutes(),
        });

        check_cancelled(cancel)?;
        let voices = VoiceAssignment::resolve(&script, &request.voice_overrides, &self.roster);
        for (speaker, voice) in voices.iter() {
            tracing::debug!(speaker, voice = %voice.voice_id, source = ?voice.source, "voice resolved");
        }
        self.emit_event(GenerationEvent::VoicesResolved {
            voices: voices
                .iter()
                .map(|(speaker, voice)| (speaker.to_string(), voice.voice_id.clone()))
                .collect(),
        });

        check_cancelled(cancel)?;
        let mut options = self.config.synthesis_options();
        if let Some(mode) = request.failure_mode {
            options.failure_mode = mode;
        }
        let orchestrator = SynthesisOrchestrator::new(Arc::clone(&self.synthesizer), options);
        let progress = |event: SegmentProgress| {
            self.emit_event(match event {
                SegmentProgress::Completed { index, duration_ms } => {
                    GenerationEvent::SegmentSynthesized { index, duration_ms }
                }
                SegmentProgress::Failed { index, message } => {
                    GenerationEvent::SegmentFailed { index, message }
                }
            })
        };
        let outcome = orchestrator
            .synthesize(&script, &voices, &self.prosody, cancel, Some(&progress))
            .await?;

        let mut warnings: Vec<String> = outcome
            .failures
            .iter()
            .map(|f| format!("segment {} skipped: {}", f.index, f.message))
            .collect();

        check_cancelled(cancel)?;
        let assembled = assemble(&outcome.pieces, &self.config.pause())?;
        self.emit_event(GenerationEvent::Assembled {
            duration_ms: assembled.duration_ms(),
            bytes: assembled.len(),
        });

        check_cancelled(cancel)?;
        let mastering = request
            .mastering_enabled
            .unwrap_or(self.config.pipeline.mastering);
        let (audio, mastered) = if mastering {
            match self.master(&assembled).await {
                Ok(clip) => {
                    self.emit_event(GenerationEvent::Mastered {
                        duration_ms: clip.duration_ms(),
                    });
                    (clip, true)
                }
                Err(e) => {
                    tracing::error!(kind = e.kind(), error = %e, "mastering failed, keeping unmastered audio");
                    warnings.push(format!("mastering skipped: {e}"));
                    self.emit_event(GenerationEvent::MasteringFailed {
                        message: e.to_string(),
                    });
                    (assembled, false)
                }
            }
        } else {
            (assembled, false)
        };
        check_cancelled(cancel)?;

        let failed_segments = outcome.failed_indices();
        self.emit_event(GenerationEvent::Finished {
            duration_ms: audio.duration_ms(),
            failed: failed_segments.clone(),
        });
        tracing::info!(
            duration_ms = audio.duration_ms(),
            bytes = audio.len(),
            mastered,
            failed = failed_segments.len(),
            "generation finished"
        );

        Ok(PodcastOutput {
            format: audio.format(),
            duration_ms: audio.duration_ms(),
            audio,
            script_hash: hash,
            generated_at: Utc::now(),
            segments: script.len(),
            failed_segments,
            warnings,
            mastered,
            script,
        })
    }

    /// Mastering is CPU bound and runs off the async workers.
    async fn master(&self, clip: &AudioClip) -> Result<AudioClip> {
        let config = self.config.mastering.clone();
        let clip = clip.clone();
        tokio::task::spawn_blocking(move || MasteringChain::new(&config).master(&clip))
            .await
            .map_err(|e| PodcastError::Mastering(format!("mastering task failed: {e}")))?
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: GenerationEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(PodcastError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_hash_is_sha256_hex() {
        assert_eq!(
            script_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_request_builders() {
        let request = GenerationRequest::from_text("[HOST|calm] Hi")
            .with_voice("HOST", "en-GB-RyanNeural")
            .with_mastering(false)
            .with_failure_mode(FailureMode::BestEffort);
        assert_eq!(request.voice_overrides["HOST"], "en-GB-RyanNeural");
        assert_eq!(request.mastering_enabled, Some(false));
        assert_eq!(request.failure_mode, Some(FailureMode::BestEffort));
    }
}
