//! OpenAI-compatible `/audio/speech` provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{SpeechSynthesizer, SynthesisRequest};
use crate::audio::AudioFormat;
use crate::error::{PodcastError, Result};

const MIN_SPEED: f32 = 0.25;
const MAX_SPEED: f32 = 4.0;

/// Connection settings for [`HttpSynthesizer`].
#[derive(Debug, Clone)]
pub struct HttpSynthesizerConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub format: AudioFormat,
    pub timeout: Duration,
}

impl HttpSynthesizerConfig {
    pub fn new(api_base: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: None,
            model: model.into(),
            format: AudioFormat::Mp3,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/speech", self.api_base.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: AudioFormat,
    speed: f32,
}

/// Remote speech synthesis over HTTP.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: HttpSynthesizerConfig,
}

impl HttpSynthesizer {
    pub fn new(config: HttpSynthesizerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PodcastError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }
}

/// Map a rate adjustment onto the `speed` multiplier the endpoint accepts.
fn speed_for(request: &SynthesisRequest) -> f32 {
    request.prosody.speed_factor().clamp(MIN_SPEED, MAX_SPEED)
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    fn output_format(&self) -> AudioFormat {
        self.config.format
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        if request.prosody.pitch != 0 || request.prosody.volume != 0 {
            tracing::debug!(
                index = request.index,
                pitch = request.prosody.pitch,
                volume = request.prosody.volume,
                "endpoint has no pitch or volume control, ignoring"
            );
        }

        let body = SpeechBody {
            model: &self.config.model,
            input: &request.text,
            voice: &request.voice_id,
            response_format: self.config.format,
            speed: speed_for(request),
        };

        let mut call = self.client.post(self.config.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| PodcastError::TtsError(format!("Speech request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PodcastError::TtsError(format!(
                "Speech endpoint returned {}: {}",
                status,
                detail.trim()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PodcastError::TtsError(format!("Failed to read speech audio: {}", e)))?;

        tracing::debug!(index = request.index, bytes = bytes.len(), "received speech audio");
        Ok(bytes.to_vec())
    }
}
