//! Local synthesis using kokoro-tiny.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kokoro_tiny::TtsEngine;

use super::{SpeechSynthesizer, SynthesisRequest};
use crate::audio::AudioFormat;
use crate::error::{PodcastError, Result};

/// Kokoro always renders mono at this rate.
pub const KOKORO_SAMPLE_RATE: u32 = 24_000;

/// Kokoro-tiny has a strict input length limit.
const MAX_CHUNK_CHARS: usize = 200;

/// Silence between chunks of one segment (0.15 s).
const CHUNK_GAP_SAMPLES: usize = 3_600;

/// Speech synthesizer backed by the local Kokoro model.
pub struct KokoroSynthesizer {
    engine: Arc<Mutex<TtsEngine>>,
    available_voices: Vec<String>,
}

impl KokoroSynthesizer {
    /// Initialize the TTS engine (downloads model on first run).
    pub async fn new() -> Result<Self> {
        let engine = TtsEngine::new()
            .await
            .map_err(|e| PodcastError::TtsError(format!("Failed to initialize TTS: {}", e)))?;

        let available_voices = engine.voices();
        tracing::info!(voices = available_voices.len(), "kokoro engine ready");

        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            available_voices,
        })
    }

    pub fn available_voices(&self) -> &[String] {
        &self.available_voices
    }

    /// Validate that a voice ID exists.
    pub fn validate_voice(&self, voice_id: &str) -> Result<()> {
        if voice_id.is_empty() {
            return Err(PodcastError::TtsError(format!(
                "Voice ID cannot be empty. Available voices:\n{}",
                self.format_available_voices()
            )));
        }

        if !self.available_voices.iter().any(|v| v == voice_id) {
            return Err(PodcastError::TtsError(format!(
                "Unknown voice '{}'. Available voices:\n{}",
                voice_id,
                self.format_available_voices()
            )));
        }

        Ok(())
    }

    /// English voices, one per line.
    fn format_available_voices(&self) -> String {
        let mut english_voices: Vec<&String> = self
            .available_voices
            .iter()
            .filter(|v| ["af_", "am_", "bf_", "bm_"].iter().any(|p| v.starts_with(p)))
            .collect();
        english_voices.sort();

        english_voices
            .iter()
            .map(|v| format!("  - {}", v))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroSynthesizer {
    fn output_format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        self.validate_voice(&request.voice_id)?;

        let engine = Arc::clone(&self.engine);
        let text = request.text.clone();
        let voice = request.voice_id.clone();
        let speed = request.prosody.speed_factor();
        let gain = request.prosody.volume_gain();

        // ONNX inference is CPU bound
        let samples = tokio::task::spawn_blocking(move || render(&engine, &text, &voice))
            .await
            .map_err(|e| PodcastError::TtsError(format!("Synthesis task failed: {}", e)))??;

        let samples = apply_gain(adjust_audio_speed(samples, speed), gain);
        encode_wav(&samples)
    }
}

/// Synthesize `text` chunk by chunk while holding the engine lock.
fn render(engine: &Mutex<TtsEngine>, text: &str, voice: &str) -> Result<Vec<f32>> {
    let mut engine = engine
        .lock()
        .map_err(|_| PodcastError::TtsError("TTS engine lock poisoned".to_string()))?;

    let mut all_samples = Vec::new();
    for (i, chunk) in split_into_chunks(text, MAX_CHUNK_CHARS).iter().enumerate() {
        if i > 0 {
            all_samples.extend(std::iter::repeat_n(0.0, CHUNK_GAP_SAMPLES));
        }
        let samples = engine
            .synthesize(chunk, Some(voice))
            .map_err(|e| PodcastError::TtsError(format!("Synthesis failed: {}", e)))?;
        all_samples.extend(samples);
    }

    if all_samples.is_empty() {
        return Err(PodcastError::TtsError(
            "Synthesis produced no audio".to_string(),
        ));
    }
    Ok(all_samples)
}

/// Split text into chunks that are safe for TTS synthesis.
fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    let mut push = |current: &mut String, piece: &str| {
        if !current.is_empty() && current.len() + piece.len() + 1 > max_chars {
            chunks.push(std::mem::take(current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(piece);
    };

    for sentence in text.split_inclusive(&['.', '!', '?', ';'][..]) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if sentence.len() <= max_chars {
            push(&mut current, sentence);
            continue;
        }
        // overlong sentence: fall back to commas, then words
        for part in sentence.split_inclusive(',') {
            let part = part.trim();
            if part.len() <= max_chars {
                push(&mut current, part);
            } else {
                for word in part.split_whitespace() {
                    push(&mut current, word);
                }
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Adjust audio playback speed using linear interpolation.
/// Rate < 1.0 = slower (e.g., 0.75 = 75% speed), Rate > 1.0 = faster.
pub fn adjust_audio_speed(samples: Vec<f32>, rate: f32) -> Vec<f32> {
    if (rate - 1.0).abs() < 0.001 || rate <= 0.0 {
        return samples;
    }

    let new_len = (samples.len() as f32 / rate) as usize;
    let mut result = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f32 * rate;
        let src_idx = src_pos as usize;
        let frac = src_pos - src_idx as f32;

        if src_idx + 1 < samples.len() {
            result.push(samples[src_idx] * (1.0 - frac) + samples[src_idx + 1] * frac);
        } else if src_idx < samples.len() {
            result.push(samples[src_idx]);
        }
    }

    result
}

fn apply_gain(mut samples: Vec<f32>, gain: f32) -> Vec<f32> {
    if (gain - 1.0).abs() > f32::EPSILON {
        samples.iter_mut().for_each(|s| *s = (*s * gain).clamp(-1.0, 1.0));
    }
    samples
}

fn encode_wav(samples: &[f32]) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: KOKORO_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| PodcastError::TtsError(format!("Failed to write WAV: {}", e));

    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).map_err(wav_error)?;
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer.write_sample(value).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
    }
    Ok(bytes)
}
