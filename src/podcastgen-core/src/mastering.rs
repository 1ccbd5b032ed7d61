//! Post-assembly mastering chain.
//!
//! The chain runs once over the whole assembled clip, in a fixed order:
//! noise gate, high-pass, compressor, reverb, limiter, final gain and
//! stereo-ization. This is the only place audio is decoded and re-encoded.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::audio::codec::{self, Pcm};
use crate::audio::{AudioClip, AudioFormat};
use crate::error::{PodcastError, Result};

/// Effect parameters for the mastering chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteringConfig {
    pub gate_threshold_db: f32,
    pub gate_ratio: f32,
    pub gate_release_ms: f32,
    pub highpass_cutoff_hz: f32,
    pub compressor_threshold_db: f32,
    pub compressor_ratio: f32,
    pub compressor_attack_ms: f32,
    pub compressor_release_ms: f32,
    pub reverb_room_size: f32,
    pub reverb_damping: f32,
    pub reverb_wet_level: f32,
    pub reverb_dry_level: f32,
    pub limiter_threshold_db: f32,
    pub limiter_release_ms: f32,
    pub final_gain_db: f32,
    pub stereo: bool,
    pub mp3_bitrate_kbps: u32,
}

impl Default for MasteringConfig {
    fn default() -> Self {
        Self {
            gate_threshold_db: -45.0,
            gate_ratio: 3.0,
            gate_release_ms: 120.0,
            highpass_cutoff_hz: 80.0,
            compressor_threshold_db: -10.0,
            compressor_ratio: 1.8,
            compressor_attack_ms: 10.0,
            compressor_release_ms: 100.0,
            reverb_room_size: 0.05,
            reverb_damping: 0.7,
            reverb_wet_level: 0.01,
            reverb_dry_level: 0.99,
            limiter_threshold_db: -0.5,
            limiter_release_ms: 100.0,
            final_gain_db: 0.0,
            stereo: true,
            mp3_bitrate_kbps: 192,
        }
    }
}

impl MasteringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.final_gain_db > 0.0 {
            return Err(PodcastError::ConfigError(
                "mastering.final_gain_db must not be positive; the limiter is the last stage allowed to set peak level".to_string(),
            ));
        }
        if self.gate_ratio < 1.0 || self.compressor_ratio < 1.0 {
            return Err(PodcastError::ConfigError(
                "gate and compressor ratios must be at least 1.0".to_string(),
            ));
        }
        if self.limiter_threshold_db > 0.0 {
            return Err(PodcastError::ConfigError(
                "mastering.limiter_threshold_db must be at or below 0 dBFS".to_string(),
            ));
        }
        if self.highpass_cutoff_hz <= 0.0 {
            return Err(PodcastError::ConfigError(
                "mastering.highpass_cutoff_hz must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One stage of the chain, processing interleaved PCM in place.
pub trait Effect: Send {
    fn name(&self) -> &'static str;
    fn process(&mut self, pcm: &mut Pcm);
}

fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.max(1e-9).log10()
}

/// One-pole smoothing coefficient for a time constant.
fn time_coefficient(ms: f32, sample_rate: u32) -> f32 {
    if ms <= 0.0 {
        return 0.0;
    }
    (-1.0 / (ms / 1000.0 * sample_rate as f32)).exp()
}

/// Downward expander that attenuates signal below the threshold.
pub struct NoiseGate {
    threshold_db: f32,
    ratio: f32,
    attack_ms: f32,
    release_ms: f32,
}

impl Effect for NoiseGate {
    fn name(&self) -> &'static str {
        "noise_gate"
    }

    fn process(&mut self, pcm: &mut Pcm) {
        let channels = usize::from(pcm.channels);
        let attack = time_coefficient(self.attack_ms, pcm.sample_rate);
        let release = time_coefficient(self.release_ms, pcm.sample_rate);
        let mut envelope = vec![0.0f32; channels];
        let mut gain = vec![1.0f32; channels];

        for frame in pcm.samples.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let level = sample.abs();
                let coeff = if level > envelope[ch] { attack } else { release };
                envelope[ch] = coeff * envelope[ch] + (1.0 - coeff) * level;

                let level_db = gain_to_db(envelope[ch]);
                let target = if level_db < self.threshold_db {
                    db_to_gain((level_db - self.threshold_db) * (self.ratio - 1.0))
                } else {
                    1.0
                };
                // open fast, close on the release curve
                let coeff = if target > gain[ch] { attack } else { release };
                gain[ch] = coeff * gain[ch] + (1.0 - coeff) * target;
                *sample *= gain[ch];
            }
        }
    }
}

/// RBJ biquad high-pass filter with Butterworth Q.
pub struct HighPass {
    cutoff_hz: f32,
}

impl Effect for HighPass {
    fn name(&self) -> &'static str {
        "highpass"
    }

    fn process(&mut self, pcm: &mut Pcm) {
        let channels = usize::from(pcm.channels);
        let nyquist = pcm.sample_rate as f32 / 2.0;
        let cutoff = self.cutoff_hz.min(nyquist * 0.95);
        let w0 = 2.0 * PI * cutoff / pcm.sample_rate as f32;
        let alpha = w0.sin() / (2.0 * std::f32::consts::FRAC_1_SQRT_2);
        let cos_w0 = w0.cos();

        let a0 = 1.0 + alpha;
        let b0 = (1.0 + cos_w0) / 2.0 / a0;
        let b1 = -(1.0 + cos_w0) / a0;
        let b2 = b0;
        let a1 = -2.0 * cos_w0 / a0;
        let a2 = (1.0 - alpha) / a0;

        // x1, x2, y1, y2 per channel
        let mut state = vec![[0.0f32; 4]; channels];
        for frame in pcm.samples.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let [x1, x2, y1, y2] = state[ch];
                let x0 = *sample;
                let y0 = b0 * x0 + b1 * x1 + b2 * x2 - a1 * y1 - a2 * y2;
                state[ch] = [x0, x1, y0, y1];
                *sample = y0;
            }
        }
    }
}

/// Feed-forward peak compressor.
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    attack_ms: f32,
    release_ms: f32,
}

impl Effect for Compressor {
    fn name(&self) -> &'static str {
        "compressor"
    }

    fn process(&mut self, pcm: &mut Pcm) {
        let channels = usize::from(pcm.channels);
        let attack = time_coefficient(self.attack_ms, pcm.sample_rate);
        let release = time_coefficient(self.release_ms, pcm.sample_rate);
        let slope = 1.0 - 1.0 / self.ratio;
        let mut envelope_db = vec![-120.0f32; channels];

        for frame in pcm.samples.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let level_db = gain_to_db(sample.abs());
                let coeff = if level_db > envelope_db[ch] { attack } else { release };
                envelope_db[ch] = coeff * envelope_db[ch] + (1.0 - coeff) * level_db;

                let over = envelope_db[ch] - self.threshold_db;
                if over > 0.0 {
                    *sample *= db_to_gain(-over * slope);
                }
            }
        }
    }
}

struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            store: 0.0,
        }
    }

    fn tick(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let out = self.buffer[self.pos];
        self.store = out * (1.0 - damping) + self.store * damping;
        self.buffer[self.pos] = input + self.store * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        out
    }
}

struct AllPass {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllPass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    fn tick(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let out = delayed - input;
        self.buffer[self.pos] = input + delayed * 0.5;
        self.pos = (self.pos + 1) % self.buffer.len();
        out
    }
}

/// Small Schroeder/Moorer room reverb (Freeverb tunings).
pub struct Reverb {
    room_size: f32,
    damping: f32,
    wet: f32,
    dry: f32,
}

const COMB_TUNINGS: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNINGS: [usize; 2] = [556, 441];
const TUNING_RATE: f32 = 44_100.0;
const STEREO_SPREAD: usize = 23;

impl Effect for Reverb {
    fn name(&self) -> &'static str {
        "reverb"
    }

    fn process(&mut self, pcm: &mut Pcm) {
        let channels = usize::from(pcm.channels);
        let scale = pcm.sample_rate as f32 / TUNING_RATE;
        let feedback = 0.7 + 0.28 * self.room_size.clamp(0.0, 1.0);
        let damping = self.damping.clamp(0.0, 1.0) * 0.4;

        let mut banks: Vec<(Vec<Comb>, Vec<AllPass>)> = (0..channels)
            .map(|ch| {
                let spread = ch * STEREO_SPREAD;
                let combs = COMB_TUNINGS
                    .iter()
                    .map(|t| Comb::new(((t + spread) as f32 * scale) as usize))
                    .collect();
                let allpasses = ALLPASS_TUNINGS
                    .iter()
                    .map(|t| AllPass::new(((t + spread) as f32 * scale) as usize))
                    .collect();
                (combs, allpasses)
            })
            .collect();

        for frame in pcm.samples.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let (combs, allpasses) = &mut banks[ch];
                let input = *sample * 0.015;
                let mut wet: f32 = combs
                    .iter_mut()
                    .map(|c| c.tick(input, feedback, damping))
                    .sum();
                for allpass in allpasses.iter_mut() {
                    wet = allpass.tick(wet);
                }
                *sample = *sample * self.dry + wet * self.wet * 3.0;
            }
        }
    }
}

/// Peak limiter with instant attack. Output never exceeds the threshold.
pub struct Limiter {
    threshold_db: f32,
    release_ms: f32,
}

impl Effect for Limiter {
    fn name(&self) -> &'static str {
        "limiter"
    }

    fn process(&mut self, pcm: &mut Pcm) {
        let channels = usize::from(pcm.channels);
        let ceiling = db_to_gain(self.threshold_db);
        let release = time_coefficient(self.release_ms, pcm.sample_rate);
        let mut gain = 1.0f32;

        for frame in pcm.samples.chunks_exact_mut(channels) {
            // linked across channels so the stereo image does not shift
            let peak = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            let required = if peak > ceiling { ceiling / peak } else { 1.0 };
            gain = if required < gain {
                required
            } else {
                release * gain + (1.0 - release) * required
            };
            for sample in frame.iter_mut() {
                *sample = (*sample * gain).clamp(-ceiling, ceiling);
            }
        }
    }
}

/// Final attenuation and mono to stereo duplication.
pub struct OutputStage {
    gain_db: f32,
    stereo: bool,
}

impl Effect for OutputStage {
    fn name(&self) -> &'static str {
        "output"
    }

    fn process(&mut self, pcm: &mut Pcm) {
        let gain = db_to_gain(self.gain_db.min(0.0));
        if gain != 1.0 {
            pcm.samples.iter_mut().for_each(|s| *s *= gain);
        }
        if self.stereo && pcm.channels == 1 {
            pcm.samples = pcm.samples.iter().flat_map(|s| [*s, *s]).collect();
            pcm.channels = 2;
        }
    }
}

/// The ordered effect chain.
pub struct MasteringChain {
    effects: Vec<Box<dyn Effect>>,
    mp3_bitrate_kbps: u32,
}

impl MasteringChain {
    /// Build the fixed broadcast chain from `config`.
    pub fn new(config: &MasteringConfig) -> Self {
        let effects: Vec<Box<dyn Effect>> = vec![
            Box::new(NoiseGate {
                threshold_db: config.gate_threshold_db,
                ratio: config.gate_ratio,
                attack_ms: 1.0,
                release_ms: config.gate_release_ms,
            }),
            Box::new(HighPass {
                cutoff_hz: config.highpass_cutoff_hz,
            }),
            Box::new(Compressor {
                threshold_db: config.compressor_threshold_db,
                ratio: config.compressor_ratio,
                attack_ms: config.compressor_attack_ms,
                release_ms: config.compressor_release_ms,
            }),
            Box::new(Reverb {
                room_size: config.reverb_room_size,
                damping: config.reverb_damping,
                wet: config.reverb_wet_level,
                dry: config.reverb_dry_level,
            }),
            Box::new(Limiter {
                threshold_db: config.limiter_threshold_db,
                release_ms: config.limiter_release_ms,
            }),
            Box::new(OutputStage {
                gain_db: config.final_gain_db,
                stereo: config.stereo,
            }),
        ];
        Self {
            effects,
            mp3_bitrate_kbps: config.mp3_bitrate_kbps,
        }
    }

    pub fn effect_names(&self) -> Vec<&'static str> {
        self.effects.iter().map(|e| e.name()).collect()
    }

    /// Run every effect over already decoded PCM.
    pub fn process(&mut self, pcm: &mut Pcm) -> Result<()> {
        pcm.check()?;
        for effect in self.effects.iter_mut() {
            effect.process(pcm);
            tracing::trace!(effect = effect.name(), "applied effect");
        }
        pcm.check()
    }

    /// Decode, process and re-encode `clip` in its own format.
    pub fn master(&mut self, clip: &AudioClip) -> Result<AudioClip> {
        self.master_to(clip, clip.format())
    }

    pub fn master_to(&mut self, clip: &AudioClip, format: AudioFormat) -> Result<AudioClip> {
        let mut pcm = codec::decode(clip)?;
        self.process(&mut pcm)?;
        let mastered = codec::encode(&pcm, format, self.mp3_bitrate_kbps)?;
        tracing::info!(
            input_bytes = clip.len(),
            output_bytes = mastered.len(),
            duration_ms = mastered.duration_ms(),
            "mastering applied"
        );
        Ok(mastered)
    }
}
