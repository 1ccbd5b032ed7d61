//! PCM decode/encode for the mastering stage.

use std::io::Cursor;

use mp3lame_encoder::{Bitrate, Builder, DualPcm, FlushNoGap};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::{AudioClip, AudioFormat};
use crate::error::{PodcastError, Result};

/// Interleaved floating point samples in [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl Pcm {
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn duration_ms(&self) -> u64 {
        self.frames() as u64 * 1000 / u64::from(self.sample_rate.max(1))
    }

    /// Reject buffers the effect chain cannot process.
    pub fn check(&self) -> Result<()> {
        if self.channels == 0 || self.sample_rate == 0 {
            return Err(PodcastError::Mastering(
                "PCM has zero channels or sample rate".to_string(),
            ));
        }
        if self.samples.is_empty() {
            return Err(PodcastError::Mastering("PCM buffer is empty".to_string()));
        }
        if self.samples.len() % usize::from(self.channels) != 0 {
            return Err(PodcastError::Mastering(
                "PCM length is not a whole number of frames".to_string(),
            ));
        }
        if let Some(pos) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(PodcastError::Mastering(format!(
                "non-finite sample at position {pos}"
            )));
        }
        Ok(())
    }
}

/// Decode a clip to PCM.
pub fn decode(clip: &AudioClip) -> Result<Pcm> {
    match clip.format() {
        AudioFormat::Wav => decode_wav(clip.bytes()),
        AudioFormat::Mp3 => decode_with_symphonia(clip.bytes(), "mp3"),
    }
}

/// Encode PCM into `format`.
pub fn encode(pcm: &Pcm, format: AudioFormat, mp3_bitrate_kbps: u32) -> Result<AudioClip> {
    let bytes = match format {
        AudioFormat::Wav => encode_wav(pcm)?,
        AudioFormat::Mp3 => encode_mp3(pcm, mp3_bitrate_kbps)?,
    };
    AudioClip::probe(bytes, format).map_err(|e| PodcastError::Mastering(e.to_string()))
}

fn decode_wav(bytes: &[u8]) -> Result<Pcm> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(mastering)?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(mastering)?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(mastering)?
        }
    };

    Ok(Pcm {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

fn decode_with_symphonia(bytes: &[u8], extension: &str) -> Result<Pcm> {
    let source = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(extension);

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(mastering)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PodcastError::Mastering("no decodable audio track".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(mastering)?;

    let mut samples = Vec::new();
    let mut channels = 0u16;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(mastering(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                tracing::debug!(error = msg, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(mastering(e)),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count() as u16;
        sample_rate = spec.rate;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    Ok(Pcm {
        samples,
        channels,
        sample_rate,
    })
}

fn encode_wav(pcm: &Pcm) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: pcm.channels,
        sample_rate: pcm.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).map_err(mastering)?;
        for sample in &pcm.samples {
            writer.write_sample(to_i16(*sample)).map_err(mastering)?;
        }
        writer.finalize().map_err(mastering)?;
    }
    Ok(bytes)
}

fn encode_mp3(pcm: &Pcm, bitrate_kbps: u32) -> Result<Vec<u8>> {
    let (left, right): (Vec<i16>, Vec<i16>) = match pcm.channels {
        1 => pcm.samples.iter().map(|s| (to_i16(*s), to_i16(*s))).unzip(),
        2 => pcm
            .samples
            .chunks_exact(2)
            .map(|frame| (to_i16(frame[0]), to_i16(frame[1])))
            .unzip(),
        n => {
            return Err(PodcastError::Mastering(format!(
                "cannot encode {n}-channel audio as mp3"
            )));
        }
    };

    let mut builder = Builder::new()
        .ok_or_else(|| PodcastError::Mastering("failed to create LAME encoder".to_string()))?;
    builder.set_num_channels(2).map_err(lame)?;
    builder.set_sample_rate(pcm.sample_rate).map_err(lame)?;
    builder.set_brate(lame_bitrate(bitrate_kbps)).map_err(lame)?;
    builder
        .set_quality(mp3lame_encoder::Quality::Best)
        .map_err(lame)?;
    let mut encoder = builder.build().map_err(lame)?;

    let input = DualPcm {
        left: left.as_slice(),
        right: right.as_slice(),
    };
    let mut bytes = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(left.len()));
    encoder.encode_to_vec(input, &mut bytes).map_err(lame)?;
    encoder.flush_to_vec::<FlushNoGap>(&mut bytes).map_err(lame)?;
    Ok(bytes)
}

fn lame_bitrate(kbps: u32) -> Bitrate {
    match kbps {
        0..=64 => Bitrate::Kbps64,
        65..=96 => Bitrate::Kbps96,
        97..=128 => Bitrate::Kbps128,
        129..=160 => Bitrate::Kbps160,
        161..=192 => Bitrate::Kbps192,
        193..=256 => Bitrate::Kbps256,
        _ => Bitrate::Kbps320,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

fn mastering(err: impl std::fmt::Display) -> PodcastError {
    PodcastError::Mastering(err.to_string())
}

fn lame(err: impl std::fmt::Debug) -> PodcastError {
    PodcastError::Mastering(format!("LAME: {err:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_round_trip() {
        let pcm = Pcm {
            samples: vec![0.0, 0.5, -0.5, 0.25],
            channels: 2,
            sample_rate: 8_000,
        };
        let clip = encode(&pcm, AudioFormat::Wav, 192).unwrap();
        let decoded = decode(&clip).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.sample_rate, 8_000);
        for (a, b) in pcm.samples.iter().zip(&decoded.samples) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_check_rejects_malformed_pcm() {
        let mut pcm = Pcm {
            samples: vec![0.0, f32::NAN],
            channels: 1,
            sample_rate: 8_000,
        };
        assert!(pcm.check().is_err());
        pcm.samples = vec![];
        assert!(pcm.check().is_err());
        pcm.samples = vec![0.1, 0.2, 0.3];
        pcm.channels = 2;
        assert!(pcm.check().is_err());
        pcm.channels = 1;
        assert!(pcm.check().is_ok());
    }

    #[test]
    fn test_to_i16_clamps() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
        assert_eq!(to_i16(0.0), 0);
    }
}
