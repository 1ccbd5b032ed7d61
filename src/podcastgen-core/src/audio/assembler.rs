//! Byte-level concatenation of synthesized clips.
//!
//! Clips are never decoded here. Container headers and tags are stripped,
//! payloads are joined in order, and a pre-rendered silence gap of the same
//! format is spliced in at every change of speaker. Crossfading is not
//! supported since it would require sample-level mixing.

use super::{AudioClip, AudioFormat, AudioFormatError, mp3, wav};
use crate::error::{PodcastError, Result};

/// Default inter-segment pause.
pub const DEFAULT_PAUSE_MS: u64 = 300;

/// Silence inserted at speaker changes. Zero disables pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseSpec {
    pub duration_ms: u64,
}

impl PauseSpec {
    pub fn new(duration_ms: u64) -> Self {
        Self { duration_ms }
    }

    pub fn none() -> Self {
        Self { duration_ms: 0 }
    }
}

impl Default for PauseSpec {
    fn default() -> Self {
        Self::new(DEFAULT_PAUSE_MS)
    }
}

/// One synthesized segment in assembly order.
#[derive(Debug, Clone)]
pub struct AssemblyPiece {
    /// Segment index, used to detect gaps left by skipped segments.
    pub index: usize,
    pub speaker: String,
    /// True if this piece continues the previous segment after a split.
    pub continuation: bool,
    pub clip: AudioClip,
}

impl AssemblyPiece {
    /// A pause precedes this piece when the speaker changes, or when a
    /// skipped segment left a gap before it.
    fn wants_pause_after(&self, previous: &AssemblyPiece) -> bool {
        self.speaker != previous.speaker || self.index != previous.index + 1
    }
}

/// Join `pieces` in order into a single clip.
pub fn assemble(pieces: &[AssemblyPiece], pause: &PauseSpec) -> Result<AudioClip> {
    let first = pieces
        .first()
        .ok_or_else(|| PodcastError::Assembly("no clips to assemble".to_string()))?;
    let format = first.clip.format();

    if let Some(odd) = pieces.iter().find(|p| p.clip.format() != format) {
        return Err(PodcastError::Assembly(format!(
            "segment {} is {} but the stream is {}",
            odd.index,
            odd.clip.format(),
            format
        )));
    }

    let clip = match format {
        AudioFormat::Wav => assemble_wav(pieces, pause),
        AudioFormat::Mp3 => assemble_mp3(pieces, pause),
    }?;

    tracing::debug!(
        clips = pieces.len(),
        bytes = clip.len(),
        duration_ms = clip.duration_ms(),
        "assembled audio"
    );
    Ok(clip)
}

fn pause_positions(pieces: &[AssemblyPiece], pause: &PauseSpec) -> Vec<bool> {
    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| {
            pause.duration_ms > 0 && i > 0 && piece.wants_pause_after(&pieces[i - 1])
        })
        .collect()
}

fn assemble_wav(pieces: &[AssemblyPiece], pause: &PauseSpec) -> Result<AudioClip> {
    let streams = pieces
        .iter()
        .map(|p| wav::parse(p.clip.bytes()).map_err(|e| corrupt(p.index, e)))
        .collect::<Result<Vec<_>>>()?;

    let reference = streams[0].format;
    for (piece, stream) in pieces.iter().zip(&streams) {
        if stream.format != reference {
            return Err(PodcastError::Assembly(format!(
                "segment {} has WAV format {:?}, expected {:?}",
                piece.index, stream.format, reference
            )));
        }
    }

    let silence = reference.silence(pause.duration_ms);
    let mut payload: Vec<&[u8]> = Vec::with_capacity(pieces.len() * 2);
    for (stream, pause_before) in streams.iter().zip(pause_positions(pieces, pause)) {
        if pause_before {
            payload.push(&silence);
        }
        payload.push(stream.data);
    }

    let data_len: usize = payload.iter().map(|p| p.len()).sum();
    let bytes = wav::write(streams[0].fmt_chunk, &payload)
        .map_err(|e| PodcastError::Assembly(e.to_string()))?;
    Ok(AudioClip::from_parts(
        bytes,
        AudioFormat::Wav,
        reference.duration_ms(data_len),
    ))
}

fn assemble_mp3(pieces: &[AssemblyPiece], pause: &PauseSpec) -> Result<AudioClip> {
    let streams = pieces
        .iter()
        .map(|p| mp3::parse(p.clip.bytes()).map_err(|e| corrupt(p.index, e)))
        .collect::<Result<Vec<_>>>()?;

    let reference = streams[0].header;
    for (piece, stream) in pieces.iter().zip(&streams) {
        if stream.header.stream_key() != reference.stream_key() {
            return Err(PodcastError::Assembly(format!(
                "segment {} is {} Hz {}, expected {} Hz {}",
                piece.index,
                stream.header.sample_rate(),
                channel_label(&stream.header),
                reference.sample_rate(),
                channel_label(&reference),
            )));
        }
    }

    let silent = mp3::silent_frame(&reference);
    let silent_frames = mp3::silent_frame_count(&reference, pause.duration_ms);
    let samples_per_frame = u64::from(reference.samples_per_frame());

    let positions = pause_positions(pieces, pause);
    let pauses = positions.iter().filter(|p| **p).count();
    let capacity = streams.iter().map(|s| s.payload_len()).sum::<usize>()
        + pauses * silent_frames as usize * silent.len();

    let mut bytes = Vec::with_capacity(capacity);
    let mut total_samples = 0u64;
    for (stream, pause_before) in streams.iter().zip(positions) {
        if pause_before {
            for _ in 0..silent_frames {
                bytes.extend_from_slice(&silent);
            }
            total_samples += silent_frames * samples_per_frame;
        }
        for frame in &stream.frames {
            bytes.extend_from_slice(frame);
        }
        total_samples += stream.total_samples;
    }

    let duration_ms = total_samples * 1000 / u64::from(reference.sample_rate());
    Ok(AudioClip::from_parts(bytes, AudioFormat::Mp3, duration_ms))
}

fn channel_label(header: &mp3::FrameHeader) -> &'static str {
    if header.is_mono() { "mono" } else { "stereo" }
}

fn corrupt(index: usize, err: AudioFormatError) -> PodcastError {
    PodcastError::Assembly(format!("segment {index}: {err}"))
}
