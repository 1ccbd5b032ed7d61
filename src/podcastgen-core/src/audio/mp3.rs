//! MPEG Layer III frame scanning.
//!
//! MP3 is a sequence of self-delimiting frames, so clips can be joined by
//! concatenating frames once ID3 tags and Xing/Info/VBRI header frames are
//! removed. Only Layer III with a fixed bitrate index per frame is accepted;
//! free-format streams are rejected.

use super::{AudioFormat, AudioFormatError};

const ID3V2_HEADER_LEN: usize = 10;
const ID3V1_LEN: usize = 128;
const APE_FOOTER_LEN: usize = 32;

const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    V1,
    V2,
    V25,
}

impl MpegVersion {
    fn bits(self) -> u8 {
        match self {
            MpegVersion::V25 => 0b00,
            MpegVersion::V2 => 0b10,
            MpegVersion::V1 => 0b11,
        }
    }
}

/// Decoded 4-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub has_crc: bool,
    pub bitrate_index: u8,
    pub sample_rate_index: u8,
    pub padding: bool,
    /// 0 stereo, 1 joint stereo, 2 dual channel, 3 mono.
    pub channel_mode: u8,
}

impl FrameHeader {
    pub fn parse(b: &[u8]) -> Option<Self> {
        if b.len() < 4 || b[0] != 0xFF || (b[1] & 0xE0) != 0xE0 {
            return None;
        }
        let version = match (b[1] >> 3) & 0b11 {
            0b00 => MpegVersion::V25,
            0b10 => MpegVersion::V2,
            0b11 => MpegVersion::V1,
            _ => return None,
        };
        // layer bits 01 = Layer III
        if (b[1] >> 1) & 0b11 != 0b01 {
            return None;
        }
        let bitrate_index = b[2] >> 4;
        let sample_rate_index = (b[2] >> 2) & 0b11;
        if bitrate_index == 0 || bitrate_index == 0b1111 || sample_rate_index == 0b11 {
            return None;
        }
        Some(Self {
            version,
            has_crc: b[1] & 1 == 0,
            bitrate_index,
            sample_rate_index,
            padding: (b[2] >> 1) & 1 == 1,
            channel_mode: b[3] >> 6,
        })
    }

    pub fn bitrate_kbps(&self) -> u32 {
        let table = match self.version {
            MpegVersion::V1 => &BITRATES_V1_L3,
            MpegVersion::V2 | MpegVersion::V25 => &BITRATES_V2_L3,
        };
        table[usize::from(self.bitrate_index)]
    }

    pub fn sample_rate(&self) -> u32 {
        let base = [44_100, 48_000, 32_000][usize::from(self.sample_rate_index)];
        match self.version {
            MpegVersion::V1 => base,
            MpegVersion::V2 => base / 2,
            MpegVersion::V25 => base / 4,
        }
    }

    pub fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::V1 => 1152,
            MpegVersion::V2 | MpegVersion::V25 => 576,
        }
    }

    pub fn is_mono(&self) -> bool {
        self.channel_mode == 3
    }

    pub fn frame_len(&self) -> usize {
        let coefficient = match self.version {
            MpegVersion::V1 => 144_000,
            MpegVersion::V2 | MpegVersion::V25 => 72_000,
        };
        (coefficient * self.bitrate_kbps() / self.sample_rate()) as usize + usize::from(self.padding)
    }

    fn side_info_len(&self) -> usize {
        match (self.version, self.is_mono()) {
            (MpegVersion::V1, true) => 17,
            (MpegVersion::V1, false) => 32,
            (_, true) => 9,
            (_, false) => 17,
        }
    }

    /// Header bytes for a frame with the same stream parameters.
    fn to_bytes(self) -> [u8; 4] {
        [
            0xFF,
            0xE0 | (self.version.bits() << 3) | (0b01 << 1) | u8::from(!self.has_crc),
            (self.bitrate_index << 4) | (self.sample_rate_index << 2) | (u8::from(self.padding) << 1),
            self.channel_mode << 6,
        ]
    }

    /// Parameters that must match for two streams to be concatenated.
    pub fn stream_key(&self) -> (MpegVersion, u32, bool) {
        (self.version, self.sample_rate(), self.is_mono())
    }
}

/// Audio frames of one clip with tags and header frames removed.
#[derive(Debug, Clone)]
pub struct Mp3Stream<'a> {
    /// Header of the first audio frame.
    pub header: FrameHeader,
    pub frames: Vec<&'a [u8]>,
    pub total_samples: u64,
}

impl Mp3Stream<'_> {
    pub fn duration_ms(&self) -> u64 {
        self.total_samples * 1000 / u64::from(self.header.sample_rate())
    }

    pub fn payload_len(&self) -> usize {
        self.frames.iter().map(|f| f.len()).sum()
    }
}

/// Scan a clip into its audio frames.
pub fn parse(bytes: &[u8]) -> Result<Mp3Stream<'_>, AudioFormatError> {
    let body = strip_tags(bytes)?;

    let mut frames = Vec::new();
    let mut header: Option<FrameHeader> = None;
    let mut total_samples = 0u64;
    let mut pos = 0;
    let mut skipped = 0usize;

    while pos + 4 <= body.len() {
        let Some(frame) = FrameHeader::parse(&body[pos..]) else {
            pos += 1;
            skipped += 1;
            continue;
        };
        let len = frame.frame_len();
        if pos + len > body.len() {
            tracing::debug!(offset = pos, "dropping truncated trailing mp3 frame");
            break;
        }
        let bytes = &body[pos..pos + len];

        if frames.is_empty() && is_info_frame(&frame, bytes) {
            pos += len;
            continue;
        }

        match header {
            None => header = Some(frame),
            Some(first) if first.stream_key() != frame.stream_key() => {
                return Err(invalid("stream changes sample rate or channel layout"));
            }
            Some(_) => {}
        }

        total_samples += u64::from(frame.samples_per_frame());
        frames.push(bytes);
        pos += len;
    }

    if skipped > 0 {
        tracing::debug!(bytes = skipped, "skipped non-frame bytes in mp3 stream");
    }

    let header = header.ok_or_else(|| invalid("no MPEG Layer III frames found"))?;
    Ok(Mp3Stream {
        header,
        frames,
        total_samples,
    })
}

/// Remove a leading ID3v2 tag and trailing ID3v1/APEv2 tags.
fn strip_tags(bytes: &[u8]) -> Result<&[u8], AudioFormatError> {
    let mut body = bytes;

    if body.len() >= ID3V2_HEADER_LEN && &body[0..3] == b"ID3" {
        let size = synchsafe(&body[6..10]);
        let footer = if body[5] & 0x10 != 0 { ID3V2_HEADER_LEN } else { 0 };
        let skip = ID3V2_HEADER_LEN + size + footer;
        if skip > body.len() {
            return Err(invalid("ID3v2 tag overruns the file"));
        }
        body = &body[skip..];
    }

    if body.len() >= ID3V1_LEN && &body[body.len() - ID3V1_LEN..body.len() - ID3V1_LEN + 3] == b"TAG"
    {
        body = &body[..body.len() - ID3V1_LEN];
    }

    if body.len() >= APE_FOOTER_LEN && &body[body.len() - APE_FOOTER_LEN..body.len() - 24] == b"APETAGEX"
    {
        let footer = &body[body.len() - APE_FOOTER_LEN..];
        let tag_size = u32::from_le_bytes([footer[12], footer[13], footer[14], footer[15]]) as usize;
        let flags = u32::from_le_bytes([footer[20], footer[21], footer[22], footer[23]]);
        let header = if flags & 0x8000_0000 != 0 { APE_FOOTER_LEN } else { 0 };
        let total = tag_size + header;
        if total <= body.len() {
            body = &body[..body.len() - total];
        }
    }

    Ok(body)
}

fn synchsafe(b: &[u8]) -> usize {
    (usize::from(b[0] & 0x7F) << 21)
        | (usize::from(b[1] & 0x7F) << 14)
        | (usize::from(b[2] & 0x7F) << 7)
        | usize::from(b[3] & 0x7F)
}

/// Xing/Info (LAME) or VBRI (Fraunhofer) header frames carry per-file
/// frame counts that would be wrong after concatenation.
fn is_info_frame(header: &FrameHeader, frame: &[u8]) -> bool {
    let xing_at = 4 + if header.has_crc { 2 } else { 0 } + header.side_info_len();
    let tag_at = |offset: usize| frame.get(offset..offset + 4);
    matches!(tag_at(xing_at), Some(b"Xing") | Some(b"Info")) || matches!(tag_at(36), Some(b"VBRI"))
}

/// A Layer III frame with zeroed side info, which decodes to silence.
pub fn silent_frame(reference: &FrameHeader) -> Vec<u8> {
    let header = FrameHeader {
        has_crc: false,
        padding: false,
        ..*reference
    };
    let mut frame = vec![0u8; header.frame_len()];
    frame[..4].copy_from_slice(&header.to_bytes());
    frame
}

/// Number of silent frames that cover at least `ms` milliseconds.
pub fn silent_frame_count(reference: &FrameHeader, ms: u64) -> u64 {
    let samples = u64::from(reference.sample_rate()) * ms;
    samples.div_ceil(1000 * u64::from(reference.samples_per_frame()))
}

fn invalid(reason: impl Into<String>) -> AudioFormatError {
    AudioFormatError::new(AudioFormat::Mp3, reason)
}
