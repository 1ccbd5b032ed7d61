//! RIFF/WAVE container handling at the chunk level.

use super::{AudioFormat, AudioFormatError};

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
/// Data size written by streaming encoders that do not know the length.
const UNKNOWN_SIZE: u32 = u32::MAX;

/// Fields of the `fmt ` chunk that decide whether payloads can be spliced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    fn from_chunk(body: &[u8]) -> Result<Self, AudioFormatError> {
        if body.len() < 16 {
            return Err(invalid("fmt chunk shorter than 16 bytes"));
        }
        let format = Self {
            format_tag: le_u16(&body[0..2]),
            channels: le_u16(&body[2..4]),
            sample_rate: le_u32(&body[4..8]),
            byte_rate: le_u32(&body[8..12]),
            block_align: le_u16(&body[12..14]),
            bits_per_sample: le_u16(&body[14..16]),
        };
        if format.channels == 0 || format.sample_rate == 0 || format.block_align == 0 {
            return Err(invalid("fmt chunk declares zero channels, rate or block size"));
        }
        Ok(format)
    }

    /// Bytes per second of audio, derived from rate and block size.
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.block_align)
    }

    /// Zero-amplitude PCM covering `ms` milliseconds.
    pub fn silence(&self, ms: u64) -> Vec<u8> {
        let frames = (u64::from(self.sample_rate) * ms + 500) / 1000;
        let len = frames as usize * usize::from(self.block_align);
        // 8-bit PCM is unsigned with its midpoint at 0x80
        let fill = if self.format_tag == 1 && self.bits_per_sample == 8 {
            0x80
        } else {
            0x00
        };
        vec![fill; len]
    }

    pub fn duration_ms(&self, data_len: usize) -> u64 {
        let frames = data_len as u64 / u64::from(self.block_align);
        frames * 1000 / u64::from(self.sample_rate)
    }
}

/// A parsed WAV file borrowing its `fmt ` and `data` chunk bodies.
#[derive(Debug, Clone, Copy)]
pub struct WavStream<'a> {
    pub format: WavFormat,
    pub fmt_chunk: &'a [u8],
    pub data: &'a [u8],
}

impl WavStream<'_> {
    pub fn duration_ms(&self) -> u64 {
        self.format.duration_ms(self.data.len())
    }
}

/// Locate the `fmt ` and `data` chunks. Other chunks are skipped.
pub fn parse(bytes: &[u8]) -> Result<WavStream<'_>, AudioFormatError> {
    if bytes.len() < RIFF_HEADER_LEN || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(invalid("missing RIFF/WAVE header"));
    }

    let mut fmt_chunk = None;
    let mut data = None;
    let mut pos = RIFF_HEADER_LEN;

    while pos + CHUNK_HEADER_LEN <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let declared = le_u32(&bytes[pos + 4..pos + 8]);
        let body_start = pos + CHUNK_HEADER_LEN;
        let available = bytes.len() - body_start;

        if id == b"data" {
            // tolerate placeholder or overlong sizes from streamed output
            let len = if declared == UNKNOWN_SIZE || declared as usize > available {
                available
            } else {
                declared as usize
            };
            data = Some(&bytes[body_start..body_start + len]);
            if fmt_chunk.is_some() {
                break;
            }
            pos = body_start + len + (len & 1);
            continue;
        }

        let len = declared as usize;
        if len > available {
            return Err(invalid(format!(
                "chunk {:?} overruns the file",
                String::from_utf8_lossy(id)
            )));
        }
        if id == b"fmt " {
            fmt_chunk = Some(&bytes[body_start..body_start + len]);
        }
        pos = body_start + len + (len & 1);
    }

    let fmt_chunk = fmt_chunk.ok_or_else(|| invalid("no fmt chunk"))?;
    let data = data.ok_or_else(|| invalid("no data chunk"))?;
    let format = WavFormat::from_chunk(fmt_chunk)?;

    Ok(WavStream {
        format,
        fmt_chunk,
        data,
    })
}

/// Write a single WAV file from a `fmt ` body and data pieces.
pub fn write(fmt_chunk: &[u8], pieces: &[&[u8]]) -> Result<Vec<u8>, AudioFormatError> {
    let data_len: usize = pieces.iter().map(|p| p.len()).sum();
    let fmt_pad = fmt_chunk.len() & 1;
    let data_pad = data_len & 1;
    let riff_len = 4 + CHUNK_HEADER_LEN + fmt_chunk.len() + fmt_pad + CHUNK_HEADER_LEN + data_len
        + data_pad;

    let riff_len = u32::try_from(riff_len)
        .map_err(|_| invalid("assembled audio exceeds the 4 GiB WAV limit"))?;

    let mut out = Vec::with_capacity(riff_len as usize + CHUNK_HEADER_LEN);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&(fmt_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(fmt_chunk);
    if fmt_pad == 1 {
        out.push(0);
    }

    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());
    for piece in pieces {
        out.extend_from_slice(piece);
    }
    if data_pad == 1 {
        out.push(0);
    }

    Ok(out)
}

fn invalid(reason: impl Into<String>) -> AudioFormatError {
    AudioFormatError::new(AudioFormat::Wav, reason)
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
