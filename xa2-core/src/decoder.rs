//! Per-format decoders producing 16-bit interleaved samples.
//!
//! The codec set is closed; a source voice selects its [`Decoder`] variant
//! at creation and the decode driver dispatches through a single match.

mod msadpcm;
mod stream;

#[cfg(feature = "ffmpeg")]
mod ffmpeg;

use crate::buffer::QueuedBuffer;
use crate::engine::EngineError;
use crate::format::{FormatTag, SourceFormat};

pub(crate) use stream::StreamDecoder;

#[derive(Debug)]
pub(crate) enum Decoder {
    MonoPcm8,
    StereoPcm8,
    MonoPcm16,
    StereoPcm16,
    MonoMsAdpcm { block_cache: Vec<i16> },
    StereoMsAdpcm { block_cache: Vec<i16> },
    // Only constructed with the ffmpeg feature; the adaptor logic itself
    // is feature-independent and unit-tested against a mock codec.
    #[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
    Stream(StreamDecoder),
}

impl Decoder {
    /// Selects the decode variant for a validated format. Stream tags are
    /// only available with the `ffmpeg` feature.
    pub fn select(format: &SourceFormat) -> Result<Self, EngineError> {
        let decoder = match (format.tag, format.bits_per_sample, format.channels) {
            (FormatTag::Pcm, 8, 1) => Self::MonoPcm8,
            (FormatTag::Pcm, 8, 2) => Self::StereoPcm8,
            (FormatTag::Pcm, 16, 1) => Self::MonoPcm16,
            (FormatTag::Pcm, 16, 2) => Self::StereoPcm16,
            (FormatTag::MsAdpcm, _, 1) => {
                Self::MonoMsAdpcm { block_cache: vec![0; format.adpcm_samples_per_block()] }
            }
            (FormatTag::MsAdpcm, _, 2) => {
                Self::StereoMsAdpcm { block_cache: vec![0; format.adpcm_samples_per_block() * 2] }
            }
            (FormatTag::WmaV2 | FormatTag::WmaV3 | FormatTag::Xma2, ..) => {
                return Self::select_stream(format);
            }
            _ => {
                return Err(EngineError::UnsupportedFormat {
                    tag: format.tag,
                    channels: format.channels,
                    bits_per_sample: format.bits_per_sample,
                });
            }
        };

        Ok(decoder)
    }

    #[cfg(feature = "ffmpeg")]
    fn select_stream(format: &SourceFormat) -> Result<Self, EngineError> {
        let codec = ffmpeg::FfmpegCodec::open(format)?;
        Ok(Self::Stream(StreamDecoder::new(
            Box::new(codec),
            usize::from(format.channels),
            usize::from(format.block_align),
        )))
    }

    #[cfg(not(feature = "ffmpeg"))]
    fn select_stream(format: &SourceFormat) -> Result<Self, EngineError> {
        log::warn!("Stream format {:?} requires the ffmpeg feature", format.tag);
        Err(EngineError::UnsupportedFormat {
            tag: format.tag,
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
        })
    }

    /// Decodes `dst.len() / channels` frames starting at the absolute
    /// sample offset `cur_offset` of the head buffer.
    pub fn decode(
        &mut self,
        entry: &QueuedBuffer,
        format: &SourceFormat,
        cur_offset: u64,
        dst: &mut [i16],
    ) {
        match self {
            Self::MonoPcm8 | Self::StereoPcm8 => {
                decode_pcm8(&entry.buffer.data, cur_offset, usize::from(format.channels), dst);
            }
            Self::MonoPcm16 | Self::StereoPcm16 => {
                decode_pcm16(&entry.buffer.data, cur_offset, usize::from(format.channels), dst);
            }
            Self::MonoMsAdpcm { block_cache } | Self::StereoMsAdpcm { block_cache } => {
                msadpcm::decode_window(&entry.buffer.data, format, cur_offset, dst, block_cache);
            }
            Self::Stream(decoder) => decoder.decode(entry, format, cur_offset, dst),
        }
    }
}

/// Signed 8-bit promotion to 16-bit, one byte per sample.
fn decode_pcm8(data: &[u8], cur_offset: u64, channels: usize, dst: &mut [i16]) {
    let begin = cur_offset as usize * channels;
    for (i, out) in dst.iter_mut().enumerate() {
        *out = data.get(begin + i).map_or(0, |&b| i16::from(b as i8) << 8);
    }
}

/// Little-endian 16-bit copy starting at the frame offset.
fn decode_pcm16(data: &[u8], cur_offset: u64, channels: usize, dst: &mut [i16]) {
    let begin = cur_offset as usize * channels * 2;
    for (i, out) in dst.iter_mut().enumerate() {
        let byte_idx = begin + i * 2;
        *out = match data.get(byte_idx..byte_idx + 2) {
            Some(bytes) => i16::from_le_bytes([bytes[0], bytes[1]]),
            None => 0,
        };
    }
}
