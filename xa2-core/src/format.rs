//! Source formats and per-codec frame/block math.

use crate::buffer::WmaPacketTable;
use crate::engine::EngineError;

pub(crate) const MSADPCM_PREAMBLE_BYTES_MONO: usize = 7;
pub(crate) const MSADPCM_PREAMBLE_BYTES_STEREO: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    Pcm,
    MsAdpcm,
    WmaV2,
    WmaV3,
    Xma2,
}

impl FormatTag {
    #[must_use]
    pub fn is_stream(self) -> bool {
        matches!(self, Self::WmaV2 | Self::WmaV3 | Self::Xma2)
    }
}

/// Input format of a source voice, fixed at voice creation.
///
/// `block_align` is bytes per frame for PCM, the packet size for WMA/XMA,
/// and the block-alignment parameter of the MSADPCM block math (block byte
/// size `block_align + 22`, `(block_align + 16) * 2` decoded samples per
/// block and channel).
#[derive(Debug, Clone)]
pub struct SourceFormat {
    pub tag: FormatTag,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub block_align: u16,
    /// Extra codec bytes (stream codec extradata); empty for PCM/MSADPCM.
    pub codec_data: Box<[u8]>,
}

impl SourceFormat {
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        let unsupported = || EngineError::UnsupportedFormat {
            tag: self.tag,
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        };

        if self.sample_rate == 0 {
            return Err(unsupported());
        }

        match self.tag {
            FormatTag::Pcm => {
                if !matches!(self.bits_per_sample, 8 | 16) || !matches!(self.channels, 1 | 2) {
                    return Err(unsupported());
                }
            }
            FormatTag::MsAdpcm => {
                if !matches!(self.channels, 1 | 2) || self.block_align == 0 {
                    return Err(unsupported());
                }
            }
            FormatTag::WmaV2 | FormatTag::WmaV3 | FormatTag::Xma2 => {
                if self.channels == 0 || self.block_align == 0 {
                    return Err(unsupported());
                }
            }
        }

        Ok(())
    }

    /// Bytes per interleaved frame; meaningful for PCM only.
    pub(crate) fn pcm_frame_bytes(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits_per_sample / 8)
    }

    /// Byte size of one MSADPCM block, all channels included.
    pub(crate) fn adpcm_block_bytes(&self) -> usize {
        (usize::from(self.block_align) + 22) * usize::from(self.channels)
    }

    /// Decoded samples per MSADPCM block, per channel.
    pub(crate) fn adpcm_samples_per_block(&self) -> usize {
        (usize::from(self.block_align) + 16) * 2
    }

    /// Bytes per decoded output frame (16-bit interleaved); used to scale
    /// the WMA/XMA cumulative packet table.
    pub(crate) fn decoded_frame_bytes(&self) -> usize {
        usize::from(self.channels) * 2
    }

    /// Total decodable frames in a buffer of `data_len` bytes.
    pub(crate) fn total_samples(&self, data_len: usize, wma: Option<&WmaPacketTable>) -> u64 {
        match self.tag {
            FormatTag::Pcm => (data_len / self.pcm_frame_bytes()) as u64,
            FormatTag::MsAdpcm => {
                ((data_len / self.adpcm_block_bytes()) * self.adpcm_samples_per_block()) as u64
            }
            FormatTag::WmaV2 | FormatTag::WmaV3 | FormatTag::Xma2 => wma.map_or(0, |table| {
                u64::from(table.total_decoded_bytes()) / self.decoded_frame_bytes() as u64
            }),
        }
    }
}
