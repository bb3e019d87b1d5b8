//! Client-submitted playback buffers and submit-time validation.

use crate::engine::EngineError;
use crate::format::SourceFormat;
use std::sync::Arc;

/// `loop_count` value encoding an endless loop.
pub const LOOP_INFINITE: u32 = 255;
/// Largest finite `loop_count`.
pub const MAX_LOOP_COUNT: u32 = 254;

/// An immutable encoded audio region queued on a source voice.
///
/// All positions and lengths are in source-rate samples (frames).
/// `play_length == 0` plays from `play_begin` to the end of the data.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub data: Arc<[u8]>,
    pub play_begin: u32,
    pub play_length: u32,
    pub loop_begin: u32,
    pub loop_length: u32,
    /// 0 = no loop, [`LOOP_INFINITE`] = endless, otherwise decremented on
    /// each loop completion.
    pub loop_count: u32,
    pub end_of_stream: bool,
    /// Opaque tag handed back to buffer callbacks.
    pub context: u64,
}

impl AudioBuffer {
    /// Play the whole of `data` once, with the end-of-stream flag set.
    #[must_use]
    pub fn once(data: Arc<[u8]>) -> Self {
        Self {
            data,
            play_begin: 0,
            play_length: 0,
            loop_begin: 0,
            loop_length: 0,
            loop_count: 0,
            end_of_stream: true,
            context: 0,
        }
    }
}

/// Per-packet seek table accompanying WMA/XMA buffers.
///
/// Entry `i` is the total decoded byte count produced by packets `0..=i`.
#[derive(Debug, Clone)]
pub struct WmaPacketTable {
    pub decoded_cumulative_bytes: Box<[u32]>,
}

impl WmaPacketTable {
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        if self.decoded_cumulative_bytes.is_empty() {
            return Err(EngineError::InvalidPacketTable);
        }

        let monotonic = self
            .decoded_cumulative_bytes
            .windows(2)
            .all(|pair| pair[0] <= pair[1]);
        if !monotonic {
            return Err(EngineError::InvalidPacketTable);
        }

        Ok(())
    }

    pub(crate) fn total_decoded_bytes(&self) -> u32 {
        self.decoded_cumulative_bytes.last().copied().unwrap_or(0)
    }

    /// Index of the first packet whose cumulative decoded bytes cover
    /// `target_byte`, and the cumulative count before that packet.
    pub(crate) fn seek_packet(&self, target_byte: u64) -> Option<(usize, u64)> {
        let mut before = 0_u64;
        for (idx, &cumulative) in self.decoded_cumulative_bytes.iter().enumerate() {
            if u64::from(cumulative) > target_byte {
                return Some((idx, before));
            }
            before = u64::from(cumulative);
        }
        None
    }
}

/// A queue entry: the client buffer plus the mutable loop state and the
/// absolute play/loop end positions resolved at submit time.
#[derive(Debug, Clone)]
pub(crate) struct QueuedBuffer {
    pub buffer: AudioBuffer,
    pub wma: Option<WmaPacketTable>,
    pub loops_remaining: u32,
    pub play_end: u64,
    pub loop_end: u64,
}

impl QueuedBuffer {
    /// Validates the buffer against the voice format, normalizes
    /// `play_length == 0`, and resolves the absolute end positions.
    pub fn new(
        mut buffer: AudioBuffer,
        wma: Option<WmaPacketTable>,
        format: &SourceFormat,
    ) -> Result<Self, EngineError> {
        if format.tag.is_stream() {
            let table = wma.as_ref().ok_or(EngineError::MissingPacketTable)?;
            table.validate()?;
        } else if wma.is_some() {
            return Err(EngineError::UnexpectedPacketTable);
        }

        let total = format.total_samples(buffer.data.len(), wma.as_ref());
        if total == 0 {
            return Err(EngineError::EmptyBuffer);
        }

        if buffer.play_length == 0 {
            if u64::from(buffer.play_begin) >= total {
                return Err(EngineError::InvalidPlayRegion);
            }
            buffer.play_length = (total - u64::from(buffer.play_begin)) as u32;
        }

        let play_end = u64::from(buffer.play_begin) + u64::from(buffer.play_length);
        if play_end > total {
            return Err(EngineError::InvalidPlayRegion);
        }

        let loop_end = u64::from(buffer.loop_begin) + u64::from(buffer.loop_length);
        if buffer.loop_count > 0 && buffer.loop_length > 0 && loop_end > total {
            return Err(EngineError::InvalidLoopRegion);
        }

        if buffer.loop_count > MAX_LOOP_COUNT && buffer.loop_count != LOOP_INFINITE {
            return Err(EngineError::InvalidLoopRegion);
        }

        let loops_remaining = buffer.loop_count;
        Ok(Self { buffer, wma, loops_remaining, play_end, loop_end })
    }

    /// End of the region currently being played: the loop region while
    /// loops remain, the play region otherwise.
    pub fn region_end(&self) -> u64 {
        if self.loops_remaining > 0 && self.buffer.loop_length > 0 {
            self.loop_end
        } else {
            self.play_end
        }
    }
}
