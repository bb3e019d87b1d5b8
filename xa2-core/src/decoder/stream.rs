//! Pull-model adaptor for packet-framed stream codecs (WMA/XMA).
//!
//! Stream codecs are stateful and decode whole packets, while the decode
//! driver asks for arbitrary `(offset, samples)` windows. This adaptor
//! owns the encoded-packet cursor and a decoded-frame staging cache and
//! reconciles the two views, by local rewind when the request lands inside
//! the staged frame and by packet-level seek otherwise.

use crate::buffer::QueuedBuffer;
use crate::format::SourceFormat;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("stream codec error: {0}")]
pub(crate) struct StreamCodecError(pub String);

/// The push-packets / pull-frames surface of a stream codec.
pub(crate) trait StreamCodec {
    fn send_packet(&mut self, packet: &[u8]) -> Result<(), StreamCodecError>;

    /// Pulls one decoded frame into `cache` as interleaved f32, returning
    /// the frame count, or `None` when the codec needs another packet.
    fn receive_frame(&mut self, cache: &mut Vec<f32>) -> Result<Option<usize>, StreamCodecError>;

    /// Drops all internal codec state ahead of a seek.
    fn flush(&mut self);

    /// Trailing zero padding bytes the codec requires after the last
    /// packet of a stream.
    fn input_padding(&self) -> usize;
}

pub(crate) struct StreamDecoder {
    codec: Box<dyn StreamCodec>,
    channels: usize,
    block_align: usize,
    /// Encoded byte offset into the current buffer.
    enc_offset: usize,
    /// Decoded frames the core believes this adaptor has produced.
    dec_offset: u64,
    /// Staging for the final partial packet plus required zero padding;
    /// grown, never shrunk.
    padding: Vec<u8>,
    /// Interleaved decoded-frame cache with the unread region bracketed by
    /// `convert_offset..convert_samples`.
    convert_cache: Vec<f32>,
    convert_samples: usize,
    convert_offset: usize,
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("channels", &self.channels)
            .field("block_align", &self.block_align)
            .field("enc_offset", &self.enc_offset)
            .field("dec_offset", &self.dec_offset)
            .field("convert_samples", &self.convert_samples)
            .field("convert_offset", &self.convert_offset)
            .finish_non_exhaustive()
    }
}

fn convert_sample(sample: f32) -> i16 {
    (sample * 32768.0).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

impl StreamDecoder {
    #[cfg_attr(not(feature = "ffmpeg"), allow(dead_code))]
    pub fn new(codec: Box<dyn StreamCodec>, channels: usize, block_align: usize) -> Self {
        Self {
            codec,
            channels,
            block_align,
            enc_offset: 0,
            dec_offset: 0,
            padding: Vec::new(),
            convert_cache: Vec::new(),
            convert_samples: 0,
            convert_offset: 0,
        }
    }

    /// Serves a decoded window with the same contract as the PCM/ADPCM
    /// decoders. Codec errors zero-fill the unserved remainder; the
    /// decoded-offset ramp advances regardless so the voice keeps moving.
    pub fn decode(
        &mut self,
        entry: &QueuedBuffer,
        format: &SourceFormat,
        cur_offset: u64,
        dst: &mut [i16],
    ) {
        let channels = self.channels;
        let frames = dst.len() / channels;

        if let Err(err) = self.reconcile(entry, format, cur_offset) {
            log::error!("Stream seek to sample {cur_offset} failed: {err}");
            dst.fill(0);
            self.dec_offset = cur_offset + frames as u64;
            return;
        }

        let mut done = 0_usize;
        while done < frames {
            if self.convert_offset < self.convert_samples {
                let take = (self.convert_samples - self.convert_offset).min(frames - done);
                let src = &self.convert_cache[self.convert_offset * channels..];
                for (out, &sample) in dst[done * channels..].iter_mut().zip(&src[..take * channels])
                {
                    *out = convert_sample(sample);
                }
                self.convert_offset += take;
                done += take;
                continue;
            }

            match self.pull_frame(&entry.buffer.data) {
                Ok(true) => {}
                Ok(false) => {
                    log::debug!("Stream data exhausted; zero-filling {} frames", frames - done);
                    dst[done * channels..].fill(0);
                    break;
                }
                Err(err) => {
                    log::error!("Stream decode failed: {err}; zero-filling {} frames", frames - done);
                    dst[done * channels..].fill(0);
                    break;
                }
            }
        }

        self.dec_offset = cur_offset + frames as u64;
    }

    /// Aligns the staged decode state with the requested sample offset.
    fn reconcile(
        &mut self,
        entry: &QueuedBuffer,
        format: &SourceFormat,
        cur_offset: u64,
    ) -> Result<(), StreamCodecError> {
        if cur_offset == self.dec_offset {
            return Ok(());
        }

        if cur_offset < self.dec_offset {
            let delta = self.dec_offset - cur_offset;
            if delta <= self.convert_offset as u64 {
                // The resampler looked back within the staged frame after a
                // fractional-position correction; rewind locally.
                self.convert_offset -= delta as usize;
                self.dec_offset = cur_offset;
                return Ok(());
            }
        }

        self.packet_seek(entry, format, cur_offset)
    }

    fn packet_seek(
        &mut self,
        entry: &QueuedBuffer,
        format: &SourceFormat,
        cur_offset: u64,
    ) -> Result<(), StreamCodecError> {
        let table = entry
            .wma
            .as_ref()
            .ok_or_else(|| StreamCodecError("no packet table for seek".into()))?;

        let frame_bytes = format.decoded_frame_bytes() as u64;
        let target_byte = cur_offset * frame_bytes;
        let (packet_idx, bytes_before) = table
            .seek_packet(target_byte)
            .ok_or_else(|| StreamCodecError(format!("no packet covers byte {target_byte}")))?;

        log::trace!("Stream seek: sample {cur_offset} -> packet {packet_idx}");

        self.enc_offset = packet_idx * self.block_align;
        self.codec.flush();
        self.convert_samples = 0;
        self.convert_offset = 0;

        if self.pull_frame(&entry.buffer.data)? {
            self.convert_offset =
                (((target_byte - bytes_before) / frame_bytes) as usize).min(self.convert_samples);
        }
        self.dec_offset = cur_offset;

        Ok(())
    }

    /// Pulls frames until one lands in the staging cache, feeding packets
    /// on demand. `Ok(false)` means the encoded data ran out first.
    fn pull_frame(&mut self, data: &[u8]) -> Result<bool, StreamCodecError> {
        loop {
            if let Some(frames) = self.codec.receive_frame(&mut self.convert_cache)? {
                self.convert_samples = frames;
                self.convert_offset = 0;
                return Ok(true);
            }

            if !self.feed_packet(data)? {
                return Ok(false);
            }
        }
    }

    /// Submits the next `block_align`-sized packet, staging the final
    /// partial packet with zeroed trailing padding.
    fn feed_packet(&mut self, data: &[u8]) -> Result<bool, StreamCodecError> {
        if self.enc_offset >= data.len() {
            return Ok(false);
        }

        if self.enc_offset + self.block_align + self.codec.input_padding() > data.len() {
            let available = (data.len() - self.enc_offset).min(self.block_align);
            let staged = self.block_align + self.codec.input_padding();
            if self.padding.len() < staged {
                self.padding.resize(staged, 0);
            }
            self.padding[..available]
                .copy_from_slice(&data[self.enc_offset..self.enc_offset + available]);
            self.padding[available..].fill(0);

            let packet = &self.padding[..self.block_align];
            self.codec.send_packet(packet)?;
        } else {
            self.codec
                .send_packet(&data[self.enc_offset..self.enc_offset + self.block_align])?;
        }

        self.enc_offset += self.block_align;
        Ok(true)
    }
}
