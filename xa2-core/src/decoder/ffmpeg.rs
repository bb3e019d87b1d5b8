//! FFmpeg-backed [`StreamCodec`] for WMA/XMA streams.

use crate::decoder::stream::{StreamCodec, StreamCodecError};
use crate::engine::EngineError;
use crate::format::{FormatTag, SourceFormat};
use ffmpeg::format::Sample;
use ffmpeg::format::sample::Type as SampleType;

pub(super) struct FfmpegCodec {
    decoder: ffmpeg::decoder::Audio,
    frame: ffmpeg::frame::Audio,
    channels: usize,
}

impl FfmpegCodec {
    pub fn open(format: &SourceFormat) -> Result<Self, EngineError> {
        ffmpeg::init().map_err(|err| EngineError::CodecOpen(err.to_string()))?;

        let codec_id = match format.tag {
            FormatTag::WmaV2 => ffmpeg::codec::Id::WMAV2,
            FormatTag::WmaV3 => ffmpeg::codec::Id::WMAPRO,
            FormatTag::Xma2 => ffmpeg::codec::Id::XMA2,
            FormatTag::Pcm | FormatTag::MsAdpcm => {
                return Err(EngineError::UnsupportedFormat {
                    tag: format.tag,
                    channels: format.channels,
                    bits_per_sample: format.bits_per_sample,
                });
            }
        };

        let codec = ffmpeg::decoder::find(codec_id).ok_or(EngineError::UnsupportedFormat {
            tag: format.tag,
            channels: format.channels,
            bits_per_sample: format.bits_per_sample,
        })?;

        let mut context = ffmpeg::codec::Context::new_with_codec(codec);

        // The stream comes from client buffers rather than a demuxed
        // container, so the codec parameters are filled in by hand.
        unsafe {
            let ctx = context.as_mut_ptr();
            (*ctx).sample_rate = format.sample_rate as i32;
            (*ctx).block_align = i32::from(format.block_align);
            (*ctx).bits_per_coded_sample = i32::from(format.bits_per_sample);
            ffmpeg::sys::av_channel_layout_default(
                &mut (*ctx).ch_layout,
                i32::from(format.channels),
            );

            if !format.codec_data.is_empty() {
                let extradata = ffmpeg::sys::av_mallocz(
                    format.codec_data.len() + ffmpeg::sys::AV_INPUT_BUFFER_PADDING_SIZE as usize,
                )
                .cast::<u8>();
                if extradata.is_null() {
                    return Err(EngineError::CodecOpen("extradata allocation failed".into()));
                }
                std::ptr::copy_nonoverlapping(
                    format.codec_data.as_ptr(),
                    extradata,
                    format.codec_data.len(),
                );
                (*ctx).extradata = extradata;
                (*ctx).extradata_size = format.codec_data.len() as i32;
            }
        }

        let decoder = context
            .decoder()
            .audio()
            .map_err(|err| EngineError::CodecOpen(err.to_string()))?;

        log::debug!(
            "Opened {codec_id:?} decoder: {} Hz, {} channels, block align {}",
            format.sample_rate,
            format.channels,
            format.block_align
        );

        Ok(Self {
            decoder,
            frame: ffmpeg::frame::Audio::empty(),
            channels: usize::from(format.channels),
        })
    }

    /// Copies the received frame into `cache` as interleaved f32,
    /// transposing planar layouts.
    fn stage_frame(&self, cache: &mut Vec<f32>) -> Result<usize, StreamCodecError> {
        let samples = self.frame.samples();
        let channels = self.channels;
        cache.clear();
        cache.resize(samples * channels, 0.0);

        match self.frame.format() {
            Sample::F32(SampleType::Planar) => {
                for ch in 0..channels {
                    let plane: &[f32] = bytemuck::try_cast_slice(&self.frame.data(ch)[..samples * 4])
                        .map_err(|err| StreamCodecError(err.to_string()))?;
                    for (i, &sample) in plane.iter().enumerate() {
                        cache[i * channels + ch] = sample;
                    }
                }
            }
            Sample::F32(SampleType::Packed) => {
                let data: &[f32] =
                    bytemuck::try_cast_slice(&self.frame.data(0)[..samples * channels * 4])
                        .map_err(|err| StreamCodecError(err.to_string()))?;
                cache.copy_from_slice(data);
            }
            other => {
                return Err(StreamCodecError(format!("unexpected sample format {other:?}")));
            }
        }

        Ok(samples)
    }
}

impl StreamCodec for FfmpegCodec {
    fn send_packet(&mut self, packet: &[u8]) -> Result<(), StreamCodecError> {
        let packet = ffmpeg::Packet::copy(packet);
        self.decoder
            .send_packet(&packet)
            .map_err(|err| StreamCodecError(err.to_string()))
    }

    fn receive_frame(&mut self, cache: &mut Vec<f32>) -> Result<Option<usize>, StreamCodecError> {
        match self.decoder.receive_frame(&mut self.frame) {
            Ok(()) => Ok(Some(self.stage_frame(cache)?)),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => Ok(None),
            Err(err) => Err(StreamCodecError(err.to_string())),
        }
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn input_padding(&self) -> usize {
        ffmpeg::sys::AV_INPUT_BUFFER_PADDING_SIZE as usize
    }
}
