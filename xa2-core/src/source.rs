//! Source voices: per-tick decode → resample mixing over a queue of
//! looping client buffers.

use crate::buffer::{LOOP_INFINITE, QueuedBuffer};
use crate::callback::VoiceCallback;
use crate::decoder::Decoder;
use crate::format::SourceFormat;
use crate::resampler::{self, FIXED_FRACTION_MASK, FIXED_ONE, FIXED_PRECISION};
use crate::voice::Send;
use std::collections::VecDeque;

/// Smallest settable frequency ratio.
pub const MIN_FREQ_RATIO: f32 = 1.0 / 1024.0;
/// Largest supported frequency-ratio ceiling.
pub const MAX_FREQ_RATIO: f32 = 1024.0;
/// Default frequency-ratio ceiling for new source voices.
pub const DEFAULT_FREQ_RATIO: f32 = 2.0;

/// Frames decoded past each request. The linear interpolator reads one
/// frame past the consumed region, and the end-of-queue zero fill covers
/// this region too; the decode cache is allocated to include it.
pub(crate) const EXTRA_DECODE_PADDING: usize = 2;

pub(crate) struct SourceVoice {
    pub format: SourceFormat,
    pub decoder: Decoder,
    pub active: bool,
    pub volume: f32,
    pub channel_volumes: Box<[f32]>,
    pub sends: Vec<Send>,
    pub callback: Option<Box<dyn VoiceCallback>>,
    freq_ratio: f32,
    max_freq_ratio: f32,
    /// Cached Q32.32 step and the ratio bits it was derived from.
    step: u64,
    step_ratio_bits: u32,
    output_rate: u32,
    output_samples: usize,
    /// Worst-case source frames decodable per tick (scratch sizing).
    decode_samples: usize,
    /// Absolute sample index into the head buffer.
    cur_offset: u64,
    /// Q32.32 fraction of the play cursor; integer part is zero between
    /// ticks.
    cur_offset_frac: u64,
    new_buffer: bool,
    total_samples: u64,
    buffers: VecDeque<QueuedBuffer>,
    decode_cache: Vec<i16>,
    pub resample_cache: Vec<f32>,
}

impl SourceVoice {
    pub fn new(
        format: SourceFormat,
        decoder: Decoder,
        max_freq_ratio: f32,
        callback: Option<Box<dyn VoiceCallback>>,
    ) -> Self {
        let channels = usize::from(format.channels);
        Self {
            format,
            decoder,
            active: false,
            volume: 1.0,
            channel_volumes: vec![1.0; channels].into_boxed_slice(),
            sends: Vec::new(),
            callback,
            freq_ratio: 1.0,
            max_freq_ratio: max_freq_ratio.clamp(MIN_FREQ_RATIO, MAX_FREQ_RATIO),
            step: FIXED_ONE,
            step_ratio_bits: f32::NAN.to_bits(),
            output_rate: 0,
            output_samples: 0,
            decode_samples: 0,
            cur_offset: 0,
            cur_offset_frac: 0,
            new_buffer: false,
            total_samples: 0,
            buffers: VecDeque::new(),
            decode_cache: Vec::new(),
            resample_cache: Vec::new(),
        }
    }

    /// Sizes the scratch caches for a new output rate and per-tick frame
    /// count, derived from the voice's first send destination.
    pub fn configure_output(&mut self, output_rate: u32, output_samples: usize) {
        let channels = usize::from(self.format.channels);
        let worst_case = f64::from(self.max_freq_ratio) * f64::from(self.format.sample_rate)
            / f64::from(output_rate);
        self.decode_samples = (output_samples as f64 * worst_case).ceil() as usize + 1;

        self.output_rate = output_rate;
        self.output_samples = output_samples;
        self.decode_cache = vec![0; (self.decode_samples + EXTRA_DECODE_PADDING) * channels];
        self.resample_cache = vec![0.0; output_samples * channels];
        // Force a step recompute on the next pass.
        self.step_ratio_bits = f32::NAN.to_bits();
    }

    pub fn frequency_ratio(&self) -> f32 {
        self.freq_ratio
    }

    pub fn set_frequency_ratio(&mut self, ratio: f32) {
        let clamped = ratio.clamp(MIN_FREQ_RATIO, self.max_freq_ratio);
        if clamped != ratio {
            log::warn!("Frequency ratio {ratio} clamped to {clamped}");
        }
        self.freq_ratio = clamped;
    }

    pub fn submit(&mut self, entry: QueuedBuffer) {
        if self.buffers.is_empty() {
            self.cur_offset = u64::from(entry.buffer.play_begin);
            self.new_buffer = true;
        }
        self.buffers.push_back(entry);
    }

    /// Drops every queued buffer except a head that has started playing,
    /// firing `OnBufferEnd` for each dropped entry.
    pub fn flush_buffers(&mut self) {
        let keep_head = !self.buffers.is_empty() && !self.new_buffer;
        let from = usize::from(keep_head);

        while self.buffers.len() > from {
            if let Some(dropped) = self.buffers.remove(from) {
                log::debug!("Flushing buffer {:#x}", dropped.buffer.context);
                if let Some(cb) = &mut self.callback {
                    cb.on_buffer_end(dropped.buffer.context);
                }
            }
        }

        if !keep_head {
            self.cur_offset = 0;
            self.cur_offset_frac = 0;
            self.new_buffer = false;
        }
    }

    /// Clears the head buffer's remaining loops so playback runs out to
    /// the play region end.
    pub fn exit_loop(&mut self) {
        if let Some(head) = self.buffers.front_mut() {
            head.loops_remaining = 0;
        }
    }

    pub fn buffers_queued(&self) -> usize {
        self.buffers.len()
    }

    pub fn samples_played(&self) -> u64 {
        self.total_samples
    }

    pub fn current_buffer_context(&self) -> Option<u64> {
        self.buffers.front().map(|entry| entry.buffer.context)
    }

    /// The per-tick mix pass: fills `resample_cache` with up to
    /// `output_samples` frames and returns how many were produced. The
    /// caller accumulates the cache into this voice's sends afterwards and
    /// then calls [`Self::fire_pass_end`].
    pub fn process(&mut self) -> usize {
        if self.step_ratio_bits != self.freq_ratio.to_bits() {
            self.step = resampler::fixed_step(
                f64::from(self.freq_ratio),
                self.format.sample_rate,
                self.output_rate,
            );
            self.step_ratio_bits = self.freq_ratio.to_bits();
            log::trace!("Source step recomputed: ratio {} -> {:#x}", self.freq_ratio, self.step);
        }

        let bytes_required =
            if self.buffers.is_empty() { 0 } else { (self.decode_samples * 2) as u32 };
        if let Some(cb) = &mut self.callback {
            cb.on_voice_processing_pass_start(bytes_required);
        }

        let channels = usize::from(self.format.channels);
        let out_frames = self.output_samples;
        let mut mixed = 0_usize;

        while mixed < out_frames && !self.buffers.is_empty() {
            let remaining = (out_frames - mixed) as u64;
            let to_decode = resampler::frames_to_decode(remaining, self.step, self.cur_offset_frac)
                .min(self.decode_samples as u64) as usize;
            debug_assert!(to_decode <= self.decode_samples);

            let reset_offset = self.decode_buffers(to_decode);

            let to_resample = (resampler::frames_to_resample(
                to_decode as u64,
                self.step,
                self.cur_offset_frac,
            ) as usize)
                .min(out_frames - mixed);

            let dst = &mut self.resample_cache[mixed * channels..(mixed + to_resample) * channels];
            if self.step == FIXED_ONE {
                resampler::convert_i16_to_f32(&self.decode_cache[..to_resample * channels], dst);
            } else if channels == 1 {
                resampler::resample_mono(&self.decode_cache, dst, self.step, self.cur_offset_frac);
            } else {
                resampler::resample_stereo(&self.decode_cache, dst, self.step, self.cur_offset_frac);
            }

            if self.buffers.is_empty() {
                self.cur_offset = 0;
                self.cur_offset_frac = 0;
            } else {
                self.cur_offset_frac += to_resample as u64 * self.step;
                self.cur_offset = (self.cur_offset + (self.cur_offset_frac >> FIXED_PRECISION))
                    .saturating_sub(reset_offset);
                self.cur_offset_frac &= FIXED_FRACTION_MASK;
            }

            mixed += to_resample;
        }

        mixed
    }

    pub fn fire_pass_end(&mut self) {
        if let Some(cb) = &mut self.callback {
            cb.on_voice_processing_pass_end();
        }
    }

    /// Drives the decoder over the (possibly looping) buffer queue until
    /// `to_decode` frames are materialized in the decode cache, either
    /// decoded or zero-filled after the queue runs out, plus
    /// `EXTRA_DECODE_PADDING` lookahead frames for the interpolator's
    /// trailing read. Returns the sum of frames consumed before each
    /// cursor reset so the caller can correct the integer cursor after
    /// the fixed-point advance.
    fn decode_buffers(&mut self, to_decode: usize) -> u64 {
        let channels = usize::from(self.format.channels);
        let mut decoded = 0_usize;
        let mut reset_offset = 0_u64;
        let mut next_pos = self.cur_offset;

        while decoded < to_decode && !self.buffers.is_empty() {
            let decoding = to_decode - decoded;

            if self.new_buffer {
                self.new_buffer = false;
                let context = self.buffers[0].buffer.context;
                if let Some(cb) = &mut self.callback {
                    cb.on_buffer_start(context);
                }
            }

            let end = self.buffers[0].region_end();
            let end_read = end.saturating_sub(self.cur_offset).min(decoding as u64) as usize;

            self.decoder.decode(
                &self.buffers[0],
                &self.format,
                self.cur_offset,
                &mut self.decode_cache[decoded * channels..(decoded + end_read) * channels],
            );
            self.total_samples += end_read as u64;
            next_pos = self.cur_offset + end_read as u64;

            if end_read < decoding {
                reset_offset += end_read as u64;

                let head = &mut self.buffers[0];
                if head.loops_remaining > 0 {
                    self.cur_offset = u64::from(head.buffer.loop_begin);
                    if head.loops_remaining < LOOP_INFINITE {
                        head.loops_remaining -= 1;
                    }
                    let context = head.buffer.context;
                    if let Some(cb) = &mut self.callback {
                        cb.on_loop_end(context);
                    }
                } else if let Some(finished) = self.buffers.pop_front() {
                    if finished.buffer.end_of_stream {
                        self.cur_offset_frac = 0;
                    }

                    if let Some(next) = self.buffers.front() {
                        self.cur_offset = u64::from(next.buffer.play_begin);
                        self.new_buffer = true;
                    } else {
                        self.cur_offset = 0;
                        let zero_from = (decoded + end_read) * channels;
                        let zero_to = (to_decode + EXTRA_DECODE_PADDING) * channels;
                        self.decode_cache[zero_from..zero_to].fill(0);
                    }

                    log::debug!("Buffer {:#x} consumed", finished.buffer.context);
                    if let Some(cb) = &mut self.callback {
                        cb.on_buffer_end(finished.buffer.context);
                        if finished.buffer.end_of_stream {
                            cb.on_stream_end();
                        }
                    }
                }
            }

            decoded += end_read;
        }

        if !self.buffers.is_empty() {
            self.decode_padding(to_decode, next_pos);
        }

        reset_offset
    }

    /// Fills the `EXTRA_DECODE_PADDING` frames past a decode request with
    /// the samples that follow `pos` in play order, walking loop rewinds
    /// and successor buffers without touching queue state, loop counts, or
    /// callbacks. Frames past the end of all queued data are zeroed.
    fn decode_padding(&mut self, from_frame: usize, mut pos: u64) {
        let channels = usize::from(self.format.channels);
        let mut filled = 0_usize;
        let mut index = 0_usize;
        let mut loops = self.buffers.front().map_or(0, |entry| entry.loops_remaining);

        while filled < EXTRA_DECODE_PADDING {
            let Some(entry) = self.buffers.get(index) else { break };
            let looping = loops > 0 && entry.buffer.loop_length > 0;
            let end = if looping { entry.loop_end } else { entry.play_end };

            if pos >= end {
                if looping {
                    pos = u64::from(entry.buffer.loop_begin);
                    if loops < LOOP_INFINITE {
                        loops -= 1;
                    }
                } else {
                    index += 1;
                    if let Some(next) = self.buffers.get(index) {
                        pos = u64::from(next.buffer.play_begin);
                        loops = next.loops_remaining;
                    }
                }
                continue;
            }

            let take = (end - pos).min((EXTRA_DECODE_PADDING - filled) as u64) as usize;
            let slot = from_frame + filled;
            self.decoder.decode(
                &self.buffers[index],
                &self.format,
                pos,
                &mut self.decode_cache[slot * channels..(slot + take) * channels],
            );
            pos += take as u64;
            filled += take;
        }

        let zero_from = (from_frame + filled) * channels;
        let zero_to = (from_frame + EXTRA_DECODE_PADDING) * channels;
        self.decode_cache[zero_from..zero_to].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AudioBuffer;
    use crate::format::FormatTag;
    use rand::Rng;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        BufferStart(u64),
        BufferEnd(u64),
        LoopEnd(u64),
        StreamEnd,
    }

    #[derive(Default)]
    struct Recorder(Rc<RefCell<Vec<Event>>>);

    impl VoiceCallback for Recorder {
        fn on_buffer_start(&mut self, context: u64) {
            self.0.borrow_mut().push(Event::BufferStart(context));
        }

        fn on_buffer_end(&mut self, context: u64) {
            self.0.borrow_mut().push(Event::BufferEnd(context));
        }

        fn on_loop_end(&mut self, context: u64) {
            self.0.borrow_mut().push(Event::LoopEnd(context));
        }

        fn on_stream_end(&mut self) {
            self.0.borrow_mut().push(Event::StreamEnd);
        }
    }

    fn pcm16_mono(sample_rate: u32) -> SourceFormat {
        SourceFormat {
            tag: FormatTag::Pcm,
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
            block_align: 2,
            codec_data: Box::default(),
        }
    }

    fn pcm16_voice(
        sample_rate: u32,
        output_rate: u32,
        output_samples: usize,
        events: Option<Rc<RefCell<Vec<Event>>>>,
    ) -> SourceVoice {
        let format = pcm16_mono(sample_rate);
        let decoder = Decoder::select(&format).unwrap();
        let callback =
            events.map(|ev| Box::new(Recorder(ev)) as Box<dyn VoiceCallback>);
        let mut voice = SourceVoice::new(format, decoder, DEFAULT_FREQ_RATIO, callback);
        voice.configure_output(output_rate, output_samples);
        voice.active = true;
        voice
    }

    fn ramp_data(samples: usize) -> Vec<u8> {
        (0..samples as i16).flat_map(i16::to_le_bytes).collect()
    }

    fn submit_pcm(voice: &mut SourceVoice, buffer: AudioBuffer) {
        let entry = QueuedBuffer::new(buffer, None, &voice.format).unwrap();
        voice.submit(entry);
    }

    #[test]
    fn unity_tick_converts_exactly() {
        let mut voice = pcm16_voice(44100, 44100, 8, None);
        let samples: [i16; 8] = [0, 16384, -16384, 32767, -32768, 0, 8192, -8192];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        submit_pcm(&mut voice, AudioBuffer::once(bytes.into()));

        let mixed = voice.process();
        assert_eq!(mixed, 8);
        let expected = [0.0, 0.5, -0.5, 32767.0 / 32768.0, -1.0, 0.0, 0.25, -0.25];
        assert_eq!(&voice.resample_cache[..8], &expected);
    }

    #[test]
    fn loop_counting_produces_play_plus_loops() {
        // PlayLength 100 with a 25-sample loop taken twice: exactly
        // 100 + 2*25 = 150 source samples, with the callbacks in order.
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut voice = pcm16_voice(44100, 44100, 32, Some(Rc::clone(&events)));

        let mut buffer = AudioBuffer::once(ramp_data(100).into());
        buffer.loop_begin = 50;
        buffer.loop_length = 25;
        buffer.loop_count = 2;
        buffer.context = 7;
        submit_pcm(&mut voice, buffer);

        for _ in 0..10 {
            voice.process();
            if voice.buffers_queued() == 0 {
                break;
            }
        }

        assert_eq!(voice.samples_played(), 150);
        assert_eq!(
            events.borrow().as_slice(),
            &[
                Event::BufferStart(7),
                Event::LoopEnd(7),
                Event::LoopEnd(7),
                Event::BufferEnd(7),
                Event::StreamEnd,
            ]
        );
    }

    #[test]
    fn loop_replays_loop_region_samples() {
        // A looped region replays the same source data; spot-check the
        // output sequence across the rewind.
        let mut voice = pcm16_voice(44100, 44100, 150, None);

        let mut buffer = AudioBuffer::once(ramp_data(100).into());
        buffer.loop_begin = 50;
        buffer.loop_length = 25;
        buffer.loop_count = 2;
        submit_pcm(&mut voice, buffer);

        let mixed = voice.process();
        assert_eq!(mixed, 150);

        let out: Vec<i16> =
            voice.resample_cache[..150].iter().map(|&f| (f * 32768.0) as i16).collect();
        let mut expected: Vec<i16> = (0..75).collect();
        expected.extend(50..75);
        expected.extend(50..100);
        assert_eq!(out, expected);
    }

    #[test]
    fn pitch_phase_advance_is_exact() {
        let mut voice = pcm16_voice(48000, 48000, 64, None);
        voice.set_frequency_ratio(1.5);

        let mut buffer = AudioBuffer::once(ramp_data(96).into());
        buffer.end_of_stream = false;
        submit_pcm(&mut voice, buffer);

        let mixed = voice.process();
        assert_eq!(mixed, 64);

        let step = resampler::fixed_step(1.5, 48000, 48000);
        let advance = (voice.cur_offset << FIXED_PRECISION) | voice.cur_offset_frac;
        assert_eq!(advance, 64 * step);
    }

    #[test]
    fn fraction_stays_normalized_over_random_ticks() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mut voice = pcm16_voice(44100, 44100, 64, None);
            voice.set_frequency_ratio(rng.gen_range(0.5..2.0));

            let mut buffer = AudioBuffer::once(ramp_data(1000).into());
            buffer.loop_begin = 0;
            buffer.loop_length = 1000;
            buffer.loop_count = LOOP_INFINITE;
            submit_pcm(&mut voice, buffer);

            for _ in 0..20 {
                voice.process();
                assert!(voice.cur_offset_frac < FIXED_ONE);
                assert!(voice.buffers_queued() == 1);
            }
        }
    }

    #[test]
    fn end_of_stream_fires_once_after_last_sample() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut voice = pcm16_voice(44100, 44100, 32, Some(Rc::clone(&events)));
        submit_pcm(&mut voice, AudioBuffer::once(ramp_data(40).into()));

        voice.process();
        assert!(!events.borrow().contains(&Event::StreamEnd));
        assert_eq!(voice.samples_played(), 32);

        voice.process();
        let stream_ends =
            events.borrow().iter().filter(|&&e| e == Event::StreamEnd).count();
        assert_eq!(stream_ends, 1);
        assert_eq!(voice.samples_played(), 40);

        // Nothing left: further passes stay silent and fire nothing new.
        voice.process();
        assert_eq!(
            events.borrow().iter().filter(|&&e| e == Event::StreamEnd).count(),
            1
        );
    }

    #[test]
    fn queue_end_zero_fills_decode_padding() {
        let mut voice = pcm16_voice(44100, 44100, 32, None);
        submit_pcm(&mut voice, AudioBuffer::once(ramp_data(10).into()));

        // Dirty the cache to prove the zero fill covers request + padding.
        voice.decode_cache.fill(0x11);
        let mixed = voice.process();
        assert_eq!(mixed, 32);
        assert!(voice.decode_cache[10..32 + EXTRA_DECODE_PADDING].iter().all(|&s| s == 0));
        assert!(voice.resample_cache[10..32].iter().all(|&f| f == 0.0));
        assert_eq!(voice.cur_offset, 0);
        assert_eq!(voice.cur_offset_frac, 0);
    }

    #[test]
    fn exit_loop_plays_out_the_tail() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut voice = pcm16_voice(44100, 44100, 32, Some(Rc::clone(&events)));

        let mut buffer = AudioBuffer::once(ramp_data(100).into());
        buffer.loop_begin = 50;
        buffer.loop_length = 25;
        buffer.loop_count = LOOP_INFINITE;
        submit_pcm(&mut voice, buffer);

        // Three passes take the cursor through at least one rewind, then
        // break out of the loop.
        voice.process();
        voice.process();
        voice.process();
        assert!(events.borrow().iter().any(|&e| matches!(e, Event::LoopEnd(_))));
        voice.exit_loop();

        for _ in 0..10 {
            voice.process();
            if voice.buffers_queued() == 0 {
                break;
            }
        }

        assert_eq!(voice.buffers_queued(), 0);
        let events = events.borrow();
        let last_loop = events.iter().rposition(|&e| matches!(e, Event::LoopEnd(_)));
        let buffer_end = events.iter().position(|&e| matches!(e, Event::BufferEnd(_)));
        assert!(buffer_end.is_some());
        if let (Some(last_loop), Some(buffer_end)) = (last_loop, buffer_end) {
            assert!(last_loop < buffer_end);
        }
    }

    #[test]
    fn successor_buffer_starts_at_its_play_begin() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut voice = pcm16_voice(44100, 44100, 32, Some(Rc::clone(&events)));

        let mut first = AudioBuffer::once(ramp_data(20).into());
        first.end_of_stream = false;
        first.context = 1;
        submit_pcm(&mut voice, first);

        let mut second = AudioBuffer::once(ramp_data(40).into());
        second.play_begin = 8;
        second.context = 2;
        submit_pcm(&mut voice, second);

        let mixed = voice.process();
        assert_eq!(mixed, 32);

        // 20 samples of the first buffer then the second from sample 8.
        let out: Vec<i16> =
            voice.resample_cache[..32].iter().map(|&f| (f * 32768.0) as i16).collect();
        let mut expected: Vec<i16> = (0..20).collect();
        expected.extend(8..20);
        assert_eq!(out, expected);

        assert_eq!(
            events.borrow().as_slice(),
            &[Event::BufferStart(1), Event::BufferEnd(1), Event::BufferStart(2)]
        );
    }

    #[test]
    fn flush_keeps_playing_head_only() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut voice = pcm16_voice(44100, 44100, 16, Some(Rc::clone(&events)));

        for context in 1..=3 {
            let mut buffer = AudioBuffer::once(ramp_data(64).into());
            buffer.end_of_stream = false;
            buffer.context = context;
            submit_pcm(&mut voice, buffer);
        }

        // Head starts playing, then the tail is flushed.
        voice.process();
        voice.flush_buffers();

        assert_eq!(voice.buffers_queued(), 1);
        assert_eq!(voice.current_buffer_context(), Some(1));
        let flushed: Vec<Event> = events
            .borrow()
            .iter()
            .copied()
            .filter(|e| matches!(e, Event::BufferEnd(_)))
            .collect();
        assert_eq!(flushed, vec![Event::BufferEnd(2), Event::BufferEnd(3)]);
    }

    #[test]
    fn resampled_pass_interpolates_between_frames() {
        // 22050 -> 44100 at ratio 1.0 halves the step; outputs alternate
        // between source samples and midpoints. The final output frame
        // interpolates toward the first sample past the decode request
        // (8192 here), which only the padding lookahead can supply.
        let mut voice = pcm16_voice(22050, 44100, 8, None);
        let samples: [i16; 5] = [0, 16384, 0, -16384, 8192];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        submit_pcm(&mut voice, AudioBuffer::once(bytes.into()));

        let mixed = voice.process();
        assert_eq!(mixed, 8);
        assert_eq!(
            &voice.resample_cache[..8],
            &[0.0, 0.25, 0.5, 0.25, 0.0, -0.25, -0.5, -0.125]
        );
    }

    #[test]
    fn padding_frames_hold_upcoming_samples() {
        // A 2x upsample decodes half the output frames per tick; the
        // padding slots past the request must carry the real continuation
        // of the buffer, not leftovers from an earlier tick.
        let mut voice = pcm16_voice(22050, 44100, 8, None);
        submit_pcm(&mut voice, AudioBuffer::once(ramp_data(20).into()));

        voice.decode_cache.fill(0x11);
        voice.process();

        assert_eq!(&voice.decode_cache[..4 + EXTRA_DECODE_PADDING], &[0, 1, 2, 3, 4, 5]);

        voice.process();
        assert_eq!(&voice.decode_cache[..4 + EXTRA_DECODE_PADDING], &[4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn padding_follows_loop_rewind() {
        // When the request ends exactly on the loop boundary, the padding
        // peeks at the rewind target without consuming the rewind (no
        // callbacks, no loop-count decrement).
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut voice = pcm16_voice(22050, 44100, 8, Some(Rc::clone(&events)));

        let samples: [i16; 4] = [100, 200, 300, 400];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut buffer = AudioBuffer::once(bytes.into());
        buffer.loop_begin = 0;
        buffer.loop_length = 4;
        buffer.loop_count = LOOP_INFINITE;
        submit_pcm(&mut voice, buffer);

        voice.process();

        assert_eq!(&voice.decode_cache[..4 + EXTRA_DECODE_PADDING], &[100, 200, 300, 400, 100, 200]);
        assert!(!events.borrow().iter().any(|&e| matches!(e, Event::LoopEnd(_))));
    }
}
