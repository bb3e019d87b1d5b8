//! Engine: voice arena, per-tick processing, and the client mutation API.

use crate::buffer::{AudioBuffer, QueuedBuffer, WmaPacketTable};
use crate::callback::{EngineCallback, VoiceCallback};
use crate::decoder::Decoder;
use crate::format::{FormatTag, SourceFormat};
use crate::source::SourceVoice;
use crate::voice::{Send, SendTarget, SubmixVoice, VoiceId, accumulate_send};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unsupported format: {tag:?}, {channels} channels, {bits_per_sample} bits per sample")]
    UnsupportedFormat { tag: FormatTag, channels: u16, bits_per_sample: u16 },
    #[error("Failed to open stream codec: {0}")]
    CodecOpen(String),
    #[error("Engine parameters must be nonzero")]
    InvalidEngineConfig,
    #[error("No voice with id {0:?}")]
    InvalidVoice(VoiceId),
    #[error("Voice {0:?} is not a source voice")]
    NotASourceVoice(VoiceId),
    #[error("Voice {0:?} is still targeted by sends")]
    VoiceInUse(VoiceId),
    #[error("Submitted buffer holds no decodable samples")]
    EmptyBuffer,
    #[error("Play region lies outside the buffer data")]
    InvalidPlayRegion,
    #[error("Loop region lies outside the buffer data, or the loop count exceeds the maximum")]
    InvalidLoopRegion,
    #[error("WMA/XMA buffers require a packet table")]
    MissingPacketTable,
    #[error("Packet table supplied for a non-stream format")]
    UnexpectedPacketTable,
    #[error("Packet table must be non-empty and monotonically non-decreasing")]
    InvalidPacketTable,
    #[error("Send target {0:?} cannot accept input")]
    InvalidSendTarget(VoiceId),
    #[error("Send destinations must share one input sample rate")]
    MixedSendRates,
    #[error("Submix sends must target a later processing stage")]
    SendStageOrder,
    #[error("Coefficient matrix has the wrong dimensions")]
    BadCoefficientMatrix,
    #[error("Channel volume vector has the wrong length")]
    BadChannelVolumes,
}

/// Snapshot of a source voice's queue progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceState {
    pub buffers_queued: usize,
    pub samples_played: u64,
    pub current_buffer_context: Option<u64>,
}

enum VoiceSlot {
    Source(SourceVoice),
    Submix(SubmixVoice),
}

/// The mixing engine. One instance owns its voice graph and is ticked from
/// a single caller-owned thread; all voice state mutates only inside
/// [`Engine::update_engine`] or between ticks.
pub struct Engine {
    master_channels: usize,
    master_rate: u32,
    samples_per_tick: usize,
    active: bool,
    voices: Vec<Option<VoiceSlot>>,
    /// Submix input accumulators, parallel to `voices`. Kept outside the
    /// voice slots so upstream mixing can write a destination's input
    /// while its own slot is checked out.
    inputs: Vec<Vec<f32>>,
    callbacks: Vec<Box<dyn EngineCallback>>,
}

impl Engine {
    /// Creates an engine producing `samples_per_tick` frames of
    /// `master_channels`-interleaved output per tick.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidEngineConfig`] if any parameter is
    /// zero.
    pub fn new(
        master_channels: u16,
        master_rate: u32,
        samples_per_tick: usize,
    ) -> Result<Self, EngineError> {
        if master_channels == 0 || master_rate == 0 || samples_per_tick == 0 {
            return Err(EngineError::InvalidEngineConfig);
        }

        log::debug!(
            "Engine created: {master_channels} channels, {master_rate} Hz, {samples_per_tick} frames/tick"
        );

        Ok(Self {
            master_channels: usize::from(master_channels),
            master_rate,
            samples_per_tick,
            active: true,
            voices: Vec::new(),
            inputs: Vec::new(),
            callbacks: Vec::new(),
        })
    }

    #[must_use]
    pub fn master_channels(&self) -> usize {
        self.master_channels
    }

    #[must_use]
    pub fn master_rate(&self) -> u32 {
        self.master_rate
    }

    #[must_use]
    pub fn samples_per_tick(&self) -> usize {
        self.samples_per_tick
    }

    pub fn start(&mut self) {
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn register_callback(&mut self, callback: Box<dyn EngineCallback>) {
        self.callbacks.push(callback);
    }

    /// Creates a source voice with a default send to the master voice.
    ///
    /// # Errors
    ///
    /// Rejects formats outside the supported set, and stream formats whose
    /// codec cannot be opened.
    pub fn create_source_voice(
        &mut self,
        format: SourceFormat,
        max_freq_ratio: f32,
        callback: Option<Box<dyn VoiceCallback>>,
    ) -> Result<VoiceId, EngineError> {
        format.validate()?;
        let decoder = Decoder::select(&format)?;

        let mut voice = SourceVoice::new(format, decoder, max_freq_ratio, callback);
        let channels = usize::from(voice.format.channels);
        voice.sends = vec![Send::new(SendTarget::Master, channels, self.master_channels)];
        voice.configure_output(self.master_rate, self.samples_per_tick);

        let id = self.allocate(VoiceSlot::Source(voice), Vec::new());
        log::debug!("Created source voice {id:?}");
        Ok(id)
    }

    /// Creates a submix voice with a default send to the master voice.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidEngineConfig`] for zero channel
    /// counts or rates.
    pub fn create_submix_voice(
        &mut self,
        input_channels: u16,
        input_sample_rate: u32,
        stage: u32,
    ) -> Result<VoiceId, EngineError> {
        if input_channels == 0 || input_sample_rate == 0 {
            return Err(EngineError::InvalidEngineConfig);
        }

        let channels = usize::from(input_channels);
        let input_samples = ((self.samples_per_tick as u64 * u64::from(input_sample_rate))
            .div_ceil(u64::from(self.master_rate))) as usize;

        let mut voice = SubmixVoice::new(channels, input_sample_rate, stage, input_samples);
        voice.sends = vec![Send::new(SendTarget::Master, channels, self.master_channels)];
        voice.set_output(self.master_rate, self.samples_per_tick);

        let input = vec![0.0; input_samples * channels];
        let id = self.allocate(VoiceSlot::Submix(voice), input);
        log::debug!("Created submix voice {id:?} at stage {stage}");
        Ok(id)
    }

    /// Removes a voice.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::VoiceInUse`] while any other voice still
    /// sends to it.
    pub fn destroy_voice(&mut self, id: VoiceId) -> Result<(), EngineError> {
        let idx = id.0 as usize;
        if !matches!(self.voices.get(idx), Some(Some(_))) {
            return Err(EngineError::InvalidVoice(id));
        }

        let referenced = self.voices.iter().flatten().any(|slot| {
            let sends = match slot {
                VoiceSlot::Source(src) => &src.sends,
                VoiceSlot::Submix(sub) => &sub.sends,
            };
            sends.iter().any(|send| send.target == SendTarget::Submix(id))
        });
        if referenced {
            return Err(EngineError::VoiceInUse(id));
        }

        self.voices[idx] = None;
        self.inputs[idx] = Vec::new();
        log::debug!("Destroyed voice {id:?}");
        Ok(())
    }

    /// Replaces a voice's send list, revalidating routing and resizing the
    /// voice's scratch for the new output rate.
    ///
    /// # Errors
    ///
    /// Rejects unknown or non-mixing targets, self-sends, mixed
    /// destination rates, stage-order violations for submix senders, and
    /// mis-sized coefficient matrices.
    pub fn set_sends(&mut self, id: VoiceId, sends: Vec<Send>) -> Result<(), EngineError> {
        let idx = id.0 as usize;
        let (input_channels, own_stage) = match self.voices.get(idx) {
            Some(Some(VoiceSlot::Source(src))) => (usize::from(src.format.channels), None),
            Some(Some(VoiceSlot::Submix(sub))) => (sub.input_channels, Some(sub.stage)),
            _ => return Err(EngineError::InvalidVoice(id)),
        };

        let mut output: Option<(u32, usize)> = None;
        for send in &sends {
            let (rate, frames, output_channels, dest_stage) = match send.target {
                SendTarget::Master => {
                    (self.master_rate, self.samples_per_tick, self.master_channels, None)
                }
                SendTarget::Submix(target) => {
                    if target == id {
                        return Err(EngineError::InvalidSendTarget(target));
                    }
                    match self.voices.get(target.0 as usize) {
                        Some(Some(VoiceSlot::Submix(dest))) => (
                            dest.input_sample_rate,
                            dest.input_samples,
                            dest.input_channels,
                            Some(dest.stage),
                        ),
                        _ => return Err(EngineError::InvalidSendTarget(target)),
                    }
                }
            };

            if let (Some(own), Some(dest)) = (own_stage, dest_stage) {
                if dest <= own {
                    return Err(EngineError::SendStageOrder);
                }
            }

            if send.coefficients.len() != input_channels * output_channels {
                return Err(EngineError::BadCoefficientMatrix);
            }

            match output {
                None => output = Some((rate, frames)),
                Some((existing, _)) if existing != rate => {
                    return Err(EngineError::MixedSendRates);
                }
                Some(_) => {}
            }
        }

        let (rate, frames) = output.unwrap_or((self.master_rate, self.samples_per_tick));
        match self.voices.get_mut(idx) {
            Some(Some(VoiceSlot::Source(src))) => {
                src.sends = sends;
                src.configure_output(rate, frames);
            }
            Some(Some(VoiceSlot::Submix(sub))) => {
                sub.sends = sends;
                sub.set_output(rate, frames);
            }
            _ => return Err(EngineError::InvalidVoice(id)),
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails for unknown voice ids.
    pub fn set_volume(&mut self, id: VoiceId, volume: f32) -> Result<(), EngineError> {
        match self.voices.get_mut(id.0 as usize) {
            Some(Some(VoiceSlot::Source(src))) => src.volume = volume,
            Some(Some(VoiceSlot::Submix(sub))) => sub.volume = volume,
            _ => return Err(EngineError::InvalidVoice(id)),
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails for unknown voice ids and mismatched vector lengths.
    pub fn set_channel_volumes(&mut self, id: VoiceId, volumes: &[f32]) -> Result<(), EngineError> {
        let slot = match self.voices.get_mut(id.0 as usize) {
            Some(Some(slot)) => slot,
            _ => return Err(EngineError::InvalidVoice(id)),
        };

        let target = match slot {
            VoiceSlot::Source(src) => &mut src.channel_volumes,
            VoiceSlot::Submix(sub) => &mut sub.channel_volumes,
        };
        if volumes.len() != target.len() {
            return Err(EngineError::BadChannelVolumes);
        }
        target.copy_from_slice(volumes);
        Ok(())
    }

    /// # Errors
    ///
    /// Fails unless `id` names a source voice.
    pub fn set_frequency_ratio(&mut self, id: VoiceId, ratio: f32) -> Result<(), EngineError> {
        self.source_mut(id)?.set_frequency_ratio(ratio);
        Ok(())
    }

    /// # Errors
    ///
    /// Fails unless `id` names a source voice.
    pub fn frequency_ratio(&self, id: VoiceId) -> Result<f32, EngineError> {
        Ok(self.source_ref(id)?.frequency_ratio())
    }

    /// # Errors
    ///
    /// Fails unless `id` names a source voice.
    pub fn start_source(&mut self, id: VoiceId) -> Result<(), EngineError> {
        self.source_mut(id)?.active = true;
        Ok(())
    }

    /// # Errors
    ///
    /// Fails unless `id` names a source voice.
    pub fn stop_source(&mut self, id: VoiceId) -> Result<(), EngineError> {
        self.source_mut(id)?.active = false;
        Ok(())
    }

    /// Queues a buffer on a source voice. WMA/XMA formats must supply the
    /// packet table, other formats must not.
    ///
    /// # Errors
    ///
    /// Fails for unknown/non-source voices and malformed buffers.
    pub fn submit_source_buffer(
        &mut self,
        id: VoiceId,
        buffer: AudioBuffer,
        wma: Option<WmaPacketTable>,
    ) -> Result<(), EngineError> {
        let voice = self.source_mut(id)?;
        let entry = QueuedBuffer::new(buffer, wma, &voice.format)?;
        voice.submit(entry);
        Ok(())
    }

    /// # Errors
    ///
    /// Fails unless `id` names a source voice.
    pub fn flush_source_buffers(&mut self, id: VoiceId) -> Result<(), EngineError> {
        self.source_mut(id)?.flush_buffers();
        Ok(())
    }

    /// # Errors
    ///
    /// Fails unless `id` names a source voice.
    pub fn exit_loop(&mut self, id: VoiceId) -> Result<(), EngineError> {
        self.source_mut(id)?.exit_loop();
        Ok(())
    }

    /// # Errors
    ///
    /// Fails unless `id` names a source voice.
    pub fn voice_state(&self, id: VoiceId) -> Result<VoiceState, EngineError> {
        let voice = self.source_ref(id)?;
        Ok(VoiceState {
            buffers_queued: voice.buffers_queued(),
            samples_played: voice.samples_played(),
            current_buffer_context: voice.current_buffer_context(),
        })
    }

    /// One engine tick: mixes every active source, then the submixes in
    /// ascending stage order, into `out` (`master_channels *
    /// samples_per_tick` interleaved floats, borrowed for this tick only).
    /// Inactive engines return immediately.
    pub fn update_engine(&mut self, out: &mut [f32]) {
        if !self.active {
            return;
        }

        let expected = self.master_channels * self.samples_per_tick;
        if out.len() != expected {
            log::error!("Output buffer holds {} samples, expected {expected}", out.len());
            return;
        }

        for callback in &mut self.callbacks {
            callback.on_processing_pass_start();
        }

        for idx in 0..self.voices.len() {
            if !matches!(self.voices[idx], Some(VoiceSlot::Source(_))) {
                continue;
            }
            let Some(mut slot) = self.voices[idx].take() else { continue };
            if let VoiceSlot::Source(src) = &mut slot {
                if src.active {
                    let mixed = src.process();
                    if mixed > 0 && !src.sends.is_empty() {
                        let channels = usize::from(src.format.channels);
                        let gains: Vec<f32> =
                            src.channel_volumes.iter().map(|cv| cv * src.volume).collect();
                        let cache = &src.resample_cache[..mixed * channels];
                        self.accumulate(cache, channels, Some(&gains), &src.sends, out);
                    }
                    src.fire_pass_end();
                }
            }
            self.voices[idx] = Some(slot);
        }

        for stage in 0..self.submix_stage_count() {
            for idx in 0..self.voices.len() {
                let matches_stage =
                    matches!(&self.voices[idx], Some(VoiceSlot::Submix(sub)) if sub.stage == stage);
                if !matches_stage {
                    continue;
                }

                let Some(mut slot) = self.voices[idx].take() else { continue };
                let mut input = std::mem::take(&mut self.inputs[idx]);
                if let VoiceSlot::Submix(submix) = &mut slot {
                    let frames = submix.process(&mut input);
                    if frames > 0 && !submix.sends.is_empty() {
                        let channels = submix.input_channels;
                        let cache = &submix.output_cache[..frames * channels];
                        self.accumulate(cache, channels, None, &submix.sends, out);
                    }
                }
                self.inputs[idx] = input;
                self.voices[idx] = Some(slot);
            }
        }

        for callback in &mut self.callbacks {
            callback.on_processing_pass_end();
        }
    }

    /// Accumulates a voice's mixed cache into each of its send
    /// destinations, clamping per accumulation step.
    fn accumulate(
        &mut self,
        cache: &[f32],
        input_channels: usize,
        gains: Option<&[f32]>,
        sends: &[Send],
        out: &mut [f32],
    ) {
        for send in sends {
            match send.target {
                SendTarget::Master => accumulate_send(
                    cache,
                    input_channels,
                    out,
                    self.master_channels,
                    &send.coefficients,
                    gains,
                ),
                SendTarget::Submix(id) => {
                    let idx = id.0 as usize;
                    let output_channels = match self.voices.get(idx) {
                        Some(Some(VoiceSlot::Submix(dest))) => dest.input_channels,
                        _ => {
                            log::warn!("Send targets missing voice {id:?}; dropping");
                            continue;
                        }
                    };
                    accumulate_send(
                        cache,
                        input_channels,
                        &mut self.inputs[idx],
                        output_channels,
                        &send.coefficients,
                        gains,
                    );
                }
            }
        }
    }

    fn submix_stage_count(&self) -> u32 {
        self.voices
            .iter()
            .flatten()
            .filter_map(|slot| match slot {
                VoiceSlot::Submix(sub) => Some(sub.stage + 1),
                VoiceSlot::Source(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    fn allocate(&mut self, slot: VoiceSlot, input: Vec<f32>) -> VoiceId {
        if let Some(idx) = self.voices.iter().position(Option::is_none) {
            self.voices[idx] = Some(slot);
            self.inputs[idx] = input;
            VoiceId(idx as u32)
        } else {
            self.voices.push(Some(slot));
            self.inputs.push(input);
            VoiceId((self.voices.len() - 1) as u32)
        }
    }

    fn source_ref(&self, id: VoiceId) -> Result<&SourceVoice, EngineError> {
        match self.voices.get(id.0 as usize) {
            Some(Some(VoiceSlot::Source(src))) => Ok(src),
            Some(Some(VoiceSlot::Submix(_))) => Err(EngineError::NotASourceVoice(id)),
            _ => Err(EngineError::InvalidVoice(id)),
        }
    }

    fn source_mut(&mut self, id: VoiceId) -> Result<&mut SourceVoice, EngineError> {
        match self.voices.get_mut(id.0 as usize) {
            Some(Some(VoiceSlot::Source(src))) => Ok(src),
            Some(Some(VoiceSlot::Submix(_))) => Err(EngineError::NotASourceVoice(id)),
            _ => Err(EngineError::InvalidVoice(id)),
        }
    }
}
