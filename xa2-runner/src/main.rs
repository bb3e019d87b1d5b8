//! Feeds a raw PCM file through a mixing engine and writes the mixed
//! float frames back out. Mostly useful for exercising the engine end to
//! end and for eyeballing resampler output.

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use xa2_core::{AudioBuffer, DEFAULT_FREQ_RATIO, Engine, FormatTag, SourceFormat};

#[derive(Debug, Parser)]
struct Args {
    /// Raw signed 16-bit little-endian PCM input file
    input: PathBuf,
    /// Output file receiving raw interleaved 32-bit float frames
    output: PathBuf,
    /// Input sample rate in Hz
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,
    /// Input (and output) channel count
    #[arg(long, default_value_t = 1)]
    channels: u16,
    /// Master sample rate in Hz
    #[arg(long, default_value_t = 44100)]
    master_rate: u32,
    /// Playback frequency ratio
    #[arg(long, default_value_t = 1.0)]
    pitch: f32,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let data = fs::read(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let samples_per_tick = (args.master_rate / 100).max(1) as usize;
    let mut engine = Engine::new(args.channels, args.master_rate, samples_per_tick)?;

    let format = SourceFormat {
        tag: FormatTag::Pcm,
        sample_rate: args.sample_rate,
        channels: args.channels,
        bits_per_sample: 16,
        block_align: args.channels * 2,
        codec_data: Box::default(),
    };

    let max_ratio = args.pitch.max(DEFAULT_FREQ_RATIO);
    let voice = engine.create_source_voice(format, max_ratio, None)?;
    engine.set_frequency_ratio(voice, args.pitch)?;
    engine.submit_source_buffer(voice, AudioBuffer::once(data.into()), None)?;
    engine.start_source(voice)?;

    let mut writer = BufWriter::new(
        File::create(&args.output)
            .with_context(|| format!("Failed to create {}", args.output.display()))?,
    );

    let mut out = vec![0.0_f32; engine.master_channels() * samples_per_tick];
    let mut ticks = 0_u64;
    while engine.voice_state(voice)?.buffers_queued > 0 {
        out.fill(0.0);
        engine.update_engine(&mut out);
        for sample in &out {
            writer.write_all(&sample.to_le_bytes())?;
        }
        ticks += 1;
    }
    writer.flush()?;

    log::info!(
        "Mixed {ticks} ticks ({} frames) into {}",
        ticks * samples_per_tick as u64,
        args.output.display()
    );

    Ok(())
}
