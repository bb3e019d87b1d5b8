//! Processing core of an XAudio2-model audio mixing engine.

mod buffer;
mod callback;
mod decoder;
mod engine;
mod format;
mod resampler;
mod source;
mod voice;

pub use buffer::{AudioBuffer, LOOP_INFINITE, MAX_LOOP_COUNT, WmaPacketTable};
pub use callback::{EngineCallback, VoiceCallback};
pub use engine::{Engine, EngineError, VoiceState};
pub use format::{FormatTag, SourceFormat};
pub use source::{DEFAULT_FREQ_RATIO, MAX_FREQ_RATIO, MIN_FREQ_RATIO};
pub use voice::{MAX_VOLUME_LEVEL, Send, SendTarget, VoiceId, default_matrix};
