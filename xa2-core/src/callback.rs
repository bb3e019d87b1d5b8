//! Client notification hooks, fired only from within a tick.

/// Engine-level hooks bracketing each processing pass.
pub trait EngineCallback {
    fn on_processing_pass_start(&mut self) {}
    fn on_processing_pass_end(&mut self) {}
}

/// Per-source-voice hooks.
///
/// All methods have empty defaults; implementors override the events they
/// care about. `context` is the opaque tag supplied with the buffer at
/// submit time.
pub trait VoiceCallback {
    /// Fired at the start of the voice's mix pass. `bytes_required` is the
    /// worst-case decode request for this pass in bytes of 16-bit samples,
    /// or 0 when the buffer queue is empty.
    fn on_voice_processing_pass_start(&mut self, bytes_required: u32) {
        let _ = bytes_required;
    }

    fn on_voice_processing_pass_end(&mut self) {}

    /// Fired when a buffer becomes the playing head, before its first
    /// sample is decoded.
    fn on_buffer_start(&mut self, context: u64) {
        let _ = context;
    }

    /// Fired when a buffer is exhausted and removed from the queue.
    fn on_buffer_end(&mut self, context: u64) {
        let _ = context;
    }

    /// Fired each time the play cursor rewinds to the loop start.
    fn on_loop_end(&mut self, context: u64) {
        let _ = context;
    }

    /// Fired after `on_buffer_end` for a buffer flagged end-of-stream.
    fn on_stream_end(&mut self) {}
}
