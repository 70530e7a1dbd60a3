//! Acoustic front-end seam (echo cancellation / noise suppression).
//!
//! Boards with a hardware or DSP front-end implement `AudioProcessor`;
//! boards without one use `NoAudioProcessor`, which never runs, so the
//! input pipeline falls through to direct encoding. Selecting the
//! implementation at startup keeps the event-loop code identical either
//! way.

pub type ProcessorOutput = Box<dyn FnMut(Vec<i16>) + Send>;

pub trait AudioProcessor: Send {
    fn start(&mut self);
    fn stop(&mut self);
    fn is_running(&self) -> bool;

    /// Feed one 16 kHz block (interleaved mic + reference when stereo).
    fn feed(&mut self, pcm: &[i16]);

    /// Register the cleaned-mono-output callback. May be invoked
    /// synchronously from `feed`.
    fn on_output(&mut self, callback: ProcessorOutput);
}

/// Null front-end for boards without AEC hardware.
pub struct NoAudioProcessor;

impl AudioProcessor for NoAudioProcessor {
    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }

    fn feed(&mut self, _pcm: &[i16]) {}

    fn on_output(&mut self, _callback: ProcessorOutput) {}
}
