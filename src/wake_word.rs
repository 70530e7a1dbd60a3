//! Wake-word detector seam.
//!
//! The detector runs its own inference worker; the core feeds it resampled
//! capture blocks and reacts to its callbacks. Callbacks fire on the
//! detector's worker and must re-enter the core through the scheduler.

use crate::audio::AudioFrame;

pub type WakeWordCallback = Box<dyn Fn(String) + Send + Sync>;
pub type VadCallback = Box<dyn Fn(bool) + Send + Sync>;

pub trait WakeWordDetect: Send + Sync {
    fn start_detection(&self);
    fn stop_detection(&self);
    fn is_detection_running(&self) -> bool;

    /// Feed one 16 kHz capture block (interleaved when stereo).
    fn feed(&self, pcm: &[i16]);

    /// Fired once per spotted phrase with the phrase text.
    fn on_wake_word_detected(&self, callback: WakeWordCallback);
    /// Fired on voice-activity edges.
    fn on_vad_state_change(&self, callback: VadCallback);

    /// Pre-encoded packets of the utterance captured around the trigger,
    /// drained oldest-first for upload.
    fn drain_wake_word_frames(&self) -> Vec<AudioFrame>;
}
