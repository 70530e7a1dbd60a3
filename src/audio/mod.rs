//! Audio seams: codec façade, compressed-frame codecs, resampling,
//! acoustic front-end processing, local prompt playback.
//!
//! The core drives these interfaces; the concrete drivers (I2S codec,
//! opus, AEC engine) live in the board layer and are injected at startup.

pub mod processor;
pub mod prompt;
pub mod resampler;

use anyhow::Result;

/// Sample rate of the capture/encode side of the pipeline.
pub const ENCODE_SAMPLE_RATE: u32 = 16_000;

/// One compressed audio packet. The core never inspects its interior.
pub type AudioFrame = Vec<u8>;

/// An owned block of 16-bit PCM at a stated rate and channel count.
/// Stereo blocks interleave mic and reference channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmBlock {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

pub type ReadyCallback = Box<dyn Fn() + Send + Sync>;

/// Hardware codec as seen by the core.
///
/// Ready callbacks fire from driver context and may only latch event bits;
/// the data paths are pulled/pushed from the main loop and the background
/// worker. Implementations are internally thread-safe.
pub trait AudioCodec: Send + Sync {
    fn input_sample_rate(&self) -> u32;
    fn input_channels(&self) -> u16;
    fn output_sample_rate(&self) -> u32;

    fn on_input_ready(&self, callback: ReadyCallback);
    fn on_output_ready(&self, callback: ReadyCallback);
    fn start(&self);

    /// Pull one captured PCM block, or `None` when nothing is pending.
    fn read_input(&self) -> Option<PcmBlock>;
    /// Push decoded PCM toward the speaker.
    fn write_output(&self, pcm: &[i16]);

    fn enable_output(&self, enabled: bool);
    fn output_enabled(&self) -> bool;
}

/// Compressed-audio decoder owned by the core (one mono stream).
pub trait AudioDecoder: Send {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>>;
    /// Drop any inter-frame prediction state.
    fn reset(&mut self);
    /// Reconfigure for a new output rate; implementations rebuild their
    /// internal codec state when the rate actually changes.
    fn set_sample_rate(&mut self, sample_rate: u32);
    fn sample_rate(&self) -> u32;
}

/// Compressed-audio encoder owned by the core (16 kHz mono, fixed frame
/// duration). One PCM block may yield zero or more packets; partial frames
/// are buffered inside the encoder.
pub trait AudioEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<AudioFrame>>;
    /// Drop buffered samples and inter-frame prediction state.
    fn reset(&mut self);
}
