//! Streaming mono resampler.
//!
//! Thin stateful wrapper over `rubato`'s sinc resampler. Each pipeline
//! position (mic, reference, output) keeps its own instance so filter
//! state stays continuous across blocks. Configuring identical source and
//! target rates bypasses the kernel entirely.

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use crate::error::{Error, Result};

/// Frames consumed per kernel pass. Input shorter than this is buffered
/// until the next block arrives.
const CHUNK_FRAMES: usize = 256;

pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl Resampler {
    /// Identity resampler; `process` passes samples through unchanged.
    pub fn new() -> Self {
        Self {
            source_rate: 0,
            target_rate: 0,
            inner: None,
            pending: Vec::new(),
        }
    }

    /// (Re)configure for a rate pair, dropping any buffered samples.
    pub fn configure(&mut self, source_rate: u32, target_rate: u32) -> Result<()> {
        self.source_rate = source_rate;
        self.target_rate = target_rate;
        self.pending.clear();

        if source_rate == target_rate {
            self.inner = None;
            return Ok(());
        }

        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(
            target_rate as f64 / source_rate as f64,
            1.0,
            params,
            CHUNK_FRAMES,
            1,
        )
        .map_err(|e| Error::Resampler(e.to_string()))?;
        self.inner = Some(inner);
        Ok(())
    }

    pub fn is_bypassed(&self) -> bool {
        self.inner.is_none()
    }

    /// Resample one block. Returns the samples produced by whole kernel
    /// passes; a sub-chunk remainder is carried into the next call.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        let Some(inner) = self.inner.as_mut() else {
            return input.to_vec();
        };

        self.pending
            .extend(input.iter().map(|&s| f32::from(s) / 32768.0));

        let mut output = Vec::new();
        while self.pending.len() >= CHUNK_FRAMES {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_FRAMES).collect();
            match inner.process(&[chunk], None) {
                Ok(mut frames) => {
                    output.extend(frames.remove(0).into_iter().map(|s| {
                        (s * 32768.0).round().clamp(f32::from(i16::MIN), f32::from(i16::MAX))
                            as i16
                    }));
                }
                Err(e) => {
                    tracing::warn!("resampler pass failed, dropping chunk: {e}");
                }
            }
        }
        output
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new()
    }
}
