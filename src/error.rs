//! Error types for the control core.
//!
//! Nothing here crosses the event-loop boundary; the loop always continues.
//! These cover the config/resampler paths that have a caller to report to.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Settings file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Resampler construction failed for a rate pair.
    #[error("resampler error: {0}")]
    Resampler(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
