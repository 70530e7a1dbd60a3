//! Core settings.
//!
//! Loaded from a JSON file written by the provisioning layer. A missing
//! file yields defaults; a corrupt file is erased, rewritten with defaults,
//! and startup continues. All timing knobs live here so tests can shrink
//! them.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

fn default_max_output_silence_ms() -> u64 {
    10_000
}

fn default_post_abort_drain_ms() -> u64 {
    120
}

fn default_version_poll_ms() -> u64 {
    60_000
}

fn default_upgrade_idle_poll_ms() -> u64 {
    3_000
}

fn default_upgrade_settle_ms() -> u64 {
    1_000
}

fn default_upgrade_fail_delay_ms() -> u64 {
    3_000
}

fn default_decode_queue_warn_len() -> usize {
    64
}

fn default_frame_duration_ms() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Version-check endpoint; `None` disables the firmware poll.
    #[serde(default)]
    pub check_version_url: Option<String>,

    /// Idle time with an empty decode queue before codec output is
    /// powered down.
    #[serde(default = "default_max_output_silence_ms")]
    pub max_output_silence_ms: u64,

    /// Approximate playback drain after aborting a speaking turn.
    #[serde(default = "default_post_abort_drain_ms")]
    pub post_abort_drain_ms: u64,

    /// Interval between firmware version checks.
    #[serde(default = "default_version_poll_ms")]
    pub version_poll_ms: u64,

    /// Poll interval while waiting for Idle before an upgrade.
    #[serde(default = "default_upgrade_idle_poll_ms")]
    pub upgrade_idle_poll_ms: u64,

    /// Settle time between draining audio work and starting the upgrade.
    #[serde(default = "default_upgrade_settle_ms")]
    pub upgrade_settle_ms: u64,

    /// How long the failure status stays on screen before reboot.
    #[serde(default = "default_upgrade_fail_delay_ms")]
    pub upgrade_fail_delay_ms: u64,

    /// Decode-queue length past which bursts are logged. The queue is not
    /// hard-capped; the transport paces producers.
    #[serde(default = "default_decode_queue_warn_len")]
    pub decode_queue_warn_len: usize,

    /// Encoder frame duration.
    #[serde(default = "default_frame_duration_ms")]
    pub frame_duration_ms: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        // serde's field defaults are the single source of truth.
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl CoreConfig {
    /// Read settings from `path`.
    ///
    /// A missing file yields defaults. An unparsable file is replaced with
    /// a freshly written default file so the next boot starts clean.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), "no settings file ({e}), using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), "corrupt settings ({e}), reinitializing");
                let defaults = Self::default();
                if let Err(e) = defaults.store(path) {
                    warn!("failed to rewrite settings: {e}");
                }
                defaults
            }
        }
    }

    /// Write settings to `path` as pretty JSON.
    pub fn store(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn max_output_silence(&self) -> Duration {
        Duration::from_millis(self.max_output_silence_ms)
    }

    pub fn post_abort_drain(&self) -> Duration {
        Duration::from_millis(self.post_abort_drain_ms)
    }

    pub fn version_poll(&self) -> Duration {
        Duration::from_millis(self.version_poll_ms)
    }

    pub fn upgrade_idle_poll(&self) -> Duration {
        Duration::from_millis(self.upgrade_idle_poll_ms)
    }

    pub fn upgrade_settle(&self) -> Duration {
        Duration::from_millis(self.upgrade_settle_ms)
    }

    pub fn upgrade_fail_delay(&self) -> Duration {
        Duration::from_millis(self.upgrade_fail_delay_ms)
    }
}
