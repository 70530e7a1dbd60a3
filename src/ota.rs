//! Firmware update client seam and the version-check worker.
//!
//! The update client itself (HTTP, image download, flashing) lives in the
//! board layer; the core drives its lifecycle: poll for a new version,
//! wait for the device to go quiet, then hand the main loop a non-cancelable
//! upgrade task.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::app::{schedule_task, Shared};
use crate::board::Board;
use crate::config::CoreConfig;
use crate::state::DeviceState;

pub type ProgressCallback = Box<dyn Fn(u32, usize) + Send>;

/// Firmware update client. A successful `start_upgrade` reboots the
/// device inside the call and never returns.
pub trait FirmwareUpdater: Send {
    fn set_check_version_url(&mut self, url: &str);
    fn set_header(&mut self, name: &str, value: &str);
    fn set_post_data(&mut self, body: String);

    /// Query the update service; `false` means the check itself failed.
    fn check_version(&mut self) -> bool;
    fn has_new_version(&self) -> bool;
    fn firmware_version(&self) -> String;
    fn current_version(&self) -> String;
    fn mark_current_version_valid(&mut self);

    /// Download and flash, reporting (percent, bytes/s). Returning at all
    /// means the upgrade failed.
    fn start_upgrade(&mut self, on_progress: ProgressCallback) -> Result<()>;
}

/// Sleep in slices so shutdown is not held up by a long poll interval.
fn sleep_while_running(shared: &Shared, duration: Duration) -> bool {
    let slice = Duration::from_millis(50);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if !shared.is_running() {
            return false;
        }
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
    shared.is_running()
}

/// Version-check worker: poll until a check succeeds, then either mark the
/// running version valid or schedule the upgrade once the device is idle.
pub(crate) fn run_version_check(
    shared: Arc<Shared>,
    board: Board,
    config: CoreConfig,
    mut updater: Box<dyn FirmwareUpdater>,
) {
    let Some(url) = config.check_version_url.as_deref() else {
        info!("no version check url configured, firmware poll disabled");
        return;
    };
    updater.set_check_version_url(url);
    updater.set_header("Device-Id", &board.hooks.device_id());
    updater.set_post_data(board.hooks.descriptor_json().to_string());

    loop {
        if !shared.is_running() {
            return;
        }
        if updater.check_version() {
            break;
        }
        if !sleep_while_running(&shared, config.version_poll()) {
            return;
        }
    }

    if !updater.has_new_version() {
        updater.mark_current_version_valid();
        board
            .display
            .show_notification(&format!("版本 {}", updater.current_version()));
        return;
    }

    let version = updater.firmware_version();
    info!(version = %version, "new firmware available, waiting for idle");
    while shared.device_state() != DeviceState::Idle {
        if !sleep_while_running(&shared, config.upgrade_idle_poll()) {
            return;
        }
    }

    schedule_task(&shared, move |core| core.run_upgrade(updater));
}
