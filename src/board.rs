//! Injected board façade.
//!
//! The display, LED, codec, and miscellaneous platform hooks are owned by
//! the board layer and shared into the core as trait objects. The core
//! mutates them only through these operations; implementations are
//! internally thread-safe. Tests pass fakes.

use std::sync::Arc;

use anyhow::Result;

use crate::audio::AudioCodec;
use crate::state::DeviceState;

/// Status panel / screen.
pub trait DisplayPanel: Send + Sync {
    fn set_status(&self, status: &str);
    fn set_emotion(&self, emotion: &str);
    /// Show a chat bubble; `role` is "user" or "assistant", empty clears.
    fn set_chat_message(&self, role: &str, text: &str);
    fn show_notification(&self, message: &str);
    fn set_icon(&self, icon: &str);
}

/// State-indicator LED. Observes every state change plus the VAD mirror
/// while listening.
pub trait Led: Send + Sync {
    fn state_changed(&self, state: DeviceState, voice_detected: bool);
}

/// Platform odds and ends the core consumes but does not implement.
pub trait BoardHooks: Send + Sync {
    /// Bring up Wi-Fi/cellular; blocks until the link is usable.
    fn start_network(&self) -> Result<()>;
    fn set_power_save(&self, enabled: bool);
    /// Stable device identifier (MAC) for the update service.
    fn device_id(&self) -> String;
    /// Board self-description POSTed to the version check.
    fn descriptor_json(&self) -> serde_json::Value;
    fn reboot(&self);
}

/// Shared handles into the board, threaded through the core.
#[derive(Clone)]
pub struct Board {
    pub codec: Arc<dyn AudioCodec>,
    pub display: Arc<dyn DisplayPanel>,
    pub led: Arc<dyn Led>,
    pub hooks: Arc<dyn BoardHooks>,
}
