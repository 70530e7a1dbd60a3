//! Transport contract and the structured control-message schema.
//!
//! A transport (bidirectional streaming or message-queue based) implements
//! `Protocol`; the core owns it and installs `ProtocolCallbacks` whose
//! closures re-post through the scheduler before touching core state.

use anyhow::Result;
use serde::Deserialize;

use crate::audio::AudioFrame;
use crate::state::{AbortReason, ListeningMode};

/// What the transport offers the core.
///
/// `open_audio_channel` may block; the core only calls it from a scheduled
/// task, where blocking is acceptable. Send failures surface here as
/// results and are logged by the core; session-level errors arrive via
/// `on_network_error`.
pub trait Protocol: Send + Sync {
    fn open_audio_channel(&self) -> bool;
    fn close_audio_channel(&self);
    fn is_audio_channel_opened(&self) -> bool;

    fn send_audio(&self, frame: AudioFrame) -> Result<()>;
    fn send_start_listening(&self, mode: ListeningMode) -> Result<()>;
    fn send_stop_listening(&self) -> Result<()>;
    fn send_abort_speaking(&self, reason: AbortReason) -> Result<()>;
    fn send_wake_word_detected(&self, wake_word: &str) -> Result<()>;
    fn send_iot_descriptors(&self, descriptors: &str) -> Result<()>;
    fn send_iot_states(&self, states: &str) -> Result<()>;

    /// Playback sample rate negotiated with the service.
    fn server_sample_rate(&self) -> u32;

    fn register_callbacks(&self, callbacks: ProtocolCallbacks);
}

/// Callbacks the core installs on the transport. All of them fire on
/// transport workers.
pub struct ProtocolCallbacks {
    pub on_network_error: Box<dyn Fn(String) + Send + Sync>,
    pub on_incoming_audio: Box<dyn Fn(AudioFrame) + Send + Sync>,
    pub on_audio_channel_opened: Box<dyn Fn() + Send + Sync>,
    pub on_audio_channel_closed: Box<dyn Fn() + Send + Sync>,
    pub on_incoming_json: Box<dyn Fn(serde_json::Value) + Send + Sync>,
}

// ── Control messages ────────────────────────────────────────────────

/// Structured control messages from the service, discriminated by `type`.
/// Unrecognized types deserialize to `Unknown` and are ignored.
///
/// Speech-synthesis lifecycle stages arrive as `state` strings
/// ("start", "stop", "sentence_start"); unknown stages are ignored by the
/// dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Tts {
        state: String,
        #[serde(default)]
        text: Option<String>,
    },
    Stt {
        text: String,
    },
    Llm {
        #[serde(default)]
        emotion: Option<String>,
    },
    Iot {
        #[serde(default)]
        commands: Vec<serde_json::Value>,
    },
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Parse a raw transport object; malformed fields degrade to `Unknown`
    /// rather than erroring, since the loop must always continue.
    pub fn from_value(value: serde_json::Value) -> Self {
        match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("unparsable control message: {e}");
                ControlMessage::Unknown
            }
        }
    }
}
