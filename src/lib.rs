//! Control and audio-pipeline core for an embedded voice-assistant
//! endpoint.
//!
//! The core owns the device state machine, the main event loop, the
//! capture and playback pipelines, and a background executor for
//! CPU-bound codec work. The hardware (codec, display, LED), the wake-word
//! detector, the acoustic front-end, the firmware updater, and the cloud
//! transport are injected behind traits; the board layer wires real
//! drivers, tests wire fakes.
//!
//! Data flows:
//! - capture: codec → resample to 16 kHz → wake word / front-end →
//!   encode (background) → transport
//! - playback: transport → decode queue → decode + resample (background)
//!   → codec
//! - control: transport → dispatcher → scheduled closures → state machine

pub mod app;
pub mod audio;
pub mod background;
pub mod board;
pub mod config;
pub mod error;
pub mod events;
pub mod iot;
pub mod ota;
pub mod protocol;
pub mod state;
pub mod wake_word;

pub use app::{App, AppCore, Drivers};
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use state::{AbortReason, DeviceState, ListeningMode};
