//! Fake peripherals for exercising the core without hardware.
//!
//! Every fake records the calls the core makes so tests can assert on
//! behavior; probes are `Arc`-shared between the injected driver and the
//! test body.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::json;

use voicenode::app::{App, Drivers};
use voicenode::audio::processor::{AudioProcessor, NoAudioProcessor, ProcessorOutput};
use voicenode::audio::{AudioCodec, AudioDecoder, AudioEncoder, AudioFrame, PcmBlock, ReadyCallback};
use voicenode::board::{Board, BoardHooks, DisplayPanel, Led};
use voicenode::config::CoreConfig;
use voicenode::iot::{Thing, ThingManager};
use voicenode::ota::{FirmwareUpdater, ProgressCallback};
use voicenode::protocol::{Protocol, ProtocolCallbacks};
use voicenode::state::{AbortReason, DeviceState, ListeningMode};
use voicenode::wake_word::{VadCallback, WakeWordCallback, WakeWordDetect};

// ── Codec ───────────────────────────────────────────────────────────

pub struct FakeCodec {
    input_rate: u32,
    input_channels: u16,
    output_rate: u32,
    input_ready: Mutex<Option<ReadyCallback>>,
    output_ready: Mutex<Option<ReadyCallback>>,
    pub input_blocks: Mutex<VecDeque<PcmBlock>>,
    pub written: Mutex<Vec<Vec<i16>>>,
    output_enabled: AtomicBool,
    pub disable_calls: AtomicUsize,
    pub started: AtomicBool,
}

impl FakeCodec {
    pub fn new(input_rate: u32, input_channels: u16, output_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            input_rate,
            input_channels,
            output_rate,
            input_ready: Mutex::new(None),
            output_ready: Mutex::new(None),
            input_blocks: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            output_enabled: AtomicBool::new(true),
            disable_calls: AtomicUsize::new(0),
            started: AtomicBool::new(false),
        })
    }

    pub fn push_input(&self, block: PcmBlock) {
        self.input_blocks.lock().unwrap().push_back(block);
    }

    /// Simulate the capture-ready interrupt.
    pub fn raise_input_ready(&self) {
        if let Some(cb) = self.input_ready.lock().unwrap().as_ref() {
            cb();
        }
    }

    /// Simulate the playback-ready interrupt.
    pub fn raise_output_ready(&self) {
        if let Some(cb) = self.output_ready.lock().unwrap().as_ref() {
            cb();
        }
    }

    pub fn written_samples(&self) -> usize {
        self.written.lock().unwrap().iter().map(Vec::len).sum()
    }
}

impl AudioCodec for FakeCodec {
    fn input_sample_rate(&self) -> u32 {
        self.input_rate
    }

    fn input_channels(&self) -> u16 {
        self.input_channels
    }

    fn output_sample_rate(&self) -> u32 {
        self.output_rate
    }

    fn on_input_ready(&self, callback: ReadyCallback) {
        *self.input_ready.lock().unwrap() = Some(callback);
    }

    fn on_output_ready(&self, callback: ReadyCallback) {
        *self.output_ready.lock().unwrap() = Some(callback);
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn read_input(&self) -> Option<PcmBlock> {
        self.input_blocks.lock().unwrap().pop_front()
    }

    fn write_output(&self, pcm: &[i16]) {
        self.written.lock().unwrap().push(pcm.to_vec());
    }

    fn enable_output(&self, enabled: bool) {
        if !enabled {
            self.disable_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.output_enabled.store(enabled, Ordering::SeqCst);
    }

    fn output_enabled(&self) -> bool {
        self.output_enabled.load(Ordering::SeqCst)
    }
}

// ── Display / LED / hooks ───────────────────────────────────────────

#[derive(Default)]
pub struct FakeDisplay {
    pub statuses: Mutex<Vec<String>>,
    pub emotions: Mutex<Vec<String>>,
    pub chat_messages: Mutex<Vec<(String, String)>>,
    pub notifications: Mutex<Vec<String>>,
    pub icons: Mutex<Vec<String>>,
}

impl FakeDisplay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_status(&self) -> Option<String> {
        self.statuses.lock().unwrap().last().cloned()
    }
}

impl DisplayPanel for FakeDisplay {
    fn set_status(&self, status: &str) {
        self.statuses.lock().unwrap().push(status.to_string());
    }

    fn set_emotion(&self, emotion: &str) {
        self.emotions.lock().unwrap().push(emotion.to_string());
    }

    fn set_chat_message(&self, role: &str, text: &str) {
        self.chat_messages
            .lock()
            .unwrap()
            .push((role.to_string(), text.to_string()));
    }

    fn show_notification(&self, message: &str) {
        self.notifications.lock().unwrap().push(message.to_string());
    }

    fn set_icon(&self, icon: &str) {
        self.icons.lock().unwrap().push(icon.to_string());
    }
}

#[derive(Default)]
pub struct FakeLed {
    pub changes: Mutex<Vec<(DeviceState, bool)>>,
}

impl FakeLed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn states(&self) -> Vec<DeviceState> {
        self.changes.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }
}

impl Led for FakeLed {
    fn state_changed(&self, state: DeviceState, voice_detected: bool) {
        self.changes.lock().unwrap().push((state, voice_detected));
    }
}

#[derive(Default)]
pub struct FakeHooks {
    pub power_save: AtomicBool,
    pub reboots: AtomicUsize,
}

impl FakeHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl BoardHooks for FakeHooks {
    fn start_network(&self) -> Result<()> {
        Ok(())
    }

    fn set_power_save(&self, enabled: bool) {
        self.power_save.store(enabled, Ordering::SeqCst);
    }

    fn device_id(&self) -> String {
        "aa:bb:cc:dd:ee:ff".to_string()
    }

    fn descriptor_json(&self) -> serde_json::Value {
        json!({"board": "test-bench", "version": "1.0.0"})
    }

    fn reboot(&self) {
        self.reboots.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Protocol ────────────────────────────────────────────────────────

pub struct FakeProtocol {
    pub open_result: AtomicBool,
    opened: AtomicBool,
    server_rate: AtomicU32,
    callbacks: Mutex<Option<ProtocolCallbacks>>,
    pub sent_audio: Mutex<Vec<AudioFrame>>,
    pub start_listening_calls: Mutex<Vec<ListeningMode>>,
    pub stop_listening_calls: AtomicUsize,
    pub abort_calls: Mutex<Vec<AbortReason>>,
    pub wake_words: Mutex<Vec<String>>,
    pub iot_descriptors: Mutex<Vec<String>>,
    pub iot_states: Mutex<Vec<String>>,
}

impl FakeProtocol {
    pub fn new(server_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            open_result: AtomicBool::new(true),
            opened: AtomicBool::new(false),
            server_rate: AtomicU32::new(server_rate),
            callbacks: Mutex::new(None),
            sent_audio: Mutex::new(Vec::new()),
            start_listening_calls: Mutex::new(Vec::new()),
            stop_listening_calls: AtomicUsize::new(0),
            abort_calls: Mutex::new(Vec::new()),
            wake_words: Mutex::new(Vec::new()),
            iot_descriptors: Mutex::new(Vec::new()),
            iot_states: Mutex::new(Vec::new()),
        })
    }

    fn with_callbacks(&self, f: impl FnOnce(&ProtocolCallbacks)) {
        let callbacks = self.callbacks.lock().unwrap();
        if let Some(callbacks) = callbacks.as_ref() {
            f(callbacks);
        }
    }

    pub fn fire_incoming_json(&self, value: serde_json::Value) {
        self.with_callbacks(|c| (c.on_incoming_json)(value));
    }

    pub fn fire_incoming_audio(&self, frame: AudioFrame) {
        self.with_callbacks(|c| (c.on_incoming_audio)(frame));
    }

    pub fn fire_audio_channel_opened(&self) {
        self.with_callbacks(|c| (c.on_audio_channel_opened)());
    }

    pub fn fire_network_error(&self, message: &str) {
        self.with_callbacks(|c| (c.on_network_error)(message.to_string()));
    }
}

impl Protocol for FakeProtocol {
    fn open_audio_channel(&self) -> bool {
        if self.open_result.load(Ordering::SeqCst) {
            self.opened.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn close_audio_channel(&self) {
        self.opened.store(false, Ordering::SeqCst);
        self.with_callbacks(|c| (c.on_audio_channel_closed)());
    }

    fn is_audio_channel_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        self.sent_audio.lock().unwrap().push(frame);
        Ok(())
    }

    fn send_start_listening(&self, mode: ListeningMode) -> Result<()> {
        self.start_listening_calls.lock().unwrap().push(mode);
        Ok(())
    }

    fn send_stop_listening(&self) -> Result<()> {
        self.stop_listening_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send_abort_speaking(&self, reason: AbortReason) -> Result<()> {
        self.abort_calls.lock().unwrap().push(reason);
        Ok(())
    }

    fn send_wake_word_detected(&self, wake_word: &str) -> Result<()> {
        self.wake_words.lock().unwrap().push(wake_word.to_string());
        Ok(())
    }

    fn send_iot_descriptors(&self, descriptors: &str) -> Result<()> {
        self.iot_descriptors
            .lock()
            .unwrap()
            .push(descriptors.to_string());
        Ok(())
    }

    fn send_iot_states(&self, states: &str) -> Result<()> {
        self.iot_states.lock().unwrap().push(states.to_string());
        Ok(())
    }

    fn server_sample_rate(&self) -> u32 {
        self.server_rate.load(Ordering::SeqCst)
    }

    fn register_callbacks(&self, callbacks: ProtocolCallbacks) {
        *self.callbacks.lock().unwrap() = Some(callbacks);
    }
}

// ── Decoder / encoder ───────────────────────────────────────────────

pub struct DecoderProbe {
    pub decoded: Mutex<Vec<AudioFrame>>,
    pub sample_rate: AtomicU32,
    pub resets: AtomicUsize,
    /// PCM samples produced per decoded frame.
    pub pcm_per_frame: usize,
}

pub struct FakeDecoder {
    pub probe: Arc<DecoderProbe>,
}

impl FakeDecoder {
    pub fn new(pcm_per_frame: usize) -> (Box<dyn AudioDecoder>, Arc<DecoderProbe>) {
        let probe = Arc::new(DecoderProbe {
            decoded: Mutex::new(Vec::new()),
            sample_rate: AtomicU32::new(0),
            resets: AtomicUsize::new(0),
            pcm_per_frame,
        });
        (
            Box::new(FakeDecoder {
                probe: Arc::clone(&probe),
            }),
            probe,
        )
    }
}

impl AudioDecoder for FakeDecoder {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>> {
        self.probe.decoded.lock().unwrap().push(frame.to_vec());
        Ok(vec![0i16; self.probe.pcm_per_frame])
    }

    fn reset(&mut self) {
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.probe.sample_rate.store(sample_rate, Ordering::SeqCst);
    }

    fn sample_rate(&self) -> u32 {
        self.probe.sample_rate.load(Ordering::SeqCst)
    }
}

pub struct EncoderProbe {
    pub blocks: Mutex<Vec<Vec<i16>>>,
    pub resets: AtomicUsize,
}

pub struct FakeEncoder {
    pub probe: Arc<EncoderProbe>,
}

impl FakeEncoder {
    pub fn new() -> (Box<dyn AudioEncoder>, Arc<EncoderProbe>) {
        let probe = Arc::new(EncoderProbe {
            blocks: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
        });
        (
            Box::new(FakeEncoder {
                probe: Arc::clone(&probe),
            }),
            probe,
        )
    }
}

impl AudioEncoder for FakeEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Vec<AudioFrame>> {
        self.probe.blocks.lock().unwrap().push(pcm.to_vec());
        // One marker packet per block: its length is the sample count.
        Ok(vec![vec![0u8; pcm.len().min(255)]])
    }

    fn reset(&mut self) {
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Wake word ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeWakeWord {
    running: AtomicBool,
    wake_cb: Mutex<Option<WakeWordCallback>>,
    vad_cb: Mutex<Option<VadCallback>>,
    pub fed: Mutex<Vec<Vec<i16>>>,
    pub pending_frames: Mutex<Vec<AudioFrame>>,
}

impl FakeWakeWord {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate a detection from the inference worker.
    pub fn trigger(&self, word: &str) {
        if let Some(cb) = self.wake_cb.lock().unwrap().as_ref() {
            cb(word.to_string());
        }
    }

    pub fn set_vad(&self, speaking: bool) {
        if let Some(cb) = self.vad_cb.lock().unwrap().as_ref() {
            cb(speaking);
        }
    }

    pub fn queue_frames(&self, frames: Vec<AudioFrame>) {
        *self.pending_frames.lock().unwrap() = frames;
    }
}

impl WakeWordDetect for FakeWakeWord {
    fn start_detection(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop_detection(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_detection_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn feed(&self, pcm: &[i16]) {
        self.fed.lock().unwrap().push(pcm.to_vec());
    }

    fn on_wake_word_detected(&self, callback: WakeWordCallback) {
        *self.wake_cb.lock().unwrap() = Some(callback);
    }

    fn on_vad_state_change(&self, callback: VadCallback) {
        *self.vad_cb.lock().unwrap() = Some(callback);
    }

    fn drain_wake_word_frames(&self) -> Vec<AudioFrame> {
        std::mem::take(&mut *self.pending_frames.lock().unwrap())
    }
}

// ── Updater ─────────────────────────────────────────────────────────

pub struct UpdaterProbe {
    pub marked_valid: AtomicBool,
    pub upgrades: AtomicUsize,
}

pub struct FakeUpdater {
    pub probe: Arc<UpdaterProbe>,
    pub new_version: bool,
}

impl FakeUpdater {
    pub fn new(new_version: bool) -> (Box<dyn FirmwareUpdater>, Arc<UpdaterProbe>) {
        let probe = Arc::new(UpdaterProbe {
            marked_valid: AtomicBool::new(false),
            upgrades: AtomicUsize::new(0),
        });
        (
            Box::new(FakeUpdater {
                probe: Arc::clone(&probe),
                new_version,
            }),
            probe,
        )
    }
}

impl FirmwareUpdater for FakeUpdater {
    fn set_check_version_url(&mut self, _url: &str) {}

    fn set_header(&mut self, _name: &str, _value: &str) {}

    fn set_post_data(&mut self, _body: String) {}

    fn check_version(&mut self) -> bool {
        true
    }

    fn has_new_version(&self) -> bool {
        self.new_version
    }

    fn firmware_version(&self) -> String {
        "2.0.0".to_string()
    }

    fn current_version(&self) -> String {
        "1.0.0".to_string()
    }

    fn mark_current_version_valid(&mut self) {
        self.probe.marked_valid.store(true, Ordering::SeqCst);
    }

    fn start_upgrade(&mut self, on_progress: ProgressCallback) -> Result<()> {
        self.probe.upgrades.fetch_add(1, Ordering::SeqCst);
        on_progress(42, 128 * 1024);
        Err(anyhow::anyhow!("image write failed"))
    }
}

// ── Things ──────────────────────────────────────────────────────────

pub struct FakeLamp {
    pub invocations: Arc<Mutex<Vec<serde_json::Value>>>,
    pub on: Arc<AtomicBool>,
}

impl Thing for FakeLamp {
    fn name(&self) -> &str {
        "Lamp"
    }

    fn descriptor(&self) -> serde_json::Value {
        json!({"name": "Lamp", "methods": ["TurnOn", "TurnOff"]})
    }

    fn state(&self) -> serde_json::Value {
        json!({"name": "Lamp", "on": self.on.load(Ordering::SeqCst)})
    }

    fn invoke(&self, command: &serde_json::Value) -> Result<()> {
        self.invocations.lock().unwrap().push(command.clone());
        self.on.store(
            command.get("method").and_then(|m| m.as_str()) == Some("TurnOn"),
            Ordering::SeqCst,
        );
        Ok(())
    }
}

// ── Passthrough front-end ───────────────────────────────────────────

/// Minimal "AEC" that forwards its input to the output callback while
/// running, for exercising the processor route of the input pipeline.
pub struct PassthroughProcessor {
    running: bool,
    output: Option<ProcessorOutput>,
}

impl PassthroughProcessor {
    pub fn new() -> Self {
        Self {
            running: false,
            output: None,
        }
    }
}

impl AudioProcessor for PassthroughProcessor {
    fn start(&mut self) {
        self.running = true;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn feed(&mut self, pcm: &[i16]) {
        if self.running {
            if let Some(output) = self.output.as_mut() {
                output(pcm.to_vec());
            }
        }
    }

    fn on_output(&mut self, callback: ProcessorOutput) {
        self.output = Some(callback);
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct HarnessOptions {
    pub config: CoreConfig,
    pub input_rate: u32,
    pub input_channels: u16,
    pub output_rate: u32,
    pub server_rate: u32,
    pub with_wake_word: bool,
    pub with_processor: bool,
    pub updater: Option<Box<dyn FirmwareUpdater>>,
    pub prompts: HashMap<String, Vec<u8>>,
    pub things: Arc<ThingManager>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            config: CoreConfig::default(),
            input_rate: 16_000,
            input_channels: 1,
            output_rate: 24_000,
            server_rate: 24_000,
            with_wake_word: false,
            with_processor: false,
            updater: None,
            prompts: HashMap::new(),
            things: Arc::new(ThingManager::new()),
        }
    }
}

pub struct Harness {
    pub app: App,
    pub codec: Arc<FakeCodec>,
    pub display: Arc<FakeDisplay>,
    pub led: Arc<FakeLed>,
    pub hooks: Arc<FakeHooks>,
    pub protocol: Arc<FakeProtocol>,
    pub decoder: Arc<DecoderProbe>,
    pub encoder: Arc<EncoderProbe>,
    pub wake: Option<Arc<FakeWakeWord>>,
}

impl Harness {
    pub fn start(options: HarnessOptions) -> Self {
        // Respects RUST_LOG; repeated init calls across tests are fine.
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_test_writer()
            .try_init();

        let codec = FakeCodec::new(
            options.input_rate,
            options.input_channels,
            options.output_rate,
        );
        let display = FakeDisplay::new();
        let led = FakeLed::new();
        let hooks = FakeHooks::new();
        let protocol = FakeProtocol::new(options.server_rate);
        let (decoder, decoder_probe) = FakeDecoder::new(480);
        let (encoder, encoder_probe) = FakeEncoder::new();
        let wake = options.with_wake_word.then(FakeWakeWord::new);

        let board = Board {
            codec: codec.clone(),
            display: display.clone(),
            led: led.clone(),
            hooks: hooks.clone(),
        };

        let processor: Box<dyn AudioProcessor> = if options.with_processor {
            Box::new(PassthroughProcessor::new())
        } else {
            Box::new(NoAudioProcessor)
        };

        let drivers = Drivers {
            board,
            protocol: protocol.clone(),
            decoder,
            encoder,
            processor,
            wake_word: wake
                .clone()
                .map(|w| w as Arc<dyn WakeWordDetect>),
            updater: options.updater,
            things: options.things,
            prompts: options.prompts,
        };

        let app = App::start(options.config, drivers).expect("core start");
        // Let the startup transition to Idle land before the test begins.
        app.flush();

        Harness {
            app,
            codec,
            display,
            led,
            hooks,
            protocol,
            decoder: decoder_probe,
            encoder: encoder_probe,
            wake,
        }
    }

    pub fn start_default() -> Self {
        Self::start(HarnessOptions::default())
    }

    /// Put the core into a Listening turn via the user toggle.
    pub fn enter_listening(&self) {
        self.app.toggle_chat_state();
        self.app.flush();
        assert_eq!(self.app.device_state(), DeviceState::Listening);
    }

    /// Move an ongoing turn into Speaking via the service lifecycle.
    pub fn enter_speaking(&self) {
        self.protocol
            .fire_incoming_json(json!({"type": "tts", "state": "start"}));
        self.app.flush();
        assert_eq!(self.app.device_state(), DeviceState::Speaking);
    }

    /// Poll until `predicate` holds or the deadline passes.
    pub fn wait_until(&self, timeout: Duration, predicate: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }
}
