//! Application control core.
//!
//! Owns the device state machine, the main event loop, both audio
//! pipelines, and the coordination contract with the transport. All state
//! mutation happens on the main loop; every other worker (codec callbacks,
//! transport workers, the background executor, the version-check thread)
//! reaches the core by scheduling a closure.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{error, info, warn};

use crate::audio::processor::AudioProcessor;
use crate::audio::prompt;
use crate::audio::resampler::Resampler;
use crate::audio::{AudioDecoder, AudioEncoder, AudioFrame, ENCODE_SAMPLE_RATE};
use crate::background::BackgroundTask;
use crate::board::Board;
use crate::config::CoreConfig;
use crate::events::{
    EventFlags, AUDIO_INPUT_READY_EVENT, AUDIO_OUTPUT_READY_EVENT, SCHEDULE_EVENT, STOP_EVENT,
};
use crate::iot::ThingManager;
use crate::ota::{self, FirmwareUpdater};
use crate::protocol::{ControlMessage, Protocol, ProtocolCallbacks};
use crate::state::{AbortReason, DeviceState, ListeningMode};
use crate::wake_word::WakeWordDetect;

pub(crate) type MainTask = Box<dyn FnOnce(&mut AppCore) + Send>;

// ── Shared state ────────────────────────────────────────────────────

/// Queues guarded by the single core mutex.
pub(crate) struct SharedQueues {
    pub(crate) main_tasks: Vec<MainTask>,
    pub(crate) decode_queue: VecDeque<AudioFrame>,
    pub(crate) last_output_time: Instant,
}

/// State reachable from every worker.
pub(crate) struct Shared {
    pub(crate) events: EventFlags,
    pub(crate) queues: Mutex<SharedQueues>,
    pub(crate) background: BackgroundTask,
    /// Mirror of the canonical state, written only on the main loop.
    state_cell: AtomicU8,
    /// Cooperative cancellation for the current speaking turn.
    pub(crate) aborted: AtomicBool,
    /// VAD mirror for LED feedback.
    voice_detected: AtomicBool,
    pub(crate) running: AtomicBool,
}

impl Shared {
    pub(crate) fn device_state(&self) -> DeviceState {
        DeviceState::from_u8(self.state_cell.load(Ordering::Acquire))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// Queue a closure for the main loop and latch the schedule bit.
/// Safe from any context that may take the core mutex.
pub(crate) fn schedule_task(
    shared: &Arc<Shared>,
    task: impl FnOnce(&mut AppCore) + Send + 'static,
) {
    {
        let mut queues = shared.queues.lock().unwrap();
        queues.main_tasks.push(Box::new(task));
    }
    shared.events.set(SCHEDULE_EVENT);
}

/// Hand one PCM block to the background executor for encoding; finished
/// packets come back through the scheduler and go out on the main loop.
fn submit_encode(
    shared: &Arc<Shared>,
    encoder: &Arc<Mutex<Box<dyn AudioEncoder>>>,
    pcm: Vec<i16>,
) {
    let task_shared = Arc::clone(shared);
    let encoder = Arc::clone(encoder);
    shared.background.schedule(move || {
        let frames = encoder.lock().unwrap().encode(&pcm);
        match frames {
            Ok(frames) => {
                for frame in frames {
                    schedule_task(&task_shared, move |core| core.send_audio_frame(frame));
                }
            }
            Err(e) => warn!("encode failed, dropping block: {e}"),
        }
    });
}

// ── Drivers ─────────────────────────────────────────────────────────

/// Everything the board layer injects into the core at startup.
pub struct Drivers {
    pub board: Board,
    pub protocol: Arc<dyn Protocol>,
    pub decoder: Box<dyn AudioDecoder>,
    pub encoder: Box<dyn AudioEncoder>,
    pub processor: Box<dyn AudioProcessor>,
    pub wake_word: Option<Arc<dyn WakeWordDetect>>,
    pub updater: Option<Box<dyn FirmwareUpdater>>,
    pub things: Arc<ThingManager>,
    /// Pre-encoded prompt blobs keyed by the alert message they voice.
    pub prompts: HashMap<String, Vec<u8>>,
}

// ── Application handle ──────────────────────────────────────────────

/// Running application. User-facing operations schedule closures onto the
/// main loop, preserving single-writer discipline over the device state.
pub struct App {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl App {
    /// Bring the core up: state machine, codecs, pipelines, main loop,
    /// network, version check, detector, transport. Returns once the
    /// transition to Idle has been queued.
    pub fn start(config: CoreConfig, drivers: Drivers) -> Result<App> {
        let Drivers {
            board,
            protocol,
            decoder,
            encoder,
            mut processor,
            wake_word,
            updater,
            things,
            prompts,
        } = drivers;

        let shared = Arc::new(Shared {
            events: EventFlags::new(),
            queues: Mutex::new(SharedQueues {
                main_tasks: Vec::new(),
                decode_queue: VecDeque::new(),
                last_output_time: Instant::now(),
            }),
            background: BackgroundTask::new(),
            state_cell: AtomicU8::new(DeviceState::Unknown as u8),
            aborted: AtomicBool::new(false),
            voice_detected: AtomicBool::new(false),
            running: AtomicBool::new(true),
        });

        let decoder = Arc::new(Mutex::new(decoder));
        let encoder = Arc::new(Mutex::new(encoder));
        let output_resampler = Arc::new(Mutex::new(Resampler::new()));

        // Cleaned front-end output feeds the encoder off the control path.
        {
            let shared = Arc::clone(&shared);
            let encoder = Arc::clone(&encoder);
            processor.on_output(Box::new(move |pcm| submit_encode(&shared, &encoder, pcm)));
        }

        let mut core = AppCore {
            shared: Arc::clone(&shared),
            board: board.clone(),
            config: config.clone(),
            protocol: None,
            device_state: DeviceState::Unknown,
            keep_listening: false,
            decoder,
            encoder,
            output_resampler,
            input_resampler: Resampler::new(),
            reference_resampler: Resampler::new(),
            processor,
            wake_word: wake_word.clone(),
            things,
            last_iot_states: String::new(),
            prompts: prompts
                .into_iter()
                .map(|(key, blob)| (key, Arc::<[u8]>::from(blob.into_boxed_slice())))
                .collect(),
        };

        core.set_device_state(DeviceState::Starting);

        // Decoder follows the codec output rate until the transport
        // negotiates its own; encoder is fixed at 16 kHz.
        let output_rate = board.codec.output_sample_rate();
        core.decoder.lock().unwrap().set_sample_rate(output_rate);

        let input_rate = board.codec.input_sample_rate();
        if input_rate != ENCODE_SAMPLE_RATE {
            core.input_resampler.configure(input_rate, ENCODE_SAMPLE_RATE)?;
            core.reference_resampler
                .configure(input_rate, ENCODE_SAMPLE_RATE)?;
        }

        // Codec readiness runs in driver context: latch a bit, nothing else.
        {
            let shared = Arc::clone(&shared);
            board
                .codec
                .on_input_ready(Box::new(move || shared.events.set(AUDIO_INPUT_READY_EVENT)));
        }
        {
            let shared = Arc::clone(&shared);
            board
                .codec
                .on_output_ready(Box::new(move || shared.events.set(AUDIO_OUTPUT_READY_EVENT)));
        }
        board.codec.start();

        // Detector callbacks re-enter through the scheduler.
        if let Some(detector) = &wake_word {
            {
                let shared = Arc::clone(&shared);
                detector.on_vad_state_change(Box::new(move |speaking| {
                    schedule_task(&shared, move |core| core.handle_vad_change(speaking));
                }));
            }
            {
                let shared = Arc::clone(&shared);
                detector.on_wake_word_detected(Box::new(move |word| {
                    schedule_task(&shared, move |core| core.handle_wake_word(&word));
                }));
            }
        }

        let main_thread = thread::Builder::new()
            .name("main_loop".into())
            .spawn(move || main_loop(core))?;
        let mut threads = vec![main_thread];

        board.hooks.start_network()?;

        if let Some(updater) = updater {
            let shared = Arc::clone(&shared);
            let board = board.clone();
            let config = config.clone();
            let handle = thread::Builder::new()
                .name("version_check".into())
                .spawn(move || ota::run_version_check(shared, board, config, updater))?;
            threads.push(handle);
        }

        if let Some(detector) = &wake_word {
            detector.start_detection();
        }

        board.display.set_status("初始化协议");
        protocol.register_callbacks(build_protocol_callbacks(&shared, &board, &config));

        schedule_task(&shared, move |core| {
            core.protocol = Some(protocol);
            core.set_device_state(DeviceState::Idle);
        });

        Ok(App { shared, threads })
    }

    /// Run a closure on the main loop.
    pub fn schedule(&self, task: impl FnOnce(&mut AppCore) + Send + 'static) {
        schedule_task(&self.shared, task);
    }

    /// Current device state (lock-free mirror).
    pub fn device_state(&self) -> DeviceState {
        self.shared.device_state()
    }

    /// Start or stop a conversation depending on the current state.
    pub fn toggle_chat_state(&self) {
        self.schedule(|core| {
            let Some(protocol) = core.protocol.clone() else {
                error!("protocol not initialized");
                return;
            };
            match core.device_state {
                DeviceState::Idle => {
                    core.set_device_state(DeviceState::Connecting);
                    if !protocol.open_audio_channel() {
                        core.alert("Error", "Failed to open audio channel");
                        core.set_device_state(DeviceState::Idle);
                        return;
                    }
                    core.keep_listening = true;
                    core.log_send(protocol.send_start_listening(ListeningMode::AutoStop));
                    core.set_device_state(DeviceState::Listening);
                }
                DeviceState::Speaking => core.abort_speaking(AbortReason::None),
                DeviceState::Listening => protocol.close_audio_channel(),
                _ => {}
            }
        });
    }

    /// Begin a manually terminated listening turn (push-to-talk press).
    pub fn start_listening(&self) {
        self.schedule(|core| {
            let Some(protocol) = core.protocol.clone() else {
                error!("protocol not initialized");
                return;
            };
            core.keep_listening = false;
            match core.device_state {
                DeviceState::Idle => {
                    if !protocol.is_audio_channel_opened() {
                        core.set_device_state(DeviceState::Connecting);
                        if !protocol.open_audio_channel() {
                            core.set_device_state(DeviceState::Idle);
                            core.alert("Error", "Failed to open audio channel");
                            return;
                        }
                    }
                    core.log_send(protocol.send_start_listening(ListeningMode::ManualStop));
                    core.set_device_state(DeviceState::Listening);
                }
                DeviceState::Speaking => {
                    core.abort_speaking(AbortReason::None);
                    core.log_send(protocol.send_start_listening(ListeningMode::ManualStop));
                    // Approximate playback drain; the codec offers no
                    // buffer-empty signal.
                    thread::sleep(core.config.post_abort_drain());
                    core.set_device_state(DeviceState::Listening);
                }
                _ => {}
            }
        });
    }

    /// End a manual listening turn (push-to-talk release).
    pub fn stop_listening(&self) {
        self.schedule(|core| {
            if core.device_state == DeviceState::Listening {
                if let Some(protocol) = core.protocol.clone() {
                    core.log_send(protocol.send_stop_listening());
                }
                core.set_device_state(DeviceState::Idle);
            }
        });
    }

    /// Preempt the current speaking turn.
    pub fn abort_speaking(&self, reason: AbortReason) {
        self.schedule(move |core| core.abort_speaking(reason));
    }

    /// Show an alert and voice it when a prompt is registered for it.
    pub fn alert(&self, title: impl Into<String>, message: impl Into<String>) {
        let (title, message) = (title.into(), message.into());
        self.schedule(move |core| core.alert(&title, &message));
    }

    /// Queue a canned prompt blob for playback.
    pub fn play_local_file(&self, data: Vec<u8>) {
        self.schedule(move |core| core.play_local_blob(&data));
    }

    /// Block until the background executor has drained, the same barrier
    /// the state machine applies before side effects.
    pub fn wait_background_idle(&self) {
        self.shared.background.wait_for_completion();
    }

    /// Current playback backlog. The queue has no hard cap; watch this
    /// when the transport can burst faster than the decoder drains.
    pub fn decode_queue_len(&self) -> usize {
        self.shared.queues.lock().unwrap().decode_queue.len()
    }

    /// Block until every task queued before this call has run.
    pub fn flush(&self) {
        let (tx, rx) = mpsc::channel();
        self.schedule(move |_core| {
            let _ = tx.send(());
        });
        let _ = rx.recv_timeout(Duration::from_secs(5));
    }

    /// Stop the main loop and join the core's threads.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.events.set(STOP_EVENT);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Main loop ───────────────────────────────────────────────────────

fn main_loop(mut core: AppCore) {
    info!("main loop started");
    loop {
        let bits = core.shared.events.wait();
        if bits & STOP_EVENT != 0 || !core.shared.is_running() {
            break;
        }
        if bits & AUDIO_INPUT_READY_EVENT != 0 {
            core.input_audio();
        }
        if bits & AUDIO_OUTPUT_READY_EVENT != 0 {
            core.output_audio();
        }
        if bits & SCHEDULE_EVENT != 0 {
            let tasks = {
                let mut queues = core.shared.queues.lock().unwrap();
                std::mem::take(&mut queues.main_tasks)
            };
            for task in tasks {
                task(&mut core);
            }
        }
    }
    info!("main loop exited");
}

// ── Core (main-loop-owned) ──────────────────────────────────────────

/// State owned by the main loop. Scheduled closures receive `&mut` access;
/// nothing else may mutate it.
pub struct AppCore {
    shared: Arc<Shared>,
    board: Board,
    config: CoreConfig,
    protocol: Option<Arc<dyn Protocol>>,
    device_state: DeviceState,
    /// After a speaking turn ends, return to Listening instead of Idle.
    keep_listening: bool,
    decoder: Arc<Mutex<Box<dyn AudioDecoder>>>,
    encoder: Arc<Mutex<Box<dyn AudioEncoder>>>,
    output_resampler: Arc<Mutex<Resampler>>,
    input_resampler: Resampler,
    reference_resampler: Resampler,
    processor: Box<dyn AudioProcessor>,
    wake_word: Option<Arc<dyn WakeWordDetect>>,
    things: Arc<ThingManager>,
    /// Last states payload actually sent; identical payloads are not
    /// republished.
    last_iot_states: String,
    prompts: HashMap<String, Arc<[u8]>>,
}

impl AppCore {
    pub fn device_state(&self) -> DeviceState {
        self.device_state
    }

    /// Apply a state change: log, drain background work, then run the
    /// target state's side effects. Same-state calls and illegal
    /// transitions are no-ops.
    pub fn set_device_state(&mut self, state: DeviceState) {
        if self.device_state == state {
            return;
        }
        if !self.device_state.can_transition_to(state) {
            warn!(from = %self.device_state, to = %state, "ignoring illegal state transition");
            return;
        }
        self.device_state = state;
        self.shared
            .state_cell
            .store(state as u8, Ordering::Release);
        info!("STATE: {state}");

        // No stale encoder/decoder output may bleed across the change.
        self.shared.background.wait_for_completion();

        self.board
            .led
            .state_changed(state, self.shared.voice_detected.load(Ordering::Relaxed));

        match state {
            DeviceState::Unknown | DeviceState::Idle => {
                self.board.display.set_status("待命");
                self.board.display.set_emotion("neutral");
                self.processor.stop();
            }
            DeviceState::Connecting => {
                self.board.display.set_status("连接中...");
            }
            DeviceState::Listening => {
                self.board.display.set_status("聆听中...");
                self.board.display.set_emotion("neutral");
                self.reset_decoder();
                self.encoder.lock().unwrap().reset();
                self.processor.start();
                self.publish_iot_states();
            }
            DeviceState::Speaking => {
                self.board.display.set_status("说话中...");
                self.reset_decoder();
                self.processor.stop();
            }
            // Upgrading sets its own display; terminal states keep theirs.
            _ => {}
        }
    }

    pub fn alert(&mut self, title: &str, message: &str) {
        warn!(title, message, "alert");
        self.board.display.show_notification(message);
        if let Some(blob) = self.prompts.get(message).cloned() {
            self.play_local_blob(&blob);
        }
    }

    pub(crate) fn abort_speaking(&mut self, reason: AbortReason) {
        info!("abort speaking");
        self.shared.aborted.store(true, Ordering::SeqCst);
        if let Some(protocol) = &self.protocol {
            if let Err(e) = protocol.send_abort_speaking(reason) {
                error!("failed to send abort: {e}");
            }
        }
    }

    /// Parse a prompt blob and queue its payloads for decode at 16 kHz.
    pub(crate) fn play_local_blob(&mut self, data: &[u8]) {
        info!(bytes = data.len(), "playing local prompt");
        self.set_decode_sample_rate(ENCODE_SAMPLE_RATE);
        let frames = prompt::parse(data);
        let mut queues = self.shared.queues.lock().unwrap();
        queues.decode_queue.extend(frames);
    }

    // ── Audio pipelines ─────────────────────────────────────────────

    /// Capture tick: pull, resample to 16 kHz, route.
    fn input_audio(&mut self) {
        let Some(block) = self.board.codec.read_input() else {
            return;
        };
        let mut data = block.samples;

        if block.sample_rate != ENCODE_SAMPLE_RATE {
            if block.channels == 2 {
                // Mic and reference resample independently so each keeps
                // its own filter state.
                let half = data.len() / 2;
                let mut mic = Vec::with_capacity(half);
                let mut reference = Vec::with_capacity(half);
                for pair in data.chunks_exact(2) {
                    mic.push(pair[0]);
                    reference.push(pair[1]);
                }
                let mic = self.input_resampler.process(&mic);
                let reference = self.reference_resampler.process(&reference);
                data = Vec::with_capacity(mic.len() * 2);
                for (m, r) in mic.iter().zip(reference.iter()) {
                    data.push(*m);
                    data.push(*r);
                }
            } else {
                data = self.input_resampler.process(&data);
            }
        }

        if let Some(detector) = &self.wake_word {
            if detector.is_detection_running() {
                detector.feed(&data);
            }
        }
        if self.processor.is_running() {
            self.processor.feed(&data);
        } else if self.device_state == DeviceState::Listening {
            submit_encode(&self.shared, &self.encoder, data);
        }
    }

    /// Playback tick: dequeue one frame and decode it off the control path.
    fn output_audio(&mut self) {
        let codec = Arc::clone(&self.board.codec);
        let frame = {
            let mut queues = self.shared.queues.lock().unwrap();
            if queues.decode_queue.is_empty() {
                if self.device_state == DeviceState::Idle
                    && queues.last_output_time.elapsed() > self.config.max_output_silence()
                    && codec.output_enabled()
                {
                    codec.enable_output(false);
                }
                return;
            }
            if self.device_state == DeviceState::Listening {
                // Late packets from the previous turn must not leak into
                // this one.
                queues.decode_queue.clear();
                return;
            }
            queues.last_output_time = Instant::now();
            queues.decode_queue.pop_front().unwrap()
        };

        let shared = Arc::clone(&self.shared);
        let decoder = Arc::clone(&self.decoder);
        let resampler = Arc::clone(&self.output_resampler);
        self.shared.background.schedule(move || {
            if shared.aborted.load(Ordering::SeqCst) {
                return;
            }
            let pcm = match decoder.lock().unwrap().decode(&frame) {
                Ok(pcm) => pcm,
                Err(e) => {
                    warn!("decode failed, dropping frame: {e}");
                    return;
                }
            };
            let pcm = resampler.lock().unwrap().process(&pcm);
            codec.write_output(&pcm);
        });
    }

    /// Reset decode state: opus state, queue, silence clock, output power.
    fn reset_decoder(&mut self) {
        let mut queues = self.shared.queues.lock().unwrap();
        self.decoder.lock().unwrap().reset();
        queues.decode_queue.clear();
        queues.last_output_time = Instant::now();
        self.board.codec.enable_output(true);
    }

    /// Reconcile the decoder with a new stream rate; playback resamples
    /// when it differs from the codec output rate.
    fn set_decode_sample_rate(&mut self, sample_rate: u32) {
        {
            let mut decoder = self.decoder.lock().unwrap();
            if decoder.sample_rate() == sample_rate {
                return;
            }
            decoder.set_sample_rate(sample_rate);
        }
        let output_rate = self.board.codec.output_sample_rate();
        if sample_rate != output_rate {
            info!(from = sample_rate, to = output_rate, "resampling playback audio");
        }
        if let Err(e) = self
            .output_resampler
            .lock()
            .unwrap()
            .configure(sample_rate, output_rate)
        {
            error!("failed to configure output resampler: {e}");
        }
    }

    fn send_audio_frame(&mut self, frame: AudioFrame) {
        if let Some(protocol) = &self.protocol {
            if let Err(e) = protocol.send_audio(frame) {
                warn!("failed to send audio frame: {e}");
            }
        }
    }

    fn log_send(&self, result: Result<()>) {
        if let Err(e) = result {
            error!("transport send failed: {e}");
        }
    }

    // ── Wake word / VAD ─────────────────────────────────────────────

    fn handle_vad_change(&mut self, speaking: bool) {
        if self.device_state == DeviceState::Listening {
            self.shared.voice_detected.store(speaking, Ordering::Relaxed);
            self.board.led.state_changed(self.device_state, speaking);
        }
    }

    fn handle_wake_word(&mut self, word: &str) {
        match self.device_state {
            DeviceState::Idle => {
                let Some(protocol) = self.protocol.clone() else {
                    error!("protocol not initialized");
                    return;
                };
                self.set_device_state(DeviceState::Connecting);
                if !protocol.open_audio_channel() {
                    error!("failed to open audio channel");
                    self.set_device_state(DeviceState::Idle);
                    if let Some(detector) = &self.wake_word {
                        detector.start_detection();
                    }
                    return;
                }
                if let Some(detector) = &self.wake_word {
                    // Upload the utterance captured around the trigger so
                    // the service hears the whole phrase.
                    for frame in detector.drain_wake_word_frames() {
                        self.log_send(protocol.send_audio(frame));
                    }
                }
                self.log_send(protocol.send_wake_word_detected(word));
                info!(word, "wake word detected");
                self.keep_listening = true;
                self.set_device_state(DeviceState::Listening);
            }
            DeviceState::Speaking => {
                self.abort_speaking(AbortReason::WakeWordDetected);
            }
            _ => {}
        }
        if let Some(detector) = &self.wake_word {
            detector.start_detection();
        }
    }

    // ── Transport events ────────────────────────────────────────────

    fn handle_audio_channel_opened(&mut self) {
        self.board.hooks.set_power_save(false);
        let Some(protocol) = self.protocol.clone() else {
            return;
        };
        let server_rate = protocol.server_sample_rate();
        let output_rate = self.board.codec.output_sample_rate();
        if server_rate != output_rate {
            warn!(
                server_rate,
                output_rate, "server and codec rates differ; playback is resampled"
            );
        }
        self.set_decode_sample_rate(server_rate);
        self.last_iot_states.clear();
        if let Err(e) = protocol.send_iot_descriptors(&self.things.descriptors_json()) {
            warn!("failed to send thing descriptors: {e}");
        }
    }

    pub(crate) fn handle_control_message(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Tts { state, text } => match state.as_str() {
                "start" => {
                    self.shared.aborted.store(false, Ordering::SeqCst);
                    if matches!(self.device_state, DeviceState::Idle | DeviceState::Listening) {
                        self.set_device_state(DeviceState::Speaking);
                    }
                }
                "stop" => {
                    if self.device_state == DeviceState::Speaking {
                        self.shared.background.wait_for_completion();
                        if self.keep_listening {
                            if let Some(protocol) = self.protocol.clone() {
                                self.log_send(
                                    protocol.send_start_listening(ListeningMode::AutoStop),
                                );
                            }
                            self.set_device_state(DeviceState::Listening);
                        } else {
                            self.set_device_state(DeviceState::Idle);
                        }
                    }
                }
                "sentence_start" => {
                    if let Some(text) = text {
                        info!("<< {text}");
                        self.board.display.set_chat_message("assistant", &text);
                    }
                }
                _ => {}
            },
            ControlMessage::Stt { text } => {
                info!(">> {text}");
                self.board.display.set_chat_message("user", &text);
            }
            ControlMessage::Llm { emotion } => {
                if let Some(emotion) = emotion {
                    self.board.display.set_emotion(&emotion);
                }
            }
            ControlMessage::Iot { commands } => {
                for command in &commands {
                    if let Err(e) = self.things.invoke(command) {
                        warn!("iot command failed: {e}");
                    }
                }
            }
            ControlMessage::Unknown => {}
        }
    }

    // ── IoT ─────────────────────────────────────────────────────────

    /// Publish thing states unless the payload matches the last one sent.
    fn publish_iot_states(&mut self) {
        let states = self.things.states_json();
        if states == self.last_iot_states {
            return;
        }
        if let Some(protocol) = &self.protocol {
            if protocol.send_iot_states(&states).is_ok() {
                self.last_iot_states = states;
            }
        }
    }

    // ── Upgrade (scheduled by the version-check worker) ─────────────

    /// Run the firmware upgrade on the main loop. Deliberately blocks the
    /// loop: the upgrade is not cancelable, and a successful one reboots
    /// inside the updater.
    pub(crate) fn run_upgrade(&mut self, mut updater: Box<dyn FirmwareUpdater>) {
        self.set_device_state(DeviceState::Upgrading);
        self.board.display.set_icon("download");
        self.board
            .display
            .set_status(&format!("新版本 {}", updater.firmware_version()));

        // Quiesce audio before flashing.
        self.board.codec.enable_output(false);
        {
            let mut queues = self.shared.queues.lock().unwrap();
            queues.decode_queue.clear();
        }
        self.shared.background.wait_for_completion();
        thread::sleep(self.config.upgrade_settle());

        let display = Arc::clone(&self.board.display);
        let result = updater.start_upgrade(Box::new(move |progress, speed| {
            display.set_status(&format!("{progress}% {}KB/s", speed / 1024));
        }));

        // Reaching here means the upgrade did not take.
        if let Err(e) = result {
            error!("firmware upgrade failed: {e}");
        }
        self.board.display.set_status("更新失败");
        thread::sleep(self.config.upgrade_fail_delay());
        self.board.hooks.reboot();
    }
}

// ── Transport callback wiring ───────────────────────────────────────

fn build_protocol_callbacks(
    shared: &Arc<Shared>,
    board: &Board,
    config: &CoreConfig,
) -> ProtocolCallbacks {
    let on_network_error = {
        let shared = Arc::clone(shared);
        Box::new(move |message: String| {
            schedule_task(&shared, move |core| core.alert("Error", &message));
        }) as Box<dyn Fn(String) + Send + Sync>
    };

    let on_incoming_audio = {
        let shared = Arc::clone(shared);
        let warn_len = config.decode_queue_warn_len;
        Box::new(move |frame: AudioFrame| {
            // Frames outside a speaking turn are dropped.
            if shared.device_state() != DeviceState::Speaking {
                return;
            }
            let mut queues = shared.queues.lock().unwrap();
            queues.decode_queue.push_back(frame);
            if queues.decode_queue.len() > warn_len {
                warn!(len = queues.decode_queue.len(), "decode queue backlog");
            }
        }) as Box<dyn Fn(AudioFrame) + Send + Sync>
    };

    let on_audio_channel_opened = {
        let shared = Arc::clone(shared);
        Box::new(move || {
            schedule_task(&shared, |core| core.handle_audio_channel_opened());
        }) as Box<dyn Fn() + Send + Sync>
    };

    let on_audio_channel_closed = {
        let shared = Arc::clone(shared);
        let hooks = Arc::clone(&board.hooks);
        Box::new(move || {
            hooks.set_power_save(true);
            schedule_task(&shared, |core| {
                core.board.display.set_chat_message("", "");
                core.set_device_state(DeviceState::Idle);
            });
        }) as Box<dyn Fn() + Send + Sync>
    };

    let on_incoming_json = {
        let shared = Arc::clone(shared);
        Box::new(move |value: serde_json::Value| {
            let message = ControlMessage::from_value(value);
            schedule_task(&shared, move |core| core.handle_control_message(message));
        }) as Box<dyn Fn(serde_json::Value) + Send + Sync>
    };

    ProtocolCallbacks {
        on_network_error,
        on_incoming_audio,
        on_audio_channel_opened,
        on_audio_channel_closed,
        on_incoming_json,
    }
}
