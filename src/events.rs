//! Event-bit set for the main loop.
//!
//! Producers (codec ready callbacks, the scheduler, shutdown) latch bits
//! into an atomic word; the main loop blocks until at least one bit is set
//! and takes the whole set atomically. `set` never touches any core lock,
//! so it is safe from interrupt-like callback contexts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

/// One or more closures are queued for the main loop.
pub const SCHEDULE_EVENT: u32 = 1 << 0;
/// The codec has input frames to read.
pub const AUDIO_INPUT_READY_EVENT: u32 = 1 << 1;
/// The codec can accept more output.
pub const AUDIO_OUTPUT_READY_EVENT: u32 = 1 << 2;
/// The main loop should exit.
pub const STOP_EVENT: u32 = 1 << 3;

#[derive(Debug, Default)]
pub struct EventFlags {
    bits: AtomicU32,
    // Dedicated notification lock; never the core mutex.
    lock: Mutex<()>,
    cond: Condvar,
}

impl EventFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `bits` and wake the waiter.
    pub fn set(&self, bits: u32) {
        self.bits.fetch_or(bits, Ordering::SeqCst);
        let _guard = self.lock.lock().unwrap();
        self.cond.notify_all();
    }

    /// Block until at least one bit is set, then read-and-clear the set.
    pub fn wait(&self) -> u32 {
        let mut guard = self.lock.lock().unwrap();
        loop {
            let bits = self.bits.swap(0, Ordering::SeqCst);
            if bits != 0 {
                return bits;
            }
            guard = self.cond.wait(guard).unwrap();
        }
    }
}
