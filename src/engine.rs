//! The producer task, shared ring buffer, and the public `Neug` handle.
//!
//! The source keeps all of this in file-scope globals (`the_ring_buffer`,
//! `neug_mode`, the error counters) guarded by a hand-rolled mutex/event
//! pair. Here the ring buffer and its two auto-reset events become a
//! `Mutex<RingBuffer>` paired with two `Condvar`s, and the cross-task
//! observables become `Arc`-shared atomics; everything else is owned
//! outright by the producer thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use num_traits::{FromPrimitive, ToPrimitive};

use crate::adc::Adc;
use crate::device_id::DeviceId;
use crate::error::NeugError;
use crate::health::ErrorFlags;
use crate::mode::Mode;
use crate::pipeline::EntropyPipeline;
use crate::ring_buffer::RingBuffer;

/// Construction-time configuration for a [`Neug`] engine.
pub struct NeugConfig {
    pub ring_size: u8,
    pub initial_mode: Mode,
    pub adc: Box<dyn Adc>,
    pub device_id: Box<dyn DeviceId>,
}

struct RingState {
    rb: RingBuffer,
}

/// Counters shared between the producer and consumers; read with relaxed
/// ordering since they are diagnostics, not synchronization points.
#[derive(Default)]
struct Counters {
    err_state: AtomicU32,
    err_cnt: AtomicU32,
    err_cnt_rc: AtomicU32,
    err_cnt_p64: AtomicU32,
    err_cnt_p4k: AtomicU32,
    rc_max: AtomicU32,
    p64_max: AtomicU32,
    p4k_max: AtomicU32,
}

struct Shared {
    ring: Mutex<RingState>,
    space_available: Condvar,
    data_available: Condvar,

    mode_mtx: Mutex<Mode>,
    mode_condition: Condvar,
    mode_generation: AtomicU8,

    terminate: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn publish_mode_change(&self) {
        self.mode_generation.fetch_add(1, Ordering::SeqCst);
        self.mode_condition.notify_all();
    }
}

/// The entropy engine: owns the producer thread and exposes the consumer
/// API described by the external interface.
pub struct Neug {
    shared: Arc<Shared>,
    producer: Option<JoinHandle<()>>,
}

impl Neug {
    /// Installs the ring buffer, seeds the whitener from the device ID,
    /// and starts the producer thread. Must precede all other calls —
    /// enforced here by construction rather than a separate init step.
    pub fn new(config: NeugConfig) -> Result<Self, NeugError> {
        if config.ring_size == 0 {
            return Err(NeugError::InvalidRingSize);
        }

        let shared = Arc::new(Shared {
            ring: Mutex::new(RingState { rb: RingBuffer::new(config.ring_size as usize) }),
            space_available: Condvar::new(),
            data_available: Condvar::new(),
            mode_mtx: Mutex::new(config.initial_mode),
            mode_condition: Condvar::new(),
            mode_generation: AtomicU8::new(0),
            terminate: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let producer_shared = shared.clone();
        let mut adc = config.adc;
        let device_id = config.device_id;
        let initial_mode = config.initial_mode;

        let producer = std::thread::spawn(move || {
            adc.init().expect("ADC failed to initialize");
            adc.start();

            let mut pipeline = EntropyPipeline::new();
            pipeline.seed(&device_id.id_bytes());

            let mut mode = initial_mode;
            pipeline.init(mode, adc.as_mut());
            producer_loop(&producer_shared, &mut pipeline, adc.as_mut(), &mut mode);
        });

        Ok(Neug { shared, producer: Some(producer) })
    }

    /// Blocks until a word is available; returns it. If `kick`, signals
    /// `SPACE_AVAILABLE` after dequeue so the producer immediately tries
    /// to refill the freed slot.
    pub fn get(&self, kick: bool) -> u32 {
        let mut state = self.shared.ring.lock().unwrap();
        while state.rb.is_empty() {
            state = self.shared.data_available.wait(state).unwrap();
        }
        let v = state.rb.del();
        drop(state);
        if kick {
            self.shared.space_available.notify_all();
        }
        v
    }

    /// Returns `None` and signals `SPACE_AVAILABLE` if empty; else
    /// returns the dequeued word.
    pub fn get_nonblock(&self) -> Option<u32> {
        let mut state = self.shared.ring.lock().unwrap();
        if state.rb.is_empty() {
            drop(state);
            self.shared.space_available.notify_all();
            None
        } else {
            let v = state.rb.del();
            Some(v)
        }
    }

    /// Signals `SPACE_AVAILABLE` if the buffer is not full.
    pub fn kick_filling(&self) {
        let state = self.shared.ring.lock().unwrap();
        if !state.rb.is_full() {
            drop(state);
            self.shared.space_available.notify_all();
        }
    }

    /// Blocks until the ring buffer is full.
    pub fn wait_full(&self) {
        let mut state = self.shared.ring.lock().unwrap();
        while !state.rb.is_full() {
            state = self.shared.data_available.wait(state).unwrap();
        }
    }

    /// Drains the buffer and signals `SPACE_AVAILABLE`.
    pub fn flush(&self) {
        let mut state = self.shared.ring.lock().unwrap();
        state.rb.flush();
        drop(state);
        self.shared.space_available.notify_all();
    }

    /// Performs the mode-select handshake: waits for any in-flight output
    /// to commit, publishes the new mode, waits for the producer to
    /// acknowledge by re-initializing its pipeline, then flushes again so
    /// the caller never observes a word produced under the old mode.
    pub fn mode_select(&self, new: Mode) {
        {
            let current = self.shared.mode_mtx.lock().unwrap();
            if *current == new {
                return;
            }
        }

        self.wait_full();

        let generation_before = self.shared.mode_generation.load(Ordering::SeqCst);
        {
            let mut current = self.shared.mode_mtx.lock().unwrap();
            *current = new;
            drop(current);
            self.flush();
        }

        let guard = self.shared.mode_mtx.lock().unwrap();
        let _unused = self
            .shared
            .mode_condition
            .wait_while(guard, |_| self.shared.mode_generation.load(Ordering::SeqCst) == generation_before)
            .unwrap();

        self.wait_full();
        self.flush();
    }

    /// Drains the buffer, invoking `f(word, index)` for each word.
    /// Returns the number of words delivered.
    pub fn consume_random(&self, mut f: impl FnMut(u32, usize)) -> usize {
        let mut state = self.shared.ring.lock().unwrap();
        let mut i = 0;
        while !state.rb.is_empty() {
            let v = state.rb.del();
            f(v, i);
            i += 1;
        }
        drop(state);
        self.shared.space_available.notify_all();
        i
    }

    pub fn mode(&self) -> Mode { *self.shared.mode_mtx.lock().unwrap() }

    pub fn err_state(&self) -> ErrorFlags {
        ErrorFlags::from_bits_truncate(self.shared.counters.err_state.load(Ordering::Relaxed))
    }

    pub fn err_cnt(&self) -> u32 { self.shared.counters.err_cnt.load(Ordering::Relaxed) }

    pub fn err_cnt_rc(&self) -> u32 { self.shared.counters.err_cnt_rc.load(Ordering::Relaxed) }

    pub fn err_cnt_p64(&self) -> u32 { self.shared.counters.err_cnt_p64.load(Ordering::Relaxed) }

    pub fn err_cnt_p4k(&self) -> u32 { self.shared.counters.err_cnt_p4k.load(Ordering::Relaxed) }

    pub fn rc_max(&self) -> u32 { self.shared.counters.rc_max.load(Ordering::Relaxed) }

    pub fn p64_max(&self) -> u32 { self.shared.counters.p64_max.load(Ordering::Relaxed) }

    pub fn p4k_max(&self) -> u32 { self.shared.counters.p4k_max.load(Ordering::Relaxed) }

    /// Mirrors the source's `random.h` convenience layer: fills `out`
    /// word-at-a-time from [`get`](Self::get).
    pub fn next_bytes(&self, out: &mut [u8]) {
        let mut filled = 0;
        while filled < out.len() {
            let w = self.get(true).to_le_bytes();
            let n = (out.len() - filled).min(4);
            out[filled..filled + n].copy_from_slice(&w[..n]);
            filled += n;
        }
    }

    /// Draws a fresh 8-byte salt (two words), mirroring the source's
    /// `random_get_salt`.
    pub fn next_salt(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        self.next_bytes(&mut out);
        out
    }

    /// Requests termination and unblocks the producer; joins its thread.
    pub fn fini(&mut self) {
        self.shared.terminate.store(true, Ordering::SeqCst);
        // Mirrors `neug_fini`'s single `neug_get(1)`: wake a producer
        // that may be parked on SPACE_AVAILABLE.
        self.shared.space_available.notify_all();
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Neug {
    fn drop(&mut self) {
        if self.producer.is_some() {
            self.fini();
        }
    }
}

fn producer_loop(shared: &Shared, pipeline: &mut EntropyPipeline, adc: &mut dyn Adc, mode: &mut Mode) {
    loop {
        if shared.terminate.load(Ordering::SeqCst) {
            adc.stop();
            return;
        }

        let published_mode = *shared.mode_mtx.lock().unwrap();
        let adc_err = adc.wait_completion().is_err();

        if adc_err || published_mode != *mode {
            *mode = published_mode;
            reset_cnt_max(&shared.counters);
            pipeline.init(*mode, adc);
            shared.publish_mode_change();
            log::debug!("neug: producer re-initialized for mode {:?}", mode);
            continue;
        }

        let n = pipeline.process(*mode, adc);
        if n == 0 {
            continue;
        }

        sync_counters(&shared.counters, &pipeline.health);

        let tainted = !pipeline.health.err_state.is_empty()
            && matches!(*mode, Mode::Conditioned | Mode::Raw);
        if tainted {
            log::debug!("neug: discarding tainted round, err_state={:?}", pipeline.health.err_state);
            pipeline.health.clear_err_state();
            shared.counters.err_state.store(0, Ordering::Relaxed);
            continue;
        }

        let words = pipeline.output_words(*mode, n);
        publish_words(shared, &words);
    }
}

/// Publishes up to `words.len()` words produced by one pipeline round.
///
/// Waits once, before the first insertion, if the buffer is already full.
/// If it fills again partway through this round's words, the remainder is
/// dropped rather than awaited — the next round regenerates fresh entropy
/// instead of queuing stale words, matching the discard-on-full behavior
/// of the reference producer loop.
fn publish_words(shared: &Shared, words: &[u32]) {
    let mut state = shared.ring.lock().unwrap();
    while state.rb.is_full() {
        state = shared.space_available.wait(state).unwrap();
    }
    for &w in words {
        state.rb.add(w);
        if state.rb.is_full() {
            break;
        }
    }
    drop(state);
    shared.data_available.notify_all();
}

fn reset_cnt_max(counters: &Counters) {
    counters.err_cnt.store(0, Ordering::Relaxed);
    counters.err_cnt_rc.store(0, Ordering::Relaxed);
    counters.err_cnt_p64.store(0, Ordering::Relaxed);
    counters.err_cnt_p4k.store(0, Ordering::Relaxed);
    counters.rc_max.store(0, Ordering::Relaxed);
    counters.p64_max.store(0, Ordering::Relaxed);
    counters.p4k_max.store(0, Ordering::Relaxed);
}

fn sync_counters(counters: &Counters, health: &crate::health::HealthTests) {
    counters.err_state.store(health.err_state.bits(), Ordering::Relaxed);
    counters.err_cnt.store(health.err_cnt, Ordering::Relaxed);
    counters.err_cnt_rc.store(health.err_cnt_rc, Ordering::Relaxed);
    counters.err_cnt_p64.store(health.err_cnt_p64, Ordering::Relaxed);
    counters.err_cnt_p4k.store(health.err_cnt_p4k, Ordering::Relaxed);
    counters.rc_max.store(health.rc_max(), Ordering::Relaxed);
    counters.p64_max.store(health.p64_max(), Ordering::Relaxed);
    counters.p4k_max.store(health.p4k_max(), Ordering::Relaxed);
}

// Mode is small enough to round-trip through num-traits for parity with
// the rest of the pack's enum/opcode conventions, even though nothing
// here currently needs the numeric form outside of tests.
#[allow(dead_code)]
fn mode_to_u8(m: Mode) -> u8 { m.to_u8().unwrap() }
#[allow(dead_code)]
fn mode_from_u8(v: u8) -> Option<Mode> { Mode::from_u8(v) }

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adc::ScriptedAdc;
    use crate::device_id::FixedDeviceId;

    fn engine(ring_size: u8, mode: Mode) -> Neug {
        let config = NeugConfig {
            ring_size,
            initial_mode: mode,
            adc: Box::new(ScriptedAdc::zeros()),
            device_id: Box::new(FixedDeviceId([0; 20])),
        };
        Neug::new(config).unwrap()
    }

    #[test]
    fn backpressure_liveness() {
        // S5: size = 4, consumer idle. Producer fills to capacity and
        // blocks; one get() frees exactly one slot.
        let neug = engine(4, Mode::RawData);
        neug.wait_full();
        assert_eq!(neug.shared.ring.lock().unwrap().rb.capacity(), 4);
        let _ = neug.get(true);
        // give the producer a moment to refill the freed slot
        std::thread::sleep(Duration::from_millis(50));
        neug.wait_full();
    }

    #[test]
    fn mode_roundtrip_leaves_buffer_empty_and_mode_updated() {
        // S6: start CONDITIONED-equivalent (here RAW_DATA for a fast,
        // deterministic fill), switch to RAW, verify buffer empty and
        // mode updated on return.
        let neug = engine(4, Mode::RawData);
        neug.wait_full();
        neug.mode_select(Mode::Raw);
        assert_eq!(neug.mode(), Mode::Raw);
        let state = neug.shared.ring.lock().unwrap();
        assert!(state.rb.is_empty());
    }

    #[test]
    fn nonblocking_get_on_empty_buffer_returns_none() {
        let neug = engine(1, Mode::RawData);
        // drain whatever the producer has already queued
        while neug.get_nonblock().is_some() {}
        // immediately after a drain the buffer may be briefly empty;
        // get_nonblock must never panic or block.
        let _ = neug.get_nonblock();
    }

    #[test]
    fn consume_random_drains_and_indexes_from_zero() {
        let neug = engine(4, Mode::RawData);
        neug.wait_full();
        let mut seen = Vec::new();
        let count = neug.consume_random(|w, i| seen.push((w, i)));
        assert_eq!(count, seen.len());
        for (i, (_, idx)) in seen.iter().enumerate() {
            assert_eq!(*idx, i);
        }
    }
}
