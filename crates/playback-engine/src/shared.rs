//! State shared by the caller thread, the decoder thread and the output callback.
//!
//! Control state (player state, stop flag, pending seek) lives under one mutex
//! with its own condvar. The player state is mirrored into an atomic that is only
//! written while the control lock is held, so `state()` never blocks.

use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use playback_types::PlaybackState;

use crate::queue::{FrameQueue, Wake};

/// Lock a mutex, recovering the guard if another thread panicked while holding it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Control {
    state: PlaybackState,
    stop: bool,
    seek: Option<f64>,
}

pub(crate) struct Shared {
    control: Mutex<Control>,
    control_cv: Condvar,
    state: AtomicU8,
    pub(crate) queue: FrameQueue,
    frames_played: AtomicU64,
    output_rate: AtomicU32,
    duration_bits: AtomicU64,
    underrun_frames: AtomicU64,
    underrun_events: AtomicU64,
}

fn encode_state(state: PlaybackState) -> u8 {
    match state {
        PlaybackState::Stopped => 0,
        PlaybackState::Playing => 1,
        PlaybackState::Paused => 2,
    }
}

fn decode_state(v: u8) -> PlaybackState {
    match v {
        1 => PlaybackState::Playing,
        2 => PlaybackState::Paused,
        _ => PlaybackState::Stopped,
    }
}

impl Shared {
    pub(crate) fn new(queue_capacity: usize) -> Self {
        Self {
            control: Mutex::new(Control {
                state: PlaybackState::Stopped,
                stop: false,
                seek: None,
            }),
            control_cv: Condvar::new(),
            state: AtomicU8::new(encode_state(PlaybackState::Stopped)),
            queue: FrameQueue::new(queue_capacity),
            frames_played: AtomicU64::new(0),
            output_rate: AtomicU32::new(0),
            duration_bits: AtomicU64::new(0f64.to_bits()),
            underrun_frames: AtomicU64::new(0),
            underrun_events: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> PlaybackState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    fn store_state(&self, c: &mut Control, state: PlaybackState) {
        c.state = state;
        self.state.store(encode_state(state), Ordering::Release);
    }

    pub(crate) fn set_state(&self, state: PlaybackState) {
        let mut c = lock(&self.control);
        self.store_state(&mut c, state);
        drop(c);
        self.control_cv.notify_all();
    }

    /// Move `from` to `to` atomically. Returns whether the transition happened.
    pub(crate) fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        let mut c = lock(&self.control);
        if c.state != from {
            return false;
        }
        self.store_state(&mut c, to);
        drop(c);
        self.control_cv.notify_all();
        true
    }

    /// Reset everything for a new session. State stays Stopped until the device runs.
    pub(crate) fn begin_session(&self, output_rate: u32, duration_secs: f64) {
        let mut c = lock(&self.control);
        self.store_state(&mut c, PlaybackState::Stopped);
        c.stop = false;
        c.seek = None;
        drop(c);

        self.queue.reset();
        self.frames_played.store(0, Ordering::Relaxed);
        self.output_rate.store(output_rate, Ordering::Relaxed);
        self.duration_bits
            .store(duration_secs.max(0.0).to_bits(), Ordering::Relaxed);
        self.underrun_frames.store(0, Ordering::Relaxed);
        self.underrun_events.store(0, Ordering::Relaxed);
    }

    /// Enter Stopped, raise the stop flag and wake every waiter on both condvars.
    pub(crate) fn request_stop(&self) {
        let mut c = lock(&self.control);
        self.store_state(&mut c, PlaybackState::Stopped);
        c.stop = true;
        c.seek = None;
        drop(c);
        self.control_cv.notify_all();
        self.queue.close();
    }

    /// Forget the finished session: empty queue, zero position and duration.
    pub(crate) fn clear_session(&self) {
        self.queue.clear();
        self.frames_played.store(0, Ordering::Relaxed);
        self.duration_bits.store(0f64.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn is_stopping(&self) -> bool {
        lock(&self.control).stop
    }

    /// Record a seek target (last one wins). Ignored while Stopped.
    pub(crate) fn request_seek(&self, secs: f64) -> bool {
        let mut c = lock(&self.control);
        if c.state == PlaybackState::Stopped || c.stop {
            return false;
        }
        c.seek = Some(secs);
        // Raised under the control lock: the queue is only interrupted while a
        // seek is pending or being applied.
        self.queue.interrupt();
        drop(c);
        self.control_cv.notify_all();
        true
    }

    pub(crate) fn take_seek(&self) -> Option<f64> {
        lock(&self.control).seek.take()
    }

    /// Release the queue after the decoder handled a taken seek. `applied`
    /// discards the buffered chunks; a failed seek keeps them. A request that
    /// arrived in the meantime stays pending with the queue interrupted.
    pub(crate) fn complete_seek(&self, applied: bool) {
        let c = lock(&self.control);
        if applied {
            self.queue.clear_for_seek();
        } else {
            self.queue.clear_interrupt();
        }
        if c.seek.is_some() {
            self.queue.interrupt();
        }
    }

    /// Block while Paused, unless a stop or a seek arrives.
    pub(crate) fn wait_while_paused(&self) -> Wake {
        let mut c = lock(&self.control);
        loop {
            if c.stop {
                return Wake::Closed;
            }
            if c.seek.is_some() {
                return Wake::Interrupted;
            }
            if c.state != PlaybackState::Paused {
                return Wake::Ready;
            }
            c = self
                .control_cv
                .wait(c)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn output_rate(&self) -> u32 {
        self.output_rate.load(Ordering::Relaxed)
    }

    pub(crate) fn duration_secs(&self) -> f64 {
        f64::from_bits(self.duration_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    pub(crate) fn add_played(&self, frames: u64) {
        self.frames_played.fetch_add(frames, Ordering::Relaxed);
    }

    /// Restart the frame counter at `secs` (after a seek).
    pub(crate) fn set_position_secs(&self, secs: f64) {
        let frames = (secs.max(0.0) * self.output_rate() as f64).round() as u64;
        self.frames_played.store(frames, Ordering::Relaxed);
    }

    pub(crate) fn position_secs(&self) -> f64 {
        let rate = self.output_rate();
        if rate == 0 {
            return 0.0;
        }
        self.frames_played() as f64 / rate as f64
    }

    pub(crate) fn record_underrun(&self, frames: u64) {
        self.underrun_events.fetch_add(1, Ordering::Relaxed);
        self.underrun_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn underruns(&self) -> (u64, u64) {
        (
            self.underrun_frames.load(Ordering::Relaxed),
            self.underrun_events.load(Ordering::Relaxed),
        )
    }
}
