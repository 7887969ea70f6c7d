//! Bounded chunk queue between the decoder thread and the output callback.
//!
//! The decoder thread pushes one [`AudioChunk`] per converted packet; the output
//! callback drains chunks into the device buffer, consuming them incrementally.
//!
//! Every wait predicate observes the `closed` (stop) and `interrupted` (seek
//! pending) flags under the queue lock, so a command can never be missed between
//! checking and sleeping. All state changes wake every waiter.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Interleaved stereo `f32` samples ready for the device, plus a read cursor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AudioChunk {
    samples: Vec<f32>,
    consumed: usize,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            consumed: 0,
        }
    }

    /// Samples not yet handed to the device.
    pub fn remaining(&self) -> &[f32] {
        &self.samples[self.consumed..]
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn advance(&mut self, n: usize) {
        self.consumed = (self.consumed + n).min(self.samples.len());
    }
}

/// Why a blocking queue call returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wake {
    /// The awaited condition holds.
    Ready,
    /// The queue was closed by `stop`.
    Closed,
    /// A seek is pending; the caller should service it.
    Interrupted,
}

struct QueueInner {
    chunks: VecDeque<AudioChunk>,
    closed: bool,
    interrupted: bool,
    end_of_stream: bool,
}

/// Bounded FIFO of [`AudioChunk`]s guarded by one mutex and one condvar.
pub struct FrameQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

impl FrameQueue {
    /// Create a queue holding at most `capacity` chunks (floored at one).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
                interrupted: false,
                end_of_stream: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, g: MutexGuard<'a, QueueInner>) -> MutexGuard<'a, QueueInner> {
        self.cv.wait(g).unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Chunks currently buffered (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().chunks.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.lock().end_of_stream
    }

    /// Whether a pending seek holds every waiter off.
    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }

    /// Block while the queue is full, unless closed or interrupted.
    pub fn wait_for_room(&self) -> Wake {
        let mut g = self.lock();
        loop {
            if g.closed {
                return Wake::Closed;
            }
            if g.interrupted {
                return Wake::Interrupted;
            }
            if g.chunks.len() < self.capacity {
                return Wake::Ready;
            }
            g = self.wait(g);
        }
    }

    /// Append a chunk, blocking while full. The chunk is dropped when the wait
    /// ends because of a stop or a pending seek.
    pub fn push(&self, chunk: AudioChunk) -> Wake {
        if chunk.is_empty() {
            return Wake::Ready;
        }
        let mut g = self.lock();
        loop {
            if g.closed {
                return Wake::Closed;
            }
            if g.interrupted {
                return Wake::Interrupted;
            }
            if g.chunks.len() < self.capacity {
                break;
            }
            g = self.wait(g);
        }
        g.chunks.push_back(chunk);
        debug_assert!(g.chunks.len() <= self.capacity);
        drop(g);
        self.cv.notify_all();
        Wake::Ready
    }

    /// Copy queued samples into `out`, waiting at most `timeout` in total for
    /// chunks to appear. Returns the number of samples written; the caller pads
    /// the remainder with silence.
    ///
    /// Never waits when the queue is closed, interrupted, or at end of stream.
    pub fn drain_into(&self, out: &mut [f32], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut written = 0usize;
        let mut popped = false;
        let mut g = self.lock();

        while written < out.len() {
            if g.closed || g.interrupted {
                break;
            }
            if let Some(front) = g.chunks.front_mut() {
                let src = front.remaining();
                let n = src.len().min(out.len() - written);
                out[written..written + n].copy_from_slice(&src[..n]);
                front.advance(n);
                written += n;
                if front.is_exhausted() {
                    g.chunks.pop_front();
                    popped = true;
                }
                continue;
            }
            if g.end_of_stream {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }

        drop(g);
        if popped {
            self.cv.notify_all();
        }
        written
    }

    /// Flag that no more chunks will be pushed for the current position.
    pub fn mark_end_of_stream(&self) {
        let mut g = self.lock();
        g.end_of_stream = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Block until every chunk was consumed, unless closed or interrupted.
    pub fn wait_drained(&self) -> Wake {
        let mut g = self.lock();
        loop {
            if g.closed {
                return Wake::Closed;
            }
            if g.interrupted {
                return Wake::Interrupted;
            }
            if g.chunks.is_empty() {
                return Wake::Ready;
            }
            g = self.wait(g);
        }
    }

    /// Signal a pending seek to every waiter.
    pub fn interrupt(&self) {
        let mut g = self.lock();
        g.interrupted = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Drop the interrupt flag without touching buffered chunks (failed seek).
    pub fn clear_interrupt(&self) {
        let mut g = self.lock();
        g.interrupted = false;
        drop(g);
        self.cv.notify_all();
    }

    /// Discard buffered chunks after a successful seek and resume normal flow.
    pub fn clear_for_seek(&self) {
        let mut g = self.lock();
        g.chunks.clear();
        g.interrupted = false;
        g.end_of_stream = false;
        drop(g);
        self.cv.notify_all();
    }

    /// Stop accepting chunks and wake all waiters. Idempotent.
    pub fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Discard buffered chunks, keeping flags as they are.
    pub fn clear(&self) {
        let mut g = self.lock();
        g.chunks.clear();
        drop(g);
        self.cv.notify_all();
    }

    /// Empty queue with every flag cleared, ready for a new session.
    pub fn reset(&self) {
        let mut g = self.lock();
        g.chunks.clear();
        g.closed = false;
        g.interrupted = false;
        g.end_of_stream = false;
        drop(g);
        self.cv.notify_all();
    }
}
