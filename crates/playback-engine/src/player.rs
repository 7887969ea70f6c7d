//! Playback controller: the public state machine and command surface.
//!
//! ## Locking
//! - `commands` serializes `play`/`stop`/`pause`/`resume`.
//! - `session` guards the current session. `play` holds it for the whole start
//!   sequence; the decoder thread takes it to tear down after a natural end.
//!   `stop` never holds it while joining the decoder thread.
//! - Lock order: `commands` → `session` → (`reaper`, `end_reason`).
//!
//! The finished callback runs on the decoder thread after every lock is released.
//! That thread's handle is parked in `reaper` and joined by the next
//! `play`/`stop`/drop, unless that call is made from the callback itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use playback_types::{PlaybackEndReason, PlaybackState, PlaybackStatus, Track};

use crate::config::PlaybackConfig;
use crate::consumer;
use crate::decode::{MediaBackend, SymphoniaBackend};
use crate::output::{CpalOutput, OutputDevice, OutputRequest, OutputStream};
use crate::producer::{Exit, Producer};
use crate::resample::{Resampler, StereoResampler};
use crate::shared::{Shared, lock};
use crate::status::{self, SessionFacts};

type FinishedCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Single-track audio player.
///
/// Commands never fail: problems are logged and leave the player Stopped.
pub struct Player {
    inner: Arc<PlayerInner>,
}

struct PlayerInner {
    config: PlaybackConfig,
    backend: Box<dyn MediaBackend>,
    output: Box<dyn OutputDevice>,
    shared: Arc<Shared>,
    commands: Mutex<()>,
    session: Mutex<Option<Session>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    on_finished: Mutex<Option<FinishedCallback>>,
    end_reason: Mutex<Option<PlaybackEndReason>>,
    next_session_id: AtomicU64,
}

struct Session {
    id: u64,
    output: Box<dyn OutputStream>,
    decoder: Option<JoinHandle<()>>,
    facts: SessionFacts,
}

impl Player {
    /// Player with explicit backend and output device.
    pub fn new(
        config: PlaybackConfig,
        backend: Box<dyn MediaBackend>,
        output: Box<dyn OutputDevice>,
    ) -> Self {
        let shared = Arc::new(Shared::new(config.effective_queue_capacity()));
        Self {
            inner: Arc::new(PlayerInner {
                config,
                backend,
                output,
                shared,
                commands: Mutex::new(()),
                session: Mutex::new(None),
                reaper: Mutex::new(None),
                on_finished: Mutex::new(None),
                end_reason: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    /// Player decoding with Symphonia and playing through the default CPAL host.
    pub fn with_defaults(config: PlaybackConfig) -> Self {
        Self::new(config, Box::new(SymphoniaBackend), Box::new(CpalOutput))
    }

    /// Stop whatever is playing and start `track` from the beginning.
    ///
    /// On any failure the error is logged and the player stays Stopped.
    pub fn play(&self, track: &Track) {
        let reaper = {
            let _cmd = lock(&self.inner.commands);
            let reaper = self.inner.teardown(PlaybackEndReason::Stopped);

            let mut slot = lock(&self.inner.session);
            match self.inner.start_session(track) {
                Ok(session) => {
                    *slot = Some(session);
                }
                Err(e) => {
                    drop(slot);
                    tracing::error!(
                        path = %track.file_path.display(),
                        "failed to start playback: {e:#}"
                    );
                    self.inner.shared.request_stop();
                    self.inner.shared.clear_session();
                    *lock(&self.inner.end_reason) = Some(PlaybackEndReason::Error);
                }
            }
            reaper
        };
        join_reaper(reaper);
    }

    /// Stop playback and release every session resource. No-op when Stopped.
    pub fn stop(&self) {
        let reaper = {
            let _cmd = lock(&self.inner.commands);
            self.inner.teardown(PlaybackEndReason::Stopped)
        };
        join_reaper(reaper);
    }

    /// Playing → Paused. The queue keeps its contents.
    pub fn pause(&self) {
        let _cmd = lock(&self.inner.commands);
        let mut slot = lock(&self.inner.session);
        let Some(session) = slot.as_mut() else {
            return;
        };
        if !self
            .inner
            .shared
            .transition(PlaybackState::Playing, PlaybackState::Paused)
        {
            return;
        }
        if let Err(e) = session.output.stop() {
            tracing::warn!("failed to pause output: {e:#}");
        }
        tracing::info!(position_secs = self.position(), "paused");
    }

    /// Paused → Playing. A device that cannot restart stops playback.
    pub fn resume(&self) {
        let reaper = {
            let _cmd = lock(&self.inner.commands);
            let mut slot = lock(&self.inner.session);
            let Some(session) = slot.as_mut() else {
                return;
            };
            if self.inner.shared.state() != PlaybackState::Paused {
                return;
            }
            match session.output.start() {
                Ok(()) => {
                    self.inner.shared.set_state(PlaybackState::Playing);
                    tracing::info!(position_secs = self.position(), "resumed");
                    return;
                }
                Err(e) => {
                    tracing::error!("failed to restart output, stopping: {e:#}");
                    drop(slot);
                    self.inner.teardown(PlaybackEndReason::Error)
                }
            }
        };
        join_reaper(reaper);
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.shared.state()
    }

    /// Duration of the loaded track in seconds; 0 when nothing is loaded.
    pub fn duration(&self) -> f64 {
        self.inner.shared.duration_secs()
    }

    /// Seconds of audio handed to the device since the start or the last seek.
    pub fn position(&self) -> f64 {
        self.inner.shared.position_secs()
    }

    pub fn position_percent(&self) -> i32 {
        status::position_percent(self.position(), self.duration())
    }

    /// Request a jump to `secs`, clamped to the track. Applied asynchronously by
    /// the decoder thread; a later request replaces a pending one.
    ///
    /// Returns the clamped target, or `None` while Stopped.
    pub fn seek(&self, secs: f64) -> Option<f64> {
        if self.state() == PlaybackState::Stopped {
            return None;
        }
        let duration = self.duration().max(0.0);
        let target = if secs.is_nan() {
            0.0
        } else {
            secs.clamp(0.0, duration)
        };
        if !self.inner.shared.request_seek(target) {
            return None;
        }
        tracing::debug!(requested = secs, target, "seek requested");
        Some(target)
    }

    /// Seek to a percentage of the duration, clamped to `0..=100`.
    ///
    /// Returns the clamped percentage, or `None` while Stopped.
    pub fn seek_percent(&self, percent: i32) -> Option<i32> {
        if self.state() == PlaybackState::Stopped {
            return None;
        }
        let clamped = percent.clamp(0, 100);
        if clamped != percent {
            tracing::warn!(requested = percent, clamped, "seek percent out of range");
        }
        let target = self.duration() * clamped as f64 / 100.0;
        self.seek(target).map(|_| clamped)
    }

    /// Register the callback fired once per natural end of a track, after the
    /// last sample was played. Runs on a background thread and must not block.
    pub fn on_playback_finished<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.inner.on_finished) = Some(Arc::new(callback));
    }

    pub fn status(&self) -> PlaybackStatus {
        let end_reason = *lock(&self.inner.end_reason);
        let slot = lock(&self.inner.session);
        status::snapshot(
            &self.inner.shared,
            slot.as_ref().map(|s| &s.facts),
            end_reason,
        )
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PlayerInner {
    /// Acquire backend, device and resampler, then start the device and the
    /// decoder thread. Anything acquired is released on error by scope.
    ///
    /// Caller holds `commands` and `session`.
    fn start_session(self: &Arc<Self>, track: &Track) -> Result<Session> {
        let stream = self
            .backend
            .open(&track.file_path)
            .with_context(|| format!("open {}", track.file_path.display()))?;
        let info = stream.info().clone();

        let duration = session_duration(info.duration_secs, track.known_duration_secs);

        let request = OutputRequest {
            sample_rate: info.sample_rate,
            device: self.config.device.clone(),
        };
        let render = consumer::render_fn(self.shared.clone(), self.config.underrun_wait());
        let mut output = self
            .output
            .open(&request, render)
            .context("open output device")?;
        let format = output.format();

        let resampler = StereoResampler::new(
            info.sample_rate,
            format.sample_rate,
            self.config.resample_chunk_frames,
        )?;
        let resampling = resampler.is_resampling();

        self.shared.begin_session(format.sample_rate, duration);
        output.start().context("start output device")?;
        self.shared.set_state(PlaybackState::Playing);

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let producer = Producer::new(self.shared.clone(), stream, Box::new(resampler));
        let inner = Arc::clone(self);
        let decoder = thread::Builder::new()
            .name("playback-decoder".to_string())
            .spawn(move || {
                if let Exit::Finished(reason) = producer.run() {
                    inner.finish_naturally(id, reason);
                }
            })
            .context("spawn decoder thread")?;

        tracing::info!(
            track = %track.display_name(),
            codec = info.codec.as_deref().unwrap_or("unknown"),
            source_rate_hz = info.sample_rate,
            output_rate_hz = format.sample_rate,
            channels = info.channels,
            duration_secs = duration,
            resampling,
            "playback started"
        );

        Ok(Session {
            id,
            output,
            decoder: Some(decoder),
            facts: SessionFacts {
                now_playing: track.display_name(),
                source_rate: info.sample_rate,
                source_channels: info.channels,
                resampling,
            },
        })
    }

    /// Stop the current session, if any, and return the parked reaper handle.
    ///
    /// Caller holds `commands` and not `session`.
    fn teardown(&self, reason: PlaybackEndReason) -> Option<JoinHandle<()>> {
        let session = lock(&self.session).take();
        if let Some(mut session) = session {
            self.shared.request_stop();
            if let Some(decoder) = session.decoder.take() {
                if decoder.join().is_err() {
                    tracing::error!("decoder thread panicked");
                }
            }
            if let Err(e) = session.output.stop() {
                tracing::debug!("output stop on teardown: {e:#}");
            }
            drop(session);
            self.shared.clear_session();
            *lock(&self.end_reason) = Some(reason);
            tracing::info!(?reason, "playback stopped");
        }
        lock(&self.reaper).take()
    }

    /// Teardown after the decoder thread reached the end and the queue drained.
    fn finish_naturally(&self, id: u64, reason: PlaybackEndReason) {
        let session = {
            let mut slot = lock(&self.session);
            if slot.as_ref().map(|s| s.id) != Some(id) {
                return;
            }
            let Some(mut session) = slot.take() else {
                return;
            };
            self.shared.request_stop();
            self.shared.clear_session();
            *lock(&self.reaper) = session.decoder.take();
            *lock(&self.end_reason) = Some(reason);
            session
        };

        let mut output = session.output;
        if let Err(e) = output.stop() {
            tracing::debug!("output stop after finish: {e:#}");
        }
        drop(output);
        tracing::info!(?reason, track = %session.facts.now_playing, "playback finished");

        let callback = lock(&self.on_finished).clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Backend duration when usable, else the catalog's, else 0.
fn session_duration(reported: Option<f64>, known: Option<f64>) -> f64 {
    let usable = |d: &f64| d.is_finite() && *d > 0.0;
    reported
        .filter(usable)
        .or(known.filter(usable))
        .unwrap_or(0.0)
}

/// Join the thread that ran the last finished callback, unless it is this one.
fn join_reaper(reaper: Option<JoinHandle<()>>) {
    let Some(handle) = reaper else {
        return;
    };
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        tracing::error!("finished callback panicked");
    }
}
