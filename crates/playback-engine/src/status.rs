use playback_types::{PlaybackEndReason, PlaybackStatus};

use crate::shared::Shared;

/// Per-session facts that are not tracked by the shared counters.
#[derive(Clone, Debug, Default)]
pub(crate) struct SessionFacts {
    pub(crate) now_playing: String,
    pub(crate) source_rate: u32,
    pub(crate) source_channels: usize,
    pub(crate) resampling: bool,
}

/// Rounded percentage of `position` over `duration`, clamped to `0..=100`.
/// Zero when the duration is unknown.
pub fn position_percent(position_secs: f64, duration_secs: f64) -> i32 {
    if duration_secs.is_nan() || duration_secs <= 0.0 || !position_secs.is_finite() {
        return 0;
    }
    ((100.0 * position_secs / duration_secs).round() as i32).clamp(0, 100)
}

/// Build a status snapshot from the shared counters and the current session.
pub(crate) fn snapshot(
    shared: &Shared,
    session: Option<&SessionFacts>,
    end_reason: Option<PlaybackEndReason>,
) -> PlaybackStatus {
    let position = shared.position_secs();
    let duration = shared.duration_secs();
    let (underrun_frames, underrun_events) = shared.underruns();
    let output_rate = shared.output_rate();

    PlaybackStatus {
        state: shared.state(),
        now_playing: session.map(|s| s.now_playing.clone()),
        position_ms: (position * 1000.0) as u64,
        duration_ms: (duration * 1000.0) as u64,
        position_percent: position_percent(position, duration),
        source_rate_hz: session.map(|s| s.source_rate),
        source_channels: session.and_then(|s| u16::try_from(s.source_channels).ok()),
        output_rate_hz: session.map(|_| output_rate).filter(|r| *r > 0),
        resampling: session.map(|s| s.resampling).unwrap_or(false),
        buffered_chunks: shared.queue.len(),
        queue_capacity: shared.queue.capacity(),
        underrun_frames,
        underrun_events,
        end_reason,
    }
}
