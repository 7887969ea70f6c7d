use std::time::Duration;

use serde::Deserialize;

/// Playback tuning parameters shared by the decoder thread, the frame queue and
/// the output callback.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Frame queue capacity in chunks (one chunk per decoded packet).
    pub queue_capacity: usize,
    /// Longest time the output callback waits for a chunk before padding with silence.
    pub underrun_wait_ms: u64,
    /// Resampler input chunk size in frames.
    pub resample_chunk_frames: usize,
    /// Output device name filter (case-insensitive substring).
    pub device: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            underrun_wait_ms: 10,
            resample_chunk_frames: 1024,
            device: None,
        }
    }
}

impl PlaybackConfig {
    /// Capacity with a floor of one chunk.
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub fn underrun_wait(&self) -> Duration {
        Duration::from_millis(self.underrun_wait_ms)
    }
}
