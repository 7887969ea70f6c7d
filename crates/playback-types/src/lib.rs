use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A playable file handed over by the catalog.
///
/// Only `file_path` is required. `known_duration_secs` is what the catalog's tag
/// reader found; the engine recomputes the authoritative duration from the decoder
/// and only falls back to this value when the container reports none.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Track {
    /// Path to the audio file on disk.
    pub file_path: PathBuf,
    /// Duration reported by the catalog, in seconds.
    pub known_duration_secs: Option<f64>,
    /// Display title, used for status and logs.
    pub title: Option<String>,
}

impl Track {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            known_duration_secs: None,
            title: None,
        }
    }

    pub fn with_known_duration(mut self, secs: f64) -> Self {
        self.known_duration_secs = Some(secs);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Title if present, otherwise the file path.
    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| self.file_path.display().to_string())
    }
}

/// Player state machine value.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

/// Reason why the last session ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of stream, after the queue drained.
    Eof,
    /// Reading the source failed mid-stream or the device could not restart.
    Error,
    /// Playback was explicitly stopped by a command.
    Stopped,
}

/// Point-in-time view of the player, suitable for logs and UIs.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// Track title or path of the loaded session.
    pub now_playing: Option<String>,
    /// Position derived from frames handed to the device.
    pub position_ms: u64,
    /// Authoritative duration of the loaded session.
    pub duration_ms: u64,
    /// Position as a rounded percentage of the duration.
    pub position_percent: i32,
    /// Sample rate reported by the decoder.
    pub source_rate_hz: Option<u32>,
    /// Channel count reported by the decoder.
    pub source_channels: Option<u16>,
    /// Sample rate the output device runs at.
    pub output_rate_hz: Option<u32>,
    /// Whether the resampler changes the rate (not only the channel layout).
    pub resampling: bool,
    /// Chunks currently waiting in the frame queue.
    pub buffered_chunks: usize,
    /// Frame queue capacity in chunks.
    pub queue_capacity: usize,
    /// Frames the output callback had to pad with silence.
    pub underrun_frames: u64,
    /// Number of callbacks that hit an empty queue.
    pub underrun_events: u64,
    /// How the previous session ended, if one has ended.
    pub end_reason: Option<PlaybackEndReason>,
}
