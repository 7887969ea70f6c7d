//! Single-track playback engine.
//!
//! A decoder thread reads and converts packets into a bounded [`queue::FrameQueue`];
//! the output device's real-time callback drains it. [`Player`] owns the state
//! machine (Stopped / Playing / Paused), the seek protocol and the session
//! lifecycle.

pub mod config;
mod consumer;
pub mod decode;
pub mod device;
pub mod output;
pub mod playback;
mod player;
mod producer;
pub mod queue;
pub mod resample;
mod shared;
pub mod status;

pub use config::PlaybackConfig;
pub use decode::{DecodedFrame, MediaBackend, MediaStream, Packet, StreamInfo, SymphoniaBackend};
pub use output::{CpalOutput, OutputDevice, OutputFormat, OutputRequest, OutputStream, RenderFn};
pub use player::Player;
pub use playback_types::{PlaybackEndReason, PlaybackState, PlaybackStatus, Track};
