//! Real-time side of the pipeline: fills device buffers from the frame queue.

use std::sync::Arc;
use std::time::Duration;

use playback_types::PlaybackState;

use crate::output::RenderFn;
use crate::resample::OUTPUT_CHANNELS;
use crate::shared::Shared;

/// Build the render callback handed to the output device.
pub(crate) fn render_fn(shared: Arc<Shared>, max_wait: Duration) -> RenderFn {
    Box::new(move |out: &mut [f32]| render(&shared, out, max_wait))
}

/// Fill `out` with interleaved stereo.
///
/// Outside of Playing the buffer is silence and nothing is drained or counted.
/// Otherwise queued audio is copied in, waiting at most `max_wait` for it, and
/// any shortfall is silence. Every frame of the buffer advances the position.
pub(crate) fn render(shared: &Shared, out: &mut [f32], max_wait: Duration) {
    if shared.state() != PlaybackState::Playing {
        out.fill(0.0);
        return;
    }

    let written = shared.queue.drain_into(out, max_wait);
    if written < out.len() {
        out[written..].fill(0.0);
        if !shared.queue.is_end_of_stream() {
            shared.record_underrun(((out.len() - written) / OUTPUT_CHANNELS) as u64);
        }
    }

    shared.add_played((out.len() / OUTPUT_CHANNELS) as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::AudioChunk;

    fn playing(capacity: usize) -> Shared {
        let shared = Shared::new(capacity);
        shared.begin_session(48_000, 1.0);
        shared.set_state(PlaybackState::Playing);
        shared
    }

    #[test]
    fn paused_outputs_silence_without_draining() {
        let shared = playing(4);
        shared.queue.push(AudioChunk::new(vec![0.5; 8]));
        shared.set_state(PlaybackState::Paused);

        let mut out = [1.0f32; 8];
        render(&shared, &mut out, Duration::from_millis(1));
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(shared.queue.len(), 1);
        assert_eq!(shared.frames_played(), 0);
    }

    #[test]
    fn partial_buffer_is_padded_and_counted() {
        let shared = playing(4);
        shared.queue.push(AudioChunk::new(vec![0.5; 4]));

        let mut out = [1.0f32; 8];
        render(&shared, &mut out, Duration::from_millis(1));
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
        assert_eq!(shared.frames_played(), 4);
        assert_eq!(shared.underruns(), (2, 1));
    }

    #[test]
    fn end_of_stream_padding_is_not_an_underrun() {
        let shared = playing(4);
        shared.queue.push(AudioChunk::new(vec![0.5; 2]));
        shared.queue.mark_end_of_stream();

        let mut out = [1.0f32; 8];
        render(&shared, &mut out, Duration::from_millis(50));
        assert_eq!(shared.underruns(), (0, 0));
        assert!(shared.queue.is_empty());
    }
}
