//! Decoder thread: read, decode, convert, push.
//!
//! Owns the media stream and the resampler for the whole session. Stop and
//! seek are observed at the top of every iteration and inside every wait.

use std::sync::Arc;

use playback_types::PlaybackEndReason;

use crate::decode::MediaStream;
use crate::queue::{AudioChunk, Wake};
use crate::resample::Resampler;
use crate::shared::Shared;

/// How the decoder loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Exit {
    /// `stop` was requested; the caller tears the session down.
    Stopped,
    /// The stream ended and the queue drained; the thread tears the session down.
    Finished(PlaybackEndReason),
}

pub(crate) struct Producer {
    shared: Arc<Shared>,
    stream: Box<dyn MediaStream>,
    resampler: Box<dyn Resampler>,
    track_id: u32,
}

impl Producer {
    pub(crate) fn new(
        shared: Arc<Shared>,
        stream: Box<dyn MediaStream>,
        resampler: Box<dyn Resampler>,
    ) -> Self {
        let track_id = stream.info().track_id;
        Self {
            shared,
            stream,
            resampler,
            track_id,
        }
    }

    pub(crate) fn run(mut self) -> Exit {
        loop {
            if self.shared.is_stopping() {
                return Exit::Stopped;
            }
            if let Some(target) = self.shared.take_seek() {
                self.apply_seek(target);
                continue;
            }

            match self.shared.wait_while_paused() {
                Wake::Closed => return Exit::Stopped,
                Wake::Interrupted => continue,
                Wake::Ready => {}
            }
            match self.shared.queue.wait_for_room() {
                Wake::Closed => return Exit::Stopped,
                Wake::Interrupted => continue,
                Wake::Ready => {}
            }

            let packet = match self.stream.read_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    tracing::info!("end of stream; draining queue");
                    match self.drain_to_end(PlaybackEndReason::Eof) {
                        Some(exit) => return exit,
                        None => continue,
                    }
                }
                Err(e) => {
                    tracing::error!("read failed, ending playback: {e:#}");
                    match self.drain_to_end(PlaybackEndReason::Error) {
                        Some(exit) => return exit,
                        None => continue,
                    }
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let frames = match self.stream.decode(&packet) {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::warn!(ts = packet.ts(), "skipping packet: {e:#}");
                    continue;
                }
            };

            for frame in &frames {
                let samples = match self.resampler.convert(frame) {
                    Ok(samples) => samples,
                    Err(e) => {
                        tracing::warn!("skipping frame: {e:#}");
                        continue;
                    }
                };
                match self.shared.queue.push(AudioChunk::new(samples)) {
                    Wake::Ready => {}
                    Wake::Closed => return Exit::Stopped,
                    Wake::Interrupted => break,
                }
            }
        }
    }

    fn apply_seek(&mut self, target: f64) {
        match self.stream.seek(target) {
            Ok(actual) => {
                self.stream.flush();
                self.resampler.reset();
                self.shared.complete_seek(true);
                self.shared.set_position_secs(target);
                tracing::info!(target_secs = target, actual_secs = actual, "seek applied");
            }
            Err(e) => {
                tracing::warn!(target_secs = target, "seek failed, continuing: {e:#}");
                self.shared.complete_seek(false);
            }
        }
    }

    /// Flush the converter, mark end of stream and wait for the consumer to
    /// play everything out. `None` means a seek arrived and decoding resumes.
    fn drain_to_end(&mut self, reason: PlaybackEndReason) -> Option<Exit> {
        match self.resampler.finish() {
            Ok(tail) => match self.shared.queue.push(AudioChunk::new(tail)) {
                Wake::Ready => {}
                Wake::Closed => return Some(Exit::Stopped),
                Wake::Interrupted => return None,
            },
            Err(e) => tracing::warn!("dropping resampler tail: {e:#}"),
        }

        self.shared.queue.mark_end_of_stream();
        match self.shared.queue.wait_drained() {
            Wake::Ready => Some(Exit::Finished(reason)),
            Wake::Closed => Some(Exit::Stopped),
            Wake::Interrupted => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use playback_types::PlaybackState;

    use crate::decode::{DecodedFrame, Packet, StreamInfo};
    use crate::resample::StereoResampler;

    /// Stream of `packets` stereo packets of `frames` frames each, value = packet index.
    struct Counting {
        info: StreamInfo,
        next: u64,
        packets: u64,
        frames: usize,
        fail_seek: bool,
        /// Every n-th packet fails to decode.
        fail_decode_every: Option<u64>,
        /// Reading the packet with this index fails.
        fail_read_at: Option<u64>,
    }

    impl Counting {
        fn new(packets: u64, frames: usize) -> Self {
            Self {
                info: StreamInfo {
                    track_id: 1,
                    sample_rate: 1000,
                    channels: 2,
                    duration_secs: Some((packets as usize * frames) as f64 / 1000.0),
                    codec: None,
                },
                next: 0,
                packets,
                frames,
                fail_seek: false,
                fail_decode_every: None,
                fail_read_at: None,
            }
        }
    }

    impl MediaStream for Counting {
        fn info(&self) -> &StreamInfo {
            &self.info
        }

        fn read_packet(&mut self) -> Result<Option<Packet>> {
            if self.next >= self.packets {
                return Ok(None);
            }
            let ts = self.next;
            if self.fail_read_at == Some(ts) {
                return Err(anyhow!("disk went away"));
            }
            self.next += 1;
            Ok(Some(Packet::new_from_slice(1, ts, self.frames as u64, &[ts as u8])))
        }

        fn decode(&mut self, packet: &Packet) -> Result<Vec<DecodedFrame>> {
            if let Some(n) = self.fail_decode_every {
                if packet.ts() % n == n - 1 {
                    return Err(anyhow!("corrupt packet {}", packet.ts()));
                }
            }
            Ok(vec![DecodedFrame {
                samples: vec![packet.ts() as f32; self.frames * 2],
                channels: 2,
                sample_rate: 1000,
            }])
        }

        fn seek(&mut self, secs: f64) -> Result<f64> {
            if self.fail_seek {
                return Err(anyhow!("not seekable"));
            }
            self.next = ((secs * 1000.0) as usize / self.frames) as u64;
            Ok(secs)
        }

        fn flush(&mut self) {}
    }

    fn producer(shared: &Arc<Shared>, stream: Counting) -> Producer {
        let resampler = StereoResampler::new(1000, 1000, 64).unwrap();
        Producer::new(shared.clone(), Box::new(stream), Box::new(resampler))
    }

    fn drain_all(shared: &Shared) -> Vec<f32> {
        let mut all = Vec::new();
        let mut buf = [0.0f32; 20];
        loop {
            let n = shared.queue.drain_into(&mut buf, Duration::from_millis(20));
            if n == 0 {
                return all;
            }
            all.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn fills_queue_up_to_capacity_then_blocks() {
        let shared = Arc::new(Shared::new(3));
        shared.begin_session(1000, 1.0);
        shared.set_state(PlaybackState::Playing);
        let p = producer(&shared, Counting::new(100, 10));
        let handle = thread::spawn(move || p.run());

        thread::sleep(Duration::from_millis(30));
        assert_eq!(shared.queue.len(), 3);

        shared.request_stop();
        assert_eq!(handle.join().unwrap(), Exit::Stopped);
    }

    #[test]
    fn finishes_after_queue_drains() {
        let shared = Arc::new(Shared::new(8));
        shared.begin_session(1000, 0.04);
        shared.set_state(PlaybackState::Playing);
        let p = producer(&shared, Counting::new(4, 10));
        let handle = thread::spawn(move || p.run());

        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        let played = drain_all(&shared);
        assert_eq!(played.len(), 80);
        assert_eq!(handle.join().unwrap(), Exit::Finished(PlaybackEndReason::Eof));
    }

    #[test]
    fn seek_discards_queue_and_restarts_counter() {
        let shared = Arc::new(Shared::new(2));
        shared.begin_session(1000, 1.0);
        shared.set_state(PlaybackState::Playing);
        let p = producer(&shared, Counting::new(100, 10));
        let handle = thread::spawn(move || p.run());

        thread::sleep(Duration::from_millis(20));
        assert!(shared.request_seek(0.5));
        thread::sleep(Duration::from_millis(30));

        let mut buf = [0.0f32; 2];
        shared.queue.drain_into(&mut buf, Duration::from_millis(20));
        assert_eq!(buf[0], 50.0);
        assert_eq!(shared.frames_played(), 500);

        shared.request_stop();
        assert_eq!(handle.join().unwrap(), Exit::Stopped);
    }

    #[test]
    fn failed_seek_keeps_playing() {
        let shared = Arc::new(Shared::new(2));
        shared.begin_session(1000, 1.0);
        shared.set_state(PlaybackState::Playing);
        let mut stream = Counting::new(100, 10);
        stream.fail_seek = true;
        let p = producer(&shared, stream);
        let handle = thread::spawn(move || p.run());

        thread::sleep(Duration::from_millis(20));
        assert!(shared.request_seek(0.5));
        thread::sleep(Duration::from_millis(20));

        let mut buf = [0.0f32; 2];
        shared.queue.drain_into(&mut buf, Duration::from_millis(20));
        assert_eq!(buf[0], 0.0);
        assert_eq!(shared.queue.len(), 2);

        shared.request_stop();
        assert_eq!(handle.join().unwrap(), Exit::Stopped);
    }

    #[test]
    fn undecodable_packets_are_skipped() {
        let shared = Arc::new(Shared::new(16));
        shared.begin_session(1000, 0.1);
        shared.set_state(PlaybackState::Playing);
        let mut stream = Counting::new(10, 10);
        stream.fail_decode_every = Some(2);
        let p = producer(&shared, stream);
        let handle = thread::spawn(move || p.run());

        thread::sleep(Duration::from_millis(30));
        let played = drain_all(&shared);
        assert_eq!(played.len(), 100);
        let mut values: Vec<f32> = played.chunks(20).map(|c| c[0]).collect();
        values.dedup();
        assert_eq!(values, vec![0.0, 2.0, 4.0, 6.0, 8.0]);
        assert_eq!(handle.join().unwrap(), Exit::Finished(PlaybackEndReason::Eof));
    }

    #[test]
    fn read_error_drains_then_finishes_with_error() {
        let shared = Arc::new(Shared::new(16));
        shared.begin_session(1000, 1.0);
        shared.set_state(PlaybackState::Playing);
        let mut stream = Counting::new(100, 10);
        stream.fail_read_at = Some(3);
        let p = producer(&shared, stream);
        let handle = thread::spawn(move || p.run());

        thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        assert!(shared.queue.is_end_of_stream());
        assert_eq!(drain_all(&shared).len(), 60);
        assert_eq!(
            handle.join().unwrap(),
            Exit::Finished(PlaybackEndReason::Error)
        );
    }

    #[test]
    fn audio_keeps_flowing_after_a_burst_of_seeks() {
        let shared = Arc::new(Shared::new(8));
        shared.begin_session(1000, 10_000.0);
        shared.set_state(PlaybackState::Playing);
        let p = producer(&shared, Counting::new(1_000_000, 10));
        let handle = thread::spawn(move || p.run());

        let mut buf = [0.0f32; 20];
        for round in 0..50 {
            for i in 0..200 {
                assert!(shared.request_seek(((round * 200 + i) % 5000) as f64));
            }
            let deadline = std::time::Instant::now() + Duration::from_secs(1);
            while shared.queue.is_interrupted() && std::time::Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            assert!(!shared.queue.is_interrupted(), "round {round}: queue left interrupted");
            let n = shared.queue.drain_into(&mut buf, Duration::from_millis(50));
            assert!(n > 0, "round {round}: no audio after seeking");
        }

        shared.request_stop();
        assert_eq!(handle.join().unwrap(), Exit::Stopped);
    }
}
