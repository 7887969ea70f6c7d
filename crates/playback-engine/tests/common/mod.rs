#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use playback_engine::{
    DecodedFrame, MediaBackend, MediaStream, OutputDevice, OutputFormat, OutputRequest,
    OutputStream, Packet, PlaybackConfig, Player, RenderFn, StreamInfo,
};

/// Shape of the synthetic track served by [`MockBackend`].
#[derive(Clone, Debug)]
pub struct MockTrack {
    pub sample_rate: u32,
    pub channels: usize,
    pub packet_frames: usize,
    pub packets: u64,
    pub reported_duration: Option<f64>,
    pub seekable: bool,
    /// Every n-th packet index fails to decode.
    pub fail_decode_every: Option<u64>,
    /// Reading the packet with this index fails.
    pub fail_read_at: Option<u64>,
}

impl MockTrack {
    /// Stereo track at 8 kHz in 10 ms packets.
    pub fn seconds(secs: f64) -> Self {
        let packets = (secs * 100.0).round() as u64;
        Self {
            sample_rate: 8000,
            channels: 2,
            packet_frames: 80,
            packets,
            reported_duration: Some(packets as f64 / 100.0),
            seekable: true,
            fail_decode_every: None,
            fail_read_at: None,
        }
    }
}

#[derive(Default)]
pub struct MockStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub seeks: Mutex<Vec<f64>>,
    pub decoded: AtomicUsize,
    pub decode_failures: AtomicUsize,
}

pub struct MockBackend {
    pub track: MockTrack,
    pub stats: Arc<MockStats>,
}

impl MockBackend {
    pub fn new(track: MockTrack) -> (Self, Arc<MockStats>) {
        let stats = Arc::new(MockStats::default());
        (
            Self {
                track,
                stats: stats.clone(),
            },
            stats,
        )
    }
}

impl MediaBackend for MockBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaStream>> {
        if path.to_string_lossy().contains("missing") {
            return Err(anyhow!("no such file"));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            info: StreamInfo {
                track_id: 1,
                sample_rate: self.track.sample_rate,
                channels: self.track.channels,
                duration_secs: self.track.reported_duration,
                codec: Some("MOCK".to_string()),
            },
            track: self.track.clone(),
            next: 0,
            stats: self.stats.clone(),
        }))
    }
}

struct MockStream {
    info: StreamInfo,
    track: MockTrack,
    next: u64,
    stats: Arc<MockStats>,
}

impl MediaStream for MockStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.next >= self.track.packets {
            return Ok(None);
        }
        let ts = self.next;
        if self.track.fail_read_at == Some(ts) {
            return Err(anyhow!("read error at packet {ts}"));
        }
        self.next += 1;
        // Every fifth packet belongs to another (non-audio) track.
        let track_id = if ts % 5 == 4 { 2 } else { 1 };
        if track_id == 2 {
            return Ok(Some(Packet::new_from_slice(2, ts, 0, &[0])));
        }
        Ok(Some(Packet::new_from_slice(
            track_id,
            ts,
            self.track.packet_frames as u64,
            &[1],
        )))
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<DecodedFrame>> {
        if let Some(n) = self.track.fail_decode_every {
            if packet.ts() % n == n - 1 {
                self.stats.decode_failures.fetch_add(1, Ordering::SeqCst);
                return Err(anyhow!("corrupt packet {}", packet.ts()));
            }
        }
        self.stats.decoded.fetch_add(1, Ordering::SeqCst);
        Ok(vec![DecodedFrame {
            samples: vec![0.1; packet.dur() as usize * self.track.channels],
            channels: self.track.channels,
            sample_rate: self.track.sample_rate,
        }])
    }

    fn seek(&mut self, secs: f64) -> Result<f64> {
        if !self.track.seekable {
            return Err(anyhow!("stream is not seekable"));
        }
        let frame = (secs * self.track.sample_rate as f64) as u64;
        self.next = (frame / self.track.packet_frames as u64).min(self.track.packets);
        self.stats
            .seeks
            .lock()
            .unwrap()
            .push(secs);
        Ok(self.next as f64 * self.track.packet_frames as f64 / self.track.sample_rate as f64)
    }

    fn flush(&mut self) {}
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct DeviceStats {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail_start: AtomicBool,
    pub rendered_frames: AtomicUsize,
}

/// Output device that renders `frames_per_tick` frames every millisecond while started.
pub struct FakeOutput {
    pub rate: Option<u32>,
    pub frames_per_tick: usize,
    pub stats: Arc<DeviceStats>,
}

impl FakeOutput {
    pub fn new() -> (Self, Arc<DeviceStats>) {
        let stats = Arc::new(DeviceStats::default());
        (
            Self {
                rate: None,
                frames_per_tick: 80,
                stats: stats.clone(),
            },
            stats,
        )
    }

    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = Some(rate);
        self
    }
}

impl OutputDevice for FakeOutput {
    fn open(&self, request: &OutputRequest, render: RenderFn) -> Result<Box<dyn OutputStream>> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let running = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let frames = self.frames_per_tick;
        let stats = self.stats.clone();

        let ticker = {
            let running = running.clone();
            let closed = closed.clone();
            let mut render = render;
            thread::spawn(move || {
                let mut buf = vec![1.0f32; frames * 2];
                while !closed.load(Ordering::SeqCst) {
                    if running.load(Ordering::SeqCst) {
                        render(&mut buf[..]);
                        stats.rendered_frames.fetch_add(frames, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        Ok(Box::new(FakeStream {
            format: OutputFormat {
                sample_rate: self.rate.unwrap_or(request.sample_rate),
                channels: 2,
            },
            running,
            closed,
            ticker: Some(ticker),
            stats: self.stats.clone(),
        }))
    }
}

struct FakeStream {
    format: OutputFormat,
    running: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
    stats: Arc<DeviceStats>,
}

impl OutputStream for FakeStream {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        if self.stats.fail_start.load(Ordering::SeqCst) {
            return Err(anyhow!("device unplugged"));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(ticker) = self.ticker.take() {
            let _ = ticker.join();
        }
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub player: Player,
    pub media: Arc<MockStats>,
    pub device: Arc<DeviceStats>,
}

pub fn harness(track: MockTrack) -> Harness {
    harness_with(track, PlaybackConfig::default(), None)
}

pub fn harness_with(track: MockTrack, config: PlaybackConfig, device_rate: Option<u32>) -> Harness {
    let (backend, media) = MockBackend::new(track);
    let (output, device) = FakeOutput::new();
    let output = match device_rate {
        Some(rate) => output.with_rate(rate),
        None => output,
    };
    Harness {
        player: Player::new(config, Box::new(backend), Box::new(output)),
        media,
        device,
    }
}

/// Poll `cond` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}
