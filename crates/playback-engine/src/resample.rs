//! Conversion of decoded frames into interleaved stereo `f32` at the output rate.
//!
//! Channel layout conversion always happens. Rate conversion uses Rubato's sinc
//! resampler and is only engaged when the device cannot run at the source rate.

use anyhow::{Context, Result};
use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::decode::DecodedFrame;

/// Channel count of every chunk handed to the output callback.
pub const OUTPUT_CHANNELS: usize = 2;

/// Converts decoded frames into device-ready interleaved stereo.
pub trait Resampler: Send {
    /// Convert one decoded frame. May return fewer (or zero) frames while the
    /// rate converter accumulates input.
    fn convert(&mut self, frame: &DecodedFrame) -> Result<Vec<f32>>;

    /// Flush audio still held by the converter at end of stream.
    fn finish(&mut self) -> Result<Vec<f32>>;

    /// Forget buffered input (after a seek).
    fn reset(&mut self);

    /// Whether the sample rate changes, not only the channel layout.
    fn is_resampling(&self) -> bool;
}

/// Default [`Resampler`]: stereo mapping plus optional Rubato rate conversion.
pub struct StereoResampler {
    source_rate: u32,
    output_rate: u32,
    sinc: Option<SincStage>,
}

impl StereoResampler {
    /// Build a converter from `source_rate` to `output_rate`.
    ///
    /// `chunk_frames` is the Rubato input block size; it is only used when the
    /// rates differ.
    pub fn new(source_rate: u32, output_rate: u32, chunk_frames: usize) -> Result<Self> {
        let sinc = if source_rate != output_rate && source_rate > 0 && output_rate > 0 {
            Some(SincStage::new(source_rate, output_rate, chunk_frames.max(1))?)
        } else {
            None
        };
        Ok(Self {
            source_rate,
            output_rate,
            sinc,
        })
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

impl Resampler for StereoResampler {
    fn convert(&mut self, frame: &DecodedFrame) -> Result<Vec<f32>> {
        let stereo = to_stereo(&frame.samples, frame.channels);
        match &mut self.sinc {
            None => Ok(stereo),
            Some(stage) => stage.process(&stereo),
        }
    }

    fn finish(&mut self) -> Result<Vec<f32>> {
        match &mut self.sinc {
            None => Ok(Vec::new()),
            Some(stage) => stage.finish(),
        }
    }

    fn reset(&mut self) {
        if let Some(stage) = &mut self.sinc {
            stage.reset();
        }
    }

    fn is_resampling(&self) -> bool {
        self.sinc.is_some()
    }
}

/// Streaming wrapper around `SincFixedIn`: accumulates planar input until a full
/// block is available, trims the filter delay, and tracks frame counts so the
/// flushed tail matches the expected output length.
struct SincStage {
    inner: SincFixedIn<f32>,
    ratio: f64,
    pending: [Vec<f32>; OUTPUT_CHANNELS],
    out_buf: Vec<Vec<f32>>,
    frames_in: u64,
    frames_out: u64,
    skip: usize,
}

impl SincStage {
    fn new(source_rate: u32, output_rate: u32, chunk_frames: usize) -> Result<Self> {
        let ratio = output_rate as f64 / source_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let inner = SincFixedIn::<f32>::new(ratio, 1.1, params, chunk_frames, OUTPUT_CHANNELS)
            .context("create resampler")?;
        let out_buf = inner.output_buffer_allocate(true);
        let skip = inner.output_delay();

        Ok(Self {
            inner,
            ratio,
            pending: [
                Vec::with_capacity(chunk_frames * 2),
                Vec::with_capacity(chunk_frames * 2),
            ],
            out_buf,
            frames_in: 0,
            frames_out: 0,
            skip,
        })
    }

    fn process(&mut self, interleaved: &[f32]) -> Result<Vec<f32>> {
        for frame in interleaved.chunks_exact(OUTPUT_CHANNELS) {
            self.pending[0].push(frame[0]);
            self.pending[1].push(frame[1]);
        }
        self.frames_in += (interleaved.len() / OUTPUT_CHANNELS) as u64;

        let mut out = Vec::new();
        loop {
            let need = self.inner.input_frames_next();
            if self.pending[0].len() < need {
                break;
            }
            let input = [&self.pending[0][..need], &self.pending[1][..need]];
            let (consumed, produced) = self
                .inner
                .process_into_buffer(&input[..], &mut self.out_buf[..], None)
                .context("resample block")?;
            self.emit(produced, &mut out);
            for ch in &mut self.pending {
                ch.drain(..consumed);
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<f32>> {
        let mut out = Vec::new();
        let expected = (self.frames_in as f64 * self.ratio).ceil() as u64;

        if !self.pending[0].is_empty() {
            let input = [&self.pending[0][..], &self.pending[1][..]];
            let (_, produced) = self
                .inner
                .process_partial_into_buffer(Some(&input[..]), &mut self.out_buf[..], None)
                .context("resample tail")?;
            self.emit(produced, &mut out);
            for ch in &mut self.pending {
                ch.clear();
            }
        }

        // Push silence through the filter until its delay line is flushed.
        let mut rounds = 0;
        while self.frames_out < expected && rounds < 4 {
            let (_, produced) = self
                .inner
                .process_partial_into_buffer(None::<&[&[f32]]>, &mut self.out_buf[..], None)
                .context("resample flush")?;
            self.emit(produced, &mut out);
            rounds += 1;
        }

        let excess = self.frames_out.saturating_sub(expected) as usize;
        out.truncate(out.len().saturating_sub(excess * OUTPUT_CHANNELS));
        self.frames_out = self.frames_out.min(expected);
        Ok(out)
    }

    fn emit(&mut self, produced: usize, out: &mut Vec<f32>) {
        let start = self.skip.min(produced);
        self.skip -= start;
        out.reserve((produced - start) * OUTPUT_CHANNELS);
        for i in start..produced {
            out.push(self.out_buf[0][i]);
            out.push(self.out_buf[1][i]);
        }
        self.frames_out += (produced - start) as u64;
    }

    fn reset(&mut self) {
        self.inner.reset();
        for ch in &mut self.pending {
            ch.clear();
        }
        self.frames_in = 0;
        self.frames_out = 0;
        self.skip = self.inner.output_delay();
    }
}

/// Map interleaved samples with `channels` channels to interleaved stereo.
///
/// Mono is duplicated, stereo passes through, wider layouts keep the front pair.
pub fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        2 => samples[..samples.len() - samples.len() % 2].to_vec(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}
