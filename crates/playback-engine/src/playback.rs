//! CPAL output stream construction.
//!
//! The callback asks the engine's render function for interleaved stereo `f32`,
//! maps it onto the device channel count, and converts to the device sample
//! format. The scratch buffer is allocated once when the stream is built.

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::output::RenderFn;
use crate::resample::OUTPUT_CHANNELS;

/// Frames rendered per block when the host does not fix its buffer size.
const MIN_BLOCK_FRAMES: usize = 8192;

/// Build a CPAL output stream driven by `render`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    render: RenderFn,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, render),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, render),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, render),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, render),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut render: RenderFn,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = (config.channels as usize).max(1);
    let block_frames = match config.buffer_size {
        cpal::BufferSize::Fixed(frames) => (frames as usize).max(MIN_BLOCK_FRAMES),
        cpal::BufferSize::Default => MIN_BLOCK_FRAMES,
    };
    // Allocated once; larger host buffers are rendered in several blocks.
    let mut scratch = vec![0.0f32; block_frames * OUTPUT_CHANNELS];

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| fill_device_buffer(data, &mut scratch, channels_out, &mut *render),
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Render `data` in blocks of at most `scratch.len() / 2` frames. Never allocates.
fn fill_device_buffer<T>(
    data: &mut [T],
    scratch: &mut [f32],
    channels_out: usize,
    render: &mut dyn FnMut(&mut [f32]),
) where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let block_frames = (scratch.len() / OUTPUT_CHANNELS).max(1);
    for block in data.chunks_mut(block_frames * channels_out) {
        let frames = block.len() / channels_out;
        let stereo = &mut scratch[..frames * OUTPUT_CHANNELS];
        render(&mut *stereo);
        write_block(block, stereo, channels_out);
    }
}

/// Map rendered stereo frames onto the device buffer.
fn write_block<T>(block: &mut [T], stereo: &[f32], channels_out: usize)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    for (frame, out) in block.chunks_exact_mut(channels_out).enumerate() {
        let l = stereo[frame * OUTPUT_CHANNELS];
        let r = stereo[frame * OUTPUT_CHANNELS + 1];
        for (ch, sample) in out.iter_mut().enumerate() {
            *sample = <T as cpal::Sample>::from_sample::<f32>(map_stereo(l, r, channels_out, ch));
        }
    }
}

/// Value of device channel `dst_ch` for one stereo frame.
///
/// Mono devices get the L/R average, stereo passes through, and channels past
/// the front pair stay silent.
fn map_stereo(l: f32, r: f32, dst_channels: usize, dst_ch: usize) -> f32 {
    match (dst_channels, dst_ch) {
        (1, _) => 0.5 * (l + r),
        (_, 0) => l,
        (_, 1) => r,
        _ => 0.0,
    }
}
