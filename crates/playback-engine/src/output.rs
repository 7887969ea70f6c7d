//! Output device seam and its CPAL implementation.
//!
//! The engine hands the device a [`RenderFn`] that fills interleaved stereo `f32`
//! buffers; the device is responsible for channel/format mapping and for calling
//! it from its real-time thread.
//!
//! CPAL streams are not `Send` on every host, so [`CpalOutput`] builds and owns
//! the stream on a dedicated thread and drives it through a command channel.

use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::{device, playback};

/// Real-time render callback: fill the whole buffer with interleaved stereo.
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// What the engine asks of the device when a session opens.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputRequest {
    /// Preferred sample rate (the source rate).
    pub sample_rate: u32,
    /// Device name filter; `None` selects the host default.
    pub device: Option<String>,
}

/// Format the device actually runs at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    /// Hardware channel count; the render callback always produces stereo.
    pub channels: u16,
}

/// Opens output streams.
pub trait OutputDevice: Send + Sync {
    fn open(&self, request: &OutputRequest, render: RenderFn) -> Result<Box<dyn OutputStream>>;
}

/// An open output stream. Created stopped; dropping it closes the device.
pub trait OutputStream: Send {
    fn format(&self) -> OutputFormat;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// [`OutputDevice`] using the CPAL default host.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpalOutput;

enum DeviceCommand {
    Start(Sender<Result<()>>),
    Stop(Sender<Result<()>>),
}

impl OutputDevice for CpalOutput {
    fn open(&self, request: &OutputRequest, render: RenderFn) -> Result<Box<dyn OutputStream>> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<OutputFormat>>(1);
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<DeviceCommand>();
        let request = request.clone();

        let join = thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || device_thread_main(request, render, ready_tx, cmd_rx))
            .context("spawn output thread")?;

        let format = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(e)) => {
                let _ = join.join();
                return Err(e);
            }
            Err(_) => {
                let _ = join.join();
                return Err(anyhow!("output thread exited before the stream opened"));
            }
        };

        Ok(Box::new(CpalStream {
            format,
            cmd_tx: Some(cmd_tx),
            join: Some(join),
        }))
    }
}

/// Owns the CPAL stream for its whole life; exits (dropping the stream) when
/// the command sender is dropped.
fn device_thread_main(
    request: OutputRequest,
    render: RenderFn,
    ready_tx: Sender<Result<OutputFormat>>,
    cmd_rx: Receiver<DeviceCommand>,
) {
    let (stream, format) = match build_cpal_stream(&request, render) {
        Ok(v) => v,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if ready_tx.send(Ok(format)).is_err() {
        return;
    }

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            DeviceCommand::Start(reply) => {
                let _ = reply.send(stream.play().context("start output stream"));
            }
            DeviceCommand::Stop(reply) => {
                let _ = reply.send(stream.pause().context("pause output stream"));
            }
        }
    }
    tracing::debug!("output stream closed");
}

fn build_cpal_stream(
    request: &OutputRequest,
    render: RenderFn,
) -> Result<(cpal::Stream, OutputFormat)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, request.device.as_deref())?;
    let supported = device::pick_output_config(&device, Some(request.sample_rate))?;

    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(buffer_size) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buffer_size;
    }

    let name = device
        .description()
        .map(|d| d.name().to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    tracing::info!(
        device = %name,
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        format = ?supported.sample_format(),
        "output device opened"
    );

    let stream = playback::build_output_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        render,
    )?;
    // Some hosts start streams on creation; sessions open stopped.
    if let Err(e) = stream.pause() {
        tracing::debug!("initial pause not supported: {e}");
    }

    Ok((
        stream,
        OutputFormat {
            sample_rate: stream_config.sample_rate,
            channels: stream_config.channels,
        },
    ))
}

/// Handle to a stream living on its device thread.
struct CpalStream {
    format: OutputFormat,
    cmd_tx: Option<Sender<DeviceCommand>>,
    join: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn send(&self, make: fn(Sender<Result<()>>) -> DeviceCommand) -> Result<()> {
        let cmd_tx = self
            .cmd_tx
            .as_ref()
            .ok_or_else(|| anyhow!("output stream closed"))?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        cmd_tx
            .send(make(reply_tx))
            .map_err(|_| anyhow!("output thread gone"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("output thread gone"))?
    }
}

impl OutputStream for CpalStream {
    fn format(&self) -> OutputFormat {
        self.format
    }

    fn start(&mut self) -> Result<()> {
        self.send(DeviceCommand::Start)
    }

    fn stop(&mut self) -> Result<()> {
        self.send(DeviceCommand::Stop)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.cmd_tx.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!("output thread panicked");
            }
        }
    }
}
