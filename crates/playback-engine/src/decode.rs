//! Decoding backend seam and its Symphonia implementation.
//!
//! The player only talks to [`MediaBackend`] / [`MediaStream`]; the shipped
//! backend probes the file with Symphonia, selects the first audio track, and
//! decodes packets into interleaved `f32` frames.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

pub use symphonia::core::formats::Packet;

/// Properties of the selected audio stream, captured when the stream is opened.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    /// Track id of the selected audio stream; packets of other tracks are skipped.
    pub track_id: u32,
    pub sample_rate: u32,
    pub channels: usize,
    /// Authoritative duration, when the container reports one.
    pub duration_secs: Option<f64>,
    /// Codec label (best-effort).
    pub codec: Option<String>,
}

/// One block of decoded audio, interleaved `f32` in the source layout.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedFrame {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl DecodedFrame {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

/// Opens media files for playback.
pub trait MediaBackend: Send + Sync {
    /// Open `path` and select its audio stream. Fails when the file cannot be
    /// read, the container is unknown, or there is no decodable audio stream.
    fn open(&self, path: &Path) -> Result<Box<dyn MediaStream>>;
}

/// An open media file. Dropping it closes the file and the decoder.
pub trait MediaStream: Send {
    fn info(&self) -> &StreamInfo;

    /// Next encoded packet, or `None` at end of stream.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Decode one packet into zero or more frames.
    fn decode(&mut self, packet: &Packet) -> Result<Vec<DecodedFrame>>;

    /// Reposition to `secs`. Returns the position actually reached, in seconds.
    fn seek(&mut self, secs: f64) -> Result<f64>;

    /// Drop decoder state carried over from before a seek.
    fn flush(&mut self);
}

/// [`MediaBackend`] backed by Symphonia's default probe and codec registry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaBackend;

impl MediaBackend for SymphoniaBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn MediaStream>> {
        Ok(Box::new(SymphoniaStream::open(path)?))
    }
}

/// Symphonia format reader plus decoder for a single audio track.
pub struct SymphoniaStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    info: StreamInfo,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_spec: Option<SignalSpec>,
}

impl SymphoniaStream {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .with_context(|| format!("probe {:?}", path))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow!("no audio stream in {:?}", path))?;

        let codec_params = track.codec_params.clone();
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("unknown sample rate"))?;
        let channels = codec_params
            .channels
            .ok_or_else(|| anyhow!("unknown channel layout"))?
            .count();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("create decoder")?;

        let info = StreamInfo {
            track_id: track.id,
            sample_rate,
            channels,
            duration_secs: duration_secs_from_codec_params(&codec_params),
            codec: codec_name_from_params(&codec_params),
        };

        Ok(Self {
            format,
            decoder,
            info,
            sample_buf: None,
            sample_spec: None,
        })
    }
}

impl MediaStream for SymphoniaStream {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        match self.format.next_packet() {
            Ok(packet) => Ok(Some(packet)),
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(None)
            }
            Err(e) => Err(anyhow!(e).context("read packet")),
        }
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<DecodedFrame>> {
        let decoded = match self.decoder.decode(packet) {
            Ok(d) => d,
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                return Ok(Vec::new());
            }
            Err(e) => return Err(anyhow!(e).context("decode packet")),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(Vec::new());
        }

        let needed = frames * spec.channels.count();
        let reuse = self.sample_spec == Some(spec)
            && self
                .sample_buf
                .as_ref()
                .is_some_and(|buf| buf.capacity() >= needed);
        if !reuse {
            self.sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            self.sample_spec = Some(spec);
        }
        let buf = self
            .sample_buf
            .as_mut()
            .ok_or_else(|| anyhow!("sample buffer missing"))?;
        buf.copy_interleaved_ref(decoded);

        Ok(vec![DecodedFrame {
            samples: buf.samples().to_vec(),
            channels: spec.channels.count(),
            sample_rate: spec.rate,
        }])
    }

    fn seek(&mut self, secs: f64) -> Result<f64> {
        if !secs.is_finite() {
            return Err(anyhow!("seek target {secs} is not a finite time"));
        }
        let secs = secs.max(0.0);
        let time = Time::new(secs.trunc() as u64, secs.fract());
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.info.track_id),
                },
            )
            .map_err(|e| anyhow!(e).context("seek"))?;

        let time_base = self
            .format
            .tracks()
            .iter()
            .find(|t| t.id == seeked.track_id)
            .and_then(|t| t.codec_params.time_base);
        let actual = match time_base {
            Some(tb) => {
                let t = tb.calc_time(seeked.actual_ts);
                t.seconds as f64 + t.frac
            }
            None => secs,
        };
        Ok(actual)
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }
}

/// Duration in seconds from codec metadata, when the container provides one.
pub fn duration_secs_from_codec_params(codec_params: &CodecParameters) -> Option<f64> {
    let frames = codec_params.n_frames?;
    if let Some(tb) = codec_params.time_base {
        let t = tb.calc_time(frames);
        return Some(t.seconds as f64 + t.frac);
    }
    let rate = codec_params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some(frames as f64 / rate as f64)
}

/// Best-effort codec label used for logs and status.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
