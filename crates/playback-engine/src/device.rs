//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - choosing a stream config close to the source sample rate

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive),
/// or the host default device when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .ok()
                    .map(|n| matches_device_name(n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the output config for `target_rate`.
///
/// An exact rate match wins. Otherwise prefer the highest supported rate below
/// the target, then the lowest rate above it; ties go to the better sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: Option<u32>,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in device.supported_output_configs()? {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            exact: target_rate == Some(rate),
            below: target_rate.map(|t| rate <= t).unwrap_or(true),
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((current, _)) => candidate.is_better_than(current, target_rate),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Prefer a fixed buffer size when the device advertises a range.
///
/// Returns `None` when only the host default is available.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 4096;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Candidate {
    exact: bool,
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, best: &Candidate, target_rate: Option<u32>) -> bool {
        if self.exact != best.exact {
            return self.exact;
        }
        if self.below != best.below {
            return self.below;
        }
        if self.rate != best.rate {
            // Below the target: closer means higher. Above it: closer means lower.
            return match target_rate {
                Some(_) if !self.below => self.rate < best.rate,
                _ => self.rate > best.rate,
            };
        }
        self.format_rank < best.format_rank
    }
}

fn pick_rate_for_range(min: u32, max: u32, target_rate: Option<u32>) -> u32 {
    match target_rate {
        Some(target) => target.clamp(min, max.max(min)),
        None => max,
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Output device metadata for `--list-devices`.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub is_default: bool,
}

/// Enumerate output devices of the default host.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());

    let mut out = Vec::new();
    for d in host.output_devices().context("No output devices")? {
        let name = match d.description() {
            Ok(desc) => desc.name().to_string(),
            Err(e) => {
                tracing::debug!("skipping unnamed device: {e}");
                continue;
            }
        };

        let (mut min_rate, mut max_rate) = (u32::MAX, 0u32);
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                min_rate = min_rate.min(r.min_sample_rate());
                max_rate = max_rate.max(r.max_sample_rate());
            }
        }
        if max_rate == 0 || max_rate < min_rate {
            match d.default_output_config() {
                Ok(cfg) => {
                    min_rate = cfg.sample_rate();
                    max_rate = cfg.sample_rate();
                }
                Err(_) => {
                    tracing::warn!(device = %name, "skipping device with no usable sample rate");
                    continue;
                }
            }
        }

        let id = d
            .id()
            .map(|id| id.to_string())
            .unwrap_or_else(|_| hash_device_id(&name, min_rate, max_rate));
        out.push(DeviceInfo {
            id,
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

fn hash_device_id(name: &str, min_rate: u32, max_rate: u32) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    let input = format!("{name}|{min_rate}|{max_rate}");
    for b in input.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(rate: u32, rank: u8, target: Option<u32>) -> Candidate {
        Candidate {
            exact: target == Some(rate),
            below: target.map(|t| rate <= t).unwrap_or(true),
            rate,
            format_rank: rank,
        }
    }

    #[test]
    fn hash_device_id_depends_on_inputs() {
        assert_eq!(
            hash_device_id("Device", 44_100, 96_000),
            hash_device_id("Device", 44_100, 96_000)
        );
        assert_ne!(
            hash_device_id("Device", 44_100, 96_000),
            hash_device_id("Other", 44_100, 96_000)
        );
    }

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", " USB "));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn pick_rate_for_range_clamps_to_range() {
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(48_000)), 48_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(22_050)), 44_100);
        assert_eq!(pick_rate_for_range(44_100, 96_000, Some(192_000)), 96_000);
        assert_eq!(pick_rate_for_range(44_100, 96_000, None), 96_000);
    }

    #[test]
    fn exact_rate_beats_better_format() {
        let target = Some(44_100);
        let exact_i16 = candidate(44_100, 2, target);
        let near_f32 = candidate(48_000, 0, target);
        assert!(exact_i16.is_better_than(&near_f32, target));
        assert!(!near_f32.is_better_than(&exact_i16, target));
    }

    #[test]
    fn below_target_prefers_closest_rate() {
        let target = Some(96_000);
        assert!(candidate(48_000, 0, target).is_better_than(&candidate(44_100, 0, target), target));
        assert!(candidate(44_100, 0, target).is_better_than(&candidate(192_000, 0, target), target));
    }

    #[test]
    fn above_target_prefers_lowest_rate() {
        let target = Some(22_050);
        assert!(candidate(44_100, 0, target).is_better_than(&candidate(48_000, 0, target), target));
    }

    #[test]
    fn same_rate_prefers_float_format() {
        let target = Some(48_000);
        assert!(candidate(48_000, 0, target).is_better_than(&candidate(48_000, 2, target), target));
    }
}
