use std::path::Path;

use anyhow::{Context, Result};
use playback_engine::PlaybackConfig;

use crate::cli::Args;

/// Read playback tuning from a TOML file.
pub fn load(path: &Path) -> Result<PlaybackConfig> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
    toml::from_str::<PlaybackConfig>(&raw).with_context(|| format!("parse config {:?}", path))
}

/// File settings (or defaults) with command-line flags applied on top.
pub fn resolve(args: &Args) -> Result<PlaybackConfig> {
    let mut cfg = match args.config.as_deref() {
        Some(path) => load(path)?,
        None => PlaybackConfig::default(),
    };
    if let Some(device) = args.device.as_ref() {
        cfg.device = Some(device.clone());
    }
    if let Some(capacity) = args.queue_capacity {
        cfg.queue_capacity = capacity;
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackplay.toml");
        std::fs::write(&path, "queue_capacity = 12\nunderrun_wait_ms = 20\ndevice = \"HDMI\"\n")
            .unwrap();

        let args = Args::parse_from([
            "trackplay",
            "--config",
            path.to_str().unwrap(),
            "--device",
            "USB",
        ]);
        let cfg = resolve(&args).unwrap();
        assert_eq!(cfg.device.as_deref(), Some("USB"));
        assert_eq!(cfg.queue_capacity, 12);
        assert_eq!(cfg.underrun_wait_ms, 20);
    }

    #[test]
    fn defaults_without_file() {
        let args = Args::parse_from(["trackplay", "--queue-capacity", "4"]);
        let cfg = resolve(&args).unwrap();
        assert_eq!(cfg.queue_capacity, 4);
        assert_eq!(cfg.resample_chunk_frames, 1024);
    }

    #[test]
    fn bad_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "queue_capacity = \"many\"").unwrap();
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse config"));
    }
}
