use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "trackplay", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Frame queue capacity in decoded chunks
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Optional TOML file with playback tuning
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file until it ends or is stopped
    Play {
        /// Path to an audio file
        path: PathBuf,

        /// Seek to this percentage of the track right after starting
        #[arg(long)]
        start_percent: Option<i32>,

        /// Read commands from stdin (pause, resume, seek <secs>, pct <n>, stop, quit)
        #[arg(long)]
        interactive: bool,
    },
}
