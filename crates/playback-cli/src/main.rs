//! trackplay: play one local audio file through the playback engine.
//!
//! Prints progress once per second. With `--interactive` it also reads control
//! commands from stdin; Ctrl-C stops playback and exits.

mod cli;
mod commands;
mod config;

use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, select};
use playback_engine::{PlaybackState, PlaybackStatus, Player, Track};
use tracing_subscriber::EnvFilter;

use commands::Command;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,playback_engine=info")),
        )
        .init();

    if args.list_devices {
        return list_devices();
    }

    match &args.cmd {
        Some(cli::Command::Play {
            path,
            start_percent,
            interactive,
        }) => {
            let cfg = config::resolve(&args)?;
            play(cfg, path, *start_percent, *interactive)
        }
        None => Err(anyhow!("nothing to do; try `trackplay play <path>` or --list-devices")),
    }
}

fn list_devices() -> Result<()> {
    let devices = playback_engine::device::list_output_devices()?;
    if devices.is_empty() {
        println!("no output devices found");
    }
    for dev in devices {
        let marker = if dev.is_default { "*" } else { " " };
        println!(
            "{marker} {name} [{id}] {min}-{max} Hz",
            name = dev.name,
            id = dev.id,
            min = dev.min_rate,
            max = dev.max_rate,
        );
    }
    Ok(())
}

fn play(
    cfg: playback_engine::PlaybackConfig,
    path: &Path,
    start_percent: Option<i32>,
    interactive: bool,
) -> Result<()> {
    let player = Player::with_defaults(cfg);

    let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
    player.on_playback_finished(move || {
        let _ = done_tx.try_send(());
    });

    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded::<Command>();
    {
        let cmd_tx = cmd_tx.clone();
        ctrlc::set_handler(move || {
            let _ = cmd_tx.send(Command::Quit);
        })?;
    }
    if interactive {
        spawn_stdin_reader(cmd_tx);
        eprintln!("{}", commands::HELP);
    }

    player.play(&Track::new(path));
    if player.state() == PlaybackState::Stopped {
        return Err(anyhow!("could not start playback of {:?}", path));
    }
    if let Some(pct) = start_percent {
        player.seek_percent(pct);
    }

    run_loop(&player, &done_rx, &cmd_rx);

    let status = player.status();
    tracing::info!(
        end_reason = ?status.end_reason,
        underrun_events = status.underrun_events,
        "playback finished"
    );
    Ok(())
}

fn run_loop(player: &Player, done_rx: &Receiver<()>, cmd_rx: &Receiver<Command>) {
    let ticker = crossbeam_channel::tick(PROGRESS_INTERVAL);
    loop {
        select! {
            recv(done_rx) -> _ => {
                print_progress(&player.status());
                return;
            }
            recv(cmd_rx) -> msg => {
                let Ok(cmd) = msg else { continue };
                if !apply(player, cmd) {
                    return;
                }
            }
            recv(ticker) -> _ => {
                if player.state() != PlaybackState::Stopped {
                    print_progress(&player.status());
                }
            }
        }
    }
}

/// Returns false when the loop should exit.
fn apply(player: &Player, cmd: Command) -> bool {
    match cmd {
        Command::Pause => player.pause(),
        Command::Resume => player.resume(),
        Command::Seek(secs) => match player.seek(secs) {
            Some(target) => tracing::info!(target_secs = target, "seek"),
            None => tracing::warn!("nothing to seek"),
        },
        Command::SeekPercent(pct) => match player.seek_percent(pct) {
            Some(applied) => tracing::info!(percent = applied, "seek"),
            None => tracing::warn!("nothing to seek"),
        },
        Command::Status => print_progress(&player.status()),
        Command::Stop | Command::Quit => {
            player.stop();
            return false;
        }
    }
    true
}

fn spawn_stdin_reader(tx: Sender<Command>) {
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{e}; {}", commands::HELP),
                }
            }
        })
        .map(|_| ())
        .unwrap_or_else(|e| tracing::warn!("stdin reader failed to start: {e}"));
}

fn print_progress(status: &PlaybackStatus) {
    println!(
        "[{state:>7}] {pos} / {dur} ({pct:>3}%) buffered {buf}/{cap} underruns {under}",
        state = status.state.as_str(),
        pos = format_ms(status.position_ms),
        dur = format_ms(status.duration_ms),
        pct = status.position_percent,
        buf = status.buffered_chunks,
        cap = status.queue_capacity,
        under = status.underrun_events,
    );
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}.{:01}", secs / 60, secs % 60, (ms % 1000) / 100)
}
