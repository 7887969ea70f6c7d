use anyhow::{Result, anyhow};

/// Control command read from stdin (or raised by the signal handler).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    Seek(f64),
    SeekPercent(i32),
    Status,
    Stop,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| anyhow!("empty command"))?
            .to_ascii_lowercase();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(anyhow!("too many arguments for {verb}"));
        }

        let cmd = match (verb.as_str(), arg) {
            ("pause" | "p", None) => Command::Pause,
            ("resume" | "r", None) => Command::Resume,
            ("status" | "s", None) => Command::Status,
            ("stop", None) => Command::Stop,
            ("quit" | "q" | "exit", None) => Command::Quit,
            ("seek", Some(secs)) => Command::Seek(
                secs.parse()
                    .map_err(|_| anyhow!("seek expects seconds, got {secs:?}"))?,
            ),
            ("pct" | "percent", Some(pct)) => Command::SeekPercent(
                pct.trim_end_matches('%')
                    .parse()
                    .map_err(|_| anyhow!("pct expects an integer, got {pct:?}"))?,
            ),
            (verb, _) => return Err(anyhow!("unknown command {verb:?}")),
        };
        Ok(cmd)
    }
}

pub const HELP: &str = "commands: pause | resume | seek <secs> | pct <n> | status | stop | quit";
