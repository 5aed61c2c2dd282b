use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "kdfprobe")]
#[command(about = "Fan out scrypt workloads per HTTP request and record trace regions")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Release freed heap memory after each key derivation
    #[arg(long)]
    pub force: bool,

    /// Invocations launched per request
    #[arg(long, short = 'n', default_value = "1")]
    pub count: usize,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub addr: String,

    /// Output trace database path
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Do not record trace regions
    #[arg(long)]
    pub no_trace: bool,

    /// Trace flush interval
    #[arg(long, short = 'i', default_value = "1s", value_parser = parse_duration)]
    pub interval: Duration,

    /// Serving duration (default: until Ctrl-C)
    #[arg(long, short = 'd', value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summarize region durations from a recorded trace
    Regions {
        /// Trace database file
        file: PathBuf,

        /// Break the summary down by invocation origin
        #[arg(long)]
        by_origin: bool,

        /// Output as JSON
        #[arg(long, conflicts_with = "csv")]
        json: bool,

        /// Output as CSV
        #[arg(long)]
        csv: bool,
    },

    /// List saved trace databases
    List {
        /// Directory to search (defaults to current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Bare number as seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(format!(
        "Invalid duration '{}'. Examples: 500ms, 30s, 5m, 1h30m, 90",
        s
    ))
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if self.count == 0 {
            return Err("Invocation count must be at least 1".to_string());
        }

        if self.interval.is_zero() {
            return Err("Flush interval must be greater than zero".to_string());
        }

        if self.no_trace && self.output.is_some() {
            return Err("--output has no effect with --no-trace".to_string());
        }

        Ok(())
    }
}
