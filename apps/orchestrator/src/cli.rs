//! Command-line surface: `run` (default) drives the pipeline forever;
//! `profile` times a single stage in isolation and exits.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sensed", about = "Frame-to-event ambient perception pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// JSON config override file, deep-merged over built-in defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Control file polled once per tick to pause/resume the pipeline.
    #[arg(long, global = true)]
    pub control: Option<PathBuf>,

    /// Force the WebSocket relay transport, overriding config.
    #[arg(long, global = true)]
    pub use_websocket: bool,

    /// Force the HTTP fallback transport, overriding config.
    #[arg(long, global = true, conflicts_with = "use_websocket")]
    pub no_websocket: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the capture-to-egress loop until interrupted.
    Run,
    /// Time a single stage in isolation against synthetic input and print
    /// the result, without starting the full pipeline.
    Profile {
        #[arg(value_enum)]
        target: ProfileTarget,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ProfileTarget {
    Capture,
    Detection,
    Ocr,
    E2e,
}
