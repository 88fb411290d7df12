mod cli;
mod pipeline;
mod stats;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Command, ProfileTarget};
use pipeline::Orchestrator;
use sense_config::{control, AppConfig};

const PROFILE_ITERATIONS: usize = 10;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(?err, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    if cli.use_websocket {
        config.relay.use_websocket = true;
    } else if cli.no_websocket {
        config.relay.use_websocket = false;
    }

    let control_path: PathBuf = cli.control.unwrap_or_else(control::default_path);

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, control_path).await,
        Command::Profile { target } => profile(config, control_path, target).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(?err, "sensed exited with an unrecoverable error");
            ExitCode::from(2)
        }
    }
}

async fn run(config: AppConfig, control_path: PathBuf) -> Result<()> {
    info!(url = %config.relay.url, websocket = config.relay.use_websocket, "starting sense pipeline");
    let orchestrator = Orchestrator::new(config, control_path).await?;
    orchestrator.run().await
}

async fn profile(config: AppConfig, control_path: PathBuf, target: ProfileTarget) -> Result<()> {
    let mut orchestrator = Orchestrator::new(config, control_path).await?;
    let result = match target {
        ProfileTarget::Capture => orchestrator.profile_capture(PROFILE_ITERATIONS).await?,
        ProfileTarget::Detection => orchestrator.profile_detection(PROFILE_ITERATIONS).await?,
        ProfileTarget::Ocr => orchestrator.profile_ocr(PROFILE_ITERATIONS).await?,
        ProfileTarget::E2e => orchestrator.profile_e2e(PROFILE_ITERATIONS).await?,
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sense_capture=debug"));

    fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_max_level(Level::TRACE)
        .init();
}
