//! effectd - command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use effectd::config::Config;
use effectd::event::{Event, EventBus};
use effectd::processor::Processor;

/// effectd - realtime audio effects host.
#[derive(Parser, Debug)]
#[command(name = "effectd")]
#[command(about = "Loads plugins, wires them into chains, and drives them from JACK", long_about = None)]
struct Args {
    /// Path to the YAML configuration document.
    config: PathBuf,

    /// Minimum log level to emit.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Parse the configuration, load every plugin, and build every chain,
    /// then exit without opening the audio server.
    #[arg(short = 'n', long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&args.log_level),
    )
    .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    let event_bus = Arc::new(EventBus::new());
    let (processor, audio_client) = Processor::build(&config, Arc::clone(&event_bus))
        .context("building processor from configuration")?;

    if args.dry_run {
        info!("dry run: configuration and plugins loaded successfully, not starting audio");
        return Ok(());
    }

    let (processor, active_client) = processor
        .start(audio_client)
        .context("starting processor")?;

    let exit_code = supervise(&processor, &active_client, &event_bus);
    active_client
        .deactivate()
        .context("deactivating audio client")?;
    exit_code
}

/// Drains the event bus until a terminal event (`Fatal`, `AudioStopped`, or
/// `Closed`) arrives, re-running auto-connect on every client-registration
/// change in between.
fn supervise(
    processor: &Processor,
    active_client: &effectd::audio_server::ActiveAudioServerClient,
    event_bus: &EventBus,
) -> Result<()> {
    loop {
        match event_bus.recv() {
            Event::AudioStarted => info!("audio started"),
            Event::AudioProcessed => {}
            Event::AudioClientChange => processor.reconnect(active_client),
            Event::AudioStopped => {
                info!("audio stopped");
                return Ok(());
            }
            Event::Fatal(reason) => {
                return Err(anyhow::anyhow!("unrecoverable audio server condition: {}", reason));
            }
            Event::Closed => return Ok(()),
        }
    }
}
