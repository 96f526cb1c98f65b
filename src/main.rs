use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rand::{SeedableRng, rngs::StdRng};
use tracing::info;

use appwatch::{
    config::Cli,
    feed::HttpFeed,
    notify::Notifier,
    shutdown, telemetry,
    watcher::{WatchOptions, run_watch},
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.config;

    let _telemetry = telemetry::init(&config.log_file, config.log_level)?;
    info!(
        version = appwatch::version::VERSION,
        endpoint = %config.endpoint,
        state_file = %config.state_file.display(),
        log_file = %config.log_file.display(),
        "starting appwatch"
    );

    let feed = HttpFeed::new(config.endpoint.clone(), config.request_timeout())
        .context("build http client")?;
    let opts = WatchOptions::from_config(&config);
    let mut notifier = Notifier::stdout(config.quiet);

    let (trigger, shutdown) = shutdown::channel();
    let _signals = shutdown::spawn_signal_listener(trigger);

    let exit = run_watch(
        &opts,
        &feed,
        &mut notifier,
        shutdown,
        StdRng::from_entropy(),
    )
    .await?;

    info!(?exit, "appwatch exiting");
    Ok(ExitCode::from(exit.exit_code()))
}
