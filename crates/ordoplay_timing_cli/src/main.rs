// SPDX-License-Identifier: MIT OR Apache-2.0
//! `ordoplay-timing` - scenario runner for OrdoPlay timing.
//!
//! Plays a RON scenario on a simulated clock: a timing object backed by an
//! in-process provider, a converter chain stacked on it, and a sequencer
//! reporting cue transitions against the end of the chain.

mod error;
mod runner;
mod scenario;

use clap::Parser;
use error::CliError;
use scenario::Scenario;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "ordoplay-timing", version)]
struct Cli {
    /// Scenario file (RON).
    scenario: PathBuf,

    /// Print the report as JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Stop at this time instead of the scenario's own horizon.
    #[arg(long)]
    until: Option<f64>,
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ordoplay_timing=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = play(&cli) {
        tracing::error!("scenario failed: {e}");
        std::process::exit(1);
    }
}

fn play(cli: &Cli) -> Result<(), CliError> {
    let scenario = Scenario::load(&cli.scenario)?;
    tracing::info!(
        path = %cli.scenario.display(),
        cues = scenario.cues.len(),
        steps = scenario.steps.len(),
        "playing scenario"
    );

    let report = runner::run(&scenario, cli.until)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for entry in &report.entries {
        println!("{entry}");
    }
    println!("active at end: [{}]", report.active.join(", "));
    println!("position at end: {:.3}", report.position);
    Ok(())
}
