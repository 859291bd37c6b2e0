extern crate anyhow;
extern crate clap;
extern crate na_core;
extern crate na_discrete_filtering as na_df;
extern crate ndarray as nd;
extern crate rand;
extern crate rand_isaac;
extern crate tracing;
extern crate tracing_subscriber;
extern crate util;

use anyhow::{Context, Result};
use clap::Parser;
use rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use tracing::{info, warn};

use util::config::Config;
use util::progress::CycleProgress;
use util::CycleHistory;

use std::io::{self, Write};
use std::path::PathBuf;

mod products;
mod twin;

use products::OutputProduct;
use twin::TwinExperiment;

/// Runs an observing-system twin experiment through the dust assimilation
/// cycle.
#[derive(Parser, Debug)]
#[command(name = "assimilate", version)]
struct Cli {
  /// TOML configuration; built-in defaults when omitted.
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Overrides `twin.cycles`.
  #[arg(long)]
  cycles: Option<usize>,

  /// Overrides `seed`.
  #[arg(long)]
  seed: Option<u64>,

  /// Products written to stdout after every cycle.
  #[arg(short, long, value_enum)]
  product: Vec<OutputProduct>,

  /// Print the effective configuration as TOML and exit.
  #[arg(long)]
  print_config: bool,

  /// Hide the progress bar.
  #[arg(short, long)]
  quiet: bool,

  /// Enable verbose logging
  #[arg(short, long)]
  verbose: bool,
}

fn load_config(cli: &Cli) -> Result<Config> {
  let mut config = match cli.config {
    Some(ref path) => Config::load(path)
      .with_context(|| format!("loading {}", path.display()))?,
    None => Config::default(),
  };
  if let Some(cycles) = cli.cycles {
    config.twin.cycles = cycles;
  }
  if let Some(seed) = cli.seed {
    config.seed = seed;
  }
  config.validate()
    .context("invalid configuration")?;
  Ok(config)
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
    )
    .with_target(false)
    .with_writer(io::stderr)
    .init();

  let config = load_config(&cli)?;
  if cli.print_config {
    print!("{}", config.to_toml_string()?);
    return Ok(());
  }

  let mut runner = config.runner()?;
  let mut twin = TwinExperiment::new(&config)
    .context("seeding the twin experiment")?;
  let mut rand = Isaac64Rng::seed_from_u64(config.seed);

  let cycles = config.twin.cycles;
  let interval = config.twin.interval;
  let mut progress = CycleProgress::new(cycles, !cli.quiet);
  let mut history = CycleHistory::new(cycles);
  let stdout = io::stdout();
  let mut out = stdout.lock();

  for c in 0..cycles {
    let time = c as u64 * interval;
    twin.observe(time)?;
    let outcome = runner.run(twin.store(), twin.source(), time, &mut rand)
      .with_context(|| format!("cycle at t={}", time))?;

    for failed in outcome.failed_stages() {
      warn!(stage = %failed.name, status = %failed.status, "stage failed");
    }
    for product in cli.product.iter() {
      product.emit(&mut out, time, &outcome)?;
    }
    out.flush()?;

    let r = history.record(time, &outcome, twin.truth());
    info!(time, prior_error = r.prior_error, posterior_error = r.posterior_error,
          spread = r.spread, "cycle complete");
    progress.cycle_finished(&outcome);

    if c + 1 < cycles {
      twin.advance(time, time + interval)?;
    }
  }
  progress.finish();

  info!(cycles = history.len(), improved = history.improved(),
        cached_localizations = runner.localization_cache().len(),
        "twin experiment finished");
  Ok(())
}
