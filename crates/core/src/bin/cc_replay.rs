use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;

use anyhow::Context;
use beliefcc::cc::ControlLaw;
use beliefcc::config::{load_belief_config, set_logger};
use beliefcc::replay;
use clap::Parser;

/// Replay a JSON-lines event trace through the belief controller.
#[derive(Debug, Parser)]
#[command(version, about)]
struct ReplayCliConfig {
    /// Trace file, one event per line.
    trace: PathBuf,

    /// Controller config (TOML). Missing keys keep their defaults.
    #[arg(long, env = "BELIEFCC_CONFIG")]
    config: Option<PathBuf>,

    /// Override the control law from the config file.
    #[arg(long, value_enum)]
    law: Option<ControlLaw>,

    /// Only print the final stats line.
    #[arg(long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    set_logger(None);
    let cli = ReplayCliConfig::parse();

    let config = load_belief_config(cli.config.as_deref(), cli.law)
        .context("failed to load controller config")?;
    let file = File::open(&cli.trace)
        .with_context(|| format!("failed to open trace {}", cli.trace.display()))?;
    let events = replay::parse_trace(BufReader::new(file))?;
    tracing::info!(events = events.len(), law = %config.control_law, "Replaying trace");

    let mut controller = config.build()?;
    let steps = replay::run(&mut controller, events);
    controller.close();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if !cli.quiet {
        for step in &steps {
            serde_json::to_writer(&mut out, step)?;
            writeln!(out)?;
        }
    }
    writeln!(out, "{}", controller.stats())?;
    Ok(())
}
