//! CLI Entry Point for rf-bench
//!
//! Provides command-line access to the bench:
//! - Running the automated test sequence (real or simulated instruments)
//! - Resolving a power supply identification string to its command dialect
//! - Checking setup files and printing the effective configuration
//!
//! # Usage
//!
//! Run a simulated test with a setup file:
//! ```bash
//! rf-bench run --simulate --setup setups/pa_2g4.txt
//! ```
//!
//! Pair and ramp two outputs before the sequence:
//! ```bash
//! rf-bench run --config config/rf_bench.toml --pair "PS1 Output1,PS2 Output2" --activate-pairs
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rf_bench::bench::OutputId;
use rf_bench::config::{BenchConfig, DEFAULT_CONFIG_PATH};
use rf_bench::hardware::psu::resolve;
use rf_bench::logging::{self, OutputFormat, TracingConfig};
use rf_bench::sequence::{SequenceEventKind, SequenceState};
use rf_bench::setup::TestConfig;
use rf_bench::Workbench;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "rf-bench")]
#[command(about = "RF amplifier bench bias pairing and test sequencing", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the automated test sequence once
    Run {
        /// Setup file (KEY=value lines)
        #[arg(long)]
        setup: Option<PathBuf>,

        /// Role file (<supply>_<output>_<role> lines)
        #[arg(long)]
        roles: Option<PathBuf>,

        /// Use simulated instruments instead of the configured addresses
        #[arg(long)]
        simulate: bool,

        /// Pair a gate with a drain before running, e.g. "PS1 Output1,PS2 Output2"
        #[arg(long = "pair", value_name = "GATE,DRAIN")]
        pairs: Vec<String>,

        /// Ramp every pairing up before running the sequence
        #[arg(long)]
        activate_pairs: bool,

        /// Print sequence events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Resolve a *IDN? reply to a supply dialect
    Identify {
        /// Identification string
        idn: String,
    },

    /// Parse a setup file and print its values
    CheckSetup {
        /// Setup file
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            setup,
            roles,
            simulate,
            pairs,
            activate_pairs,
            json,
        } => {
            let options = RunOptions {
                setup,
                roles,
                simulate,
                pairs,
                activate_pairs,
                json,
            };
            run_sequence(cli.config, options).await
        }
        Commands::Identify { idn } => identify(&idn),
        Commands::CheckSetup { file } => check_setup(file),
        Commands::PrintConfig => print_config(cli.config),
    }
}

struct RunOptions {
    setup: Option<PathBuf>,
    roles: Option<PathBuf>,
    simulate: bool,
    pairs: Vec<String>,
    activate_pairs: bool,
    json: bool,
}

fn parse_pair(spec: &str) -> Result<(OutputId, OutputId)> {
    let (gate, drain) = spec
        .split_once(',')
        .ok_or_else(|| anyhow!("pair '{spec}' must be GATE,DRAIN"))?;
    Ok((gate.parse()?, drain.parse()?))
}

async fn run_sequence(config_path: PathBuf, options: RunOptions) -> Result<()> {
    let config = BenchConfig::load_from(&config_path)?;
    let format = if options.json {
        OutputFormat::Json
    } else {
        OutputFormat::Compact
    };
    logging::init(TracingConfig::from_bench_config(&config)?.with_format(format))?;

    let bench = Workbench::new(config)?;

    if let Some(path) = &options.roles {
        let applied = bench
            .load_roles(path)
            .await
            .with_context(|| format!("role file {}", path.display()))?;
        println!("Applied {applied} role line(s) from {}", path.display());
    }

    let _simulated = if options.simulate {
        println!("Attaching simulated instruments");
        Some(bench.connect_simulated().await?)
    } else {
        let report = bench.connect_all().await;
        println!("{}", report.summary());
        for outcome in report.failures() {
            eprintln!("  {outcome}");
        }
        None
    };

    let setup = match &options.setup {
        Some(path) => Some(
            TestConfig::load(path).with_context(|| format!("setup file {}", path.display()))?,
        ),
        None => None,
    };

    for spec in &options.pairs {
        let (gate, drain) = parse_pair(spec)?;
        let pairing = bench.pair(&gate, &drain).await?;
        println!("Paired {pairing}");
    }

    if options.activate_pairs {
        if let Some(setup) = &setup {
            bench.apply_bias_targets(setup).await?;
        }
        let report = bench.activate_all().await;
        println!("{}", report.summary());
        for outcome in report.failures() {
            eprintln!("  {outcome}");
        }
    }

    let mut events = bench.runner().subscribe();
    let run_id = bench
        .run(setup)
        .ok_or_else(|| anyhow!("a sequence is already running"))?;
    println!("Run {run_id} started (Ctrl+C stops at the next step)");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stopping = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if options.json {
                        println!("{}", serde_json::to_string(&event)?);
                    } else if let SequenceEventKind::Log(line) = &event.kind {
                        println!("[{}] {line}", event.timestamp.format("%H:%M:%S%.3f"));
                    }
                    if matches!(event.kind, SequenceEventKind::Finished(_)) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    eprintln!("({missed} event(s) dropped)");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c, if !stopping => {
                stopping = true;
                bench.stop();
            }
        }
    }

    let report = bench
        .wait()
        .await
        .ok_or_else(|| anyhow!("run {run_id} produced no report"))?;
    if options.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!(
            "Run finished: {} ({} of 6 steps)",
            report.final_state,
            report.completed_steps.len()
        );
    }

    match (report.final_state, report.error) {
        (SequenceState::Error, Some(message)) => Err(anyhow!("sequence failed: {message}")),
        (SequenceState::Error, None) => Err(anyhow!("sequence failed")),
        _ => Ok(()),
    }
}

fn identify(idn: &str) -> Result<()> {
    let dialect = resolve(idn)?;
    println!("{dialect}");
    if dialect.selects_channel() {
        println!("  channel selection: INST:SEL before every command");
    } else {
        println!("  channel selection: none");
    }
    Ok(())
}

fn check_setup(file: PathBuf) -> Result<()> {
    let setup = TestConfig::load(&file)?;
    println!("{}: {} value(s)", file.display(), setup.len());
    for (key, value) in setup.iter() {
        println!("  {key} = {value}");
    }
    Ok(())
}

fn print_config(path: PathBuf) -> Result<()> {
    let config = BenchConfig::load_from(&path)?;
    config.validate()?;
    print!("{}", config.to_toml()?);
    Ok(())
}
