//! quicken CLI
//!
//! Runs the canned workloads under the adaptive interpreter and shows what
//! the specializer did to them.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use quicken::workloads::{self, Workload};
use quicken::{AdaptiveConfig, ExecMode, Value, Vm, VERSION};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quicken")]
#[command(author, version, about = "An adaptive, self-specializing bytecode interpreter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file; missing fields take defaults
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload and print specialization statistics
    Run {
        /// Workload name (see `list`)
        workload: String,
        /// Loop iterations (or fibonacci argument for `recursion`)
        #[arg(short = 'n', long, default_value_t = 1000)]
        iterations: u32,
        /// Number of times to run the workload
        #[arg(short, long, default_value_t = 1)]
        repeat: u32,
        /// Execute in tracing mode: no quickening, no rewriting
        #[arg(long)]
        trace: bool,
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Disassemble a workload, before and after running it
    Disasm {
        workload: String,
        #[arg(short = 'n', long, default_value_t = 100)]
        iterations: u32,
    },

    /// Run a workload and list the state of every family site
    Sites {
        workload: String,
        #[arg(short = 'n', long, default_value_t = 1000)]
        iterations: u32,
        /// Print sites as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON
    Config,

    /// List available workloads
    List,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    setup_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => AdaptiveConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AdaptiveConfig::default(),
    };

    match cli.command {
        Commands::Run {
            workload,
            iterations,
            repeat,
            trace,
            json,
        } => {
            let config = if trace {
                config.with_mode(ExecMode::Tracing)
            } else {
                config
            };
            run_workload(&workload, iterations, repeat, config, json)
        }
        Commands::Disasm {
            workload,
            iterations,
        } => disassemble(&workload, iterations, config),
        Commands::Sites {
            workload,
            iterations,
            json,
        } => show_sites(&workload, iterations, config, json),
        Commands::Config => {
            println!("{}", config.to_json());
            Ok(())
        }
        Commands::List => {
            for name in workloads::NAMES {
                let workload = workloads::by_name(name, 1)?;
                println!("{:<16} {}", name, workload.description);
            }
            Ok(())
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn", // Default: warnings and errors only
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load(name: &str, iterations: u32) -> anyhow::Result<Workload> {
    workloads::by_name(name, iterations).with_context(|| format!("building workload '{}'", name))
}

fn execute(vm: &mut Vm, workload: &Workload) -> anyhow::Result<Value> {
    vm.run(&workload.code, &workload.globals)
        .with_context(|| format!("running workload '{}'", workload.name))
}

fn run_workload(
    name: &str,
    iterations: u32,
    repeat: u32,
    config: AdaptiveConfig,
    json: bool,
) -> anyhow::Result<()> {
    let workload = load(name, iterations)?;
    let mut vm = Vm::with_config(config)?;

    let start = Instant::now();
    let mut result = Value::None;
    for run in 0..repeat.max(1) {
        result = execute(&mut vm, &workload)?;
        if run == 0 && result != workload.expected {
            bail!(
                "workload '{}' returned {} but {} was expected",
                name,
                result,
                workload.expected
            );
        }
    }
    let elapsed = start.elapsed();

    if json {
        println!("{}", vm.stats().to_json());
        return Ok(());
    }
    println!("quicken {} | {} ({:?} mode)", VERSION, name, vm.mode());
    println!("result: {}", result);
    println!("time:   {:.2?} for {} run(s)", elapsed, repeat.max(1));
    println!();
    print!("{}", vm.stats());
    Ok(())
}

fn disassemble(name: &str, iterations: u32, config: AdaptiveConfig) -> anyhow::Result<()> {
    let workload = load(name, iterations)?;
    print!("{}", workload.code.disassemble());

    let mut vm = Vm::with_config(config)?;
    execute(&mut vm, &workload)?;
    println!();
    match workload.code.quickened() {
        Some(quick) => print!("{}", quick.disassemble(&workload.code)),
        None => println!("(not quickened after one run)"),
    }
    Ok(())
}

fn show_sites(name: &str, iterations: u32, config: AdaptiveConfig, json: bool) -> anyhow::Result<()> {
    let workload = load(name, iterations)?;
    let mut vm = Vm::with_config(config)?;
    execute(&mut vm, &workload)?;

    let Some(quick) = workload.code.quickened() else {
        println!("{} was not quickened", workload.code.name());
        return Ok(());
    };
    let sites = quick.sites();
    if json {
        println!("{}", serde_json::to_string_pretty(&sites)?);
    } else {
        println!("== {} ==", workload.code.name());
        for site in &sites {
            println!("{}", site);
        }
    }
    Ok(())
}
