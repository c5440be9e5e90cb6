//! eventgrid command line tool
//!
//! Generates the job list, builds per-unit inputs and inspects the
//! resulting artifacts.
//!
//! # Usage
//!
//! ```bash
//! eventgrid --config eventgrid.toml check-config
//! eventgrid --config eventgrid.toml make-args
//! eventgrid --config eventgrid.toml make-input
//! eventgrid --config eventgrid.toml show-event --job core_20200101 --id 3 --detail
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use eventgrid::config::Config;
use eventgrid::input::{load_unit_output, process_unit};
use eventgrid::jobs::{ArtifactLayout, JobList};
use eventgrid::source::{load_json_lines, LoaderSet, SourceMap};
use eventgrid::telemetry::init_tracing;
use eventgrid::types::format_timestamp;

/// Lines shown before and after the `...` marker by `show-event --detail`
const DETAIL_HEAD: usize = 5;
const DETAIL_FOOT: usize = 5;

/// Command-line interface for eventgrid
#[derive(Parser)]
#[command(name = "eventgrid")]
#[command(version)]
#[command(about = "Event discretization and job partitioning for log analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the artifact root directory
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and print a summary
    CheckConfig,

    /// Generate the job list and write it to the args file
    MakeArgs,

    /// Print the job list
    ShowArgs,

    /// Build the discretized input of every unit (or of one)
    MakeInput {
        /// Only process this unit
        #[arg(short, long)]
        job: Option<String>,
    },

    /// Describe one registered event of a unit
    ShowEvent {
        /// Unit name
        #[arg(short, long)]
        job: String,

        /// Event identifier
        #[arg(short, long)]
        id: u32,

        /// Also print the raw samples
        #[arg(short, long)]
        detail: bool,
    },
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.output_dir {
        config.jobs.output_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn load_sources(config: &Config) -> Result<SourceMap, Box<dyn std::error::Error>> {
    let path = config
        .source
        .data_file
        .as_ref()
        .ok_or("no [source] data_file configured")?;
    Ok(load_json_lines(path)?)
}

/// Print configuration summary
fn cmd_check_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Configuration is valid.");
    println!();
    println!("Jobs:");
    match &config.jobs.whole_term {
        Some(term) => println!("  Whole term: {} .. {}", term.start, term.end),
        None => println!("  Whole term: (not set)"),
    }
    println!("  Unit term: {:?}", config.jobs.unit_term);
    println!("  Unit diff: {:?}", config.jobs.unit_diff);
    println!("  Areas: {}", config.jobs.areas.join(", "));
    println!("  Output directory: {}", config.jobs.output_dir.display());
    for (area, hosts) in &config.jobs.area_def {
        println!("  Area {}: {}", area, hosts.join(", "));
    }
    println!();
    println!("Discretize:");
    println!("  Method: {}", config.discretize.method);
    println!("  Bin size: {:?}", config.discretize.bin_size);
    println!("  Bin diff: {:?}", config.discretize.bin_diff);
    println!("  Aggregation: {}", config.discretize.aggregation);
    println!("  Binarize: {}", config.discretize.binarize);
    println!();
    println!("Filter:");
    if config.filter.rules.is_empty() {
        println!("  Rules: (none)");
    } else {
        println!("  Rules: {}", config.filter.rules.join(" -> "));
    }
    println!();
    println!("Source:");
    println!("  Kinds: {}", config.source.kinds.join(", "));
    match &config.source.data_file {
        Some(path) => println!("  Data file: {}", path.display()),
        None => println!("  Data file: (not set)"),
    }
    Ok(())
}

fn cmd_make_args(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let sources = load_sources(config)?;
    let loaders = LoaderSet::from_config(config, &sources)?;
    let layout = ArtifactLayout::from_config(&config.jobs);

    let jobs = JobList::from_config(config, &loaders)?;
    layout.ensure_root()?;
    jobs.dump(&layout.args_path())?;

    println!(
        "{} units written to {}",
        jobs.len(),
        layout.args_path().display()
    );
    Ok(())
}

fn cmd_show_args(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let layout = ArtifactLayout::from_config(&config.jobs);
    let jobs = JobList::load(&layout.args_path(), config.jobs.unit_term)?;
    println!("{}", jobs.show());
    Ok(())
}

fn cmd_make_input(config: &Config, job: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let sources = load_sources(config)?;
    let loaders = LoaderSet::from_config(config, &sources)?;
    let layout = ArtifactLayout::from_config(&config.jobs);
    let jobs = JobList::load(&layout.args_path(), config.jobs.unit_term)?;

    let units: Vec<_> = match job {
        Some(name) => vec![jobs
            .find(name)
            .ok_or_else(|| format!("unknown job {}", name))?],
        None => jobs.iter().collect(),
    };

    let mut failed = 0;
    for unit in units {
        match process_unit(config, &loaders, &layout, unit) {
            Ok(summary) => println!(
                "{}: {} events, {} rows",
                summary.name, summary.events, summary.rows
            ),
            Err(e) => {
                error!(unit = %unit.name(), error = %e, "unit failed");
                failed += 1;
            },
        }
    }

    if failed > 0 {
        return Err(format!("{} units failed", failed).into());
    }
    Ok(())
}

fn cmd_show_event(
    config: &Config,
    job: &str,
    id: u32,
    detail: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let layout = ArtifactLayout::from_config(&config.jobs);
    let jobs = JobList::load(&layout.args_path(), config.jobs.unit_term)?;
    let unit = jobs
        .find(job)
        .ok_or_else(|| format!("unknown job {}", job))?;

    let (table, registry) = load_unit_output(&layout, unit)?;
    let descriptor = registry.lookup_by_id(id)?;

    println!("Event {} in {}", id, unit.name());
    println!("  Descriptor: {}", descriptor);
    println!(
        "  Range: {} .. {}",
        format_timestamp(unit.range.start),
        format_timestamp(unit.range.end)
    );
    if let Some(sum) = table.column_sum(id) {
        println!("  Active bins: {} / {}", sum, table.n_rows());
    }

    let sources = load_sources(config)?;
    let loaders = LoaderSet::from_config(config, &sources)?;
    println!("  Instruction: {}", loaders.instruction(descriptor)?);
    if detail {
        println!();
        println!(
            "{}",
            loaders.detail(descriptor, &unit.range, DETAIL_HEAD, DETAIL_FOOT)?
        );
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_tracing(&config.monitoring)?;
    info!(command = ?std::env::args().nth(1), "eventgrid starting");

    match &cli.command {
        Commands::CheckConfig => cmd_check_config(&config),
        Commands::MakeArgs => cmd_make_args(&config),
        Commands::ShowArgs => cmd_show_args(&config),
        Commands::MakeInput { job } => cmd_make_input(&config, job.as_deref()),
        Commands::ShowEvent { job, id, detail } => cmd_show_event(&config, job, *id, *detail),
    }
}
