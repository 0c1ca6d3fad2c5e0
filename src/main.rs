use anyhow::{Context, Result};
use clap::builder::TypedValueParser;
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use exifsort::config::RunConfig;
use exifsort::interrupt;
use exifsort::naming::Mode;
use exifsort::pattern::{FilePattern, PatternSet};
use exifsort::pool::{RunSummary, DEFAULT_WORKERS};
use exifsort::session::EngineCommand;

#[derive(Parser)]
#[command(name = "exifsort")]
#[command(version)]
#[command(about = "Rename or partition image and video files by capture timestamp")]
#[command(long_about = "Organizes files using the timestamps exiftool reports for them. Each worker keeps one exiftool process open in stay-open mode.

rename:    <dir>/photo.CR2 -> <dir>/2023-05-10T142201.500-0700.CR2
partition: <dir>/photo.CR2 -> <dir>/2023-05-10/photo.CR2

Timestamps come from SubSecDateTimeOriginal, or CreateDate (+TimeZone) with random milliseconds added.")]
struct Cli {
    /// Increase verbosity (-v=INFO, -vv=DEBUG, -vvv=TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rename files in place to their capture timestamp
    Rename {
        #[command(flatten)]
        common: CommonArgs,
        /// Descend into subdirectories
        #[arg(long)]
        recursive: bool,
        /// Additional directories to scan besides the current one
        #[arg(long)]
        root: Vec<PathBuf>,
    },
    /// Move files into per-day directories (YYYY-MM-DD) under the current directory
    Partition {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Number of exiftool sessions to run in parallel
    #[arg(long, default_value_t = DEFAULT_WORKERS, value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize))]
    num_workers: usize,
    /// Filename regex; `.ext` is matched literally. Repeatable
    #[arg(long, required = true)]
    file: Vec<FilePattern>,
    /// Print what would happen without touching any file
    #[arg(long)]
    dry_run: bool,
    /// Overwrite an existing file at the destination
    #[arg(long)]
    replace_if_exists: bool,
    /// exiftool executable
    #[arg(long, default_value = "exiftool")]
    exiftool: PathBuf,
    /// Seconds to wait for exiftool to exit before killing it
    #[arg(long, default_value_t = 2)]
    shutdown_grace: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose)?;

    info!("Starting exifsort");

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let config = match cli.command {
        Commands::Rename {
            common,
            recursive,
            root,
        } => {
            let mut config = build_config(Mode::Rename, cwd.clone(), common);
            config.recursive = recursive;
            config.roots.extend(root.into_iter().map(|r| cwd.join(r)));
            config
        }
        Commands::Partition { common } => build_config(Mode::Partition, cwd, common),
    };
    debug!("Configuration: {:?}", config);

    let cancel = CancellationToken::new();
    interrupt::spawn_handler(cancel.clone());

    let summary = exifsort::run(config, cancel).await?;
    print_summary(&summary);

    if summary.cancelled {
        anyhow::bail!("interrupted");
    }
    Ok(())
}

fn build_config(mode: Mode, cwd: PathBuf, common: CommonArgs) -> RunConfig {
    let mut config = RunConfig::new(mode, cwd);
    config.num_workers = common.num_workers;
    config.patterns = PatternSet::new(common.file);
    config.dry_run = common.dry_run;
    config.replace_if_exists = common.replace_if_exists;
    config.engine = EngineCommand::exiftool(common.exiftool);
    config.shutdown_grace = Duration::from_secs(common.shutdown_grace);
    config
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    Ok(())
}

// Dry-run plans go to stdout, so the summary goes to stderr.
fn print_summary(summary: &RunSummary) {
    eprintln!("\nProcessing complete!");
    eprintln!("Files processed: {}", summary.processed());
    eprintln!("Files moved: {}", summary.moved + summary.replaced);
    eprintln!("Files skipped: {}", summary.skipped + summary.unchanged);
    if summary.planned > 0 {
        eprintln!("Files planned: {}", summary.planned);
    }
    eprintln!("Errors: {}", summary.failed);
    if summary.lost_sessions > 0 {
        eprintln!("Lost exiftool sessions: {}", summary.lost_sessions);
    }
}
