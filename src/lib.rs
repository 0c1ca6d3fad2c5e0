pub mod config;
pub mod exif;
pub mod file_ops;
pub mod intake;
pub mod interrupt;
pub mod naming;
pub mod organizer;
pub mod pattern;
pub mod pool;
pub mod session;
pub mod walk;

use anyhow::{Context, Result};
use log::info;
use tokio_util::sync::CancellationToken;

use config::RunConfig;
use pool::{RunSummary, WorkerPool};

/// Walk the configured roots and rename or partition every matching file.
///
/// Dry-run output goes to stdout. Returns once the walk is exhausted or
/// `cancel` fires and every exiftool session has been shut down.
pub async fn run(config: RunConfig, cancel: CancellationToken) -> Result<RunSummary> {
    config.validate().context("Invalid configuration")?;

    let source = config.path_source();
    info!(
        "{} files under {} root(s) with {} worker(s){}",
        config.mode.as_str(),
        source.roots().len(),
        config.num_workers,
        if config.dry_run { " (dry run)" } else { "" }
    );

    let organizer = config.organizer(Box::new(std::io::stdout()));
    let pool = WorkerPool::new(config.pool_config(), organizer);
    let paths = source.paths(&cancel);
    pool.run(paths, cancel)
        .await
        .with_context(|| format!("Failed to run {} with {}", config.mode.as_str(), config.engine))
}
