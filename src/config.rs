/**
 * Run configuration shared by the rename and partition commands
 */

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::file_ops::FileMover;
use crate::naming::{DestinationPlanner, Mode};
use crate::organizer::Organizer;
use crate::pattern::PatternSet;
use crate::pool::{PoolConfig, DEFAULT_WORKERS};
use crate::session::{EngineCommand, DEFAULT_SHUTDOWN_GRACE};
use crate::walk::PathSource;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--num-workers must be at least 1")]
    NoWorkers,
    #[error("at least one --file pattern is required")]
    NoPatterns,
    #[error("no root directories to scan")]
    NoRoots,
    #[error("root directory must be absolute: {0}")]
    RelativeRoot(PathBuf),
    #[error("--recursive and --root are only supported by rename")]
    PartitionWalk,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    pub num_workers: usize,
    pub patterns: PatternSet,
    pub dry_run: bool,
    pub replace_if_exists: bool,
    /// Rename only.
    pub recursive: bool,
    /// Absolute directories to scan; partition mode uses exactly one.
    pub roots: Vec<PathBuf>,
    pub engine: EngineCommand,
    pub shutdown_grace: Duration,
}

impl RunConfig {
    pub fn new(mode: Mode, root: PathBuf) -> Self {
        Self {
            mode,
            num_workers: DEFAULT_WORKERS,
            patterns: PatternSet::default(),
            dry_run: false,
            replace_if_exists: false,
            recursive: false,
            roots: vec![root],
            engine: EngineCommand::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.patterns.is_empty() {
            return Err(ConfigError::NoPatterns);
        }
        if self.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        if let Some(root) = self.roots.iter().find(|r| !r.is_absolute()) {
            return Err(ConfigError::RelativeRoot(root.clone()));
        }
        if self.mode == Mode::Partition && (self.recursive || self.roots.len() > 1) {
            return Err(ConfigError::PartitionWalk);
        }
        Ok(())
    }

    pub fn path_source(&self) -> PathSource {
        PathSource::new(self.roots.clone(), self.recursive, self.patterns.clone())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            num_workers: self.num_workers,
            engine: self.engine.clone(),
            shutdown_grace: self.shutdown_grace,
        }
    }

    pub fn organizer(&self, output: Box<dyn Write + Send>) -> Organizer {
        Organizer::new(
            DestinationPlanner::new(self.mode),
            FileMover::new(self.replace_if_exists),
            self.dry_run,
            output,
        )
    }
}
