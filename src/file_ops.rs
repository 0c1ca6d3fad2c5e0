/**
 * File operations module: applies destination plans with the conflict policy
 */

use log::debug;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::naming::DestinationPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved,
    /// Moved over an existing file (`--replace-if-exists`).
    Replaced,
    /// Destination already exists and replacing is off.
    SkippedExists,
}

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileMover {
    replace_if_exists: bool,
}

impl FileMover {
    pub fn new(replace_if_exists: bool) -> Self {
        Self { replace_if_exists }
    }

    /// Apply a plan. Moves are a single `rename(2)`; moving across
    /// filesystems is not supported.
    ///
    /// The existence check and the rename are not atomic together: two
    /// workers targeting the same destination can both see it missing.
    pub fn apply(&self, plan: &DestinationPlan) -> Result<MoveOutcome, MoveError> {
        if let Some(dir) = &plan.create_dir {
            debug!("Creating target directory: {}", dir.display());
            fs::create_dir_all(dir).map_err(|source| MoveError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }

        if self.replace_if_exists {
            let existed = fs::symlink_metadata(&plan.destination).is_ok();
            self.rename(plan)?;
            return Ok(if existed {
                MoveOutcome::Replaced
            } else {
                MoveOutcome::Moved
            });
        }

        match fs::symlink_metadata(&plan.destination) {
            Ok(_) => Ok(MoveOutcome::SkippedExists),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.rename(plan)?;
                Ok(MoveOutcome::Moved)
            }
            Err(source) => Err(MoveError::Stat {
                path: plan.destination.clone(),
                source,
            }),
        }
    }

    fn rename(&self, plan: &DestinationPlan) -> Result<(), MoveError> {
        debug!(
            "Performing move operation: '{}' -> '{}'",
            plan.source.display(),
            plan.destination.display()
        );
        fs::rename(&plan.source, &plan.destination).map_err(|source| MoveError::Rename {
            from: plan.source.clone(),
            to: plan.destination.clone(),
            source,
        })
    }
}
