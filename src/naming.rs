/**
 * Destination naming for the rename and partition modes
 */

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::exif::CaptureTime;

/// `2023-05-10T142201.500-0700`
pub const RENAME_FORMAT: &str = "%Y-%m-%dT%H%M%S%.3f%z";
/// `2023-05-10`
pub const PARTITION_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Rename in place to the canonical timestamp name.
    Rename,
    /// Move into a sibling `YYYY-MM-DD` directory, keeping the name.
    Partition,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Rename => "rename",
            Mode::Partition => "partition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPlan {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Directory that has to exist before the move (partition mode).
    pub create_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("source path has no parent directory or file name: {0}")]
    InvalidSource(PathBuf),
}

#[derive(Debug, Clone, Copy)]
pub struct DestinationPlanner {
    mode: Mode,
}

impl DestinationPlanner {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Compute where `source` goes.
    ///
    /// Returns `Ok(None)` when the file is already where it belongs, which
    /// happens when rename mode runs over an already renamed file.
    pub fn plan(
        &self,
        source: &Path,
        capture: &CaptureTime,
    ) -> Result<Option<DestinationPlan>, PlanError> {
        let (parent, file_name) = match (source.parent(), source.file_name()) {
            (Some(parent), Some(file_name)) => (parent, file_name),
            _ => return Err(PlanError::InvalidSource(source.to_path_buf())),
        };

        let (destination, create_dir) = match self.mode {
            Mode::Rename => {
                let mut name = capture.timestamp.format(RENAME_FORMAT).to_string();
                name.push_str(extension(&file_name.to_string_lossy()));
                (parent.join(name), None)
            }
            Mode::Partition => {
                let date_dir = parent.join(capture.timestamp.format(PARTITION_FORMAT).to_string());
                (date_dir.join(file_name), Some(date_dir))
            }
        };

        if destination == source {
            return Ok(None);
        }

        Ok(Some(DestinationPlan {
            source: source.to_path_buf(),
            destination,
            create_dir,
        }))
    }
}

/// Suffix from the last `.` of the file name, dot included. Unlike
/// `Path::extension` a dotfile keeps its whole name (`.hidden`).
fn extension(file_name: &str) -> &str {
    file_name.rfind('.').map_or("", |i| &file_name[i..])
}
