/**
 * Candidate file discovery
 */

use log::{debug, warn};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::pattern::PatternSet;

/// Files below one or more roots whose names match the pattern set.
///
/// Directories and symlinks are never candidates. Without `recursive` only
/// the immediate children of each root are considered.
#[derive(Debug, Clone)]
pub struct PathSource {
    roots: Vec<PathBuf>,
    recursive: bool,
    patterns: PatternSet,
}

impl PathSource {
    pub fn new(roots: Vec<PathBuf>, recursive: bool, patterns: PatternSet) -> Self {
        let mut unique = Vec::with_capacity(roots.len());
        for root in roots {
            if !unique.contains(&root) {
                unique.push(root);
            }
        }
        Self {
            roots: unique,
            recursive,
            patterns,
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Lazily walk the roots in order. The walk ends at the next directory
    /// entry once `cancel` fires.
    pub fn paths(self, cancel: &CancellationToken) -> impl Iterator<Item = PathBuf> + Send + 'static {
        let PathSource {
            roots,
            recursive,
            patterns,
        } = self;

        let cancel = cancel.clone();
        roots.into_iter().flat_map(move |root| {
            debug!("Scanning directory: {} (recursive: {})", root.display(), recursive);
            let walkdir = if recursive {
                WalkDir::new(&root).min_depth(1)
            } else {
                WalkDir::new(&root).min_depth(1).max_depth(1)
            };
            let patterns = patterns.clone();
            let cancel = cancel.clone();

            walkdir
                .into_iter()
                .take_while(move |_| !cancel.is_cancelled())
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Skipping unreadable entry: {}", e);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .filter(move |entry| patterns.matches(&entry.file_name().to_string_lossy()))
                .map(|entry| entry.into_path())
        })
    }
}
