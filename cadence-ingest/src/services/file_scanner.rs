//! Audio file discovery
//!
//! Walks a directory (recursively or top level only) and keeps files whose
//! extension is on the allow-list. Traversal order is sorted by file name so
//! repeated scans see paths in the same order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Extension allow-list normalized to nothing
    #[error("No audio extensions configured")]
    NoExtensions,
}

/// Normalize ".MP3" / "mp3" / " Mp3 " to "mp3"
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

#[derive(Debug, Clone)]
pub struct FileScanner {
    extensions: HashSet<String>,
    recursive: bool,
    ignore_patterns: Vec<String>,
}

impl FileScanner {
    /// Scanner for the given extension allow-list.
    ///
    /// Ignores entries named exactly .DS_Store, Thumbs.db, .git or .svn.
    pub fn new<S: AsRef<str>>(extensions: &[S], recursive: bool) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
            recursive,
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
            ],
        }
    }

    pub fn with_ignore_patterns(mut self, patterns: Vec<String>) -> Self {
        self.ignore_patterns = patterns;
        self
    }

    pub fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&normalize_extension(e)))
            .unwrap_or(false)
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        // Never filter out the root itself
        if entry.depth() == 0 {
            return false;
        }
        let file_name = entry.file_name().to_string_lossy();
        self.ignore_patterns
            .iter()
            .any(|pattern| file_name == pattern.as_str())
    }

    /// Enumerate matching files under `root_path`
    pub fn scan(&self, root_path: &Path) -> Result<Vec<PathBuf>, ScanError> {
        if self.extensions.is_empty() {
            return Err(ScanError::NoExtensions);
        }
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }
        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }

        let mut walker = WalkDir::new(root_path)
            .follow_links(false)
            .sort_by_file_name();
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut files = Vec::new();
        for entry in walker.into_iter().filter_entry(|e| !self.is_ignored(e)) {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.matches_extension(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => {
                    // Unreadable subtree: keep scanning the rest
                    tracing::warn!(error = %e, "Error accessing directory entry");
                }
            }
        }

        tracing::debug!(
            root = %root_path.display(),
            recursive = self.recursive,
            files = files.len(),
            "Directory traversal complete"
        );

        Ok(files)
    }
}
