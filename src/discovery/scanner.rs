// src/discovery/scanner.rs

//! Full-tree enumeration of the scan roots

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// What a scan looks at and what it skips
#[derive(Debug, Clone)]
pub struct ScanFilter {
    extensions: HashSet<String>,
    recursive: bool,
    excluded: Vec<PathBuf>,
}

/// Canonical form when the path exists, absolute form otherwise
pub(crate) fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

impl ScanFilter {
    /// `extensions` are matched case-insensitively, with or without a leading dot
    pub fn new<I, S>(extensions: I, recursive: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
            recursive,
            excluded: Vec::new(),
        }
    }

    /// Never report anything under `dir` (e.g. the output directory)
    pub fn exclude(mut self, dir: &Path) -> Self {
        self.excluded.push(normalize(dir));
        self
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|dir| path.starts_with(dir))
    }

    /// Whether `path` names a candidate file by extension and location
    pub fn matches(&self, path: &Path) -> bool {
        let ext_ok = path
            .extension()
            .map(|e| self.extensions.contains(&e.to_string_lossy().to_lowercase()))
            .unwrap_or(false);

        ext_ok && !self.is_excluded(path)
    }
}

/// Enumerate every matching regular file under `root`
pub fn scan_root(root: &Path, filter: &ScanFilter) -> Vec<PathBuf> {
    let root = normalize(root);
    let max_depth = if filter.recursive { usize::MAX } else { 1 };

    let mut found = Vec::new();
    let walker = WalkDir::new(&root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| !filter.is_excluded(entry.path()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[discovery] Error walking {}: {}", root.display(), e);
                continue;
            }
        };

        if entry.file_type().is_file() && filter.matches(entry.path()) {
            found.push(entry.into_path());
        }
    }

    debug!("[discovery] Scan of {} found {} files", root.display(), found.len());
    found
}

/// Scan each root in turn
pub fn scan_all(roots: &[PathBuf], filter: &ScanFilter) -> Vec<PathBuf> {
    roots.iter().flat_map(|root| scan_root(root, filter)).collect()
}
