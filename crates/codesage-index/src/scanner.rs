//! Directory scanning.
//!
//! Walks a codebase with `ignore::WalkBuilder`, keeps files that match at
//! least one include glob and no exclude glob, and drops oversized and binary
//! files. Unreadable entries become warnings; they never abort the walk.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use codesage_config::ScanSettings;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::language::{detect_language, has_binary_extension};

/// Bytes inspected for a null byte when probing for binary content.
const BINARY_PROBE_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Traversal limits and filters.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub max_depth: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_size: u64,
    pub respect_gitignore: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&ScanSettings::default())
    }
}

impl From<&ScanSettings> for ScanOptions {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            max_depth: settings.max_depth,
            include_patterns: settings.include_patterns.clone(),
            exclude_patterns: settings.exclude_patterns.clone(),
            max_file_size: settings.max_file_size,
            respect_gitignore: settings.respect_gitignore,
        }
    }
}

/// A candidate file. Content is loaded lazily.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: PathBuf,
    /// Forward-slash path relative to the scan root
    pub relative_path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub language: String,
    pub content: Option<String>,
}

impl FileRecord {
    /// Read the file as UTF-8 (lossy) if it has not been read yet.
    pub fn load_content(&mut self) -> std::io::Result<&str> {
        if self.content.is_none() {
            let bytes = std::fs::read(&self.path)?;
            self.content = Some(String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(self.content.as_deref().unwrap_or_default())
    }
}

/// A non-fatal problem met during traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanWarning {
    pub path: Option<PathBuf>,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub root: PathBuf,
    pub files: Vec<FileRecord>,
    pub warnings: Vec<ScanWarning>,
    pub skipped_binary: usize,
    pub skipped_large: usize,
}

impl ScanResult {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

pub struct Scanner {
    options: ScanOptions,
    include: GlobSet,
    exclude: GlobSet,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Result<Self, ScanError> {
        let include = build_globset(&options.include_patterns)?;
        let exclude = build_globset(&options.exclude_patterns)?;
        Ok(Self {
            options,
            include,
            exclude,
        })
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan a directory, or accept a single file as a one-element codebase.
    pub fn scan(&self, root: &Path) -> Result<ScanResult, ScanError> {
        if !root.exists() {
            return Err(ScanError::NotFound(root.to_path_buf()));
        }

        if root.is_file() {
            return Ok(self.scan_single_file(root));
        }

        let mut result = ScanResult {
            root: root.to_path_buf(),
            ..Default::default()
        };

        // Prune directories whose every descendant would be excluded.
        let exclude = self.exclude.clone();
        let walk_root = root.to_path_buf();
        let walker = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(self.options.respect_gitignore)
            .git_global(self.options.respect_gitignore)
            .git_exclude(self.options.respect_gitignore)
            .max_depth(Some(self.options.max_depth))
            .sort_by_file_name(|a, b| a.cmp(b))
            .filter_entry(move |entry| {
                if !entry.file_type().map_or(false, |t| t.is_dir()) {
                    return true;
                }
                match entry.path().strip_prefix(&walk_root) {
                    Ok(rel) if !rel.as_os_str().is_empty() => {
                        !exclude.is_match(format!("{}/_", to_slash(rel)))
                    }
                    _ => true,
                }
            })
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    result.warnings.push(ScanWarning {
                        path: None,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().map_or(false, |t| t.is_file()) {
                continue;
            }

            let path = entry.path();
            let relative = match path.strip_prefix(root) {
                Ok(rel) => to_slash(rel),
                Err(_) => continue,
            };

            if !self.include.is_match(&relative) || self.exclude.is_match(&relative) {
                continue;
            }

            if let Some(record) = self.inspect(path, relative, &mut result) {
                result.files.push(record);
            }
        }

        info!(
            "Scanned {}: {} files ({} binary, {} oversized skipped, {} warnings)",
            root.display(),
            result.files.len(),
            result.skipped_binary,
            result.skipped_large,
            result.warnings.len()
        );

        Ok(result)
    }

    /// The file name plays the relative path, so name globs apply while
    /// directory globs have nothing to match.
    fn scan_single_file(&self, path: &Path) -> ScanResult {
        let mut result = ScanResult {
            root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            ..Default::default()
        };
        let relative = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !self.include.is_match(&relative) || self.exclude.is_match(&relative) {
            debug!("{} is filtered out by the scan patterns", path.display());
            result.warnings.push(ScanWarning {
                path: Some(path.to_path_buf()),
                message: "file does not match the include/exclude patterns".to_string(),
            });
            return result;
        }
        if let Some(record) = self.inspect(path, relative, &mut result) {
            result.files.push(record);
        }
        result
    }

    /// Size, binary and metadata checks for one candidate.
    fn inspect(&self, path: &Path, relative: String, result: &mut ScanResult) -> Option<FileRecord> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                warn!("Cannot stat {}: {}", path.display(), e);
                result.warnings.push(ScanWarning {
                    path: Some(path.to_path_buf()),
                    message: e.to_string(),
                });
                return None;
            }
        };

        if metadata.len() > self.options.max_file_size {
            debug!("Skipping oversized file {} ({} bytes)", relative, metadata.len());
            result.skipped_large += 1;
            return None;
        }

        if has_binary_extension(path) {
            result.skipped_binary += 1;
            return None;
        }

        match probe_binary(path) {
            Ok(true) => {
                debug!("Skipping binary file {}", relative);
                result.skipped_binary += 1;
                return None;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                result.warnings.push(ScanWarning {
                    path: Some(path.to_path_buf()),
                    message: e.to_string(),
                });
                return None;
            }
        }

        Some(FileRecord {
            path: path.to_path_buf(),
            language: detect_language(path).to_string(),
            relative_path: relative,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            content: None,
        })
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ScanError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ScanError::InvalidPattern {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

/// A null byte in the leading bytes marks the file as binary.
fn probe_binary(path: &Path) -> std::io::Result<bool> {
    let mut buf = Vec::with_capacity(BINARY_PROBE_LEN);
    File::open(path)?
        .take(BINARY_PROBE_LEN as u64)
        .read_to_end(&mut buf)?;
    Ok(buf.contains(&0))
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
