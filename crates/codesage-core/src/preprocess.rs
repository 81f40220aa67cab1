//! Single-document codebase representation with an on-disk cache.
//!
//! The representation is either an internal concatenation of the scanned
//! files or the output of an external packer. A failing packer falls back to
//! the internal form.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use codesage_index::ScanResult;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info, warn};

const FILE_RULE: &str = "================";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepresentationKind {
    Internal,
    External,
}

impl RepresentationKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }
}

/// Where the packed codebase lives and how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Representation {
    pub kind: RepresentationKind,
    pub path: PathBuf,
    pub bytes: u64,
    pub cached: bool,
    /// Why the external packer was abandoned, if it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl Representation {
    pub async fn read(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read representation {}", self.path.display()))
    }
}

pub struct Preprocessor {
    cache_dir: PathBuf,
    /// External packer; `None` keeps everything internal
    external_command: Option<String>,
}

impl Preprocessor {
    pub fn new(cache_dir: PathBuf, external_command: Option<String>) -> Self {
        Self {
            cache_dir,
            external_command: external_command.filter(|c| !c.trim().is_empty()),
        }
    }

    /// Produce or reuse the representation of `source`, a directory or a
    /// single file. File contents are loaded into the scan records as a side
    /// effect.
    pub async fn prepare(
        &self,
        source: &Path,
        scan: &mut ScanResult,
        force: bool,
    ) -> Result<Representation> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .with_context(|| format!("Failed to create cache directory {}", self.cache_dir.display()))?;

        let key = cache_key(source);
        let mut fallback_reason = None;

        if let Some(command) = &self.external_command {
            let target = self.cache_path(&key, RepresentationKind::External);
            if !force {
                if let Some(hit) = cached(&target, RepresentationKind::External).await {
                    return Ok(hit);
                }
            }
            match run_packer(command, source, &target).await {
                Ok(bytes) => {
                    info!("Packed {} with {} ({} bytes)", source.display(), command, bytes);
                    return Ok(Representation {
                        kind: RepresentationKind::External,
                        path: target,
                        bytes,
                        cached: false,
                        fallback_reason: None,
                    });
                }
                Err(e) => {
                    warn!("External packer failed, using internal representation: {:#}", e);
                    fallback_reason = Some(format!("{:#}", e));
                }
            }
        }

        let target = self.cache_path(&key, RepresentationKind::Internal);
        if !force && fallback_reason.is_none() {
            if let Some(hit) = cached(&target, RepresentationKind::Internal).await {
                return Ok(hit);
            }
        }

        let packed = concatenate(scan);
        tokio::fs::write(&target, &packed)
            .await
            .with_context(|| format!("Failed to write representation {}", target.display()))?;
        debug!("Wrote internal representation of {} to {}", source.display(), target.display());

        Ok(Representation {
            kind: RepresentationKind::Internal,
            path: target,
            bytes: packed.len() as u64,
            cached: false,
            fallback_reason,
        })
    }

    fn cache_path(&self, key: &str, kind: RepresentationKind) -> PathBuf {
        self.cache_dir.join(format!("{}-{}.txt", key, kind.as_str()))
    }
}

async fn cached(path: &Path, kind: RepresentationKind) -> Option<Representation> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    debug!("Reusing cached representation {}", path.display());
    Some(Representation {
        kind,
        path: path.to_path_buf(),
        bytes: metadata.len(),
        cached: true,
        fallback_reason: None,
    })
}

/// Stable per-root cache key.
pub fn cache_key(root: &Path) -> String {
    let digest = Sha256::digest(root.to_string_lossy().as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Internal form: every readable file under a header naming its path.
fn concatenate(scan: &mut ScanResult) -> String {
    let mut packed = String::new();
    for file in scan.files.iter_mut() {
        let relative = file.relative_path.clone();
        match file.load_content() {
            Ok(content) => {
                packed.push_str(&format!("{0}\nFile: {1}\n{0}\n", FILE_RULE, relative));
                packed.push_str(content);
                if !content.ends_with('\n') {
                    packed.push('\n');
                }
                packed.push('\n');
            }
            Err(e) => debug!("Leaving {} out of the representation: {}", relative, e),
        }
    }
    packed
}

async fn run_packer(command: &str, root: &Path, output: &Path) -> Result<u64> {
    let result = Command::new(command)
        .arg(root)
        .arg("--output")
        .arg(output)
        .output()
        .await
        .with_context(|| format!("Failed to execute '{}'", command))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        bail!("{} exited with {}: {}", command, result.status, stderr.trim());
    }

    let metadata = tokio::fs::metadata(output)
        .await
        .with_context(|| format!("{} produced no output file", command))?;
    if metadata.len() == 0 {
        bail!("{} produced an empty output file", command);
    }
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codesage_index::{ScanOptions, Scanner};
    use std::fs;
    use tempfile::tempdir;

    fn scan_of(root: &Path) -> ScanResult {
        Scanner::new(ScanOptions::default()).unwrap().scan(root).unwrap()
    }

    #[tokio::test]
    async fn test_internal_representation_is_cached() {
        let src = tempdir().unwrap();
        let cache = tempdir().unwrap();
        fs::write(src.path().join("a.js"), "const a = 1;").unwrap();
        fs::write(src.path().join("b.py"), "b = 2\n").unwrap();

        let preprocessor = Preprocessor::new(cache.path().to_path_buf(), None);
        let mut scan = scan_of(src.path());
        let first = preprocessor.prepare(src.path(), &mut scan, false).await.unwrap();
        assert_eq!(first.kind, RepresentationKind::Internal);
        assert!(!first.cached);

        let text = first.read().await.unwrap();
        assert!(text.contains("File: a.js\n"));
        assert!(text.contains("b = 2"));
        // contents were loaded into the scan records
        assert!(scan.files.iter().all(|f| f.content.is_some()));

        let second = preprocessor.prepare(src.path(), &mut scan_of(src.path()), false).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.path, first.path);

        let forced = preprocessor.prepare(src.path(), &mut scan_of(src.path()), true).await.unwrap();
        assert!(!forced.cached);
    }

    #[tokio::test]
    async fn test_missing_packer_falls_back() {
        let src = tempdir().unwrap();
        let cache = tempdir().unwrap();
        fs::write(src.path().join("a.js"), "const a = 1;\n").unwrap();

        let preprocessor = Preprocessor::new(
            cache.path().to_path_buf(),
            Some("codesage-no-such-packer".to_string()),
        );
        let representation = preprocessor.prepare(src.path(), &mut scan_of(src.path()), false).await.unwrap();
        assert_eq!(representation.kind, RepresentationKind::Internal);
        assert!(representation.fallback_reason.is_some());
    }

    #[test]
    fn test_cache_key_is_stable() {
        assert_eq!(cache_key(Path::new("/repo")), cache_key(Path::new("/repo")));
        assert_ne!(cache_key(Path::new("/repo")), cache_key(Path::new("/repo2")));
        assert_eq!(cache_key(Path::new("/repo")).len(), 32);
    }
}
