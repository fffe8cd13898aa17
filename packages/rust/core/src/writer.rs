//! Writes article files and the export manifest under the output root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use kbmirror_shared::{KbMirrorError, Result};

/// Manifest file name, written at the output root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Record of one file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    /// Absolute (or root-joined) path that was written.
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: usize,
}

/// One article entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the output root, `/`-separated.
    pub path: String,
    pub sys_id: String,
    pub title: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// `manifest.json`: what a run wrote and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub run_id: String,
    pub instance: String,
    pub exported_at: DateTime<Utc>,
    pub tool_version: String,
    pub files: Vec<ManifestEntry>,
}

/// Writes files beneath an output root that is known to exist.
#[derive(Debug, Clone)]
pub struct ArticleWriter {
    root: PathBuf,
}

impl ArticleWriter {
    /// Create the output root (and parents) if needed.
    ///
    /// Failing here is fatal for the run: there's nowhere to write.
    #[instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub fn create(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| KbMirrorError::io(&root, e))?;
        debug!("output root ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `content` to `relative` under the root, replacing any existing file.
    ///
    /// Parent directories are created on demand. The write goes to a hidden
    /// temp file first and is renamed into place.
    pub fn write(&self, relative: &Path, content: &str) -> Result<WrittenFile> {
        let target = self.root.join(relative);
        write_atomic(&target, content.as_bytes())?;

        debug!(path = %target.display(), size = content.len(), "wrote file");

        Ok(WrittenFile {
            path: target,
            sha256: sha256_hex(content.as_bytes()),
            size_bytes: content.len(),
        })
    }

    /// Write `manifest.json` (pretty-printed) at the root.
    #[instrument(skip_all, fields(files = manifest.files.len()))]
    pub fn write_manifest(&self, manifest: &ExportManifest) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(manifest).map_err(|e| {
            KbMirrorError::validation(format!("JSON serialization failed: {e}"))
        })?;
        let path = self.root.join(MANIFEST_FILE);
        write_atomic(&path, format!("{json}\n").as_bytes())?;

        info!(path = %path.display(), "wrote export manifest");
        Ok(path)
    }
}

/// `/`-separated form of a relative path, for the manifest.
pub fn manifest_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| KbMirrorError::validation(format!("no parent directory for {target:?}")))?;
    std::fs::create_dir_all(parent).map_err(|e| KbMirrorError::io(parent, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, bytes).map_err(|e| KbMirrorError::io(&temp, e))?;
    if let Err(e) = std::fs::rename(&temp, target) {
        let _ = std::fs::remove_file(&temp);
        return Err(KbMirrorError::io(target, e));
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
