//! Read-only file commands: `files.getHomeDir`, `files.readDir`,
//! `files.readFile`.
//!
//! ## Path validation
//!
//! Paths must be absolute, contain no null bytes and no `..` components.
//! After canonicalisation (which resolves symlinks) the path must sit inside
//! the configured root, compared component by component so that
//! `/home/user-evil` is not inside `/home/user`.
//!
//! ## Size limits
//!
//! Reads are capped at `files.max_file_size` (default 2 MB) and must be
//! valid UTF-8.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::FilesConfig;
use crate::error::FilesError;
use crate::shell::home_dir;

/// A single entry of a `files.readDir` listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// `"directory"` or `"file"`.
    #[serde(rename = "type")]
    pub entry_type: &'static str,
    pub path: String,
    #[serde(rename = "isHidden")]
    pub is_hidden: bool,
}

/// File access confined to one directory tree.
pub struct FileBrowser {
    root: PathBuf,
    max_file_size: u64,
}

impl FileBrowser {
    pub fn new(cfg: &FilesConfig) -> Self {
        let root = cfg
            .root
            .as_deref()
            .filter(|r| !r.is_empty())
            .map_or_else(home_dir, PathBuf::from);
        Self {
            root,
            max_file_size: cfg.max_file_size,
        }
    }

    /// The user's home directory.
    pub fn home_dir(&self) -> String {
        home_dir().display().to_string()
    }

    /// List a directory: directories first, then files, each by name.
    pub async fn read_dir(&self, payload: &Value) -> Result<Vec<DirEntry>, FilesError> {
        let dir = self.resolve(payload).await?;
        let mut reader = tokio::fs::read_dir(&dir).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            // Follow symlinks for the type; a dangling link lists as a file.
            let is_dir = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.is_dir(),
                Err(_) => false,
            };
            entries.push(DirEntry {
                is_hidden: name.starts_with('.'),
                entry_type: if is_dir { "directory" } else { "file" },
                path: path.display().to_string(),
                name,
            });
        }
        entries.sort_by(|a, b| {
            (a.entry_type != "directory", &a.name).cmp(&(b.entry_type != "directory", &b.name))
        });
        debug!("Listed {} ({} entries)", dir.display(), entries.len());
        Ok(entries)
    }

    /// Read a UTF-8 text file.
    pub async fn read_file(&self, payload: &Value) -> Result<String, FilesError> {
        let path = self.resolve(payload).await?;
        let meta = tokio::fs::metadata(&path).await?;
        if meta.len() > self.max_file_size {
            return Err(FilesError::TooLarge {
                size: meta.len(),
                max: self.max_file_size,
            });
        }
        let bytes = tokio::fs::read(&path).await?;
        String::from_utf8(bytes).map_err(|_| FilesError::NotUtf8)
    }

    /// Validate a requested path and confine it to the root.
    async fn resolve(&self, payload: &Value) -> Result<PathBuf, FilesError> {
        let raw = payload
            .as_str()
            .or_else(|| payload.get("path").and_then(Value::as_str))
            .ok_or(FilesError::NotText)?;
        let requested = validate_path(raw)?;

        let root = tokio::fs::canonicalize(&self.root).await?;
        let resolved = tokio::fs::canonicalize(&requested).await?;
        if !resolved.starts_with(&root) {
            warn!(
                "Refusing file access outside {}: {}",
                root.display(),
                resolved.display()
            );
            return Err(FilesError::OutsideRoot {
                root: root.display().to_string(),
            });
        }
        Ok(resolved)
    }
}

/// Absolute, no null bytes, no `..`.
fn validate_path(path: &str) -> Result<PathBuf, FilesError> {
    if path.contains('\0') {
        return Err(FilesError::NullByte);
    }
    let p = Path::new(path);
    if !p.is_absolute() {
        return Err(FilesError::NotAbsolute);
    }
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(FilesError::Traversal);
    }
    Ok(p.to_path_buf())
}
