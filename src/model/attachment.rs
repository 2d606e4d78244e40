//! Attachment references and file identity.
//!
//! Resolution happens once, at extraction time. The file itself is never
//! opened here; a path that no longer exists is the renderer's concern.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// An attachment referenced by a message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    /// File name declared in the archive, kept for display even when unresolved.
    pub file_name: String,

    /// Location of the backing file, if one was found.
    pub path: Option<PathBuf>,
}

impl Attachment {
    /// An attachment whose backing file could not be located.
    pub fn unresolved(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            path: None,
        }
    }

    /// An attachment backed by `path`.
    pub fn resolved(file_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            path: Some(path.into()),
        }
    }

    /// Whether a backing file was found.
    pub fn is_resolved(&self) -> bool {
        self.path.is_some()
    }
}

/// Cheap equality proxy for "same file": byte length plus modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub len: u64,
    pub modified: SystemTime,
}

impl FileIdentity {
    /// Read the identity of the file at `path`.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified()?,
        })
    }
}
