//! Centralized error types for msgarchive.

use std::path::PathBuf;
use thiserror::Error;

/// A required record or field in a keyed archive is missing or malformed.
///
/// Recoverable at file granularity: the walker logs it, skips the file and
/// moves on to the next one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    /// The top level of the property list is not a keyed archive.
    #[error("Not a keyed archive: {0}")]
    NotKeyedArchive(String),

    /// A required field is absent (or resolves to `$null`).
    #[error("Missing field '{0}'")]
    MissingField(String),

    /// A field is present but holds the wrong kind of value.
    #[error("Field '{field}' is not {expected}")]
    UnexpectedType {
        field: String,
        expected: &'static str,
    },

    /// A back-reference points past the end of the object pool.
    #[error("UID {index} out of range (pool has {len} objects)")]
    UidOutOfRange { index: u64, len: usize },

    /// `NS.keys` and `NS.objects` of a dictionary record differ in length.
    #[error("Archived map has {keys} keys but {values} values")]
    MapLengthMismatch { keys: usize, values: usize },

    /// A root or metadata list is shorter than the slot being read.
    #[error("List '{field}' has no slot {slot} (length {len})")]
    MissingSlot {
        field: String,
        slot: usize,
        len: usize,
    },

    /// The number of placeholder characters in a message's text differs from
    /// the number of attachment descriptors in its attributes.
    #[error("Message text has {placeholders} attachment placeholders but {attachments} attachments")]
    AttachmentCountMismatch {
        placeholders: usize,
        attachments: usize,
    },
}

impl FormatError {
    /// Shorthand for [`FormatError::MissingField`].
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Shorthand for [`FormatError::UnexpectedType`].
    pub fn unexpected(field: impl Into<String>, expected: &'static str) -> Self {
        Self::UnexpectedType {
            field: field.into(),
            expected,
        }
    }
}

/// All errors produced by the msgarchive library.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file or directory does not exist.
    #[error("Not found: {0}")]
    FileNotFound(PathBuf),

    /// The property-list decoder rejected the file.
    #[error("Could not decode property list '{path}': {source}")]
    Plist {
        path: PathBuf,
        source: plist::Error,
    },

    /// The file decoded, but its object graph is not a conversation log.
    #[error("Malformed archive '{path}': {source}")]
    Format { path: PathBuf, source: FormatError },

    /// Copying an attachment out of the external library failed.
    #[error("Attachment I/O error on '{path}': {source}")]
    AttachmentIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An invalid path was provided.
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience alias for `Result<T, ArchiveError>`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the archive path to a [`FormatError`].
    pub fn format(path: impl Into<PathBuf>, source: FormatError) -> Self {
        Self::Format {
            path: path.into(),
            source,
        }
    }

    /// Create an `AttachmentIo` variant from a path and an `io::Error`.
    pub fn attachment_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::AttachmentIo {
            path: path.into(),
            source,
        }
    }
}
