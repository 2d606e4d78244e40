//! Archive-tree traversal and per-year grouping.
//!
//! The archive root holds one level of (usually date-named) subdirectories,
//! each containing `.ichat` files. Both levels are visited in lexicographic
//! order and every file's messages are appended to the bucket of their own
//! calendar year.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::context::RunContext;
use crate::error::{ArchiveError, Result};
use crate::model::message::Message;
use crate::parser::ichat::{self, ARCHIVE_EXTENSION};

/// Which clock a message's calendar year is read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YearClock {
    #[default]
    Utc,
    Local,
}

impl YearClock {
    /// Parse a config value (`"utc"` or `"local"`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utc" => Some(Self::Utc),
            "local" => Some(Self::Local),
            _ => None,
        }
    }

    pub fn year_of(self, message: &Message) -> i32 {
        match self {
            Self::Utc => message.year(),
            Self::Local => message.local_year(),
        }
    }
}

/// Inclusive range of years to keep; open ends accept everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct YearRange {
    pub start: Option<i32>,
    pub end: Option<i32>,
}

impl YearRange {
    pub fn contains(&self, year: i32) -> bool {
        self.start.is_none_or(|s| year >= s) && self.end.is_none_or(|e| year <= e)
    }
}

/// Options for one walk over an archive tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    pub years: YearRange,
    pub clock: YearClock,
}

/// A file that could not be extracted.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: ArchiveError,
}

/// Messages grouped by calendar year, in traversal order within each year.
#[derive(Debug, Default)]
pub struct YearIndex {
    pub years: BTreeMap<i32, Vec<Message>>,
    /// Number of archive files extracted successfully.
    pub files_read: usize,
    /// Files skipped because extraction failed.
    pub failures: Vec<FileFailure>,
}

impl YearIndex {
    /// Append `messages` to the buckets of their own years.
    ///
    /// Messages outside `options.years` are dropped.
    pub fn absorb(&mut self, messages: Vec<Message>, options: &WalkOptions) {
        for message in messages {
            let year = options.clock.year_of(&message);
            if options.years.contains(year) {
                self.years.entry(year).or_default().push(message);
            }
        }
    }

    /// Total number of messages across all years.
    pub fn message_count(&self) -> usize {
        self.years.values().map(Vec::len).sum()
    }

    pub fn get(&self, year: i32) -> Option<&[Message]> {
        self.years.get(&year).map(Vec::as_slice)
    }

    pub fn into_years(self) -> BTreeMap<i32, Vec<Message>> {
        self.years
    }
}

/// List the archive files under `archive_root` in traversal order.
///
/// Immediate subdirectories sorted by name, then the `.ichat` files of each,
/// sorted by name. Hidden entries are skipped; unreadable subdirectories are
/// logged and skipped.
pub fn archive_files(archive_root: &Path) -> Result<Vec<PathBuf>> {
    if !archive_root.is_dir() {
        return Err(ArchiveError::FileNotFound(archive_root.to_path_buf()));
    }

    let mut files = Vec::new();
    for subdir in sorted_children(archive_root)? {
        if !subdir.file_type().is_dir() {
            continue;
        }
        let children = match sorted_children(subdir.path()) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %subdir.path().display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };
        files.extend(
            children
                .into_iter()
                .filter(|e| e.file_type().is_file() && has_archive_extension(e.path()))
                .map(DirEntry::into_path),
        );
    }
    Ok(files)
}

/// Walk `archive_root`, extract every archive file, and group the messages by year.
///
/// A file that fails to decode is logged and recorded in
/// [`YearIndex::failures`]; the walk continues with the next file.
/// `progress` receives `(files_done, files_total)`.
pub fn build_year_index(
    archive_root: &Path,
    run: &mut RunContext,
    options: &WalkOptions,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<YearIndex> {
    let files = archive_files(archive_root)?;
    let total = files.len();
    info!(path = %archive_root.display(), files = total, "Reading archive");

    let mut index = YearIndex::default();
    for (i, path) in files.into_iter().enumerate() {
        if let Some(cb) = progress {
            cb(i, total);
        }
        match ichat::extract_file(&path, run) {
            Ok(messages) => {
                index.files_read += 1;
                index.absorb(messages, options);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable archive");
                index.failures.push(FileFailure { path, error: e });
            }
        }
    }
    if let Some(cb) = progress {
        cb(total, total);
    }

    debug!(
        files = index.files_read,
        failed = index.failures.len(),
        messages = index.message_count(),
        "Archive read"
    );
    Ok(index)
}

fn sorted_children(dir: &Path) -> Result<Vec<DirEntry>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            ArchiveError::io(path, e.into())
        })?;
        if !is_hidden(&entry) {
            out.push(entry);
        }
    }
    Ok(out)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn has_archive_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}
