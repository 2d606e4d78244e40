//! Attachment lookup and external-library import.
//!
//! Attachments are looked up in two places:
//!
//! 1. the Messages attachments tree, where each transfer lives in a directory
//!    named after its GUID (`<root>/…/<GUID>/<file name>`);
//! 2. an optional external library, searched by file name. Files found there
//!    are copied into a run-wide copy directory, deduplicated by
//!    [`FileIdentity`] and never overwriting a different file of the same name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ArchiveError, Result};
use crate::model::attachment::{Attachment, FileIdentity};

/// Name of the copy directory created beside the attachments root.
pub const COPY_DIR_NAME: &str = "ExtAttachmentCopies";

/// What a message's attribute descriptor says about one attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// File-transfer GUID, naming the directory under the attachments root.
    pub guid: String,
    /// Declared file name.
    pub file_name: String,
}

/// Counters for one run, reported by the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentStats {
    /// Found under the attachments root.
    pub local: u64,
    /// Copied out of the external library.
    pub copied: u64,
    /// Reused an earlier copy with the same identity.
    pub reused: u64,
    /// Not found anywhere.
    pub unresolved: u64,
    /// Bytes written into the copy directory.
    pub bytes_copied: u64,
}

/// Run-scoped memo of copies made into the copy directory.
///
/// Maps a declared file name to every `(identity, copy path)` recorded for it,
/// so distinct files sharing a name each keep their own copy.
#[derive(Debug, Default)]
pub struct CopyCache {
    entries: HashMap<String, Vec<(FileIdentity, PathBuf)>>,
}

impl CopyCache {
    /// Path of an earlier copy of `file_name` with the same identity.
    pub fn lookup(&self, file_name: &str, identity: &FileIdentity) -> Option<&Path> {
        self.entries
            .get(file_name)?
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, p)| p.as_path())
    }

    pub fn record(&mut self, file_name: &str, identity: FileIdentity, path: PathBuf) {
        self.entries
            .entry(file_name.to_string())
            .or_default()
            .push((identity, path));
    }

    /// Total number of recorded copies.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Locates attachment files and imports them from the external library.
#[derive(Debug)]
pub struct AttachmentResolver {
    attachments_root: PathBuf,
    external_library: Option<PathBuf>,
    copy_dir: PathBuf,
    /// GUID directory name → path, built on first use.
    guid_dirs: Option<HashMap<String, PathBuf>>,
    /// File name → first matching path in the external library, built on first use.
    library_files: Option<HashMap<String, PathBuf>>,
    copies: CopyCache,
    stats: AttachmentStats,
}

impl AttachmentResolver {
    /// Create a resolver whose copies land in `ExtAttachmentCopies` beside `attachments_root`.
    pub fn new(attachments_root: impl Into<PathBuf>, external_library: Option<PathBuf>) -> Self {
        let attachments_root = attachments_root.into();
        let copy_dir = default_copy_dir(&attachments_root);
        Self::with_copy_dir(attachments_root, external_library, copy_dir)
    }

    /// Create a resolver with an explicit copy directory.
    pub fn with_copy_dir(
        attachments_root: impl Into<PathBuf>,
        external_library: Option<PathBuf>,
        copy_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            attachments_root: attachments_root.into(),
            external_library,
            copy_dir: copy_dir.into(),
            guid_dirs: None,
            library_files: None,
            copies: CopyCache::default(),
            stats: AttachmentStats::default(),
        }
    }

    pub fn attachments_root(&self) -> &Path {
        &self.attachments_root
    }

    pub fn copy_dir(&self) -> &Path {
        &self.copy_dir
    }

    pub fn stats(&self) -> AttachmentStats {
        self.stats
    }

    pub fn copies(&self) -> &CopyCache {
        &self.copies
    }

    /// Resolve one attachment.
    ///
    /// A GUID directory under the attachments root wins; the file inside it is
    /// not checked for existence. Otherwise the external library is searched by
    /// name and the file is imported. An `Err` only comes from a failed import.
    pub fn resolve(&mut self, reference: &AttachmentRef) -> Result<Attachment> {
        let file_name = reference.file_name.as_str();

        if !reference.guid.is_empty() {
            if let Some(dir) = self.find_guid_dir(&reference.guid) {
                let path = dir.join(plain_file_name(file_name)?);
                self.stats.local += 1;
                return Ok(Attachment::resolved(file_name, path));
            }
        }

        if let Some(source) = self.find_library_file(file_name) {
            let path = self.import_external(&source, file_name)?;
            return Ok(Attachment::resolved(file_name, path));
        }

        debug!(guid = %reference.guid, file = file_name, "Attachment not found");
        self.stats.unresolved += 1;
        Ok(Attachment::unresolved(file_name))
    }

    /// Find the directory named `guid` anywhere under the attachments root.
    pub fn find_guid_dir(&mut self, guid: &str) -> Option<PathBuf> {
        let root = &self.attachments_root;
        self.guid_dirs
            .get_or_insert_with(|| index_tree(root, EntryKind::Dir))
            .get(guid)
            .cloned()
    }

    /// Find a file named `file_name` anywhere under the external library.
    pub fn find_library_file(&mut self, file_name: &str) -> Option<PathBuf> {
        let library = self.external_library.as_deref()?;
        self.library_files
            .get_or_insert_with(|| index_tree(library, EntryKind::File))
            .get(file_name)
            .cloned()
    }

    /// Copy `source` into the copy directory unless an identical copy exists.
    pub fn import_external(&mut self, source: &Path, file_name: &str) -> Result<PathBuf> {
        let identity =
            FileIdentity::of(source).map_err(|e| ArchiveError::attachment_io(source, e))?;

        if let Some(existing) = self.copies.lookup(file_name, &identity) {
            self.stats.reused += 1;
            return Ok(existing.to_path_buf());
        }

        std::fs::create_dir_all(&self.copy_dir)
            .map_err(|e| ArchiveError::attachment_io(&self.copy_dir, e))?;

        let base = self.copy_dir.join(plain_file_name(file_name)?);
        let mut dest = base.clone();
        let mut seq = 0u32;
        while dest.exists() {
            // A same-identity file left by an earlier run is as good as a fresh copy.
            if FileIdentity::of(&dest).is_ok_and(|id| id == identity) {
                debug!(path = %dest.display(), "Reusing existing copy");
                self.copies.record(file_name, identity, dest.clone());
                self.stats.reused += 1;
                return Ok(dest);
            }
            seq += 1;
            dest = suffixed_path(&base, seq);
        }

        let bytes =
            std::fs::copy(source, &dest).map_err(|e| ArchiveError::attachment_io(&dest, e))?;
        preserve_mtime(&dest, identity.modified);

        info!(
            from = %source.display(),
            to = %dest.display(),
            bytes,
            "Copied external attachment"
        );
        self.copies.record(file_name, identity, dest.clone());
        self.stats.copied += 1;
        self.stats.bytes_copied += bytes;
        Ok(dest)
    }

    /// Count an attachment that failed to import as unresolved.
    pub fn note_unresolved(&mut self) {
        self.stats.unresolved += 1;
    }
}

/// Stamp `dest` with the source modification time. Best-effort: the copy is
/// still recorded when the filesystem refuses, it just won't be recognized by
/// a later run.
fn preserve_mtime(dest: &Path, modified: std::time::SystemTime) -> bool {
    match filetime::set_file_mtime(dest, FileTime::from_system_time(modified)) {
        Ok(()) => true,
        Err(e) => {
            warn!(path = %dest.display(), error = %e, "Could not preserve modification time");
            false
        }
    }
}

/// Default copy directory: `ExtAttachmentCopies` beside the attachments root.
pub fn default_copy_dir(attachments_root: &Path) -> PathBuf {
    attachments_root
        .parent()
        .unwrap_or(Path::new("."))
        .join(COPY_DIR_NAME)
}

#[derive(Clone, Copy)]
enum EntryKind {
    Dir,
    File,
}

/// Map entry names under `root` to their first path in sorted walk order.
///
/// Unreadable entries are logged and skipped without ending the walk.
fn index_tree(root: &Path, kind: EntryKind) -> HashMap<String, PathBuf> {
    let mut index = HashMap::new();
    if !root.is_dir() {
        debug!(path = %root.display(), "Search root does not exist");
        return index;
    }

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let wanted = match kind {
            EntryKind::Dir => entry.file_type().is_dir(),
            EntryKind::File => entry.file_type().is_file(),
        };
        if !wanted {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        index.entry(name).or_insert_with(|| entry.into_path());
    }

    debug!(root = %root.display(), entries = index.len(), "Indexed search root");
    index
}

/// Reject declared names that would escape their directory.
fn plain_file_name(file_name: &str) -> Result<&Path> {
    let path = Path::new(file_name);
    match path.file_name() {
        Some(name) if name == path.as_os_str() => Ok(path),
        _ => Err(ArchiveError::InvalidPath(file_name.to_string())),
    }
}

/// `dir/photo.jpg` → `dir/photo_<seq>.jpg`.
fn suffixed_path(path: &Path, seq: u32) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let parent = path.parent().unwrap_or(Path::new("."));
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => parent.join(format!("{stem}_{seq}.{ext}")),
        _ => parent.join(format!("{stem}_{seq}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(guid: &str, file_name: &str) -> AttachmentRef {
        AttachmentRef {
            guid: guid.to_string(),
            file_name: file_name.to_string(),
        }
    }

    fn set_mtime(path: &Path, secs: i64) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    #[test]
    fn test_suffixed_path() {
        let p = Path::new("/x/photo.jpg");
        assert_eq!(suffixed_path(p, 1), PathBuf::from("/x/photo_1.jpg"));
        assert_eq!(
            suffixed_path(Path::new("/x/README"), 2),
            PathBuf::from("/x/README_2")
        );
    }

    #[test]
    fn test_plain_file_name_rejects_traversal() {
        assert!(plain_file_name("photo.jpg").is_ok());
        assert!(plain_file_name("../photo.jpg").is_err());
        assert!(plain_file_name("a/b.jpg").is_err());
        assert!(plain_file_name("").is_err());
    }

    #[test]
    fn test_default_copy_dir_is_sibling() {
        assert_eq!(
            default_copy_dir(Path::new("/msgs/Attachments")),
            PathBuf::from("/msgs/ExtAttachmentCopies")
        );
    }

    #[test]
    fn test_resolve_by_guid_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Attachments");
        let dir = root.join("0a").join("AAAA1111");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("photo.jpg"), b"jpeg").unwrap();

        let mut resolver = AttachmentResolver::new(&root, None);
        let att = resolver.resolve(&reference("AAAA1111", "photo.jpg")).unwrap();
        assert_eq!(att.file_name, "photo.jpg");
        assert_eq!(att.path, Some(dir.join("photo.jpg")));
        assert_eq!(resolver.stats().local, 1);
    }

    #[test]
    fn test_guid_directory_file_not_checked() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("Attachments").join("BBBB2222");
        std::fs::create_dir_all(&dir).unwrap();

        let mut resolver = AttachmentResolver::new(tmp.path().join("Attachments"), None);
        let att = resolver.resolve(&reference("BBBB2222", "gone.mov")).unwrap();
        assert_eq!(att.path, Some(dir.join("gone.mov")));
    }

    #[test]
    fn test_unresolved_without_library() {
        let tmp = tempfile::tempdir().unwrap();
        let mut resolver = AttachmentResolver::new(tmp.path().join("Attachments"), None);
        let att = resolver.resolve(&reference("AAAA1111", "photo.jpg")).unwrap();
        assert_eq!(att, Attachment::unresolved("photo.jpg"));
        assert_eq!(resolver.stats().unresolved, 1);
    }

    #[test]
    fn test_same_identity_copied_once() {
        let tmp = tempfile::tempdir().unwrap();
        let library = tmp.path().join("Library");
        std::fs::create_dir_all(library.join("2019")).unwrap();
        let src = library.join("2019").join("img.png");
        std::fs::write(&src, b"png-bytes").unwrap();
        set_mtime(&src, 1_560_000_000);

        let copy_dir = tmp.path().join("copies");
        let mut resolver = AttachmentResolver::with_copy_dir(
            tmp.path().join("Attachments"),
            Some(library),
            &copy_dir,
        );
        let a = resolver.resolve(&reference("X", "img.png")).unwrap();
        let b = resolver.resolve(&reference("Y", "img.png")).unwrap();
        assert_eq!(a.path, b.path);
        assert_eq!(a.path, Some(copy_dir.join("img.png")));
        assert_eq!(std::fs::read_dir(&copy_dir).unwrap().count(), 1);
        assert_eq!(resolver.stats().copied, 1);
        assert_eq!(resolver.stats().reused, 1);
        assert_eq!(
            FileIdentity::of(&copy_dir.join("img.png")).unwrap(),
            FileIdentity::of(&src).unwrap()
        );
    }

    #[test]
    fn test_different_identity_gets_new_name() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("one").join("img.png");
        let second = tmp.path().join("two").join("img.png");
        std::fs::create_dir_all(first.parent().unwrap()).unwrap();
        std::fs::create_dir_all(second.parent().unwrap()).unwrap();
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&second, b"second, longer").unwrap();

        let copy_dir = tmp.path().join("copies");
        let mut resolver =
            AttachmentResolver::with_copy_dir(tmp.path().join("Attachments"), None, &copy_dir);
        let a = resolver.import_external(&first, "img.png").unwrap();
        let b = resolver.import_external(&second, "img.png").unwrap();
        assert_eq!(a, copy_dir.join("img.png"));
        assert_eq!(b, copy_dir.join("img_1.png"));
        assert_eq!(std::fs::read(&a).unwrap(), b"first");
        assert_eq!(std::fs::read(&b).unwrap(), b"second, longer");
        assert_eq!(resolver.copies().len(), 2);
    }

    #[test]
    fn test_same_size_different_mtime_is_distinct() {
        let tmp = tempfile::tempdir().unwrap();
        let first = tmp.path().join("one").join("a.txt");
        let second = tmp.path().join("two").join("a.txt");
        std::fs::create_dir_all(first.parent().unwrap()).unwrap();
        std::fs::create_dir_all(second.parent().unwrap()).unwrap();
        std::fs::write(&first, b"same").unwrap();
        std::fs::write(&second, b"SAME").unwrap();
        set_mtime(&first, 1_000_000_000);
        set_mtime(&second, 1_100_000_000);

        let copy_dir = tmp.path().join("copies");
        let mut resolver =
            AttachmentResolver::with_copy_dir(tmp.path().join("Attachments"), None, &copy_dir);
        let a = resolver.import_external(&first, "a.txt").unwrap();
        let b = resolver.import_external(&second, "a.txt").unwrap();
        assert_ne!(a, b);
        assert_eq!(std::fs::read_dir(&copy_dir).unwrap().count(), 2);
    }

    #[test]
    fn test_reuses_copy_from_earlier_run() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("lib").join("doc.pdf");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, b"%PDF").unwrap();
        let copy_dir = tmp.path().join("copies");

        let first_run = {
            let mut r =
                AttachmentResolver::with_copy_dir(tmp.path().join("Attachments"), None, &copy_dir);
            r.import_external(&src, "doc.pdf").unwrap()
        };
        let mut r =
            AttachmentResolver::with_copy_dir(tmp.path().join("Attachments"), None, &copy_dir);
        let second_run = r.import_external(&src, "doc.pdf").unwrap();
        assert_eq!(first_run, second_run);
        assert_eq!(r.stats().reused, 1);
    }

    #[test]
    fn test_preserve_mtime_failure_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.png");
        assert!(!preserve_mtime(&missing, std::time::SystemTime::UNIX_EPOCH));

        let present = tmp.path().join("here.png");
        std::fs::write(&present, b"x").unwrap();
        let modified = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_500_000_000);
        assert!(preserve_mtime(&present, modified));
        assert_eq!(
            FileTime::from_last_modification_time(&std::fs::metadata(&present).unwrap()),
            FileTime::from_unix_time(1_500_000_000, 0)
        );
    }

    #[test]
    fn test_copy_without_preserved_mtime_is_reused_within_run() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("lib").join("img.png");
        std::fs::create_dir_all(src.parent().unwrap()).unwrap();
        std::fs::write(&src, b"png-bytes").unwrap();
        set_mtime(&src, 1_560_000_000);

        let copy_dir = tmp.path().join("copies");
        let mut r =
            AttachmentResolver::with_copy_dir(tmp.path().join("Attachments"), None, &copy_dir);
        let first = r.import_external(&src, "img.png").unwrap();
        // As if the filesystem had ignored the requested modification time.
        set_mtime(&first, 1_700_000_000);

        let second = r.import_external(&src, "img.png").unwrap();
        let third = r.import_external(&src, "img.png").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, third);
        assert_eq!(std::fs::read_dir(&copy_dir).unwrap().count(), 1);
        assert_eq!(r.stats().copied, 1);
        assert_eq!(r.stats().reused, 2);
    }

    #[test]
    fn test_import_missing_source_is_attachment_io() {
        let tmp = tempfile::tempdir().unwrap();
        let mut r = AttachmentResolver::new(tmp.path().join("Attachments"), None);
        let err = r
            .import_external(&tmp.path().join("missing.jpg"), "missing.jpg")
            .unwrap_err();
        assert!(matches!(err, ArchiveError::AttachmentIo { .. }));
    }
}
