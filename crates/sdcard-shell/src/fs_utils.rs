//! File helpers for the mounted card.
//!
//! Every helper checks the daemon's readiness query first and fails with
//! [`ShellError::CardNotReady`] instead of touching the filesystem. A card
//! can still be pulled between that check and the I/O itself, so callers
//! must treat I/O errors as normal outcomes.

use std::fs::{self, File, OpenOptions, ReadDir};
use std::io::{self, Write};
use std::iter::FusedIterator;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use sdcard_daemon::SdCardDaemon;

use crate::error::{ShellError, ShellResult};

/// Sector size used when reporting free space in sectors.
pub const SECTOR_SIZE: u64 = 512;

/// How [`CardFs::open_file`] opens a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read only.
    Read,
    /// Create or truncate, write only.
    Write,
    /// Create if missing, append.
    Append,
}

impl OpenMode {
    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Self::Read => options.read(true),
            Self::Write => options.write(true).create(true).truncate(true),
            Self::Append => options.append(true).create(true),
        };
        options
    }
}

/// Kind of directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Anything else (links, devices).
    Other,
}

impl EntryKind {
    /// Short name for listings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "dir",
            Self::Other => "other",
        }
    }
}

/// One entry yielded by [`DirIter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// File name within the directory.
    pub name: String,
    /// Entry kind.
    pub kind: EntryKind,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Last modification time, if the filesystem records one.
    pub modified: Option<SystemTime>,
}

/// Iterator over one directory.
///
/// Owns the directory handle exclusively and closes it as soon as the
/// listing is exhausted or the iterator is dropped. Not restartable: once
/// it returns `None` it keeps returning `None`.
#[derive(Debug)]
pub struct DirIter {
    path: PathBuf,
    handle: Option<ReadDir>,
}

impl DirIter {
    fn open(path: PathBuf) -> ShellResult<Self> {
        let handle = fs::read_dir(&path).map_err(|e| ShellError::io("read_dir", &path, e))?;
        Ok(Self {
            path,
            handle: Some(handle),
        })
    }

    /// Directory being listed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory handle has been released.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.handle.is_none()
    }

    fn describe(entry: &fs::DirEntry) -> ShellResult<DirEntryInfo> {
        let metadata = entry
            .metadata()
            .map_err(|e| ShellError::io("stat", entry.path(), e))?;
        let kind = if metadata.is_dir() {
            EntryKind::Dir
        } else if metadata.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        Ok(DirEntryInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind,
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            modified: metadata.modified().ok(),
        })
    }
}

impl Iterator for DirIter {
    type Item = ShellResult<DirEntryInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.handle.as_mut()?.next();
        match next {
            None => {
                self.handle = None;
                None
            }
            Some(Ok(entry)) => Some(Self::describe(&entry)),
            Some(Err(e)) => Some(Err(ShellError::io("read_dir", &self.path, e))),
        }
    }
}

impl FusedIterator for DirIter {}

type ReadinessFn = dyn Fn() -> bool + Send + Sync;

/// Readiness-gated view of the card's mount root.
///
/// Paths given to the helpers are interpreted relative to the mount root;
/// a leading `/` is allowed and `..` is rejected.
#[derive(Clone)]
pub struct CardFs {
    root: PathBuf,
    ready: Arc<ReadinessFn>,
}

impl CardFs {
    /// Gate on a daemon's readiness query.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, daemon: Arc<SdCardDaemon>) -> Self {
        Self::with_readiness(root, move || daemon.is_card_working())
    }

    /// Gate on an arbitrary readiness probe.
    #[must_use]
    pub fn with_readiness(
        root: impl Into<PathBuf>,
        ready: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            root: root.into(),
            ready: Arc::new(ready),
        }
    }

    /// Mount root on the host.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current readiness.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        (self.ready)()
    }

    fn ensure_ready(&self) -> ShellResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ShellError::CardNotReady)
        }
    }

    /// Map a card path onto the host path under the mount root.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::InvalidPath`] for paths containing `..`.
    pub fn resolve(&self, path: &str) -> ShellResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(ShellError::InvalidPath(path.to_string()));
                }
            }
        }
        Ok(resolved)
    }

    /// List a directory.
    ///
    /// # Errors
    ///
    /// Fails if the card is not ready, the path is invalid or the directory
    /// cannot be opened.
    pub fn read_dir(&self, path: &str) -> ShellResult<DirIter> {
        self.ensure_ready()?;
        DirIter::open(self.resolve(path)?)
    }

    /// Open a file.
    ///
    /// # Errors
    ///
    /// Fails if the card is not ready, the path is invalid or the open fails.
    pub fn open_file(&self, path: &str, mode: OpenMode) -> ShellResult<File> {
        self.ensure_ready()?;
        let resolved = self.resolve(path)?;
        mode.options()
            .open(&resolved)
            .map_err(|e| ShellError::io("open", resolved, e))
    }

    /// Read a whole file as UTF-8 (lossy).
    ///
    /// # Errors
    ///
    /// Fails if the card is not ready or the read fails.
    pub fn read_to_string(&self, path: &str) -> ShellResult<String> {
        self.ensure_ready()?;
        let resolved = self.resolve(path)?;
        let bytes = fs::read(&resolved).map_err(|e| ShellError::io("read", resolved, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write `data`, then flush and sync it to the medium.
    ///
    /// # Errors
    ///
    /// Fails if the card is not ready or any write, flush or sync fails.
    pub fn write_all_synced(&self, path: &str, data: &[u8], mode: OpenMode) -> ShellResult<()> {
        let mut file = self.open_file(path, mode)?;
        let resolved = self.resolve(path)?;
        file.write_all(data)
            .map_err(|e| ShellError::io("write", &resolved, e))?;
        file.flush()
            .map_err(|e| ShellError::io("flush", &resolved, e))?;
        file.sync_all()
            .map_err(|e| ShellError::io("sync", resolved, e))
    }

    /// Create one directory. An existing directory is not an error.
    ///
    /// # Errors
    ///
    /// Fails if the card is not ready or the parent does not exist.
    pub fn mkdir(&self, path: &str) -> ShellResult<PathBuf> {
        self.ensure_ready()?;
        let resolved = self.resolve(path)?;
        match fs::create_dir(&resolved) {
            Ok(()) => Ok(resolved),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && resolved.is_dir() => {
                Ok(resolved)
            }
            Err(e) => Err(ShellError::io("mkdir", resolved, e)),
        }
    }

    /// Join `parts` under the mount root, creating every level.
    ///
    /// Returns the card path of the deepest directory.
    ///
    /// # Errors
    ///
    /// Fails if the card is not ready, a part is invalid or creation fails.
    pub fn mkdir_parts(&self, parts: &[&str]) -> ShellResult<String> {
        self.ensure_ready()?;
        let mut card_path = String::new();
        for part in parts.iter().flat_map(|p| p.split('/')).filter(|p| !p.is_empty()) {
            card_path.push('/');
            card_path.push_str(part);
            self.mkdir(&card_path)?;
        }
        if card_path.is_empty() {
            card_path.push('/');
        }
        Ok(card_path)
    }

    /// Set a file's modification time.
    ///
    /// # Errors
    ///
    /// Fails if the card is not ready or the file cannot be updated.
    pub fn touch_mtime(&self, path: &str, time: SystemTime) -> ShellResult<()> {
        self.ensure_ready()?;
        let resolved = self.resolve(path)?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&resolved)
            .map_err(|e| ShellError::io("open", &resolved, e))?;
        file.set_modified(time)
            .map_err(|e| ShellError::io("set_modified", resolved, e))
    }

    /// Bytes available on the volume holding the mount root.
    ///
    /// # Errors
    ///
    /// Fails if the card is not ready or the volume cannot be queried.
    pub fn free_space_bytes(&self) -> ShellResult<u64> {
        self.ensure_ready()?;
        volume_free_bytes(&self.root).map_err(|e| ShellError::io("statvfs", &self.root, e))
    }

    /// Free space in [`SECTOR_SIZE`] sectors.
    ///
    /// # Errors
    ///
    /// Same as [`free_space_bytes`](Self::free_space_bytes).
    pub fn free_space_sectors(&self) -> ShellResult<u64> {
        Ok(self.free_space_bytes()? / SECTOR_SIZE)
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn volume_free_bytes(path: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is NUL-terminated and `stat` is writable storage of
    // the type statvfs fills in.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: statvfs returned 0, so every field of `stat` is initialized.
    let stat = unsafe { stat.assume_init() };
    #[allow(clippy::useless_conversion)]
    let (available, fragment) = (u64::from(stat.f_bavail), u64::from(stat.f_frsize));
    Ok(available.saturating_mul(fragment))
}

#[cfg(not(unix))]
fn volume_free_bytes(_path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "free space query not supported on this platform",
    ))
}

impl std::fmt::Debug for CardFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardFs")
            .field("root", &self.root)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn card(root: &Path) -> (CardFs, Arc<AtomicBool>) {
        let ready = Arc::new(AtomicBool::new(true));
        let probe = Arc::clone(&ready);
        let fs = CardFs::with_readiness(root, move || probe.load(Ordering::SeqCst));
        (fs, ready)
    }

    #[test]
    fn test_helpers_refuse_when_not_ready() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (fs, ready) = card(dir.path());
        ready.store(false, Ordering::SeqCst);

        assert!(matches!(fs.read_dir("/"), Err(ShellError::CardNotReady)));
        assert!(matches!(fs.read_to_string("/a"), Err(ShellError::CardNotReady)));
        assert!(matches!(fs.mkdir("/d"), Err(ShellError::CardNotReady)));
        assert!(matches!(
            fs.write_all_synced("/a", b"x", OpenMode::Write),
            Err(ShellError::CardNotReady)
        ));
        assert!(!dir.path().join("d").exists());
        Ok(())
    }

    #[test]
    fn test_resolve_rejects_parent_components() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (fs, _) = card(dir.path());

        assert_eq!(fs.resolve("/logs/a.txt")?, dir.path().join("logs").join("a.txt"));
        assert_eq!(fs.resolve("./x")?, dir.path().join("x"));
        assert!(matches!(fs.resolve("/../etc"), Err(ShellError::InvalidPath(_))));
        Ok(())
    }

    #[test]
    fn test_write_then_read_back() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (fs, _) = card(dir.path());

        fs.write_all_synced("/note.txt", b"first\n", OpenMode::Write)?;
        fs.write_all_synced("/note.txt", b"second\n", OpenMode::Append)?;
        assert_eq!(fs.read_to_string("/note.txt")?, "first\nsecond\n");
        Ok(())
    }

    #[test]
    fn test_mkdir_parts_creates_each_level() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (fs, _) = card(dir.path());

        let path = fs.mkdir_parts(&["logs", "2024/06", "run1"])?;
        assert_eq!(path, "/logs/2024/06/run1");
        assert!(dir.path().join("logs/2024/06/run1").is_dir());

        // Existing directories are fine.
        fs.mkdir("/logs")?;
        Ok(())
    }

    #[test]
    fn test_dir_iter_lists_and_releases_handle() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (fs, _) = card(dir.path());
        fs.write_all_synced("/a.bin", &[0u8; 10], OpenMode::Write)?;
        fs.mkdir("/sub")?;

        let mut iter = fs.read_dir("/")?;
        let mut entries: Vec<DirEntryInfo> = iter.by_ref().collect::<Result<_, _>>()?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert!(iter.is_exhausted());
        assert!(iter.next().is_none());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.first().map(|e| (e.kind, e.size)), Some((EntryKind::File, 10)));
        assert_eq!(entries.get(1).map(|e| e.kind), Some(EntryKind::Dir));
        Ok(())
    }

    #[test]
    fn test_free_space_reported_when_ready() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (fs, ready) = card(dir.path());

        let bytes = fs.free_space_bytes()?;
        assert!(bytes > 0);
        assert!(fs.free_space_sectors()? > 0);

        ready.store(false, Ordering::SeqCst);
        assert!(matches!(fs.free_space_bytes(), Err(ShellError::CardNotReady)));
        assert!(matches!(fs.free_space_sectors(), Err(ShellError::CardNotReady)));
        Ok(())
    }

    #[test]
    fn test_touch_mtime_sets_time() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (fs, _) = card(dir.path());
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        fs.touch_mtime("/stamp", when)?;
        let modified = std::fs::metadata(dir.path().join("stamp"))?.modified()?;
        assert_eq!(modified, when);
        Ok(())
    }
}
