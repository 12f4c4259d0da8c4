use crate::encoding::TextEncoding;
use crate::errors::{Error, Result};
use fs2::FileExt;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

/// One reader/writer lock per absolute file path that is currently in use.
///
/// Entries are created on first use and dropped again by the last
/// [`PathLock`] released, so the map only holds paths with an access in flight.
static PATH_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>> = Lazy::new(Default::default);

/// A counted reference to the lock of one path.
struct PathLock {
    path: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl PathLock {
    fn acquire(path: &Path) -> Self {
        let lock = PATH_LOCKS.lock().entry(path.to_path_buf()).or_default().clone();
        Self {
            path: path.to_path_buf(),
            lock,
        }
    }
}

impl Deref for PathLock {
    type Target = RwLock<()>;

    fn deref(&self) -> &Self::Target {
        &self.lock
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        let mut locks = PATH_LOCKS.lock();
        // Clones are only handed out under the map mutex, so a count of two
        // (the map's and ours) means nobody else is waiting on this path.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.path);
        }
    }
}

/// The line terminator written back after every line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    #[default]
    Lf,
    CrLf,
}

impl LineEnding {
    /// Picks the terminator of the first line break in `text`.
    pub fn detect(text: &str) -> Self {
        match text.find('\n') {
            Some(pos) if text[..pos].ends_with('\r') => LineEnding::CrLf,
            _ => LineEnding::Lf,
        }
    }

    /// The terminator as text.
    pub fn as_str(&self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
        }
    }
}

/// The decoded lines of a file together with the terminator they used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub lines: Vec<String>,
    pub ending: LineEnding,
    /// Set when decoding replaced malformed input, so the lines do not match the file.
    pub lossy: bool,
}

impl Snapshot {
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            ending: LineEnding::detect(text),
            lossy: false,
        }
    }

    /// Joins the lines back into text, terminating every line.
    pub fn render(&self) -> String {
        let ending = self.ending.as_str();
        let capacity = self.lines.iter().map(|l| l.len() + ending.len()).sum();
        let mut text = String::with_capacity(capacity);
        for line in &self.lines {
            text.push_str(line);
            text.push_str(ending);
        }
        text
    }
}

/// Whole-file access to the lines of one file.
///
/// Reads hold the path's shared lock and rewrites hold its exclusive lock for
/// the entire read-modify-write, so concurrent handles on the same path never
/// interleave a rewrite. Handles on different paths do not contend.
#[derive(Debug, Clone)]
pub struct LineStore {
    path: PathBuf,
    encoding: TextEncoding,
    create_backup: bool,
    cross_process_lock: bool,
}

impl LineStore {
    /// Creates the file if it does not exist and resolves it to an absolute path.
    pub fn create(path: &Path) -> Result<PathBuf> {
        OpenOptions::new().create(true).append(true).open(path)?;
        Ok(path.canonicalize()?)
    }

    /// A store for the already created file at `path`, read and written as `encoding`.
    pub fn new(path: PathBuf, encoding: TextEncoding) -> Self {
        Self {
            path,
            encoding,
            create_backup: false,
            cross_process_lock: false,
        }
    }

    /// Copies the current file to `<file>.bak` before each rewrite.
    pub fn with_backup(mut self, create_backup: bool) -> Self {
        self.create_backup = create_backup;
        self
    }

    /// Also takes an advisory lock on `<file>.lock` for every access.
    pub fn with_cross_process_lock(mut self, enabled: bool) -> Self {
        self.cross_process_lock = enabled;
        self
    }

    /// The absolute path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The encoding used for reads and writes.
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Reads the current lines under the shared lock.
    pub fn read(&self) -> Result<Vec<String>> {
        let lock = PathLock::acquire(&self.path);
        let _guard = lock.read();
        let _advisory = self.advisory_lock(false)?;
        Ok(self.load()?.lines)
    }

    /// Runs one read-modify-write cycle under the exclusive lock.
    ///
    /// `edit` returns its result and whether it changed the lines; the file is
    /// only rewritten in the latter case. A file that did not decode cleanly is
    /// never rewritten: the change fails with [`Error::LossyDecode`] and the
    /// file is left untouched.
    pub fn modify<T>(&self, edit: impl FnOnce(&mut Vec<String>) -> (T, bool)) -> Result<T> {
        let lock = PathLock::acquire(&self.path);
        let _guard = lock.write();
        let _advisory = self.advisory_lock(true)?;

        let mut snapshot = self.load()?;
        let (result, changed) = edit(&mut snapshot.lines);
        if changed {
            if snapshot.lossy {
                return Err(Error::LossyDecode {
                    path: self.path.clone(),
                    encoding: self.encoding.label().to_string(),
                });
            }
            self.store(&snapshot)?;
        }
        Ok(result)
    }

    fn load(&self) -> Result<Snapshot> {
        let bytes = fs::read(&self.path)?;
        let (text, lossy) = self.encoding.decode_with_errors(&bytes);
        Ok(Snapshot {
            lossy,
            ..Snapshot::parse(&text)
        })
    }

    /// Replaces the file atomically: the new contents go to a temporary file in
    /// the same directory which is then persisted over the original.
    fn store(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = self.encoding.encode(&snapshot.render());

        if self.create_backup && self.path.exists() {
            let backup_path = format!("{}.bak", self.path.display());
            fs::copy(&self.path, &backup_path)?;
        }

        let parent = self
            .path
            .parent()
            .ok_or_else(|| format!("Could not get parent directory for {}", self.path.display()))?;
        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(&bytes)?;
        temp_file.as_file().sync_all()?;

        // Preserve file permissions
        if let Ok(metadata) = fs::metadata(&self.path) {
            fs::set_permissions(temp_file.path(), metadata.permissions())?;
        }

        temp_file.persist(&self.path)?;
        debug!(
            path = %self.path.display(),
            lines = snapshot.lines.len(),
            encoding = %self.encoding,
            "rewrote file"
        );
        Ok(())
    }

    fn advisory_lock(&self, exclusive: bool) -> Result<Option<AdvisoryLock>> {
        if !self.cross_process_lock {
            return Ok(None);
        }
        let lock_path = format!("{}.lock", self.path.display());
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)?;
        if exclusive {
            FileExt::lock_exclusive(&file)?;
        } else {
            FileExt::lock_shared(&file)?;
        }
        Ok(Some(AdvisoryLock { file }))
    }
}

/// Holds an `fs2` lock on a sidecar file until dropped.
///
/// The data file itself cannot carry the lock because every rewrite replaces
/// it with a new inode.
struct AdvisoryLock {
    file: File,
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
