//! Virtual filesystem: the only way the pipeline touches files.
//!
//! [`Filesystem`] is the capability set the stage-and-commit pipeline needs:
//! open/create/stat/chmod/chown/rename/remove/mkdir plus "create a uniquely
//! named file inside a directory". Two implementations ship here:
//!
//! | Type         | Backing store                          | Used by            |
//! |--------------|----------------------------------------|--------------------|
//! | [`OsFs`]     | the host filesystem via `std::fs`      | the binary         |
//! | [`MemoryFs`] | an in-memory tree with fault injection | tests, embedding   |

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Metadata returned by [`Filesystem::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Permission bits only (`0o7777` mask).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub len: u64,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

/// Abstract filesystem capability used by the loader and the pipeline.
pub trait Filesystem: Send + Sync {
    /// Open an existing file for reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Create or truncate `path` for writing. `mode` applies only when the
    /// file is newly created.
    fn create(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send>>;

    /// Create a uniquely named file inside `dir` whose name starts with
    /// `prefix`. The file persists until explicitly removed.
    fn create_temp(&self, dir: &Path, prefix: &str)
        -> io::Result<(PathBuf, Box<dyn Write + Send>)>;

    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()>;

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Entries directly inside `path`, sorted.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// `Ok(false)` only for `NotFound`; other stat failures propagate.
    fn exists(&self, path: &Path) -> io::Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open(path)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Whether `path` itself is a symbolic link. [`Filesystem::stat`] follows
    /// links; this does not.
    fn is_symlink(&self, _path: &Path) -> io::Result<bool> {
        Ok(false)
    }

    /// Truncating write of the whole file.
    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        let mut file = self.create(path, mode)?;
        file.write_all(data)?;
        file.flush()
    }
}

/// Whether a rename failed because the target is a busy or mounted resource.
///
/// Prefers the OS error number, then the portable [`io::ErrorKind`], and only
/// falls back to matching the platform message.
pub fn is_resource_busy(err: &io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EBUSY) {
        return true;
    }
    if err.kind() == io::ErrorKind::ResourceBusy {
        return true;
    }
    err.to_string().to_lowercase().contains("device or resource busy")
}

// ---------------------------------------------------------------------------
// OsFs
// ---------------------------------------------------------------------------

/// [`Filesystem`] backed by the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl Filesystem for OsFs {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(std::fs::File::open(path)?))
    }

    fn create(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send>> {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(Box::new(options.open(path)?))
    }

    fn create_temp(
        &self,
        dir: &Path,
        prefix: &str,
    ) -> io::Result<(PathBuf, Box<dyn Write + Send>)> {
        let named = tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?;
        let (file, path) = named.keep().map_err(|e| e.error)?;
        Ok((path, Box::new(file)))
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = std::fs::metadata(path)?;
        #[cfg(unix)]
        let (mode, uid, gid) = {
            use std::os::unix::fs::MetadataExt;
            (meta.mode() & 0o7777, meta.uid(), meta.gid())
        };
        #[cfg(not(unix))]
        let (mode, uid, gid) = {
            let mode = if meta.permissions().readonly() { 0o444 } else { 0o644 };
            (mode, 0, 0)
        };
        Ok(FileStat {
            mode,
            uid,
            gid,
            len: meta.len(),
            is_dir: meta.is_dir(),
            modified: meta.modified().ok(),
        })
    }

    #[cfg(unix)]
    fn chmod(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn chmod(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
    }

    #[cfg(not(unix))]
    fn chown(&self, _path: &Path, _uid: u32, _gid: u32) -> io::Result<()> {
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(path)
    }

    fn is_symlink(&self, path: &Path) -> io::Result<bool> {
        Ok(std::fs::symlink_metadata(path)?.file_type().is_symlink())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(path)? {
            entries.push(entry?.path());
        }
        entries.sort();
        Ok(entries)
    }
}

// ---------------------------------------------------------------------------
// MemoryFs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum MemNode {
    File {
        data: Vec<u8>,
        mode: u32,
        uid: u32,
        gid: u32,
        modified: SystemTime,
    },
    Dir {
        mode: u32,
    },
}

#[derive(Debug, Default)]
struct MemState {
    nodes: BTreeMap<PathBuf, MemNode>,
    temp_counter: u64,
    uid: u32,
    gid: u32,
    rename_fault: Option<io::ErrorKind>,
    write_faults: Vec<PathBuf>,
}

impl MemState {
    fn is_dir(&self, path: &Path) -> bool {
        if path.parent().is_none() || path.as_os_str().is_empty() {
            return true;
        }
        matches!(self.nodes.get(path), Some(MemNode::Dir { .. }))
    }

    fn require_parent(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if !self.is_dir(parent) => Err(not_found(parent)),
            _ => Ok(()),
        }
    }

    fn write_blocked(&self, path: &Path) -> bool {
        self.write_faults.iter().any(|dir| path.starts_with(dir))
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

/// Thread-safe in-memory [`Filesystem`].
///
/// The root directory always exists; every other directory must be created
/// with [`Filesystem::mkdir_all`] before files can be placed in it. New files
/// are owned by the uid/gid given to [`MemoryFs::with_owner`] (default 0/0).
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    state: Arc<Mutex<MemState>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner applied to newly created files.
    pub fn with_owner(uid: u32, gid: u32) -> Self {
        let fs = Self::default();
        if let Ok(mut state) = fs.state.lock() {
            state.uid = uid;
            state.gid = gid;
        }
        fs
    }

    /// Make the next `rename` fail with `kind`.
    pub fn inject_rename_error(&self, kind: io::ErrorKind) -> io::Result<()> {
        self.lock()?.rename_fault = Some(kind);
        Ok(())
    }

    /// Make every write to a file under `dir` fail.
    pub fn inject_write_error(&self, dir: impl Into<PathBuf>) -> io::Result<()> {
        self.lock()?.write_faults.push(dir.into());
        Ok(())
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, MemState>> {
        self.state
            .lock()
            .map_err(|_| io::Error::other("memory filesystem lock poisoned"))
    }

    fn writer(&self, path: PathBuf) -> Box<dyn Write + Send> {
        Box::new(MemWriter {
            state: Arc::clone(&self.state),
            path,
        })
    }
}

struct MemWriter {
    state: Arc<Mutex<MemState>>,
    path: PathBuf,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("memory filesystem lock poisoned"))?;
        if state.write_blocked(&self.path) {
            return Err(io::Error::other(format!(
                "injected write failure at {}",
                self.path.display()
            )));
        }
        match state.nodes.get_mut(&self.path) {
            Some(MemNode::File { data, modified, .. }) => {
                data.extend_from_slice(buf);
                *modified = SystemTime::now();
                Ok(buf.len())
            }
            _ => Err(not_found(&self.path)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Filesystem for MemoryFs {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let state = self.lock()?;
        match state.nodes.get(path) {
            Some(MemNode::File { data, .. }) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(MemNode::Dir { .. }) => Err(io::Error::other(format!(
                "{}: is a directory",
                path.display()
            ))),
            None => Err(not_found(path)),
        }
    }

    fn create(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send>> {
        let mut state = self.lock()?;
        state.require_parent(path)?;
        let (uid, gid) = (state.uid, state.gid);
        match state.nodes.get_mut(path) {
            Some(MemNode::File { data, modified, .. }) => {
                data.clear();
                *modified = SystemTime::now();
            }
            Some(MemNode::Dir { .. }) => {
                return Err(io::Error::other(format!("{}: is a directory", path.display())));
            }
            None => {
                state.nodes.insert(
                    path.to_path_buf(),
                    MemNode::File {
                        data: Vec::new(),
                        mode: mode & 0o7777,
                        uid,
                        gid,
                        modified: SystemTime::now(),
                    },
                );
            }
        }
        Ok(self.writer(path.to_path_buf()))
    }

    fn create_temp(
        &self,
        dir: &Path,
        prefix: &str,
    ) -> io::Result<(PathBuf, Box<dyn Write + Send>)> {
        let mut state = self.lock()?;
        if !state.is_dir(dir) {
            return Err(not_found(dir));
        }
        let path = loop {
            state.temp_counter += 1;
            let candidate = dir.join(format!("{prefix}{:06}", state.temp_counter));
            if !state.nodes.contains_key(&candidate) {
                break candidate;
            }
        };
        let (uid, gid) = (state.uid, state.gid);
        state.nodes.insert(
            path.clone(),
            MemNode::File {
                data: Vec::new(),
                mode: 0o600,
                uid,
                gid,
                modified: SystemTime::now(),
            },
        );
        drop(state);
        let writer = self.writer(path.clone());
        Ok((path, writer))
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let state = self.lock()?;
        match state.nodes.get(path) {
            Some(MemNode::File {
                data,
                mode,
                uid,
                gid,
                modified,
            }) => Ok(FileStat {
                mode: *mode,
                uid: *uid,
                gid: *gid,
                len: data.len() as u64,
                is_dir: false,
                modified: Some(*modified),
            }),
            Some(MemNode::Dir { mode }) => Ok(FileStat {
                mode: *mode,
                uid: state.uid,
                gid: state.gid,
                len: 0,
                is_dir: true,
                modified: None,
            }),
            None if state.is_dir(path) => Ok(FileStat {
                mode: 0o755,
                uid: 0,
                gid: 0,
                len: 0,
                is_dir: true,
                modified: None,
            }),
            None => Err(not_found(path)),
        }
    }

    fn chmod(&self, path: &Path, new_mode: u32) -> io::Result<()> {
        let mut state = self.lock()?;
        match state.nodes.get_mut(path) {
            Some(MemNode::File { mode, .. }) | Some(MemNode::Dir { mode }) => {
                *mode = new_mode & 0o7777;
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }

    fn chown(&self, path: &Path, new_uid: u32, new_gid: u32) -> io::Result<()> {
        let mut state = self.lock()?;
        match state.nodes.get_mut(path) {
            Some(MemNode::File { uid, gid, .. }) => {
                *uid = new_uid;
                *gid = new_gid;
                Ok(())
            }
            Some(MemNode::Dir { .. }) => Ok(()),
            None => Err(not_found(path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut state = self.lock()?;
        if let Some(kind) = state.rename_fault.take() {
            return Err(io::Error::new(kind, "injected rename failure"));
        }
        state.require_parent(to)?;
        if matches!(state.nodes.get(to), Some(MemNode::Dir { .. })) {
            return Err(io::Error::other(format!("{}: is a directory", to.display())));
        }
        let node = state.nodes.remove(from).ok_or_else(|| not_found(from))?;
        state.nodes.insert(to.to_path_buf(), node);
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let mut state = self.lock()?;
        match state.nodes.get(path) {
            Some(MemNode::File { .. }) => {
                state.nodes.remove(path);
                Ok(())
            }
            Some(MemNode::Dir { .. }) => Err(io::Error::other(format!(
                "{}: is a directory",
                path.display()
            ))),
            None => Err(not_found(path)),
        }
    }

    fn mkdir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        let mut state = self.lock()?;
        let mut missing = Vec::new();
        for ancestor in path.ancestors() {
            if state.is_dir(ancestor) {
                break;
            }
            if state.nodes.contains_key(ancestor) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{}: not a directory", ancestor.display()),
                ));
            }
            missing.push(ancestor.to_path_buf());
        }
        for dir in missing {
            state.nodes.insert(dir, MemNode::Dir { mode: mode & 0o7777 });
        }
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let state = self.lock()?;
        if !state.is_dir(path) {
            return Err(not_found(path));
        }
        Ok(state
            .nodes
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
