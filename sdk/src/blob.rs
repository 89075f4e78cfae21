//! Crash-safe file writes and the flat blob directory.
//!
//! New content is always written into a locked temporary file next to its
//! destination and renamed over it only after it has been synced. A crash at any
//! point before the rename leaves the destination untouched.

use {
    anyhow::{Context as _, Result},
    blobcrypt_format::{Address, ArchiveError, DateTimeUtc},
    fs_err::File,
    std::{
        fs,
        io::{self, Write},
        path::{Path, PathBuf},
        time::SystemTime,
    },
    tempfile::NamedTempFile,
    tracing::{debug, warn},
};

pub const BLOB_TMP_SUFFIX: &str = ".blob-tmp";
pub const ARCHIVE_TMP_SUFFIX: &str = ".archive-tmp";
pub const EXTRACT_TMP_SUFFIX: &str = ".extract-tmp";

fn lock_error(path: &Path, err: &io::Error) -> ArchiveError {
    debug!(?err, "failed to lock {}", path.display());
    ArchiveError::Locked(path.to_owned())
}

/// Takes a shared advisory lock on a file opened for reading.
///
/// The lock is released when the file is closed.
#[inline]
pub fn lock_shared(file: &File) -> Result<(), ArchiveError> {
    fs2::FileExt::try_lock_shared(file.file()).map_err(|err| lock_error(file.path(), &err))
}

/// A temporary file that replaces its target when committed.
///
/// Dropping it without committing removes the temporary file.
#[derive(Debug)]
pub struct AtomicFile {
    file: NamedTempFile,
}

impl AtomicFile {
    /// Creates an exclusively locked temporary file in `dir`.
    #[inline]
    pub fn create_in(dir: &Path, suffix: &str) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(".")
            .suffix(suffix)
            .tempfile_in(dir)
            .with_context(|| format!("failed to create temporary file in {}", dir.display()))?;
        fs2::FileExt::try_lock_exclusive(file.as_file())
            .map_err(|err| lock_error(file.path(), &err))?;
        Ok(Self { file })
    }

    #[must_use]
    #[inline]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    #[inline]
    pub fn writer(&mut self) -> &mut fs::File {
        self.file.as_file_mut()
    }

    #[inline]
    pub fn set_modified(&self, time: DateTimeUtc) -> Result<()> {
        self.file
            .as_file()
            .set_modified(SystemTime::from(time))
            .with_context(|| {
                format!(
                    "failed to set modification time of {}",
                    self.path().display()
                )
            })
    }

    /// Syncs the content and renames the file to `target`, replacing it.
    #[inline]
    pub fn commit(mut self, target: &Path) -> Result<()> {
        self.file.as_file_mut().flush()?;
        self.file.as_file().sync_all()?;
        self.file
            .persist(target)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to rename temporary file to {}", target.display()))?;
        Ok(())
    }
}

/// Directory of blobs named by their address.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    #[must_use]
    #[inline]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    #[inline]
    pub fn blob_path(&self, address: &Address) -> PathBuf {
        self.root.join(address.to_string())
    }

    #[inline]
    pub fn exists(&self, address: &Address) -> Result<bool> {
        let path = self.blob_path(address);
        path.try_exists()
            .with_context(|| format!("failed to check {}", path.display()))
    }

    /// Starts writing a new blob. Its address is assigned on [`BlobStore::commit`].
    #[inline]
    pub fn create(&self) -> Result<AtomicFile> {
        AtomicFile::create_in(&self.root, BLOB_TMP_SUFFIX)
    }

    #[inline]
    pub fn commit(&self, pending: AtomicFile, address: &Address) -> Result<()> {
        let path = self.blob_path(address);
        if path.exists() {
            warn!("blob {address} already exists, replacing it");
            if let Err(err) = fs_err::remove_file(&path) {
                warn!("failed to remove existing blob: {err}");
            }
        }
        pending.commit(&path)?;
        debug!("stored blob {address}");
        Ok(())
    }

    /// Opens a blob for reading and takes a shared lock on it.
    #[inline]
    pub fn open(&self, address: &Address) -> Result<File> {
        let file = File::open(self.blob_path(address))?;
        lock_shared(&file)?;
        Ok(file)
    }

    /// Removes a blob. Returns `false` if it didn't exist.
    #[inline]
    pub fn remove(&self, address: &Address) -> Result<bool> {
        match fs_err::remove_file(self.blob_path(address)) {
            Ok(()) => {
                debug!("removed blob {address}");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
