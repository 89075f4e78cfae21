//! Archive handle shared between an async front end and blocking commands.

use {
    crate::archive::Archive,
    anyhow::Result,
    blobcrypt_format::ArchiveError,
    parking_lot::Mutex,
    std::sync::Arc,
    tracing::debug,
};

/// An archive that runs at most one command at a time.
///
/// Commands run on the blocking thread pool. Starting a command while another one
/// holds the archive fails with [`ArchiveError::Busy`] instead of waiting.
#[derive(Debug, Clone)]
pub struct SharedArchive {
    archive: Arc<Mutex<Archive>>,
}

impl SharedArchive {
    #[must_use]
    #[inline]
    pub fn new(archive: Archive) -> Self {
        Self {
            archive: Arc::new(Mutex::new(archive)),
        }
    }

    #[inline]
    pub async fn run<T, F>(&self, command: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Archive) -> Result<T> + Send + 'static,
    {
        let archive = Arc::clone(&self.archive);
        tokio::task::spawn_blocking(move || {
            let mut guard = archive.try_lock().ok_or(ArchiveError::Busy)?;
            debug!("running archive command");
            command(&mut guard)
        })
        .await?
    }

    /// Returns the archive if no other handle or command is using it.
    #[inline]
    pub fn into_inner(self) -> Option<Archive> {
        Arc::into_inner(self.archive).map(Mutex::into_inner)
    }
}
