//! In-memory archive and its batch commands.

mod sort;

#[cfg(test)]
mod tests;

pub use sort::{SortDirection, SortKey, SortingOrder};
use {
    crate::{
        address::Addresser,
        batch::{BatchOptions, BatchSummary, ItemContext, ItemOutcome, OperationKind, run_batch},
        blob::{ARCHIVE_TMP_SUFFIX, AtomicFile, BlobStore, EXTRACT_TMP_SUFFIX, lock_shared},
        conflict::Resolution,
        crypto::{
            ArchiveKey, Cipher, CipherKind, DecryptedStream, EncryptedStream, FORMAT_VERSION,
            decrypt_stream, encrypt_stream, kdf::KdfParams,
        },
        entropy::{Entropy, OsEntropy},
        progress::ProgressReader,
    },
    anyhow::{Context as _, Result, bail},
    blobcrypt_format::{
        Address, ArchiveError, DateTimeUtc, Entry, EntryPath, ErrorKind, HASH_LEN, MAX_ENTRIES,
        codec::{HASH_END, decode, encode},
        truncate_to_millis,
    },
    cadd::prelude::IntoType,
    fs_err::File,
    std::{
        collections::HashSet,
        fmt,
        io::{self, Write},
        mem,
        path::{Path, PathBuf},
    },
    tracing::{info, warn},
};

/// A local file to be added under `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddItem {
    pub source: PathBuf,
    pub path: EntryPath,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveOptions {
    /// Cipher for new blobs and for the container.
    pub cipher: CipherKind,
    pub address_kdf: KdfParams,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub summary: BatchSummary,
    /// Archive indices of entries that failed verification.
    pub failed: Vec<usize>,
}

impl fmt::Display for ValidationReport {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {}, {} failed",
            self.summary.processed,
            self.summary.failed_count()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeleteReport {
    /// Entries removed from the archive.
    pub removed: Vec<EntryPath>,
    /// Entries whose blobs could not be deleted. They are removed from the archive anyway.
    pub not_deleted: Vec<EntryPath>,
}

/// Directory that holds the blobs of the archive stored in `file`.
#[must_use]
#[inline]
pub fn container_directory(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn old_sidecar(file: &Path) -> PathBuf {
    let mut name = file.file_name().unwrap_or_default().to_os_string();
    name.push("-old");
    file.with_file_name(name)
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b
        || matches!(
            (fs_err::canonicalize(a), fs_err::canonicalize(b)),
            (Ok(a), Ok(b)) if a == b
        )
}

pub struct Archive {
    directory: PathBuf,
    entries: Vec<Entry>,
    // Container file this archive was last read from or written to.
    loaded_from: Option<PathBuf>,
    version: u8,
    hash: Option<[u8; HASH_LEN]>,
    cipher: CipherKind,
    addresser: Addresser,
    entropy: Box<dyn Entropy>,
    store: BlobStore,
}

impl fmt::Debug for Archive {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("directory", &self.directory)
            .field("entries", &self.entries.len())
            .field("loaded_from", &self.loaded_from)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Creates an empty archive with blobs in `directory`.
    #[must_use]
    #[inline]
    pub fn new(directory: PathBuf, options: ArchiveOptions) -> Self {
        Self {
            store: BlobStore::new(directory.clone()),
            directory,
            entries: Vec::new(),
            loaded_from: None,
            version: FORMAT_VERSION,
            hash: None,
            cipher: options.cipher,
            addresser: Addresser::new(options.address_kdf),
            entropy: Box::new(OsEntropy),
        }
    }

    #[must_use]
    #[inline]
    pub fn with_entropy(mut self, entropy: Box<dyn Entropy>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Reads the container `file`.
    ///
    /// Entries whose blobs are missing from the archive directory are dropped and
    /// returned as the second value.
    #[inline]
    pub fn read(
        file: &Path,
        key: &ArchiveKey,
        options: ArchiveOptions,
    ) -> Result<(Self, Vec<EntryPath>)> {
        let mut container = File::open(file)?;
        lock_shared(&container)?;
        let len = container.metadata()?.len().try_into_type::<usize>()?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|err| {
            ArchiveError::NotEnoughMemory(format!("archive of {len} bytes: {err}"))
        })?;
        let DecryptedStream { output: data, .. } =
            decrypt_stream(&mut container, data, &key.container_key()?, key)
                .with_context(|| format!("failed to decrypt archive {}", file.display()))?;
        // A stream cut at a block boundary still authenticates, but can't hold the
        // integrity slot.
        if data.len() < HASH_END {
            return Err(ArchiveError::incorrect_key(format!(
                "decrypted container is too short ({} bytes)",
                data.len()
            )))
            .with_context(|| format!("failed to decode archive {}", file.display()));
        }
        let decoded = decode(&data, key)
            .with_context(|| format!("failed to decode archive {}", file.display()))?;

        let mut archive = Self::new(container_directory(file), options);
        let mut dropped = Vec::new();
        for entry in decoded.entries {
            if archive.store.exists(&entry.address)? {
                archive.entries.push(entry);
            } else {
                dropped.push(entry.path);
            }
        }
        if !dropped.is_empty() {
            warn!(
                "{} entries were dropped because their blobs are missing from {}",
                dropped.len(),
                archive.directory.display()
            );
        }
        archive.loaded_from = Some(file.to_path_buf());
        archive.hash = Some(decoded.hash);
        info!("opened {} ({} entries)", file.display(), archive.entries.len());
        Ok((archive, dropped))
    }

    /// Writes the container to `file`, replacing it atomically.
    ///
    /// A file that wasn't read or written by this archive is first renamed to a
    /// `-old` sidecar.
    #[inline]
    pub fn write(&mut self, file: &Path, key: &ArchiveKey) -> Result<()> {
        key.check_allowed_cipher(self.cipher)?;
        let encoded = encode(&self.entries, key)?;

        let owned = self
            .loaded_from
            .as_deref()
            .is_some_and(|loaded| same_file(loaded, file));
        if !owned && file.exists() {
            let sidecar = old_sidecar(file);
            if let Err(err) = fs_err::rename(file, &sidecar) {
                warn!("failed to keep the previous archive file: {err}");
            }
        }

        let mut pending = AtomicFile::create_in(&container_directory(file), ARCHIVE_TMP_SUFFIX)?;
        let cipher = Cipher::new(self.cipher, &key.container_key()?)?;
        encrypt_stream(encoded.data.as_slice(), pending.writer(), &cipher)?;
        pending.commit(file)?;

        self.loaded_from = Some(file.to_path_buf());
        self.hash = Some(encoded.hash);
        self.version = FORMAT_VERSION;
        info!("saved {} ({} entries)", file.display(), self.entries.len());
        Ok(())
    }

    #[must_use]
    #[inline]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[must_use]
    #[inline]
    pub fn cipher(&self) -> CipherKind {
        self.cipher
    }

    /// Stream format version of the container.
    #[must_use]
    #[inline]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Integrity hash of the container as last read or written.
    #[must_use]
    #[inline]
    pub fn hash(&self) -> Option<&[u8; HASH_LEN]> {
        self.hash.as_ref()
    }

    #[must_use]
    #[inline]
    pub fn total_size(&self) -> u64 {
        self.entries
            .iter()
            .fold(0_u64, |total, entry| total.saturating_add(entry.size))
    }

    #[must_use]
    #[inline]
    pub fn find(&self, path: &EntryPath) -> Option<usize> {
        self.entries.iter().position(|entry| entry.path == *path)
    }

    /// Indices of `paths`; fails on the first path that isn't in the archive.
    #[inline]
    pub fn indices_of(&self, paths: &[EntryPath]) -> Result<Vec<usize>> {
        paths
            .iter()
            .map(|path| {
                self.find(path)
                    .with_context(|| format!("no such entry in archive: {path}"))
            })
            .collect()
    }

    #[must_use]
    #[inline]
    pub fn blob_path(&self, entry: &Entry) -> PathBuf {
        self.store.blob_path(&entry.address)
    }

    #[inline]
    pub fn sort(&mut self, order: SortingOrder) {
        self.entries.sort_by(|a, b| order.compare(a, b));
    }

    fn entry(&self, index: usize) -> Result<&Entry> {
        self.entries
            .get(index)
            .with_context(|| format!("entry index out of range: {index}"))
    }

    fn check_indices(&self, indices: &[usize]) -> Result<()> {
        if let Some(index) = indices.iter().find(|index| **index >= self.entries.len()) {
            bail!("entry index out of range: {index}");
        }
        Ok(())
    }

    /// Encrypts and stores each file of `batch`.
    ///
    /// An item whose path is already in the archive is a conflict; replacing it
    /// deletes the old blob once the new one is stored.
    #[inline]
    pub fn add_files(
        &mut self,
        batch: &[AddItem],
        key: &ArchiveKey,
        options: BatchOptions<'_>,
    ) -> Result<BatchSummary> {
        key.check_allowed_cipher(self.cipher)?;
        Ok(run_batch(
            OperationKind::Add,
            batch,
            options,
            |item| item.path.to_string(),
            |item, context| self.add_one(item, context),
        ))
    }

    fn add_one(&mut self, item: &AddItem, context: &mut ItemContext<'_>) -> Result<ItemOutcome> {
        let existing = self.find(&item.path);
        if existing.is_some() {
            match context.resolve_conflict(item.path.as_str()) {
                Resolution::Replace => {}
                Resolution::Skip => return Ok(ItemOutcome::Skipped),
                Resolution::Cancel => return Ok(ItemOutcome::Cancelled),
            }
        } else if self.entries.len() >= MAX_ENTRIES {
            return Err(ArchiveError::Capacity { max: MAX_ENTRIES }.into());
        }

        let source = File::open(&item.source)?;
        let metadata = source.metadata()?;
        let modified_at = truncate_to_millis(DateTimeUtc::from(metadata.modified()?));
        let entry_key = self.entropy.entry_key()?;
        let cipher = Cipher::new(self.cipher, entry_key.as_bytes())?;

        let mut pending = self.store.create()?;
        let reader = ProgressReader::new(
            source,
            context.unit,
            metadata.len(),
            &mut *context.progress,
            context.cancel,
        );
        let EncryptedStream {
            hash,
            original_size,
            ..
        } = encrypt_stream(reader, pending.writer(), &cipher)?;
        let taken: HashSet<Address> = self.entries.iter().map(|entry| entry.address).collect();
        let (salt, address) = self
            .addresser
            .unique(&hash, &taken, self.entropy.as_mut())?;
        self.store.commit(pending, &address)?;

        let entry = Entry {
            path: item.path.clone(),
            size: original_size,
            modified_at,
            key: entry_key,
            salt,
            address,
        };
        info!("added {} ({} bytes)", entry.path, entry.size);
        match existing.and_then(|index| self.entries.get_mut(index)) {
            Some(slot) => {
                let old = mem::replace(slot, entry);
                if let Err(err) = self.store.remove(&old.address) {
                    warn!("failed to remove replaced blob {}: {err:?}", old.address);
                }
            }
            None => self.entries.push(entry),
        }
        Ok(ItemOutcome::Done)
    }

    /// Decrypts the blob of `entry` into `output` and verifies its size and address.
    fn decrypt_entry(
        &self,
        entry: &Entry,
        output: impl Write,
        key: &ArchiveKey,
        context: &mut ItemContext<'_>,
    ) -> Result<()> {
        let blob = self.store.open(&entry.address)?;
        let total = blob.metadata()?.len();
        let reader = ProgressReader::new(
            blob,
            context.unit,
            total,
            &mut *context.progress,
            context.cancel,
        );
        let DecryptedStream { hash, size, .. } =
            decrypt_stream(reader, output, entry.key.as_bytes(), key)
                .with_context(|| format!("failed to decrypt {}", entry.path))?;
        if size != entry.size {
            return Err(ArchiveError::incorrect_key(format!(
                "size of {} doesn't match: expected {}, got {size}",
                entry.path, entry.size
            ))
            .into());
        }
        self.addresser.verify(&hash, &entry.salt, &entry.address)
    }

    /// Decrypts the selected entries into `out_dir`, keeping their relative paths.
    #[inline]
    pub fn extract_files(
        &self,
        indices: &[usize],
        out_dir: &Path,
        key: &ArchiveKey,
        options: BatchOptions<'_>,
    ) -> Result<BatchSummary> {
        self.check_indices(indices)?;
        Ok(run_batch(
            OperationKind::Extract,
            indices,
            options,
            |index| self.label(*index),
            |index, context| self.extract_one(*index, out_dir, key, context),
        ))
    }

    fn extract_one(
        &self,
        index: usize,
        out_dir: &Path,
        key: &ArchiveKey,
        context: &mut ItemContext<'_>,
    ) -> Result<ItemOutcome> {
        let entry = self.entry(index)?;
        let target = entry.path.to_local(out_dir);
        if target.try_exists()? {
            match context.resolve_conflict(&target.to_string_lossy()) {
                Resolution::Replace => {}
                Resolution::Skip => return Ok(ItemOutcome::Skipped),
                Resolution::Cancel => return Ok(ItemOutcome::Cancelled),
            }
        }
        let parent = target.parent().unwrap_or(out_dir);
        fs_err::create_dir_all(parent)?;

        let mut pending = AtomicFile::create_in(parent, EXTRACT_TMP_SUFFIX)?;
        self.decrypt_entry(entry, pending.writer(), key, context)?;
        pending.set_modified(entry.modified_at)?;
        pending.commit(&target)?;
        info!("extracted {} to {}", entry.path, target.display());
        Ok(ItemOutcome::Done)
    }

    /// Decrypts the selected entries without storing the output.
    ///
    /// Entries that fail authentication or address verification are collected in
    /// [`ValidationReport::failed`].
    #[inline]
    pub fn validate_files(
        &self,
        indices: &[usize],
        key: &ArchiveKey,
        options: BatchOptions<'_>,
    ) -> Result<ValidationReport> {
        self.check_indices(indices)?;
        let summary = run_batch(
            OperationKind::Validate,
            indices,
            options,
            |index| self.label(*index),
            |index, context| {
                let entry = self.entry(*index)?;
                match self.decrypt_entry(entry, io::sink(), key, context) {
                    Ok(()) => Ok(ItemOutcome::Done),
                    // A blob that exists but can't be decrypted and verified is damaged,
                    // whether the stream framing or the authentication is what broke.
                    Err(err)
                        if matches!(ErrorKind::of(&err), ErrorKind::Key | ErrorKind::Format) =>
                    {
                        warn!(
                            "{} is corrupted or encrypted with another key: {err:#}",
                            entry.path
                        );
                        Ok(ItemOutcome::Invalid)
                    }
                    Err(err) => Err(err),
                }
            },
        );
        let failed = summary
            .invalid
            .iter()
            .filter_map(|position| indices.get(*position).copied())
            .collect();
        Ok(ValidationReport { summary, failed })
    }

    /// Removes the selected entries, then deletes their blobs.
    ///
    /// The entries stay removed even if some blobs can't be deleted; those are
    /// listed in [`DeleteReport::not_deleted`].
    #[inline]
    pub fn delete_files(&mut self, indices: &[usize]) -> Result<DeleteReport> {
        self.check_indices(indices)?;
        let mut indices = indices.to_vec();
        indices.sort_unstable();
        indices.dedup();

        let mut removed = Vec::with_capacity(indices.len());
        for index in indices.into_iter().rev() {
            removed.push(self.entries.remove(index));
        }
        removed.reverse();

        let mut report = DeleteReport::default();
        for entry in removed {
            if let Err(err) = self.store.remove(&entry.address) {
                warn!("failed to delete blob of {}: {err:?}", entry.path);
                report.not_deleted.push(entry.path.clone());
            }
            report.removed.push(entry.path);
        }
        info!(
            "deleted {} entries, {} blobs not deleted",
            report.removed.len(),
            report.not_deleted.len()
        );
        Ok(report)
    }

    fn label(&self, index: usize) -> String {
        self.entries
            .get(index)
            .map_or_else(|| format!("#{index}"), |entry| entry.path.to_string())
    }
}
