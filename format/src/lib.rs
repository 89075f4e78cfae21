//! Data model and container codec of blobcrypt archives.
//!
//! An archive is a container file holding entry metadata plus a flat directory of
//! blobs. Each blob holds the independently encrypted content of one entry and is
//! named by the entry's [`Address`] in lowercase hex.

pub mod codec;
mod error;
mod path;

pub use crate::{
    error::{ArchiveError, ErrorKind},
    path::EntryPath,
};
use {
    anyhow::{Result, format_err},
    chrono::{DateTime, Utc},
    derive_more::{From, Into},
    std::{fmt, str::FromStr},
};

pub type DateTimeUtc = DateTime<Utc>;

/// Length of keys, salts, digests and addresses.
pub const HASH_LEN: usize = 32;

/// Maximum number of entries in one archive.
pub const MAX_ENTRIES: usize = (1 << 24) - 1;

fn parse_hex(s: &str) -> Result<[u8; HASH_LEN]> {
    let mut bytes = [0; HASH_LEN];
    hex::decode_to_slice(s, &mut bytes).map_err(|err| format_err!("invalid hex value: {err}"))?;
    Ok(bytes)
}

/// Content-derived identifier of a blob; also its file name.
///
/// Ordering compares the value as a big-endian unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Into)]
pub struct Address(pub [u8; HASH_LEN]);

impl fmt::Display for Address {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        if s.len() != HASH_LEN * 2 || s.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(format_err!("not a blob address: {s:?}"));
        }
        parse_hex(s).map(Self)
    }
}

/// Random value mixed into address derivation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, From, Into)]
pub struct Salt(pub [u8; HASH_LEN]);

impl fmt::Debug for Salt {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", hex::encode(self.0))
    }
}

/// SHA-256 digest of an entry's plaintext.
#[derive(Clone, Copy, PartialEq, Eq, Hash, From, Into)]
pub struct ContentHash(pub [u8; HASH_LEN]);

impl fmt::Display for ContentHash {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({self})")
    }
}

/// Symmetric key of a single entry, generated fresh when the entry is added.
#[derive(Clone, PartialEq, Eq)]
pub struct EntryKey(pub [u8; HASH_LEN]);

impl EntryKey {
    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl fmt::Debug for EntryKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryKey").finish()
    }
}

/// Metadata of one file stored in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: EntryPath,
    /// Plaintext length in bytes.
    pub size: u64,
    /// Modification time of the original file, millisecond precision.
    pub modified_at: DateTimeUtc,
    pub key: EntryKey,
    pub salt: Salt,
    pub address: Address,
}

/// Converts a timestamp to the stored representation.
///
/// Instants before the Unix epoch are stored as 0.
#[must_use]
#[inline]
pub fn to_epoch_millis(value: DateTimeUtc) -> u64 {
    u64::try_from(value.timestamp_millis()).unwrap_or(0)
}

#[inline]
pub fn from_epoch_millis(value: u64) -> Result<DateTimeUtc> {
    i64::try_from(value)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| format_err!("timestamp out of range: {value}"))
}

/// Drops sub-millisecond precision so that the value survives a round trip
/// through the container.
#[must_use]
#[inline]
pub fn truncate_to_millis(value: DateTimeUtc) -> DateTimeUtc {
    from_epoch_millis(to_epoch_millis(value)).unwrap_or(DateTime::UNIX_EPOCH)
}
