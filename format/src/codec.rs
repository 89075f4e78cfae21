//! Binary layout of the container plaintext.
//!
//! All integers are little-endian.
//!
//! - `string_table_offset: u32` - offset of the string table from the start of the data
//! - `entry_count: u32`
//! - `hash: [u8; 32]` - HMAC of every byte that follows it
//! - entry records, 116 bytes each:
//!   - `path_offset: u32` - offset of the path relative to the start of the string table
//!   - `size: u64`
//!   - `modified_at: u64` - milliseconds since the Unix epoch
//!   - `key: [u8; 32]`
//!   - `salt: [u8; 32]`
//!   - `address: [u8; 32]`
//! - string table: UTF-8 strings, each prefixed by its length (`u32`). Equal strings
//!   are stored once.
//!
//! The integrity hash is checked before any entry is parsed, so damage anywhere
//! after the hash slot is reported as [`ArchiveError::IncorrectKey`] rather than
//! as a format error.

use {
    crate::{
        Address, ArchiveError, Entry, EntryKey, EntryPath, HASH_LEN, MAX_ENTRIES, Salt,
        from_epoch_millis, to_epoch_millis,
    },
    anyhow::Result,
    byteorder::{ByteOrder, LE, WriteBytesExt},
    cadd::prelude::IntoType,
    std::{
        collections::{HashMap, HashSet},
        io::Write,
        mem::size_of,
    },
};

const U32_LEN: usize = size_of::<u32>();
const U64_LEN: usize = size_of::<u64>();

/// Length of `string_table_offset` and `entry_count`.
pub const HEADER_LEN: usize = 2 * U32_LEN;
/// End of the integrity hash slot; everything after it is authenticated.
pub const HASH_END: usize = HEADER_LEN + HASH_LEN;
pub const ENTRY_RECORD_LEN: usize = U32_LEN + 2 * U64_LEN + 3 * HASH_LEN;

/// Keyed MAC used for the integrity hash.
pub trait Authenticator {
    fn authenticate(&self, data: &[u8]) -> Result<[u8; HASH_LEN]>;
}

/// Deduplicating table of UTF-8 strings, addressed by byte offset.
#[derive(Debug, Default)]
pub struct StringTable {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl StringTable {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the offset of `value`, adding it to the table if necessary.
    #[inline]
    pub fn insert(&mut self, value: &str) -> Result<u32> {
        if let Some(offset) = self.offsets.get(value) {
            return Ok(*offset);
        }
        let offset = self.data.len().try_into_type::<u32>()?;
        self.data.write_u32::<LE>(value.len().try_into_type::<u32>()?)?;
        self.data.extend_from_slice(value.as_bytes());
        self.offsets.insert(value.to_owned(), offset);
        Ok(offset)
    }

    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Read-only view of a string table inside container data.
#[derive(Debug, Clone, Copy)]
pub struct StringTableView<'a> {
    data: &'a [u8],
}

impl<'a> StringTableView<'a> {
    #[must_use]
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    #[inline]
    pub fn get(&self, offset: u32) -> Result<&'a str, ArchiveError> {
        let unresolved = || ArchiveError::format(format!("unresolved string offset {offset}"));
        let start = usize::try_from(offset).map_err(|_| unresolved())?;
        let len_bytes = start
            .checked_add(U32_LEN)
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(unresolved)?;
        let len = usize::try_from(LE::read_u32(len_bytes)).map_err(|_| unresolved())?;
        let value = start
            .checked_add(U32_LEN)
            .and_then(|value_start| Some((value_start, value_start.checked_add(len)?)))
            .and_then(|(value_start, value_end)| self.data.get(value_start..value_end))
            .ok_or_else(unresolved)?;
        std::str::from_utf8(value)
            .map_err(|err| ArchiveError::format(format!("string at offset {offset}: {err}")))
    }
}

/// Container data produced by [`encode`].
#[derive(Debug)]
pub struct Encoded {
    pub data: Vec<u8>,
    pub hash: [u8; HASH_LEN],
}

/// Entries parsed by [`decode`].
#[derive(Debug)]
pub struct Decoded {
    pub entries: Vec<Entry>,
    pub hash: [u8; HASH_LEN],
}

/// Serializes `entries` and seals the result with `authenticator`.
#[inline]
pub fn encode(entries: &[Entry], authenticator: &dyn Authenticator) -> Result<Encoded> {
    if entries.len() > MAX_ENTRIES {
        return Err(ArchiveError::Capacity { max: MAX_ENTRIES }.into());
    }
    let mut strings = StringTable::new();
    let path_offsets = entries
        .iter()
        .map(|entry| strings.insert(entry.path.as_str()))
        .collect::<Result<Vec<u32>>>()?;

    let records_len = entries
        .len()
        .checked_mul(ENTRY_RECORD_LEN)
        .ok_or(ArchiveError::Capacity { max: MAX_ENTRIES })?;
    let string_table_offset = HASH_END
        .checked_add(records_len)
        .ok_or(ArchiveError::Capacity { max: MAX_ENTRIES })?;
    let total_len = string_table_offset
        .checked_add(strings.as_bytes().len())
        .ok_or(ArchiveError::Capacity { max: MAX_ENTRIES })?;

    let mut data = Vec::new();
    data.try_reserve_exact(total_len).map_err(|err| {
        ArchiveError::NotEnoughMemory(format!("container of {total_len} bytes: {err}"))
    })?;
    data.write_u32::<LE>(string_table_offset.try_into_type::<u32>()?)?;
    data.write_u32::<LE>(entries.len().try_into_type::<u32>()?)?;
    data.write_all(&[0; HASH_LEN])?;
    for (entry, path_offset) in entries.iter().zip(path_offsets) {
        data.write_u32::<LE>(path_offset)?;
        data.write_u64::<LE>(entry.size)?;
        data.write_u64::<LE>(to_epoch_millis(entry.modified_at))?;
        data.write_all(entry.key.as_bytes())?;
        data.write_all(&entry.salt.0)?;
        data.write_all(&entry.address.0)?;
    }
    data.write_all(strings.as_bytes())?;

    let (head, body) = data.split_at_mut(HASH_END);
    let hash = authenticator.authenticate(body)?;
    if let Some(slot) = head.get_mut(HEADER_LEN..HASH_END) {
        slot.copy_from_slice(&hash);
    }
    Ok(Encoded { data, hash })
}

/// Verifies the integrity hash of `data` and parses its entries.
#[inline]
pub fn decode(data: &[u8], authenticator: &dyn Authenticator) -> Result<Decoded> {
    let (head, body) = data
        .split_at_checked(HASH_END)
        .ok_or_else(|| {
            ArchiveError::format(format!("container is too short ({} bytes)", data.len()))
        })?;
    let (header, stored_hash) = head.split_at(HEADER_LEN);
    let (offset_bytes, count_bytes) = header.split_at(U32_LEN);
    let string_table_offset = LE::read_u32(offset_bytes).try_into_type::<usize>()?;
    let entry_count = LE::read_u32(count_bytes).try_into_type::<usize>()?;

    if entry_count > MAX_ENTRIES {
        return Err(
            ArchiveError::format(format!("entry count {entry_count} exceeds the limit")).into(),
        );
    }
    if string_table_offset > data.len() || (entry_count > 0 && string_table_offset == data.len()) {
        return Err(ArchiveError::format(format!(
            "string table offset {string_table_offset} is out of bounds ({} bytes)",
            data.len()
        ))
        .into());
    }

    let hash = authenticator.authenticate(body)?;
    if hash.as_slice() != stored_hash {
        return Err(ArchiveError::incorrect_key("container integrity check failed").into());
    }

    let records_end = entry_count
        .checked_mul(ENTRY_RECORD_LEN)
        .and_then(|len| len.checked_add(HASH_END))
        .filter(|end| *end <= string_table_offset)
        .ok_or_else(|| ArchiveError::format("entry records extend past the string table"))?;
    let records = data
        .get(HASH_END..records_end)
        .ok_or_else(|| ArchiveError::format("entry records extend past the end of data"))?;
    let strings = StringTableView::new(data.get(string_table_offset..).unwrap_or_default());

    let mut entries = Vec::with_capacity(entry_count);
    let mut paths = HashSet::with_capacity(entry_count);
    for (index, record) in records.chunks_exact(ENTRY_RECORD_LEN).enumerate() {
        let entry = decode_record(record, strings)
            .map_err(|err| ArchiveError::format(format!("entry #{index}: {err}")))?;
        if !paths.insert(entry.path.clone()) {
            return Err(
                ArchiveError::format(format!("duplicate entry path: {}", entry.path)).into(),
            );
        }
        entries.push(entry);
    }
    Ok(Decoded {
        entries,
        hash: stored_hash.try_into()?,
    })
}

fn decode_record(record: &[u8], strings: StringTableView<'_>) -> Result<Entry> {
    let mut reader = RecordReader(record);
    let path_offset = LE::read_u32(reader.take(U32_LEN)?);
    let size = LE::read_u64(reader.take(U64_LEN)?);
    let modified_at = LE::read_u64(reader.take(U64_LEN)?);
    let key = reader.take_array()?;
    let salt = reader.take_array()?;
    let address = reader.take_array()?;
    Ok(Entry {
        path: EntryPath::new(strings.get(path_offset)?)?,
        size,
        modified_at: from_epoch_millis(modified_at)?,
        key: EntryKey(key),
        salt: Salt(salt),
        address: Address(address),
    })
}

struct RecordReader<'a>(&'a [u8]);

impl<'a> RecordReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let (value, rest) = self
            .0
            .split_at_checked(len)
            .ok_or_else(|| ArchiveError::format("truncated entry record"))?;
        self.0 = rest;
        Ok(value)
    }

    fn take_array(&mut self) -> Result<[u8; HASH_LEN]> {
        Ok(self.take(HASH_LEN)?.try_into()?)
    }
}
