use {
    blobcrypt_format::{DateTimeUtc, Entry},
    blobcrypt_sdk::Archive,
    byte_unit::{Byte, UnitType},
    chrono::{DateTime, Local},
    itertools::Itertools,
    prettytable::{Table, format::FormatBuilder, row},
    std::fmt::Display,
};

pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[must_use]
#[inline]
pub fn pretty_size(size: u64) -> impl Display {
    format!(
        "{:.1}",
        Byte::from_u64(size).get_appropriate_unit(UnitType::Binary)
    )
}

#[must_use]
#[inline]
pub fn pretty_time(value: DateTimeUtc) -> impl Display {
    DateTime::<Local>::from(value).format(DATE_TIME_FORMAT)
}

#[must_use]
#[inline]
pub fn entries_table(entries: &[Entry]) -> Table {
    let mut table = Table::new();
    table.set_format(FormatBuilder::new().column_separator(' ').build());
    table.set_titles(row!["Path", "Size", "Modified", "Address"]);
    for entry in entries {
        table.add_row(row![
            entry.path,
            r->pretty_size(entry.size),
            pretty_time(entry.modified_at),
            entry.address
        ]);
    }
    table
}

/// Summary lines shown by the `info` command.
#[must_use]
#[inline]
pub fn archive_info(archive: &Archive) -> String {
    let hash = archive
        .hash()
        .map_or_else(|| "none".to_owned(), hex::encode);
    [
        format!("directory: {}", archive.directory().display()),
        format!("entries: {}", archive.entries().len()),
        format!(
            "total size: {} ({} bytes)",
            pretty_size(archive.total_size()),
            archive.total_size()
        ),
        format!("format version: {}", archive.version()),
        format!("cipher: {}", archive.cipher()),
        format!("integrity hash: {hash}"),
    ]
    .iter()
    .join("\n")
}
