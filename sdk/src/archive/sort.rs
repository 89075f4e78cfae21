use {
    anyhow::format_err,
    blobcrypt_format::Entry,
    serde::{Deserialize, Serialize},
    std::{cmp::Ordering, fmt, str::FromStr},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    #[default]
    Path,
    Size,
    Timestamp,
    Address,
}

impl SortKey {
    pub const ALL: [Self; 4] = [Self::Path, Self::Size, Self::Timestamp, Self::Address];

    #[must_use]
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Size => "size",
            Self::Timestamp => "timestamp",
            Self::Address => "address",
        }
    }
}

impl fmt::Display for SortKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == s)
            .ok_or_else(|| format_err!("unknown sort key: {s:?}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortingOrder {
    pub key: SortKey,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortingOrder {
    #[must_use]
    #[inline]
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    /// Compares by the key, then by hierarchical path.
    #[must_use]
    #[inline]
    pub fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        let by_key = match self.key {
            SortKey::Path => Ordering::Equal,
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Timestamp => a.modified_at.cmp(&b.modified_at),
            SortKey::Address => a.address.cmp(&b.address),
        };
        let ordering = by_key.then_with(|| a.path.cmp_hierarchical(&b.path));
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        blobcrypt_format::{Address, EntryKey, EntryPath, Salt, from_epoch_millis},
    };

    fn entry(path: &str, size: u64, millis: u64, address: u8) -> Entry {
        Entry {
            path: EntryPath::new(path).unwrap(),
            size,
            modified_at: from_epoch_millis(millis).unwrap(),
            key: EntryKey([0; 32]),
            salt: Salt([0; 32]),
            address: Address([address; 32]),
        }
    }

    fn sorted(entries: &mut [Entry], order: SortingOrder) -> Vec<&str> {
        entries.sort_by(|a, b| order.compare(a, b));
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn path_order_puts_files_before_nested_entries() {
        let mut entries = vec![
            entry("a/b.txt", 0, 0, 0),
            entry("a.txt", 0, 0, 1),
            entry("a/c.txt", 0, 0, 2),
        ];
        assert_eq!(
            sorted(&mut entries, SortingOrder::default()),
            ["a.txt", "a/b.txt", "a/c.txt"]
        );
        let descending = SortingOrder::new(SortKey::Path, SortDirection::Descending);
        assert_eq!(sorted(&mut entries, descending), ["a/c.txt", "a/b.txt", "a.txt"]);
    }

    #[test]
    fn numeric_keys_tie_break_on_path() {
        let mut entries = vec![
            entry("b", 10, 3, 1),
            entry("a", 10, 2, 3),
            entry("c", 5, 1, 2),
        ];
        let by_size = SortingOrder::new(SortKey::Size, SortDirection::Ascending);
        assert_eq!(sorted(&mut entries, by_size), ["c", "a", "b"]);
        let by_time = SortingOrder::new(SortKey::Timestamp, SortDirection::Descending);
        assert_eq!(sorted(&mut entries, by_time), ["b", "a", "c"]);
        let by_address = SortingOrder::new(SortKey::Address, SortDirection::Ascending);
        assert_eq!(sorted(&mut entries, by_address), ["b", "c", "a"]);
    }

    #[test]
    fn parse_order() {
        assert_eq!("size".parse::<SortKey>().unwrap(), SortKey::Size);
        "name".parse::<SortKey>().unwrap_err();
        let order: SortingOrder =
            json5::from_str("{ key: 'timestamp', direction: 'descending' }").unwrap();
        assert_eq!(
            order,
            SortingOrder::new(SortKey::Timestamp, SortDirection::Descending)
        );
        let order: SortingOrder = json5::from_str("{ key: 'address' }").unwrap();
        assert_eq!(order.direction, SortDirection::Ascending);
    }
}
