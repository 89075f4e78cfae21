use {
    anyhow::{Result, bail},
    serde::{Deserialize, Serialize, de::Error},
    std::{
        cmp::Ordering,
        fmt,
        path::{Path, PathBuf},
        str::FromStr,
    },
};

/// Archive-relative path of an entry, e.g. `photos/2024/beach.jpg`.
///
/// Segments are separated by `/`. A valid path is never empty, never starts or ends
/// with `/`, and never contains empty, `.` or `..` segments, so it can always be
/// joined to a local directory without escaping it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntryPath(String);

impl EntryPath {
    #[inline]
    pub fn new(path: &str) -> Result<Self> {
        check_path(path)?;
        Ok(Self(path.into()))
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Last segment of the path.
    #[must_use]
    #[inline]
    pub fn file_name(&self) -> &str {
        self.0.rsplit_once('/').map_or(&self.0, |(_, name)| name)
    }

    #[must_use]
    #[inline]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| Self(parent.into()))
    }

    #[inline]
    pub fn join(&self, relative_path: &str) -> Result<Self> {
        check_path(relative_path)?;
        Ok(Self(format!("{}/{}", self.0, relative_path)))
    }

    /// Local path of this entry inside `root`.
    #[must_use]
    #[inline]
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(self.segments());
        path
    }

    /// Orders paths as a directory tree would list them: directory segments are
    /// compared first (an ancestor directory before its descendants), and the
    /// file name is compared last.
    ///
    /// `a.txt` < `a/b.txt` < `a/c.txt` < `a/b/c.txt`
    #[must_use]
    #[inline]
    pub fn cmp_hierarchical(&self, other: &Self) -> Ordering {
        let (self_dirs, self_name) = self.split_dirs();
        let (other_dirs, other_name) = other.split_dirs();
        let self_dirs = self_dirs.into_iter().flat_map(|dirs| dirs.split('/'));
        let other_dirs = other_dirs.into_iter().flat_map(|dirs| dirs.split('/'));
        self_dirs
            .cmp(other_dirs)
            .then_with(|| self_name.cmp(other_name))
    }

    fn split_dirs(&self) -> (Option<&str>, &str) {
        match self.0.rsplit_once('/') {
            Some((dirs, name)) => (Some(dirs), name),
            None => (None, &self.0),
        }
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("path cannot be empty");
    }
    if path.contains('\\') {
        bail!("path cannot contain '\\': {path:?}");
    }
    if path.contains('\0') {
        bail!("path cannot contain NUL: {path:?}");
    }
    if path.starts_with('/') {
        bail!("path must be relative: {path:?}");
    }
    if path.ends_with('/') {
        bail!("path must not end with '/': {path:?}");
    }
    for segment in path.split('/') {
        match segment {
            "" => bail!("path cannot contain '//': {path:?}"),
            "." | ".." => bail!("path cannot contain '.' or '..' segments: {path:?}"),
            _ => {}
        }
    }
    Ok(())
}

impl FromStr for EntryPath {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for EntryPath {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryPath {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for EntryPath {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        check_path(&s).map_err(D::Error::custom)?;
        Ok(Self(s))
    }
}
