use {
    anyhow::{Context as _, Result, bail},
    blobcrypt_format::EntryPath,
    blobcrypt_sdk::AddItem,
    std::{collections::HashSet, ffi::OsStr, path::Path},
    tracing::warn,
};

fn name_str(name: &OsStr, path: &Path) -> Result<String> {
    name.to_str()
        .map(ToOwned::to_owned)
        .with_context(|| format!("unsupported path (not valid unicode): {}", path.display()))
}

/// Collects the files under `paths`.
///
/// Directories are walked recursively. Each file is added under `prefix` followed by
/// its path relative to the parent of the argument it was found through.
#[inline]
pub fn collect_add_items(
    paths: &[impl AsRef<Path>],
    prefix: Option<&EntryPath>,
) -> Result<Vec<AddItem>> {
    let mut items = Vec::new();
    for path in paths {
        let path = fs_err::canonicalize(path.as_ref())?;
        let name = path
            .file_name()
            .with_context(|| format!("unsupported path: {}", path.display()))?;
        let name = name_str(name, &path)?;
        let entry_path = match prefix {
            Some(prefix) => prefix.join(&name)?,
            None => EntryPath::new(&name)?,
        };
        walk(&path, entry_path, &mut items)?;
    }

    let mut seen = HashSet::new();
    for item in &items {
        if !seen.insert(&item.path) {
            bail!("more than one file maps to archive path {}", item.path);
        }
    }
    Ok(items)
}

fn walk(local: &Path, entry_path: EntryPath, items: &mut Vec<AddItem>) -> Result<()> {
    let metadata = fs_err::metadata(local)?;
    if metadata.is_dir() {
        let mut children = fs_err::read_dir(local)?.collect::<Result<Vec<_>, _>>()?;
        children.sort_by_key(fs_err::DirEntry::file_name);
        for child in children {
            let child_path = child.path();
            let name = name_str(&child.file_name(), &child_path)?;
            walk(&child_path, entry_path.join(&name)?, items)?;
        }
    } else if metadata.is_file() {
        items.push(AddItem {
            source: local.to_path_buf(),
            path: entry_path,
        });
    } else {
        warn!("skipping {}: not a regular file", local.display());
    }
    Ok(())
}
