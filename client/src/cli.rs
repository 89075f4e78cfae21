use {
    anyhow::{Result, format_err},
    blobcrypt_format::EntryPath,
    blobcrypt_sdk::archive::SortKey,
    clap::{Parser, Subcommand},
    std::path::PathBuf,
};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Path to the config file. Defaults to `blobcrypt.json5` in the user's config directory.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Print a new random encryption key.
    GenerateKey,
    /// Create an empty archive.
    Create { archive: PathBuf },
    /// List archive entries.
    List {
        archive: PathBuf,
        /// Overrides `sorting_order` from the config.
        #[arg(long)]
        sort: Option<SortKey>,
        #[arg(long)]
        descending: bool,
    },
    /// Add files and directories to the archive.
    Add {
        archive: PathBuf,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Archive directory to put the files in.
        #[arg(long)]
        prefix: Option<EntryPath>,
    },
    /// Extract entries into a local directory. Extracts everything if no paths are given.
    Extract {
        archive: PathBuf,
        out_dir: PathBuf,
        paths: Vec<EntryPath>,
    },
    /// Check that entries can be decrypted and match their addresses.
    Validate {
        archive: PathBuf,
        paths: Vec<EntryPath>,
    },
    /// Remove entries and their blobs.
    Delete {
        archive: PathBuf,
        #[arg(required = true)]
        paths: Vec<EntryPath>,
    },
    /// Show archive statistics.
    Info { archive: PathBuf },
}

#[inline]
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| format_err!("cannot find config dir"))?;
    Ok(config_dir.join("blobcrypt.json5"))
}
