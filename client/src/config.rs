use {
    anyhow::{Context as _, Result},
    blobcrypt_sdk::{
        archive::{ArchiveOptions, SortingOrder},
        conflict::ConflictPolicy,
        crypto::{ArchiveKey, CipherKind},
    },
    derivative::Derivative,
    serde::{Deserialize, Serialize},
    std::path::{Path, PathBuf},
};

#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub encryption_key: Option<ArchiveKey>,
    #[serde(default)]
    pub use_keyring: bool,
    /// Cipher for new blobs and containers.
    #[serde(default)]
    pub cipher: CipherKind,
    /// Ciphers accepted when decrypting.
    #[serde(default = "default_allowed_ciphers")]
    pub allowed_ciphers: Vec<CipherKind>,
    #[serde(default)]
    pub sorting_order: SortingOrder,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_allowed_ciphers() -> Vec<CipherKind> {
    CipherKind::ALL.to_vec()
}

fn default_log_filter() -> String {
    "info".into()
}

impl Config {
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs_err::read_to_string(path)?;
        json5::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    #[must_use]
    #[inline]
    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            cipher: self.cipher,
            ..ArchiveOptions::default()
        }
    }
}
