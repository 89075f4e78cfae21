//! Stream encryption used for blobs and for the container file.
//!
//! The plaintext is hashed (SHA-256), compressed with deflate and split into blocks
//! of at most [`BLOCK_SIZE`] bytes. Each block is sealed with an AEAD cipher under a
//! fresh random nonce, with the block index bound as associated data so blocks
//! cannot be reordered. The encrypted stream has the following layout
//! (integers are little-endian):
//!
//! - magic number (32 bits)
//! - format version (8 bits)
//! - cipher id (8 bits), see [`CipherKind`]
//! - blocks, each of them:
//!   - block size (32 bits) - length of the following nonce and ciphertext
//!   - nonce
//!   - ciphertext with the authentication tag
//!
//! Blobs are encrypted with the entry key. The container file and its integrity
//! hash use two subkeys expanded from the [`ArchiveKey`] with HKDF.

mod io;
pub mod kdf;

pub use io::{
    BLOCK_SIZE, DecryptedStream, DecryptingWriter, EncryptedStream, FORMAT_VERSION, decrypt_stream,
    encrypt_stream,
};
use {
    aes_siv::Aes256SivAead,
    anyhow::{Result, bail, format_err},
    base64::{
        Engine,
        display::Base64Display,
        prelude::BASE64_URL_SAFE_NO_PAD,
    },
    blobcrypt_format::{ArchiveError, HASH_LEN, codec::Authenticator},
    chacha20poly1305::{
        XChaCha20Poly1305,
        aead::{Aead, KeyInit, Payload},
    },
    rand::{TryRngCore, rngs::OsRng},
    serde::{Deserialize, Deserializer, Serialize, Serializer, de},
    std::{
        borrow::Cow,
        fmt::{self, Display},
        str::FromStr,
    },
};

pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;

const CONTAINER_KEY_INFO: &[u8] = b"blobcrypt container";
const INTEGRITY_KEY_INFO: &[u8] = b"blobcrypt integrity";
const SIV_KEY_INFO: &[u8] = b"blobcrypt aes-siv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CipherKind {
    #[default]
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
    #[serde(rename = "aes256-siv")]
    Aes256Siv,
}

impl CipherKind {
    pub const ALL: [Self; 2] = [Self::XChaCha20Poly1305, Self::Aes256Siv];

    #[must_use]
    #[inline]
    pub fn id(self) -> u8 {
        match self {
            Self::XChaCha20Poly1305 => 1,
            Self::Aes256Siv => 2,
        }
    }

    #[inline]
    pub fn from_id(id: u8) -> Result<Self, ArchiveError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == id)
            .ok_or_else(|| ArchiveError::format(format!("unknown cipher id: {id}")))
    }

    #[must_use]
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Self::XChaCha20Poly1305 => "xchacha20-poly1305",
            Self::Aes256Siv => "aes256-siv",
        }
    }

    #[must_use]
    #[inline]
    pub fn nonce_len(self) -> usize {
        match self {
            Self::XChaCha20Poly1305 => 24,
            Self::Aes256Siv => 16,
        }
    }
}

impl Display for CipherKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format_err!("unknown cipher: {s:?}"))
    }
}

/// AEAD cipher initialized with a key.
pub enum Cipher {
    XChaCha20Poly1305(XChaCha20Poly1305),
    Aes256Siv(Box<Aes256SivAead>),
}

impl Cipher {
    #[inline]
    pub fn new(kind: CipherKind, key: &[u8; KEY_LEN]) -> Result<Self> {
        Ok(match kind {
            CipherKind::XChaCha20Poly1305 => Self::XChaCha20Poly1305(
                XChaCha20Poly1305::new_from_slice(key)
                    .map_err(|err| format_err!("invalid key: {err}"))?,
            ),
            CipherKind::Aes256Siv => {
                // AES-SIV needs two 256-bit subkeys.
                let mut double_key = [0; 2 * KEY_LEN];
                kdf::expand_key(key, SIV_KEY_INFO, &mut double_key)?;
                Self::Aes256Siv(Box::new(
                    Aes256SivAead::new_from_slice(&double_key)
                        .map_err(|err| format_err!("invalid key: {err}"))?,
                ))
            }
        })
    }

    #[must_use]
    #[inline]
    pub fn kind(&self) -> CipherKind {
        match self {
            Self::XChaCha20Poly1305(_) => CipherKind::XChaCha20Poly1305,
            Self::Aes256Siv(_) => CipherKind::Aes256Siv,
        }
    }

    #[inline]
    pub fn encrypt_block(&self, nonce: &[u8], index: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        let aad = index.to_le_bytes();
        let payload = Payload {
            msg: plaintext,
            aad: &aad,
        };
        self.check_nonce(nonce)?;
        match self {
            Self::XChaCha20Poly1305(inner) => inner.encrypt(nonce.into(), payload),
            Self::Aes256Siv(inner) => inner.encrypt(nonce.into(), payload),
        }
        .map_err(|err| format_err!("encryption failed for block {index}: {err}"))
    }

    /// Fails with [`ArchiveError::IncorrectKey`] if the block doesn't authenticate.
    #[inline]
    pub fn decrypt_block(&self, nonce: &[u8], index: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let aad = index.to_le_bytes();
        let payload = Payload {
            msg: ciphertext,
            aad: &aad,
        };
        self.check_nonce(nonce)?;
        match self {
            Self::XChaCha20Poly1305(inner) => inner.decrypt(nonce.into(), payload),
            Self::Aes256Siv(inner) => inner.decrypt(nonce.into(), payload),
        }
        .map_err(|_| {
            ArchiveError::incorrect_key(format!("block {index} failed authentication")).into()
        })
    }

    fn check_nonce(&self, nonce: &[u8]) -> Result<()> {
        let expected = self.kind().nonce_len();
        if nonce.len() != expected {
            bail!("invalid nonce length: {}, expected {expected}", nonce.len());
        }
        Ok(())
    }
}

/// Master key of an archive.
///
/// Only the key bytes are serialized; the set of allowed ciphers is a local policy.
#[derive(Clone, PartialEq, Eq)]
pub struct ArchiveKey {
    bytes: [u8; KEY_LEN],
    allowed_ciphers: Vec<CipherKind>,
}

impl ArchiveKey {
    #[inline]
    pub fn generate() -> Result<Self> {
        let mut bytes = [0; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| format_err!("failed to generate key: {err}"))?;
        Ok(Self::from_bytes(bytes))
    }

    #[must_use]
    #[inline]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes,
            allowed_ciphers: CipherKind::ALL.to_vec(),
        }
    }

    #[must_use]
    #[inline]
    pub fn with_allowed_ciphers(mut self, allowed_ciphers: Vec<CipherKind>) -> Self {
        self.allowed_ciphers = allowed_ciphers;
        self
    }

    #[must_use]
    #[inline]
    pub fn raw_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    #[inline]
    pub fn check_allowed_cipher(&self, kind: CipherKind) -> Result<(), ArchiveError> {
        if self.allowed_ciphers.contains(&kind) {
            Ok(())
        } else {
            Err(ArchiveError::CipherNotAllowed(kind.to_string()))
        }
    }

    /// Key of the container stream.
    #[inline]
    pub fn container_key(&self) -> Result<[u8; KEY_LEN]> {
        let mut key = [0; KEY_LEN];
        kdf::expand_key(&self.bytes, CONTAINER_KEY_INFO, &mut key)?;
        Ok(key)
    }

    #[must_use]
    #[inline]
    pub fn display_unmasked(&self) -> impl Display + '_ {
        Base64Display::new(&self.bytes, &BASE64_URL_SAFE_NO_PAD)
    }
}

impl Authenticator for ArchiveKey {
    #[inline]
    fn authenticate(&self, data: &[u8]) -> Result<[u8; HASH_LEN]> {
        let mut key = [0; KEY_LEN];
        kdf::expand_key(&self.bytes, INTEGRITY_KEY_INFO, &mut key)?;
        kdf::hmac_sha256(&key, data)
    }
}

impl fmt::Debug for ArchiveKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveKey")
            .field("allowed_ciphers", &self.allowed_ciphers)
            .finish_non_exhaustive()
    }
}

impl FromStr for ArchiveKey {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(s.trim())?;
        let bytes = <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            format_err!("invalid key length: {}, expected {KEY_LEN}", bytes.len())
        })?;
        Ok(Self::from_bytes(bytes))
    }
}

impl<'de> Deserialize<'de> for ArchiveKey {
    #[inline]
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Cow::<'_, str>::deserialize(deserializer)?
            .parse()
            .map_err(de::Error::custom)
    }
}

impl Serialize for ArchiveKey {
    #[inline]
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BASE64_URL_SAFE_NO_PAD.encode(self.bytes).serialize(serializer)
    }
}
