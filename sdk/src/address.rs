//! Content addressing of blobs.
//!
//! A blob's address is Argon2id over the plaintext digest concatenated with a
//! random per-entry salt. The salt keeps equal files from sharing an address; the
//! digest binds the file name to the content, so extraction can detect a blob that
//! was replaced or corrupted.

use {
    crate::{crypto::kdf::{self, KdfParams}, entropy::Entropy},
    anyhow::{Result, bail},
    blobcrypt_format::{Address, ArchiveError, ContentHash, HASH_LEN, Salt},
    std::collections::HashSet,
    tracing::debug,
};

const ADDRESS_DOMAIN: &[u8] = b"blobcrypt address";

/// Number of salts tried before giving up on finding an unused address.
const MAX_ATTEMPTS: usize = 64;

#[derive(Debug, Clone)]
pub struct Addresser {
    params: KdfParams,
}

impl Default for Addresser {
    #[inline]
    fn default() -> Self {
        Self::new(KdfParams::ADDRESS)
    }
}

impl Addresser {
    #[must_use]
    #[inline]
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn derive(&self, digest: &ContentHash, salt: &Salt) -> Result<Address> {
        let mut input = [0; 2 * HASH_LEN];
        let (digest_part, salt_part) = input.split_at_mut(HASH_LEN);
        digest_part.copy_from_slice(&digest.0);
        salt_part.copy_from_slice(&salt.0);
        let mut address = [0; HASH_LEN];
        kdf::derive_bytes(&input, ADDRESS_DOMAIN, &self.params, &mut address)?;
        Ok(Address(address))
    }

    /// Draws salts until the derived address is not in `taken`.
    #[inline]
    pub fn unique(
        &self,
        digest: &ContentHash,
        taken: &HashSet<Address>,
        entropy: &mut dyn Entropy,
    ) -> Result<(Salt, Address)> {
        for attempt in 0..MAX_ATTEMPTS {
            let salt = entropy.salt()?;
            let address = self.derive(digest, &salt)?;
            if !taken.contains(&address) {
                return Ok((salt, address));
            }
            debug!(%address, attempt, "address is taken, drawing a new salt");
        }
        bail!("failed to find an unused address after {MAX_ATTEMPTS} attempts");
    }

    /// Checks that `address` was derived from `digest` and `salt`.
    #[inline]
    pub fn verify(&self, digest: &ContentHash, salt: &Salt, address: &Address) -> Result<()> {
        let actual = self.derive(digest, salt)?;
        if actual != *address {
            return Err(ArchiveError::incorrect_key(format!(
                "content of blob {address} doesn't match its address"
            ))
            .into());
        }
        Ok(())
    }
}
