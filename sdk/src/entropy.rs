use {
    anyhow::{Result, format_err},
    blobcrypt_format::{EntryKey, HASH_LEN, Salt},
    rand::{TryRngCore, rngs::OsRng},
};

/// Source of random bytes for entry keys and salts.
pub trait Entropy: Send {
    fn fill(&mut self, buf: &mut [u8]) -> Result<()>;

    #[inline]
    fn salt(&mut self) -> Result<Salt> {
        let mut salt = [0; HASH_LEN];
        self.fill(&mut salt)?;
        Ok(Salt(salt))
    }

    #[inline]
    fn entry_key(&mut self) -> Result<EntryKey> {
        let mut key = [0; HASH_LEN];
        self.fill(&mut key)?;
        Ok(EntryKey(key))
    }
}

/// Operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl Entropy for OsEntropy {
    #[inline]
    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|err| format_err!("failed to read OS randomness: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_entropy_draws_fresh_values() {
        let mut entropy = OsEntropy;
        assert_ne!(entropy.salt().unwrap(), entropy.salt().unwrap());
        assert_ne!(entropy.entry_key().unwrap(), entropy.entry_key().unwrap());
    }
}
