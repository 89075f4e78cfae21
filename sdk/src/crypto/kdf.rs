use {
    anyhow::{Result, format_err},
    argon2::{Algorithm, Argon2, Params, Version},
    blobcrypt_format::HASH_LEN,
    hkdf::Hkdf,
    hmac::{Hmac, Mac},
    serde::{Deserialize, Serialize},
    sha2::Sha256,
};

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub mem_cost_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// Low-cost parameters used for address derivation.
    pub const ADDRESS: Self = Self {
        mem_cost_kib: 4096,
        iterations: 2,
        parallelism: 1,
    };
}

impl Default for KdfParams {
    #[inline]
    fn default() -> Self {
        Self::ADDRESS
    }
}

/// Fills `output` with Argon2id output for `input` and `salt`.
///
/// `salt` must be at least 8 bytes long.
#[inline]
pub fn derive_bytes(
    input: &[u8],
    salt: &[u8],
    params: &KdfParams,
    output: &mut [u8],
) -> Result<()> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.iterations,
        params.parallelism,
        Some(output.len()),
    )
    .map_err(|err| format_err!("invalid Argon2id params: {err}"))?;
    Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params)
        .hash_password_into(input, salt, output)
        .map_err(|err| format_err!("Argon2id failed: {err}"))
}

#[inline]
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; HASH_LEN]> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|err| format_err!("invalid HMAC key: {err}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Expands `key` into `output` using HKDF-SHA256 with `info` as the domain label.
#[inline]
pub fn expand_key(key: &[u8], info: &[u8], output: &mut [u8]) -> Result<()> {
    Hkdf::<Sha256>::new(None, key)
        .expand(info, output)
        .map_err(|err| format_err!("HKDF expand failed: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: KdfParams = KdfParams {
        mem_cost_kib: 8,
        iterations: 1,
        parallelism: 1,
    };

    #[test]
    fn derive_is_deterministic() {
        let mut a = [0; 32];
        let mut b = [0; 32];
        derive_bytes(b"input", b"saltsalt", &FAST, &mut a).unwrap();
        derive_bytes(b"input", b"saltsalt", &FAST, &mut b).unwrap();
        assert_eq!(a, b);
        derive_bytes(b"input2", b"saltsalt", &FAST, &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn short_salt_is_rejected() {
        let mut output = [0; 32];
        derive_bytes(b"input", b"salt", &FAST, &mut output).unwrap_err();
    }

    #[test]
    fn hmac_depends_on_key() {
        let a = hmac_sha256(b"key1", b"data").unwrap();
        let b = hmac_sha256(b"key2", b"data").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, hmac_sha256(b"key1", b"data").unwrap());
    }

    #[test]
    fn expand_labels_are_independent() {
        let mut a = [0; 64];
        let mut b = [0; 64];
        expand_key(&[1; 32], b"one", &mut a).unwrap();
        expand_key(&[1; 32], b"two", &mut b).unwrap();
        assert_ne!(a, b);
    }
}
