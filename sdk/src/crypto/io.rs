use {
    super::{ArchiveKey, Cipher, CipherKind, KEY_LEN, TAG_LEN},
    anyhow::Result,
    blobcrypt_format::{ArchiveError, ContentHash},
    byteorder::{ByteOrder, LE, WriteBytesExt},
    cadd::{ops::Cadd, prelude::IntoType},
    deflate::{CompressionOptions, write::DeflateEncoder},
    inflate::InflateWriter,
    rand::RngCore,
    sha2::{Digest, Sha256},
    std::{
        cmp::min,
        io::{self, Read, Write},
        mem::size_of,
    },
};

/// Max length of a compressed chunk that is encrypted at once.
pub const BLOCK_SIZE: usize = 1024 * 1024;

/// File type marker stored at the beginning of every encrypted stream.
const MAGIC_NUMBER: u32 = 0x6243_7242;

pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = size_of::<u32>() + 2;
const LEN_PREFIX: usize = size_of::<u32>();

fn to_io(err: anyhow::Error) -> io::Error {
    match err.downcast::<ArchiveError>() {
        Ok(err) => err.into_io(),
        Err(err) => io::Error::other(err),
    }
}

/// Passes through any writes and calculates SHA-256 hash and size of the written data.
struct HashingWriter<W> {
    hasher: Sha256,
    size: u64,
    inner: W,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            hasher: Sha256::new(),
            inner,
            size: 0,
        }
    }

    fn finish(mut self) -> io::Result<(W, ContentHash, u64)> {
        self.inner.flush()?;
        let hash = ContentHash(self.hasher.finalize().into());
        Ok((self.inner, hash, self.size))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = self.inner.write(buf)?;
        self.hasher.update(buf.get(..len).unwrap_or_default());
        self.size = self
            .size
            .cadd(len.try_into_type::<u64>().map_err(io::Error::other)?)
            .map_err(io::Error::other)?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes encrypted blocks of compressed content.
struct EncryptingWriter<'a, W> {
    // Input data of the currently accumulated block.
    buf: Vec<u8>,
    output: W,
    cipher: &'a Cipher,
    block_index: u64,
    encrypted_size: u64,
}

impl<'a, W: Write> EncryptingWriter<'a, W> {
    fn new(mut output: W, cipher: &'a Cipher) -> io::Result<Self> {
        output.write_u32::<LE>(MAGIC_NUMBER)?;
        output.write_u8(FORMAT_VERSION)?;
        output.write_u8(cipher.kind().id())?;
        Ok(Self {
            buf: Vec::new(),
            output,
            cipher,
            block_index: 0,
            encrypted_size: HEADER_LEN.try_into_type::<u64>().map_err(io::Error::other)?,
        })
    }

    fn write_block(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let input_len = min(self.buf.len(), BLOCK_SIZE);
        let mut nonce = vec![0; self.cipher.kind().nonce_len()];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt_block(&nonce, self.block_index, self.buf.get(..input_len).unwrap_or_default())
            .map_err(to_io)?;
        let output_size = nonce.len().cadd(ciphertext.len()).map_err(io::Error::other)?;

        self.output
            .write_u32::<LE>(output_size.try_into_type::<u32>().map_err(io::Error::other)?)?;
        self.output.write_all(&nonce)?;
        self.output.write_all(&ciphertext)?;
        let block_len = LEN_PREFIX.cadd(output_size).map_err(io::Error::other)?;
        self.encrypted_size = self
            .encrypted_size
            .cadd(block_len.try_into_type::<u64>().map_err(io::Error::other)?)
            .map_err(io::Error::other)?;
        self.block_index = self.block_index.cadd(1_u64).map_err(io::Error::other)?;

        self.buf.drain(..input_len);
        Ok(())
    }

    fn finish(mut self) -> io::Result<(W, u64)> {
        while !self.buf.is_empty() {
            self.write_block()?;
        }
        self.output.flush()?;
        Ok((self.output, self.encrypted_size))
    }
}

impl<W: Write> Write for EncryptingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while self.buf.len() >= BLOCK_SIZE {
            self.write_block()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

/// Decrypts an encrypted stream written into it and passes the plaintext to `output`.
///
/// The cipher is taken from the stream header and must be allowed by `policy`.
pub struct DecryptingWriter<'a, W: Write> {
    key: &'a [u8; KEY_LEN],
    policy: &'a ArchiveKey,
    // Initialized when the header has been read.
    cipher: Option<Cipher>,
    // Input data that is not yet decrypted.
    buf: Vec<u8>,
    block_index: u64,
    output: InflateWriter<HashingWriter<W>>,
}

impl<'a, W: Write> DecryptingWriter<'a, W> {
    #[inline]
    pub fn new(key: &'a [u8; KEY_LEN], policy: &'a ArchiveKey, output: W) -> Self {
        Self {
            key,
            policy,
            cipher: None,
            buf: Vec::new(),
            block_index: 0,
            output: InflateWriter::new(HashingWriter::new(output)),
        }
    }

    #[inline]
    pub fn finish(mut self) -> io::Result<DecryptedStream<W>> {
        while self.process_block()? {}
        let Some(cipher) = &self.cipher else {
            return Err(ArchiveError::format("encrypted stream is truncated").into_io());
        };
        let cipher = cipher.kind();
        if !self.buf.is_empty() {
            return Err(ArchiveError::format("trailing data found in encrypted stream").into_io());
        }
        let (output, hash, size) = self.output.finish()?.finish()?;
        Ok(DecryptedStream {
            output,
            hash,
            size,
            cipher,
        })
    }

    fn read_header(&mut self) -> io::Result<bool> {
        let Some(header) = self.buf.get(..HEADER_LEN) else {
            return Ok(false);
        };
        let (magic, rest) = header.split_at(LEN_PREFIX);
        if LE::read_u32(magic) != MAGIC_NUMBER {
            return Err(ArchiveError::format("magic number mismatch").into_io());
        }
        let (version, cipher_id) = (rest.first().copied(), rest.get(1).copied());
        if version != Some(FORMAT_VERSION) {
            return Err(ArchiveError::format(format!(
                "unsupported stream version: {version:?}"
            ))
            .into_io());
        }
        let kind =
            CipherKind::from_id(cipher_id.unwrap_or_default()).map_err(ArchiveError::into_io)?;
        self.policy.check_allowed_cipher(kind).map_err(ArchiveError::into_io)?;
        self.cipher = Some(Cipher::new(kind, self.key).map_err(to_io)?);
        self.buf.drain(..HEADER_LEN);
        Ok(true)
    }

    /// Decrypts the next complete block. Returns `false` if more data is needed.
    fn process_block(&mut self) -> io::Result<bool> {
        if self.cipher.is_none() && !self.read_header()? {
            return Ok(false);
        }
        let Some(cipher) = &self.cipher else {
            return Ok(false);
        };
        let Some(len_bytes) = self.buf.get(..LEN_PREFIX) else {
            return Ok(false);
        };
        let len = LE::read_u32(len_bytes).try_into_type::<usize>().map_err(io::Error::other)?;
        let nonce_len = cipher.kind().nonce_len();
        let max_block_size = BLOCK_SIZE + nonce_len + TAG_LEN;
        if len > max_block_size || len < nonce_len + TAG_LEN {
            return Err(ArchiveError::format(format!(
                "invalid block size: {len} (max {max_block_size})"
            ))
            .into_io());
        }
        let Some(block) = self.buf.get(LEN_PREFIX..LEN_PREFIX + len) else {
            return Ok(false);
        };
        let (nonce, ciphertext) = block.split_at(nonce_len);
        let plaintext = cipher
            .decrypt_block(nonce, self.block_index, ciphertext)
            .map_err(to_io)?;
        self.output.write_all(&plaintext)?;
        self.block_index = self.block_index.cadd(1_u64).map_err(io::Error::other)?;
        self.buf.drain(..LEN_PREFIX + len);
        Ok(true)
    }
}

impl<W: Write> Write for DecryptingWriter<'_, W> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        while self.process_block()? {}
        Ok(buf.len())
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

#[derive(Debug)]
pub struct EncryptedStream<W> {
    pub output: W,
    /// SHA-256 of the plaintext.
    pub hash: ContentHash,
    pub original_size: u64,
    pub encrypted_size: u64,
}

#[derive(Debug)]
pub struct DecryptedStream<W> {
    pub output: W,
    /// SHA-256 of the plaintext.
    pub hash: ContentHash,
    pub size: u64,
    pub cipher: CipherKind,
}

/// Compresses and encrypts `input` into `output`.
#[inline]
pub fn encrypt_stream<W: Write>(
    mut input: impl Read,
    output: W,
    cipher: &Cipher,
) -> Result<EncryptedStream<W>> {
    let encryptor = EncryptingWriter::new(output, cipher)?;
    let encoder = DeflateEncoder::new(encryptor, CompressionOptions::high());
    let mut hasher = HashingWriter::new(encoder);
    io::copy(&mut input, &mut hasher)?;
    let (encoder, hash, original_size) = hasher.finish()?;
    let encryptor = encoder.finish()?;
    let (output, encrypted_size) = encryptor.finish()?;
    Ok(EncryptedStream {
        output,
        hash,
        original_size,
        encrypted_size,
    })
}

/// Decrypts and decompresses `input` into `output`.
#[inline]
pub fn decrypt_stream<W: Write>(
    mut input: impl Read,
    output: W,
    key: &[u8; KEY_LEN],
    policy: &ArchiveKey,
) -> Result<DecryptedStream<W>> {
    let mut decryptor = DecryptingWriter::new(key, policy, output);
    io::copy(&mut input, &mut decryptor)?;
    Ok(decryptor.finish()?)
}
