//! Incremental content digests over tar byte streams.

use std::io::{self, Read, Write};

use sha2::{Digest, Sha256, Sha512};
use tapestore_types::{DigestType, DigestWithSize};

/// Running hash of a byte stream. `Clone` so a writer can snapshot it at an
/// entry boundary and roll back to it.
#[derive(Clone)]
pub enum ContentHasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl ContentHasher {
    #[must_use]
    pub fn new(digest_type: DigestType) -> Self {
        match digest_type {
            DigestType::Sha256 => Self::Sha256(Sha256::new()),
            DigestType::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(bytes),
            Self::Sha512(h) => h.update(bytes),
        }
    }

    #[must_use]
    pub const fn digest_type(&self) -> DigestType {
        match self {
            Self::Sha256(_) => DigestType::Sha256,
            Self::Sha512(_) => DigestType::Sha512,
        }
    }

    /// Lowercase hex digest.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => format!("{:x}", h.finalize()),
            Self::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Digest a whole byte slice.
#[must_use]
pub fn digest_bytes(bytes: &[u8], digest_type: DigestType) -> DigestWithSize {
    let mut hasher = ContentHasher::new(digest_type);
    hasher.update(bytes);
    DigestWithSize::new(bytes.len() as u64, hasher.finalize_hex(), digest_type)
}

/// Reader adapter hashing and counting every byte read through it.
pub struct DigestReader<R> {
    inner: R,
    hasher: ContentHasher,
    bytes: u64,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R, digest_type: DigestType) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(digest_type),
            bytes: 0,
        }
    }

    /// Bytes read so far.
    pub const fn position(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> DigestWithSize {
        let digest_type = self.hasher.digest_type();
        DigestWithSize::new(self.bytes, self.hasher.finalize_hex(), digest_type)
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Committed state of a [`DigestWriter`], restorable after a rollback.
#[derive(Clone)]
pub struct DigestCheckpoint {
    hasher: ContentHasher,
    bytes: u64,
}

impl DigestCheckpoint {
    pub const fn len(&self) -> u64 {
        self.bytes
    }

    pub const fn is_empty(&self) -> bool {
        self.bytes == 0
    }
}

/// Writer adapter hashing and counting every byte written through it.
pub struct DigestWriter<W> {
    inner: W,
    hasher: ContentHasher,
    bytes: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W, digest_type: DigestType) -> Self {
        Self {
            inner,
            hasher: ContentHasher::new(digest_type),
            bytes: 0,
        }
    }

    pub fn checkpoint(&self) -> DigestCheckpoint {
        DigestCheckpoint {
            hasher: self.hasher.clone(),
            bytes: self.bytes,
        }
    }

    /// Reset the running digest to `checkpoint`. The caller is responsible
    /// for discarding the bytes written after it from the underlying sink.
    pub fn restore(&mut self, checkpoint: DigestCheckpoint) {
        self.hasher = checkpoint.hasher;
        self.bytes = checkpoint.bytes;
    }

    pub const fn position(&self) -> u64 {
        self.bytes
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn finish(mut self) -> io::Result<DigestWithSize> {
        self.inner.flush()?;
        let digest_type = self.hasher.digest_type();
        Ok(DigestWithSize::new(
            self.bytes,
            self.hasher.finalize_hex(),
            digest_type,
        ))
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
