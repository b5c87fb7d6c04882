//! 512-byte block level helpers for ustar/GNU/pax archives.

use std::io::{self, Read, Write};

use tar::Header;

/// Size of a tar block.
pub const BLOCK_SIZE: usize = 512;
/// Size of the end-of-archive marker (two zero blocks).
pub const END_OF_ARCHIVE_BYTES: usize = 2 * BLOCK_SIZE;

const CHECKSUM_RANGE: std::ops::Range<usize> = 148..156;
const COPY_BUFFER_BYTES: usize = 64 * 1024;

/// Outcome of reading one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRead {
    /// Full block read.
    Full,
    /// Stream ended exactly at a block boundary.
    Eof,
    /// Stream ended inside the block after `n` bytes.
    Partial(usize),
}

/// A validated header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Bytes of entry data following the header.
    pub data_size: u64,
    /// Entry path, lossily decoded, for diagnostics.
    pub path: String,
    /// Pax or GNU long-name/link header describing the next entry.
    pub is_extension: bool,
    padded: u64,
}

impl EntryHeader {
    /// Data size rounded up to the block size.
    pub fn padded_size(&self) -> u64 {
        self.padded
    }
}

/// Why a header block was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDefect {
    ChecksumMismatch { stored: Option<u32>, computed: u32 },
    InvalidSize(String),
}

impl std::fmt::Display for HeaderDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChecksumMismatch {
                stored: Some(stored),
                computed,
            } => write!(
                f,
                "header checksum mismatch: stored {stored}, computed {computed}"
            ),
            Self::ChecksumMismatch {
                stored: None,
                computed,
            } => write!(f, "unreadable header checksum (computed {computed})"),
            Self::InvalidSize(detail) => write!(f, "invalid entry size: {detail}"),
        }
    }
}

/// `size` rounded up to the block size, `None` if that does not fit a `u64`.
pub fn padded_size(size: u64) -> Option<u64> {
    size.checked_next_multiple_of(BLOCK_SIZE as u64)
}

pub fn is_zero_block(block: &[u8; BLOCK_SIZE]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Read one block, distinguishing a clean end of stream from a torn one.
pub fn read_block<R: Read>(reader: &mut R, block: &mut [u8; BLOCK_SIZE]) -> io::Result<BlockRead> {
    let n = read_full(reader, block)?;
    Ok(match n {
        0 => BlockRead::Eof,
        BLOCK_SIZE => BlockRead::Full,
        partial => BlockRead::Partial(partial),
    })
}

/// Parse and validate a header block.
pub fn parse_header(block: &[u8; BLOCK_SIZE]) -> Result<EntryHeader, HeaderDefect> {
    let header = Header::from_byte_slice(block);
    let computed = computed_checksum(block);
    match header.cksum() {
        Ok(stored) if stored == computed => {}
        Ok(stored) => {
            return Err(HeaderDefect::ChecksumMismatch {
                stored: Some(stored),
                computed,
            });
        }
        Err(_) => {
            return Err(HeaderDefect::ChecksumMismatch {
                stored: None,
                computed,
            });
        }
    }

    let data_size = header
        .entry_size()
        .map_err(|err| HeaderDefect::InvalidSize(err.to_string()))?;
    let padded = padded_size(data_size).ok_or_else(|| {
        HeaderDefect::InvalidSize(format!("{data_size} bytes exceed any archive"))
    })?;
    let entry_type = header.entry_type();
    let is_extension = entry_type.is_pax_local_extensions()
        || entry_type.is_pax_global_extensions()
        || entry_type.is_gnu_longname()
        || entry_type.is_gnu_longlink();

    Ok(EntryHeader {
        data_size,
        path: String::from_utf8_lossy(&header.path_bytes()).into_owned(),
        is_extension,
        padded,
    })
}

/// Copy exactly `len` bytes, or as many as the reader still has. Returns the
/// number of bytes copied; fewer than `len` means the stream ended early.
pub fn copy_up_to<R: Read, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
    len: u64,
) -> io::Result<u64> {
    let mut buf = vec![0_u8; COPY_BUFFER_BYTES];
    let mut copied = 0_u64;
    while copied < len {
        let want = usize::try_from((len - copied).min(COPY_BUFFER_BYTES as u64))
            .unwrap_or(COPY_BUFFER_BYTES);
        let n = read_full(reader, &mut buf[..want])?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
        if n < want {
            break;
        }
    }
    Ok(copied)
}

fn computed_checksum(block: &[u8; BLOCK_SIZE]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(idx, &b)| {
            if CHECKSUM_RANGE.contains(&idx) {
                u32::from(b' ')
            } else {
                u32::from(b)
            }
        })
        .sum()
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}
