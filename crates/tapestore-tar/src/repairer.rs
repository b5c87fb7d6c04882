//! Tar verification and crash repair.
//!
//! A tar that was being written when the process died ends somewhere inside
//! its last entry. Repair copies every complete entry of such a stream into a
//! new archive, drops the torn tail, and closes the archive with a proper
//! end-of-archive marker. Verification reads a presumed-complete archive end
//! to end and fails on any structural defect.

use std::io::{self, Read, Write};

use tapestore_error::{Result, TapeError};
use tapestore_types::{DigestType, DigestWithSize, TarId};
use tracing::{debug, info, warn};

use crate::block::{
    BLOCK_SIZE, BlockRead, END_OF_ARCHIVE_BYTES, copy_up_to, is_zero_block, parse_header,
    read_block,
};
use crate::digest::{DigestReader, DigestWriter};
use crate::sink::RepairSink;

const DRAIN_BUFFER_BYTES: usize = 64 * 1024;

/// Detailed result of [`TarRepairer::repair_and_verify_detailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Size and digest of the repaired archive.
    pub digest: DigestWithSize,
    /// Complete entries carried into the repaired archive.
    pub entries_kept: u64,
    /// Torn or unreadable trailing entries that were dropped (0 or 1).
    pub entries_discarded: u64,
    /// Input bytes of dropped entries and of everything after them.
    pub discarded_bytes: u64,
    /// The input carried its own end-of-archive marker.
    pub found_end_marker: bool,
}

/// Where a repair pass stopped reading.
enum Stop {
    EndMarker,
    EndOfInput,
    Torn { partial_bytes: u64 },
    BadHeader,
}

/// Verifies and repairs tar byte streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TarRepairer {
    digest_type: DigestType,
}

impl TarRepairer {
    #[must_use]
    pub const fn new(digest_type: DigestType) -> Self {
        Self { digest_type }
    }

    #[must_use]
    pub const fn digest_type(&self) -> DigestType {
        self.digest_type
    }

    /// Read a complete archive and return its size and digest.
    ///
    /// Every header must carry a valid checksum, every entry must have all of
    /// its data and padding, the archive must end with two zero blocks, and
    /// anything after them must be zero padding.
    pub fn verify<R: Read>(&self, reader: R) -> Result<DigestWithSize> {
        let mut reader = DigestReader::new(reader, self.digest_type);
        let mut block = [0_u8; BLOCK_SIZE];
        let mut entries = 0_u64;

        loop {
            let offset = reader.position();
            match read_block(&mut reader, &mut block)? {
                BlockRead::Eof => {
                    return Err(TapeError::tar_corrupt(format!(
                        "missing end-of-archive marker after {entries} entries"
                    )));
                }
                BlockRead::Partial(n) => {
                    return Err(TapeError::tar_corrupt(format!(
                        "truncated header at offset {offset} ({n} of {BLOCK_SIZE} bytes)"
                    )));
                }
                BlockRead::Full => {}
            }

            if is_zero_block(&block) {
                expect_second_zero_block(&mut reader, &mut block)?;
                expect_zero_trailer(&mut reader)?;
                break;
            }

            let header = parse_header(&block).map_err(|defect| {
                TapeError::tar_corrupt(format!("header at offset {offset}: {defect}"))
            })?;
            let padded = header.padded_size();
            let copied = copy_up_to(&mut reader, &mut io::sink(), padded)?;
            if copied < padded {
                return Err(TapeError::tar_corrupt(format!(
                    "entry '{}' at offset {offset} truncated: {copied} of {padded} bytes",
                    header.path
                )));
            }
            if !header.is_extension {
                entries += 1;
            }
        }

        let digest = reader.finish();
        debug!(entries, size = digest.size, "tar verified");
        Ok(digest)
    }

    /// Verify an archive and compare it with a previously recorded size and
    /// digest. The recorded digest algorithm wins over the repairer's own.
    pub fn verify_against<R: Read>(
        &self,
        reader: R,
        expected: &DigestWithSize,
        tar_id: &TarId,
    ) -> Result<DigestWithSize> {
        let actual = Self::new(expected.digest_type).verify(reader)?;
        if actual.size != expected.size {
            return Err(TapeError::SizeMismatch {
                tar_id: tar_id.to_string(),
                expected: expected.size,
                actual: actual.size,
            });
        }
        if !actual.digest.eq_ignore_ascii_case(&expected.digest) {
            return Err(TapeError::DigestMismatch {
                tar_id: tar_id.to_string(),
                expected: expected.digest.clone(),
                actual: actual.digest,
            });
        }
        Ok(actual)
    }

    /// Copy the longest valid prefix of complete entries from `reader` into
    /// `sink`, close it with an end-of-archive marker, and return the size
    /// and digest of what was written.
    ///
    /// `sink` must start empty at offset 0; see [`RepairSink`].
    pub fn repair_and_verify<R: Read, S: RepairSink>(
        &self,
        reader: R,
        sink: S,
        tar_id: &TarId,
    ) -> Result<DigestWithSize> {
        self.repair_and_verify_detailed(reader, sink, tar_id)
            .map(|outcome| outcome.digest)
    }

    /// [`Self::repair_and_verify`] with entry accounting.
    pub fn repair_and_verify_detailed<R: Read, S: RepairSink>(
        &self,
        mut reader: R,
        sink: S,
        tar_id: &TarId,
    ) -> Result<RepairOutcome> {
        let mut out = DigestWriter::new(sink, self.digest_type);
        let mut committed = out.checkpoint();
        let mut block = [0_u8; BLOCK_SIZE];
        let mut entries_kept = 0_u64;
        let mut pending_extension = false;
        let mut input_offset = 0_u64;

        let stop = loop {
            match read_block(&mut reader, &mut block)? {
                BlockRead::Eof => break Stop::EndOfInput,
                BlockRead::Partial(n) => {
                    break Stop::Torn {
                        partial_bytes: n as u64,
                    };
                }
                BlockRead::Full => {}
            }

            if is_zero_block(&block) {
                break Stop::EndMarker;
            }

            let header = match parse_header(&block) {
                Ok(header) => header,
                Err(defect) => {
                    warn!(
                        tar_id = %tar_id,
                        offset = input_offset,
                        %defect,
                        "invalid tar header, ending recoverable prefix"
                    );
                    break Stop::BadHeader;
                }
            };
            input_offset += BLOCK_SIZE as u64;

            out.write_all(&block)?;
            let padded = header.padded_size();
            let copied = copy_up_to(&mut reader, &mut out, padded)?;
            input_offset += copied;
            if copied < padded {
                debug!(
                    tar_id = %tar_id,
                    entry = %header.path,
                    copied,
                    expected = padded,
                    "torn tar entry"
                );
                break Stop::Torn { partial_bytes: 0 };
            }

            if header.is_extension {
                pending_extension = true;
            } else {
                entries_kept += 1;
                pending_extension = false;
                committed = out.checkpoint();
                debug!(tar_id = %tar_id, entry = %header.path, size = header.data_size, "kept tar entry");
            }
        };

        let rolled_back = out.position() - committed.len();
        let mut discarded_bytes = rolled_back;
        let mut entries_discarded = u64::from(rolled_back > 0 || pending_extension);
        let found_end_marker = matches!(stop, Stop::EndMarker);
        match stop {
            Stop::EndMarker | Stop::EndOfInput => {}
            Stop::Torn { partial_bytes } => {
                discarded_bytes += partial_bytes;
                entries_discarded = 1;
            }
            Stop::BadHeader => {
                discarded_bytes += BLOCK_SIZE as u64 + drain(&mut reader)?;
                entries_discarded = 1;
            }
        }

        if rolled_back > 0 {
            out.get_mut().rewind_to(committed.len())?;
            out.restore(committed);
        }
        out.write_all(&[0_u8; END_OF_ARCHIVE_BYTES])?;
        let digest = out.finish()?;

        if entries_discarded > 0 {
            warn!(
                tar_id = %tar_id,
                entries_kept,
                discarded_bytes,
                size = digest.size,
                "repaired tar, discarded incomplete trailing entry"
            );
        } else {
            info!(tar_id = %tar_id, entries_kept, size = digest.size, "repaired tar");
        }

        Ok(RepairOutcome {
            digest,
            entries_kept,
            entries_discarded,
            discarded_bytes,
            found_end_marker,
        })
    }
}

fn expect_second_zero_block<R: Read>(reader: &mut R, block: &mut [u8; BLOCK_SIZE]) -> Result<()> {
    match read_block(reader, block)? {
        BlockRead::Full if is_zero_block(block) => Ok(()),
        BlockRead::Full => Err(TapeError::tar_corrupt(
            "single zero block followed by data",
        )),
        BlockRead::Eof | BlockRead::Partial(_) => Err(TapeError::tar_corrupt(
            "truncated end-of-archive marker",
        )),
    }
}

fn expect_zero_trailer<R: Read>(reader: &mut R) -> Result<()> {
    let mut buf = vec![0_u8; DRAIN_BUFFER_BYTES];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if buf[..n].iter().any(|&b| b != 0) {
            return Err(TapeError::tar_corrupt(
                "non-zero bytes after end-of-archive marker",
            ));
        }
    }
}

fn drain<R: Read>(reader: &mut R) -> Result<u64> {
    Ok(io::copy(reader, &mut io::sink())?)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek, SeekFrom};

    use proptest::prelude::*;

    use super::*;
    use crate::digest::digest_bytes;

    fn tar_id() -> TarId {
        TarId::parse("20190625115513001-repair.tar").expect("tar id")
    }

    fn payload(seed: usize, len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 31 + seed * 7) % 251) as u8).collect()
    }

    fn build_archive(sizes: &[usize]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (idx, &len) in sizes.iter().enumerate() {
            let mut header = tar::Header::new_gnu();
            header.set_size(len as u64);
            header.set_mode(0o644);
            let data = payload(idx, len);
            builder
                .append_data(&mut header, format!("objects/entry-{idx}"), data.as_slice())
                .expect("append");
        }
        builder.into_inner().expect("finish")
    }

    fn repair(input: &[u8]) -> (Vec<u8>, RepairOutcome) {
        let mut sink = Cursor::new(Vec::new());
        let outcome = TarRepairer::new(DigestType::Sha256)
            .repair_and_verify_detailed(input, &mut sink, &tar_id())
            .expect("repair");
        (sink.into_inner(), outcome)
    }

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut reader = tar::Archive::new(archive);
        reader
            .entries()
            .expect("entries")
            .map(|entry| {
                let entry = entry.expect("entry");
                entry.path().expect("path").to_string_lossy().into_owned()
            })
            .collect()
    }

    #[test]
    fn test_verify_complete_archive() {
        let archive = build_archive(&[10, 700, 0]);
        let digest = TarRepairer::new(DigestType::Sha512)
            .verify(archive.as_slice())
            .expect("verify");
        assert_eq!(digest, digest_bytes(&archive, DigestType::Sha512));
    }

    #[test]
    fn test_verify_accepts_zero_record_padding() {
        let mut archive = build_archive(&[100]);
        archive.extend_from_slice(&[0_u8; 4096]);
        TarRepairer::default()
            .verify(archive.as_slice())
            .expect("zero padding is allowed");
    }

    #[test]
    fn test_verify_rejects_truncation() {
        let archive = build_archive(&[1000]);
        for cut in [0, 100, 512, 800, archive.len() - 512, archive.len() - 1] {
            let err = TarRepairer::default()
                .verify(&archive[..cut])
                .expect_err("truncated archive must fail");
            assert!(matches!(err, TapeError::TarCorrupt { .. }), "cut {cut}: {err}");
        }
    }

    #[test]
    fn test_verify_rejects_trailing_garbage() {
        let mut archive = build_archive(&[10]);
        archive.extend_from_slice(b"garbage");
        let err = TarRepairer::default()
            .verify(archive.as_slice())
            .expect_err("garbage after end marker");
        assert!(matches!(err, TapeError::TarCorrupt { .. }));
    }

    #[test]
    fn test_verify_rejects_bad_checksum() {
        let mut archive = build_archive(&[10]);
        archive[0] ^= 0x20;
        let err = TarRepairer::default()
            .verify(archive.as_slice())
            .expect_err("bad header checksum");
        assert!(matches!(err, TapeError::TarCorrupt { .. }));
    }

    #[test]
    fn test_verify_against_reports_divergence() {
        let archive = build_archive(&[10]);
        let repairer = TarRepairer::default();
        let good = repairer.verify(archive.as_slice()).expect("verify");
        repairer
            .verify_against(archive.as_slice(), &good, &tar_id())
            .expect("matching digest");

        let wrong_size = DigestWithSize::new(good.size + 1, good.digest.clone(), good.digest_type);
        let err = repairer
            .verify_against(archive.as_slice(), &wrong_size, &tar_id())
            .expect_err("size differs");
        assert!(matches!(err, TapeError::SizeMismatch { .. }));

        let wrong_digest = DigestWithSize::new(good.size, "00", good.digest_type);
        let err = repairer
            .verify_against(archive.as_slice(), &wrong_digest, &tar_id())
            .expect_err("digest differs");
        assert!(matches!(err, TapeError::DigestMismatch { .. }));
    }

    #[test]
    fn test_verify_against_uses_recorded_algorithm() {
        let archive = build_archive(&[10]);
        let sha256 = digest_bytes(&archive, DigestType::Sha256);
        TarRepairer::new(DigestType::Sha512)
            .verify_against(archive.as_slice(), &sha256, &tar_id())
            .expect("recorded sha256 is honored");
    }

    #[test]
    fn test_repair_of_intact_archive_is_identity() {
        let archive = build_archive(&[10, 2000, 512]);
        let (output, outcome) = repair(&archive);
        assert_eq!(output, archive);
        assert_eq!(outcome.entries_kept, 3);
        assert_eq!(outcome.entries_discarded, 0);
        assert!(outcome.found_end_marker);
        assert_eq!(outcome.digest, digest_bytes(&archive, DigestType::Sha256));
    }

    #[test]
    fn test_repair_drops_torn_entry() {
        let archive = build_archive(&[10, 2000]);
        // first entry: header + 1 data block; cut inside the second entry's data
        let cut = 512 + 512 + 512 + 300;
        let (output, outcome) = repair(&archive[..cut]);
        assert_eq!(outcome.entries_kept, 1);
        assert_eq!(outcome.entries_discarded, 1);
        assert_eq!(outcome.discarded_bytes, 512 + 300);
        assert!(!outcome.found_end_marker);
        assert_eq!(entry_names(&output), vec!["objects/entry-0".to_owned()]);
        assert_eq!(&output[..1024], &archive[..1024]);
        assert_eq!(output.len(), 1024 + END_OF_ARCHIVE_BYTES);
    }

    #[test]
    fn test_repair_drops_partial_header() {
        let archive = build_archive(&[10, 10]);
        let (output, outcome) = repair(&archive[..1024 + 100]);
        assert_eq!(outcome.entries_kept, 1);
        assert_eq!(outcome.entries_discarded, 1);
        assert_eq!(outcome.discarded_bytes, 100);
        assert_eq!(output.len(), 1024 + END_OF_ARCHIVE_BYTES);
    }

    #[test]
    fn test_repair_stops_at_bad_header() {
        let mut archive = build_archive(&[10, 10, 10]);
        archive[1024] ^= 0x01;
        let (output, outcome) = repair(&archive);
        assert_eq!(outcome.entries_kept, 1);
        assert_eq!(outcome.entries_discarded, 1);
        assert_eq!(outcome.discarded_bytes, (archive.len() - 1024) as u64);
        assert_eq!(entry_names(&output).len(), 1);
    }

    #[test]
    fn test_unpaddable_entry_size_ends_prefix() {
        let mut archive = build_archive(&[10]);
        archive.truncate(1024);
        let mut header = tar::Header::new_gnu();
        header.set_path("objects/huge").expect("path");
        header.set_size(u64::MAX);
        header.set_mode(0o644);
        header.set_cksum();
        archive.extend_from_slice(header.as_bytes());
        archive.extend_from_slice(&[0_u8; END_OF_ARCHIVE_BYTES]);

        let (output, outcome) = repair(&archive);
        assert_eq!(outcome.entries_kept, 1);
        assert_eq!(outcome.entries_discarded, 1);
        assert_eq!(entry_names(&output).len(), 1);

        let err = TarRepairer::default()
            .verify(archive.as_slice())
            .expect_err("unpaddable size");
        assert!(matches!(err, TapeError::TarCorrupt { .. }), "{err}");
    }

    #[test]
    fn test_repair_of_empty_input_yields_empty_archive() {
        let (output, outcome) = repair(&[]);
        assert_eq!(output, vec![0_u8; END_OF_ARCHIVE_BYTES]);
        assert_eq!(outcome.entries_kept, 0);
        assert_eq!(outcome.entries_discarded, 0);
        TarRepairer::new(DigestType::Sha256)
            .verify(output.as_slice())
            .expect("empty archive verifies");
    }

    #[test]
    fn test_repair_discards_orphan_long_name_header() {
        let long_name = format!("objects/{}", "n".repeat(150));
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, "objects/short", &b"data"[..])
            .expect("append");
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, &long_name, &b"data"[..])
            .expect("append");
        let archive = builder.into_inner().expect("finish");

        // first entry (2 blocks), then the GNU long-name header and its data
        // block; stop right before the real header of the second entry
        let (output, outcome) = repair(&archive[..1024 + 1024]);
        assert_eq!(outcome.entries_kept, 1);
        assert_eq!(outcome.entries_discarded, 1);
        assert_eq!(outcome.discarded_bytes, 1024);
        assert_eq!(entry_names(&output), vec!["objects/short".to_owned()]);

        let (full, outcome) = repair(&archive);
        assert_eq!(outcome.entries_kept, 2);
        assert_eq!(full, archive);
    }

    #[test]
    fn test_repair_into_file_rolls_back_on_disk() {
        let archive = build_archive(&[10, 5000]);
        let cut = archive.len() - END_OF_ARCHIVE_BYTES - 600;
        let mut file = tempfile::tempfile().expect("tempfile");
        let digest = TarRepairer::default()
            .repair_and_verify(&archive[..cut], &mut file, &tar_id())
            .expect("repair");

        file.seek(SeekFrom::Start(0)).expect("seek");
        let mut written = Vec::new();
        file.read_to_end(&mut written).expect("read back");
        assert_eq!(written.len() as u64, digest.size);
        assert_eq!(written.len(), 1024 + END_OF_ARCHIVE_BYTES);
        let verified = TarRepairer::default()
            .verify(written.as_slice())
            .expect("repaired file verifies");
        assert_eq!(verified, digest);
    }

    proptest! {
        #[test]
        fn prop_any_truncation_repairs_to_valid_prefix(
            sizes in proptest::collection::vec(0_usize..1500, 1..5),
            cut_ratio in 0.0_f64..=1.0,
        ) {
            let archive = build_archive(&sizes);
            let cut = ((archive.len() as f64) * cut_ratio) as usize;
            let (output, outcome) = repair(&archive[..cut.min(archive.len())]);

            let body = output.len() - END_OF_ARCHIVE_BYTES;
            prop_assert_eq!(&output[..body], &archive[..body]);
            prop_assert!(output[body..].iter().all(|&b| b == 0));
            prop_assert!(outcome.entries_kept <= sizes.len() as u64);

            let verified = TarRepairer::new(DigestType::Sha256)
                .verify(output.as_slice())
                .expect("repaired archive verifies");
            prop_assert_eq!(verified, outcome.digest);
        }
    }
}
