use std::fs::File;
use std::io::{self, BufWriter, Cursor, Seek, SeekFrom, Write};

/// Output of a tar repair. Besides plain writes, a repair must be able to
/// drop the bytes of an incomplete trailing entry it already copied.
///
/// Offsets passed to [`RepairSink::rewind_to`] count the bytes written by the
/// repair, so a sink must be empty and positioned at offset 0 when the repair
/// starts (open files with `truncate(true)`).
pub trait RepairSink: Write {
    /// Discard everything after the first `len` bytes and continue writing
    /// from there.
    fn rewind_to(&mut self, len: u64) -> io::Result<()>;
}

impl RepairSink for File {
    fn rewind_to(&mut self, len: u64) -> io::Result<()> {
        self.flush()?;
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

impl RepairSink for Cursor<Vec<u8>> {
    fn rewind_to(&mut self, len: u64) -> io::Result<()> {
        let keep = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "rewind offset overflow"))?;
        self.get_mut().truncate(keep);
        self.set_position(len);
        Ok(())
    }
}

impl<W: RepairSink> RepairSink for BufWriter<W> {
    fn rewind_to(&mut self, len: u64) -> io::Result<()> {
        self.flush()?;
        self.get_mut().rewind_to(len)
    }
}

impl<S: RepairSink + ?Sized> RepairSink for &mut S {
    fn rewind_to(&mut self, len: u64) -> io::Result<()> {
        (**self).rewind_to(len)
    }
}
