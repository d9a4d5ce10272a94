use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;

/// `Read + Seek` over a file using positional reads only.
///
/// A duplicated descriptor shares its file offset with the original; reading
/// through `pread` leaves that offset untouched for the descriptor's owner.
pub(crate) struct PositionalReader<'a> {
    file: &'a File,
    pos: u64,
    len: u64,
}

impl<'a> PositionalReader<'a> {
    pub(crate) fn new(file: &'a File, len: u64) -> Self {
        Self { file, pos: 0, len }
    }
}

impl Read for PositionalReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.file.read_at(buf, self.pos)?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for PositionalReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(delta) => i128::from(self.len) + i128::from(delta),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
        };
        self.pos = u64::try_from(target).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        Ok(self.pos)
    }
}
