//! Buffered record I/O over run files.
//!
//! Merge throughput is dominated by syscall amortization, so both ends
//! move records in blocks of a configurable record count and touch the
//! file once per block. Per-record reads or writes are never issued.

use crate::record::Record;
use std::{
    fs::File,
    io::{self, Read, Write},
    marker::PhantomData,
    path::Path,
};

/// Streaming reader over a run file.
///
/// Holds one decoded block at a time. `has_more` is true exactly while a
/// current record is available; `advance` steps past it and refills from
/// the file when the block is spent.
pub struct RunReader<K> {
    file: File,
    /// Decoded records of the current block.
    block: Vec<K>,
    /// Index of the current record in `block`.
    pos: usize,
    /// Raw staging area, `buffer * K::SIZE` bytes.
    raw: Vec<u8>,
    /// Set once a refill hits end of file.
    exhausted: bool,
}

impl<K: Record> RunReader<K> {
    /// Opens `path` and fills the first block. `buffer` is the block
    /// size in records.
    pub fn open(path: &Path, buffer: usize) -> io::Result<Self> {
        assert!(buffer > 0, "reader buffer must hold at least one record");
        let file = File::open(path)?;
        let mut reader = Self {
            file,
            block: Vec::with_capacity(buffer),
            pos: 0,
            raw: vec![0u8; buffer * K::SIZE],
            exhausted: false,
        };
        reader.refill()?;
        Ok(reader)
    }

    /// True while a current record is available.
    #[inline]
    pub fn has_more(&self) -> bool {
        self.pos < self.block.len()
    }

    /// The current record.
    #[inline]
    pub fn current(&self) -> K {
        self.block[self.pos]
    }

    /// Steps past the current record.
    pub fn advance(&mut self) -> io::Result<()> {
        self.pos += 1;
        if self.pos >= self.block.len() && !self.exhausted {
            self.refill()?;
        }
        Ok(())
    }

    /// Reads and decodes the next block.
    ///
    /// Blocks before end of file are always read in full, so a record
    /// can never straddle two refills. A trailing partial record is
    /// discarded; a read of zero bytes marks the reader exhausted.
    fn refill(&mut self) -> io::Result<()> {
        let mut filled = 0;
        while filled < self.raw.len() {
            match self.file.read(&mut self.raw[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.block.clear();
        self.pos = 0;
        if filled < self.raw.len() {
            self.exhausted = true;
        }
        for chunk in self.raw[..filled].chunks_exact(K::SIZE) {
            self.block.push(K::decode(chunk));
        }
        Ok(())
    }
}

/// Buffered writer producing a run file.
pub struct RunWriter<K> {
    file: File,
    /// Encoded records awaiting the next block write.
    raw: Vec<u8>,
    /// Flush threshold in bytes.
    cap: usize,
    _marker: PhantomData<K>,
}

impl<K: Record> RunWriter<K> {
    /// Creates `path`, truncating any previous file. `buffer` is the
    /// block size in records.
    pub fn create(path: &Path, buffer: usize) -> io::Result<Self> {
        assert!(buffer > 0, "writer buffer must hold at least one record");
        Ok(Self {
            file: File::create(path)?,
            raw: Vec::with_capacity(buffer * K::SIZE),
            cap: buffer * K::SIZE,
            _marker: PhantomData,
        })
    }

    /// Appends one record, writing the block out when it fills.
    pub fn write(&mut self, record: &K) -> io::Result<()> {
        let start = self.raw.len();
        self.raw.resize(start + K::SIZE, 0);
        record.encode(&mut self.raw[start..]);
        if self.raw.len() >= self.cap {
            self.write_block()?;
        }
        Ok(())
    }

    /// Writes out any buffered records. Required before the writer is
    /// dropped; records still buffered at drop are lost.
    pub fn flush(&mut self) -> io::Result<()> {
        self.write_block()?;
        self.file.flush()
    }

    fn write_block(&mut self) -> io::Result<()> {
        if !self.raw.is_empty() {
            self.file.write_all(&self.raw)?;
            self.raw.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{RunReader, RunWriter};

    fn roundtrip(count: u64, write_buffer: usize, read_buffer: usize) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.tmp");

        let mut writer = RunWriter::<u64>::create(&path, write_buffer).unwrap();
        for i in 0..count {
            writer.write(&i).unwrap();
        }
        writer.flush().unwrap();

        let mut reader = RunReader::<u64>::open(&path, read_buffer).unwrap();
        let mut seen = 0;
        while reader.has_more() {
            assert_eq!(reader.current(), seen);
            reader.advance().unwrap();
            seen += 1;
        }
        assert_eq!(seen, count);
    }

    #[test]
    fn block_boundaries_lose_nothing() {
        // Counts straddling, matching, and falling short of the block.
        roundtrip(700, 512, 512);
        roundtrip(1024, 512, 512);
        roundtrip(100, 512, 512);
        roundtrip(0, 512, 512);
    }

    #[test]
    fn mismatched_buffer_sizes() {
        roundtrip(1_300, 512, 64);
        roundtrip(1_300, 64, 512);
    }

    #[test]
    fn trailing_partial_record_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.tmp");

        let mut bytes = Vec::new();
        for i in 0..5u32 {
            bytes.extend_from_slice(&i.to_ne_bytes());
        }
        // A torn write: two bytes of a sixth record.
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = RunReader::<u32>::open(&path, 4).unwrap();
        let mut seen = Vec::new();
        while reader.has_more() {
            seen.push(reader.current());
            reader.advance().unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn empty_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tmp");
        std::fs::write(&path, b"").unwrap();

        let reader = RunReader::<u32>::open(&path, 16).unwrap();
        assert!(!reader.has_more());
    }
}
