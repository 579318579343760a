//! Two-way merges into run files.
//!
//! Both variants emit the smaller of the two current records and advance
//! the side it came from; once one side exhausts, the remainder of the
//! other is copied through. When neither record precedes the other the
//! first input's record is emitted, an arbitrary but fixed choice.

use super::io::{RunReader, RunWriter};
use crate::record::Record;
use std::io;

/// Merges two sorted run files into `out` and flushes it.
pub fn merge_readers<K, C>(
    a: &mut RunReader<K>,
    b: &mut RunReader<K>,
    out: &mut RunWriter<K>,
    less: &C,
) -> io::Result<()>
where
    K: Record,
    C: Fn(&K, &K) -> bool,
{
    while a.has_more() && b.has_more() {
        if less(&b.current(), &a.current()) {
            out.write(&b.current())?;
            b.advance()?;
        } else {
            out.write(&a.current())?;
            a.advance()?;
        }
    }
    while a.has_more() {
        out.write(&a.current())?;
        a.advance()?;
    }
    while b.has_more() {
        out.write(&b.current())?;
        b.advance()?;
    }
    out.flush()
}

/// Merges two sorted in-memory batches into `out` and flushes it.
pub fn merge_batches<K, C>(a: &[K], b: &[K], out: &mut RunWriter<K>, less: &C) -> io::Result<()>
where
    K: Record,
    C: Fn(&K, &K) -> bool,
{
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if less(&b[j], &a[i]) {
            out.write(&b[j])?;
            j += 1;
        } else {
            out.write(&a[i])?;
            i += 1;
        }
    }
    for record in &a[i..] {
        out.write(record)?;
    }
    for record in &b[j..] {
        out.write(record)?;
    }
    out.flush()
}

/// Writes one already-sorted batch to `out` and flushes it.
pub fn write_batch<K: Record>(records: &[K], out: &mut RunWriter<K>) -> io::Result<()> {
    for record in records {
        out.write(record)?;
    }
    out.flush()
}

#[cfg(test)]
mod test {
    use super::{merge_batches, merge_readers, write_batch};
    use crate::run::io::{RunReader, RunWriter};
    use std::path::Path;

    fn write_run(path: &Path, records: &[u32]) {
        let mut out = RunWriter::create(path, 512).unwrap();
        write_batch(records, &mut out).unwrap();
    }

    fn read_run(path: &Path, buffer: usize) -> Vec<u32> {
        let mut reader = RunReader::open(path, buffer).unwrap();
        let mut records = Vec::new();
        while reader.has_more() {
            records.push(reader.current());
            reader.advance().unwrap();
        }
        records
    }

    #[test]
    fn interleaved_files() {
        let dir = tempfile::tempdir().unwrap();
        let (pa, pb, po) = (
            dir.path().join("a.tmp"),
            dir.path().join("b.tmp"),
            dir.path().join("o.tmp"),
        );
        write_run(&pa, &[1, 3, 5, 7]);
        write_run(&pb, &[2, 4, 6]);

        let mut a = RunReader::open(&pa, 2).unwrap();
        let mut b = RunReader::open(&pb, 2).unwrap();
        let mut out = RunWriter::create(&po, 2).unwrap();
        merge_readers(&mut a, &mut b, &mut out, &|x: &u32, y: &u32| x < y).unwrap();

        assert_eq!(read_run(&po, 2), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn refill_boundaries_lose_nothing() {
        // Run lengths chosen to straddle the 512-record reader block.
        let dir = tempfile::tempdir().unwrap();
        let (pa, pb, po) = (
            dir.path().join("a.tmp"),
            dir.path().join("b.tmp"),
            dir.path().join("o.tmp"),
        );
        let a_records: Vec<u32> = (0..700).map(|i| i * 2).collect();
        let b_records: Vec<u32> = (0..1_300).map(|i| i * 2 + 1).collect();
        write_run(&pa, &a_records);
        write_run(&pb, &b_records);

        let mut a = RunReader::open(&pa, 512).unwrap();
        let mut b = RunReader::open(&pb, 512).unwrap();
        let mut out = RunWriter::create(&po, 512).unwrap();
        merge_readers(&mut a, &mut b, &mut out, &|x: &u32, y: &u32| x < y).unwrap();

        let merged = read_run(&po, 512);
        assert_eq!(merged.len(), 2_000);
        assert!(merged.windows(2).all(|w| w[0] <= w[1]));

        let mut expected = [a_records, b_records].concat();
        expected.sort_unstable();
        assert_eq!(merged, expected);
    }

    #[test]
    fn one_side_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (pa, pb, po) = (
            dir.path().join("a.tmp"),
            dir.path().join("b.tmp"),
            dir.path().join("o.tmp"),
        );
        write_run(&pa, &[]);
        write_run(&pb, &[4, 5]);

        let mut a = RunReader::open(&pa, 4).unwrap();
        let mut b = RunReader::open(&pb, 4).unwrap();
        let mut out = RunWriter::create(&po, 4).unwrap();
        merge_readers(&mut a, &mut b, &mut out, &|x: &u32, y: &u32| x < y).unwrap();

        assert_eq!(read_run(&po, 4), vec![4, 5]);
    }

    #[test]
    fn batch_merge_prefers_first_on_ties() {
        let dir = tempfile::tempdir().unwrap();
        let po = dir.path().join("o.tmp");

        let mut out = RunWriter::create(&po, 8).unwrap();
        merge_batches(&[1, 2, 2, 9], &[2, 3], &mut out, &|x: &u32, y: &u32| {
            x < y
        })
        .unwrap();

        assert_eq!(read_run(&po, 8), vec![1, 2, 2, 2, 3, 9]);
    }
}
