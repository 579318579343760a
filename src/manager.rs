//! The manager: a single-threaded cooperative loop turning pushed
//! batches into sorted runs and keeping the set of runs collapsed.
//!
//! ## Design
//!
//! The manager owns every piece of mutable state except the ingestion
//! queue: the pairing queue of sorted in-memory batches, the run set,
//! and the id counter. Serializing all of it on one thread means no
//! stage ever takes a lock.
//!
//! Each tick runs three stages in order:
//!
//!   1. ingest: one non-blocking dequeue, sort in place, queue for
//!      pairing;
//!   2. pairing: merge the two oldest sorted batches into a fresh
//!      level-0 run on disk;
//!   3. leveled: while the two smallest runs sit at the same level,
//!      merge them one level up.
//!
//! Merging only equal levels approximates a balanced binary merge tree:
//! every record moves through `O(log n)` merges while the live state
//! stays a handful of run identifiers. The tick sleeps roughly a
//! millisecond when no stage made progress, bounding idle spin at the
//! cost of that much scheduling latency on an I/O-bound workload.
//!
//! Transient file failures never kill the loop: the inputs of the
//! failed step go back where they came from (pairing queue or run set)
//! and the step retries on a later tick, with the error reported to the
//! diagnostic sink. The drain phase bounds those retries instead, since
//! at that point there is no caller left to make progress for.

use crate::{
    batch::Batch,
    error::Error,
    queue::IngestQueue,
    record::Record,
    run::{
        io::{RunReader, RunWriter},
        merge::{merge_batches, merge_readers, write_batch},
        Run, RunSet,
    },
};
use log::{debug, warn};
use std::{
    collections::VecDeque,
    fs, io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// Consecutive failed run-file attempts tolerated during drain before
/// the error is surfaced instead of livelocking.
const DRAIN_RETRY_LIMIT: u32 = 64;

/// Idle-tick sleep; see the module docs.
const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub(crate) struct Manager<K, C> {
    queue: Arc<IngestQueue<Batch<K>>>,
    draining: Arc<AtomicBool>,
    less: C,
    workdir: PathBuf,
    /// Reader and writer block sizes, in records.
    read_buffer: usize,
    write_buffer: usize,
    /// Sorted batches awaiting the pairing stage, oldest first.
    pending: VecDeque<Batch<K>>,
    runs: RunSet,
    next_id: u32,
}

impl<K, C> Manager<K, C>
where
    K: Record,
    C: Fn(&K, &K) -> bool,
{
    pub fn new(
        queue: Arc<IngestQueue<Batch<K>>>,
        draining: Arc<AtomicBool>,
        less: C,
        workdir: PathBuf,
        read_buffer: usize,
        write_buffer: usize,
    ) -> Self {
        Self {
            queue,
            draining,
            less,
            workdir,
            read_buffer,
            write_buffer,
            pending: VecDeque::new(),
            runs: RunSet::new(),
            next_id: 0,
        }
    }

    /// Runs the cooperative loop until draining is signaled, then hands
    /// the accumulated state back for the drain.
    pub fn run(mut self) -> Self {
        while !self.draining.load(Ordering::Acquire) {
            let mut progressed = self.ingest_one();
            progressed |= self.pair_merge();
            while self.leveled_step() {
                progressed = true;
            }
            if !progressed {
                thread::sleep(IDLE_SLEEP);
            }
        }
        self
    }

    /// Takes one batch off the queue, sorts it, and queues it for
    /// pairing.
    fn ingest_one(&mut self) -> bool {
        match self.queue.pop() {
            Some(mut batch) => {
                batch.sort(&self.less);
                self.pending.push_back(batch);
                true
            }
            None => false,
        }
    }

    /// Merges the two oldest pending batches into a fresh level-0 run.
    ///
    /// Writing level-0 runs from pairs of batches halves their count,
    /// and with it the depth of the merge tree below.
    fn pair_merge(&mut self) -> bool {
        if self.pending.len() < 2 {
            return false;
        }
        let first = self.pending.pop_front().unwrap();
        let second = self.pending.pop_front().unwrap();

        let run = self.alloc_run(0);
        let path = run.path(&self.workdir);
        let written = RunWriter::create(&path, self.write_buffer).and_then(|mut out| {
            merge_batches(first.records(), second.records(), &mut out, &self.less)
        });

        match written {
            Ok(()) => {
                debug!(
                    "paired {} + {} records into run {}/{}",
                    first.len(),
                    second.len(),
                    run.id,
                    run.level
                );
                self.runs.insert(run);
                true
            }
            Err(e) => {
                warn!("level-0 run {} failed, batches requeued: {}", run.id, e);
                let _ = fs::remove_file(&path);
                self.pending.push_front(second);
                self.pending.push_front(first);
                false
            }
        }
    }

    /// One step of the leveled stage: merges the two smallest runs when
    /// their levels match. Returns whether a merge happened.
    fn leveled_step(&mut self) -> bool {
        if self.runs.len() < 2 {
            return false;
        }
        let first = self.runs.pop().unwrap();
        let second = self.runs.pop().unwrap();
        if first.level != second.level {
            self.runs.insert(first);
            self.runs.insert(second);
            return false;
        }
        self.merge_pair(first, second, first.level + 1).is_ok()
    }

    /// Merges `first` and `second` into a new run at `level`.
    ///
    /// On success the input files are deleted and the output joins the
    /// run set. On failure the inputs go back into the run set with
    /// their files untouched, and no partial output is left behind.
    fn merge_pair(&mut self, first: Run, second: Run, level: u32) -> io::Result<Run> {
        let out = self.alloc_run(level);
        match self.merge_files(&first, &second, &out) {
            Ok(()) => {
                if let Err(e) = first.delete(&self.workdir) {
                    warn!("could not delete merged run {}/{}: {}", first.id, first.level, e);
                }
                if let Err(e) = second.delete(&self.workdir) {
                    warn!(
                        "could not delete merged run {}/{}: {}",
                        second.id, second.level, e
                    );
                }
                debug!(
                    "merged runs {}/{} + {}/{} into {}/{}",
                    first.id, first.level, second.id, second.level, out.id, out.level
                );
                self.runs.insert(out);
                Ok(out)
            }
            Err(e) => {
                warn!(
                    "merge of runs {}/{} and {}/{} failed, requeued: {}",
                    first.id, first.level, second.id, second.level, e
                );
                self.runs.insert(first);
                self.runs.insert(second);
                Err(e)
            }
        }
    }

    fn merge_files(&self, first: &Run, second: &Run, out: &Run) -> io::Result<()> {
        // Three file handles at the peak: two inputs, one output.
        let mut a = RunReader::open(&first.path(&self.workdir), self.read_buffer)?;
        let mut b = RunReader::open(&second.path(&self.workdir), self.read_buffer)?;
        let out_path = out.path(&self.workdir);
        let result = RunWriter::create(&out_path, self.write_buffer)
            .and_then(|mut w| merge_readers(&mut a, &mut b, &mut w, &self.less));
        if result.is_err() {
            let _ = fs::remove_file(&out_path);
        }
        result
    }

    fn alloc_run(&mut self, level: u32) -> Run {
        let id = self.next_id;
        self.next_id += 1;
        Run { id, level }
    }

    // --- drain phase, executed on the caller thread after the join ---

    /// Empties the ingestion queue into the pairing queue, sorting each
    /// leftover batch. Producers are gone by now, so this terminates.
    pub fn drain_queue(&mut self) {
        while self.ingest_one() {}
    }

    /// Writes every pending batch to its own level-0 run. No pairing
    /// happens here: there may be an odd batch out.
    pub fn flush_pending(&mut self) -> Result<(), Error> {
        let mut attempts = 0;
        while let Some(batch) = self.pending.pop_front() {
            let run = self.alloc_run(0);
            let path = run.path(&self.workdir);
            let written = RunWriter::create(&path, self.write_buffer)
                .and_then(|mut out| write_batch(batch.records(), &mut out));

            match written {
                Ok(()) => {
                    self.runs.insert(run);
                    attempts = 0;
                }
                Err(e) => {
                    warn!("flush of {} records failed, retrying: {}", batch.len(), e);
                    let _ = fs::remove_file(&path);
                    self.pending.push_front(batch);
                    attempts += 1;
                    if attempts >= DRAIN_RETRY_LIMIT {
                        return Err(Error::RetriesExhausted { attempts, source: e });
                    }
                    thread::sleep(IDLE_SLEEP);
                }
            }
        }
        Ok(())
    }

    /// Collapses the run set to a single run, merging the two smallest
    /// regardless of level, and returns the survivor's path. With no
    /// runs at all an empty level-0 run is written.
    pub fn collapse(&mut self) -> Result<PathBuf, Error> {
        let mut attempts = 0;
        while self.runs.len() >= 2 {
            let first = self.runs.pop().unwrap();
            let second = self.runs.pop().unwrap();
            // Levels stop steering merges here; the formula only keeps a
            // run's level a bound on the batches that fed it.
            let level =
                first.level.max(second.level) + u32::from(first.level == second.level);
            match self.merge_pair(first, second, level) {
                Ok(_) => attempts = 0,
                Err(e) => {
                    attempts += 1;
                    if attempts >= DRAIN_RETRY_LIMIT {
                        return Err(Error::RetriesExhausted { attempts, source: e });
                    }
                    thread::sleep(IDLE_SLEEP);
                }
            }
        }

        let last = match self.runs.pop() {
            Some(run) => run,
            None => {
                let run = self.alloc_run(0);
                let mut out = RunWriter::<K>::create(&run.path(&self.workdir), self.write_buffer)?;
                out.flush()?;
                run
            }
        };
        Ok(last.path(&self.workdir))
    }
}
