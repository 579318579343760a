//! The public face of the engine.
//!
//! An [`ExternalSorter`] is built once, fed concurrently through
//! [`push`](ExternalSorter::push), collapsed to a single sorted file by
//! [`finish`](ExternalSorter::finish), and streamed back out with
//! [`execute`](ExternalSorter::execute). The caller coordinates producer
//! lifetime: every `push` must have returned before `finish` is called.

use crate::{
    batch::Batch,
    error::Error,
    manager::Manager,
    queue::IngestQueue,
    record::Record,
    run::io::RunReader,
};
use crossbeam_utils::Backoff;
use log::debug;
use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

/// Construction parameters.
///
/// `max_mem` is advisory: peak memory tracks the batches outstanding in
/// the ingestion queue plus those awaiting pairing, and the only
/// backpressure is the bounded queue itself.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Producer concurrency hint; sizes the ingestion queue.
    pub threads: usize,
    /// Advisory memory ceiling in bytes. Recognized, not enforced.
    pub max_mem: usize,
    /// Directory for run files; created recursively when absent.
    pub workdir: PathBuf,
    /// Ingestion queue capacity override; defaults to `threads * 8`.
    pub queue_capacity: Option<usize>,
    /// Records per I/O block for run readers and writers.
    pub io_buffer_records: usize,
}

impl SortConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            threads: 1,
            max_mem: 1 << 30,
            workdir: workdir.into(),
            queue_capacity: None,
            io_buffer_records: 4096,
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn max_mem(mut self, bytes: usize) -> Self {
        self.max_mem = bytes;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn io_buffer_records(mut self, records: usize) -> Self {
        self.io_buffer_records = records.max(1);
        self
    }
}

/// An external merge sort engine over fixed-size records.
///
/// Any number of threads may call [`push`](Self::push) concurrently;
/// one background manager thread stages and merges runs on disk the
/// whole time. The output is a total order under the construction
/// predicate over everything pushed; relative order of equal records is
/// unspecified.
pub struct ExternalSorter<K: Record, C> {
    queue: Arc<IngestQueue<Batch<K>>>,
    draining: Arc<AtomicBool>,
    manager: Option<JoinHandle<Manager<K, C>>>,
    workdir: PathBuf,
    io_buffer_records: usize,
    output: Option<PathBuf>,
}

impl<K, C> ExternalSorter<K, C>
where
    K: Record,
    C: Fn(&K, &K) -> bool + Send + 'static,
{
    /// Creates the working directory if needed and spawns the manager
    /// thread.
    ///
    /// `less` must be a strict weak ordering: `less(a, b)` is true iff
    /// `a` precedes `b`. A predicate that is not a strict weak ordering
    /// produces unspecified output order (but no memory unsafety).
    pub fn new(config: SortConfig, less: C) -> Result<Self, Error> {
        fs::create_dir_all(&config.workdir).map_err(|source| Error::Workdir {
            path: config.workdir.clone(),
            source,
        })?;

        let capacity = config
            .queue_capacity
            .unwrap_or(config.threads.max(1) * 8);
        let queue = Arc::new(IngestQueue::with_capacity(capacity));
        let draining = Arc::new(AtomicBool::new(false));

        let manager = Manager::new(
            Arc::clone(&queue),
            Arc::clone(&draining),
            less,
            config.workdir.clone(),
            config.io_buffer_records,
            config.io_buffer_records,
        );
        let handle = thread::Builder::new()
            .name("spillsort-manager".into())
            .spawn(move || manager.run())?;
        debug!(
            "engine up: workdir {}, queue capacity {}",
            config.workdir.display(),
            queue.capacity()
        );

        Ok(Self {
            queue,
            draining,
            manager: Some(handle),
            workdir: config.workdir,
            io_buffer_records: config.io_buffer_records,
            output: None,
        })
    }

    /// Copies `records` into the engine.
    ///
    /// The caller's slice is not retained. An empty slice is accepted
    /// and consumes no queue capacity. When the ingestion queue is
    /// saturated this backs off (spin, then yield) and retries until
    /// the manager makes room.
    pub fn push(&self, records: &[K]) {
        if records.is_empty() {
            return;
        }
        let mut batch = Batch::new(records.to_vec());
        let backoff = Backoff::new();
        loop {
            match self.queue.push(batch) {
                Ok(()) => return,
                Err(rejected) => {
                    batch = rejected;
                    backoff.snooze();
                }
            }
        }
    }

    /// Drains the engine and collapses all runs into one sorted file,
    /// returning its path.
    ///
    /// All producers must have returned from [`push`](Self::push). The
    /// returned file stays inside the working directory; moving or
    /// deleting it afterwards is the caller's business.
    ///
    /// # Panics
    ///
    /// Panics when called a second time.
    pub fn finish(&mut self) -> Result<PathBuf, Error> {
        let handle = self.manager.take().expect("finish called twice");
        self.draining.store(true, Ordering::Release);
        let mut manager = handle.join().map_err(|_| Error::ManagerPanicked)?;

        manager.drain_queue();
        manager.flush_pending()?;
        let path = manager.collapse()?;
        debug!("drained to {}", path.display());

        self.output = Some(path.clone());
        Ok(path)
    }

    /// Streams the sorted output to `consumer`, one record at a time in
    /// non-decreasing order under the construction predicate.
    ///
    /// # Panics
    ///
    /// Panics when called before a successful [`finish`](Self::finish).
    pub fn execute<F>(&mut self, mut consumer: F) -> Result<(), Error>
    where
        F: FnMut(K),
    {
        let path = self
            .output
            .as_ref()
            .expect("execute called before finish");
        let mut reader = RunReader::<K>::open(path, self.io_buffer_records)?;
        while reader.has_more() {
            consumer(reader.current());
            reader.advance()?;
        }
        Ok(())
    }

    /// The engine's working directory.
    pub fn workdir(&self) -> &std::path::Path {
        &self.workdir
    }
}

impl<K: Record, C> Drop for ExternalSorter<K, C> {
    fn drop(&mut self) {
        // Abandoned without finish: stop the manager; its run files die
        // with the workdir, which external cleanup owns.
        if let Some(handle) = self.manager.take() {
            self.draining.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}
