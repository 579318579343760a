//! An external merge sort engine for datasets larger than memory.
//!
//! Producers concurrently push batches of fixed-size records; the
//! engine sorts each batch in memory, stages results to disk as sorted
//! run files, and progressively merges runs of equal level until a
//! single sorted run remains, which the caller streams record by
//! record.
//!
//! ## Design
//!
//! ```text
//! producers ──► ingestion queue ──► sort ──► pairing ──► level-0 runs
//!                 (lock-free)                                  │
//!                         leveled merges (equal levels) ◄──────┘
//!                                    │
//!                     drain: collapse to one run ──► stream to caller
//! ```
//!
//! One manager thread drives everything right of the queue, so the run
//! set and the pairing queue need no locks. Runs carry a level that
//! doubles (in expectation) with each merge; merging only equal levels
//! keeps total I/O near that of a balanced binary merge tree while the
//! engine tracks nothing but a handful of run identifiers.
//!
//! The engine is not stable, keeps at most three files open at once,
//! and treats its working directory as disposable scratch space: only
//! the final run survives a completed sort.
//!
//! ## Example
//!
//! ```no_run
//! use spillsort::{ExternalSorter, SortConfig};
//!
//! let config = SortConfig::new("/tmp/spillsort").threads(4);
//! let mut sorter = ExternalSorter::new(config, |a: &u32, b: &u32| a < b)?;
//!
//! sorter.push(&[5, 1, 4]);
//! sorter.push(&[3, 2, 6]);
//!
//! let path = sorter.finish()?;
//! println!("sorted run at {}", path.display());
//!
//! let mut output = Vec::new();
//! sorter.execute(|record| output.push(record))?;
//! assert_eq!(output, vec![1, 2, 3, 4, 5, 6]);
//! # Ok::<(), spillsort::Error>(())
//! ```

mod batch;
mod error;
mod manager;
mod queue;
mod record;
mod run;
mod sorter;

pub use error::Error;
pub use record::Record;
pub use sorter::{ExternalSorter, SortConfig};
