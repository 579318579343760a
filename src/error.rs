//! Engine errors.
//!
//! Transient I/O failures inside the manager loop are logged and retried
//! rather than surfaced; only construction problems and drain-phase
//! failures that outlive the retry budget reach the caller.

use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The working directory could not be created.
    #[error("failed to create working directory {path}: {source}")]
    Workdir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A drain-phase write or merge kept failing past the retry budget.
    #[error("giving up after {attempts} failed run-file attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// The manager thread panicked; engine state is unrecoverable.
    #[error("manager thread panicked")]
    ManagerPanicked,

    /// Any other I/O failure, surfaced directly.
    #[error(transparent)]
    Io(#[from] io::Error),
}
