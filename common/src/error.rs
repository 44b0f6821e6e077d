use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why a single map or reduce attempt failed.
///
/// None of these are reported to the coordinator. The attempt is abandoned
/// and the task is handed out again once its lease expires.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("cannot read input source {path:?}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read intermediate file {path:?}")]
    IntermediateRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {path:?}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt record in {path:?} at line {line}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("partition {partition} expected {expected} intermediate files, found {found}")]
    MissingIntermediate {
        partition: u32,
        expected: u32,
        found: u32,
    },

    #[error("workload function failed")]
    Workload(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
