use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to create memory profile '{}'", .path.display())]
    SceneFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("an allocation tracker is already attached to this allocator")]
    AlreadyAttached,
}

/// Reasons a scene file could not be imported. Any of these leaves the
/// importer empty.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("memory profile '{}' does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read memory profile '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("memory profile is {len} bytes, too short for a snapshot count")]
    MissingTrailer { len: usize },

    #[error("failed to decode snapshot count")]
    Trailer(#[source] bincode::Error),

    #[error("snapshot count {count} cannot fit in {record_bytes} bytes of records")]
    ImplausibleCount { count: u64, record_bytes: usize },

    #[error("record stream truncated at byte {offset}")]
    TruncatedRecord { offset: usize },

    #[error("expected {expected} snapshots but the record stream ended after {found}")]
    MissingSnapshots { expected: u64, found: u64 },
}
