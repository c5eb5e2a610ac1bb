use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from [`crate::sink`] (§7: `FileAlreadyExists`, `SinkIoFailure`, `CleanupFailure`).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("refused to remove directory at or above the recording root: {0}")]
    AboveRoot(PathBuf),
}

/// Errors from [`crate::scraper`] best-effort text extraction (§7: `BestEffortScrapeMiss`).
///
/// Every path through the scraper is non-fatal, so `Recorder` only ever
/// logs this at DEBUG; it never propagates further than the call site.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("no match for pattern")]
    NoMatch,

    #[error("matched value failed to parse: {0}")]
    Unparsable(String),
}

/// Errors from [`crate::fetcher::Fetcher`] (§4.4).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("non-success response status: {0}")]
    Status(u16),
}

/// Errors from the container-specific tag writers (§7: `TagWriteFailure`, `MalformedContainer`).
#[derive(Debug, Error)]
pub enum TagError {
    #[error("i/o error writing tag: {0}")]
    Io(#[from] io::Error),

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("unsupported chunk offset table (co64) present, refusing to mistag")]
    UnsupportedChunkOffsetTable,

    #[error("unsupported audio format for tagging")]
    UnsupportedFormat,
}

/// A single worst-outcome value collected by [`crate::recorder::Recorder`] across
/// one song's open/write/close-or-tag pipeline (§7 propagation policy).
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unsupported container format")]
    UnsupportedFormat,
}
