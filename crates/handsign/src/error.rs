//! Error types.
//!
//! Only failures that affect a whole session are represented here. Per-frame problems (a missing
//! hand, an estimator hiccup, a gesture too short to classify) are recovered from where they occur
//! and never show up as errors.

use std::{io, path::PathBuf};

use thiserror::Error;

/// The reference sign library could not be loaded.
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed library data in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("library contains no usable reference signs")]
    Empty,
}

impl LibraryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}

/// A capture session ended abnormally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("video source failed {consecutive_failures} times in a row (last error: {last_error})")]
    CameraFailure {
        consecutive_failures: u32,
        last_error: String,
    },

    #[error("capture worker panicked")]
    WorkerPanicked,
}
