//! Error taxonomy for synchronization work. No variant is fatal to the process.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use lansync_core::chunk::SizeMismatch;
use lansync_core::{FrameDecodeError, FrameEncodeError, ProtocolError};

pub type Result<T> = std::result::Result<T, SyncError>;

/// Broad class of a [`SyncError`], as used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Network,
    Protocol,
    Filesystem,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Connect refused/reset or timeout.
    #[error("network error with {peer}: {source}")]
    Network {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("malformed listing: {0}")]
    Listing(#[from] FrameDecodeError),
    #[error("cannot encode listing: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("{filename}: {mismatch}")]
    SizeMismatch {
        filename: String,
        mismatch: SizeMismatch,
    },
    #[error("{filename}: block {index} returned {received} bytes, expected {expected}")]
    ShortBlock {
        filename: String,
        index: u64,
        expected: u64,
        received: u64,
    },
    #[error("{filename}: content hash {actual} does not match advertised {expected}")]
    HashMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    #[error("peer refused {filename}: {reason}")]
    Refused { filename: String, reason: String },
    /// Local I/O on the shared directory.
    #[error("filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    /// Map an I/O error on a connection with `peer`.
    pub fn network(peer: SocketAddr) -> impl Fn(io::Error) -> SyncError + Copy {
        move |source| SyncError::Network { peer, source }
    }

    /// Map an I/O error on `path`.
    pub fn filesystem(path: &Path) -> impl Fn(io::Error) -> SyncError + Copy + '_ {
        move |source| SyncError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Network { .. } => ErrorClass::Network,
            SyncError::Filesystem { .. } => ErrorClass::Filesystem,
            SyncError::Protocol(_)
            | SyncError::Listing(_)
            | SyncError::Encode(_)
            | SyncError::SizeMismatch { .. }
            | SyncError::ShortBlock { .. }
            | SyncError::HashMismatch { .. }
            | SyncError::Refused { .. } => ErrorClass::Protocol,
        }
    }

    /// True for a local file that no longer exists.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, SyncError::Filesystem { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
