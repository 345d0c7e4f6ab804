//! Block arithmetic: split a file into fixed-size blocks, track an in-flight transfer, name staging files.

use std::path::PathBuf;

use crate::protocol::{STAGING_PREFIX, STAGING_TOKEN_LEN};

/// Default block size in bytes (1 MiB).
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// A block size of 0 means "use the default".
pub fn effective_block_size(block_size: u64) -> u64 {
    if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    }
}

/// Number of blocks for a file of `size` bytes: `ceil(size / block_size)`.
pub fn block_count(size: u64, block_size: u64) -> u64 {
    let bs = effective_block_size(block_size);
    size / bs + u64::from(size % bs != 0)
}

/// Byte offset of block `index`, or `None` if it does not fit in a u64.
pub fn block_offset(index: u64, block_size: u64) -> Option<u64> {
    index.checked_mul(effective_block_size(block_size))
}

/// Length of block `index` of a `size`-byte file. 0 past end of file.
pub fn block_len(size: u64, index: u64, block_size: u64) -> u64 {
    match block_offset(index, block_size) {
        Some(start) if start < size => (size - start).min(effective_block_size(block_size)),
        _ => 0,
    }
}

/// One block: index plus byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub index: u64,
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split a `total_len`-byte file into consecutive blocks. Empty for a zero-length file.
pub fn split_into_blocks(total_len: u64, block_size: u64) -> Vec<BlockRange> {
    let size = effective_block_size(block_size);
    let mut out = Vec::new();
    let mut start = 0u64;
    let mut index = 0u64;
    while start < total_len {
        let end = start.saturating_add(size).min(total_len);
        out.push(BlockRange { index, start, end });
        start = end;
        index += 1;
    }
    out
}

/// Staging name for `filename`: marker, short random token, then the final name.
pub fn staging_name(filename: &str) -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{STAGING_PREFIX}{}.{filename}",
        &token[..STAGING_TOKEN_LEN]
    )
}

/// Per-connection state of an in-flight receive into a staging file.
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub filename: String,
    pub expected_size: u64,
    pub bytes_transferred: u64,
    pub staging_path: PathBuf,
}

impl TransferSession {
    pub fn new(filename: impl Into<String>, expected_size: u64, staging_path: PathBuf) -> Self {
        Self {
            filename: filename.into(),
            expected_size,
            bytes_transferred: 0,
            staging_path,
        }
    }

    /// Bytes still owed by the sender.
    pub fn remaining(&self) -> u64 {
        self.expected_size.saturating_sub(self.bytes_transferred)
    }

    /// Record `n` received bytes. Returns true once the full size has arrived.
    pub fn record(&mut self, n: u64) -> bool {
        self.bytes_transferred = self.bytes_transferred.saturating_add(n);
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred == self.expected_size
    }

    /// Ok only if exactly `expected_size` bytes were received.
    pub fn verify(&self) -> Result<(), SizeMismatch> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(SizeMismatch {
                expected: self.expected_size,
                received: self.bytes_transferred,
            })
        }
    }
}

/// Transfer ended with a byte count other than the announced size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} bytes, received {received}")]
pub struct SizeMismatch {
    pub expected: u64,
    pub received: u64,
}
