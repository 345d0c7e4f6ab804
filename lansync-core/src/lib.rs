//! lansync protocol core.
//! Host-driven: no sockets and no runtime; the host performs network I/O and passes listings in.
//! The directory scan and the content hasher are the only filesystem touch points.

pub mod chunk;
pub mod integrity;
pub mod ledger;
pub mod protocol;
pub mod reconcile;
pub mod record;
pub mod wire;

pub use chunk::{
    block_count, block_len, split_into_blocks, staging_name, BlockRange, TransferSession,
    DEFAULT_BLOCK_SIZE,
};
pub use ledger::SyncLedger;
pub use protocol::{PrepareReply, ProtocolError, Request, PRESENCE_BEACON, STAGING_PREFIX};
pub use reconcile::{plan, Action, Plan};
pub use record::{scan_directory, FileRecord, Listing};
pub use wire::{decode_listing, encode_listing, FrameDecodeError, FrameEncodeError};
