//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Read past the end of a track's byte region.
    #[error("read past end of byte region at offset {0}")]
    EndOfRegion(u64),

    /// Variable-length quantity longer than the 4-byte SMF bound.
    #[error("variable-length quantity exceeds 4 bytes")]
    VlqTooLong,

    /// Data byte seen where a status byte was required and no status has been
    /// remembered yet.
    #[error("running status byte {0:#04x} with no prior status")]
    OrphanRunningStatus(u8),

    /// Malformed header chunk.
    #[error("invalid MIDI header: {0}")]
    InvalidHeader(&'static str),

    /// Format word outside 0-2.
    #[error("unsupported SMF format {0}")]
    UnsupportedFormat(u16),

    /// The background prefetch worker is gone.
    #[error("prefetch worker disconnected")]
    PrefetchGone,
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
