//! Bootstrap error types.

use vireo_image::{LoadError, SymbolNotFound};

use crate::engine::EngineError;

/// Decompression failure. Non-retryable: no compressed region becomes
/// valid by trying again.
#[derive(Debug, thiserror::Error)]
pub enum DecompressError {
    /// The stream is corrupt or truncated
    #[error("corrupt compressed stream: {0}")]
    Corrupt(String),

    /// Output exceeded the caller's size bound
    #[error("decompressed output exceeds {limit} byte bound")]
    TooLarge {
        /// Allocation bound the caller supplied
        limit: usize,
    },
}

/// Malformed payload or module-table wire data.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    /// Slot too small to carry the 4-byte size header
    #[error("payload slot is too small for a size header")]
    TruncatedHeader,

    /// Declared body length exceeds the slot
    #[error("declared payload size {declared} exceeds slot capacity {capacity}")]
    Oversized {
        /// Length the header declares
        declared: usize,
        /// Bytes actually available after the header
        capacity: usize,
    },

    /// Module table does not start with the expected magic
    #[error("bad module table magic")]
    BadMagic,

    /// Module table checksum does not match its body
    #[error("module table checksum mismatch")]
    ChecksumMismatch,

    /// Module table or payload body ends mid-record
    #[error("payload body is truncated")]
    Truncated,

    /// A module path is not valid UTF-8
    #[error("module path is not valid UTF-8")]
    BadPath,

    /// The distinguished entry unit is not in the bundle
    #[error("entry unit '{0}' missing from bundle")]
    MissingEntryUnit(String),

    /// The entry unit is too short to carry its header
    #[error("entry unit is too short to carry a header")]
    ShortEntryUnit,
}

/// Fatal bootstrap failure.
///
/// Everything before the payload is handed to the engine is fail-fast:
/// any of these aborts the bootstrap with no partial state left live.
/// Payload evaluation and dispatch failures are *not* represented here;
/// they are reported through the engine's own error channel and
/// swallowed.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    /// A compressed region could not be decompressed
    #[error(transparent)]
    Decompress(#[from] DecompressError),

    /// Payload wire data is malformed
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// A native component image could not be mapped
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A required engine entry point is missing
    #[error(transparent)]
    Symbol(#[from] SymbolNotFound),

    /// No component in the table is flagged as the engine
    #[error("no native component is flagged as the engine")]
    EngineNotFound,

    /// More than one component is flagged as the engine
    #[error("multiple native components are flagged as the engine")]
    DuplicateEngine,

    /// The engine failed during a fail-fast stage
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}
