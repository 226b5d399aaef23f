//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the crate returns [`Result`].  The variants
//! mirror the failure classes of the storage engine rather than the call
//! sites that produce them: a bad `.idx` file raises the same [`Error::Index`]
//! whether it is noticed while opening a pool or while reloading after a
//! flush.
//!
//! Pruning a traversal is NOT an error — visitors return
//! [`Visit::Prune`](crate::walk::Visit) and the walker checks the variant.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::kind::Kind;
use crate::oid::Oid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Kind strings must be exactly four bytes.
    #[error("invalid kind {0:?} (must be exactly 4 characters)")]
    InvalidKind(String),

    /// OID text form must be 40 lowercase hex characters.
    #[error("invalid OID {0:?} (must be a 40-character hex string)")]
    InvalidOid(String),

    /// Another process holds the advisory lock on this pool.
    #[error("pool {0} is locked by another process")]
    PoolLocked(PathBuf),

    /// Missing or malformed pool metadata.
    #[error("unable to open pool: {0}")]
    PoolOpen(String),

    /// The `.idx` file describes a different `.data` size than observed.
    /// `recover_index` rebuilds the index from the data file.
    #[error("stale index {name}: data file is {expected} bytes, index recorded {recorded}")]
    IndexStale {
        name:     String,
        expected: u32,
        recorded: u32,
    },

    /// Wrong magic or version in an index file, or a failed index write.
    #[error("bad index file: {0}")]
    Index(String),

    /// zlib failed for a reason other than "output would not fit".
    #[error("compression failed: {0}")]
    Compression(String),

    /// Bad chunk magic, or decompression did not yield the declared length.
    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),

    /// The OID is not present in any file of the pool.
    #[error("chunk {0} missing from pool")]
    MissingChunk(Oid),

    /// The traversal has no handler registered for this chunk kind.
    #[error("unsupported chunk kind {0}")]
    UnsupportedKind(Kind),

    /// `insert` on a pool opened read-only.
    #[error("pool is not writable")]
    ReadOnlyPool,

    /// The write-size bookkeeping diverged from the actual stream position.
    /// Fatal: indicates corruption of the head data file.
    #[error("file position mismatch after write: expected {expected}, stream at {actual}")]
    FilePositionMismatch { expected: u32, actual: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
