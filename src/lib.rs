//! # apool — content-addressed backup chunk pool
//!
//! Format guarantees (frozen in adump-pool v1.1 / index v4):
//! - All on-disk integers are little-endian; raw byte blobs (OIDs, kinds)
//!   are never swapped
//! - Every chunk frame is self-describing: magic, sizes, kind, OID — the
//!   index is fully reconstructible by scanning frames
//! - A chunk's OID is SHA-1(kind ∥ payload); identical content always has
//!   identical identity
//! - Chunk frames pad to 16 bytes; payloads deflate only when it wins
//! - Index files record the exact data-file size they describe; a mismatch
//!   means stale, and stale indexes are rebuilt, never trusted
//! - Index publication is atomic (write to `.tmp`, rename): a batch of
//!   inserts becomes durable together or not at all
//! - One process per pool directory, enforced by an advisory exclusive lock

pub mod chunk;
pub mod error;
pub mod index;
pub mod kind;
pub mod oid;
pub mod pdump;
pub mod pool;
pub mod recovery;
pub mod testutil;
pub mod walk;

// Flat re-exports for the most common types.
pub use chunk::{Chunk, HeaderInfo};
pub use error::{Error, Result};
pub use index::{FileIndex, IndexEntry};
pub use kind::Kind;
pub use oid::Oid;
pub use pool::{create_pool, Pool, PoolProps, DEFAULT_LIMIT};
pub use recovery::recover_index;
pub use walk::{BackupVisitor, BackupWalk, PropertyMap, Visit};
