//! Storage pools — append-only, size-capped, content-addressed chunk stores.
//!
//! # Directory layout
//!
//! ```text
//! <pool>/
//!   lock                 advisory exclusive lock, held while open
//!   metadata/
//!     props.txt          uuid / newfile / limit      (see pool::props)
//!     backups.txt        optional whitespace-separated top-level OIDs
//!   pool-data-0000.data  chunk frames, append-only
//!   pool-data-0000.idx   sorted index over that file (see crate::index)
//!   pool-data-0001.data
//!   ...
//! ```
//!
//! Data files grow monotonically and never exceed the configured `limit`;
//! a write that would overflow the head file rolls to a freshly numbered
//! one.  Only the highest-numbered file is ever open for writing, and only
//! while the pool is dirty — every other handle is read-only.  `flush`
//! publishes the head file's index atomically and returns the handle to
//! read-only mode, so a crash between chunk write and index save leaves
//! orphaned-but-recoverable frames, never a torn index.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::index::{FileIndex, IndexEntry};
use crate::oid::Oid;

pub mod lockfile;
pub mod props;

use lockfile::LockFile;
pub use props::{PoolProps, DEFAULT_LIMIT, LIMIT_LOWER_BOUND, LIMIT_UPPER_BOUND};

// ── Names ────────────────────────────────────────────────────────────────────

/// `pool-data-NNNN.<ext>` inside `base`.
pub(crate) fn construct_name(base: &Path, pos: u32, ext: &str) -> PathBuf {
    base.join(format!("pool-data-{pos:04}.{ext}"))
}

/// Decode a directory entry name of the form `pool-data-NNNN.data`.
fn decode_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("pool-data-")?.strip_suffix(".data")?;
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Positions of all data files in `base`, ascending.
pub(crate) fn scan_data_files(base: &Path) -> Result<Vec<u32>> {
    let mut known = Vec::new();
    for entry in fs::read_dir(base)? {
        let entry = entry?;
        if let Some(pos) = entry.file_name().to_str().and_then(decode_name) {
            known.push(pos);
        }
    }
    known.sort_unstable();
    Ok(known)
}

// ── Pool files ───────────────────────────────────────────────────────────────

/// One numbered data file with its index.  The handle switches between
/// read-only and append modes by close-and-reopen; it is never both.
struct PoolFile {
    pos:   u32,
    file:  File,
    index: FileIndex,
    size:  u32,
}

impl PoolFile {
    /// Open an existing data file read-only and load its sibling index.
    fn open(base: &Path, pos: u32) -> Result<PoolFile> {
        let file = File::open(construct_name(base, pos, "data"))?;
        let len = file.metadata()?.len();
        let size = u32::try_from(len).map_err(|_| {
            Error::PoolOpen(format!("data file {pos:04} is too large ({len} bytes)"))
        })?;

        let idx_name = construct_name(base, pos, "idx");
        let mut index = FileIndex::new();
        index.load(&idx_name, size).map_err(|e| match e {
            // A missing index is an index failure, not a plain IO error;
            // recover_index repairs it.
            Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                Error::Index(format!("{}: missing index file", idx_name.display()))
            }
            other => other,
        })?;

        Ok(PoolFile {
            pos,
            file,
            index,
            size,
        })
    }

    /// Create a fresh, empty data file opened for appending.
    fn create(base: &Path, pos: u32) -> Result<PoolFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(construct_name(base, pos, "data"))?;
        Ok(PoolFile {
            pos,
            file,
            index: FileIndex::new(),
            size: 0,
        })
    }

    /// Reopen the handle in read-write (append) mode.
    fn make_writable(&mut self, base: &Path) -> Result<()> {
        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(construct_name(base, self.pos, "data"))?;
        Ok(())
    }

    /// Reopen the handle read-only.
    fn unmake_writable(&mut self, base: &Path) -> Result<()> {
        self.file = File::open(construct_name(base, self.pos, "data"))?;
        Ok(())
    }
}

// ── Pool ─────────────────────────────────────────────────────────────────────

/// An open storage pool.
///
/// Dropping a pool flushes implicitly; flush errors at that point are logged
/// rather than raised.  Call [`Pool::flush`] explicitly where the outcome
/// matters.
pub struct Pool {
    base:     PathBuf,
    writable: bool,
    props:    PoolProps,

    /// `props.newfile`, consumed by the first write of this open.
    first_newfile: bool,

    /// All pool files, newest first; `files[0]` is the write head.
    files: Vec<PoolFile>,

    /// True while the head file is open for appending with unsaved index
    /// entries.
    dirty: bool,

    _lock: LockFile,
}

impl Pool {
    /// Open an existing pool read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Pool> {
        Pool::open_with(path.as_ref(), false)
    }

    /// Open an existing pool for writing.
    pub fn open_writable<P: AsRef<Path>>(path: P) -> Result<Pool> {
        Pool::open_with(path.as_ref(), true)
    }

    fn open_with(base: &Path, writable: bool) -> Result<Pool> {
        // The lock covers readers too: this engine supports exactly one
        // process per pool directory.
        let lock = LockFile::acquire(base)?;

        let props = PoolProps::read(&base.join("metadata").join("props.txt"))?;
        let first_newfile = props.newfile;

        let mut files = Vec::new();
        for pos in scan_data_files(base)? {
            // Newest first.
            files.insert(0, PoolFile::open(base, pos)?);
        }

        Ok(Pool {
            base: base.to_owned(),
            writable,
            props,
            first_newfile,
            files,
            dirty: false,
            _lock: lock,
        })
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn uuid(&self) -> &Uuid {
        &self.props.uuid
    }

    pub fn limit(&self) -> u32 {
        self.props.limit
    }

    /// The OIDs of the top-level backups recorded in this pool.
    pub fn get_backups(&self) -> Result<Vec<Oid>> {
        let path = self.base.join("metadata").join("backups.txt");
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        text.split_whitespace().map(Oid::from_hex).collect()
    }

    // ── Read path ────────────────────────────────────────────────────────────

    /// Retrieve the chunk with the given OID.
    ///
    /// Files are consulted newest-first, so a duplicate insert resolves to
    /// its most recent occurrence.
    pub fn find(&mut self, key: &Oid) -> Result<Chunk> {
        for file in &mut self.files {
            if let Some(entry) = file.index.find(key) {
                file.file.seek(SeekFrom::Start(entry.offset as u64))?;
                return Chunk::read(&mut file.file);
            }
        }
        Err(Error::MissingChunk(*key))
    }

    /// Whether the pool holds a chunk with this OID, without reading it.
    pub fn contains_key(&self, key: &Oid) -> bool {
        self.files.iter().any(|f| f.index.find(key).is_some())
    }

    // ── Write path ───────────────────────────────────────────────────────────

    /// Append a chunk and stage its index entry.
    ///
    /// Durability comes with the next [`Pool::flush`]: the chunk bytes reach
    /// the data file now, the index entry is published then.
    pub fn insert(&mut self, chunk: &Chunk) -> Result<()> {
        if !self.writable {
            return Err(Error::ReadOnlyPool);
        }
        let needed = chunk.write_size()?;
        self.prepare_write(needed)?;

        let head = &mut self.files[0];
        head.file.seek(SeekFrom::End(0))?;
        chunk.write(&mut head.file)?;
        head.index.insert(
            *chunk.oid(),
            IndexEntry {
                offset: head.size,
                kind:   chunk.kind(),
            },
        );
        head.size += needed;

        // The size bookkeeping and the stream must agree exactly; divergence
        // means the head file is corrupt.
        let actual = head.file.stream_position()?;
        if actual != head.size as u64 {
            return Err(Error::FilePositionMismatch {
                expected: head.size,
                actual,
            });
        }
        Ok(())
    }

    /// Ensure the head file is open for appending with room for `needed`
    /// bytes, rolling to a new file when the cap would be exceeded.
    fn prepare_write(&mut self, needed: u32) -> Result<()> {
        let overflows = |size: u32| size as u64 + needed as u64 > self.props.limit as u64;

        if !self.dirty {
            let roll = self.first_newfile
                || self.files.is_empty()
                || overflows(self.files[0].size);
            if roll {
                let pos = self.files.first().map_or(0, |f| f.pos + 1);
                self.files.insert(0, PoolFile::create(&self.base, pos)?);
            } else {
                self.files[0].make_writable(&self.base)?;
            }
            self.dirty = true;
            self.first_newfile = false;
        } else if overflows(self.files[0].size) {
            // Finalize the full head, then start its successor.
            self.flush()?;
            let pos = self.files[0].pos + 1;
            self.files.insert(0, PoolFile::create(&self.base, pos)?);
            self.dirty = true;
        }
        Ok(())
    }

    /// Publish the head file's staged index entries.
    ///
    /// The head handle returns to read-only mode, the index is saved and
    /// immediately reloaded, so subsequent lookups take the same path as for
    /// older files.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            let base = self.base.clone();
            let head = &mut self.files[0];
            head.unmake_writable(&base)?;

            let idx_name = construct_name(&base, head.pos, "idx");
            head.index.save(&idx_name, head.size)?;
            head.index.load(&idx_name, head.size)?;
            self.dirty = false;
        }
        Ok(())
    }

    // ── Creation ─────────────────────────────────────────────────────────────

    /// Create a new pool in an existing empty directory.
    pub fn create_pool<P: AsRef<Path>>(path: P, limit: u32, newfile: bool) -> Result<()> {
        let path = path.as_ref();
        props::check_limit(limit)?;

        if !path.is_dir() {
            return Err(Error::PoolOpen(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        if fs::read_dir(path)?.next().is_some() {
            return Err(Error::PoolOpen(format!(
                "{} is not empty",
                path.display()
            )));
        }

        let metadata = path.join("metadata");
        fs::create_dir(&metadata)?;
        PoolProps::fresh(limit, newfile).write(&metadata.join("props.txt"))?;
        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("flush on pool close failed: {e}");
        }
    }
}

/// Create a new pool with the default size limit.
pub fn create_pool<P: AsRef<Path>>(path: P) -> Result<()> {
    Pool::create_pool(path, DEFAULT_LIMIT, false)
}
