//! Index recovery — rebuild `.idx` files by scanning `.data` frames.
//!
//! A pool whose index files are missing, stale, or unreadable refuses to
//! open.  Every frame in a data file is self-describing, so the index is
//! fully reconstructible: walk the file header by header, accumulate
//! OID → (offset, kind), and save a fresh index recording the file's exact
//! byte length.
//!
//! Recovery takes the pool lock and must be the only code touching the
//! directory.  It never rewrites data files; a torn or unrecognizable frame
//! aborts with [`Error::CorruptChunk`] rather than silently dropping the
//! tail.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::chunk::{Chunk, HEADER_SIZE};
use crate::error::{Error, Result};
use crate::index::{FileIndex, IndexEntry};
use crate::pool::lockfile::LockFile;
use crate::pool::{construct_name, scan_data_files};

/// Rebuild every index file in the pool at `path`.
pub fn recover_index<P: AsRef<Path>>(path: P) -> Result<()> {
    let base = path.as_ref();
    let _lock = LockFile::acquire(base)?;

    for pos in scan_data_files(base)? {
        let data_name = construct_name(base, pos, "data");
        let idx_name = construct_name(base, pos, "idx");

        let file = File::open(&data_name)?;
        let len = file.metadata()?.len();
        let size = u32::try_from(len).map_err(|_| {
            Error::PoolOpen(format!("data file {pos:04} is too large ({len} bytes)"))
        })?;

        let index = scan_frames(BufReader::new(file), size, &data_name)?;
        let entries = index.staged_len();
        index.save(&idx_name, size)?;
        log::info!(
            "recovered {} ({entries} chunks, {size} bytes)",
            idx_name.display()
        );
    }
    Ok(())
}

/// Walk `size` bytes of chunk frames, collecting an index.
fn scan_frames<R: Read>(mut r: R, size: u32, name: &Path) -> Result<FileIndex> {
    let mut index = FileIndex::new();
    let mut offset = 0u32;

    while offset < size {
        if size - offset < HEADER_SIZE as u32 {
            return Err(Error::CorruptChunk(format!(
                "{}: truncated frame header at offset {offset}",
                name.display()
            )));
        }
        let info = Chunk::read_header(&mut r)?.ok_or_else(|| {
            Error::CorruptChunk(format!(
                "{}: bad frame magic at offset {offset}",
                name.display()
            ))
        })?;
        if size - offset < info.stored_size {
            return Err(Error::CorruptChunk(format!(
                "{}: frame at offset {offset} runs past end of file",
                name.display()
            )));
        }

        index.insert(
            info.oid,
            IndexEntry {
                offset,
                kind: info.kind,
            },
        );
        log::debug!("frame {} {} at {offset}", info.kind, info.oid);

        // Skip payload and padding to the next header.
        let body = (info.stored_size - HEADER_SIZE as u32) as u64;
        io::copy(&mut (&mut r).take(body), &mut io::sink())?;
        offset += info.stored_size;
    }

    Ok(index)
}
