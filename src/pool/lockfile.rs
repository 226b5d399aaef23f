//! Advisory locking for pool directories.
//!
//! The lock file `<pool>/lock` is held with an exclusive advisory lock for
//! the pool's entire open lifetime, enforcing the single-writer discipline
//! across processes.  The file itself carries no data.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::{Error, Result};

/// Name of the lock file inside a pool directory.
pub const LOCK_NAME: &str = "lock";

/// An acquired exclusive lock, released on drop.
pub struct LockFile {
    file: File,
}

impl LockFile {
    /// Create (if needed) and exclusively lock `<pool_dir>/lock`.
    ///
    /// Fails fast with [`Error::PoolLocked`] when another process holds the
    /// lock; there is no blocking wait.
    pub fn acquire(pool_dir: &Path) -> Result<LockFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(pool_dir.join(LOCK_NAME))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(LockFile { file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(Error::PoolLocked(pool_dir.to_owned()))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            log::warn!("unable to release pool lock: {e}");
        }
    }
}
