//! The pool properties file, `<pool>/metadata/props.txt`.
//!
//! Line-oriented `key=value` with `#` comments and blank lines.  Recognized
//! keys:
//!
//! | Key       | Meaning                                    | Default      |
//! |-----------|--------------------------------------------|--------------|
//! | `uuid`    | RFC-4122 pool identity (required)          | —            |
//! | `newfile` | start a fresh data file on every open      | `false`      |
//! | `limit`   | data-file size cap in bytes, `[2^20, 2^30)`| `670040064`  |
//!
//! Unknown keys are ignored so newer tools can annotate older pools.

use std::fs;
use std::path::Path;

use uuid::Uuid;

use crate::error::{Error, Result};

/// Default data-file size cap: 640 MB, sized so a file fits on a CD and
/// seven fit on a DVD.
pub const DEFAULT_LIMIT: u32 = 670_040_064;

/// Smallest permitted `limit` (1 MiB).
pub const LIMIT_LOWER_BOUND: u32 = 1 << 20;

/// One past the largest permitted `limit` (1 GiB, exclusive).
pub const LIMIT_UPPER_BOUND: u32 = 1 << 30;

/// Parsed pool properties.
#[derive(Debug, Clone)]
pub struct PoolProps {
    pub uuid:    Uuid,
    pub newfile: bool,
    pub limit:   u32,
}

impl PoolProps {
    /// Properties for a newly created pool, with a fresh v4 UUID.
    pub fn fresh(limit: u32, newfile: bool) -> PoolProps {
        PoolProps {
            uuid: Uuid::new_v4(),
            newfile,
            limit,
        }
    }

    /// Read and validate a properties file.
    pub fn read(path: &Path) -> Result<PoolProps> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::PoolOpen(format!("reading {}: {e}", path.display())))?;

        let mut uuid = None;
        let mut newfile = false;
        let mut limit = DEFAULT_LIMIT;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::PoolOpen(format!("{}: malformed line {line:?}", path.display()))
            })?;
            match (key.trim(), value.trim()) {
                ("uuid", v) => {
                    uuid = Some(Uuid::parse_str(v).map_err(|e| {
                        Error::PoolOpen(format!("{}: bad uuid: {e}", path.display()))
                    })?);
                }
                ("newfile", v) => {
                    newfile = match v {
                        "true" => true,
                        "false" => false,
                        other => {
                            return Err(Error::PoolOpen(format!(
                                "{}: bad newfile value {other:?}",
                                path.display()
                            )))
                        }
                    };
                }
                ("limit", v) => {
                    limit = v.parse().map_err(|e| {
                        Error::PoolOpen(format!("{}: bad limit: {e}", path.display()))
                    })?;
                }
                _ => {} // ignore unknown keys
            }
        }

        let uuid = uuid.ok_or_else(|| {
            Error::PoolOpen(format!("{}: missing required uuid", path.display()))
        })?;
        check_limit(limit)?;

        Ok(PoolProps {
            uuid,
            newfile,
            limit,
        })
    }

    /// Write the properties file (used by pool creation).
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = format!(
            "# Pool metadata properties\n\
             uuid={}\n\
             newfile={}\n\
             limit={}\n",
            self.uuid.hyphenated(),
            self.newfile,
            self.limit
        );
        fs::write(path, text)?;
        Ok(())
    }
}

/// Validate the `[2^20, 2^30)` limit range.
pub fn check_limit(limit: u32) -> Result<()> {
    if !(LIMIT_LOWER_BOUND..LIMIT_UPPER_BOUND).contains(&limit) {
        return Err(Error::PoolOpen(format!(
            "limit {limit} outside [{LIMIT_LOWER_BOUND}, {LIMIT_UPPER_BOUND})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("props.txt");

        let props = PoolProps::fresh(DEFAULT_LIMIT, true);
        props.write(&path).unwrap();

        let back = PoolProps::read(&path).unwrap();
        assert_eq!(back.uuid, props.uuid);
        assert!(back.newfile);
        assert_eq!(back.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn comments_defaults_and_unknown_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("props.txt");
        fs::write(
            &path,
            "# a comment\n\
             \n\
             uuid=c06b0ded-6194-4ccb-a0ae-4a4bdafedfcb\n\
             somefuturekey=whatever\n",
        )
        .unwrap();

        let props = PoolProps::read(&path).unwrap();
        assert!(!props.newfile);
        assert_eq!(props.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn missing_uuid_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("props.txt");
        fs::write(&path, "newfile=false\n").unwrap();
        assert!(matches!(PoolProps::read(&path), Err(Error::PoolOpen(_))));
    }

    #[test]
    fn limit_range_enforced() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("props.txt");
        fs::write(
            &path,
            "uuid=c06b0ded-6194-4ccb-a0ae-4a4bdafedfcb\nlimit=1024\n",
        )
        .unwrap();
        assert!(matches!(PoolProps::read(&path), Err(Error::PoolOpen(_))));

        assert!(check_limit(LIMIT_LOWER_BOUND).is_ok());
        assert!(check_limit(LIMIT_UPPER_BOUND).is_err());
        assert!(check_limit(LIMIT_UPPER_BOUND - 1).is_ok());
    }
}
