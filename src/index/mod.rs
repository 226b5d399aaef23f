//! File indexes — the OID → (offset, kind) mapping beside each data file.
//!
//! A [`FileIndex`] has two layers: a mutable in-memory staging map holding
//! inserts since the last save, and an immutable snapshot loaded from disk.
//! Lookups consult the staging map first.  [`FileIndex::save`] serializes the
//! sorted union of both layers and publishes it atomically; [`FileIndex::load`]
//! replaces the snapshot and drops the staging map, so every lookup after a
//! save/load round trip goes through the same search path as older files.
//!
//! # On-disk layout (all integers little-endian; N entries, K kinds)
//!
//! ```text
//! Offset            Size   Field
//! 0                    8   magic      = "ldumpidx"
//! 8                    4   version    = 4                      (LE u32)
//! 12                   4   file_size  of the described .data   (LE u32)
//! 16               256×4   tops       cumulative counts by first hash byte
//! 16+1024           N×20   hashes     OIDs in ascending order
//! 16+1024+20N        N×4   offsets    (LE u32 each)
//! 16+1024+24N          4   kind_count = K                      (LE u32)
//! +4                 K×4   kind_map   the K distinct kind tags
//! +4+4K              N×1   kind_index per-entry index into kind_map
//! ```
//!
//! `tops[b]` counts entries whose first hash byte is ≤ b, so the entries
//! starting with exactly `b` occupy `[tops[b-1], tops[b])` (`tops[-1]` is 0).
//! Lookups binary-search only that bucket.
//!
//! The recorded `file_size` ties an index to one exact state of its data
//! file; a mismatch on load means the index is stale and must be rebuilt.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::kind::Kind;
use crate::oid::{Oid, OID_LEN};

/// On-disk magic for index files.
pub const INDEX_MAGIC: &[u8; 8] = b"ldumpidx";

/// Current index layout version.
pub const INDEX_VERSION: u32 = 4;

/// What an index maps each OID to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte position of the chunk's frame header in the data file.
    pub offset: u32,
    pub kind:   Kind,
}

// ── Loaded snapshot ──────────────────────────────────────────────────────────

/// The parsed contents of one `.idx` file.  Read-only once loaded.
struct FileData {
    tops:       Box<[u32; 256]>,
    hashes:     Vec<Oid>,
    offsets:    Vec<u32>,
    kind_map:   Vec<Kind>,
    kind_index: Vec<u8>,
}

impl FileData {
    /// Bucketed binary search.  `high` is signed so the `mid = 0, high = -1`
    /// termination falls out cleanly.
    fn find(&self, key: &Oid) -> Option<IndexEntry> {
        let first = key.peek_first() as usize;
        let mut low: i64 = if first == 0 {
            0
        } else {
            self.tops[first - 1] as i64
        };
        let mut high: i64 = self.tops[first] as i64 - 1;

        while high >= low {
            let mid = low + (high - low) / 2;
            match key.cmp(&self.hashes[mid as usize]) {
                std::cmp::Ordering::Less => high = mid - 1,
                std::cmp::Ordering::Greater => low = mid + 1,
                std::cmp::Ordering::Equal => {
                    return Some(IndexEntry {
                        offset: self.offsets[mid as usize],
                        kind:   self.kind_map[self.kind_index[mid as usize] as usize],
                    })
                }
            }
        }
        None
    }
}

// ── FileIndex ────────────────────────────────────────────────────────────────

/// Staging map + loaded snapshot for a single data file.
#[derive(Default)]
pub struct FileIndex {
    ram:    HashMap<Oid, IndexEntry>,
    loaded: Option<FileData>,
}

impl FileIndex {
    pub fn new() -> FileIndex {
        FileIndex::default()
    }

    /// Stage an entry.  It becomes durable on the next [`FileIndex::save`].
    pub fn insert(&mut self, oid: Oid, entry: IndexEntry) {
        self.ram.insert(oid, entry);
    }

    /// Look up a key: staging map first, then the loaded snapshot.
    pub fn find(&self, key: &Oid) -> Option<IndexEntry> {
        if let Some(entry) = self.ram.get(key) {
            return Some(*entry);
        }
        self.loaded.as_ref().and_then(|data| data.find(key))
    }

    /// Number of staged (not yet saved) entries.
    pub fn staged_len(&self) -> usize {
        self.ram.len()
    }

    /// All keys of both layers, ascending.  The staging map wins duplicates.
    fn sorted_keys(&self) -> Vec<Oid> {
        let mut keys: Vec<Oid> = self.ram.keys().copied().collect();
        if let Some(data) = &self.loaded {
            keys.extend(data.hashes.iter().copied());
        }
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Iterate the union of both layers in ascending OID order.
    ///
    /// Building the key list is O(N log N); used by the saver and by tools,
    /// never on the lookup path.
    pub fn sorted_iter(&self) -> SortedIter<'_> {
        SortedIter {
            index: self,
            keys:  self.sorted_keys().into_iter(),
        }
    }

    // ── Save ─────────────────────────────────────────────────────────────────

    /// Serialize the merged index for a data file currently `file_size`
    /// bytes long, writing to `<name>.tmp` and renaming atomically.
    pub fn save(&self, name: &Path, file_size: u32) -> Result<()> {
        let entries: Vec<(Oid, IndexEntry)> = self.sorted_iter().collect();

        // Cumulative first-byte counts.
        let mut counts = [0u32; 256];
        for (oid, _) in &entries {
            counts[oid.peek_first() as usize] += 1;
        }
        let mut tops = [0u32; 256];
        let mut acc = 0u32;
        for (b, count) in counts.iter().enumerate() {
            acc += count;
            tops[b] = acc;
        }

        // Distinct kinds, sorted by value, each assigned a stable byte index.
        let kind_set: BTreeSet<Kind> = entries.iter().map(|(_, e)| e.kind).collect();
        let kind_map: Vec<Kind> = kind_set.into_iter().collect();
        if kind_map.len() > 256 {
            return Err(Error::Index(format!(
                "{} distinct kinds exceed the 256 the format can record",
                kind_map.len()
            )));
        }
        let kind_slot = |kind: Kind| -> u8 {
            kind_map.binary_search(&kind).expect("kind collected above") as u8
        };

        let tmp = tmp_name(name);
        {
            let mut w = BufWriter::new(File::create(&tmp)?);

            w.write_all(INDEX_MAGIC)?;
            w.write_u32::<LittleEndian>(INDEX_VERSION)?;
            w.write_u32::<LittleEndian>(file_size)?;
            for top in &tops {
                w.write_u32::<LittleEndian>(*top)?;
            }
            for (oid, _) in &entries {
                w.write_all(&oid.0)?;
            }
            for (_, entry) in &entries {
                w.write_u32::<LittleEndian>(entry.offset)?;
            }
            w.write_u32::<LittleEndian>(kind_map.len() as u32)?;
            for kind in &kind_map {
                w.write_all(&kind.bytes())?;
            }
            for (_, entry) in &entries {
                w.write_all(&[kind_slot(entry.kind)])?;
            }
            w.flush()?;
        }

        // Atomic publication: readers see the old index or the new one,
        // never a torn write.
        fs::rename(&tmp, name)
            .map_err(|e| Error::Index(format!("renaming {} failed: {e}", tmp.display())))?;
        Ok(())
    }

    // ── Load ─────────────────────────────────────────────────────────────────

    /// Replace the snapshot with the contents of `name`, dropping the staging
    /// map.  `file_size` must match the recorded value or the index is stale.
    pub fn load(&mut self, name: &Path, file_size: u32) -> Result<()> {
        let mut r = BufReader::new(File::open(name)?);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != INDEX_MAGIC {
            return Err(Error::Index(format!("{}: bad magic", name.display())));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(Error::Index(format!(
                "{}: version {version}, expected {INDEX_VERSION}",
                name.display()
            )));
        }
        let recorded = r.read_u32::<LittleEndian>()?;
        if recorded != file_size {
            return Err(Error::IndexStale {
                name:     name.display().to_string(),
                expected: file_size,
                recorded,
            });
        }

        let mut tops = Box::new([0u32; 256]);
        r.read_u32_into::<LittleEndian>(&mut tops[..])?;
        let n = tops[255] as usize;

        let mut raw_hashes = vec![0u8; n * OID_LEN];
        r.read_exact(&mut raw_hashes)?;
        let hashes: Vec<Oid> = raw_hashes
            .chunks_exact(OID_LEN)
            .map(|bytes| Oid(bytes.try_into().unwrap()))
            .collect();

        let mut offsets = vec![0u32; n];
        r.read_u32_into::<LittleEndian>(&mut offsets)?;

        let kind_count = r.read_u32::<LittleEndian>()? as usize;
        if kind_count > 256 {
            return Err(Error::Index(format!(
                "{}: kind_count {kind_count} out of range",
                name.display()
            )));
        }
        let mut kind_map = Vec::with_capacity(kind_count);
        for _ in 0..kind_count {
            let mut raw = [0u8; 4];
            r.read_exact(&mut raw)?;
            kind_map.push(Kind::from_bytes(raw));
        }

        let mut kind_index = vec![0u8; n];
        r.read_exact(&mut kind_index)?;
        if kind_index.iter().any(|&slot| slot as usize >= kind_count) {
            return Err(Error::Index(format!(
                "{}: kind index out of range",
                name.display()
            )));
        }

        self.loaded = Some(FileData {
            tops,
            hashes,
            offsets,
            kind_map,
            kind_index,
        });
        self.ram.clear();
        Ok(())
    }
}

fn tmp_name(name: &Path) -> PathBuf {
    let mut os = name.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

// ── Sorted iteration ─────────────────────────────────────────────────────────

/// Yields `(Oid, IndexEntry)` in ascending OID order over both layers.
pub struct SortedIter<'a> {
    index: &'a FileIndex,
    keys:  std::vec::IntoIter<Oid>,
}

impl Iterator for SortedIter<'_> {
    type Item = (Oid, IndexEntry);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.keys.next()?;
        let entry = self
            .index
            .find(&key)
            .expect("key taken from one of the layers");
        Some((key, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::int_oid;
    use std::collections::BTreeSet as Set;
    use tempfile::TempDir;

    // Scramble the sequence number so kinds distribute unevenly.
    fn scramble(mut x: u32) -> u32 {
        x = ((x >> 16) ^ x).wrapping_mul(0x45d9_f3b);
        x = ((x >> 16) ^ x).wrapping_mul(0x45d9_f3b);
        (x >> 16) ^ x
    }

    const KIND_TABLE: &[&str] = &[
        "blob", "dir ", "dir1", "dir2", "dir3", "ind0", "ind1", "ind2", "back",
    ];

    fn kind_of(sequence: u32) -> Kind {
        Kind::new(KIND_TABLE[(scramble(sequence) as usize) % KIND_TABLE.len()]).unwrap()
    }

    struct Tracker {
        inserted: Set<u32>,
        index:    FileIndex,
    }

    impl Tracker {
        fn new() -> Tracker {
            Tracker {
                inserted: Set::new(),
                index:    FileIndex::new(),
            }
        }

        fn add_range(&mut self, lower: u32, upper: u32) {
            for item in lower..upper {
                self.inserted.insert(item);
                self.index.insert(
                    int_oid(item),
                    IndexEntry {
                        offset: item,
                        kind:   kind_of(item),
                    },
                );
            }
        }

        fn check_one(&self, item: u32) {
            let good = int_oid(item);
            let entry = self.index.find(&good).expect("inserted key must resolve");
            assert_eq!(entry.offset, item);
            assert_eq!(entry.kind, kind_of(item));

            // Adjacent OIDs must not resolve.
            let mut up = good;
            up.inc();
            assert_eq!(self.index.find(&up), None);
            let mut down = good;
            down.dec();
            assert_eq!(self.index.find(&down), None);
        }

        fn check_all(&self) {
            for item in &self.inserted {
                self.check_one(*item);
            }
        }

        fn check_iter(&self) {
            let mut remaining = self.inserted.clone();
            let mut last = Oid::zero();
            for (oid, entry) in self.index.sorted_iter() {
                assert!(oid > last, "iteration must ascend");
                last = oid;
                assert_eq!(oid, int_oid(entry.offset));
                assert_eq!(entry.kind, kind_of(entry.offset));
                assert!(remaining.remove(&entry.offset), "unexpected key");
            }
            assert!(remaining.is_empty(), "iteration missed keys");
        }
    }

    const COUNT: u32 = 1000;

    #[test]
    fn insert_find_save_load() {
        let tmp = TempDir::new().unwrap();
        let name1 = tmp.path().join("sample.idx");
        let name2 = tmp.path().join("sample2.idx");

        let mut tracker = Tracker::new();
        tracker.add_range(0, COUNT);
        tracker.check_all();
        tracker.check_iter();

        // Save, reload, and expect identical find results.
        tracker.index.save(&name1, COUNT).unwrap();
        tracker.index.load(&name1, COUNT).unwrap();
        assert_eq!(tracker.index.staged_len(), 0);
        tracker.check_all();
        tracker.check_iter();

        // Stage more on top of the snapshot; the union must stay coherent.
        tracker.add_range(COUNT, COUNT * 2);
        tracker.check_all();
        tracker.check_iter();

        // Save merges staging + snapshot.
        tracker.index.save(&name2, COUNT * 2).unwrap();
        tracker.index.load(&name2, COUNT * 2).unwrap();
        tracker.check_all();
        tracker.check_iter();
    }

    #[test]
    fn stale_index_rejected() {
        let tmp = TempDir::new().unwrap();
        let name = tmp.path().join("stale.idx");

        let mut tracker = Tracker::new();
        tracker.add_range(0, 10);
        tracker.index.save(&name, 4096).unwrap();

        let mut index = FileIndex::new();
        assert!(matches!(
            index.load(&name, 8192),
            Err(Error::IndexStale { recorded: 4096, .. })
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let tmp = TempDir::new().unwrap();
        let name = tmp.path().join("garbage.idx");
        fs::write(&name, b"not an index file at all").unwrap();

        let mut index = FileIndex::new();
        assert!(matches!(index.load(&name, 0), Err(Error::Index(_))));
    }

    #[test]
    fn empty_index_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let name = tmp.path().join("empty.idx");

        let index = FileIndex::new();
        index.save(&name, 0).unwrap();

        let mut back = FileIndex::new();
        back.load(&name, 0).unwrap();
        assert_eq!(back.find(&int_oid(0)), None);
        assert_eq!(back.sorted_iter().count(), 0);
    }
}
