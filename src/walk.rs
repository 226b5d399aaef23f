//! Backup traversal — a kind-dispatched visitor over typed chunks.
//!
//! A [`BackupWalk`] resolves a root OID in a pool, dispatches on the chunk's
//! kind through a handler registry, and recurses into children.  Visitors
//! control descent by returning [`Visit::Descend`] or [`Visit::Prune`];
//! pruning skips the current subtree without ending the walk.  The walker
//! maintains the stack of OIDs from the traversal root to the node being
//! visited and hands it to every callback.
//!
//! The only built-in handler is for `"back"` chunks, whose payload is a
//! property record:
//!
//! ```text
//! u8 len, len bytes            record type string
//! repeated until end:
//!   u8  klen, klen bytes       key
//!   u16 vlen (big-endian), vlen bytes   value
//! ```
//!
//! Reserved keys: `_date` (decimal signed 64-bit Unix seconds) and `hash`
//! (40-hex OID of the child root).  Everything else is passed through to the
//! visitor as string properties.

use std::collections::{BTreeMap, HashMap};

use crate::chunk::Chunk;
use crate::error::{Error, Result};
use crate::kind::Kind;
use crate::oid::Oid;
use crate::pool::Pool;

/// Properties of a backup node, keyed by name.
pub type PropertyMap = BTreeMap<String, String>;

/// Visitor verdict for the node just delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Continue into the node's children.
    Descend,
    /// Skip this subtree; the walk itself continues.
    Prune,
}

/// Callbacks invoked as the tree is traversed.
///
/// `path` is the stack of OIDs from the walk root to the current node, most
/// recent last; `path.last()` is the OID of the chunk being visited.
pub trait BackupVisitor {
    /// A top-level backup node: `root` is the child tree to descend into.
    fn backup(
        &mut self,
        path: &[Oid],
        root: &Oid,
        date: i64,
        props: &PropertyMap,
    ) -> Result<Visit> {
        let _ = (path, root, date, props);
        Ok(Visit::Descend)
    }
}

/// A handler interprets one chunk kind and drives any further descent.
pub type Handler = fn(&mut BackupWalk<'_>, &Chunk, &mut dyn BackupVisitor) -> Result<()>;

/// Walks backups in a pool.
pub struct BackupWalk<'p> {
    pool:     &'p mut Pool,
    handlers: HashMap<Kind, Handler>,
    oids:     Vec<Oid>,
}

impl<'p> BackupWalk<'p> {
    pub fn new(pool: &'p mut Pool) -> BackupWalk<'p> {
        let mut handlers: HashMap<Kind, Handler> = HashMap::new();
        handlers.insert(Kind::new("back").unwrap(), walk_back);
        BackupWalk {
            pool,
            handlers,
            oids: Vec::new(),
        }
    }

    /// Register a handler for an additional chunk kind.
    pub fn register(&mut self, kind: Kind, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    /// Walk the tree rooted at `root`, invoking the visitor per node.
    pub fn walk(&mut self, visitor: &mut dyn BackupVisitor, root: &Oid) -> Result<()> {
        let chunk = self.pool.find(root)?;
        let handler = match self.handlers.get(&chunk.kind()) {
            Some(handler) => *handler,
            None => return Err(Error::UnsupportedKind(chunk.kind())),
        };

        self.oids.push(*root);
        let result = handler(self, &chunk, visitor);
        self.oids.pop();
        result
    }
}

/// Handler for `"back"` chunks.
fn walk_back(
    walk: &mut BackupWalk<'_>,
    chunk: &Chunk,
    visitor: &mut dyn BackupVisitor,
) -> Result<()> {
    let node = BackNode::decode(chunk.data()?)?;
    match visitor.backup(&walk.oids, &node.root, node.date, &node.props)? {
        Visit::Prune => Ok(()),
        Visit::Descend => walk.walk(visitor, &node.root),
    }
}

// ── Property records ─────────────────────────────────────────────────────────

/// Decoded contents of a `"back"` property record.
struct BackNode {
    root:  Oid,
    date:  i64,
    props: PropertyMap,
}

impl BackNode {
    fn decode(data: &[u8]) -> Result<BackNode> {
        let mut dec = Decoder::new(data);
        let _record_type = dec.get8()?;

        let mut root = Oid::zero();
        let mut date = 0i64;
        let mut props = PropertyMap::new();

        while dec.more() {
            let key = dec.get8()?;
            let value = dec.get16()?;
            match key.as_str() {
                "_date" => {
                    date = value.parse().map_err(|_| {
                        Error::CorruptChunk(format!("bad _date value {value:?}"))
                    })?;
                }
                "hash" => root = Oid::from_hex(&value)?,
                _ => {
                    props.insert(key, value);
                }
            }
        }

        Ok(BackNode { root, date, props })
    }
}

/// Cursor over a length-prefixed property record.
struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Decoder<'a> {
        Decoder { data }
    }

    fn more(&self) -> bool {
        !self.data.is_empty()
    }

    fn get(&mut self) -> Result<u8> {
        match self.data.split_first() {
            Some((byte, rest)) => {
                self.data = rest;
                Ok(*byte)
            }
            None => Err(Error::CorruptChunk("truncated property record".into())),
        }
    }

    fn get_string(&mut self, len: usize) -> Result<String> {
        if self.data.len() < len {
            return Err(Error::CorruptChunk("truncated property record".into()));
        }
        let (head, rest) = self.data.split_at(len);
        self.data = rest;
        String::from_utf8(head.to_vec())
            .map_err(|_| Error::CorruptChunk("property record is not UTF-8".into()))
    }

    /// A string with a one-byte length prefix.
    fn get8(&mut self) -> Result<String> {
        let len = self.get()? as usize;
        self.get_string(len)
    }

    /// A string with a two-byte big-endian length prefix.
    fn get16(&mut self) -> Result<String> {
        let len = (self.get()? as usize) << 8 | self.get()? as usize;
        self.get_string(len)
    }
}

/// Encode a property record: the writer-side inverse of the `"back"`
/// decoder.  Keys are limited to 255 bytes and values to 65535.
pub fn encode_record(record_type: &str, fields: &[(&str, &str)]) -> Result<Vec<u8>> {
    fn check(len: usize, max: usize, what: &str) -> Result<()> {
        if len > max {
            return Err(Error::CorruptChunk(format!(
                "{what} of {len} bytes exceeds {max}"
            )));
        }
        Ok(())
    }

    check(record_type.len(), 255, "record type")?;
    let mut out = vec![record_type.len() as u8];
    out.extend_from_slice(record_type.as_bytes());

    for (key, value) in fields {
        check(key.len(), 255, "property key")?;
        check(value.len(), 65535, "property value")?;
        out.push(key.len() as u8);
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_roundtrip() {
        let data = encode_record(
            "snapshot",
            &[
                ("_date", "1375212203"),
                ("hash", "9d91380b823559dd2a4ee5bce3fcc697c56ba3f8"),
                ("host", "foam"),
                ("fs", "root"),
            ],
        )
        .unwrap();

        let node = BackNode::decode(&data).unwrap();
        assert_eq!(node.date, 1375212203);
        assert_eq!(
            node.root.to_hex(),
            "9d91380b823559dd2a4ee5bce3fcc697c56ba3f8"
        );
        assert_eq!(node.props.len(), 2);
        assert_eq!(node.props["host"], "foam");
        assert_eq!(node.props["fs"], "root");
    }

    #[test]
    fn truncated_record_rejected() {
        let mut data = encode_record("snapshot", &[("key", "value")]).unwrap();
        data.truncate(data.len() - 3);
        assert!(matches!(
            BackNode::decode(&data),
            Err(Error::CorruptChunk(_))
        ));
    }

    #[test]
    fn bad_date_rejected() {
        let data = encode_record("snapshot", &[("_date", "not-a-number")]).unwrap();
        assert!(matches!(
            BackNode::decode(&data),
            Err(Error::CorruptChunk(_))
        ));
    }
}
