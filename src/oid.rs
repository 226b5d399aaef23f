//! Object identifiers — 20-byte content identities.
//!
//! An OID is the SHA-1 of a chunk's kind bytes concatenated with its
//! uncompressed payload.  Two chunks have the same OID exactly when they have
//! the same kind and byte-identical payload; the pool relies on this to use
//! OIDs as primary keys.
//!
//! The textual form is 40 lowercase hex characters.  OIDs order
//! byte-lexicographically, which is also the order the on-disk index stores
//! them in.

use std::fmt;
use std::hash::{Hash, Hasher};

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::kind::Kind;

/// Raw length of an OID in bytes.
pub const OID_LEN: usize = 20;

/// Length of the textual (hex) form.
pub const OID_HEX_LEN: usize = 2 * OID_LEN;

/// A 20-byte content identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Oid(pub [u8; OID_LEN]);

impl Oid {
    /// Derive the OID of a chunk: SHA-1 of the kind bytes followed by the
    /// payload bytes.
    pub fn from_data(kind: Kind, data: &[u8]) -> Oid {
        let mut h = Sha1::new();
        h.update(kind.bytes());
        h.update(data);
        Oid(h.finalize().into())
    }

    /// Parse a 40-character hex string.
    pub fn from_hex(text: &str) -> Result<Oid> {
        if text.len() != OID_HEX_LEN {
            return Err(Error::InvalidOid(text.to_owned()));
        }
        let bytes = hex::decode(text).map_err(|_| Error::InvalidOid(text.to_owned()))?;
        let mut raw = [0u8; OID_LEN];
        raw.copy_from_slice(&bytes);
        Ok(Oid(raw))
    }

    /// The all-zeros sentinel.  Never a real content hash with overwhelming
    /// probability.
    pub fn zero() -> Oid {
        Oid([0u8; OID_LEN])
    }

    /// Lowercase 40-character hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First byte of the hash; the index buckets by this.
    #[inline]
    pub fn peek_first(&self) -> u8 {
        self.0[0]
    }

    /// Treat the 20 bytes as one big-endian integer and add 1, wrapping
    /// `ff…ff` to `00…00`.  Used to synthesize adjacent neighbors for
    /// negative-lookup tests.
    pub fn inc(&mut self) {
        for byte in self.0.iter_mut().rev() {
            let (v, carry) = byte.overflowing_add(1);
            *byte = v;
            if !carry {
                break;
            }
        }
    }

    /// The inverse of [`Oid::inc`]: subtract 1, wrapping `00…00` to `ff…ff`.
    pub fn dec(&mut self) {
        for byte in self.0.iter_mut().rev() {
            let (v, borrow) = byte.overflowing_sub(1);
            *byte = v;
            if !borrow {
                break;
            }
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The OID is itself a cryptographic hash with uniform distribution, so the
/// map hash is simply its first 32 bits.
impl Hash for Oid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(u32::from_le_bytes(self.0[..4].try_into().unwrap()));
    }
}
