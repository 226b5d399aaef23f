//! Chunks — the framed, optionally compressed unit of backup storage.
//!
//! # On-disk frame (48-byte header, numeric fields little-endian)
//!
//! ```text
//! Offset  Size  Field
//!    0     16   magic    = "adump-pool-v1.1\n"
//!   16      4   clen     payload bytes stored in the file      (LE u32)
//!   20      4   uclen    uncompressed length, or 0xFFFF_FFFF
//!                        when the payload is stored raw        (LE u32)
//!   24      4   kind     4 raw bytes
//!   28     20   oid      20 raw bytes
//!   48   clen   payload  (zlib-compressed when uclen != 0xFFFF_FFFF)
//!    +   0-15   zero padding to a 16-byte boundary
//! ```
//!
//! The stored size of a frame is `pad16(48 + clen)`.
//!
//! # Compression
//! Payload compression is lazy and sticky.  The first request for the
//! compressed form attempts zlib deflate at level 3 into a buffer no larger
//! than the source; only a strictly smaller result is kept.  Payloads under
//! 16 bytes are never attempted — zlib misbehaves on them and the 16-byte
//! frame padding would erase any gain.  Chunks read back from a compressed
//! frame decompress lazily on the first request for plain data, and the
//! output must be exactly the declared `uclen` bytes.
//!
//! # Identity
//! A chunk constructed from raw bytes derives its OID (SHA-1 of kind ∥
//! payload); a chunk materialized from disk trusts the stored OID.  The
//! compression caches are an optimization, not observable state.

use std::cell::OnceCell;
use std::io::{Read, Write};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::kind::Kind;
use crate::oid::Oid;

/// On-disk magic for every chunk frame.
pub const CHUNK_MAGIC: &[u8; 16] = b"adump-pool-v1.1\n";

/// Fixed byte size of the frame header.
pub const HEADER_SIZE: usize = 48;

/// `uclen` sentinel: the payload is stored uncompressed.
const UCLEN_RAW: u32 = 0xFFFF_FFFF;

/// zlib deflate level used for chunk payloads.
const DEFLATE_LEVEL: u32 = 3;

/// Payloads shorter than this are never compressed.
const MIN_COMPRESS_LEN: usize = 16;

/// Round a frame size up to the next 16-byte boundary.
#[inline]
pub fn pad16(n: u32) -> u32 {
    (n + 15) & !15
}

// ── Raw codec helpers ────────────────────────────────────────────────────────

/// Attempt to deflate `src` into a buffer no larger than `src` itself.
///
/// Returns `Ok(None)` when the data is not worth compressing: shorter than
/// [`MIN_COMPRESS_LEN`], or the deflated form would not be strictly smaller
/// than the source.  Any other zlib failure is an [`Error::Compression`].
pub fn try_compress(src: &[u8]) -> Result<Option<Vec<u8>>> {
    if src.len() < MIN_COMPRESS_LEN {
        return Ok(None);
    }

    let mut enc = Compress::new(Compression::new(DEFLATE_LEVEL), true);
    let mut out = Vec::with_capacity(src.len());
    let status = enc
        .compress_vec(src, &mut out, FlushCompress::Finish)
        .map_err(|e| Error::Compression(e.to_string()))?;

    match status {
        // The stream completed within the cap; keep it only if it is a win.
        Status::StreamEnd if out.len() < src.len() => Ok(Some(out)),
        Status::StreamEnd => Ok(None),
        // Output would not fit in src.len() bytes — not compressible.
        Status::Ok | Status::BufError => Ok(None),
    }
}

/// Inflate `src`, requiring the output to be exactly `dest_len` bytes.
pub fn decompress(src: &[u8], dest_len: u32) -> Result<Vec<u8>> {
    let mut dec = Decompress::new(true);
    let mut out = Vec::with_capacity(dest_len as usize);
    let status = dec
        .decompress_vec(src, &mut out, FlushDecompress::Finish)
        .map_err(|e| Error::CorruptChunk(format!("zlib inflate failed: {e}")))?;

    if status != Status::StreamEnd || out.len() != dest_len as usize {
        return Err(Error::CorruptChunk(format!(
            "inflated to {} bytes, expected {}",
            out.len(),
            dest_len
        )));
    }
    Ok(out)
}

// ── Header peek ──────────────────────────────────────────────────────────────

/// Frame metadata readable without consuming the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub kind: Kind,
    pub oid:  Oid,
    /// Uncompressed payload length.
    pub size: u32,
    /// Padded frame length; the offset to the next frame in the file.
    pub stored_size: u32,
}

// ── Chunk ────────────────────────────────────────────────────────────────────

enum Payload {
    /// Built from raw bytes (or read from an uncompressed frame).
    /// `zdata` caches the deflate attempt: `None` = incompressible.
    Plain {
        data:  Vec<u8>,
        zdata: OnceCell<Option<Vec<u8>>>,
    },
    /// Read from a compressed frame; inflates on first `data()` call.
    Compressed {
        zdata:    Vec<u8>,
        data_len: u32,
        data:     OnceCell<Vec<u8>>,
    },
}

/// An immutable (kind, bytes) unit identified by its OID.
pub struct Chunk {
    kind:    Kind,
    oid:     Oid,
    payload: Payload,
}

impl Chunk {
    /// Build a chunk from raw bytes, deriving its OID.
    pub fn new(kind: Kind, data: Vec<u8>) -> Chunk {
        let oid = Oid::from_data(kind, &data);
        Chunk {
            kind,
            oid,
            payload: Payload::Plain {
                data,
                zdata: OnceCell::new(),
            },
        }
    }

    /// Materialize an uncompressed chunk read back from a frame, trusting
    /// the stored OID.
    fn from_plain_frame(kind: Kind, oid: Oid, data: Vec<u8>) -> Chunk {
        Chunk {
            kind,
            oid,
            payload: Payload::Plain {
                data,
                zdata: OnceCell::new(),
            },
        }
    }

    /// Materialize a compressed chunk read back from a frame, trusting the
    /// stored OID.  The payload inflates lazily.
    fn from_compressed_frame(kind: Kind, oid: Oid, zdata: Vec<u8>, data_len: u32) -> Chunk {
        Chunk {
            kind,
            oid,
            payload: Payload::Compressed {
                zdata,
                data_len,
                data: OnceCell::new(),
            },
        }
    }

    #[inline]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[inline]
    pub fn oid(&self) -> &Oid {
        &self.oid
    }

    /// Uncompressed payload length, known without decompressing.
    pub fn size(&self) -> u32 {
        match &self.payload {
            Payload::Plain { data, .. } => data.len() as u32,
            Payload::Compressed { data_len, .. } => *data_len,
        }
    }

    /// The uncompressed payload, inflating on first call if needed.
    pub fn data(&self) -> Result<&[u8]> {
        match &self.payload {
            Payload::Plain { data, .. } => Ok(data),
            Payload::Compressed {
                zdata,
                data_len,
                data,
            } => {
                if data.get().is_none() {
                    let plain = decompress(zdata, *data_len)?;
                    let _ = data.set(plain);
                }
                Ok(data.get().expect("cache populated above"))
            }
        }
    }

    /// Whether a compressed form exists, attempting deflate on first call.
    pub fn has_zdata(&self) -> Result<bool> {
        Ok(self.zdata()?.is_some())
    }

    /// The compressed payload, or `None` for incompressible data.
    pub fn zdata(&self) -> Result<Option<&[u8]>> {
        match &self.payload {
            Payload::Plain { data, zdata } => {
                if zdata.get().is_none() {
                    let attempt = try_compress(data)?;
                    let _ = zdata.set(attempt);
                }
                Ok(zdata.get().expect("cache populated above").as_deref())
            }
            Payload::Compressed { zdata, .. } => Ok(Some(zdata)),
        }
    }

    /// Length of the compressed form, or `None` for incompressible data.
    pub fn zsize(&self) -> Result<Option<u32>> {
        Ok(self.zdata()?.map(|z| z.len() as u32))
    }

    /// Bytes this chunk will consume in a data file, padding included.
    pub fn write_size(&self) -> Result<u32> {
        let stored = match self.zdata()? {
            Some(z) => z.len() as u32,
            None => self.size(),
        };
        Ok(pad16(HEADER_SIZE as u32 + stored))
    }

    // ── Frame IO ─────────────────────────────────────────────────────────────

    /// Write the frame: header, payload (compressed when possible), zero
    /// padding to a 16-byte boundary.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        let (payload, uclen): (&[u8], u32) = match self.zdata()? {
            Some(z) => (z, self.size()),
            None => (self.data()?, UCLEN_RAW),
        };
        let clen = payload.len() as u32;

        let mut head = [0u8; HEADER_SIZE];
        head[0..16].copy_from_slice(CHUNK_MAGIC);
        head[16..20].copy_from_slice(&clen.to_le_bytes());
        head[20..24].copy_from_slice(&uclen.to_le_bytes());
        head[24..28].copy_from_slice(&self.kind.bytes());
        head[28..48].copy_from_slice(&self.oid.0);

        w.write_all(&head)?;
        w.write_all(payload)?;

        let pad = pad16(HEADER_SIZE as u32 + clen) - (HEADER_SIZE as u32 + clen);
        if pad > 0 {
            w.write_all(&[0u8; 15][..pad as usize])?;
        }
        Ok(())
    }

    /// Peek at a frame header.
    ///
    /// Returns `Ok(None)` when the 48 bytes at the stream position are not a
    /// chunk frame (magic mismatch).  On success the stream is left just
    /// after the header.
    pub fn read_header<R: Read>(r: &mut R) -> Result<Option<HeaderInfo>> {
        let mut head = [0u8; HEADER_SIZE];
        r.read_exact(&mut head)?;

        if &head[0..16] != CHUNK_MAGIC {
            return Ok(None);
        }
        let clen = u32::from_le_bytes(head[16..20].try_into().unwrap());
        let uclen = u32::from_le_bytes(head[20..24].try_into().unwrap());
        let kind = Kind::from_bytes(head[24..28].try_into().unwrap());
        let oid = Oid(head[28..48].try_into().unwrap());

        Ok(Some(HeaderInfo {
            kind,
            oid,
            size: if uclen == UCLEN_RAW { clen } else { uclen },
            stored_size: pad16(HEADER_SIZE as u32 + clen),
        }))
    }

    /// Read one full frame, consuming header, payload, and padding.
    pub fn read<R: Read>(r: &mut R) -> Result<Chunk> {
        let mut head = [0u8; HEADER_SIZE];
        r.read_exact(&mut head)?;

        if &head[0..16] != CHUNK_MAGIC {
            return Err(Error::CorruptChunk("bad frame magic".into()));
        }
        let clen = u32::from_le_bytes(head[16..20].try_into().unwrap());
        let uclen = u32::from_le_bytes(head[20..24].try_into().unwrap());
        let kind = Kind::from_bytes(head[24..28].try_into().unwrap());
        let oid = Oid(head[28..48].try_into().unwrap());

        let mut payload = vec![0u8; clen as usize];
        r.read_exact(&mut payload)?;

        let pad = pad16(HEADER_SIZE as u32 + clen) - (HEADER_SIZE as u32 + clen);
        if pad > 0 {
            let mut sink = [0u8; 15];
            r.read_exact(&mut sink[..pad as usize])?;
        }

        if uclen == UCLEN_RAW {
            Ok(Chunk::from_plain_frame(kind, oid, payload))
        } else {
            Ok(Chunk::from_compressed_frame(kind, oid, payload, uclen))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{boundary_sizes, make_random_chunk, make_uncompressible_chunk};
    use std::io::{Cursor, Seek, SeekFrom};

    #[test]
    fn compression_golden() {
        // Too short to bother.
        assert!(try_compress(b"Short").unwrap().is_none());

        // Repetitive text must deflate to strictly less than the input.
        let input = "Hello world.  Let's try a much longer string to see if that helps.  \
                     Let's try a much longer string to see if that helps.";
        let z = try_compress(input.as_bytes()).unwrap().expect("compressible");
        assert!(z.len() < input.len());

        let back = decompress(&z, input.len() as u32).unwrap();
        assert_eq!(back, input.as_bytes());
    }

    #[test]
    fn decompress_length_mismatch() {
        let input = vec![b'a'; 4096];
        let z = try_compress(&input).unwrap().unwrap();
        assert!(matches!(
            decompress(&z, input.len() as u32 + 1),
            Err(Error::CorruptChunk(_))
        ));
    }

    #[test]
    fn short_chunks_never_compress() {
        for size in 0..MIN_COMPRESS_LEN as u32 {
            let ch = make_random_chunk(size, size);
            assert!(!ch.has_zdata().unwrap());
        }
    }

    #[test]
    fn sticky_compression_state() {
        let ch = make_random_chunk(4096, 1);
        let first = ch.zsize().unwrap();
        assert_eq!(ch.zsize().unwrap(), first);
        assert_eq!(ch.has_zdata().unwrap(), first.is_some());
    }

    #[test]
    fn frame_roundtrip_boundary_sizes() {
        let mut buf = Cursor::new(Vec::new());
        let mut offsets = Vec::new();

        for size in boundary_sizes() {
            let ch = make_random_chunk(size, size);
            offsets.push((buf.position(), ch));
            offsets.last().unwrap().1.write(&mut buf).unwrap();
        }

        // Header walk: stored_size chains every frame to the next.
        let mut pos = 0u64;
        for (offset, ch) in &offsets {
            assert_eq!(pos, *offset);
            buf.seek(SeekFrom::Start(pos)).unwrap();
            let info = Chunk::read_header(&mut buf).unwrap().expect("valid frame");
            assert_eq!(info.kind, ch.kind());
            assert_eq!(info.oid, *ch.oid());
            assert_eq!(info.size, ch.size());
            pos += info.stored_size as u64;
        }
        assert_eq!(pos, buf.get_ref().len() as u64);

        // Full reads reproduce kind, OID, and payload bit-for-bit.
        for (offset, ch) in &offsets {
            buf.seek(SeekFrom::Start(*offset)).unwrap();
            let back = Chunk::read(&mut buf).unwrap();
            assert_eq!(back.kind(), ch.kind());
            assert_eq!(back.oid(), ch.oid());
            assert_eq!(back.data().unwrap(), ch.data().unwrap());
        }
    }

    #[test]
    fn frame_roundtrip_uncompressible() {
        let mut buf = Cursor::new(Vec::new());
        let ch = make_uncompressible_chunk(2048, 7);
        assert!(!ch.has_zdata().unwrap());
        ch.write(&mut buf).unwrap();

        buf.set_position(0);
        let back = Chunk::read(&mut buf).unwrap();
        assert_eq!(back.oid(), ch.oid());
        assert_eq!(back.data().unwrap(), ch.data().unwrap());
    }

    #[test]
    fn write_size_matches_bytes_written() {
        for size in [0u32, 1, 15, 16, 17, 1000, 65536] {
            let ch = make_random_chunk(size, size);
            let mut buf = Cursor::new(Vec::new());
            ch.write(&mut buf).unwrap();
            assert_eq!(buf.get_ref().len() as u32, ch.write_size().unwrap());
            assert_eq!(ch.write_size().unwrap() % 16, 0);
        }
    }

    #[test]
    fn read_header_rejects_garbage() {
        let mut buf = Cursor::new(vec![0u8; HEADER_SIZE]);
        assert!(Chunk::read_header(&mut buf).unwrap().is_none());

        let mut buf = Cursor::new(vec![0u8; HEADER_SIZE]);
        assert!(matches!(
            Chunk::read(&mut buf),
            Err(Error::CorruptChunk(_))
        ));
    }
}
