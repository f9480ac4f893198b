//! Chunk codec for binary file content.
//!
//! Binary content is base64-encoded and the encoded text is split into
//! fixed-size pieces, each sent as `"<index>:<total>:<piece>"` with a
//! 1-based index. Piece sizes are multiples of four so that every piece is
//! valid base64 by itself.
//!
//! [`ChunkAssembly`] collects pieces per target path and yields the decoded
//! bytes once the declared total has arrived, in index order regardless of
//! arrival order. Partial buffers never expire.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Encoded characters per chunk (40 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 40 * 1024;

/// Errors from parsing or assembling chunks. Each drops only the offending chunk.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkFormatError {
    /// Fewer than three `:`-separated fields
    #[error("chunk header missing separator")]
    MissingSeparator,

    /// Index field is not a positive integer
    #[error("invalid chunk index: {0:?}")]
    InvalidIndex(String),

    /// Total field is not a positive integer
    #[error("invalid chunk total: {0:?}")]
    InvalidTotal(String),

    /// Index beyond the declared total
    #[error("chunk index {index} out of range 1..={total}")]
    IndexOutOfRange {
        /// Received index
        index: u32,
        /// Declared total
        total: u32,
    },

    /// A chunk declared a different total than earlier chunks for the same path
    #[error("chunk total {got} does not match pending transfer total {expected}")]
    TotalMismatch {
        /// Total declared by the first chunk
        expected: u32,
        /// Total declared by this chunk
        got: u32,
    },

    /// A piece was not valid base64
    #[error("chunk {index} is not valid base64")]
    InvalidBase64 {
        /// Index of the bad piece
        index: u32,
    },
}

/// A parsed chunk, borrowing its payload from the wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader<'a> {
    /// 1-based position
    pub index: u32,
    /// Declared number of chunks
    pub total: u32,
    /// Base64 piece
    pub payload: &'a str,
}

impl<'a> ChunkHeader<'a> {
    /// Parse `"<index>:<total>:<payload>"`.
    pub fn parse(raw: &'a str) -> Result<Self, ChunkFormatError> {
        let mut parts = raw.splitn(3, ':');
        let (Some(index), Some(total), Some(payload)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ChunkFormatError::MissingSeparator);
        };

        let index: u32 = match index.parse() {
            Ok(n) if n > 0 => n,
            _ => return Err(ChunkFormatError::InvalidIndex(index.to_string())),
        };
        let total: u32 = match total.parse() {
            Ok(n) if n > 0 => n,
            _ => return Err(ChunkFormatError::InvalidTotal(total.to_string())),
        };
        if index > total {
            return Err(ChunkFormatError::IndexOutOfRange { index, total });
        }

        Ok(Self {
            index,
            total,
            payload,
        })
    }
}

/// Encode `bytes` into wire chunks of at most `chunk_size` encoded characters.
///
/// `chunk_size` is rounded down to a multiple of four (minimum four). Empty
/// content still produces one chunk so that the receiver writes an empty file.
pub fn encode_chunks(bytes: &[u8], chunk_size: usize) -> Vec<String> {
    let size = (chunk_size / 4).max(1) * 4;
    let encoded = STANDARD.encode(bytes);
    if encoded.is_empty() {
        return vec!["1:1:".to_string()];
    }

    // base64 output is ASCII, so byte offsets are char boundaries
    let pieces: Vec<&str> = encoded
        .as_bytes()
        .chunks(size)
        .filter_map(|piece| std::str::from_utf8(piece).ok())
        .collect();
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| format!("{}:{}:{}", i + 1, total, piece))
        .collect()
}

#[derive(Debug)]
struct PartialFile {
    total: u32,
    pieces: BTreeMap<u32, String>,
}

/// Per-path reassembly buffers.
#[derive(Debug, Default)]
pub struct ChunkAssembly {
    pending: HashMap<PathBuf, PartialFile>,
}

impl ChunkAssembly {
    /// Create an empty assembly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one wire chunk for `target`.
    ///
    /// Returns `Ok(Some(bytes))` when this chunk completed the file; the
    /// buffer for `target` is gone at that point. A repeated index replaces
    /// the earlier piece.
    pub fn accept(
        &mut self,
        target: &Path,
        raw: &str,
    ) -> Result<Option<Vec<u8>>, ChunkFormatError> {
        let chunk = ChunkHeader::parse(raw)?;

        let partial = self
            .pending
            .entry(target.to_path_buf())
            .or_insert_with(|| PartialFile {
                total: chunk.total,
                pieces: BTreeMap::new(),
            });
        if partial.total != chunk.total {
            return Err(ChunkFormatError::TotalMismatch {
                expected: partial.total,
                got: chunk.total,
            });
        }
        partial.pieces.insert(chunk.index, chunk.payload.to_string());

        if partial.pieces.len() < partial.total as usize {
            return Ok(None);
        }

        let Some(done) = self.pending.remove(target) else {
            return Ok(None);
        };
        let mut bytes = Vec::new();
        for (index, piece) in done.pieces {
            let decoded = STANDARD
                .decode(piece.as_bytes())
                .map_err(|_| ChunkFormatError::InvalidBase64 { index })?;
            bytes.extend_from_slice(&decoded);
        }
        Ok(Some(bytes))
    }

    /// Whether a transfer for `target` is in progress.
    pub fn is_pending(&self, target: &Path) -> bool {
        self.pending.contains_key(target)
    }

    /// Number of transfers in progress.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_colons_in_payload() {
        let chunk = ChunkHeader::parse("2:3:ab:cd").unwrap();
        assert_eq!(chunk.index, 2);
        assert_eq!(chunk.total, 3);
        assert_eq!(chunk.payload, "ab:cd");
    }

    #[test]
    fn parse_rejects_bad_headers() {
        assert_eq!(
            ChunkHeader::parse("1:2"),
            Err(ChunkFormatError::MissingSeparator)
        );
        assert_eq!(
            ChunkHeader::parse("x:2:AA=="),
            Err(ChunkFormatError::InvalidIndex("x".into()))
        );
        assert_eq!(
            ChunkHeader::parse("0:2:AA=="),
            Err(ChunkFormatError::InvalidIndex("0".into()))
        );
        assert_eq!(
            ChunkHeader::parse("1:-1:AA=="),
            Err(ChunkFormatError::InvalidTotal("-1".into()))
        );
        assert_eq!(
            ChunkHeader::parse("3:2:AA=="),
            Err(ChunkFormatError::IndexOutOfRange { index: 3, total: 2 })
        );
    }

    #[test]
    fn out_of_order_chunks_reassemble_by_index() {
        let mut asm = ChunkAssembly::new();
        let path = Path::new("/vault/x.bin");
        assert_eq!(asm.accept(path, "2:3:Qg==").unwrap(), None);
        assert_eq!(asm.accept(path, "1:3:QQ==").unwrap(), None);
        assert!(asm.is_pending(path));
        let bytes = asm.accept(path, "3:3:Qw==").unwrap().unwrap();
        assert_eq!(bytes, b"ABC");
        assert!(!asm.is_pending(path));
        assert_eq!(asm.pending_count(), 0);
    }

    #[test]
    fn per_chunk_padding_is_decoded_per_piece() {
        let mut asm = ChunkAssembly::new();
        let path = Path::new("/vault/y.bin");
        asm.accept(path, "2:3:Yg==").unwrap();
        asm.accept(path, "1:3:QQ==").unwrap();
        let bytes = asm.accept(path, "3:3:Yw==").unwrap().unwrap();
        assert_eq!(bytes, b"Abc");
    }

    #[test]
    fn transfers_are_isolated_by_path() {
        let mut asm = ChunkAssembly::new();
        asm.accept(Path::new("/v/a"), "1:2:QQ==").unwrap();
        asm.accept(Path::new("/v/b"), "1:2:Qg==").unwrap();
        assert_eq!(asm.pending_count(), 2);
        let a = asm.accept(Path::new("/v/a"), "2:2:QQ==").unwrap().unwrap();
        assert_eq!(a, b"AA");
        assert!(asm.is_pending(Path::new("/v/b")));
    }

    #[test]
    fn malformed_chunk_is_dropped_without_touching_buffer() {
        let mut asm = ChunkAssembly::new();
        let path = Path::new("/v/a");
        asm.accept(path, "1:2:QQ==").unwrap();
        assert!(asm.accept(path, "garbage").is_err());
        assert_eq!(
            asm.accept(path, "2:5:QQ=="),
            Err(ChunkFormatError::TotalMismatch {
                expected: 2,
                got: 5
            })
        );
        assert_eq!(asm.accept(path, "2:2:Qg==").unwrap().unwrap(), b"AB");
    }

    #[test]
    fn bad_base64_fails_completion() {
        let mut asm = ChunkAssembly::new();
        let path = Path::new("/v/a");
        let err = asm.accept(path, "1:1:!!!").unwrap_err();
        assert_eq!(err, ChunkFormatError::InvalidBase64 { index: 1 });
        assert!(!asm.is_pending(path));
    }

    #[test]
    fn encode_then_assemble_large_content() {
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let chunks = encode_chunks(&content, DEFAULT_CHUNK_SIZE);
        assert_eq!(chunks.len(), 4);
        assert!(chunks[0].starts_with("1:4:"));

        let mut asm = ChunkAssembly::new();
        let path = Path::new("/v/big.bin");
        let mut result = None;
        for chunk in chunks.iter().rev() {
            result = asm.accept(path, chunk).unwrap();
        }
        assert_eq!(result.unwrap(), content);
    }

    #[test]
    fn empty_content_is_one_empty_chunk() {
        assert_eq!(encode_chunks(&[], DEFAULT_CHUNK_SIZE), vec!["1:1:".to_string()]);
        let mut asm = ChunkAssembly::new();
        let bytes = asm.accept(Path::new("/v/e"), "1:1:").unwrap().unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn chunk_size_is_rounded_to_base64_quanta() {
        let chunks = encode_chunks(b"hello world", 6);
        // 16 encoded chars in pieces of 4
        assert_eq!(chunks.len(), 4);
        for chunk in &chunks {
            let header = ChunkHeader::parse(chunk).unwrap();
            assert_eq!(header.payload.len() % 4, 0);
        }
    }
}
