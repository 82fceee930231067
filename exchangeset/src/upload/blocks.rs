//! Block planning and hashing for chunked uploads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use md5::{Digest, Md5};

/// Block size used when the configured size is out of range (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Largest accepted block size (100 MiB).
pub const MAX_BLOCK_SIZE: usize = 100 * 1024 * 1024;

/// Clamp a configured block size.
///
/// Non-positive values and values above [`MAX_BLOCK_SIZE`] fall back to
/// [`DEFAULT_BLOCK_SIZE`].
pub fn effective_block_size(configured: i64) -> usize {
    match usize::try_from(configured) {
        Ok(size) if size > 0 && size <= MAX_BLOCK_SIZE => size,
        _ => DEFAULT_BLOCK_SIZE,
    }
}

/// Block id for a 1-based sequence number: `Block_00001`.
pub fn block_id(sequence: u32) -> String {
    format!("Block_{:05}", sequence)
}

/// Base64 MD5 as sent in `Content-MD5` and the commit manifest.
pub fn content_md5(data: &[u8]) -> String {
    STANDARD.encode(Md5::digest(data))
}

/// Base64 of a finished MD5 digest.
pub fn encode_md5(hasher: Md5) -> String {
    STANDARD.encode(hasher.finalize())
}

/// Byte range of one block within a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpan {
    pub id: String,
    pub sequence: u32,
    pub offset: u64,
    pub length: usize,
}

/// A block read from disk and ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBlock {
    pub id: String,
    pub sequence: u32,
    pub offset: u64,
    pub length: usize,
    pub content_hash: String,
}

impl UploadBlock {
    pub fn new(span: BlockSpan, data: &[u8]) -> Self {
        Self {
            content_hash: content_md5(data),
            id: span.id,
            sequence: span.sequence,
            offset: span.offset,
            length: span.length,
        }
    }
}

/// Split `file_len` bytes into consecutive blocks of `block_size`.
///
/// Every block but the last is exactly `block_size`; an empty file has no
/// blocks.
pub fn plan_blocks(file_len: u64, block_size: usize) -> Vec<BlockSpan> {
    let block_size = block_size.max(1) as u64;
    let mut blocks = Vec::with_capacity(file_len.div_ceil(block_size) as usize);
    let mut offset = 0;
    let mut sequence = 1;
    while offset < file_len {
        let length = block_size.min(file_len - offset);
        blocks.push(BlockSpan {
            id: block_id(sequence),
            sequence,
            offset,
            length: length as usize,
        });
        offset += length;
        sequence += 1;
    }
    blocks
}
