//! The integrity and compression envelope around a block body.
//!
//! The same envelope wraps both data-block bodies and the file footer
//! index: a digest over the plaintext, zstd compression, and a small
//! header recording both lengths and the digest algorithm.

use std::time::Instant;

use sha2::{Digest, Sha512};
use sha3::Sha3_512;

use crate::config::ChecksumKind;
use crate::encoding::{write_varint, ByteReader};
use crate::error::{Error, Result};

/// Compresses and checksums `plain`, appending the envelope to `out`.
/// Returns the number of bytes appended.
pub fn encode(
    out: &mut Vec<u8>,
    plain: &[u8],
    checksum: ChecksumKind,
    compression_level: i32,
) -> Result<usize> {
    let digest = compute_digest(checksum, plain);
    let compressed = zstd::encode_all(plain, compression_level)?;

    let start = out.len();
    write_varint(out, compressed.len() as u64);
    write_varint(out, plain.len() as u64);
    out.push(checksum.as_u8());
    out.extend_from_slice(&digest);
    out.extend_from_slice(&compressed);
    Ok(out.len() - start)
}

/// Decodes an envelope written by [`encode`], returning the plaintext.
///
/// Fails with [`Error::SizeMismatch`] when the decompressed length differs
/// from the recorded one and [`Error::ChecksumMismatch`] when the digest
/// over the decompressed bytes differs from the stored one.
pub fn decode(reader: &mut ByteReader<'_>) -> Result<Vec<u8>> {
    let start = Instant::now();
    let compressed_len = reader.read_varint()? as usize;
    let plain_len = reader.read_varint()? as usize;
    let checksum_id = reader.read_u8()?;
    let checksum = ChecksumKind::from_u8(checksum_id)
        .ok_or_else(|| Error::corruption(format!("unknown checksum id {}", checksum_id)))?;
    let stored_digest = reader.read_slice(checksum.digest_len())?;
    let compressed = reader.read_slice(compressed_len)?;
    let read_elapsed = start.elapsed();

    let start = Instant::now();
    let plain = zstd::decode_all(compressed)
        .map_err(|e| Error::corruption(format!("zstd decode failed: {}", e)))?;
    if plain.len() != plain_len {
        return Err(Error::SizeMismatch { expected: plain_len, actual: plain.len() });
    }
    let decompress_elapsed = start.elapsed();

    let start = Instant::now();
    let digest = compute_digest(checksum, &plain);
    if digest != stored_digest {
        return Err(Error::ChecksumMismatch {
            expected: to_hex(stored_digest),
            actual: to_hex(&digest),
        });
    }
    log::debug!(
        "block decode: read {:?} decompress {:?} verify {:?} ({} -> {} bytes)",
        read_elapsed,
        decompress_elapsed,
        start.elapsed(),
        compressed_len,
        plain_len
    );

    Ok(plain)
}

fn compute_digest(kind: ChecksumKind, data: &[u8]) -> Vec<u8> {
    match kind {
        ChecksumKind::None => Vec::new(),
        ChecksumKind::Sha512 => Sha512::digest(data).to_vec(),
        ChecksumKind::Sha3_512 => Sha3_512::digest(data).to_vec(),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
