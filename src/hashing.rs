//! Residue and file hashing for the proof chain.
//!
//! The proof protocol derives its challenge scalars from SHA3-256 over the
//! significant bytes of a residue, optionally chained from the previous
//! round's digest. The whole-proof-file MD5 is only reported to the caller
//! (it identifies the file to the assignment server) and never enters the
//! challenge chain.

use anyhow::{Context, Result};
use md5::{Digest as _, Md5};
use sha3::Sha3_256;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::words::Words;

fn digest_to_u64x4(digest: &[u8]) -> [u64; 4] {
    let mut out = [0u64; 4];
    for (i, chunk) in digest.chunks_exact(8).enumerate() {
        out[i] = u64::from_le_bytes(chunk.try_into().unwrap());
    }
    out
}

/// SHA3-256 over the first ⌈E/8⌉ bytes of the residue, as 4 little-endian u64s.
pub fn hash_words(e: u32, words: &Words) -> [u64; 4] {
    let bytes = words.to_le_bytes();
    let mut hasher = Sha3_256::new();
    hasher.update(&bytes[..Words::byte_count(e)]);
    digest_to_u64x4(&hasher.finalize())
}

/// Chained form: absorb the 32-byte little-endian encoding of `prefix`,
/// then the residue bytes. The absorption order is part of the proof format.
pub fn hash_words_chained(e: u32, prefix: [u64; 4], words: &Words) -> [u64; 4] {
    let mut hasher = Sha3_256::new();
    for limb in prefix {
        hasher.update(limb.to_le_bytes());
    }
    let bytes = words.to_le_bytes();
    hasher.update(&bytes[..Words::byte_count(e)]);
    digest_to_u64x4(&hasher.finalize())
}

/// Streaming MD5 of a whole file, as lowercase hex.
pub fn file_hash(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("opening {} for hashing", path.display()))?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}
