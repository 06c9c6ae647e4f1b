use anyhow::{ensure, Context, Result};
use std::fs;
use std::path::Path;

use crate::words::Words;

/// On-disk length of a checkpoint residue file: the word image plus a
/// 32-bit CRC trailer, all little-endian.
pub fn checked_len(e: u32) -> u64 {
    (Words::word_count(e) as u64 + 1) * 4
}

/// Write a residue with its CRC-32 trailer.
pub fn write_checked(path: &Path, words: &Words) -> Result<()> {
    let body = words.to_le_bytes();
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    fs::write(path, out).with_context(|| format!("writing residue file {}", path.display()))
}

/// Read a residue back, validating length and CRC.
pub fn read_checked(path: &Path, e: u32) -> Result<Words> {
    let data =
        fs::read(path).with_context(|| format!("reading residue file {}", path.display()))?;
    let expected = checked_len(e) as usize;
    ensure!(
        data.len() == expected,
        "residue file {} is {} bytes, expected {}",
        path.display(),
        data.len(),
        expected
    );
    let (body, trailer) = data.split_at(expected - 4);
    let stored = u32::from_le_bytes(trailer.try_into().unwrap());
    let computed = crc32fast::hash(body);
    ensure!(
        stored == computed,
        "CRC mismatch in {}: stored {:08x}, computed {:08x}",
        path.display(),
        stored,
        computed
    );
    Ok(Words::from_le_bytes(e, body))
}
