//! The `Words` residue value type: an unsigned integer mod 2^E−1 stored as
//! little-endian 32-bit words. The word count is fixed by the exponent E, so
//! `Words` values for the same exponent compare by plain word equality.

use rug::integer::Order;
use rug::Integer;

/// A residue mod 2^E−1, stored as `E/32 + 1` little-endian u32 words.
///
/// The exponent itself is not stored; every operation that needs the bit
/// width takes E as a parameter, like the persistence layer and the hasher.
#[derive(Clone, PartialEq, Eq)]
pub struct Words {
    data: Vec<u32>,
}

impl Words {
    /// Number of u32 words needed for an odd exponent E.
    pub fn word_count(e: u32) -> usize {
        (e / 32 + 1) as usize
    }

    /// Number of significant bytes of a residue: ⌈E/8⌉.
    ///
    /// This is the byte count hashed and written to proof files; it can be
    /// up to 3 bytes shorter than the word storage.
    pub fn byte_count(e: u32) -> usize {
        ((e - 1) / 8 + 1) as usize
    }

    /// A residue holding a small value (e.g. the PRP base 3, or 9 = 3²).
    pub fn make(e: u32, value: u32) -> Words {
        let mut data = vec![0u32; Self::word_count(e)];
        data[0] = value;
        Words { data }
    }

    /// Build from little-endian bytes, zero-padding up to the word count.
    pub fn from_le_bytes(e: u32, bytes: &[u8]) -> Words {
        let n = Self::word_count(e);
        debug_assert!(bytes.len() <= n * 4);
        let mut data = vec![0u32; n];
        for (i, chunk) in bytes.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            data[i] = u32::from_le_bytes(word);
        }
        Words { data }
    }

    /// The full little-endian byte image (word count × 4 bytes).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() * 4);
        for w in &self.data {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        bytes
    }

    pub fn from_integer(e: u32, value: &Integer) -> Words {
        debug_assert!(value.significant_bits() <= e);
        let bytes = value.to_digits::<u8>(Order::Lsf);
        Words::from_le_bytes(e, &bytes)
    }

    pub fn to_integer(&self) -> Integer {
        Integer::from_digits(&self.data, Order::Lsf)
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&w| w == 0)
    }

    /// Low 64 bits, used for log formatting only.
    pub fn res64(&self) -> u64 {
        let lo = self.data[0] as u64;
        let hi = self.data.get(1).copied().unwrap_or(0) as u64;
        lo | (hi << 32)
    }

    pub fn words(&self) -> &[u32] {
        &self.data
    }
}

impl std::fmt::Debug for Words {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Words({} words, res64 {:016x})", self.data.len(), self.res64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_and_byte_counts() {
        assert_eq!(Words::word_count(31), 1);
        assert_eq!(Words::byte_count(31), 4);
        assert_eq!(Words::word_count(127), 4);
        assert_eq!(Words::byte_count(127), 16);
        assert_eq!(Words::word_count(216091), 6753);
        assert_eq!(Words::byte_count(216091), 27012);
    }

    #[test]
    fn make_holds_value_in_low_word() {
        let w = Words::make(127, 9);
        assert_eq!(w.words(), &[9, 0, 0, 0]);
        assert_eq!(w.res64(), 9);
        assert!(!w.is_zero());
        assert!(Words::make(127, 0).is_zero());
    }

    #[test]
    fn integer_round_trip() {
        let value = Integer::from(0x1234_5678_9abc_def0u64);
        let w = Words::from_integer(127, &value);
        assert_eq!(w.to_integer(), value);
        assert_eq!(w.res64(), 0x1234_5678_9abc_def0);
    }

    #[test]
    fn byte_round_trip_pads_short_input() {
        // 16 significant bytes for E=127, but only 3 provided
        let w = Words::from_le_bytes(127, &[1, 2, 3]);
        assert_eq!(w.words(), &[0x030201, 0, 0, 0]);
        assert_eq!(w.to_le_bytes().len(), 16);
    }

    #[test]
    fn equality_is_word_equality() {
        let a = Words::from_integer(31, &Integer::from(42u32));
        let b = Words::make(31, 42);
        assert_eq!(a, b);
        assert_ne!(a, Words::make(31, 43));
    }
}
