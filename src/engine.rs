//! The compute-engine contract for residue arithmetic mod 2^E−1, and a
//! GMP-backed reference implementation.
//!
//! Proof construction and verification drive the engine through a small set
//! of operations: `a^h · b` with an optional squaring of `b`, the repeated
//! squaring `a^(2^n)`, and a vector of engine-resident buffers for the
//! binary-tree fold. A GPU engine keeps those buffers device-resident and
//! only materializes `Words` on `read_and_compress`; [`CpuEngine`] holds
//! plain `rug::Integer`s and exists as the reference implementation the
//! test suite runs end-to-end.
//!
//! All calls block until the engine returns.

use anyhow::{anyhow, Result};
use rug::Integer;

use crate::mersenne;
use crate::words::Words;

/// Operations on residues mod 2^E−1 required by proof build/verify.
pub trait ResidueEngine {
    /// Engine-resident residue buffer.
    type Buf;

    /// `a^h · b`, or `a^h · b²` when `square_b` is set.
    fn exp_mul(&mut self, a: &Words, h: u64, b: &Words, square_b: bool) -> Result<Words>;

    /// `a^(2^n)`.
    fn exp_exp2(&mut self, a: &Words, n: u32) -> Result<Words>;

    /// An ordered container of at least `power + 1` residue buffers.
    fn make_buf_vector(&mut self, power: u32) -> Result<Vec<Self::Buf>>;

    fn write_in(&mut self, buf: &mut Self::Buf, words: &Words) -> Result<()>;

    /// In-place buffer form of the fold step: `a ← a^h · b`.
    fn exp_mul_buf(&mut self, a: &mut Self::Buf, h: u64, b: &Self::Buf) -> Result<()>;

    /// Canonically reduced readout. The zero residue reads back as zero
    /// words, which the caller treats as a failed proof round.
    fn read_and_compress(&mut self, buf: &Self::Buf) -> Result<Words>;
}

/// Reference engine over `rug::Integer`, holding residues reduced mod 2^E−1.
pub struct CpuEngine {
    e: u32,
    m: Integer,
}

impl CpuEngine {
    pub fn new(e: u32) -> CpuEngine {
        assert!(e & 1 == 1, "exponent must be odd, got {}", e);
        CpuEngine {
            e,
            m: mersenne::mersenne(e),
        }
    }

    fn pow_h(&self, base: &Integer, h: u64) -> Result<Integer> {
        base.clone()
            .pow_mod(&Integer::from(h), &self.m)
            .map_err(|_| anyhow!("pow_mod failed for exponent {}", h))
    }
}

impl ResidueEngine for CpuEngine {
    type Buf = Integer;

    fn exp_mul(&mut self, a: &Words, h: u64, b: &Words, square_b: bool) -> Result<Words> {
        let mut b_val = b.to_integer();
        if square_b {
            b_val.square_mut();
            b_val %= &self.m;
        }
        let mut r = self.pow_h(&a.to_integer(), h)?;
        r *= &b_val;
        r %= &self.m;
        Ok(Words::from_integer(self.e, &r))
    }

    fn exp_exp2(&mut self, a: &Words, n: u32) -> Result<Words> {
        let mut v = a.to_integer();
        for _ in 0..n {
            v.square_mut();
            v %= &self.m;
        }
        Ok(Words::from_integer(self.e, &v))
    }

    fn make_buf_vector(&mut self, power: u32) -> Result<Vec<Integer>> {
        Ok(vec![Integer::new(); power as usize + 1])
    }

    fn write_in(&mut self, buf: &mut Integer, words: &Words) -> Result<()> {
        *buf = words.to_integer();
        Ok(())
    }

    fn exp_mul_buf(&mut self, a: &mut Integer, h: u64, b: &Integer) -> Result<()> {
        let mut r = self.pow_h(a, h)?;
        r *= b;
        r %= &self.m;
        *a = r;
        Ok(())
    }

    fn read_and_compress(&mut self, buf: &Integer) -> Result<Words> {
        let mut v = buf.clone();
        v %= &self.m;
        if v < 0u32 {
            v += &self.m;
        }
        Ok(Words::from_integer(self.e, &v))
    }
}
