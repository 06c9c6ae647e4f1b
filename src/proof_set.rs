//! # ProofSet — Checkpoint Schedule and Residue Store
//!
//! Decides which PRP iteration indices are checkpointed for a given
//! (exponent, power), persists the residues on disk, validates coverage
//! after a restart, and folds the stored residues into a [`Proof`].
//!
//! ## The point lattice
//!
//! The checkpoint set is a binary-subdivision lattice over (0, E]. Starting
//! from the set {0}, each of the `power` rounds adds `start + span` for the
//! current span, where span halves (rounding up) from ⌈E/2⌉. The element 0
//! is then replaced by E itself, giving exactly 2^power sorted points with
//! E always last. Verification cost for the resulting proof shrinks as
//! E/2^power while proof size grows linearly in power.
//!
//! ## Durability
//!
//! Residues are written through the CRC-checked codec and survive until the
//! caller clears them; after an interruption [`ProofSet::effective_power`]
//! probes which power is still fully backed by intact files.

use anyhow::{bail, Context, Result};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::engine::ResidueEngine;
use crate::hashing;
use crate::proof::Proof;
use crate::residue_io;
use crate::words::Words;

pub struct ProofSet {
    pub e: u32,
    pub power: u32,
    pub known_factors: Vec<String>,
    proof_dir: PathBuf,
    /// Sorted points plus a `u32::MAX` guard, so `next` needs no bounds branch.
    points: Vec<u32>,
    cache: Cell<usize>,
}

impl ProofSet {
    /// Residue directory for an exponent under a per-instance root.
    pub fn proof_dir(root: &Path, e: u32) -> PathBuf {
        root.join(e.to_string()).join("proof")
    }

    pub fn new(root: &Path, e: u32, known_factors: Vec<String>, power: u32) -> Result<ProofSet> {
        assert!(e & 1 == 1, "exponent must be odd, got {}", e);
        if power < 1 || power > 12 {
            bail!("invalid proof power: {}", power);
        }

        let proof_dir = Self::proof_dir(root, e);
        fs::create_dir_all(&proof_dir)
            .with_context(|| format!("creating proof directory {}", proof_dir.display()))?;

        let mut points = vec![0u32];
        let mut span = (e + 1) / 2;
        for _ in 0..power {
            let end = points.len();
            for i in 0..end {
                points.push(points[i] + span);
            }
            span = (span + 1) / 2;
        }

        assert_eq!(points.len(), 1 << power);
        assert_eq!(points[0], 0);

        points[0] = e;
        points.sort_unstable();

        assert_eq!(*points.last().unwrap(), e);
        for &p in &points {
            assert!(p <= e && Self::is_in_points(e, power, p));
        }

        points.push(u32::MAX);

        Ok(ProofSet {
            e,
            power,
            known_factors,
            proof_dir,
            points,
            cache: Cell::new(0),
        })
    }

    /// Membership test without materializing the point set: walk the spans,
    /// at each level passing the midpoint (recurse right) or hitting it.
    pub fn is_in_points(e: u32, power: u32, k: u32) -> bool {
        if k == e {
            return true;
        }
        let mut start = 0u32;
        let mut span = (e + 1) / 2;
        for _ in 0..power {
            debug_assert!(k >= start);
            if k > start + span {
                start += span;
            } else if k == start + span {
                return true;
            }
            span = (span + 1) / 2;
        }
        false
    }

    /// Policy power for an exponent: one more checkpoint level per fourfold
    /// growth in E, anchored at power 10 for E = 60M.
    pub fn best_power(e: u32) -> u32 {
        assert!(e > 0);
        let power = 10 + ((e as f64 / 60e6).log2() / 2.0).floor() as i64;
        power.max(2) as u32
    }

    /// Disk footprint of the 2^power residues, in GB, with 5% overhead.
    pub fn disk_usage_gb(e: u32, power: u32) -> f64 {
        if power == 0 {
            0.0
        } else {
            e as f64 * 2f64.powi(power as i32 - 33) * 1.05
        }
    }

    /// The greatest p ≤ `power` whose full point set up to `current_k` is
    /// intact on disk, or 0 if none is.
    pub fn effective_power(
        root: &Path,
        e: u32,
        known_factors: &[String],
        power: u32,
        current_k: u32,
    ) -> u32 {
        for p in (1..=power).rev() {
            match ProofSet::new(root, e, known_factors.to_vec(), p) {
                Ok(ps) if ps.is_valid_to(current_k) => return p,
                Ok(_) => {}
                Err(err) => {
                    warn!(exponent = e, power = p, %err, "cannot probe proof set");
                }
            }
        }
        0
    }

    /// Every proof point ≤ `limit_k` must be backed by an intact file: the
    /// largest one is fully loaded (CRC-checked), the rest are size-checked.
    /// Any failure, including a load error, reads as false.
    pub fn is_valid_to(&self, limit_k: u32) -> bool {
        let n = self.points.len() - 1; // exclude the guard
        let idx = self.points[..n].partition_point(|&p| p <= limit_k);
        if idx == 0 {
            return true;
        }
        if let Err(err) = self.load(self.points[idx - 1]) {
            warn!(exponent = self.e, k = self.points[idx - 1], %err, "proof residue invalid");
            return false;
        }
        self.points[..idx - 1].iter().all(|&k| self.file_exists(k))
    }

    fn file_exists(&self, k: u32) -> bool {
        fs::metadata(self.proof_dir.join(k.to_string()))
            .map(|meta| meta.len() == residue_io::checked_len(self.e))
            .unwrap_or(false)
    }

    /// Smallest point strictly greater than `k`; `u32::MAX` past the last.
    /// The cached index only moves forward while `k` advances monotonically.
    pub fn next(&self, k: u32) -> u32 {
        let mut i = self.cache.get();
        if self.points[i] <= k || (i > 0 && self.points[i - 1] > k) {
            i = self.points.partition_point(|&p| p <= k);
            self.cache.set(i);
        }
        self.points[i]
    }

    pub fn save(&self, k: u32, words: &Words) -> Result<()> {
        assert!(k > 0 && k <= self.e);
        assert!(Self::is_in_points(self.e, self.power, k));
        let path = self.proof_dir.join(k.to_string());
        residue_io::write_checked(&path, words)?;
        let readback = residue_io::read_checked(&path, self.e)?;
        assert!(
            readback == *words,
            "residue round-trip mismatch at point {} for exponent {}",
            k,
            self.e
        );
        Ok(())
    }

    pub fn load(&self, k: u32) -> Result<Words> {
        assert!(k > 0 && k <= self.e);
        assert!(Self::is_in_points(self.e, self.power, k));
        residue_io::read_checked(&self.proof_dir.join(k.to_string()), self.e)
    }

    /// Fold the 2^power stored residues into a proof.
    ///
    /// Round p combines 2^p leaves (the odd multiples of the stride through
    /// the point vector) into one middle residue. Leaves are pushed onto an
    /// explicit buffer stack; each trailing-one bit of the leaf index pops
    /// one combine `top-1 ← (top-1)^h · top`, with h drawn from the hash
    /// chain of the earlier rounds. Also returns the chain of challenge
    /// words, one per round, for callers that re-verify immediately.
    pub fn compute_proof<G: ResidueEngine>(&self, gpu: &mut G) -> Result<(Proof, Vec<u64>)> {
        let b = self.load(self.e)?;

        let mut middles: Vec<Words> = Vec::with_capacity(self.power as usize);
        let mut hashes: Vec<u64> = Vec::with_capacity(self.power as usize);
        let mut hash = hashing::hash_words(self.e, &b);

        let mut bufs = gpu.make_buf_vector(self.power)?;

        for p in 0..self.power {
            debug_assert_eq!(hashes.len(), p as usize);
            let mut top = 0usize;
            let s = 1u32 << (self.power - p - 1);
            for i in 0..(1u32 << p) {
                let w = self.load(self.points[(s * (2 * i + 1) - 1) as usize])?;
                gpu.write_in(&mut bufs[top], &w)?;
                top += 1;
                let mut bit = 0u32;
                while i & (1 << bit) != 0 {
                    debug_assert!(bit <= p - 1);
                    let h = hashes[(p - 1 - bit) as usize];
                    let (lo, hi) = bufs.split_at_mut(top - 1);
                    gpu.exp_mul_buf(&mut lo[top - 2], h, &hi[0])?;
                    top -= 1;
                    bit += 1;
                }
            }
            assert_eq!(top, 1);

            let middle = gpu.read_and_compress(&bufs[0])?;
            if middle.is_zero() {
                bail!(
                    "read ZERO during proof generation (exponent {}, round {})",
                    self.e,
                    p
                );
            }
            hash = hashing::hash_words_chained(self.e, hash, &middle);
            hashes.push(hash[0]);
            info!(
                round = p,
                middle = format_args!("{:016x}", middle.res64()),
                h = format_args!("{:016x}", hash[0]),
                "proof fold"
            );
            middles.push(middle);
        }

        let proof = Proof {
            e: self.e,
            known_factors: self.known_factors.clone(),
            b,
            middles,
        };
        Ok((proof, hashes))
    }
}
