//! # Proof — Compact Verifiable PRP Certificates
//!
//! A PRP proof in the Pietrzak style: from the final residue B = 3^(2^E)
//! mod 2^E−1 and one middle residue per halving round, a verifier checks
//! the whole E-squaring computation in roughly E/2^power squarings instead
//! of E. Each round folds the claim "A^(2^span) = B" in half around the
//! middle residue M, with a challenge scalar h drawn from a SHA3 hash
//! chain over (B, M₀, …, Mᵢ):
//!
//! ```text
//!   B ← M^h · B^(2 if span odd else 1)
//!   A ← A^h · M
//!   span ← ⌈span/2⌉
//! ```
//!
//! After the last round the verifier spends the remaining span squarings
//! on A and accepts iff A == B. The candidate is a probable prime iff
//! B == 9 (the PRP-3 convention; 9 = 3², the residue a prime exponent
//! produces). That check is retained unchanged for cofactor runs.
//!
//! ## File format (version 2, little-endian)
//!
//! ```text
//! PRP PROOF\n
//! VERSION=2\n
//! HASHSIZE=64\n
//! POWER=<p>\n
//! NUMBER=M<E>[/factor]*\n
//! <B: ⌈E/8⌉ bytes> <middle[0]> … <middle[p-1]>
//! ```
//!
//! ## References
//!
//! - K. Pietrzak, "Simple Verifiable Delay Functions", ITCS 2019.
//! - GIMPS, "PRP proofs and certification" — the deployed scheme this
//!   format interoperates with.

use anyhow::{anyhow, ensure, Context, Result};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::engine::ResidueEngine;
use crate::hashing;
use crate::mersenne;
use crate::words::Words;

/// Header summary plus whole-file MD5, for reporting a proof upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofInfo {
    pub power: u32,
    pub exp: u32,
    pub known_factors: Vec<String>,
    pub md5: String,
}

/// Outcome of a verification run. Mismatches are values, not errors; only
/// engine failures propagate as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofCheck {
    /// The proof chain closed; the primality outcome is the recorded one.
    Valid { is_prime: bool },
    /// A challenge word disagreed with the caller-supplied chain.
    HashMismatch { round: u32, expected: u64, got: u64 },
    /// The final equality A == B failed: the proof is rejected.
    ResidueMismatch { a_res64: u64, b_res64: u64 },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Proof {
    pub e: u32,
    pub known_factors: Vec<String>,
    pub b: Words,
    pub middles: Vec<Words>,
}

impl Proof {
    pub fn power(&self) -> u32 {
        self.middles.len() as u32
    }

    /// Canonical file name under a proof directory: `<E>-<power>.proof`.
    pub fn file_name(&self, proof_dir: &Path) -> PathBuf {
        proof_dir.join(format!("{}-{}.proof", self.e, self.power()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let number = mersenne::to_string(self.e, &self.known_factors);
        let n_bytes = Words::byte_count(self.e);
        let mut out = Vec::with_capacity(64 + n_bytes * (self.middles.len() + 1));
        out.extend_from_slice(header(self.power(), &number).as_bytes());
        out.extend_from_slice(&self.b.to_le_bytes()[..n_bytes]);
        for middle in &self.middles {
            out.extend_from_slice(&middle.to_le_bytes()[..n_bytes]);
        }
        fs::write(path, out).with_context(|| format!("writing proof file {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Proof> {
        let data =
            fs::read(path).with_context(|| format!("reading proof file {}", path.display()))?;
        let (power, e, known_factors, body_start) = parse_header(&data)
            .with_context(|| format!("proof file {} has invalid header", path.display()))?;

        let n_bytes = Words::byte_count(e);
        let expected = body_start + n_bytes * (power as usize + 1);
        ensure!(
            data.len() == expected,
            "proof file {} is {} bytes, expected {}",
            path.display(),
            data.len(),
            expected
        );

        let mut residues = data[body_start..]
            .chunks_exact(n_bytes)
            .map(|chunk| Words::from_le_bytes(e, chunk));
        let b = residues.next().unwrap();
        let middles = residues.collect();
        Ok(Proof {
            e,
            known_factors,
            b,
            middles,
        })
    }

    /// Re-run the halving check against the compute engine. When
    /// `expected_hashes` is non-empty (as returned by proof construction),
    /// each round's challenge word is compared against it first.
    pub fn verify<G: ResidueEngine>(
        &self,
        gpu: &mut G,
        expected_hashes: &[u64],
    ) -> Result<ProofCheck> {
        let power = self.power();
        ensure!(power > 0, "proof for M{} has no middle residues", self.e);

        let is_prime = self.b == Words::make(self.e, 9);

        let mut a = Words::make(self.e, 3);
        let mut b = self.b.clone();
        let mut hash = hashing::hash_words(self.e, &b);

        let mut span = self.e;
        for (i, middle) in self.middles.iter().enumerate() {
            hash = hashing::hash_words_chained(self.e, hash, middle);
            let h = hash[0];

            if let Some(&expected) = expected_hashes.get(i) {
                if expected != h {
                    warn!(
                        round = i,
                        expected = format_args!("{:016x}", expected),
                        got = format_args!("{:016x}", h),
                        "proof hash chain diverged"
                    );
                    return Ok(ProofCheck::HashMismatch {
                        round: i as u32,
                        expected,
                        got: h,
                    });
                }
            }

            let square_b = span & 1 == 1;
            b = gpu.exp_mul(middle, h, &b, square_b)?;
            a = gpu.exp_mul(&a, h, middle, false)?;
            span = (span + 1) / 2;
        }

        info!(iterations = span, "proof verification: final exponentiation");
        a = gpu.exp_exp2(&a, span)?;

        if a == b {
            info!(
                exponent = self.e,
                probable_prime = is_prime,
                "proof verified"
            );
            Ok(ProofCheck::Valid { is_prime })
        } else {
            warn!(
                a = format_args!("{:016x}", a.res64()),
                b = format_args!("{:016x}", b.res64()),
                "proof invalid"
            );
            Ok(ProofCheck::ResidueMismatch {
                a_res64: a.res64(),
                b_res64: b.res64(),
            })
        }
    }
}

impl std::fmt::Debug for Proof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Proof(M{}, power {}, B res64 {:016x})",
            self.e,
            self.power(),
            self.b.res64()
        )
    }
}

fn header(power: u32, number: &str) -> String {
    format!(
        "PRP PROOF\nVERSION=2\nHASHSIZE=64\nPOWER={}\nNUMBER={}\n",
        power, number
    )
}

/// Strict header parse: all five lines, exact text. Returns (power, E,
/// factors, offset of the residue data).
fn parse_header(data: &[u8]) -> Result<(u32, u32, Vec<String>, usize)> {
    let mut lines = Vec::with_capacity(5);
    let mut start = 0usize;
    for _ in 0..5 {
        let nl = data[start..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| anyhow!("truncated header"))?;
        let line = std::str::from_utf8(&data[start..start + nl])
            .map_err(|_| anyhow!("header is not valid text"))?;
        lines.push(line);
        start += nl + 1;
    }

    ensure!(lines[0] == "PRP PROOF", "bad magic '{}'", lines[0]);
    ensure!(lines[1] == "VERSION=2", "unsupported version '{}'", lines[1]);
    ensure!(lines[2] == "HASHSIZE=64", "unsupported hash size '{}'", lines[2]);
    let power: u32 = lines[3]
        .strip_prefix("POWER=")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("bad power line '{}'", lines[3]))?;
    let number = lines[4]
        .strip_prefix("NUMBER=")
        .ok_or_else(|| anyhow!("bad number line '{}'", lines[4]))?;
    let (e, known_factors) = mersenne::from_string(number)?;
    ensure!((1..=12).contains(&power), "power {} out of range", power);
    Ok((power, e, known_factors, start))
}

/// Header summary and MD5 of an existing proof file, without loading the
/// residues into memory.
pub fn get_info(path: &Path) -> Result<ProofInfo> {
    let md5 = hashing::file_hash(path)?;
    let mut head = vec![0u8; 4096];
    let mut file =
        fs::File::open(path).with_context(|| format!("opening proof file {}", path.display()))?;
    let mut filled = 0usize;
    loop {
        let n = file
            .read(&mut head[filled..])
            .with_context(|| format!("reading {}", path.display()))?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == head.len() {
            break;
        }
    }
    head.truncate(filled);
    let (power, exp, known_factors, _) = parse_header(&head)
        .with_context(|| format!("proof file {} has invalid header", path.display()))?;
    Ok(ProofInfo {
        power,
        exp,
        known_factors,
        md5,
    })
}
