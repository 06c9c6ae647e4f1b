//! Codec for Mersenne-number strings and validation of known factors.
//!
//! A plain PRP assignment is written `M124647911`; a cofactor assignment
//! carries its known factors inline, e.g.
//! `M18178631/36357263/145429049/8411216206439`. The factor list order is
//! preserved through every encode/decode round trip because the proof file
//! header reproduces it verbatim.

use anyhow::{anyhow, bail, Result};
use rayon::prelude::*;
use rug::Integer;
use tracing::warn;

/// 2^E − 1.
pub fn mersenne(e: u32) -> Integer {
    (Integer::from(1u32) << e) - 1u32
}

/// Render `M<E>` with `/factor` appended per known factor.
pub fn to_string(e: u32, known_factors: &[String]) -> String {
    let mut result = format!("M{}", e);
    for factor in known_factors {
        result.push('/');
        result.push_str(factor);
    }
    result
}

/// Parse `M<E>[/<factor>]*`. Empty factor tokens are skipped; anything
/// non-numeric or non-positive is a format error naming the token.
pub fn from_string(number: &str) -> Result<(u32, Vec<String>)> {
    let rest = number
        .strip_prefix('M')
        .ok_or_else(|| anyhow!("invalid Mersenne number '{}': must start with M", number))?;

    let mut parts = rest.split('/');
    let exp_str = parts.next().unwrap_or("");
    if exp_str.is_empty() || !exp_str.bytes().all(|b| b.is_ascii_digit()) {
        bail!("invalid exponent '{}'", exp_str);
    }
    let exponent: u32 = exp_str
        .parse()
        .map_err(|_| anyhow!("invalid exponent '{}'", exp_str))?;

    let mut known_factors = Vec::new();
    for part in parts {
        if part.is_empty() {
            continue;
        }
        let value = Integer::parse(part)
            .map(Integer::from)
            .map_err(|_| anyhow!("invalid factor '{}': not numeric", part))?;
        if value <= 0u32 {
            bail!("invalid factor '{}': not positive", part);
        }
        known_factors.push(part.to_string());
    }
    Ok((exponent, known_factors))
}

/// Check that every known factor exceeds 1 and divides 2^E−1 exactly.
///
/// 2^E−1 is computed once and shared; the per-factor divisions run in
/// parallel. Failures name the offending factor.
pub fn validate_known_factors(e: u32, known_factors: &[String]) -> bool {
    if known_factors.is_empty() {
        return true;
    }
    let m = mersenne(e);
    known_factors.par_iter().all(|factor| {
        let value = match Integer::parse(factor.as_str()).map(Integer::from) {
            Ok(v) => v,
            Err(_) => {
                warn!(factor = %factor, exponent = e, "known factor is not numeric");
                return false;
            }
        };
        if value <= 1u32 {
            warn!(factor = %factor, exponent = e, "known factor must exceed 1");
            return false;
        }
        if !m.is_divisible(&value) {
            warn!(factor = %factor, exponent = e, "factor does not divide 2^E-1");
            return false;
        }
        true
    })
}
