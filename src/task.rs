use std::path::PathBuf;

/// What a worktodo assignment asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Probable-prime test, base 3, residue type 1 (or 5 on a cofactor).
    Prp,
    /// Lucas-Lehmer test or double-check.
    Ll,
    /// Certification: a bounded number of squarings from a starting residue.
    Cert,
    /// Re-verify an existing proof file.
    Verify,
}

/// One parsed assignment. `line` keeps the verbatim worktodo text because
/// deletion after completion matches on the exact string.
#[derive(Debug, Clone)]
pub struct Task {
    pub kind: Kind,
    pub exponent: u32,
    /// 32-hex assignment id from the server; empty for self-issued work.
    pub aid: String,
    pub line: String,
    /// Squaring count, CERT only.
    pub squarings: u32,
    /// Known factors, PRP-on-cofactor only.
    pub known_factors: Vec<String>,
    /// 1 for a full Mersenne PRP, 5 for a cofactor PRP.
    pub residue_type: u32,
    /// Proof file to check, Verify only.
    pub verify_path: Option<PathBuf>,
}

impl Task {
    pub fn new(kind: Kind, exponent: u32, aid: String, line: String, squarings: u32) -> Task {
        Task {
            kind,
            exponent,
            aid,
            line,
            squarings,
            known_factors: Vec::new(),
            residue_type: 1,
            verify_path: None,
        }
    }

    /// A self-issued PRP test, not backed by a worktodo line.
    pub fn prp(exponent: u32) -> Task {
        Task::new(Kind::Prp, exponent, String::new(), String::new(), 0)
    }

    /// A self-issued LL test.
    pub fn ll(exponent: u32) -> Task {
        Task::new(Kind::Ll, exponent, String::new(), String::new(), 0)
    }

    /// Re-verification of a proof file on disk.
    pub fn verify(path: PathBuf) -> Task {
        let mut task = Task::new(Kind::Verify, 0, String::new(), String::new(), 0);
        task.verify_path = Some(path);
        task
    }

    pub fn is_cofactor(&self) -> bool {
        !self.known_factors.is_empty()
    }
}
