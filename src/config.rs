//! Per-instance configuration, stored as TOML next to the work files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::proof_set::ProofSet;

/// Settings shared by the worktodo layer and the proof subsystem.
///
/// Multiple worker instances may point at the same `master_dir`; everything
/// else is per instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the local worktodo and the per-instance residue root.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Directory of the shared `worktodo.txt`, when pulling from one.
    #[serde(default)]
    pub master_dir: Option<PathBuf>,
    /// Instance index, distinguishing workers on the same machine.
    #[serde(default)]
    pub instance: u32,
    /// Fixed proof power; unset means the per-exponent policy choice.
    #[serde(default)]
    pub proof_power: Option<u32>,
    /// Where finished proof files land.
    #[serde(default = "default_proof_result_dir")]
    pub proof_result_dir: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_proof_result_dir() -> PathBuf {
    PathBuf::from("proofs")
}

impl Default for Config {
    fn default() -> Config {
        Config {
            work_dir: default_work_dir(),
            master_dir: None,
            instance: 0,
            proof_power: None,
            proof_result_dir: default_proof_result_dir(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("writing config {}", path.display()))
    }

    /// The local worktodo file: `worktodo-<instance>.txt`.
    pub fn work_file(&self) -> PathBuf {
        self.work_dir.join(format!("worktodo-{}.txt", self.instance))
    }

    /// Root of this instance's checkpoint residues; `ProofSet` puts an
    /// exponent's files under `<root>/<E>/proof`.
    pub fn proof_root(&self) -> PathBuf {
        self.work_dir.join(format!("worker-{}", self.instance))
    }

    /// Proof power to use for an exponent: the configured override, else
    /// the policy choice.
    pub fn proof_power_for(&self, e: u32) -> u32 {
        self.proof_power.unwrap_or_else(|| ProofSet::best_power(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.work_file(), PathBuf::from("./worktodo-0.txt"));
        assert_eq!(cfg.proof_root(), PathBuf::from("./worker-0"));
        assert_eq!(cfg.proof_power_for(60_000_000), 10);
    }

    #[test]
    fn explicit_power_overrides_policy() {
        let cfg = Config {
            proof_power: Some(8),
            ..Config::default()
        };
        assert_eq!(cfg.proof_power_for(60_000_000), 8);
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config {
            work_dir: PathBuf::from("/var/lib/worker"),
            master_dir: Some(PathBuf::from("/srv/shared")),
            instance: 3,
            proof_power: Some(9),
            proof_result_dir: PathBuf::from("out"),
        };
        cfg.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.instance, 3);
        assert_eq!(loaded.master_dir, Some(PathBuf::from("/srv/shared")));
        assert_eq!(loaded.proof_power, Some(9));
        assert_eq!(loaded.work_file(), PathBuf::from("/var/lib/worker/worktodo-3.txt"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str("instance = 2\n").unwrap();
        assert_eq!(cfg.instance, 2);
        assert_eq!(cfg.proof_result_dir, PathBuf::from("proofs"));
        assert!(cfg.master_dir.is_none());
    }
}
