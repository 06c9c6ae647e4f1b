//! # Worktodo — Assignment Intake and Shared-File Coordination
//!
//! Parses assignment lines, picks the best task from a file, and moves
//! assignments one at a time from a shared `worktodo.txt` to a
//! per-instance `worktodo-<N>.txt` without file locking.
//!
//! ## Recognized lines
//!
//! ```text
//! PRP=<AID32hex>,1,2,<E>,-1,<howFarFactored>,<testsSaved>[,"<f1,f2,...>"]
//! PRPDC=<same as PRP>
//! Test=<AID>,<E>,<howFar>,<testsSaved>
//! DoubleCheck=<same as Test>
//! Cert=<AID>,1,2,<E>,-1,<squarings>
//! ```
//!
//! ## The move protocol
//!
//! Acquiring a task from the shared worktodo must be atomic enough that two
//! instances never run the same assignment. Instead of a lock:
//!
//! 1. read the shared file's size
//! 2. pick the best task from the shared file
//! 3. append its line to the local worktodo
//! 4. rewrite the shared file without the line into a temp file
//! 5. at commit, compare the shared file's size against step 1; on a
//!    mismatch, drop the temp file, remove the line from the local
//!    worktodo again, and retry once
//!
//! The size comparison is a change-detection heuristic, not a lock: it
//! misses same-size edits, so every writer must only append or delete
//! whole lines. After two failed attempts the call gives up and reports no
//! task; operators running many instances against one shared file should
//! expect the occasional benign miss.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::mersenne;
use crate::task::{Kind, Task};

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_u64(s: &str) -> u64 {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().unwrap_or(0)
    } else {
        0
    }
}

/// Comma split that keeps balanced double-quoted substrings intact, so a
/// quoted factor list stays one field.
fn split_fields(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// The trailing field of a cofactor PRP line: a double-quoted,
/// comma-separated factor list.
fn parse_quoted_factors(field: &str) -> Option<Vec<String>> {
    let inner = field.strip_prefix('"')?.strip_suffix('"')?;
    let factors: Vec<String> = inner.split(',').map(str::to_string).collect();
    if factors.iter().any(|f| f.is_empty()) {
        return None;
    }
    Some(factors)
}

/// Parse one worktodo line. Blank lines and `#` comments yield nothing
/// silently; anything else unrecognized is logged and skipped.
pub fn parse_line(raw: &str) -> Option<Task> {
    let line = raw.trim_end_matches(['\r', '\n']);
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let top: Vec<&str> = line.split('=').collect();
    let (kind, rest) = match top.as_slice() {
        [kind, rest] => (*kind, *rest),
        _ => ("", ""),
    };

    let is_prp = kind == "PRP" || kind == "PRPDC";
    let is_ll = kind == "Test" || kind == "DoubleCheck";
    let is_cert = kind == "Cert";

    if is_prp || is_ll {
        let mut parts = split_fields(rest);
        if parts.first().is_some_and(|p| p == "N/A" || p.is_empty()) {
            parts.remove(0);
        }

        let mut aid = String::new();
        if parts.first().is_some_and(|p| p.len() == 32 && is_hex(p)) {
            aid = parts.remove(0);
        }

        let exp_field = if parts.len() >= 4 && parts[0] == "1" && parts[1] == "2" && parts[3] == "-1"
        {
            parts[2].clone()
        } else {
            parts.first().cloned().unwrap_or_default()
        };

        let exp = parse_u64(&exp_field);
        if exp > 1000 && exp <= u32::MAX as u64 {
            let exponent = exp as u32;
            let mut task = Task::new(
                if is_prp { Kind::Prp } else { Kind::Ll },
                exponent,
                aid,
                line.to_string(),
                0,
            );

            // A PRP line with a trailing quoted factor list is a cofactor
            // test; a bad factor rejects the assignment rather than
            // silently downgrading it to a full-Mersenne PRP.
            if is_prp && parts.len() >= 7 {
                let Some(factors) = parse_quoted_factors(parts.last().unwrap()) else {
                    warn!(line, "cofactor PRP has malformed factor list");
                    return None;
                };
                if !mersenne::validate_known_factors(exponent, &factors) {
                    warn!(line, "cofactor PRP rejected: invalid known factors");
                    return None;
                }
                task.known_factors = factors;
                task.residue_type = 5;
            }
            return Some(task);
        }
    }

    if is_cert {
        let mut parts = split_fields(rest);
        if parts.first().is_some_and(|p| p.len() == 32 && is_hex(p)) {
            let aid = parts.remove(0);
            if parts.len() == 5 && parts[0] == "1" && parts[1] == "2" && parts[3] == "-1" {
                let exp = parse_u64(&parts[2]);
                let squarings = parse_u64(&parts[4]);
                if exp > 1000 && exp <= u32::MAX as u64 && squarings > 100 {
                    return Some(Task::new(
                        Kind::Cert,
                        exp as u32,
                        aid,
                        line.to_string(),
                        squarings as u32,
                    ));
                }
            }
        }
    }

    warn!(line, "worktodo line ignored");
    None
}

/// Best task in a file: the smallest-exponent CERT if any, otherwise the
/// smallest-exponent PRP/LL. First occurrence wins ties.
pub fn best_task(path: &Path) -> Option<Task> {
    let content = fs::read_to_string(path).ok()?;
    let mut best: Option<Task> = None;
    for line in content.lines() {
        if let Some(task) = parse_line(line) {
            let better = match &best {
                None => true,
                Some(b) => {
                    (b.kind != Kind::Cert && task.kind == Kind::Cert)
                        || ((b.kind != Kind::Cert || task.kind == Kind::Cert)
                            && task.exponent < b.exponent)
                }
            };
            if better {
                best = Some(task);
            }
        }
    }
    best
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}

/// Rewrite `path` omitting the first line equal to `line`. With
/// `expected_size`, the rewrite only commits if the file's size at commit
/// time still matches; otherwise nothing is written. Returns whether the
/// line was removed.
pub fn delete_line(path: &Path, line: &str, expected_size: Option<u64>) -> bool {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return false,
    };

    let mut removed = false;
    let mut kept = String::with_capacity(content.len());
    for l in content.lines() {
        if !removed && l == line {
            removed = true;
            continue;
        }
        kept.push_str(l);
        kept.push('\n');
    }
    if !removed {
        warn!(file = %path.display(), line, "line to delete not found");
        return false;
    }

    let tmp = path.with_extension("tmp");
    if fs::write(&tmp, &kept).is_err() {
        return false;
    }

    if let Some(expected) = expected_size {
        let now = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if now != expected {
            let _ = fs::remove_file(&tmp);
            return false;
        }
    }

    fs::rename(&tmp, path).is_ok()
}

/// Fetch the next task for this instance: the local worktodo first, then
/// the shared worktodo via the move protocol (at most two attempts).
pub fn get_task(cfg: &Config) -> Option<Task> {
    let local = cfg.work_file();
    if let Some(task) = best_task(&local) {
        return Some(task);
    }

    let master = cfg.master_dir.as_ref()?;
    let shared = master.join("worktodo.txt");

    for _attempt in 0..2 {
        let initial_size = fs::metadata(&shared).map(|m| m.len()).unwrap_or(0);
        if initial_size == 0 {
            return None;
        }

        let task = best_task(&shared)?;

        if let Err(err) = append_line(&local, &task.line) {
            warn!(file = %local.display(), %err, "cannot append to local worktodo");
            return None;
        }

        if delete_line(&shared, &task.line, Some(initial_size)) {
            info!(exponent = task.exponent, instance = cfg.instance, "task acquired");
            return Some(task);
        }

        // The shared file changed under us: undo the local append and retry.
        let undone =
            delete_line(&local, &task.line, None) || delete_line(&local, &task.line, None);
        if !undone {
            warn!(file = %local.display(), "cannot roll back local worktodo");
            return None;
        }
    }

    warn!(file = %shared.display(), "could not extract a task from shared worktodo");
    None
}

/// Drop a finished task's line from the local worktodo. Tasks that did not
/// originate in a worktodo file have nothing to delete.
pub fn delete_task(cfg: &Config, task: &Task) -> bool {
    if task.line.is_empty() {
        return true;
    }
    delete_line(&cfg.work_file(), &task.line, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn cfg_in(dir: &Path, instance: u32, master: Option<PathBuf>) -> Config {
        Config {
            work_dir: dir.to_path_buf(),
            master_dir: master,
            instance,
            ..Config::default()
        }
    }

    // ---- line parsing ----

    #[test]
    fn parse_prp_line() {
        let line = "PRP=FEEE9DCD59A0855711265C1165C4C693,1,2,124647911,-1,77,0";
        let task = parse_line(line).unwrap();
        assert_eq!(task.kind, Kind::Prp);
        assert_eq!(task.exponent, 124647911);
        assert_eq!(task.aid, "FEEE9DCD59A0855711265C1165C4C693");
        assert_eq!(task.residue_type, 1);
        assert_eq!(task.line, line);
    }

    #[test]
    fn parse_prpdc_and_doublecheck() {
        let t = parse_line("PRPDC=FEEE9DCD59A0855711265C1165C4C693,1,2,124647911,-1,77,0").unwrap();
        assert_eq!(t.kind, Kind::Prp);
        let t = parse_line("DoubleCheck=E0F583710728343C61643028FBDBA0FB,70198703,75,1").unwrap();
        assert_eq!(t.kind, Kind::Ll);
        assert_eq!(t.exponent, 70198703);
    }

    #[test]
    fn parse_test_line_without_aid() {
        let t = parse_line("Test=N/A,70198703,75,1").unwrap();
        assert_eq!(t.kind, Kind::Ll);
        assert_eq!(t.exponent, 70198703);
        assert!(t.aid.is_empty());
    }

    #[test]
    fn parse_prp_without_aid() {
        let t = parse_line("PRP=1,2,77936867,-1,76,0").unwrap();
        assert_eq!(t.exponent, 77936867);
        assert!(t.aid.is_empty());
    }

    #[test]
    fn parse_cofactor_prp() {
        let line = "PRP=D01D05DD3394CFF8887960999DC0D9EE,1,2,18178631,-1,99,2,\"36357263,145429049,8411216206439\"";
        let task = parse_line(line).unwrap();
        assert_eq!(task.kind, Kind::Prp);
        assert_eq!(task.exponent, 18178631);
        assert_eq!(task.residue_type, 5);
        assert!(task.is_cofactor());
        assert_eq!(
            task.known_factors,
            ["36357263", "145429049", "8411216206439"]
        );
        assert_eq!(task.line, line);
    }

    #[test]
    fn cofactor_with_bad_factor_rejected_not_downgraded() {
        // 90 does not divide 2^18178631-1; the whole line must be dropped
        let line =
            "PRP=D01D05DD3394CFF8887960999DC0D9EE,1,2,18178631,-1,99,2,\"36357263,90\"";
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn cofactor_with_unquoted_list_rejected() {
        let line = "PRP=D01D05DD3394CFF8887960999DC0D9EE,1,2,18178631,-1,99,2,36357263";
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn parse_cert_line() {
        let line = "Cert=B2EE67DC0A514753E488794C9DD6F6BD,1,2,82997591,-1,162105";
        let task = parse_line(line).unwrap();
        assert_eq!(task.kind, Kind::Cert);
        assert_eq!(task.exponent, 82997591);
        assert_eq!(task.squarings, 162105);
    }

    #[test]
    fn cert_requires_full_shape() {
        // missing the 1,2,...,-1 frame
        assert!(parse_line("Cert=B2EE67DC0A514753E488794C9DD6F6BD,82997591,162105").is_none());
        // squarings too small
        assert!(parse_line("Cert=B2EE67DC0A514753E488794C9DD6F6BD,1,2,82997591,-1,100").is_none());
        // no AID
        assert!(parse_line("Cert=1,2,82997591,-1,162105").is_none());
    }

    #[test]
    fn small_exponents_and_junk_ignored() {
        assert!(parse_line("PRP=abc,1,2,999,-1,77,0").is_none());
        assert!(parse_line("Test=N/A,1000,75,1").is_none());
        assert!(parse_line("# comment").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line("Fact=12345").is_none());
        assert!(parse_line("PRP=notanumber").is_none());
    }

    #[test]
    fn blank_and_comment_lines_are_silent() {
        assert!(parse_line("\n").is_none());
        assert!(parse_line("# PRP=FEEE9DCD59A0855711265C1165C4C693,1,2,124647911,-1,77,0").is_none());
    }

    // ---- best task selection ----

    #[test]
    fn best_task_prefers_cert_over_smaller_prp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worktodo.txt");
        fs::write(
            &path,
            "PRP=FEEE9DCD59A0855711265C1165C4C693,1,2,100000007,-1,77,0\n\
             Cert=B2EE67DC0A514753E488794C9DD6F6BD,1,2,82997591,-1,162105\n",
        )
        .unwrap();
        let best = best_task(&path).unwrap();
        assert_eq!(best.kind, Kind::Cert);
        assert_eq!(best.exponent, 82997591);
    }

    #[test]
    fn best_task_smallest_exponent_first_occurrence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worktodo.txt");
        fs::write(
            &path,
            "PRP=N/A,1,2,100000007,-1,77,0\n\
             Test=N/A,70198703,75,1\n\
             PRP=N/A,1,2,70198703,-1,77,0\n",
        )
        .unwrap();
        let best = best_task(&path).unwrap();
        // The LL line comes first among the two 70198703 entries
        assert_eq!(best.kind, Kind::Ll);
        assert_eq!(best.exponent, 70198703);
    }

    #[test]
    fn best_task_skips_unparseable_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worktodo.txt");
        fs::write(&path, "# header\ngarbage\nPRP=N/A,1,2,77936867,-1,76,0\n").unwrap();
        assert_eq!(best_task(&path).unwrap().exponent, 77936867);
    }

    // ---- delete_line ----

    #[test]
    fn delete_line_removes_first_match_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "a\nb\na\n").unwrap();
        assert!(delete_line(&path, "a", None));
        assert_eq!(fs::read_to_string(&path).unwrap(), "b\na\n");
    }

    #[test]
    fn delete_line_missing_line_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "a\n").unwrap();
        assert!(!delete_line(&path, "z", None));
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\n");
    }

    #[test]
    fn delete_line_aborts_on_size_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, "a\nb\n").unwrap();
        // claim the size was different at sampling time
        assert!(!delete_line(&path, "a", Some(3)));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "a\nb\n",
            "no write may happen on a size mismatch"
        );
        // correct expected size commits
        assert!(delete_line(&path, "a", Some(4)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "b\n");
    }

    // ---- get_task / delete_task flow ----

    #[test]
    fn local_worktodo_takes_priority() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg_in(dir.path(), 1, None);
        fs::write(cfg.work_file(), "PRP=N/A,1,2,77936867,-1,76,0\n").unwrap();
        let task = get_task(&cfg).unwrap();
        assert_eq!(task.exponent, 77936867);
        // the local file is untouched until delete_task
        assert!(fs::read_to_string(cfg.work_file()).unwrap().contains("77936867"));
        assert!(delete_task(&cfg, &task));
        assert_eq!(fs::read_to_string(cfg.work_file()).unwrap(), "");
    }

    #[test]
    fn moves_one_task_from_shared_to_local() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("master");
        fs::create_dir_all(&master).unwrap();
        let shared = master.join("worktodo.txt");
        fs::write(
            &shared,
            "PRP=N/A,1,2,100000007,-1,77,0\nPRP=N/A,1,2,77936867,-1,76,0\n",
        )
        .unwrap();

        let cfg = cfg_in(dir.path(), 0, Some(master.clone()));
        let task = get_task(&cfg).unwrap();
        assert_eq!(task.exponent, 77936867);

        // moved: present locally, gone from the shared file
        assert!(fs::read_to_string(cfg.work_file()).unwrap().contains(&task.line));
        let shared_left = fs::read_to_string(&shared).unwrap();
        assert!(!shared_left.contains("77936867"));
        assert!(shared_left.contains("100000007"));
    }

    #[test]
    fn one_of_two_instances_wins_a_single_assignment() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("master");
        fs::create_dir_all(&master).unwrap();
        fs::write(master.join("worktodo.txt"), "PRP=N/A,1,2,77936867,-1,76,0\n").unwrap();

        let cfg0 = cfg_in(dir.path(), 0, Some(master.clone()));
        let cfg1 = cfg_in(dir.path(), 1, Some(master.clone()));
        let first = get_task(&cfg0);
        let second = get_task(&cfg1);
        assert!(first.is_some());
        assert!(second.is_none(), "only one instance may extract the task");
        assert_eq!(fs::read_to_string(master.join("worktodo.txt")).unwrap(), "");
    }

    #[test]
    fn empty_everything_yields_no_task() {
        let dir = TempDir::new().unwrap();
        let master = dir.path().join("master");
        fs::create_dir_all(&master).unwrap();
        fs::write(master.join("worktodo.txt"), "").unwrap();
        let cfg = cfg_in(dir.path(), 0, Some(master));
        assert!(get_task(&cfg).is_none());

        let lonely = cfg_in(dir.path(), 2, None);
        assert!(get_task(&lonely).is_none());
    }

    #[test]
    fn delete_task_without_line_is_trivial() {
        let dir = TempDir::new().unwrap();
        let cfg = cfg_in(dir.path(), 0, None);
        assert!(delete_task(&cfg, &Task::prp(77936867)));
    }
}
