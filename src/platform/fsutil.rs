//! Small filesystem utilities.

use globset::{Glob, GlobSet, GlobSetBuilder};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{PgoError, PgoResult};

/// Separators accepted between paths in one `--inputs` argument.
pub const INPUT_LIST_SEPARATORS: [char; 2] = [':', ','];

/// Splits delimiter-separated input lists into individual patterns.
pub fn split_input_list(specs: &[String]) -> Vec<String> {
    specs
        .iter()
        .flat_map(|list| list.split(INPUT_LIST_SEPARATORS))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expands plain paths and glob patterns to existing files, sorted and
/// deduplicated.
pub fn find_matching_files(patterns: &[String]) -> PgoResult<Vec<PathBuf>> {
    let globbed: Vec<String> = patterns
        .iter()
        .filter(|p| has_glob_meta(p))
        .cloned()
        .collect();
    let mut out = BTreeSet::new();

    // Direct file paths are taken as-is, even outside cwd.
    for pattern in patterns {
        if has_glob_meta(pattern) {
            continue;
        }
        let candidate = PathBuf::from(pattern);
        if candidate.is_file() {
            out.insert(candidate);
        } else {
            tracing::warn!("input {pattern:?} is not a file, skipping");
        }
    }

    if globbed.is_empty() {
        return Ok(out.into_iter().collect());
    }
    let set = compile_globset(&globbed)?;
    let cwd = std::env::current_dir()?;
    for root in walk_roots(&globbed) {
        for entry in WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !should_skip_dir(e.path()))
        {
            let entry = entry.map_err(|e| {
                let msg = e.to_string();
                PgoError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other(msg)),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let p = entry.path();
            let rel = p.strip_prefix(".").unwrap_or(p);
            let abs = cwd.join(rel);
            if set.is_match(rel) || set.is_match(&abs) {
                out.insert(rel.to_path_buf());
            }
        }
    }
    Ok(out.into_iter().collect())
}

fn walk_roots(patterns: &[String]) -> BTreeSet<PathBuf> {
    let mut roots = BTreeSet::new();
    for pattern in patterns {
        let prefix = pattern
            .split(['*', '?', '[', ']', '{', '}'])
            .next()
            .unwrap_or_default();
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            roots.insert(PathBuf::from("."));
            continue;
        }
        let p = PathBuf::from(trimmed);
        if p.is_dir() {
            roots.insert(p);
        } else {
            match p.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => {
                    roots.insert(parent.to_path_buf());
                }
                _ => {
                    roots.insert(PathBuf::from("."));
                }
            }
        }
    }
    roots
}

fn should_skip_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| matches!(name, ".git" | "target" | "node_modules"))
}

fn compile_globset(patterns: &[String]) -> PgoResult<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let g = Glob::new(p)
            .map_err(|e| PgoError::InvalidArgument(format!("invalid glob {p:?}: {e}")))?;
        b.add(g);
    }
    b.build()
        .map_err(|e| PgoError::InvalidArgument(format!("invalid globset: {e}")))
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', ']', '{', '}'])
}

/// Writes `bytes` next to `path` and renames it into place, so readers never
/// see a half-written profile.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> PgoResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| PgoError::InvalidArgument(format!("output {} has no file name", path.display())))?;
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
    std::fs::write(&tmp, bytes)?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pgoprof-fsutil-{name}-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn input_lists_split_on_both_separators() {
        let specs = vec!["a.ap:b.ap".to_string(), "c.ap, d.ap,".to_string()];
        assert_eq!(split_input_list(&specs), vec!["a.ap", "b.ap", "c.ap", "d.ap"]);
    }

    #[test]
    fn find_matching_files_accepts_absolute_file_path() {
        let root = temp_dir("abs-file");
        let profile = root.join("run.ap");
        std::fs::write(&profile, b"x").expect("write profile");
        let matches =
            find_matching_files(&[profile.to_string_lossy().to_string()]).expect("match files");
        assert_eq!(matches, vec![profile]);
    }

    #[test]
    fn find_matching_files_expands_globs() {
        let root = temp_dir("glob");
        for name in ["one.ap", "two.ap", "notes.txt"] {
            std::fs::write(root.join(name), b"x").expect("write");
        }
        let pattern = format!("{}/*.ap", root.display());
        let matches = find_matching_files(&[pattern]).expect("match files");
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|p| p.extension().is_some_and(|e| e == "ap")));
    }

    #[test]
    fn write_atomic_creates_parents_and_replaces() {
        let root = temp_dir("atomic");
        let out = root.join("nested/dir/profile.ap");
        write_atomic(&out, b"first").expect("first write");
        write_atomic(&out, b"second").expect("second write");
        assert_eq!(std::fs::read(&out).expect("read"), b"second");
        let leftovers = std::fs::read_dir(out.parent().expect("parent"))
            .expect("list")
            .count();
        assert_eq!(leftovers, 1);
    }
}
