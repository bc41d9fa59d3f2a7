//! File walker (C2): deterministic, filtered enumeration of source files
//! under one or more project roots.
//!
//! Enumeration order is fixed (lexicographic by path) so that every
//! downstream stage — fingerprinting, grouping, ranking — is reproducible
//! given the same tree on disk. The walker is a finite, restartable
//! sequence: calling `walk` again re-reads the directory tree rather than
//! resuming a paused one.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::{language_for_extension, EngineConfig, Language};
use crate::errors::{DedupError, Result};

/// One file accepted by the walker's filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub path: PathBuf,
    pub language: Language,
    pub size_bytes: u64,
}

/// A file the walker rejected, with the reason, so callers can surface a
/// structured warning instead of silently dropping coverage.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge { size: u64, limit: u64 },
    ExcludedByGlob,
    NotIncludedByGlob,
    UnrecognizedExtension,
}

/// Enumerate every recognized source file under `roots`, applying the
/// config's size cap and include/exclude globs. Always returns entries
/// sorted by path; never panics on an unreadable subtree (permission
/// errors surface as a logged, skipped entry rather than aborting the walk).
pub fn walk(roots: &[PathBuf], config: &EngineConfig) -> Result<(Vec<WalkedFile>, Vec<SkippedFile>)> {
    let exclude = config.exclude_globset()?;
    let include = config.include_globset()?;

    let mut accepted = Vec::new();
    let mut skipped = Vec::new();

    for root in roots {
        walk_one_root(root, config, &exclude, include.as_ref(), &mut accepted, &mut skipped)?;
    }

    accepted.sort_by(|a, b| a.path.cmp(&b.path));
    skipped.sort_by(|a, b| a.path.cmp(&b.path));
    Ok((accepted, skipped))
}

fn walk_one_root(
    root: &Path,
    config: &EngineConfig,
    exclude: &globset::GlobSet,
    include: Option<&globset::GlobSet>,
    accepted: &mut Vec<WalkedFile>,
    skipped: &mut Vec<SkippedFile>,
) -> Result<()> {
    if !root.exists() {
        return Err(DedupError::invalid_field(
            format!("search root does not exist: {}", root.display()),
            "search_roots",
        ));
    }

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "failed to read directory entry, skipping");
                continue;
            }
        };

        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path().to_path_buf();

        if exclude.is_match(&path) {
            skipped.push(SkippedFile {
                path,
                reason: SkipReason::ExcludedByGlob,
            });
            continue;
        }
        if let Some(include) = include {
            if !include.is_match(&path) {
                skipped.push(SkippedFile {
                    path,
                    reason: SkipReason::NotIncludedByGlob,
                });
                continue;
            }
        }

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            skipped.push(SkippedFile {
                path,
                reason: SkipReason::UnrecognizedExtension,
            });
            continue;
        };
        let Some(language) = language_for_extension(ext) else {
            skipped.push(SkippedFile {
                path,
                reason: SkipReason::UnrecognizedExtension,
            });
            continue;
        };

        let size_bytes = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to stat file, skipping");
                continue;
            }
        };
        if size_bytes > config.max_file_size_bytes {
            skipped.push(SkippedFile {
                path,
                reason: SkipReason::TooLarge {
                    size: size_bytes,
                    limit: config.max_file_size_bytes,
                },
            });
            continue;
        }

        accepted.push(WalkedFile {
            path,
            language,
            size_bytes,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn walk_finds_recognized_files_and_skips_others() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.py", "def f(): pass");
        write(tmp.path(), "README.md", "hello");
        write(tmp.path(), "node_modules/pkg/index.js", "ignored");

        let config = EngineConfig::default();
        let (accepted, skipped) = walk(&[tmp.path().to_path_buf()], &config).unwrap();

        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].language, Language::Python);
        assert!(skipped.iter().any(|s| s.reason == SkipReason::UnrecognizedExtension));
    }

    #[test]
    fn walk_respects_max_file_size() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "big.py", &"x".repeat(100));

        let mut config = EngineConfig::default();
        config.max_file_size_bytes = 10;
        let (accepted, skipped) = walk(&[tmp.path().to_path_buf()], &config).unwrap();

        assert!(accepted.is_empty());
        assert!(matches!(skipped[0].reason, SkipReason::TooLarge { .. }));
    }

    #[test]
    fn walk_rejects_missing_root() {
        let config = EngineConfig::default();
        let missing = PathBuf::from("/nonexistent/path/for/dedup-engine-tests");
        assert!(walk(&[missing], &config).is_err());
    }

    #[test]
    fn walk_output_is_sorted_by_path() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "b.py", "pass");
        write(tmp.path(), "a.py", "pass");

        let config = EngineConfig::default();
        let (accepted, _) = walk(&[tmp.path().to_path_buf()], &config).unwrap();
        let paths: Vec<_> = accepted.iter().map(|f| f.path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }
}
