//! Test-coverage probe (C8): a batch O(#tests + #sources) text scan that
//! estimates, per function unit, whether any test file even mentions its
//! name. This is a cheap proxy for "has a test", not a coverage tool —
//! it never invokes the pattern executor, just scans bytes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::Language;
use crate::errors::{DedupError, Result};
use crate::model::{DuplicationGroup, FunctionUnit};
use crate::walker::WalkedFile;

/// Split a walked file list into `(test_files, source_files)` using each
/// language's test-file glob patterns.
pub fn partition_test_files(files: &[WalkedFile]) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut globsets = std::collections::HashMap::new();
    for language in Language::all() {
        let mut builder = globset::GlobSetBuilder::new();
        for pattern in language.test_file_globs() {
            let glob = globset::Glob::new(pattern)
                .map_err(|e| DedupError::internal(format!("invalid built-in test glob {pattern:?}: {e}")))?;
            builder.add(glob);
        }
        globsets.insert(*language, builder.build().map_err(|e| DedupError::internal(e.to_string()))?);
    }

    let mut test_files = Vec::new();
    let mut source_files = Vec::new();
    for file in files {
        let is_test = globsets
            .get(&file.language)
            .map(|set| set.is_match(&file.path))
            .unwrap_or(false);
        if is_test {
            test_files.push(file.path.clone());
        } else {
            source_files.push(file.path.clone());
        }
    }
    Ok((test_files, source_files))
}

/// Every identifier-shaped token observed across all test files, built in
/// one pass so that checking coverage for N function units afterward is
/// O(N) rather than O(N * test corpus size).
pub struct CoverageProbe {
    tokens: HashSet<String>,
}

impl CoverageProbe {
    /// Scan every test file's contents once and intern the identifier
    /// tokens found. Unreadable files are skipped (treated as contributing
    /// no coverage) rather than failing the whole probe.
    pub fn build(test_files: &[PathBuf]) -> Self {
        let mut tokens = HashSet::new();
        for path in test_files {
            if let Ok(content) = std::fs::read_to_string(path) {
                collect_identifier_tokens(&content, &mut tokens);
            }
        }
        Self { tokens }
    }

    pub fn is_covered(&self, unit: &FunctionUnit) -> bool {
        unit.name != "<anonymous>" && self.tokens.contains(&unit.name)
    }

    /// Fraction of a group's members mentioned by at least one test file.
    pub fn coverage_fraction(&self, group: &DuplicationGroup) -> f64 {
        if group.members.is_empty() {
            return 0.0;
        }
        let covered = group.members.iter().filter(|m| self.is_covered(m)).count();
        covered as f64 / group.members.len() as f64
    }
}

fn collect_identifier_tokens(content: &str, out: &mut HashSet<String>) {
    let mut current = String::new();
    for ch in content.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            out.insert(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.insert(current);
    }
}
