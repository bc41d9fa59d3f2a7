//! Pattern-executor adapter (C1): a typed interface over the external
//! AST pattern-matching executable.
//!
//! The executable itself is an opaque collaborator with a fixed CLI
//! contract (see spec §6): it is invoked with `(subcommand, pattern,
//! language, path...)`, emits one JSON object per line on stdout, and
//! exits zero on success (including "no matches"). This module never
//! reimplements parsing; it only shells out, streams, and caches.

mod process;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::config::Language;
pub use crate::model::ValidationOutcome;

pub use process::ProcessPatternExecutor;

/// A single match reported by the pattern executor, already normalized to
/// a project-relative path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub file: PathBuf,
    pub range: MatchRange,
    pub text: String,
    #[serde(default)]
    pub meta_vars: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRange {
    pub start: MatchPosition,
    pub end: MatchPosition,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchPosition {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

/// One node from a full AST dump of a source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstNode {
    pub kind: String,
    pub start_byte: usize,
    pub end_byte: usize,
    pub text: String,
    pub is_named: bool,
}

/// A full parse of one source text, used by the analyzer for type
/// inference and by the applicator for syntax/post-validation checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstDump {
    pub nodes: Vec<AstNode>,
}

impl AstDump {
    /// Find the smallest node whose byte range contains `offset`.
    pub fn node_at(&self, offset: usize) -> Option<&AstNode> {
        self.nodes
            .iter()
            .filter(|n| n.start_byte <= offset && offset < n.end_byte)
            .min_by_key(|n| n.end_byte - n.start_byte)
    }

    /// All identifier nodes, used for unresolved-reference checks during
    /// post-validation.
    pub fn identifiers(&self) -> impl Iterator<Item = &AstNode> {
        self.nodes.iter().filter(|n| n.kind == "identifier" && n.is_named)
    }
}

/// Options accepted by a single `run_pattern` invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub max_matches: Option<usize>,
    pub extra_args: Vec<String>,
}

/// Capability set implemented by anything that can run the external
/// matcher. Kept as a trait (rather than a concrete struct with
/// mutable fields) so tests can substitute a fake without spawning a
/// real subprocess, per the engine's dependency-injection strategy.
#[async_trait]
pub trait PatternExecutor: Send + Sync {
    /// Run a single pattern against one or more search roots, returning
    /// all matches. Internally this should consult the query cache (C3)
    /// before spawning the executable.
    async fn run_pattern(
        &self,
        language: Language,
        pattern: &str,
        search_roots: &[PathBuf],
        options: &RunOptions,
    ) -> Result<Vec<Match>>;

    /// Run a pattern and yield matches incrementally as a finite,
    /// restartable (not rewindable) stream. Dropping the stream
    /// terminates the child process.
    async fn run_pattern_stream(
        &self,
        language: Language,
        pattern: &str,
        search_roots: &[PathBuf],
        options: &RunOptions,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Result<Match>> + Send>>>;

    /// Produce a full AST dump of `source_text`.
    async fn dump_ast(&self, language: Language, source_text: &str) -> Result<AstDump>;

    /// Validate that `pattern` itself parses for `language`, without
    /// running it against any project file (spec supplement grounded in
    /// the ast-grep-mcp lineage's pattern-validation endpoint).
    async fn validate_pattern(&self, language: Language, pattern: &str) -> Result<ValidationOutcome>;

    /// Drop every cached query result that was produced against any of
    /// `files`, called by the applicator (C9) once a write transaction
    /// commits so a later `run_pattern` over the rewritten files cannot
    /// observe stale matches (spec Scenario F).
    fn invalidate_cache_for_files(&self, files: &[PathBuf]);
}

/// Compute the cache fingerprint for a `run_pattern` call: a hash over
/// `(language, pattern, sorted search-root contents' mtime+size, options)`.
/// Exposed so callers that want to pre-check cache membership (e.g. for
/// tests asserting cache invalidation, Scenario F) can do so without
/// issuing a call.
pub fn fingerprint(
    language: Language,
    pattern: &str,
    search_roots: &[PathBuf],
    options: &RunOptions,
) -> Result<crate::cache::CacheKey> {
    let mut entries: Vec<(PathBuf, u64, u64)> = Vec::new();
    for root in search_roots {
        collect_fingerprint_entries(root, &mut entries)?;
    }
    entries.sort();

    let mut hasher = blake3::Hasher::new();
    hasher.update(language.matcher_id().as_bytes());
    hasher.update(pattern.as_bytes());
    for (path, mtime, size) in &entries {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(&mtime.to_le_bytes());
        hasher.update(&size.to_le_bytes());
    }
    let options_json = serde_json::to_vec(options)?;
    hasher.update(&options_json);

    Ok(crate::cache::CacheKey(hasher.finalize().to_hex().to_string()))
}

fn collect_fingerprint_entries(root: &Path, out: &mut Vec<(PathBuf, u64, u64)>) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            let meta = entry.metadata().map_err(|e| {
                crate::errors::DedupError::io(format!("stat failed for {}", entry.path().display()), e.into())
            })?;
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            out.push((entry.path().to_path_buf(), mtime, meta.len()));
        }
    }
    Ok(())
}
