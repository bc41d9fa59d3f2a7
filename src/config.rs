//! Configuration for the duplication-detection and refactoring engine.
//!
//! Mirrors every option named in the engine's external interface: file
//! size caps, similarity thresholds, cache sizing, worker counts, and
//! retention policy. Values are validated once, at construction or after
//! a YAML load, rather than re-checked on every access.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{DedupError, Result};

/// Default exclude globs for common dependency, build, and VCS directories.
fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/dist/**".to_string(),
        "**/build/**".to_string(),
        "**/.venv/**".to_string(),
        "**/venv/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/vendor/**".to_string(),
    ]
}

/// Top-level engine configuration, covering every option in the engine's
/// recognized-configuration table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Skip files larger than this many bytes (default 1 MiB).
    #[serde(default = "EngineConfig::default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    /// Minimum edit-similarity for a near-duplicate group (default 0.8).
    #[serde(default = "EngineConfig::default_min_similarity")]
    pub min_similarity: f64,

    /// Minimum lines per member for a group to be reported (default 5).
    #[serde(default = "EngineConfig::default_min_lines")]
    pub min_lines: usize,

    /// Maximum number of candidate groups returned (default 100).
    #[serde(default = "EngineConfig::default_max_candidates")]
    pub max_candidates: usize,

    /// Maximum inferred parameters before a group is unmergeable (default 6).
    #[serde(default = "EngineConfig::default_max_parameters")]
    pub max_parameters: usize,

    /// Worker pool size for CPU-bound analysis (default cpu_count - 1, capped at 16).
    #[serde(default = "EngineConfig::default_worker_count")]
    pub worker_count: usize,

    /// Query cache entry-count bound (default 1024).
    #[serde(default = "EngineConfig::default_cache_entries")]
    pub cache_entries: usize,

    /// Query cache byte-size bound (default 100 MiB).
    #[serde(default = "EngineConfig::default_cache_bytes")]
    pub cache_bytes: u64,

    /// Query cache entry TTL in seconds (default 3600).
    #[serde(default = "EngineConfig::default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Wall-clock timeout for a single matcher invocation (default 30s).
    #[serde(default = "EngineConfig::default_matcher_timeout_seconds")]
    pub matcher_timeout_seconds: u64,

    /// Days a backup is retained before `purge` removes it (default 30).
    #[serde(default = "EngineConfig::default_backup_retention_days")]
    pub backup_retention_days: u64,

    /// Glob patterns excluded from file enumeration.
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Glob patterns to additionally include (empty = all supported languages).
    #[serde(default)]
    pub include_patterns: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: Self::default_max_file_size_bytes(),
            min_similarity: Self::default_min_similarity(),
            min_lines: Self::default_min_lines(),
            max_candidates: Self::default_max_candidates(),
            max_parameters: Self::default_max_parameters(),
            worker_count: Self::default_worker_count(),
            cache_entries: Self::default_cache_entries(),
            cache_bytes: Self::default_cache_bytes(),
            cache_ttl_seconds: Self::default_cache_ttl_seconds(),
            matcher_timeout_seconds: Self::default_matcher_timeout_seconds(),
            backup_retention_days: Self::default_backup_retention_days(),
            exclude_patterns: default_exclude_patterns(),
            include_patterns: Vec::new(),
        }
    }
}

impl EngineConfig {
    const fn default_max_file_size_bytes() -> u64 {
        1024 * 1024
    }
    const fn default_min_similarity() -> f64 {
        0.8
    }
    const fn default_min_lines() -> usize {
        5
    }
    const fn default_max_candidates() -> usize {
        100
    }
    const fn default_max_parameters() -> usize {
        6
    }
    fn default_worker_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1).max(1))
            .unwrap_or(1)
            .min(16)
    }
    const fn default_cache_entries() -> usize {
        1024
    }
    const fn default_cache_bytes() -> u64 {
        100 * 1024 * 1024
    }
    const fn default_cache_ttl_seconds() -> u64 {
        3600
    }
    const fn default_matcher_timeout_seconds() -> u64 {
        30
    }
    const fn default_backup_retention_days() -> u64 {
        30
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| DedupError::io(format!("failed to read config file: {}", path.display()), e))?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml_file(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)
            .map_err(|e| DedupError::io(format!("failed to write config file: {}", path.display()), e))
    }

    /// Validate every field against the constraints named in the external
    /// interface; returns all violations at once rather than the first.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.max_file_size_bytes == 0 {
            errors.push("max_file_size_bytes must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            errors.push("min_similarity must be within 0.0..=1.0".to_string());
        }
        if self.min_lines == 0 {
            errors.push("min_lines must be >= 1".to_string());
        }
        if self.max_candidates == 0 {
            errors.push("max_candidates must be >= 1".to_string());
        }
        if self.worker_count == 0 {
            errors.push("worker_count must be >= 1".to_string());
        }
        if self.cache_entries == 0 {
            errors.push("cache_entries must be >= 1".to_string());
        }
        if self.matcher_timeout_seconds == 0 {
            errors.push("matcher_timeout_seconds must be >= 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DedupError::InvalidInput {
                message: errors.join("; "),
                field: None,
            })
        }
    }

    /// Compiled exclude globset, built once per config instance.
    pub fn exclude_globset(&self) -> Result<globset::GlobSet> {
        build_globset(&self.exclude_patterns)
    }

    /// Compiled include globset; `None` means "no restriction".
    pub fn include_globset(&self) -> Result<Option<globset::GlobSet>> {
        if self.include_patterns.is_empty() {
            Ok(None)
        } else {
            Ok(Some(build_globset(&self.include_patterns)?))
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<globset::GlobSet> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern)
            .map_err(|e| DedupError::invalid_field(e.to_string(), "exclude_patterns"))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| DedupError::invalid_field(e.to_string(), "exclude_patterns"))
}

/// The closed set of languages the engine recognizes, replacing dynamic
/// string-keyed dispatch with a validated enumeration. Unrecognized
/// language strings are a `DedupError::InvalidInput`, not a runtime lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
}

impl Language {
    /// Parse a language from a matcher/config string identifier.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Self::Python),
            "javascript" | "js" => Ok(Self::JavaScript),
            "typescript" | "ts" => Ok(Self::TypeScript),
            "rust" | "rs" => Ok(Self::Rust),
            "go" | "golang" => Ok(Self::Go),
            other => Err(DedupError::invalid_field(
                format!("unsupported language: {other}"),
                "language",
            )),
        }
    }

    /// File extensions (without the leading dot) recognized for this language.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py"],
            Self::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Self::TypeScript => &["ts", "tsx"],
            Self::Rust => &["rs"],
            Self::Go => &["go"],
        }
    }

    /// The ast-grep language identifier passed on its command line.
    pub fn matcher_id(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Rust => "rust",
            Self::Go => "go",
        }
    }

    /// Fixed per-language pattern set identifying function-like constructs,
    /// per the detector's fixed (not user-supplied) pattern table.
    pub fn function_patterns(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["def $NAME($$$PARAMS): $$$BODY"],
            Self::JavaScript | Self::TypeScript => &[
                "function $NAME($$$PARAMS) { $$$BODY }",
                "const $NAME = ($$$PARAMS) => { $$$BODY }",
            ],
            Self::Rust => &["fn $NAME($$$PARAMS) -> $RET { $$$BODY }", "fn $NAME($$$PARAMS) { $$$BODY }"],
            Self::Go => &["func $NAME($$$PARAMS) $RET { $$$BODY }"],
        }
    }

    /// Recognized primitive/builtin type names for this language, used by
    /// the variation analyzer's `type` classification.
    pub fn type_names(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["int", "float", "str", "bool", "list", "dict", "tuple", "set", "None"],
            Self::JavaScript | Self::TypeScript => {
                &["number", "string", "boolean", "object", "any", "void", "undefined"]
            }
            Self::Rust => &["i32", "i64", "u32", "u64", "f32", "f64", "bool", "String", "str", "usize"],
            Self::Go => &["int", "int64", "float64", "string", "bool", "byte", "rune"],
        }
    }

    /// Glob suffixes identifying candidate test files for this language,
    /// used by the test-coverage probe (C8).
    pub fn test_file_globs(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["test_*.py", "*_test.py", "tests/**/*.py"],
            Self::JavaScript | Self::TypeScript => {
                &["*.test.js", "*.spec.js", "*.test.ts", "*.spec.ts", "tests/**/*", "test/**/*"]
            }
            Self::Rust => &["tests/**/*.rs"],
            Self::Go => &["*_test.go"],
        }
    }

    /// All supported languages, used to build the default extension map.
    pub fn all() -> &'static [Language] {
        &[
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Rust,
            Language::Go,
        ]
    }
}

/// Resolve a language from a file's extension, if recognized.
pub fn language_for_extension(ext: &str) -> Option<Language> {
    let ext = ext.trim_start_matches('.');
    Language::all()
        .iter()
        .find(|lang| lang.extensions().contains(&ext))
        .copied()
}

/// The set of extensions recognized across all supported languages, used
/// by the file walker as a fast pre-filter.
pub fn all_recognized_extensions() -> HashSet<&'static str> {
    Language::all()
        .iter()
        .flat_map(|lang| lang.extensions().iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_similarity_is_rejected() {
        let mut config = EngineConfig::default();
        config.min_similarity = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_min_lines_is_rejected() {
        let mut config = EngineConfig::default();
        config.min_lines = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unsupported_language_is_invalid_input() {
        let err = Language::parse("cobol").unwrap_err();
        assert!(matches!(err, DedupError::InvalidInput { .. }));
    }

    #[test]
    fn extension_resolves_to_expected_language() {
        assert_eq!(language_for_extension("py"), Some(Language::Python));
        assert_eq!(language_for_extension(".rs"), Some(Language::Rust));
        assert_eq!(language_for_extension("exe"), None);
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = EngineConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.min_similarity, config.min_similarity);
    }
}
