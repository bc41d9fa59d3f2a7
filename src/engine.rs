//! Top-level engine: wires the pattern-executor adapter (C1), walker (C2),
//! cache (C3), detector (C4), analyzer (C5), generator (C6), ranker (C7),
//! coverage probe (C8), applicator (C9), and backup store (C10) together
//! behind a small public operation set.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use tracing::info;

use crate::adapter::{PatternExecutor, ProcessPatternExecutor};
use crate::analyze::{self, GroupAnalysis};
use crate::apply::{self, ApplyOutcome};
use crate::backup::BackupStore;
use crate::cache::QueryCache;
use crate::config::{EngineConfig, Language};
use crate::coverage::{self, CoverageProbe};
use crate::detect;
use crate::errors::Result;
use crate::generate;
use crate::model::{CandidateScore, DuplicationGroup, ExtractedFunctionPlan, GeneratePlanOptions, RefactoringPlan};
use crate::rank;
use crate::walker;

/// Owns every long-lived resource (cache, executor, backup store) for one
/// project root and exposes the pipeline's operations as a small API.
pub struct DedupEngine {
    executor: Arc<dyn PatternExecutor>,
    backup_store: BackupStore,
    project_root: PathBuf,
    config: EngineConfig,
    worker_pool: rayon::ThreadPool,
}

impl DedupEngine {
    /// Build an engine backed by a real `sg` subprocess adapter.
    pub fn new(project_root: impl Into<PathBuf>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let project_root = project_root.into();
        let cache = QueryCache::new(config.cache_entries, config.cache_bytes, config.cache_ttl_seconds);
        let executor = ProcessPatternExecutor::new(cache, Duration::from_secs(config.matcher_timeout_seconds))?;
        info!(project_root = %project_root.display(), "dedup engine initialized");
        Ok(Self::with_executor(project_root, config, Arc::new(executor)))
    }

    /// Build an engine around a caller-supplied executor, used by tests and
    /// by embedders that already have their own matcher adapter.
    pub fn with_executor(
        project_root: impl Into<PathBuf>,
        config: EngineConfig,
        executor: Arc<dyn PatternExecutor>,
    ) -> Self {
        let project_root = project_root.into();
        let backup_store = BackupStore::new(&project_root);
        let worker_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count)
            .build()
            .unwrap_or_else(|_| rayon::ThreadPoolBuilder::new().build().expect("default rayon pool"));
        Self {
            executor,
            backup_store,
            project_root,
            config,
            worker_pool,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// C2 + C4: walk the project, extract function units of `language`, and
    /// group them into duplication candidates.
    pub async fn find_duplicates(&self, language: Language) -> Result<Vec<DuplicationGroup>> {
        let (files, skipped) = walker::walk(&[self.project_root.clone()], &self.config)?;
        if !skipped.is_empty() {
            info!(skipped = skipped.len(), "files skipped during walk");
        }
        let in_language: Vec<_> = files.into_iter().filter(|f| f.language == language).collect();
        info!(count = in_language.len(), language = ?language, "walked source files");

        let roots = vec![self.project_root.clone()];
        let units = detect::extract_function_units(self.executor.as_ref(), language, &roots).await?;
        let groups = detect::group_duplicates(&units, &self.config);
        info!(groups = groups.len(), "duplication groups found");
        Ok(groups)
    }

    /// C5: analyze one group's internal alignment and variations.
    pub fn analyze_group(&self, group: &DuplicationGroup) -> GroupAnalysis {
        analyze::analyze_group(group, &self.config)
    }

    /// C6: synthesize an extraction plan for a mergeable group. Returns
    /// `None` if the group's analysis says it cannot be merged. `options`
    /// lets the caller override the derived name and hint the intended
    /// extraction strategy and target file.
    pub fn generate_plan(
        &self,
        group: &DuplicationGroup,
        analysis: &GroupAnalysis,
        options: &GeneratePlanOptions,
    ) -> Option<ExtractedFunctionPlan> {
        if !analysis.mergeable {
            return None;
        }
        Some(generate::generate_plan(group, analysis, options))
    }

    /// C4 + C5 + C7 + C8: find, analyze, score, and rank every mergeable
    /// duplication group for `language`, returning the top candidates.
    ///
    /// Per-group analysis and scoring is CPU-bound and independent across
    /// groups, so it runs on the `rayon` pool while `find_duplicates`'s I/O
    /// (subprocess calls, file reads) stays on the async runtime.
    pub async fn recommend(&self, language: Language) -> Result<Vec<CandidateScore>> {
        let groups = self.find_duplicates(language).await?;
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let (files, _) = walker::walk(&[self.project_root.clone()], &self.config)?;
        let (test_files, _source_files) = coverage::partition_test_files(&files)?;
        let probe = CoverageProbe::build(&test_files);

        let scores: Vec<CandidateScore> = self.worker_pool.install(|| {
            groups
                .par_iter()
                .filter_map(|group| {
                    let analysis = analyze::analyze_group(group, &self.config);
                    if !analysis.mergeable {
                        return None;
                    }
                    let coverage_fraction = probe.coverage_fraction(group);
                    Some(rank::score_group(group, &analysis, coverage_fraction))
                })
                .collect()
        });

        Ok(rank::top_candidates(scores, self.config.max_candidates))
    }

    /// C9: run one refactoring plan through the full apply transaction.
    /// `blocking` selects whether a concurrent apply on the same project
    /// causes this call to wait (Scenario E) or fail fast.
    pub async fn apply_plan(&self, plan: &RefactoringPlan, blocking: bool) -> Result<ApplyOutcome> {
        apply::apply(self.executor.as_ref(), &self.backup_store, &self.project_root, plan, blocking).await
    }

    /// C10: delete backups older than the configured retention window.
    pub fn purge_backups(&self) -> Result<Vec<String>> {
        self.backup_store.purge(self.config.backup_retention_days)
    }
}

/// Install a `tracing_subscriber` formatting layer at the given verbosity.
/// Optional: embedders that already configure `tracing` themselves should
/// not call this, since only one global subscriber may be installed.
pub fn init_tracing(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AstDump, Match, RunOptions, ValidationOutcome};
    use async_trait::async_trait;

    struct NoMatchExecutor;

    #[async_trait]
    impl PatternExecutor for NoMatchExecutor {
        async fn run_pattern(&self, _: Language, _: &str, _: &[PathBuf], _: &RunOptions) -> Result<Vec<Match>> {
            Ok(Vec::new())
        }

        async fn run_pattern_stream(
            &self,
            _: Language,
            _: &str,
            _: &[PathBuf],
            _: &RunOptions,
        ) -> Result<std::pin::Pin<Box<dyn futures::Stream<Item = Result<Match>> + Send>>> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn dump_ast(&self, _: Language, _: &str) -> Result<AstDump> {
            Ok(AstDump { nodes: Vec::new() })
        }

        fn invalidate_cache_for_files(&self, _: &[PathBuf]) {}

        async fn validate_pattern(&self, _: Language, _: &str) -> Result<ValidationOutcome> {
            Ok(ValidationOutcome { is_valid: true, errors: Vec::new() })
        }
    }

    #[tokio::test]
    async fn recommend_on_empty_project_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = DedupEngine::with_executor(tmp.path(), EngineConfig::default(), Arc::new(NoMatchExecutor));
        let recommendations = engine.recommend(Language::Python).await.unwrap();
        assert!(recommendations.is_empty());
    }

    #[tokio::test]
    async fn find_duplicates_on_empty_project_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = DedupEngine::with_executor(tmp.path(), EngineConfig::default(), Arc::new(NoMatchExecutor));
        let groups = engine.find_duplicates(Language::Python).await.unwrap();
        assert!(groups.is_empty());
    }
}
