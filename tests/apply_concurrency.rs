//! End-to-end coverage for the applicator's concurrency policy (Scenario
//! E): a second `apply` against the same project root either fails fast
//! or waits for the first to finish, depending on `blocking`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dedup_engine::adapter::{AstDump, AstNode, Match, PatternExecutor, RunOptions};
use dedup_engine::apply::{self, ApplyState};
use dedup_engine::backup::BackupStore;
use dedup_engine::config::Language;
use dedup_engine::errors::Result;
use dedup_engine::model::{
    CallRewrite, ExtractedFunctionPlan, ExtractionStrategy, PlanParameter, RefactoringPlan, SourceLocation,
    ValidationOutcome,
};

struct AlwaysParsesExecutor;

#[async_trait]
impl PatternExecutor for AlwaysParsesExecutor {
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
        Ok(AstDump {
            nodes: vec![AstNode {
                kind: "module".to_string(),
                start_byte: 0,
                end_byte: 1,
                text: String::new(),
                is_named: true,
            }],
        })
    }

    fn invalidate_cache_for_files(&self, _: &[PathBuf]) {}

    async fn validate_pattern(&self, _: Language, _: &str) -> Result<ValidationOutcome> {
        Ok(ValidationOutcome { is_valid: true, errors: Vec::new() })
    }
}

fn sample_plan(file: PathBuf) -> RefactoringPlan {
    RefactoringPlan {
        plan: ExtractedFunctionPlan {
            group_id: "g1".to_string(),
            canonical_name: "compute_shared".to_string(),
            parameters: vec![PlanParameter { name: "param_0".to_string(), inferred_type: None, default_value: None }],
            return_type: None,
            body_template: "return param_0".to_string(),
            language: Language::Python,
            required_imports: Vec::new(),
            call_rewrites: vec![CallRewrite {
                member_id: "b".to_string(),
                location: SourceLocation {
                    file_path: file.clone(),
                    start_line: 1,
                    end_line: 1,
                    start_byte: 0,
                    end_byte: 8,
                },
                replacement_text: "compute_shared(2)".to_string(),
                import_additions: Vec::new(),
            }],
        },
        strategy: ExtractionStrategy::Inline,
        target_file: Some(file.clone()),
        files_affected: vec![file],
        language: Language::Python,
        dry_run: false,
    }
}

#[tokio::test]
async fn fail_fast_apply_rejects_while_lock_is_held() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("a.py");
    std::fs::write(&file, "return 2\n").unwrap();

    let lock_path = tmp.path().join(".dedup.lock");
    std::fs::write(&lock_path, "0\n").unwrap();

    let executor = AlwaysParsesExecutor;
    let store = BackupStore::new(tmp.path());
    let plan = sample_plan(file.clone());

    let err = apply::apply(&executor, &store, tmp.path(), &plan, false).await.unwrap_err();
    assert!(matches!(err, dedup_engine::errors::DedupError::InvalidInput { .. }));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "return 2\n");
}

#[tokio::test]
async fn blocking_apply_waits_for_the_lock_to_be_released() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("a.py");
    std::fs::write(&file, "return 2\n").unwrap();

    let lock_path = tmp.path().join(".dedup.lock");
    std::fs::write(&lock_path, "0\n").unwrap();

    let release_path = lock_path.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = std::fs::remove_file(&release_path);
    });

    let executor = Arc::new(AlwaysParsesExecutor);
    let store = BackupStore::new(tmp.path());
    let plan = sample_plan(file.clone());

    let outcome = apply::apply(executor.as_ref(), &store, tmp.path(), &plan, true).await.unwrap();
    assert_eq!(outcome.state, ApplyState::Committed);
    assert!(std::fs::read_to_string(&file).unwrap().contains("compute_shared(2)"));
}
