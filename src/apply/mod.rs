//! Applicator (C9): the only component that is allowed to write to project
//! files. Runs one `RefactoringPlan` through pre-validation, backup, the
//! actual rewrite, post-validation, and commit, rolling back to the backup
//! on any failure after it was taken.
//!
//! State machine (spec §5):
//!
//! ```text
//! IDLE -> PRE_VALIDATED -> PREVIEW                         (dry_run)
//!                       \-> BACKUP -> WRITING -> POST_VALIDATE -> COMMIT
//! ```
//!
//! with `FAILED_PRE`, `FAILED_BACKUP`, `FAILED_WRITE`, and `FAILED_POST`
//! branches off the happy path; the latter two already reflect whether the
//! rollback they triggered succeeded, escalating to `FAILED_UNRECOVERABLE`
//! only if it did not. A single `apply` call drives one plan through to a
//! terminal state; it never leaves a partially-written file behind without
//! also attempting a rollback.

use std::path::{Path, PathBuf};

use crate::adapter::PatternExecutor;
use crate::backup::BackupStore;
use crate::errors::{DedupError, Result};
use crate::lock::ProjectLock;
use crate::model::{
    CallRewrite, DiffPreview, RefactoringPlan, ValidationError, ValidationPhase, ValidationReport,
};

/// Terminal (and a few transient) states an apply transaction can end up
/// reported in. Only one of these is ever returned per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Preview,
    Committed,
    FailedPre,
    FailedBackup,
    /// The write step failed and the backup was successfully restored.
    FailedWrite,
    /// Post-validation failed and the backup was successfully restored.
    FailedPost,
    /// A write or post-validation failure occurred *and* the subsequent
    /// restore from backup also failed. The backup blobs are still on
    /// disk under `.dedup-backups/`; this requires manual recovery.
    FailedUnrecoverable,
}

/// Everything a caller needs to know about how an apply transaction ended.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub state: ApplyState,
    pub backup_id: Option<String>,
    pub previews: Vec<DiffPreview>,
    pub pre_validation: ValidationReport,
    pub post_validation: Option<ValidationReport>,
}

impl ApplyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.state, ApplyState::Preview | ApplyState::Committed)
    }
}

/// Drive `plan` through the full transaction. `blocking` selects Scenario
/// E's policy when another apply already holds the project lock: `true`
/// retries with backoff, `false` fails fast with [`DedupError::InvalidInput`].
pub async fn apply(
    executor: &dyn PatternExecutor,
    backup_store: &BackupStore,
    project_root: &Path,
    plan: &RefactoringPlan,
    blocking: bool,
) -> Result<ApplyOutcome> {
    let pre_validation = pre_validate(executor, project_root, plan).await;
    if !pre_validation.ok {
        return Ok(ApplyOutcome {
            state: ApplyState::FailedPre,
            backup_id: None,
            previews: Vec::new(),
            pre_validation,
            post_validation: None,
        });
    }

    if plan.dry_run {
        let previews = build_previews(plan)?;
        return Ok(ApplyOutcome {
            state: ApplyState::Preview,
            backup_id: None,
            previews,
            pre_validation,
            post_validation: None,
        });
    }

    let _lock = if blocking {
        ProjectLock::acquire_blocking(project_root, 20).await?
    } else {
        ProjectLock::try_acquire(project_root)?
    };

    let handle = match backup_store.create_backup(&plan.files_affected) {
        Ok(handle) => handle,
        Err(_) => {
            return Ok(ApplyOutcome {
                state: ApplyState::FailedBackup,
                backup_id: None,
                previews: Vec::new(),
                pre_validation,
                post_validation: None,
            });
        }
    };

    if let Err(_write_err) = write_plan(plan) {
        return Ok(rollback(
            backup_store,
            &handle,
            ApplyState::FailedWrite,
            pre_validation,
            None,
        ));
    }

    let post_validation = post_validate(executor, plan).await;
    if !post_validation.ok {
        return Ok(rollback(
            backup_store,
            &handle,
            ApplyState::FailedPost,
            pre_validation,
            Some(post_validation),
        ));
    }

    executor.invalidate_cache_for_files(&plan.files_affected);

    Ok(ApplyOutcome {
        state: ApplyState::Committed,
        backup_id: Some(handle.backup_id),
        previews: Vec::new(),
        pre_validation,
        post_validation: Some(post_validation),
    })
}

/// Restore `handle` and report the terminal state. `on_success` names which
/// step failed (`FailedWrite` or `FailedPost`); a failed restore always
/// escalates to `FailedUnrecoverable` regardless, since the backup blobs
/// survive on disk either way.
fn rollback(
    backup_store: &BackupStore,
    handle: &crate::model::BackupHandle,
    on_success: ApplyState,
    pre_validation: ValidationReport,
    post_validation: Option<ValidationReport>,
) -> ApplyOutcome {
    let state = match backup_store.restore(handle) {
        Ok(()) => on_success,
        Err(_) => ApplyState::FailedUnrecoverable,
    };
    ApplyOutcome {
        state,
        backup_id: Some(handle.backup_id.clone()),
        previews: Vec::new(),
        pre_validation,
        post_validation,
    }
}

/// Field presence, path containment, and a syntax check of the generated
/// text against the plan's language, without touching any file.
async fn pre_validate(executor: &dyn PatternExecutor, project_root: &Path, plan: &RefactoringPlan) -> ValidationReport {
    let mut errors = Vec::new();

    if plan.plan.canonical_name.trim().is_empty() {
        errors.push(ValidationError {
            file: None,
            line: None,
            message: "extracted function plan has an empty canonical name".to_string(),
            kind: "missing_field".to_string(),
        });
    }
    if plan.files_affected.is_empty() {
        errors.push(ValidationError {
            file: None,
            line: None,
            message: "plan names no affected files".to_string(),
            kind: "missing_field".to_string(),
        });
    }
    if plan.strategy == crate::model::ExtractionStrategy::NewFile && plan.target_file.is_none() {
        errors.push(ValidationError {
            file: None,
            line: None,
            message: "new-file extraction strategy requires a target_file".to_string(),
            kind: "missing_field".to_string(),
        });
    }

    for file in &plan.files_affected {
        if !path_is_contained(project_root, file) {
            errors.push(ValidationError {
                file: Some(file.clone()),
                line: None,
                message: format!("{} is not contained within the project root", file.display()),
                kind: "path_containment".to_string(),
            });
        }
        if !file.exists() {
            errors.push(ValidationError {
                file: Some(file.clone()),
                line: None,
                message: format!("{} does not exist", file.display()),
                kind: "missing_file".to_string(),
            });
        }
    }

    if errors.is_empty() {
        if let Err(e) = executor.dump_ast(plan.language, &plan.plan.body_template).await {
            errors.push(ValidationError {
                file: plan.target_file.clone(),
                line: None,
                message: format!("extracted function body does not parse: {e}"),
                kind: "syntax".to_string(),
            });
        }
        for rewrite in &plan.plan.call_rewrites {
            if let Err(e) = executor.dump_ast(plan.language, &rewrite.replacement_text).await {
                errors.push(ValidationError {
                    file: Some(rewrite.location.file_path.clone()),
                    line: Some(rewrite.location.start_line),
                    message: format!("call-site rewrite does not parse: {e}"),
                    kind: "syntax".to_string(),
                });
            }
        }
    }

    ValidationReport {
        phase: ValidationPhase::Pre,
        ok: errors.is_empty(),
        errors,
    }
}

/// Re-parse every rewritten file through the pattern executor and confirm
/// it still parses. Syntax-only: the applicator does not attempt semantic
/// name resolution across files (an explicit scope decision, see
/// DESIGN.md).
async fn post_validate(executor: &dyn PatternExecutor, plan: &RefactoringPlan) -> ValidationReport {
    let mut errors = Vec::new();
    let mut touched: Vec<PathBuf> = plan.files_affected.clone();
    touched.sort();
    touched.dedup();

    for file in &touched {
        let content = match std::fs::read_to_string(file) {
            Ok(c) => c,
            Err(e) => {
                errors.push(ValidationError {
                    file: Some(file.clone()),
                    line: None,
                    message: format!("failed to re-read {} for post-validation: {e}", file.display()),
                    kind: "io".to_string(),
                });
                continue;
            }
        };
        if let Err(e) = executor.dump_ast(plan.language, &content).await {
            errors.push(ValidationError {
                file: Some(file.clone()),
                line: None,
                message: format!("{} no longer parses after rewrite: {e}", file.display()),
                kind: "syntax".to_string(),
            });
        }
    }

    ValidationReport {
        phase: ValidationPhase::Post,
        ok: errors.is_empty(),
        errors,
    }
}

/// Apply every call-site rewrite plus the extracted-function insertion to
/// disk. Rewrites within the same file are applied right-to-left by byte
/// offset so that earlier (lower-offset) ranges are unaffected by the
/// length change of a later one.
fn write_plan(plan: &RefactoringPlan) -> Result<()> {
    let mut by_file: std::collections::HashMap<PathBuf, Vec<&CallRewrite>> = std::collections::HashMap::new();
    for rewrite in &plan.plan.call_rewrites {
        by_file.entry(rewrite.location.file_path.clone()).or_default().push(rewrite);
    }

    for (file, mut rewrites) in by_file {
        rewrites.sort_by(|a, b| b.location.start_byte.cmp(&a.location.start_byte));
        let mut content = std::fs::read_to_string(&file)
            .map_err(|e| DedupError::io(format!("failed to read {} for rewrite", file.display()), e))?;
        for rewrite in rewrites {
            let (start, end) = (rewrite.location.start_byte, rewrite.location.end_byte);
            if end > content.len() || start > end {
                return Err(DedupError::WriteFailed {
                    path: file.clone(),
                    message: format!(
                        "call-site range {start}..{end} is out of bounds for {} bytes",
                        content.len()
                    ),
                    source: None,
                });
            }
            content.replace_range(start..end, &rewrite.replacement_text);
        }
        atomic_write(&file, content.as_bytes())?;
    }

    if let Some(target_file) = &plan.target_file {
        write_extracted_function(target_file, plan)?;
    }

    Ok(())
}

fn write_extracted_function(target_file: &Path, plan: &RefactoringPlan) -> Result<()> {
    let rendered = render_function_text(plan);
    match plan.strategy {
        crate::model::ExtractionStrategy::NewFile => {
            if let Some(parent) = target_file.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DedupError::io("failed to create target directory", e))?;
            }
            let mut content = String::new();
            if target_file.exists() {
                content = std::fs::read_to_string(target_file)
                    .map_err(|e| DedupError::io(format!("failed to read {}", target_file.display()), e))?;
                content.push('\n');
            }
            content.push_str(&rendered);
            atomic_write(target_file, content.as_bytes())
        }
        crate::model::ExtractionStrategy::Inline => {
            let mut content = std::fs::read_to_string(target_file)
                .map_err(|e| DedupError::io(format!("failed to read {}", target_file.display()), e))?;
            content.push_str("\n\n");
            content.push_str(&rendered);
            atomic_write(target_file, content.as_bytes())
        }
    }
}

fn render_function_text(plan: &RefactoringPlan) -> String {
    let params = plan
        .plan
        .parameters
        .iter()
        .map(|p| p.name.clone())
        .collect::<Vec<_>>()
        .join(", ");
    match plan.language {
        crate::config::Language::Python => {
            format!("def {}({params}):\n    {}\n", plan.plan.canonical_name, plan.plan.body_template)
        }
        crate::config::Language::JavaScript | crate::config::Language::TypeScript => {
            format!("function {}({params}) {{\n    {}\n}}\n", plan.plan.canonical_name, plan.plan.body_template)
        }
        crate::config::Language::Rust => {
            format!("fn {}({params}) {{\n    {}\n}}\n", plan.plan.canonical_name, plan.plan.body_template)
        }
        crate::config::Language::Go => {
            format!("func {}({params}) {{\n    {}\n}}\n", plan.plan.canonical_name, plan.plan.body_template)
        }
    }
}

fn build_previews(plan: &RefactoringPlan) -> Result<Vec<DiffPreview>> {
    let mut by_file: std::collections::HashMap<PathBuf, Vec<&CallRewrite>> = std::collections::HashMap::new();
    for rewrite in &plan.plan.call_rewrites {
        by_file.entry(rewrite.location.file_path.clone()).or_default().push(rewrite);
    }

    let mut previews = Vec::new();
    for (file, mut rewrites) in by_file {
        rewrites.sort_by(|a, b| b.location.start_byte.cmp(&a.location.start_byte));
        let before = std::fs::read_to_string(&file)
            .map_err(|e| DedupError::io(format!("failed to read {} for preview", file.display()), e))?;
        let mut after = before.clone();
        for rewrite in &rewrites {
            let (start, end) = (rewrite.location.start_byte, rewrite.location.end_byte);
            if end <= after.len() && start <= end {
                after.replace_range(start..end, &rewrite.replacement_text);
            }
        }
        previews.push(DiffPreview { file, before, after });
    }

    if let Some(target_file) = &plan.target_file {
        let before = std::fs::read_to_string(target_file).unwrap_or_default();
        let mut after = before.clone();
        after.push_str("\n\n");
        after.push_str(&render_function_text(plan));
        previews.push(DiffPreview { file: target_file.clone(), before, after });
    }

    previews.sort_by(|a, b| a.file.cmp(&b.file));
    Ok(previews)
}

fn path_is_contained(root: &Path, candidate: &Path) -> bool {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let candidate_parent = candidate.parent().unwrap_or(candidate);
    let candidate_abs = candidate_parent
        .canonicalize()
        .unwrap_or_else(|_| candidate_parent.to_path_buf());
    candidate_abs.starts_with(&root)
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = parent.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
    std::fs::write(&tmp_path, content)
        .map_err(|e| DedupError::io(format!("failed writing temp file for {}", path.display()), e))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| DedupError::io(format!("failed renaming temp file into {}", path.display()), e))
}
