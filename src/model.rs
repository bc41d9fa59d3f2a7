//! Core data model shared across every pipeline stage.
//!
//! These types flow by value from producer to consumer (detector output is
//! immutable through the pipeline); none of them own a long-lived resource.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Language;

/// An immutable span within one source file, created by the pattern-executor
/// adapter from matcher output and referenced throughout the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file_path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

impl SourceLocation {
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

/// One extracted function-like region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionUnit {
    pub id: String,
    pub location: SourceLocation,
    pub language: Language,
    pub name: String,
    pub signature_text: String,
    pub body_text: String,
    /// Hash over a whitespace- and identifier-normalized token stream, so
    /// renamings still compare equal.
    pub hash_canonical: u64,
    pub body_token_length: usize,
}

/// A set of two-or-more structurally similar function units judged worth
/// merging. Invariant: `members.len() >= 2`; all members share `language`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicationGroup {
    pub group_id: String,
    pub language: Language,
    pub members: Vec<FunctionUnit>,
    pub representative_index: usize,
    pub similarity_score: f64,
    pub lines_per_member: usize,
    pub total_lines: usize,
    pub estimated_savings_lines: i64,
}

impl DuplicationGroup {
    pub fn representative(&self) -> &FunctionUnit {
        &self.members[self.representative_index]
    }

    pub fn is_exact(&self) -> bool {
        self.similarity_score >= 1.0
    }
}

/// One run-length segment of a multi-sequence alignment across group members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentSegment {
    pub kind: SegmentKind,
    /// `(member_index, start_token, end_token)` per member participating.
    pub member_spans: Vec<(usize, usize, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    Equal,
    Variant,
    Gap,
}

/// One classified difference between group members at a variant segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variation {
    pub segment_index: usize,
    pub category: VariationCategory,
    pub severity: VariationSeverity,
    pub inferred_parameter_type: Option<String>,
    pub candidate_parameter_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariationCategory {
    LiteralValue,
    Identifier,
    Type,
    Structure,
    Unrelated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariationSeverity {
    Trivial,
    Parameterizable,
    Structural,
    Incompatible,
}

/// Hierarchical view of variations keyed by AST path, used for display and
/// to detect whether variations cluster or scatter.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiffTree {
    pub nodes: Vec<DiffTreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffTreeNode {
    pub ast_path: String,
    pub variation: Variation,
}

/// A synthesized canonical extracted function plus per-call-site rewrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFunctionPlan {
    pub group_id: String,
    pub canonical_name: String,
    pub parameters: Vec<PlanParameter>,
    pub return_type: Option<String>,
    pub body_template: String,
    pub language: Language,
    pub required_imports: Vec<String>,
    pub call_rewrites: Vec<CallRewrite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanParameter {
    pub name: String,
    pub inferred_type: Option<String>,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRewrite {
    pub member_id: String,
    pub location: SourceLocation,
    pub replacement_text: String,
    pub import_additions: Vec<String>,
}

/// A group's recommendation score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub group_id: String,
    pub savings: f64,
    pub risk: f64,
    pub coverage_fraction: f64,
    pub structural_complexity: f64,
    pub composite: f64,
    pub rationale: Vec<String>,
}

/// Envelope the applicator accepts, referencing an `ExtractedFunctionPlan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefactoringPlan {
    pub plan: ExtractedFunctionPlan,
    pub strategy: ExtractionStrategy,
    pub target_file: Option<PathBuf>,
    pub files_affected: Vec<PathBuf>,
    pub language: Language,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionStrategy {
    Inline,
    NewFile,
}

/// Caller-supplied overrides for [`crate::generate::generate_plan`]. All
/// fields are optional; an absent field falls back to the generator's own
/// derivation from the group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratePlanOptions {
    /// Overrides the derived `canonical_name` when present.
    pub name: Option<String>,
    /// Hints the intended extraction strategy so the generator can tailor
    /// `required_imports` (e.g. a module import when extracting to a new
    /// file). Does not itself select where the applicator writes; that is
    /// still decided by the `RefactoringPlan` wrapping this plan.
    pub strategy: Option<ExtractionStrategy>,
    /// The file the extracted function would land in under `NewFile`
    /// strategy, used only to derive an import path.
    pub target_file: Option<PathBuf>,
}

/// A content-addressed, per-operation backup, owned by the backup store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupHandle {
    pub backup_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub project_root: PathBuf,
    pub files: Vec<BackedUpFile>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackedUpFile {
    pub path: PathBuf,
    pub original_sha256: String,
    pub blob_ref: String,
}

/// The result of one validation phase during an apply transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub phase: ValidationPhase,
    pub ok: bool,
    pub errors: Vec<ValidationError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationPhase {
    Pre,
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub file: Option<PathBuf>,
    pub line: Option<usize>,
    pub message: String,
    pub kind: String,
}

/// Outcome of validating a pattern against the matcher without running it
/// over real project files (spec supplement, grounded in the ast-grep-mcp
/// lineage's `ValidateRefactoringResponse`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// A unified before/after text preview for one affected file, attached to
/// the applicator's `PREVIEW` terminal state on a dry run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffPreview {
    pub file: PathBuf,
    pub before: String,
    pub after: String,
}
