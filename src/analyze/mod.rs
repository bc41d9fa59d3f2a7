//! Variation analyzer (C5): aligns every group member's body against the
//! representative, classifies each difference, and decides whether the
//! group is safe to merge into one extracted function.

pub mod alignment;

use std::collections::{BTreeMap, HashSet};

use crate::config::{EngineConfig, Language};
use crate::model::{
    AlignmentSegment, DiffTree, DiffTreeNode, DuplicationGroup, PlanParameter, SegmentKind,
    Variation, VariationCategory, VariationSeverity,
};

/// Full output of analyzing one group.
#[derive(Debug, Clone)]
pub struct GroupAnalysis {
    pub segments: Vec<AlignmentSegment>,
    pub variations: Vec<Variation>,
    pub diff_tree: DiffTree,
    pub mergeable: bool,
    pub reason: Option<String>,
    /// One parameter per distinct parameterizable segment, ordered by
    /// first occurrence. The generator consumes this directly rather than
    /// re-deriving it from `variations`.
    pub parameters: Vec<PlanParameter>,
}

/// Tokenize, align every non-representative member against the
/// representative, and classify each resulting variation. Mergeability
/// follows the rule in the engine's design notes: no `Incompatible`
/// variation, and the distinct-parameter count stays within
/// `config.max_parameters`.
pub fn analyze_group(group: &DuplicationGroup, config: &EngineConfig) -> GroupAnalysis {
    let representative = group.representative();
    let rep_tokens = tokenize(&representative.body_text);

    let mut segments = Vec::new();
    let mut variations = Vec::new();
    let mut diff_nodes = Vec::new();

    for (member_index, member) in group.members.iter().enumerate() {
        if member_index == group.representative_index {
            continue;
        }
        let mem_tokens = tokenize(&member.body_text);
        let ops = alignment::align(&rep_tokens, &mem_tokens);

        for op in ops {
            let (kind, member_spans) = segment_for_op(&op, member_index, group.representative_index);
            let segment_index = segments.len();
            segments.push(AlignmentSegment {
                kind,
                member_spans,
            });

            if kind == SegmentKind::Equal {
                continue;
            }

            let variation = classify_variation(
                &op,
                segment_index,
                &rep_tokens,
                &mem_tokens,
                group.language,
            );
            diff_nodes.push(DiffTreeNode {
                ast_path: format!("member[{member_index}]/segment[{segment_index}]"),
                variation: variation.clone(),
            });
            variations.push(variation);
        }
    }

    let has_incompatible = variations
        .iter()
        .any(|v| v.severity == VariationSeverity::Incompatible);
    let distinct_parameters = distinct_parameter_count(&variations);

    let (mergeable, reason) = if has_incompatible {
        (false, Some("at least one variation is structurally incompatible".to_string()))
    } else if distinct_parameters > config.max_parameters {
        (
            false,
            Some(format!(
                "{distinct_parameters} distinct parameters exceeds max_parameters ({})",
                config.max_parameters
            )),
        )
    } else {
        (true, None)
    };

    let parameters = build_parameters(&variations);

    GroupAnalysis {
        segments,
        variations,
        diff_tree: DiffTree { nodes: diff_nodes },
        mergeable,
        reason,
        parameters,
    }
}

/// One parameter per distinct segment index that is parameterizable,
/// ordered by first occurrence so generated signatures are stable across
/// runs over the same input.
fn build_parameters(variations: &[Variation]) -> Vec<PlanParameter> {
    let mut by_segment: BTreeMap<usize, &Variation> = BTreeMap::new();
    for v in variations {
        if v.severity == VariationSeverity::Parameterizable {
            by_segment.entry(v.segment_index).or_insert(v);
        }
    }
    by_segment
        .into_values()
        .map(|v| PlanParameter {
            name: v
                .candidate_parameter_name
                .clone()
                .unwrap_or_else(|| format!("param_{}", v.segment_index)),
            inferred_type: v.inferred_parameter_type.clone(),
            default_value: None,
        })
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.push(ch);
        } else {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            if !ch.is_whitespace() {
                tokens.push(ch.to_string());
            }
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn segment_for_op(
    op: &alignment::DiffOp,
    member_index: usize,
    representative_index: usize,
) -> (SegmentKind, Vec<(usize, usize, usize)>) {
    use alignment::DiffOp::*;
    match op {
        Equal { rep, mem } => (
            SegmentKind::Equal,
            vec![
                (representative_index, rep.0, rep.1),
                (member_index, mem.0, mem.1),
            ],
        ),
        Replace { rep, mem } => (
            SegmentKind::Variant,
            vec![
                (representative_index, rep.0, rep.1),
                (member_index, mem.0, mem.1),
            ],
        ),
        Insert { mem } => (SegmentKind::Gap, vec![(member_index, mem.0, mem.1)]),
        Delete { rep } => (
            SegmentKind::Gap,
            vec![(representative_index, rep.0, rep.1)],
        ),
    }
}

fn classify_variation(
    op: &alignment::DiffOp,
    segment_index: usize,
    rep_tokens: &[String],
    mem_tokens: &[String],
    language: Language,
) -> Variation {
    use alignment::DiffOp::*;

    let (category, sample_rep, sample_mem) = match op {
        Replace { rep, mem } => {
            let rep_text = rep_tokens[rep.0..rep.1].join(" ");
            let mem_text = mem_tokens[mem.0..mem.1].join(" ");
            (classify_replace(&rep_text, &mem_text, language), rep_text, mem_text)
        }
        Insert { mem } => (VariationCategory::Structure, String::new(), mem_tokens[mem.0..mem.1].join(" ")),
        Delete { rep } => (VariationCategory::Structure, rep_tokens[rep.0..rep.1].join(" "), String::new()),
        Equal { .. } => unreachable!("classify_variation only called for non-equal segments"),
    };

    let severity = severity_for_category(category);
    let inferred_parameter_type = infer_parameter_type(&sample_rep, &sample_mem, language, category);
    let candidate_parameter_name =
        (severity == VariationSeverity::Parameterizable).then(|| format!("param_{segment_index}"));

    Variation {
        segment_index,
        category,
        severity,
        inferred_parameter_type,
        candidate_parameter_name,
    }
}

fn classify_replace(rep_text: &str, mem_text: &str, language: Language) -> VariationCategory {
    if is_literal(rep_text) && is_literal(mem_text) {
        return VariationCategory::LiteralValue;
    }
    if language.type_names().contains(&rep_text) || language.type_names().contains(&mem_text) {
        return VariationCategory::Type;
    }
    if is_identifier(rep_text) && is_identifier(mem_text) {
        return VariationCategory::Identifier;
    }
    if rep_text.split(' ').count() > 1 || mem_text.split(' ').count() > 1 {
        return VariationCategory::Structure;
    }
    VariationCategory::Unrelated
}

fn is_literal(text: &str) -> bool {
    !text.is_empty() && (text.chars().all(|c| c.is_ascii_digit() || c == '.') || text.starts_with('"') || text.starts_with('\''))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_') && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// `Trivial` is reserved for segments that are equal after normalization
/// (a sanity-check outcome that should not occur post-alignment, since
/// `Equal` segments never reach this function); every genuine difference
/// among `literal_value`, `identifier`, and `type` categories is
/// parameterizable.
fn severity_for_category(category: VariationCategory) -> VariationSeverity {
    match category {
        VariationCategory::LiteralValue | VariationCategory::Identifier | VariationCategory::Type => {
            VariationSeverity::Parameterizable
        }
        VariationCategory::Structure => VariationSeverity::Structural,
        VariationCategory::Unrelated => VariationSeverity::Incompatible,
    }
}

fn infer_parameter_type(
    rep_text: &str,
    mem_text: &str,
    language: Language,
    category: VariationCategory,
) -> Option<String> {
    match category {
        VariationCategory::LiteralValue => {
            if rep_text.contains('.') || mem_text.contains('.') {
                Some(float_type_name(language))
            } else {
                Some(int_type_name(language))
            }
        }
        VariationCategory::Type => Some("type".to_string()),
        VariationCategory::Identifier => Some(generic_type_name(language)),
        _ => None,
    }
}

fn int_type_name(language: Language) -> String {
    match language {
        Language::Python => "int",
        Language::JavaScript | Language::TypeScript => "number",
        Language::Rust => "i64",
        Language::Go => "int",
    }
    .to_string()
}

fn float_type_name(language: Language) -> String {
    match language {
        Language::Python => "float",
        Language::JavaScript | Language::TypeScript => "number",
        Language::Rust => "f64",
        Language::Go => "float64",
    }
    .to_string()
}

fn generic_type_name(language: Language) -> String {
    match language {
        Language::Python => "object",
        Language::JavaScript => "any",
        Language::TypeScript => "unknown",
        Language::Rust => "impl std::fmt::Debug",
        Language::Go => "interface{}",
    }
    .to_string()
}

/// Count distinct parameters a merge would require: each `Parameterizable`
/// segment contributes one slot, deduplicated by segment index (a segment
/// varying across N members is still one parameter). `Structural`
/// variations are folded into the template body rather than becoming
/// parameters (see the generator), so they do not count here.
fn distinct_parameter_count(variations: &[Variation]) -> usize {
    variations
        .iter()
        .filter(|v| v.severity == VariationSeverity::Parameterizable)
        .map(|v| v.segment_index)
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Language;
    use crate::model::{FunctionUnit, SourceLocation};
    use std::path::PathBuf;

    fn unit(id: &str, body: &str) -> FunctionUnit {
        FunctionUnit {
            id: id.to_string(),
            location: SourceLocation {
                file_path: PathBuf::from(format!("{id}.py")),
                start_line: 1,
                end_line: 5,
                start_byte: 0,
                end_byte: body.len(),
            },
            language: Language::Python,
            name: id.to_string(),
            signature_text: format!("def {id}():"),
            body_text: body.to_string(),
            hash_canonical: 1,
            body_token_length: body.split_whitespace().count(),
        }
    }

    fn group(members: Vec<FunctionUnit>) -> DuplicationGroup {
        DuplicationGroup {
            group_id: "g".to_string(),
            language: Language::Python,
            members,
            representative_index: 0,
            similarity_score: 0.9,
            lines_per_member: 5,
            total_lines: 10,
            estimated_savings_lines: 5,
        }
    }

    #[test]
    fn literal_value_difference_is_parameterizable_and_mergeable() {
        let g = group(vec![unit("a", "return 1"), unit("b", "return 2")]);
        let analysis = analyze_group(&g, &EngineConfig::default());
        assert!(analysis.mergeable);
        assert!(analysis
            .variations
            .iter()
            .all(|v| v.severity == VariationSeverity::Parameterizable));
        assert!(analysis
            .variations
            .iter()
            .all(|v| v.category == VariationCategory::LiteralValue));
        assert_eq!(analysis.parameters.len(), 1);
        assert_eq!(analysis.parameters[0].name, "param_0");
    }

    #[test]
    fn unrelated_tokens_make_group_unmergeable() {
        let g = group(vec![
            unit("a", "connect() authenticate() close()"),
            unit("b", "compute_total(items) apply_discount(rate)"),
        ]);
        let analysis = analyze_group(&g, &EngineConfig::default());
        assert!(!analysis.mergeable);
        assert!(analysis.reason.is_some());
    }

    #[test]
    fn too_many_distinct_parameters_blocks_merge() {
        let g = group(vec![
            unit("a", "f(alpha, beta, gamma, delta, epsilon, zeta, eta)"),
            unit("b", "f(one, two, three, four, five, six, seven)"),
        ]);
        let mut config = EngineConfig::default();
        config.max_parameters = 2;
        let analysis = analyze_group(&g, &config);
        assert!(!analysis.mergeable);
    }
}
