//! Code generator (C6): synthesizes a canonical extracted function plus
//! per-call-site rewrites from a group's alignment. Never touches disk —
//! every output is a text-and-location instruction consumed by the
//! applicator (C9).

use std::collections::BTreeMap;

use crate::analyze::GroupAnalysis;
use crate::model::{
    CallRewrite, DuplicationGroup, ExtractedFunctionPlan, ExtractionStrategy, GeneratePlanOptions,
    Variation, VariationSeverity,
};

/// Build the canonical extracted-function plan and one call-rewrite per
/// group member. Callers must check `GroupAnalysis::mergeable` first;
/// this function does not re-validate it. `analysis.parameters` is used
/// as-is rather than re-derived from `analysis.variations`.
pub fn generate_plan(
    group: &DuplicationGroup,
    analysis: &GroupAnalysis,
    options: &GeneratePlanOptions,
) -> ExtractedFunctionPlan {
    let representative = group.representative();
    let rep_tokens = tokenize(&representative.body_text);

    let parameters = analysis.parameters.clone();
    let body_template = build_body_template(
        &rep_tokens,
        &analysis.segments,
        group.representative_index,
        &analysis.variations,
    );
    let canonical_name = options.name.clone().unwrap_or_else(|| canonical_name(group));
    let required_imports = required_imports(options);

    let call_rewrites = group
        .members
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != group.representative_index)
        .map(|(idx, member)| {
            let member_tokens = tokenize(&member.body_text);
            let args = arguments_for_member(idx, &member_tokens, &analysis.segments, &analysis.variations);
            CallRewrite {
                member_id: member.id.clone(),
                location: member.location.clone(),
                replacement_text: format!("{canonical_name}({})", args.join(", ")),
                import_additions: Vec::new(),
            }
        })
        .collect();

    ExtractedFunctionPlan {
        group_id: group.group_id.clone(),
        canonical_name,
        parameters,
        return_type: None,
        body_template,
        language: group.language,
        required_imports,
        call_rewrites,
    }
}

/// Derive the canonical name by stripping a common numeric/alpha suffix
/// off the representative's own name (so `process_item2` and
/// `process_item_b` both collapse to `process_item`) and prefixing
/// `extracted_`. Falls back to a fragment of the group id when the
/// representative has no usable name at all.
fn canonical_name(group: &DuplicationGroup) -> String {
    let base = &group.representative().name;
    let stem = if base == "<anonymous>" || base.is_empty() {
        group.group_id[..8.min(group.group_id.len())].to_string()
    } else {
        strip_common_suffix(base)
    };
    format!("extracted_{stem}")
}

/// Strip a trailing run of digits (with an optional separating
/// underscore), or else a trailing single-letter suffix introduced by an
/// underscore (`_a`, `_b`), from `name`. Leaves `name` untouched if
/// stripping would empty it or no such suffix is present.
fn strip_common_suffix(name: &str) -> String {
    let digit_trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let stripped = if digit_trimmed.len() != name.len() {
        digit_trimmed.trim_end_matches('_')
    } else if let Some(idx) = name.rfind('_') {
        let suffix = &name[idx + 1..];
        if suffix.len() == 1 && suffix.chars().all(|c| c.is_ascii_alphabetic()) {
            &name[..idx]
        } else {
            name
        }
    } else {
        name
    };

    if stripped.is_empty() {
        name.to_string()
    } else {
        stripped.to_string()
    }
}

/// A `NewFile` strategy with a `target_file` hint adds one import for the
/// module the extracted function will live in; any other combination of
/// options needs no imports at generation time.
fn required_imports(options: &GeneratePlanOptions) -> Vec<String> {
    match (options.strategy, &options.target_file) {
        (Some(ExtractionStrategy::NewFile), Some(target)) => {
            let module = target.file_stem().and_then(|s| s.to_str()).unwrap_or("extracted");
            vec![module.to_string()]
        }
        _ => Vec::new(),
    }
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

/// Rebuild the representative's body with each parameterized segment's
/// representative-token span replaced by its parameter name. The span for
/// each variation's `segment_index` comes from the matching alignment
/// segment's representative member-span (recorded by `analyze_group`),
/// so substitution lands exactly on the tokens that actually varied.
fn build_body_template(
    rep_tokens: &[String],
    segments: &[crate::model::AlignmentSegment],
    representative_index: usize,
    variations: &[Variation],
) -> String {
    let mut replacements: BTreeMap<usize, (usize, usize, String)> = BTreeMap::new();

    for v in variations {
        if v.severity != VariationSeverity::Parameterizable {
            continue;
        }
        let Some(name) = &v.candidate_parameter_name else {
            continue;
        };
        let Some(segment) = segments.get(v.segment_index) else {
            continue;
        };
        let Some(&(_, start, end)) = segment
            .member_spans
            .iter()
            .find(|(member, _, _)| *member == representative_index)
        else {
            continue;
        };
        replacements.entry(start).or_insert((start, end, name.clone()));
    }

    let mut rendered = Vec::new();
    let mut idx = 0;
    while idx < rep_tokens.len() {
        if let Some(&(start, end, ref name)) = replacements.get(&idx) {
            rendered.push(name.clone());
            idx = end.max(start + 1);
        } else {
            rendered.push(rep_tokens[idx].clone());
            idx += 1;
        }
    }

    rendered.join(" ")
}

/// Build the positional argument list for one non-representative member,
/// in the same order as `GroupAnalysis::parameters`: the member's own
/// token text at each parameterized segment's member-span, so the call site passes
/// back whatever value that member originally had inline.
fn arguments_for_member(
    member_index: usize,
    member_tokens: &[String],
    segments: &[crate::model::AlignmentSegment],
    variations: &[Variation],
) -> Vec<String> {
    let mut by_segment: BTreeMap<usize, String> = BTreeMap::new();
    for v in variations {
        if v.severity != VariationSeverity::Parameterizable {
            continue;
        }
        let Some(segment) = segments.get(v.segment_index) else {
            continue;
        };
        let value = segment
            .member_spans
            .iter()
            .find(|(member, _, _)| *member == member_index)
            .and_then(|&(_, start, end)| member_tokens.get(start..end))
            .map(|slice| slice.join(" "))
            .unwrap_or_else(|| {
                v.candidate_parameter_name
                    .clone()
                    .unwrap_or_else(|| format!("param_{}", v.segment_index))
            });
        by_segment.entry(v.segment_index).or_insert(value);
    }
    by_segment.into_values().collect()
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
                end_line: 2,
                start_byte: 0,
                end_byte: body.len(),
            },
            language: Language::Python,
            name: "compute".to_string(),
            signature_text: "def compute():".to_string(),
            body_text: body.to_string(),
            hash_canonical: 1,
            body_token_length: body.split_whitespace().count(),
        }
    }

    #[test]
    fn plan_includes_one_parameter_per_literal_difference() {
        let group = DuplicationGroup {
            group_id: "g1".to_string(),
            language: Language::Python,
            members: vec![unit("a", "return 1"), unit("b", "return 2")],
            representative_index: 0,
            similarity_score: 0.95,
            lines_per_member: 2,
            total_lines: 4,
            estimated_savings_lines: 2,
        };
        let analysis = crate::analyze::analyze_group(&group, &crate::config::EngineConfig::default());
        let plan = generate_plan(&group, &analysis, &GeneratePlanOptions::default());

        assert_eq!(plan.parameters.len(), 1);
        assert!(plan.body_template.contains(&plan.parameters[0].name));
        assert_eq!(plan.call_rewrites.len(), 1);
    }

    #[test]
    fn canonical_name_is_derived_from_representative() {
        let group = DuplicationGroup {
            group_id: "g2".to_string(),
            language: Language::Python,
            members: vec![unit("a", "return 1"), unit("b", "return 2")],
            representative_index: 0,
            similarity_score: 0.95,
            lines_per_member: 2,
            total_lines: 4,
            estimated_savings_lines: 2,
        };
        let analysis = crate::analyze::analyze_group(&group, &crate::config::EngineConfig::default());
        let plan = generate_plan(&group, &analysis, &GeneratePlanOptions::default());
        assert_eq!(plan.canonical_name, "extracted_compute");
    }

    #[test]
    fn canonical_name_strips_trailing_numeric_suffix() {
        assert_eq!(strip_common_suffix("compute_total_2"), "compute_total");
        assert_eq!(strip_common_suffix("computeTotal2"), "computeTotal");
        assert_eq!(strip_common_suffix("process_a"), "process");
        assert_eq!(strip_common_suffix("compute"), "compute");
    }

    #[test]
    fn explicit_name_option_overrides_derived_canonical_name() {
        let group = DuplicationGroup {
            group_id: "g3".to_string(),
            language: Language::Python,
            members: vec![unit("a", "return 1"), unit("b", "return 2")],
            representative_index: 0,
            similarity_score: 0.95,
            lines_per_member: 2,
            total_lines: 4,
            estimated_savings_lines: 2,
        };
        let analysis = crate::analyze::analyze_group(&group, &crate::config::EngineConfig::default());
        let options = GeneratePlanOptions {
            name: Some("merged_compute".to_string()),
            ..Default::default()
        };
        let plan = generate_plan(&group, &analysis, &options);
        assert_eq!(plan.canonical_name, "merged_compute");
    }

    #[test]
    fn new_file_strategy_with_target_adds_module_import() {
        let group = DuplicationGroup {
            group_id: "g4".to_string(),
            language: Language::Python,
            members: vec![unit("a", "return 1"), unit("b", "return 2")],
            representative_index: 0,
            similarity_score: 0.95,
            lines_per_member: 2,
            total_lines: 4,
            estimated_savings_lines: 2,
        };
        let analysis = crate::analyze::analyze_group(&group, &crate::config::EngineConfig::default());
        let options = GeneratePlanOptions {
            strategy: Some(ExtractionStrategy::NewFile),
            target_file: Some(PathBuf::from("shared/dedup.py")),
            ..Default::default()
        };
        let plan = generate_plan(&group, &analysis, &options);
        assert_eq!(plan.required_imports, vec!["dedup".to_string()]);
    }
}
