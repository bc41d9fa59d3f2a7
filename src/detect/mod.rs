//! Duplication detector (C4): extracts function-like units from a set of
//! files, groups exact structural duplicates by canonical hash, and groups
//! near-duplicates via LSH-bucketed candidate generation confirmed by
//! pairwise edit-similarity.

pub mod bucketing;
pub mod fingerprint;

use std::collections::HashMap;
use std::path::PathBuf;

use uuid::Uuid;

use crate::adapter::{Match, PatternExecutor, RunOptions};
use crate::config::{EngineConfig, Language};
use crate::errors::Result;
use crate::model::{DuplicationGroup, FunctionUnit, SourceLocation};

/// Run every function-shaped pattern for `language` across `roots` and
/// convert each match into a [`FunctionUnit`], computing its canonical
/// hash along the way. Matches whose body is too short to fingerprint
/// are still returned (for coverage accounting) but are excluded from
/// grouping by the caller via `hash_canonical == 0`.
pub async fn extract_function_units(
    executor: &dyn PatternExecutor,
    language: Language,
    roots: &[PathBuf],
) -> Result<Vec<FunctionUnit>> {
    let mut units = Vec::new();
    for pattern in language.function_patterns() {
        let matches = executor
            .run_pattern(language, pattern, roots, &RunOptions::default())
            .await?;
        for m in matches {
            if let Some(unit) = build_function_unit(executor, language, &m).await? {
                units.push(unit);
            }
        }
    }
    Ok(units)
}

async fn build_function_unit(
    executor: &dyn PatternExecutor,
    language: Language,
    m: &Match,
) -> Result<Option<FunctionUnit>> {
    let ast = executor.dump_ast(language, &m.text).await?;
    let Some((hash, token_len)) = fingerprint::canonical_hash(&ast) else {
        return Ok(None);
    };

    let name = m
        .meta_vars
        .get("NAME")
        .cloned()
        .unwrap_or_else(|| "<anonymous>".to_string());

    let location = SourceLocation {
        file_path: m.file.clone(),
        start_line: m.range.start.line,
        end_line: m.range.end.line,
        start_byte: m.range.start.byte,
        end_byte: m.range.end.byte,
    };

    Ok(Some(FunctionUnit {
        id: Uuid::new_v4().to_string(),
        location,
        language,
        name,
        signature_text: first_line(&m.text),
        body_text: m.text.clone(),
        hash_canonical: hash,
        body_token_length: token_len,
    }))
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().trim().to_string()
}

/// Group function units into exact-structural and near-duplicate groups,
/// applying `min_lines` and `max_candidates` from configuration. Units
/// with a zero (unfingerprintable) hash never participate.
pub fn group_duplicates(units: &[FunctionUnit], config: &EngineConfig) -> Vec<DuplicationGroup> {
    let mut groups = Vec::new();

    let (exact_groups, remaining) = group_exact(units, config);
    groups.extend(exact_groups);

    let near_groups = group_near_duplicates(&remaining, config);
    groups.extend(near_groups);

    groups.sort_by(|a, b| b.estimated_savings_lines.cmp(&a.estimated_savings_lines));
    groups.truncate(config.max_candidates);
    groups
}

fn group_exact<'a>(
    units: &'a [FunctionUnit],
    config: &EngineConfig,
) -> (Vec<DuplicationGroup>, Vec<&'a FunctionUnit>) {
    let mut by_hash: HashMap<u64, Vec<&FunctionUnit>> = HashMap::new();
    for unit in units {
        by_hash.entry(unit.hash_canonical).or_default().push(unit);
    }

    let mut groups = Vec::new();
    let mut ungrouped = Vec::new();

    for (_, members) in by_hash {
        if members.len() < 2 || !passes_min_lines(&members, config) {
            ungrouped.extend(members);
            continue;
        }
        groups.push(build_group(members, 1.0));
    }

    (groups, ungrouped)
}

fn group_near_duplicates(units: &[&FunctionUnit], config: &EngineConfig) -> Vec<DuplicationGroup> {
    if units.len() < 2 {
        return Vec::new();
    }

    let tokenized: Vec<Vec<String>> = units.iter().map(|u| tokenize_body(&u.body_text)).collect();
    let signatures: Vec<_> = tokenized
        .iter()
        .map(|toks| {
            let refs: Vec<&str> = toks.iter().map(|s| s.as_str()).collect();
            bucketing::compute_signature(&refs)
        })
        .collect();

    let mut index = bucketing::LshIndex::new();
    for (idx, sig) in signatures.iter().enumerate() {
        index.insert(idx, sig.clone());
    }

    let mut uf = bucketing::UnionFind::new(units.len());
    let mut similarity_for_pair: HashMap<(usize, usize), f64> = HashMap::new();

    for (a, b, _estimate) in index.candidate_pairs() {
        if !line_counts_within_tolerance(units[a], units[b]) {
            continue;
        }
        let sim = edit_similarity(units[a].body_text.as_str(), units[b].body_text.as_str());
        if sim >= config.min_similarity {
            uf.union(a, b);
            let key = if a <= b { (a, b) } else { (b, a) };
            similarity_for_pair.insert(key, sim);
        }
    }

    let mut groups = Vec::new();
    for group_indices in uf.groups() {
        if group_indices.len() < 2 {
            continue;
        }
        let members: Vec<&FunctionUnit> = group_indices.iter().map(|&i| units[i]).collect();
        if !passes_min_lines(&members, config) {
            continue;
        }
        let avg_similarity = average_pairwise_similarity(&group_indices, &similarity_for_pair);
        groups.push(build_group(members, avg_similarity));
    }
    groups
}

fn average_pairwise_similarity(indices: &[usize], sims: &HashMap<(usize, usize), f64>) -> f64 {
    let mut total = 0.0;
    let mut count = 0;
    for i in 0..indices.len() {
        for j in (i + 1)..indices.len() {
            let key = if indices[i] <= indices[j] {
                (indices[i], indices[j])
            } else {
                (indices[j], indices[i])
            };
            if let Some(sim) = sims.get(&key) {
                total += sim;
                count += 1;
            }
        }
    }
    if count == 0 {
        1.0
    } else {
        total / count as f64
    }
}

/// A plain lexical tokenizer over raw body text, used for near-duplicate
/// shingling. The detector only retains the hash and token count from the
/// AST dump (to avoid holding one `AstDump` per function unit in memory),
/// so near-duplicate bucketing works over body text directly rather than
/// the AST-normalized stream used for exact-structural hashing.
fn tokenize_body(text: &str) -> Vec<String> {
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

/// Near-duplicate line counts must not differ by more than 20%; two
/// candidates whose bodies only happen to tokenize similarly despite very
/// different lengths (e.g. one wraps the other in a loop) are not safe to
/// merge into one extracted function.
const MAX_LINE_COUNT_RATIO_DELTA: f64 = 0.2;

fn line_counts_within_tolerance(a: &FunctionUnit, b: &FunctionUnit) -> bool {
    let lines_a = a.location.line_count() as f64;
    let lines_b = b.location.line_count() as f64;
    if lines_a == 0.0 || lines_b == 0.0 {
        return false;
    }
    (lines_a.max(lines_b) / lines_a.min(lines_b) - 1.0) <= MAX_LINE_COUNT_RATIO_DELTA
}

fn edit_similarity(a: &str, b: &str) -> f64 {
    let norm_a = normalize_whitespace(a);
    let norm_b = normalize_whitespace(b);
    let max_len = norm_a.len().max(norm_b.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = edit_distance::edit_distance(&norm_a, &norm_b);
    1.0 - (distance as f64 / max_len as f64)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn passes_min_lines(members: &[&FunctionUnit], config: &EngineConfig) -> bool {
    members
        .iter()
        .all(|m| m.location.line_count() >= config.min_lines)
}

fn build_group(members: Vec<&FunctionUnit>, similarity_score: f64) -> DuplicationGroup {
    let language = members[0].language;
    let lines_per_member = members
        .iter()
        .map(|m| m.location.line_count())
        .max()
        .unwrap_or(0);
    let total_lines = members.iter().map(|m| m.location.line_count()).sum();
    let representative_index = representative_index(&members);

    // Extracting one shared function saves every member's body except the
    // canonical one; members that got shorter via parameterization are
    // accounted for later by the code generator, so this is an upper bound.
    let estimated_savings_lines = (members.len() as i64 - 1) * lines_per_member as i64;

    DuplicationGroup {
        group_id: Uuid::new_v4().to_string(),
        language,
        members: members.into_iter().cloned().collect(),
        representative_index,
        similarity_score,
        lines_per_member,
        total_lines,
        estimated_savings_lines,
    }
}

/// Pick the member with the median token length as representative, tying
/// on lexicographically smallest file path for determinism.
fn representative_index(members: &[&FunctionUnit]) -> usize {
    let mut by_token_len: Vec<usize> = (0..members.len()).collect();
    by_token_len.sort_by(|&a, &b| {
        members[a]
            .body_token_length
            .cmp(&members[b].body_token_length)
            .then_with(|| members[a].location.file_path.cmp(&members[b].location.file_path))
    });
    by_token_len[by_token_len.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Language;

    fn unit(id: &str, hash: u64, lines: usize, body: &str) -> FunctionUnit {
        FunctionUnit {
            id: id.to_string(),
            location: SourceLocation {
                file_path: PathBuf::from(format!("{id}.py")),
                start_line: 1,
                end_line: lines,
                start_byte: 0,
                end_byte: body.len(),
            },
            language: Language::Python,
            name: id.to_string(),
            signature_text: format!("def {id}():"),
            body_text: body.to_string(),
            hash_canonical: hash,
            body_token_length: body.split_whitespace().count(),
        }
    }

    #[test]
    fn exact_duplicates_form_one_group_with_similarity_one() {
        let units = vec![
            unit("a", 42, 6, "return x + 1"),
            unit("b", 42, 6, "return y + 1"),
            unit("c", 99, 6, "return z * 2"),
        ];
        let config = EngineConfig::default();
        let groups = group_duplicates(&units, &config);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
        assert!(groups[0].is_exact());
    }

    #[test]
    fn groups_below_min_lines_are_dropped() {
        let units = vec![unit("a", 7, 1, "pass"), unit("b", 7, 1, "pass")];
        let mut config = EngineConfig::default();
        config.min_lines = 5;
        let groups = group_duplicates(&units, &config);
        assert!(groups.is_empty());
    }

    #[test]
    fn representative_picks_median_token_length() {
        let short = unit("short", 1, 5, "a");
        let medium = unit("medium", 1, 5, "a b c");
        let long = unit("long", 1, 5, "a b c d e");
        let members = vec![&short, &medium, &long];
        let idx = representative_index(&members);
        assert_eq!(members[idx].id, "medium");
    }

    #[test]
    fn near_duplicates_require_minimum_similarity() {
        let units = vec![
            unit("a", 11, 8, "total = 0\nfor x in items:\n    total += x\nreturn total"),
            unit("b", 12, 8, "total = 0\nfor x in items:\n    total += x * 2\nreturn total"),
            unit("c", 13, 8, "connect()\nauthenticate()\nclose()\nlog('done')"),
        ];
        let mut config = EngineConfig::default();
        config.min_similarity = 0.5;
        let groups = group_duplicates(&units, &config);
        assert!(groups.iter().any(|g| g.members.len() == 2 && !g.is_exact()));
    }

    #[test]
    fn near_duplicates_with_line_counts_too_far_apart_are_not_grouped() {
        let body = "total = 0\nfor x in items:\n    total += x\nreturn total";
        let units = vec![unit("a", 21, 8, body), unit("b", 22, 20, body)];
        let mut config = EngineConfig::default();
        config.min_similarity = 0.5;
        config.min_lines = 1;
        let groups = group_duplicates(&units, &config);
        assert!(groups.is_empty());
    }
}
