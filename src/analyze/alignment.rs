//! Token-sequence alignment: a classic LCS-based diff between a reference
//! (representative) token sequence and one other member's tokens. Multiple
//! pairwise alignments against the same reference give every member a
//! shared coordinate axis (the representative's token indices), which
//! [`super::align_group`] uses to build the group-wide alignment.

/// One aligned (or unaligned) run between the reference and one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOp {
    /// Tokens are byte-for-byte identical at this run.
    Equal { rep: (usize, usize), mem: (usize, usize) },
    /// Both sides have tokens here, but they differ.
    Replace { rep: (usize, usize), mem: (usize, usize) },
    /// The member has tokens with no counterpart in the reference.
    Insert { mem: (usize, usize) },
    /// The reference has tokens with no counterpart in the member.
    Delete { rep: (usize, usize) },
}

/// Functions and body token counts the detector operates on are bounded by
/// the file-size cap, but the O(n*m) LCS table is still capped here so a
/// pathological single file never makes alignment quadratic-blow-up the
/// whole analysis pass.
const MAX_ALIGNMENT_TOKENS: usize = 4000;

/// Align `mem` against `rep` and return the run-length-encoded diff ops in
/// left-to-right order. Falls back to a single `Replace` spanning both
/// sequences if either exceeds [`MAX_ALIGNMENT_TOKENS`].
pub fn align(rep: &[String], mem: &[String]) -> Vec<DiffOp> {
    if rep.len() > MAX_ALIGNMENT_TOKENS || mem.len() > MAX_ALIGNMENT_TOKENS {
        return vec![DiffOp::Replace {
            rep: (0, rep.len()),
            mem: (0, mem.len()),
        }];
    }

    let table = lcs_table(rep, mem);
    let ops = backtrack(&table, rep, mem);
    merge_adjacent_replace_runs(ops)
}

fn lcs_table(rep: &[String], mem: &[String]) -> Vec<Vec<u32>> {
    let (n, m) = (rep.len(), mem.len());
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in 1..=n {
        for j in 1..=m {
            table[i][j] = if rep[i - 1] == mem[j - 1] {
                table[i - 1][j - 1] + 1
            } else {
                table[i - 1][j].max(table[i][j - 1])
            };
        }
    }
    table
}

fn backtrack(table: &[Vec<u32>], rep: &[String], mem: &[String]) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    let (mut i, mut j) = (rep.len(), mem.len());

    while i > 0 && j > 0 {
        if rep[i - 1] == mem[j - 1] {
            ops.push(DiffOp::Equal {
                rep: (i - 1, i),
                mem: (j - 1, j),
            });
            i -= 1;
            j -= 1;
        } else if table[i - 1][j] > table[i][j - 1] {
            ops.push(DiffOp::Delete { rep: (i - 1, i) });
            i -= 1;
        } else {
            ops.push(DiffOp::Insert { mem: (j - 1, j) });
            j -= 1;
        }
    }
    while i > 0 {
        ops.push(DiffOp::Delete { rep: (i - 1, i) });
        i -= 1;
    }
    while j > 0 {
        ops.push(DiffOp::Insert { mem: (j - 1, j) });
        j -= 1;
    }

    ops.reverse();
    ops
}

/// Merge adjacent `Delete` immediately followed by `Insert` (or vice
/// versa) into a single `Replace`, and coalesce consecutive runs of the
/// same op kind, so a multi-token substitution reads as one variation
/// rather than N single-token ones.
fn merge_adjacent_replace_runs(ops: Vec<DiffOp>) -> Vec<DiffOp> {
    let mut merged: Vec<DiffOp> = Vec::new();
    for op in ops {
        match (merged.last_mut(), &op) {
            (Some(DiffOp::Equal { rep: r, mem: m }), DiffOp::Equal { rep, mem }) if r.1 == rep.0 && m.1 == mem.0 => {
                r.1 = rep.1;
                m.1 = mem.1;
            }
            (Some(DiffOp::Delete { rep: r }), DiffOp::Delete { rep }) if r.1 == rep.0 => {
                r.1 = rep.1;
            }
            (Some(DiffOp::Insert { mem: m }), DiffOp::Insert { mem }) if m.1 == mem.0 => {
                m.1 = mem.1;
            }
            (Some(DiffOp::Delete { rep: r }), DiffOp::Insert { mem }) => {
                let replace = DiffOp::Replace { rep: *r, mem: *mem };
                *merged.last_mut().unwrap() = replace;
            }
            (Some(DiffOp::Replace { rep: r, mem: m }), DiffOp::Insert { mem }) if m.1 == mem.0 => {
                m.1 = mem.1;
                let _ = r;
            }
            (Some(DiffOp::Replace { rep: r, mem: _ }), DiffOp::Delete { rep }) if r.1 == rep.0 => {
                r.1 = rep.1;
            }
            _ => merged.push(op),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn identical_sequences_are_all_equal() {
        let seq = toks("a b c d");
        let ops = align(&seq, &seq);
        assert_eq!(ops, vec![DiffOp::Equal { rep: (0, 4), mem: (0, 4) }]);
    }

    #[test]
    fn single_token_substitution_is_a_replace() {
        let rep = toks("a b c");
        let mem = toks("a x c");
        let ops = align(&rep, &mem);
        assert_eq!(
            ops,
            vec![
                DiffOp::Equal { rep: (0, 1), mem: (0, 1) },
                DiffOp::Replace { rep: (1, 2), mem: (1, 2) },
                DiffOp::Equal { rep: (2, 3), mem: (2, 3) },
            ]
        );
    }

    #[test]
    fn trailing_insertion_is_detected() {
        let rep = toks("a b");
        let mem = toks("a b c");
        let ops = align(&rep, &mem);
        assert_eq!(
            ops,
            vec![
                DiffOp::Equal { rep: (0, 2), mem: (0, 2) },
                DiffOp::Insert { mem: (2, 3) },
            ]
        );
    }

    fn rep_span(op: &DiffOp) -> Option<(usize, usize)> {
        match op {
            DiffOp::Equal { rep, .. } | DiffOp::Replace { rep, .. } | DiffOp::Delete { rep } => Some(*rep),
            DiffOp::Insert { .. } => None,
        }
    }

    fn mem_span(op: &DiffOp) -> Option<(usize, usize)> {
        match op {
            DiffOp::Equal { mem, .. } | DiffOp::Replace { mem, .. } | DiffOp::Insert { mem } => Some(*mem),
            DiffOp::Delete { .. } => None,
        }
    }

    use proptest::prelude::*;

    proptest! {
        /// Whatever `align` produces, the rep-side spans (in order, skipping
        /// pure inserts) must tile `0..rep.len()` exactly, and likewise for
        /// the mem-side spans skipping pure deletes. No gap, no overlap, no
        /// token double-counted or dropped.
        #[test]
        fn diff_ops_tile_both_sequences(
            rep in proptest::collection::vec("[a-c]", 0..12),
            mem in proptest::collection::vec("[a-c]", 0..12),
        ) {
            let ops = align(&rep, &mem);

            let mut rep_cursor = 0;
            for span in ops.iter().filter_map(rep_span) {
                prop_assert_eq!(span.0, rep_cursor);
                prop_assert!(span.1 >= span.0);
                rep_cursor = span.1;
            }
            prop_assert_eq!(rep_cursor, rep.len());

            let mut mem_cursor = 0;
            for span in ops.iter().filter_map(mem_span) {
                prop_assert_eq!(span.0, mem_cursor);
                prop_assert!(span.1 >= span.0);
                mem_cursor = span.1;
            }
            prop_assert_eq!(mem_cursor, mem.len());
        }
    }
}
