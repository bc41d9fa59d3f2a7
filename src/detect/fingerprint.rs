//! Canonical-hash fingerprinting: normalizes a function body's AST into a
//! token stream that is invariant to identifier renaming and literal
//! substitution, then hashes it for exact-structural grouping.

use crate::adapter::{AstDump, AstNode};

/// Function bodies shorter than this many normalized tokens are not worth
/// fingerprinting; near-duplicate grouping relies on `min_lines` instead.
pub const MIN_TOKEN_COUNT: usize = 8;

const COMMENT_KINDS: [&str; 3] = ["comment", "block_comment", "line_comment"];

/// Mapping from raw AST node kinds to normalized token names, collapsing
/// every language's spelling of "identifier", "string literal", etc. into
/// one vocabulary so cross-construct renames still compare equal.
const TOKEN_MAPPINGS: [(&str, &[&str]); 6] = [
    (
        "$ID",
        &[
            "identifier",
            "field_identifier",
            "property_identifier",
            "shorthand_property_identifier_pattern",
            "member_expression",
            "scoped_identifier",
        ],
    ),
    ("$TYPE", &["type_identifier", "primitive_type"]),
    ("$STR", &["string", "string_literal", "raw_string_literal", "interpreted_string_literal"]),
    ("$NUM", &["number", "integer", "float", "decimal_literal", "float_literal", "int_literal"]),
    ("$BOOL", &["true", "false"]),
    ("$NULL", &["null", "nil", "none"]),
];

fn normalize_token_kind(kind: &str) -> Option<&'static str> {
    if COMMENT_KINDS.contains(&kind) {
        return None;
    }
    for (token, kinds) in &TOKEN_MAPPINGS {
        if kinds.contains(&kind) {
            return Some(token);
        }
    }
    None
}

/// Build the normalized token stream for one AST dump, in document order.
/// Nodes whose kind maps to a normalized token contribute exactly one
/// entry; structural (unnamed, punctuation) nodes and comments contribute
/// none, so renaming a variable or changing a literal's value never
/// changes the stream, but reordering statements does.
pub fn normalized_tokens(ast: &AstDump) -> Vec<&'static str> {
    ast.nodes
        .iter()
        .filter(|n| n.is_named)
        .filter_map(|n| match normalize_token_kind(&n.kind) {
            Some(mapped) => Some(mapped),
            None => static_kind_token(n),
        })
        .collect()
}

/// Non-literal named nodes (control flow, operators, declarations) keep
/// their own kind as the token, via a small leaked-once intern table, so
/// that structural differences (e.g. `if` vs `while`) still distinguish
/// fingerprints.
fn static_kind_token(node: &AstNode) -> Option<&'static str> {
    if COMMENT_KINDS.contains(&node.kind.as_str()) {
        return None;
    }
    Some(intern(&node.kind))
}

fn intern(kind: &str) -> &'static str {
    use once_cell::sync::Lazy;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    static TABLE: Lazy<Mutex<HashMap<String, &'static str>>> = Lazy::new(|| Mutex::new(HashMap::new()));
    let mut table = TABLE.lock();
    if let Some(existing) = table.get(kind) {
        return existing;
    }
    let leaked: &'static str = Box::leak(kind.to_string().into_boxed_str());
    table.insert(kind.to_string(), leaked);
    leaked
}

/// Hash the normalized token stream with blake3, truncated to 64 bits.
/// Returns `None` if the body is too short to fingerprint meaningfully.
pub fn canonical_hash(ast: &AstDump) -> Option<(u64, usize)> {
    let tokens = normalized_tokens(ast);
    if tokens.len() < MIN_TOKEN_COUNT {
        return None;
    }
    let joined = tokens.join(" ");
    let hash = blake3::hash(joined.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    Some((u64::from_le_bytes(bytes), tokens.len()))
}
