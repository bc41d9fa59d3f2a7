//! Near-duplicate bucketing (C4): MinHash/LSH candidate generation plus a
//! union-find merge step, so near-duplicate grouping does not require an
//! all-pairs comparison over every function unit in the project.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use ahash::AHasher;

/// Token shingle size; three normalized tokens balances sensitivity to
/// reordering against false negatives from single-token edits.
const SHINGLE_SIZE: usize = 3;
const NUM_HASHES: usize = 32;
const NUM_BANDS: usize = 8;

/// Deterministic MinHash signature over a normalized token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinHashSignature {
    pub values: Vec<u64>,
}

impl MinHashSignature {
    pub fn jaccard_estimate(&self, other: &Self) -> f64 {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return 0.0;
        }
        let matching = self
            .values
            .iter()
            .zip(other.values.iter())
            .filter(|(a, b)| a == b)
            .count();
        matching as f64 / self.values.len() as f64
    }
}

fn shingles(tokens: &[&str]) -> Vec<String> {
    if tokens.len() < SHINGLE_SIZE {
        return Vec::new();
    }
    (0..=tokens.len() - SHINGLE_SIZE)
        .map(|i| tokens[i..i + SHINGLE_SIZE].join(" "))
        .collect()
}

fn hash_with_seed(shingle: &str, seed: u64) -> u64 {
    let mut hasher = AHasher::default();
    seed.hash(&mut hasher);
    shingle.hash(&mut hasher);
    hasher.finish()
}

/// Compute a `NUM_HASHES`-wide MinHash signature over a token stream's
/// shingles. Empty input yields an all-`u64::MAX` signature, which never
/// coincidentally matches a real signature.
pub fn compute_signature(tokens: &[&str]) -> MinHashSignature {
    let shingle_set = shingles(tokens);
    let mut values = vec![u64::MAX; NUM_HASHES];
    for shingle in &shingle_set {
        for (seed, slot) in values.iter_mut().enumerate() {
            let h = hash_with_seed(shingle, seed as u64);
            if h < *slot {
                *slot = h;
            }
        }
    }
    MinHashSignature { values }
}

/// Banded LSH index over a set of signatures, identified by an opaque key.
pub struct LshIndex<K> {
    bands: Vec<HashMap<u64, Vec<K>>>,
    signatures: HashMap<K, MinHashSignature>,
}

impl<K> Default for LshIndex<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self {
            bands: (0..NUM_BANDS).map(|_| HashMap::new()).collect(),
            signatures: HashMap::new(),
        }
    }
}

impl<K> LshIndex<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: K, signature: MinHashSignature) {
        let per_band = signature.values.len() / NUM_BANDS;
        if per_band > 0 {
            for (band_idx, band) in self.bands.iter_mut().enumerate() {
                let start = band_idx * per_band;
                let end = (start + per_band).min(signature.values.len());
                let band_hash = hash_band(&signature.values[start..end]);
                band.entry(band_hash).or_default().push(key.clone());
            }
        }
        self.signatures.insert(key, signature);
    }

    /// All distinct pairs sharing at least one LSH band, each annotated
    /// with its estimated Jaccard similarity. A pair appears at most once
    /// regardless of how many bands it shares.
    pub fn candidate_pairs(&self) -> Vec<(K, K, f64)> {
        let mut seen = std::collections::HashSet::new();
        let mut pairs = Vec::new();

        for band in &self.bands {
            for bucket in band.values() {
                if bucket.len() < 2 {
                    continue;
                }
                for i in 0..bucket.len() {
                    for j in (i + 1)..bucket.len() {
                        let (a, b) = (&bucket[i], &bucket[j]);
                        let pair_key = pair_identity(a, b);
                        if !seen.insert(pair_key) {
                            continue;
                        }
                        if let (Some(sig_a), Some(sig_b)) =
                            (self.signatures.get(a), self.signatures.get(b))
                        {
                            let sim = sig_a.jaccard_estimate(sig_b);
                            pairs.push((a.clone(), b.clone(), sim));
                        }
                    }
                }
            }
        }
        pairs
    }
}

fn pair_identity<K: Eq + Hash + Clone>(a: &K, b: &K) -> (u64, u64) {
    let mut ha = AHasher::default();
    a.hash(&mut ha);
    let mut hb = AHasher::default();
    b.hash(&mut hb);
    let (x, y) = (ha.finish(), hb.finish());
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}

fn hash_band(band: &[u64]) -> u64 {
    let mut hasher = AHasher::default();
    band.hash(&mut hasher);
    hasher.finish()
}

/// Minimal union-find over `0..n`, used to merge candidate pairs that meet
/// the similarity threshold into connected groups.
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Group members by root, in first-seen order.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        by_root.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_token_streams_have_identical_signatures() {
        let tokens = vec!["$ID", "=", "$NUM", "+", "$ID"];
        let sig1 = compute_signature(&tokens);
        let sig2 = compute_signature(&tokens);
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.jaccard_estimate(&sig2), 1.0);
    }

    #[test]
    fn disjoint_token_streams_estimate_low_similarity() {
        let a = vec!["$ID", "=", "$NUM", "+", "$ID", "*", "$NUM"];
        let b = vec!["return", "$STR", "if", "$BOOL", "else", "$NULL", "while"];
        let sig_a = compute_signature(&a);
        let sig_b = compute_signature(&b);
        assert!(sig_a.jaccard_estimate(&sig_b) < 0.3);
    }

    #[test]
    fn lsh_index_surfaces_near_identical_pair() {
        let mut index = LshIndex::new();
        let base = vec!["$ID", "=", "$NUM", "+", "$ID", "*", "$NUM", "-", "$ID"];
        let mut variant = base.clone();
        variant[2] = "$STR";

        index.insert("a", compute_signature(&base));
        index.insert("b", compute_signature(&variant));
        index.insert("c", compute_signature(&["return", "$NULL"]));

        let pairs = index.candidate_pairs();
        assert!(pairs.iter().any(|(x, y, sim)| {
            (*x == "a" && *y == "b" || *x == "b" && *y == "a") && *sim > 0.5
        }));
    }

    #[test]
    fn union_find_merges_transitively() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 1);
        uf.union(1, 2);
        let groups = uf.groups();
        let group_with_zero = groups.iter().find(|g| g.contains(&0)).unwrap();
        assert!(group_with_zero.contains(&1));
        assert!(group_with_zero.contains(&2));
        assert!(!group_with_zero.contains(&3));
    }
}
