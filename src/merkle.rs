//! Domain-separated SHAKE-256 Merkle tree with compact "frontier" openings.
//!
//! Leaves are opaque byte records (DECS decides what a record contains); this
//! module only knows how to hash, build, and open a perfect binary tree over
//! them. Hash domain separation follows §4.3/§6: leaf prefix `0x00`, internal
//! prefix `0x01`, padding hash `SHAKE256(0x00)`.
//!
//! A "frontier" opening deduplicates sibling hashes across a batch of opened
//! indices: whenever one opened leaf's sibling subtree is itself rooted at
//! another opened (hence already-known) node, the sibling is marked
//! omittable instead of being retransmitted.

#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use thiserror::Error;

/// Truncated hash length in bytes for both leaf and internal nodes.
pub const HASH_LEN: usize = 16;

/// A tree node hash.
pub type NodeHash = [u8; HASH_LEN];

/// Errors from tree construction, opening, and verification.
#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("cannot build a Merkle tree over zero leaves")]
    CommitmentFailure,
    #[error("recomputed root does not match the committed root")]
    MerkleRootMismatch,
    #[error("frontier opening referenced a node that was never transmitted or proven")]
    FrontierTruncated,
    #[error("frontier opening bitstream is malformed or truncated")]
    PathBitsMalformed,
}

fn shake256(parts: &[&[u8]]) -> NodeHash {
    let mut hasher = Shake256::default();
    for p in parts {
        hasher.update(p);
    }
    let mut reader = hasher.finalize_xof();
    let mut out = [0u8; HASH_LEN];
    reader.read(&mut out);
    out
}

/// `SHAKE256(0x00 || record)`, truncated to [`HASH_LEN`] bytes.
pub fn leaf_hash(record: &[u8]) -> NodeHash {
    shake256(&[&[0x00], record])
}

/// `SHAKE256(0x01 || left || right)`, truncated to [`HASH_LEN`] bytes.
pub fn internal_hash(left: &NodeHash, right: &NodeHash) -> NodeHash {
    shake256(&[&[0x01], left, right])
}

/// `SHAKE256(0x00)` used to pad unused leaves up to the next power of two.
pub fn padding_hash() -> NodeHash {
    shake256(&[&[0x00]])
}

/// A perfect binary Merkle tree over fixed-layout leaf records.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `layers[0]` are leaf hashes (padded to a power of two); the last
    /// layer is the single root.
    layers: Vec<Vec<NodeHash>>,
}

impl MerkleTree {
    /// Build a tree over `leaf_records`, padding to the next power of two
    /// with [`padding_hash`].
    pub fn build(leaf_records: &[Vec<u8>]) -> Result<Self, MerkleError> {
        if leaf_records.is_empty() {
            return Err(MerkleError::CommitmentFailure);
        }
        let padded_n = leaf_records.len().next_power_of_two();
        let mut leaves: Vec<NodeHash> = leaf_records.iter().map(|r| leaf_hash(r)).collect();
        leaves.resize(padded_n, padding_hash());

        let mut layers = vec![leaves];
        while layers.last().unwrap().len() > 1 {
            let prev = layers.last().unwrap();
            let next: Vec<NodeHash> = prev
                .chunks(2)
                .map(|pair| internal_hash(&pair[0], &pair[1]))
                .collect();
            layers.push(next);
        }
        Ok(MerkleTree { layers })
    }

    /// Tree depth, `⌈log2 padded_n⌉`.
    pub fn depth(&self) -> usize {
        self.layers.len() - 1
    }

    /// The committed root.
    pub fn root(&self) -> NodeHash {
        self.layers.last().unwrap()[0]
    }

    /// Number of (padded) leaves.
    pub fn padded_len(&self) -> usize {
        self.layers[0].len()
    }

    /// Build a deduplicated frontier opening for a set of leaf indices.
    pub fn open_frontier(&self, indices: &[usize]) -> FrontierOpening {
        let depth = self.depth();
        let mut pool: Vec<NodeHash> = Vec::new();
        let mut pool_index: HashMap<NodeHash, u32> = HashMap::new();
        let mut frontier_proof = Vec::new();
        let mut frontier_lr = Vec::new();
        let mut frontier_refs = Vec::new();

        let mut cur: Vec<usize> = indices.to_vec();
        cur.sort_unstable();
        cur.dedup();

        for level in 0..depth {
            let proven: std::collections::HashSet<usize> = cur.iter().copied().collect();
            let mut next: BTreeSet<usize> = BTreeSet::new();
            for &idx in &cur {
                let sib_idx = idx ^ 1;
                let sibling_is_right = sib_idx % 2 == 1;
                let omittable = proven.contains(&sib_idx);
                frontier_proof.push(!omittable);
                frontier_lr.push(sibling_is_right);
                if !omittable {
                    let hash = self.layers[level][sib_idx];
                    let id = *pool_index.entry(hash).or_insert_with(|| {
                        pool.push(hash);
                        (pool.len() - 1) as u32
                    });
                    frontier_refs.push(id);
                }
                next.insert(idx / 2);
            }
            cur = next.into_iter().collect();
        }

        let frontier_ref_width = bits_needed(pool.len());
        FrontierOpening {
            indices: indices.to_vec(),
            frontier_nodes: pool,
            frontier_proof,
            frontier_lr,
            frontier_refs,
            frontier_ref_width,
        }
    }
}

/// A compact, deduplicated Merkle opening for a batch of leaf indices.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrontierOpening {
    /// Opened leaf indices (not necessarily sorted).
    pub indices: Vec<usize>,
    /// Deduplicated pool of newly transmitted sibling hashes.
    pub frontier_nodes: Vec<NodeHash>,
    /// Per (level, branch) flag: `true` if the sibling was newly
    /// transmitted (consumes one `frontier_refs` entry), `false` if it was
    /// omittable because it is itself a proven node at this level.
    pub frontier_proof: Vec<bool>,
    /// Per (level, branch) flag: whether the sibling sits to the right.
    pub frontier_lr: Vec<bool>,
    /// Indices into `frontier_nodes`, one per `true` entry of
    /// `frontier_proof`, in traversal order.
    pub frontier_refs: Vec<u32>,
    /// Bits needed to index `frontier_nodes` (informational; mirrors the
    /// packed wire format's self-describing width byte).
    pub frontier_ref_width: u8,
}

/// Recompute the root from opened leaf hashes and a frontier opening,
/// rejecting on any mismatch or malformed bitstream.
pub fn verify_frontier_opening(
    root: &NodeHash,
    depth: usize,
    opened_leaf_hashes: &[(usize, NodeHash)],
    opening: &FrontierOpening,
) -> Result<(), MerkleError> {
    let mut values: HashMap<usize, NodeHash> = opened_leaf_hashes.iter().copied().collect();
    let mut cur: Vec<usize> = opening.indices.clone();
    cur.sort_unstable();
    cur.dedup();

    let mut proof_cursor = 0usize;
    let mut ref_cursor = 0usize;

    for _level in 0..depth {
        let mut next_values: HashMap<usize, NodeHash> = HashMap::new();
        for &idx in &cur {
            let is_transmitted = *opening
                .frontier_proof
                .get(proof_cursor)
                .ok_or(MerkleError::PathBitsMalformed)?;
            let sibling_is_right = *opening
                .frontier_lr
                .get(proof_cursor)
                .ok_or(MerkleError::PathBitsMalformed)?;
            proof_cursor += 1;

            let sib_idx = idx ^ 1;
            let sib_hash = if is_transmitted {
                let id = *opening
                    .frontier_refs
                    .get(ref_cursor)
                    .ok_or(MerkleError::PathBitsMalformed)? as usize;
                ref_cursor += 1;
                *opening
                    .frontier_nodes
                    .get(id)
                    .ok_or(MerkleError::FrontierTruncated)?
            } else {
                *values.get(&sib_idx).ok_or(MerkleError::FrontierTruncated)?
            };

            let cur_hash = *values.get(&idx).ok_or(MerkleError::FrontierTruncated)?;
            let (left, right) = if sibling_is_right {
                (cur_hash, sib_hash)
            } else {
                (sib_hash, cur_hash)
            };
            next_values.insert(idx / 2, internal_hash(&left, &right));
        }
        values = next_values;
        cur = values.keys().copied().collect();
        cur.sort_unstable();
    }

    let computed_root = *values.get(&0).ok_or(MerkleError::PathBitsMalformed)?;
    if computed_root != *root {
        return Err(MerkleError::MerkleRootMismatch);
    }
    Ok(())
}

fn bits_needed(n: usize) -> u8 {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i as u8; 8]).collect()
    }

    #[test]
    fn build_rejects_empty_rows() {
        assert!(matches!(
            MerkleTree::build(&[]),
            Err(MerkleError::CommitmentFailure)
        ));
    }

    #[test]
    fn frontier_open_and_verify_roundtrip() {
        let records = sample_records(8);
        let tree = MerkleTree::build(&records).unwrap();
        let opened = vec![1usize, 2, 6];
        let opening = tree.open_frontier(&opened);

        let leaf_hashes: Vec<(usize, NodeHash)> = opened
            .iter()
            .map(|&i| (i, leaf_hash(&records[i])))
            .collect();

        verify_frontier_opening(&tree.root(), tree.depth(), &leaf_hashes, &opening)
            .expect("honest opening verifies");
    }

    #[test]
    fn tampered_leaf_hash_is_rejected() {
        let records = sample_records(8);
        let tree = MerkleTree::build(&records).unwrap();
        let opened = vec![3usize];
        let opening = tree.open_frontier(&opened);

        let mut bad_hash = leaf_hash(&records[3]);
        bad_hash[0] ^= 0xFF;
        let leaf_hashes = vec![(3usize, bad_hash)];

        assert!(matches!(
            verify_frontier_opening(&tree.root(), tree.depth(), &leaf_hashes, &opening),
            Err(MerkleError::MerkleRootMismatch)
        ));
    }

    #[test]
    fn tampered_frontier_node_is_rejected() {
        let records = sample_records(8);
        let tree = MerkleTree::build(&records).unwrap();
        let opened = vec![0usize];
        let mut opening = tree.open_frontier(&opened);
        if let Some(node) = opening.frontier_nodes.get_mut(0) {
            node[0] ^= 0xFF;
        }
        let leaf_hashes = vec![(0usize, leaf_hash(&records[0]))];
        assert!(matches!(
            verify_frontier_opening(&tree.root(), tree.depth(), &leaf_hashes, &opening),
            Err(MerkleError::MerkleRootMismatch)
        ));
    }

    #[test]
    fn dedup_pool_is_smaller_than_naive_sibling_count_for_sibling_pairs() {
        let records = sample_records(8);
        let tree = MerkleTree::build(&records).unwrap();
        // Indices 0 and 1 are siblings: their mutual sibling references
        // should be omittable, not transmitted.
        let opening = tree.open_frontier(&[0, 1]);
        assert!(!opening.frontier_proof[0]);
        assert!(!opening.frontier_proof[1]);
    }
}
