//! DECS: degree-bounded evaluation-domain commitment scheme (§4.4).
//!
//! Commits a row family `P_1..P_r` together with `η` independent random mask
//! rows `M_1..M_η`, and lets a verifier check `η` linear combinations
//! `R_k = M_k + Σ_j Γ_{k,j}·P_j` against Merkle-opened columns without
//! reconstructing the rows themselves. `merkle.rs` owns hashing and frontier
//! compaction; this module owns the leaf byte layout, the `Γ`-derivation
//! PRG, and the per-column linear-relation check.
//!
//! Leaf value width: the data model (§3/§6) writes each `P`/`M` value as a
//! 4-byte little-endian residue, which cannot losslessly hold a residue mod
//! the 64-bit Goldilocks prime this crate fixes (§4.1). Leaf values are
//! encoded as 8-byte little-endian residues instead; the column index still
//! uses the literal 2-byte little-endian encoding since every example
//! parameter set keeps `N` well under `2^16`.

#![forbid(unsafe_code)]

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use thiserror::Error;

use crate::field::{Fq, Ring, MODULUS};
use crate::merkle::{self, verify_frontier_opening, FrontierOpening, MerkleError, MerkleTree, NodeHash};

/// Errors from DECS commit/open/verify.
#[derive(Debug, Error)]
pub enum DecsError {
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error("R_{k} has degree exceeding the declared bound {bound} (nonzero coefficient at {at})")]
    DegreeExceeded { k: usize, bound: usize, at: usize },
    #[error("linear relation R_{k}(i) = M_{k}(i) + Σ_j Γ_{{k,j}}·P_j(i) failed at column {i}")]
    LinearRelationFailed { k: usize, i: usize },
    #[error("opening is malformed: {0}")]
    OpeningMalformed(&'static str),
}

/// Degree bound, repetition count, and nonce length for a DECS instance.
#[derive(Debug, Clone, Copy)]
pub struct DecsParams {
    pub d: usize,
    pub eta: usize,
    pub nonce_len: usize,
}

/// Everything the prover needs to answer later openings; immutable once
/// built (§9: "ProverKey is read-only after commit").
#[derive(Debug, Clone)]
pub struct ProverKey {
    params: DecsParams,
    /// Coefficient-domain witness rows `P_1..P_r`.
    row_coeffs: Vec<Vec<Fq>>,
    /// Coefficient-domain mask rows `M_1..M_eta`.
    mask_coeffs: Vec<Vec<Fq>>,
    /// Evaluation-domain values (over the full ring) for rows, then masks.
    row_evals: Vec<Vec<Fq>>,
    mask_evals: Vec<Vec<Fq>>,
    nonce_seed: [u8; 32],
    tree: MerkleTree,
}

impl ProverKey {
    pub fn root(&self) -> NodeHash {
        self.tree.root()
    }

    pub fn depth(&self) -> usize {
        self.tree.depth()
    }

    pub fn row_count(&self) -> usize {
        self.row_coeffs.len()
    }
}

fn derive_nonce(seed: &[u8; 32], index: usize, nonce_len: usize) -> Vec<u8> {
    let mut hasher = Shake256::default();
    hasher.update(seed);
    hasher.update(b"decs-nonce");
    hasher.update(&(index as u32).to_le_bytes());
    let mut reader = hasher.finalize_xof();
    let mut out = vec![0u8; nonce_len];
    reader.read(&mut out);
    out
}

/// Build the leaf byte record for column `index` from the *full* evaluation
/// matrices (used at commit time, when every column is being hashed).
fn leaf_record_full(
    row_evals: &[Vec<Fq>],
    mask_evals: &[Vec<Fq>],
    index: usize,
    nonce: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 * (row_evals.len() + mask_evals.len()) + 2 + nonce.len());
    for row in row_evals {
        out.extend_from_slice(&row[index].to_le_bytes());
    }
    for mask in mask_evals {
        out.extend_from_slice(&mask[index].to_le_bytes());
    }
    out.extend_from_slice(&(index as u16).to_le_bytes());
    out.extend_from_slice(nonce);
    out
}

/// Build the leaf byte record for opened column `t` (position `t` within an
/// opening's per-index value arrays) at true column index `index`.
fn leaf_record_opened(
    row_values: &[Vec<Fq>],
    mask_values: &[Vec<Fq>],
    t: usize,
    index: usize,
    nonce: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 * (row_values.len() + mask_values.len()) + 2 + nonce.len());
    for r in row_values {
        out.extend_from_slice(&r[t].to_le_bytes());
    }
    for m in mask_values {
        out.extend_from_slice(&m[t].to_le_bytes());
    }
    out.extend_from_slice(&(index as u16).to_le_bytes());
    out.extend_from_slice(nonce);
    out
}

/// Commit a row family: pads each row to the ring size and evaluates it via
/// NTT, samples `params.eta` fresh random mask rows of the same degree
/// bound, and builds the Merkle tree over all resulting leaves.
pub fn commit(
    rows: &[Vec<Fq>],
    params: DecsParams,
    ring: &Ring,
    rng: &mut impl rand::RngCore,
) -> Result<ProverKey, DecsError> {
    let mut nonce_seed = [0u8; 32];
    rng.fill_bytes(&mut nonce_seed);

    let row_evals: Vec<Vec<Fq>> = rows
        .iter()
        .map(|r| {
            let mut padded = r.clone();
            padded.resize(ring.n, Fq::ZERO);
            ring.ntt_in_place(&mut padded);
            padded
        })
        .collect();

    let mut mask_coeffs = Vec::with_capacity(params.eta);
    let mut mask_evals = Vec::with_capacity(params.eta);
    for _ in 0..params.eta {
        let coeffs: Vec<Fq> = (0..=params.d)
            .map(|_| Fq::from_u64(rng.next_u64() % MODULUS))
            .collect();
        let mut padded = coeffs.clone();
        padded.resize(ring.n, Fq::ZERO);
        ring.ntt_in_place(&mut padded);
        mask_coeffs.push(coeffs);
        mask_evals.push(padded);
    }

    let leaves: Vec<Vec<u8>> = (0..ring.n)
        .map(|i| {
            let nonce = derive_nonce(&nonce_seed, i, params.nonce_len);
            leaf_record_full(&row_evals, &mask_evals, i, &nonce)
        })
        .collect();
    let tree = MerkleTree::build(&leaves)?;

    Ok(ProverKey {
        params,
        row_coeffs: rows.to_vec(),
        mask_coeffs,
        row_evals,
        mask_evals,
        nonce_seed,
        tree,
    })
}

/// Derive the `η × r` challenge matrix `Γ` from the committed root via a
/// domain-separated SHAKE-256 PRG.
pub fn derive_gamma(root: &NodeHash, eta: usize, r: usize) -> Vec<Vec<Fq>> {
    let mut hasher = Shake256::default();
    hasher.update(root);
    hasher.update(b"decs-gamma");
    let mut reader = hasher.finalize_xof();
    let mut buf = [0u8; 8];
    (0..eta)
        .map(|_| {
            (0..r)
                .map(|_| {
                    reader.read(&mut buf);
                    Fq::from_u64(u64::from_le_bytes(buf) % MODULUS)
                })
                .collect()
        })
        .collect()
}

/// `R_k = M_k + Σ_j Γ_{k,j}·P_j`, coefficient domain, for every `k`.
pub fn commit_finish(pk: &ProverKey, gamma: &[Vec<Fq>]) -> Vec<Vec<Fq>> {
    let deg_len = pk.params.d + 1;
    gamma
        .iter()
        .zip(pk.mask_coeffs.iter())
        .map(|(row, mask)| {
            let mut r = mask.clone();
            r.resize(deg_len.max(r.len()), Fq::ZERO);
            for (j, &gamma_kj) in row.iter().enumerate() {
                let p = &pk.row_coeffs[j];
                if r.len() < p.len() {
                    r.resize(p.len(), Fq::ZERO);
                }
                for (c, &pc) in r.iter_mut().zip(p.iter()) {
                    *c = c.add(gamma_kj.mul(pc));
                }
            }
            r
        })
        .collect()
}

/// Check every `R_k` has degree `<= d` (all coefficients beyond `d` are
/// zero).
pub fn check_degree_bound(r_polys: &[Vec<Fq>], d: usize) -> Result<(), DecsError> {
    for (k, r) in r_polys.iter().enumerate() {
        if let Some(at) = r.iter().skip(d + 1).position(|c| !c.is_zero()) {
            return Err(DecsError::DegreeExceeded {
                k,
                bound: d,
                at: d + 1 + at,
            });
        }
    }
    Ok(())
}

/// A DECS opening: per-index P/M values, nonces, and the Merkle frontier.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DecsOpening {
    pub indices: Vec<usize>,
    /// `row_values[j][t]` is `P_j` at `indices[t]`.
    pub row_values: Vec<Vec<Fq>>,
    /// `mask_values[k][t]` is `M_k` at `indices[t]`.
    pub mask_values: Vec<Vec<Fq>>,
    pub nonces: Vec<Vec<u8>>,
    pub frontier: FrontierOpening,
}

/// Open every row and mask value at `indices`, plus the Merkle frontier.
pub fn eval_open(pk: &ProverKey, indices: &[usize]) -> DecsOpening {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let row_values: Vec<Vec<Fq>> = pk
        .row_evals
        .iter()
        .map(|row| sorted.iter().map(|&i| row[i]).collect())
        .collect();
    let mask_values: Vec<Vec<Fq>> = pk
        .mask_evals
        .iter()
        .map(|mask| sorted.iter().map(|&i| mask[i]).collect())
        .collect();
    let nonces: Vec<Vec<u8>> = sorted
        .iter()
        .map(|&i| derive_nonce(&pk.nonce_seed, i, pk.params.nonce_len))
        .collect();
    let frontier = pk.tree.open_frontier(&sorted);

    DecsOpening {
        indices: sorted,
        row_values,
        mask_values,
        nonces,
        frontier,
    }
}

/// Verify an opening against a committed root: recompute leaf hashes, check
/// the Merkle frontier, and check the linear relation
/// `R_k(i) ≡ M_k(i) + Σ_j Γ_{k,j}·P_j(i)` at every opened column. Column `i`
/// is a subgroup position, so `R_k` is evaluated at `ring.omega^i`.
pub fn verify_eval_at(
    root: &NodeHash,
    depth: usize,
    ring: &Ring,
    gamma: &[Vec<Fq>],
    r_polys: &[Vec<Fq>],
    opening: &DecsOpening,
) -> Result<(), DecsError> {
    let n = opening.indices.len();
    if opening.nonces.len() != n
        || opening.row_values.iter().any(|r| r.len() != n)
        || opening.mask_values.iter().any(|m| m.len() != n)
    {
        return Err(DecsError::OpeningMalformed(
            "row/mask value counts must match the opened index count",
        ));
    }

    let leaf_hashes: Vec<(usize, NodeHash)> = (0..n)
        .map(|t| {
            let record = leaf_record_opened(
                &opening.row_values,
                &opening.mask_values,
                t,
                opening.indices[t],
                &opening.nonces[t],
            );
            (opening.indices[t], merkle::leaf_hash(&record))
        })
        .collect();

    verify_frontier_opening(root, depth, &leaf_hashes, &opening.frontier)?;

    for (k, r_k) in r_polys.iter().enumerate() {
        for t in 0..n {
            let i = opening.indices[t];
            let point = ring.omega.pow(i as u64);
            let lhs = crate::field::horner_eval(r_k, point);
            let mut rhs = opening.mask_values[k][t];
            for (j, &gamma_kj) in gamma[k].iter().enumerate() {
                rhs = rhs.add(gamma_kj.mul(opening.row_values[j][t]));
            }
            if lhs != rhs {
                return Err(DecsError::LinearRelationFailed { k, i });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn toy_rows(ring: &Ring) -> Vec<Vec<Fq>> {
        vec![
            (0..ring.n / 2).map(|i| Fq::from_u64(i as u64 + 1)).collect(),
            (0..ring.n / 2).map(|i| Fq::from_u64(2 * i as u64 + 3)).collect(),
        ]
    }

    #[test]
    fn commit_open_verify_roundtrip() {
        let ring = Ring::new(16).unwrap();
        let rows = toy_rows(&ring);
        let params = DecsParams { d: 9, eta: 2, nonce_len: 16 };
        let mut rng = StdRng::seed_from_u64(7);

        let pk = commit(&rows, params, &ring, &mut rng).unwrap();
        let gamma = derive_gamma(&pk.root(), params.eta, rows.len());
        let r_polys = commit_finish(&pk, &gamma);
        check_degree_bound(&r_polys, params.d).unwrap();

        let opening = eval_open(&pk, &[0, 3, 9]);
        verify_eval_at(&pk.root(), pk.depth(), &ring, &gamma, &r_polys, &opening)
            .expect("honest opening verifies");
    }

    #[test]
    fn tampered_row_value_is_rejected() {
        let ring = Ring::new(16).unwrap();
        let rows = toy_rows(&ring);
        let params = DecsParams { d: 9, eta: 1, nonce_len: 16 };
        let mut rng = StdRng::seed_from_u64(8);

        let pk = commit(&rows, params, &ring, &mut rng).unwrap();
        let gamma = derive_gamma(&pk.root(), params.eta, rows.len());
        let r_polys = commit_finish(&pk, &gamma);

        let mut opening = eval_open(&pk, &[2]);
        opening.row_values[0][0] = opening.row_values[0][0].add(Fq::ONE);

        // Tampering a row value changes the recomputed leaf hash, so the
        // frontier check fails before the linear relation is even reached.
        assert!(verify_eval_at(&pk.root(), pk.depth(), &ring, &gamma, &r_polys, &opening).is_err());
    }

    #[test]
    fn degree_bound_rejects_overflowing_r() {
        let ring = Ring::new(16).unwrap();
        let rows = toy_rows(&ring);
        let params = DecsParams { d: 3, eta: 1, nonce_len: 16 };
        let mut rng = StdRng::seed_from_u64(9);

        let pk = commit(&rows, params, &ring, &mut rng).unwrap();
        let gamma = derive_gamma(&pk.root(), params.eta, rows.len());
        let mut r_polys = commit_finish(&pk, &gamma);
        r_polys[0].resize(params.d + 2, Fq::ZERO);
        r_polys[0][params.d + 1] = Fq::ONE;

        assert!(matches!(
            check_degree_bound(&r_polys, params.d),
            Err(DecsError::DegreeExceeded { k: 0, .. })
        ));
    }
}
