//! LVCS: linear vector commitment scheme layered on DECS (§4.5).
//!
//! Adds an explicit witness/mask row layout and a tail region reserved for
//! challenge indices to DECS's flat row family, and answers
//! linear-combination evaluation queries (`b̄` bar values) by reconstructing
//! the queried combination as a degree-bound polynomial through its known
//! Ω/mask-region values, then cross-checking it against the opened
//! tail-region row values.

#![forbid(unsafe_code)]

use std::ops::Range;

use thiserror::Error;

use crate::decs::{self, DecsError, DecsOpening, ProverKey};
use crate::field::{horner_eval, Fq, Ring};
use crate::merkle::NodeHash;

/// Errors from LVCS layout/evaluation/verification.
#[derive(Debug, Error)]
pub enum LvcsError {
    #[error("witness segment {witness:?} overlaps mask segment {mask:?}")]
    LayoutOverlap { witness: Range<usize>, mask: Range<usize> },
    #[error("tail index set must have exactly {expected} entries, got {got}")]
    TailIndexCountMismatch { expected: usize, got: usize },
    #[error("tail index {0} is outside the tail region [ncols+ℓ, N)")]
    TailIndexOutOfRegion(usize),
    #[error("tail index {0} is duplicated")]
    DuplicateTailIndex(usize),
    #[error(transparent)]
    Decs(#[from] DecsError),
}

/// Row-family layout: witness rows occupy `witness`, mask rows occupy
/// `mask`; the two ranges must be disjoint.
#[derive(Debug, Clone)]
pub struct Layout {
    pub witness: Range<usize>,
    pub mask: Range<usize>,
}

impl Layout {
    pub fn new(witness: Range<usize>, mask: Range<usize>) -> Result<Self, LvcsError> {
        let overlap = witness.start < mask.end && mask.start < witness.end;
        if overlap {
            return Err(LvcsError::LayoutOverlap { witness, mask });
        }
        Ok(Layout { witness, mask })
    }
}

/// A linear-combination evaluation request (θ=1 branch): a coefficient per
/// row in scope, plus the evaluation point this bar set is associated with
/// (carried through for the caller's own v-target/Eq.(4) bookkeeping; the
/// bar values themselves are the coordinate-wise combination of row tails,
/// independent of `point`).
#[derive(Debug, Clone)]
pub struct LinearRequest {
    pub coeffs: Vec<Fq>,
    pub point: Fq,
}

/// Evaluate the ℓ tail points of every row in `rows`, then for each request
/// return the coordinate-wise linear combination `b̄_k[t] = Σ_j coeffs[j] ·
/// row_j(tail_t)`.
pub fn eval_init_many(
    rows: &[Vec<Fq>],
    ring: &Ring,
    ncols: usize,
    ell: usize,
    requests: &[LinearRequest],
) -> Vec<Vec<Fq>> {
    let tail_points: Vec<Fq> = (ncols..ncols + ell).map(|i| ring.omega.pow(i as u64)).collect();
    let tails: Vec<Vec<Fq>> = rows
        .iter()
        .map(|r| tail_points.iter().map(|&p| horner_eval(r, p)).collect())
        .collect();

    requests
        .iter()
        .map(|req| {
            (0..ell)
                .map(|t| {
                    req.coeffs
                        .iter()
                        .zip(tails.iter())
                        .map(|(&c, tail)| c.mul(tail[t]))
                        .sum()
                })
                .collect()
        })
        .collect()
}

/// Evaluate the witness and mask segments of `rows` independently at
/// `points`, rejecting an overlapping layout.
pub fn eval_oracle(
    rows: &[Vec<Fq>],
    layout: &Layout,
    points: &[Fq],
) -> Result<(Vec<Vec<Fq>>, Vec<Vec<Fq>>), LvcsError> {
    let overlap = layout.witness.start < layout.mask.end && layout.mask.start < layout.witness.end;
    if overlap {
        return Err(LvcsError::LayoutOverlap {
            witness: layout.witness.clone(),
            mask: layout.mask.clone(),
        });
    }
    let eval_segment = |range: Range<usize>| -> Vec<Vec<Fq>> {
        rows[range]
            .iter()
            .map(|r| points.iter().map(|&p| horner_eval(r, p)).collect())
            .collect()
    };
    Ok((eval_segment(layout.witness.clone()), eval_segment(layout.mask.clone())))
}

/// Complete a DECS opening for the tail-index set `e`, using the prover's
/// cached leaf data.
pub fn eval_finish(pk: &ProverKey, e: &[usize]) -> DecsOpening {
    decs::eval_open(pk, e)
}

/// Reconstruct `Q_k(X)` through its known values (`Ω → v_k`, mask region →
/// `b̄_k`) and evaluate it at every tail index, checking it against the
/// opened tail-region row combination `Σ_j C_{k,j}·P_j(i)`.
///
/// Binds barred values, the tail-index set, and both DECS openings
/// together (§4.5 `EvalStep2`). Returns `Ok(false)` for a relation mismatch
/// and `Err` for a structural problem (wrong tail-set shape, region
/// violation, malformed opening) — matching scenario (f): an out-of-region
/// tail index is rejected before DECS verification ever runs.
#[allow(clippy::too_many_arguments)]
pub fn eval_step2(
    root: &NodeHash,
    depth: usize,
    ring: &Ring,
    ncols: usize,
    ell: usize,
    n: usize,
    gamma: &[Vec<Fq>],
    r_polys: &[Vec<Fq>],
    c_matrix: &[Vec<Fq>],
    v_targets: &[Vec<Fq>],
    bar_values: &[Vec<Fq>],
    e: &[usize],
    mask_opening: &DecsOpening,
    tail_opening: &DecsOpening,
) -> Result<bool, LvcsError> {
    if e.len() != ell {
        return Err(LvcsError::TailIndexCountMismatch { expected: ell, got: e.len() });
    }
    let mut seen = std::collections::HashSet::new();
    for &i in e {
        if i < ncols + ell || i >= n {
            return Err(LvcsError::TailIndexOutOfRegion(i));
        }
        if !seen.insert(i) {
            return Err(LvcsError::DuplicateTailIndex(i));
        }
    }

    let expected_mask_indices: Vec<usize> = (ncols..ncols + ell).collect();
    if mask_opening.indices != expected_mask_indices {
        return Err(LvcsError::Decs(DecsError::OpeningMalformed(
            "mask opening must cover the full mask region [ncols, ncols+ℓ)",
        )));
    }
    let mut sorted_e = e.to_vec();
    sorted_e.sort_unstable();
    if tail_opening.indices != sorted_e {
        return Err(LvcsError::Decs(DecsError::OpeningMalformed(
            "tail opening indices must equal the challenged tail-index set",
        )));
    }

    decs::verify_eval_at(root, depth, ring, gamma, r_polys, mask_opening)?;
    decs::verify_eval_at(root, depth, ring, gamma, r_polys, tail_opening)?;

    let omega_head: Vec<Fq> = (0..ncols).map(|i| ring.omega.pow(i as u64)).collect();
    let mask_points: Vec<Fq> = (ncols..ncols + ell).map(|i| ring.omega.pow(i as u64)).collect();

    for (k, c_row) in c_matrix.iter().enumerate() {
        for t in 0..ell {
            let i = expected_mask_indices[t];
            let lhs: Fq = c_row
                .iter()
                .zip(mask_opening.row_values.iter())
                .map(|(&c, vals)| c.mul(vals[t]))
                .sum();
            if lhs != bar_values[k][t] {
                tracing::debug!(k, i, "LVCS masked linear relation mismatch");
                return Ok(false);
            }
        }

        let mut xs = omega_head.clone();
        xs.extend_from_slice(&mask_points);
        let mut ys = v_targets[k].clone();
        ys.extend_from_slice(&bar_values[k]);
        let q_k = match ring.lagrange_interpolate(&xs, &ys) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };

        for (t, &i) in sorted_e.iter().enumerate() {
            let point = ring.omega.pow(i as u64);
            let q_at_i = horner_eval(&q_k, point);
            let rhs: Fq = c_row
                .iter()
                .zip(tail_opening.row_values.iter())
                .map(|(&c, vals)| c.mul(vals[t]))
                .sum();
            if q_at_i != rhs {
                tracing::debug!(k, i, "LVCS tail reconstruction mismatch");
                return Ok(false);
            }
        }
    }

    Ok(true)
}
