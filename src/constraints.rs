//! Constraint evaluator hooks: `F_par`/`F_agg` constraint polynomials.
//!
//! The concrete credential/PRF/range-membership polynomial families are out
//! of scope (§1) — this module only defines the neutral interface the mask
//! and PACS driver call against. A host plugs in its own
//! [`ConstraintSystem`]; this crate ships [`NullConstraints`] (no terms at
//! all) so DECS/LVCS/PACS can be exercised without a concrete statement.

#![forbid(unsafe_code)]

use crate::field::Fq;

/// Supplies the coefficient-domain "parallel" (`F_par`) and "aggregated"
/// (`F_agg`) constraint polynomials (§2/§4.7), each of degree at most
/// `d_q`, built from the committed row polynomials (coefficient domain, one
/// entry per committed row `P_j`).
///
/// `F_par` terms are checked pointwise — their role is per-column residual
/// identities; `F_agg` terms are checked via their Ω-sum — their role is
/// global accumulator-style identities. Both are represented identically
/// here (a coefficient-domain polynomial); only their use downstream
/// differs, which is why the glossary's "pointwise" vs. "summed" language
/// describes role, not representation.
pub trait ConstraintSystem {
    fn num_par(&self) -> usize;
    fn num_agg(&self) -> usize;

    /// `F_par,1..F_par,num_par`, each of degree `<= d_q`.
    fn build_par(&self, rows: &[Vec<Fq>], d_q: usize) -> Vec<Vec<Fq>>;

    /// `F_agg,1..F_agg,num_agg`, same shape as [`ConstraintSystem::build_par`].
    fn build_agg(&self, rows: &[Vec<Fq>], d_q: usize) -> Vec<Vec<Fq>>;

    /// Verifier-side residual hook for Eq.(4) (§4.9 step 7). A verifier never
    /// holds the coefficient-domain rows `build_par`/`build_agg` need — only
    /// the revealed values `row_values_at_point[j] = P_j(point)` at a single
    /// FS-derived tail index. Returns `F_par,1(point)..F_par,num_par(point)`
    /// computed from those revealed values alone.
    fn eval_par_at(&self, row_values_at_point: &[Fq], point: Fq, d_q: usize) -> Vec<Fq>;

    /// Same as [`ConstraintSystem::eval_par_at`] for the aggregated family.
    fn eval_agg_at(&self, row_values_at_point: &[Fq], point: Fq, d_q: usize) -> Vec<Fq>;
}

/// A constraint system with no parallel or aggregated terms — every
/// `extra_i` contribution from constraints is zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConstraints;

impl ConstraintSystem for NullConstraints {
    fn num_par(&self) -> usize {
        0
    }
    fn num_agg(&self) -> usize {
        0
    }
    fn build_par(&self, _rows: &[Vec<Fq>], _d_q: usize) -> Vec<Vec<Fq>> {
        Vec::new()
    }
    fn build_agg(&self, _rows: &[Vec<Fq>], _d_q: usize) -> Vec<Vec<Fq>> {
        Vec::new()
    }
    fn eval_par_at(&self, _row_values_at_point: &[Fq], _point: Fq, _d_q: usize) -> Vec<Fq> {
        Vec::new()
    }
    fn eval_agg_at(&self, _row_values_at_point: &[Fq], _point: Fq, _d_q: usize) -> Vec<Fq> {
        Vec::new()
    }
}
