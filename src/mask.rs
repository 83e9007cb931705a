//! Mask polynomial sampler and quotient (`Q_i`) builder (§4.7).
//!
//! Two parallel tracks: the base-field track (`sample_masks`/`build_q`) used
//! when `θ = 1`, and the `K`-limb track (`sample_masks_k`/`build_qk`) used
//! when `θ > 1` — §4.7's "same, limb-wise in K[X]" for `BuildQK`.

#![forbid(unsafe_code)]

use rand::RngCore;
use thiserror::Error;

use crate::ext_field::{ExtField, K};
use crate::field::{power_sum, Fq, MODULUS};

/// Errors from mask sampling.
#[derive(Debug, Error)]
pub enum MaskError {
    #[error("Ω-sum S_0 is zero mod q (|Ω| ≡ 0 mod q); the mask sampler cannot proceed")]
    OmegaSumZero,
}

/// Sample `rho` mask polynomials of degree `<= d_q` whose Ω-sum cancels the
/// supplied `extra` terms.
///
/// `extra[i]` is `extra_i` from §4.7: the already-summed
/// `Σ_t Γ'_{i,t}·ΣF_par,t(Ω) + Σ_u γ'_{i,u}·ΣF_agg,u(Ω)` contribution for
/// mask row `i`, computed by the caller (the PACS driver) via [`omega_sum`]
/// so this function stays agnostic to the concrete constraint family.
///
/// Returns `MaskError::OmegaSumZero` if `|Ω| ≡ 0 (mod q)` — the one
/// condition under which no choice of `a_{i,0}` can satisfy the Ω-sum
/// invariant, matching the prover's abort-on-invariant-violation policy
/// (§7) at the call site.
pub fn sample_masks(
    omega: &[Fq],
    d_q: usize,
    rho: usize,
    extra: &[Fq],
    rng: &mut impl RngCore,
) -> Result<Vec<Vec<Fq>>, MaskError> {
    assert_eq!(extra.len(), rho, "one extra_i term per mask polynomial");
    let s: Vec<Fq> = (0..=d_q as u64).map(|k| power_sum(omega, k)).collect();
    let s0_inv = s[0].inverse().ok_or(MaskError::OmegaSumZero)?;

    let mut masks = Vec::with_capacity(rho);
    for extra_i in extra.iter().take(rho) {
        let mut coeffs = vec![Fq::ZERO; d_q + 1];
        let mut sum_i = *extra_i;
        for (k, s_k) in s.iter().enumerate().skip(1) {
            let a_k = Fq::from_u64(rng.next_u64() % MODULUS);
            coeffs[k] = a_k;
            sum_i = sum_i.add(a_k.mul(*s_k));
        }
        coeffs[0] = sum_i.neg().mul(s0_inv);
        masks.push(coeffs);
    }
    Ok(masks)
}

/// `Σ_{ω ∈ Ω} F(ω)` for a coefficient-domain polynomial, via the power-sum
/// identity `Σ_k f_k · S_k` (`S_k = Σ_ω ω^k`) — the same identity the mask
/// sampler itself relies on, so a constraint polynomial's Ω-sum never needs
/// a pointwise evaluation pass over Ω.
pub fn omega_sum(omega: &[Fq], poly: &[Fq]) -> Fq {
    poly.iter()
        .enumerate()
        .map(|(k, &f_k)| f_k.mul(power_sum(omega, k as u64)))
        .sum()
}

/// Build `Q_i = M_i + Σ_t Γ'_{i,t}·F_par,t + Σ_u γ'_{i,u}·F_agg,u` for every
/// mask row, as coefficient-domain polynomials of degree `<= d_q`.
///
/// `gamma_prime`/`gamma_agg` are `rho × |F_par|` / `rho × |F_agg|` scalar
/// matrices (§4.8 round 1); `f_par`/`f_agg` are the constraint polynomials
/// themselves, each of degree `<= d_q`.
pub fn build_q(
    masks: &[Vec<Fq>],
    gamma_prime: &[Vec<Fq>],
    f_par: &[Vec<Fq>],
    gamma_agg: &[Vec<Fq>],
    f_agg: &[Vec<Fq>],
    d_q: usize,
) -> Vec<Vec<Fq>> {
    let rho = masks.len();
    let mut qs = Vec::with_capacity(rho);
    for (i, mask_i) in masks.iter().enumerate() {
        let mut q = mask_i.clone();
        q.resize(d_q + 1, Fq::ZERO);
        for (t, f) in f_par.iter().enumerate() {
            add_scaled_into(&mut q, f, gamma_prime[i][t]);
        }
        for (u, f) in f_agg.iter().enumerate() {
            add_scaled_into(&mut q, f, gamma_agg[i][u]);
        }
        qs.push(q);
    }
    qs
}

fn add_scaled_into(acc: &mut [Fq], poly: &[Fq], scale: Fq) {
    for (a, &p) in acc.iter_mut().zip(poly.iter()) {
        *a = a.add(scale.mul(p));
    }
}

/// `K`-limb analogue of [`sample_masks`], used when `θ > 1` (§4.2/§4.7).
///
/// `extra` carries one `K` element per mask row; `omega` is still the base
/// field evaluation set (Ω lives in `F_q` regardless of `θ`), so the power
/// sums `S_k` are base-field scalars lifted into `K` before the sum.
pub fn sample_masks_k(
    ext: &ExtField,
    omega: &[Fq],
    d_q: usize,
    rho: usize,
    extra: &[K],
    rng: &mut impl RngCore,
) -> Result<Vec<Vec<K>>, MaskError> {
    assert_eq!(extra.len(), rho, "one extra_i term per mask polynomial");
    let s: Vec<Fq> = (0..=d_q as u64).map(|k| power_sum(omega, k)).collect();
    let s0_inv = s[0].inverse().ok_or(MaskError::OmegaSumZero)?;
    let s0_inv_k = K::from_fq(ext.theta, s0_inv);

    let mut masks = Vec::with_capacity(rho);
    for extra_i in extra.iter().take(rho) {
        let mut coeffs = vec![K::zero(ext.theta); d_q + 1];
        let mut sum_i = extra_i.clone();
        for (k, s_k) in s.iter().enumerate().skip(1) {
            let a_k = K {
                limbs: (0..ext.theta)
                    .map(|_| Fq::from_u64(rng.next_u64() % MODULUS))
                    .collect(),
            };
            let scaled = ext.mul(&a_k, &K::from_fq(ext.theta, *s_k));
            sum_i = ext.add(&sum_i, &scaled);
            coeffs[k] = a_k;
        }
        coeffs[0] = ext.mul(&ext.neg(&sum_i), &s0_inv_k);
        masks.push(coeffs);
    }
    Ok(masks)
}

/// `K`-limb analogue of [`omega_sum`]: `Σ_{ω ∈ Ω} F(ω)` for a `K`-coefficient
/// polynomial, via the same power-sum identity lifted into `K`.
pub fn omega_sum_k(ext: &ExtField, omega: &[Fq], poly: &[K]) -> K {
    let mut acc = K::zero(ext.theta);
    for (k, f_k) in poly.iter().enumerate() {
        let s_k = K::from_fq(ext.theta, power_sum(omega, k as u64));
        let term = ext.mul(f_k, &s_k);
        acc = ext.add(&acc, &term);
    }
    acc
}

/// `K`-limb analogue of [`build_q`] (`BuildQK`, §4.7).
pub fn build_qk(
    ext: &ExtField,
    masks: &[Vec<K>],
    gamma_prime: &[Vec<K>],
    f_par: &[Vec<K>],
    gamma_agg: &[Vec<K>],
    f_agg: &[Vec<K>],
    d_q: usize,
) -> Vec<Vec<K>> {
    let rho = masks.len();
    let mut qs = Vec::with_capacity(rho);
    for (i, mask_i) in masks.iter().enumerate() {
        let mut q = mask_i.clone();
        q.resize(d_q + 1, K::zero(ext.theta));
        for (t, f) in f_par.iter().enumerate() {
            add_scaled_into_k(ext, &mut q, f, &gamma_prime[i][t]);
        }
        for (u, f) in f_agg.iter().enumerate() {
            add_scaled_into_k(ext, &mut q, f, &gamma_agg[i][u]);
        }
        qs.push(q);
    }
    qs
}

fn add_scaled_into_k(ext: &ExtField, acc: &mut [K], poly: &[K], scale: &K) {
    for (a, p) in acc.iter_mut().zip(poly.iter()) {
        *a = ext.add(a, &ext.mul(scale, p));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Ring;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sampled_masks_satisfy_the_omega_sum_invariant() {
        let ring = Ring::new(16).unwrap();
        let omega = &ring.subgroup()[..8];
        let mut rng = StdRng::seed_from_u64(1);
        let extra = vec![Fq::from_u64(5), Fq::from_u64(0)];
        let masks = sample_masks(omega, 4, 2, &extra, &mut rng).unwrap();
        for (i, m) in masks.iter().enumerate() {
            assert_eq!(omega_sum(omega, m), extra[i].neg());
        }
    }

    #[test]
    fn build_q_reduces_to_mask_when_no_constraints() {
        let ring = Ring::new(16).unwrap();
        let omega = &ring.subgroup()[..8];
        let mut rng = StdRng::seed_from_u64(2);
        let extra = vec![Fq::ZERO];
        let masks = sample_masks(omega, 4, 1, &extra, &mut rng).unwrap();
        let qs = build_q(&masks, &[vec![]], &[], &[vec![]], &[], 4);
        assert_eq!(qs, masks);
    }

    #[test]
    fn sampled_masks_k_satisfy_the_omega_sum_invariant() {
        let ring = Ring::new(16).unwrap();
        let omega = &ring.subgroup()[..8];
        let mut rng = StdRng::seed_from_u64(3);
        let ext = crate::ext_field::random_irreducible(2, &mut rng).unwrap();
        let extra = vec![K::from_fq(2, Fq::from_u64(5)), K::zero(2)];
        let masks = sample_masks_k(&ext, omega, 4, 2, &extra, &mut rng).unwrap();
        for (i, m) in masks.iter().enumerate() {
            assert_eq!(omega_sum_k(&ext, omega, m), ext.neg(&extra[i]));
        }
    }

    #[test]
    fn build_qk_reduces_to_mask_when_no_constraints() {
        let ring = Ring::new(16).unwrap();
        let omega = &ring.subgroup()[..8];
        let mut rng = StdRng::seed_from_u64(4);
        let ext = crate::ext_field::random_irreducible(2, &mut rng).unwrap();
        let extra = vec![K::zero(2)];
        let masks = sample_masks_k(&ext, omega, 4, 1, &extra, &mut rng).unwrap();
        let qs = build_qk(&ext, &masks, &[vec![]], &[], &[vec![]], &[], 4);
        assert_eq!(qs, masks);
    }
}
