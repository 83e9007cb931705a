//! PACS driver: the prover/verifier schedule that compiles the interactive
//! protocol into a NIZK via Fiat–Shamir (§4.8/§4.9).
//!
//! Two DECS/LVCS row-family commitments are built over the course of the
//! four FS rounds rather than one: instance **A** (round 0) carries the
//! witness rows and answers an arbitrary linear-combination query (`okLin`,
//! §4.5's `EvalStep2` applied with a round-2-derived coefficient matrix);
//! instance **B** (round 1, after `Γ′`/`γ′` are known) carries the quotient
//! rows `Q_i` *and* the mask rows `M_i` that built them, limb-flattened into
//! `F_q` via the `K = F_q[X]/(χ)` extension (§4.2/§4.7) so a single driver
//! handles `θ = 1` and `θ > 1` uniformly — a degree-1 extension is `F_q`
//! itself, so the `θ = 1` case is not a separate code path, just `ext.theta
//! == 1`. `EvalStep2` binds the combined family the same way it binds
//! instance A; on top of that, the verifier recomputes `Eq.(4)`'s residual
//! directly from the transmitted `q_rows`/`mask_rows` and the constraint
//! system's point-evaluation hook, so a proof can't merely be
//! self-consistent with itself, it has to satisfy the actual relation.

#![forbid(unsafe_code)]

use rand::RngCore;
use thiserror::Error;

use crate::constraints::ConstraintSystem;
use crate::decs::{self, DecsError, DecsOpening, DecsParams};
use crate::ext_field::{ExtField, K};
use crate::field::{horner_eval, FieldError, Fq, Ring, MODULUS};
use crate::lvcs::{self, LinearRequest, LvcsError};
use crate::mask::{self, MaskError};
use crate::merkle::NodeHash;
use crate::transcript::{
    self, FsState, TranscriptError, ROUND_EVAL_POINTS, ROUND_GAMMA, ROUND_GAMMA_PRIME, ROUND_TAIL,
};

/// Parameters for one NIZK session: ring size, witness layout, repetition
/// counts, small-field degree, and the grinding bits for each FS round.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionParams {
    /// Ring size `N` (power of two).
    pub n: usize,
    /// `|Ω|`: number of public head positions per row.
    pub ncols: usize,
    /// Tail-blinder count `ℓ`.
    pub ell: usize,
    /// Number of PACS quotient/mask rows `ρ`.
    pub rho: usize,
    /// DECS repetition count `η`.
    pub eta: usize,
    /// Extension degree. `θ = 1` is plain `F_q`; `θ > 1` is "small-field"
    /// mode, where every mask/quotient value lives in `K = F_q[X]/(χ)` and
    /// is committed limb-wise as `θ` separate `F_q` rows (§4.2/§4.7).
    pub theta: usize,
    /// Monic modulus `χ` for `K = F_q[X]/(χ)`, length `theta + 1`. Ignored
    /// (must be empty) when `theta == 1`, since `F_q` needs no modulus.
    pub chi: Vec<Fq>,
    /// Quotient polynomial degree bound `d_Q` (must be `>= ncols+ell-1`).
    pub d_q: usize,
    /// Grinding bits per FS round (`[Γ, Γ′/γ′, eval-points, tail]`).
    pub kappa: [u32; 4],
    /// DECS nonce length in bytes.
    pub nonce_len: usize,
}

impl SessionParams {
    fn validate(&self) -> Result<(), &'static str> {
        if self.n == 0 || !self.n.is_power_of_two() {
            return Err("n must be a nonzero power of two");
        }
        if self.theta == 0 {
            return Err("theta must be at least 1");
        }
        if self.theta == 1 {
            if !self.chi.is_empty() {
                return Err("chi must be empty when theta == 1 (the base field needs no modulus)");
            }
        } else if self.chi.len() != self.theta + 1 {
            return Err("chi must have length theta+1 when theta > 1");
        } else if self.chi[self.theta] != Fq::ONE {
            return Err("chi must be monic (leading coefficient 1)");
        }
        if self.ncols == 0 || self.ell == 0 || self.rho == 0 || self.eta == 0 {
            return Err("ncols, ell, rho, and eta must all be nonzero");
        }
        if self.n < self.ncols + 2 * self.ell {
            return Err("ring too small: need room for both the mask region and ell tail-challenge slots");
        }
        if self.d_q + 1 < self.ncols + self.ell {
            return Err("d_q must be at least ncols+ell-1");
        }
        Ok(())
    }
}

/// Build the `K = F_q[X]/(χ)` context a session's `θ` implies. `θ = 1`
/// always uses `χ = X` (degree-1 modulus — vacuously monic and irreducible,
/// and `K`'s single-limb arithmetic coincides exactly with plain `F_q`); `θ
/// > 1` uses the session's own `chi`, rejecting a reducible one since
/// [`ExtField::is_irreducible`] failing means `K` is not actually a field.
fn build_ext_field(p: &SessionParams) -> Result<ExtField, &'static str> {
    if p.theta == 1 {
        return Ok(ExtField::new(vec![Fq::ZERO, Fq::ONE]).expect("degree-1 modulus is always valid"));
    }
    let ext = ExtField::new(p.chi.clone()).map_err(|_| "chi must be a monic degree-theta modulus")?;
    if !ext.is_irreducible() {
        return Err("chi is not irreducible for the declared extension degree theta");
    }
    Ok(ext)
}

/// Lift a coefficient-domain `F_q` polynomial into `K` coefficientwise.
fn lift_poly_to_k(theta: usize, poly: &[Fq]) -> Vec<K> {
    poly.iter().map(|&c| K::from_fq(theta, c)).collect()
}

/// Flatten `K`-coefficient rows into `theta` consecutive `F_q` rows each,
/// limb `l`'s row holding every `K` coefficient's `l`-th limb.
fn flatten_k_rows(rows: &[Vec<K>], theta: usize) -> Vec<Vec<Fq>> {
    let mut out = Vec::with_capacity(rows.len() * theta);
    for row in rows {
        for l in 0..theta {
            out.push(row.iter().map(|k| k.limbs[l]).collect());
        }
    }
    out
}

/// Inverse of [`flatten_k_rows`]'s per-row chunking: Horner-evaluate the
/// `theta` consecutive `F_q` rows starting at `rows[start..start+theta]` at
/// `point` and recombine the limb evaluations into one `K` value.
fn reconstruct_k_at(rows: &[Vec<Fq>], start: usize, theta: usize, point: Fq) -> Option<K> {
    let chunk = rows.get(start..start + theta)?;
    Some(K {
        limbs: chunk.iter().map(|row| horner_eval(row, point)).collect(),
    })
}

/// A cheap, non-cryptographic fold of a `chi` modulus into one `u64`, folded
/// into [`proof_params_key`] so a verifier and prover agreeing on `theta`
/// but disagreeing on `chi` are still caught as a params mismatch rather
/// than silently running incompatible `K` arithmetic.
fn chi_fingerprint(chi: &[Fq]) -> u64 {
    chi.iter().fold(0u64, |acc, c| acc.rotate_left(13) ^ c.to_u64())
}

/// Errors from proof construction. Structural: a prover-side violation is a
/// bug, not a data-dependent outcome, so [`ProverSession::build_proof`]
/// panics on these rather than returning them to a caller that has no
/// sensible recovery.
#[derive(Debug, Error)]
pub enum ProveError {
    #[error("invalid session parameters: {0}")]
    InvalidParams(&'static str),
    #[error("witness head {0} has the wrong length (expected ncols)")]
    WitnessShapeMismatch(usize),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Decs(#[from] DecsError),
    #[error(transparent)]
    Mask(#[from] MaskError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
    #[error("failed to encode proof: {0}")]
    Encode(String),
}

/// Errors from proof verification. Unlike [`ProveError`], these ARE the
/// ordinary outcome of feeding a verifier a malformed or adversarial proof;
/// a sound relation mismatch is reported through [`Verdict`], not `Err`.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid session parameters: {0}")]
    InvalidParams(&'static str),
    #[error("proof was built under different session parameters than this verifier")]
    ParamsMismatch,
    #[error("proof's labels digest does not match this verifier's expected label set")]
    LabelsDigestMismatch,
    #[error("round {0}'s re-derived {1} does not match the transmitted value")]
    FsDerivationMismatch(usize, &'static str),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Decs(#[from] DecsError),
    #[error(transparent)]
    Lvcs(#[from] LvcsError),
    #[error(transparent)]
    Transcript(#[from] TranscriptError),
    #[error("failed to decode proof: {0}")]
    Decode(String),
}

/// The verifier's three-valued outcome (§4.9): distinct from `Result`, which
/// is reserved for structural proof failures. A sound proof has all three
/// `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Verdict {
    pub ok_lin: bool,
    pub ok_eq4: bool,
    pub ok_sum: bool,
}

impl Verdict {
    pub fn all_ok(&self) -> bool {
        self.ok_lin && self.ok_eq4 && self.ok_sum
    }
}

/// A complete NIZK proof: FS state, both commitments, both openings, and
/// the transmitted (non-re-derivable) challenge/evaluation data (§3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Proof {
    pub params: SessionParams,
    pub fs_salt: [u8; 32],
    pub fs_counters: [u64; 4],
    pub fs_digests: [[u8; 64]; 4],
    pub labels_digest: [u8; 32],
    pub witness_count: usize,

    pub root_a: NodeHash,
    pub depth_a: usize,
    pub r_a: Vec<Vec<Fq>>,

    pub root_b: NodeHash,
    pub depth_b: usize,
    pub r_b: Vec<Vec<Fq>>,
    /// Limb-flattened `Q_i` rows: `rho*theta` rows, `theta` consecutive rows
    /// per quotient index (§4.7's `BuildQ`/`BuildQK`, limb-wise for `θ>1`).
    pub q_rows: Vec<Vec<Fq>>,
    /// Limb-flattened `M_i` rows, same shape as `q_rows` — transmitted
    /// separately from `q_rows` so the verifier can recompute `Eq.(4)`'s
    /// residual (`Q_i = M_i + ΣΓ′F_par + Σγ′F_agg`) instead of only
    /// re-checking `Q_i` against itself.
    pub mask_rows: Vec<Vec<Fq>>,

    pub c_matrix: Vec<Vec<Fq>>,
    pub eval_points: Vec<Fq>,
    pub v_targets_a: Vec<Vec<Fq>>,
    pub bar_values_a: Vec<Vec<Fq>>,
    pub v_targets_b: Vec<Vec<Fq>>,
    pub bar_values_b: Vec<Vec<Fq>>,

    pub tail_indices: Vec<usize>,
    pub mask_opening_a: DecsOpening,
    pub tail_opening_a: DecsOpening,
    pub mask_opening_b: DecsOpening,
    pub tail_opening_b: DecsOpening,
}

/// Drives proof construction for a fixed set of session parameters and a
/// constraint system (default-available as [`crate::constraints::NullConstraints`]).
pub struct ProverSession<'a, CS: ConstraintSystem> {
    params: SessionParams,
    ring: Ring,
    ext: ExtField,
    constraints: &'a CS,
}

impl<'a, CS: ConstraintSystem> ProverSession<'a, CS> {
    pub fn new(params: SessionParams, constraints: &'a CS) -> Result<Self, ProveError> {
        params.validate().map_err(ProveError::InvalidParams)?;
        let ring = Ring::new(params.n)?;
        let ext = build_ext_field(&params).map_err(ProveError::InvalidParams)?;
        Ok(Self { params, ring, ext, constraints })
    }

    /// Build a proof for `witness_heads` (one `ncols`-length row of public
    /// head values per witness row). Fallible entry point; see
    /// [`ProverSession::build_proof`] for the abort-on-violation wrapper.
    #[tracing::instrument(skip(self, witness_heads, rng))]
    pub fn build_proof_r(
        &self,
        witness_heads: &[Vec<Fq>],
        rng: &mut impl RngCore,
    ) -> Result<Proof, ProveError> {
        let p = &self.params;
        let theta = self.ext.theta;
        for (j, head) in witness_heads.iter().enumerate() {
            if head.len() != p.ncols {
                return Err(ProveError::WitnessShapeMismatch(j));
            }
        }
        let w = witness_heads.len();
        let omega_vec: Vec<Fq> = self.ring.subgroup()[..p.ncols].to_vec();
        let mask_points: Vec<Fq> = (p.ncols..p.ncols + p.ell).map(|i| self.ring.omega.pow(i as u64)).collect();
        let mut xs = omega_vec.clone();
        xs.extend_from_slice(&mask_points);

        let witness_coeffs: Vec<Vec<Fq>> = witness_heads
            .iter()
            .map(|head| {
                let mut ys = head.clone();
                ys.extend((0..p.ell).map(|_| Fq::from_u64(rng.next_u64() % MODULUS)));
                self.ring.lagrange_interpolate(&xs, &ys)
            })
            .collect::<Result<_, _>>()?;

        let span = tracing::debug_span!("round0", n = p.n, ncols = p.ncols, w);
        let _enter = span.enter();
        let decs_params_a = DecsParams { d: p.ncols + p.ell - 1, eta: p.eta, nonce_len: p.nonce_len };
        let pk_a = decs::commit(&witness_coeffs, decs_params_a, &self.ring, rng)?;
        let root_a = pk_a.root();
        drop(_enter);

        let labels_digest = transcript::labels_digest(&transcript::ROUND_LABELS);
        let mut fs = FsState::new(rng);

        let gamma_a = fs.grind_and_derive(ROUND_GAMMA, &[&labels_digest[..], &root_a[..]], p.kappa[0], |h| {
            transcript::derive_fq_matrix(h, "Gamma", p.eta, w)
        })?;
        tracing::debug!(round = 0, counter = fs.counters[0], "accepted Gamma");
        let r_a = decs::commit_finish(&pk_a, &gamma_a);
        decs::check_degree_bound(&r_a, decs_params_a.d)?;

        let d0 = fs.digests[ROUND_GAMMA];
        let f_par = self.constraints.build_par(&witness_coeffs, p.d_q);
        let f_agg = self.constraints.build_agg(&witness_coeffs, p.d_q);

        let (gamma_prime_k, gamma_agg_k) = fs.grind_and_derive(ROUND_GAMMA_PRIME, &[&d0[..], &root_a[..]], p.kappa[1], |h| {
            (
                transcript::derive_k_matrix(h, &self.ext, "GammaPrimePar", p.rho, f_par.len()),
                transcript::derive_k_matrix(h, &self.ext, "GammaPrimeAgg", p.rho, f_agg.len()),
            )
        })?;
        tracing::debug!(round = 1, counter = fs.counters[1], "accepted GammaPrime/gammaAgg");
        let d1 = fs.digests[ROUND_GAMMA_PRIME];
        let gamma_b = transcript::derive_fq_matrix(&d1, "GammaB", p.eta, 2 * p.rho * theta);

        let f_par_k: Vec<Vec<K>> = f_par.iter().map(|f| lift_poly_to_k(theta, f)).collect();
        let f_agg_k: Vec<Vec<K>> = f_agg.iter().map(|f| lift_poly_to_k(theta, f)).collect();

        let extra_k: Vec<K> = (0..p.rho)
            .map(|i| {
                let mut acc = K::zero(theta);
                for (t, f) in f_par.iter().enumerate() {
                    let contrib = self.ext.mul(&gamma_prime_k[i][t], &K::from_fq(theta, mask::omega_sum(&omega_vec, f)));
                    acc = self.ext.add(&acc, &contrib);
                }
                for (u, f) in f_agg.iter().enumerate() {
                    let contrib = self.ext.mul(&gamma_agg_k[i][u], &K::from_fq(theta, mask::omega_sum(&omega_vec, f)));
                    acc = self.ext.add(&acc, &contrib);
                }
                acc
            })
            .collect();
        let masks_k = mask::sample_masks_k(&self.ext, &omega_vec, p.d_q, p.rho, &extra_k, rng)?;
        let q_rows_k = mask::build_qk(&self.ext, &masks_k, &gamma_prime_k, &f_par_k, &gamma_agg_k, &f_agg_k, p.d_q);

        let q_rows = flatten_k_rows(&q_rows_k, theta);
        let mask_rows = flatten_k_rows(&masks_k, theta);
        let combined_rows: Vec<Vec<Fq>> = q_rows.iter().cloned().chain(mask_rows.iter().cloned()).collect();

        let span = tracing::debug_span!("round1_commit", rho = p.rho, theta);
        let _enter = span.enter();
        let decs_params_b = DecsParams { d: p.d_q, eta: p.eta, nonce_len: p.nonce_len };
        let pk_b = decs::commit(&combined_rows, decs_params_b, &self.ring, rng)?;
        let root_b = pk_b.root();
        drop(_enter);
        let r_b = decs::commit_finish(&pk_b, &gamma_b);
        decs::check_degree_bound(&r_b, decs_params_b.d)?;

        let m = w.max(1);
        let c_matrix = fs.grind_and_derive(ROUND_EVAL_POINTS, &[&d1[..], &root_b[..]], p.kappa[2], |h| {
            transcript::derive_fq_matrix(h, "CMatrix", m, w)
        })?;
        tracing::debug!(round = 2, counter = fs.counters[2], "accepted C matrix");
        let d2 = fs.digests[ROUND_EVAL_POINTS];
        let eval_points = transcript::derive_eval_points(&d2, "EvalPoints", m);

        let v_targets_a: Vec<Vec<Fq>> = c_matrix
            .iter()
            .map(|c_row| {
                omega_vec
                    .iter()
                    .map(|&pt| {
                        c_row
                            .iter()
                            .zip(witness_coeffs.iter())
                            .map(|(&c, poly)| c.mul(horner_eval(poly, pt)))
                            .sum()
                    })
                    .collect()
            })
            .collect();
        let requests: Vec<LinearRequest> = c_matrix
            .iter()
            .zip(eval_points.iter())
            .map(|(c, &pt)| LinearRequest { coeffs: c.clone(), point: pt })
            .collect();
        let bar_values_a = lvcs::eval_init_many(&witness_coeffs, &self.ring, p.ncols, p.ell, &requests);

        let combined_len = combined_rows.len();
        let c_matrix_b = identity_matrix(combined_len);
        let v_targets_b: Vec<Vec<Fq>> = c_matrix_b
            .iter()
            .map(|c_row| {
                omega_vec
                    .iter()
                    .map(|&pt| {
                        c_row
                            .iter()
                            .zip(combined_rows.iter())
                            .map(|(&c, poly)| c.mul(horner_eval(poly, pt)))
                            .sum()
                    })
                    .collect()
            })
            .collect();
        let requests_b: Vec<LinearRequest> = c_matrix_b
            .iter()
            .map(|c| LinearRequest { coeffs: c.clone(), point: Fq::ZERO })
            .collect();
        let bar_values_b = lvcs::eval_init_many(&combined_rows, &self.ring, p.ncols, p.ell, &requests_b);

        let tail_indices = fs.grind_and_derive(ROUND_TAIL, &[&d2[..]], p.kappa[3], |h| {
            transcript::derive_distinct_indices(h, "TailIndices", p.ell, p.ncols + p.ell, p.n)
        })?;
        tracing::debug!(round = 3, counter = fs.counters[3], "accepted tail indices");

        let mask_region: Vec<usize> = (p.ncols..p.ncols + p.ell).collect();
        let mask_opening_a = lvcs::eval_finish(&pk_a, &mask_region);
        let tail_opening_a = lvcs::eval_finish(&pk_a, &tail_indices);
        let mask_opening_b = lvcs::eval_finish(&pk_b, &mask_region);
        let tail_opening_b = lvcs::eval_finish(&pk_b, &tail_indices);

        Ok(Proof {
            params: p.clone(),
            fs_salt: fs.salt,
            fs_counters: fs.counters,
            fs_digests: fs.digests,
            labels_digest,
            witness_count: w,
            root_a,
            depth_a: pk_a.depth(),
            r_a,
            root_b,
            depth_b: pk_b.depth(),
            r_b,
            q_rows,
            mask_rows,
            c_matrix,
            eval_points,
            v_targets_a,
            bar_values_a,
            v_targets_b,
            bar_values_b,
            tail_indices,
            mask_opening_a,
            tail_opening_a,
            mask_opening_b,
            tail_opening_b,
        })
    }

    /// Convenience wrapper around [`ProverSession::build_proof_r`] that
    /// aborts (panics) on a structural violation — a prover-side invariant
    /// failure is a bug, not a verifier-facing outcome.
    pub fn build_proof(&self, witness_heads: &[Vec<Fq>], rng: &mut impl RngCore) -> Proof {
        self.build_proof_r(witness_heads, rng)
            .expect("prover invariant violated while building a proof")
    }
}

/// Drives proof verification for a fixed set of session parameters and
/// constraint system.
pub struct VerifierSession<'a, CS: ConstraintSystem> {
    params: SessionParams,
    ring: Ring,
    ext: ExtField,
    constraints: &'a CS,
}

impl<'a, CS: ConstraintSystem> VerifierSession<'a, CS> {
    pub fn new(params: SessionParams, constraints: &'a CS) -> Result<Self, VerifyError> {
        params.validate().map_err(VerifyError::InvalidParams)?;
        let ring = Ring::new(params.n)?;
        let ext = build_ext_field(&params).map_err(VerifyError::InvalidParams)?;
        Ok(Self { params, ring, ext, constraints })
    }

    #[tracing::instrument(skip(self, proof))]
    pub fn verify(&self, proof: &Proof) -> Result<Verdict, VerifyError> {
        let p = &self.params;
        let theta = self.ext.theta;
        if proof_params_key(&proof.params) != proof_params_key(p) {
            return Err(VerifyError::ParamsMismatch);
        }

        let labels_digest = transcript::labels_digest(&transcript::ROUND_LABELS);
        if proof.labels_digest != labels_digest {
            return Err(VerifyError::LabelsDigestMismatch);
        }

        let mut fs = FsState::from_parts(proof.fs_salt, [0; 4], [[0u8; 64]; 4]);

        let gamma_a = fs.replay_round(
            ROUND_GAMMA,
            &[&labels_digest[..], &proof.root_a[..]],
            p.kappa[0],
            proof.fs_counters[0],
            |h| transcript::derive_fq_matrix(h, "Gamma", p.eta, proof.witness_count),
        )?;
        if fs.digests[0] != proof.fs_digests[0] {
            return Err(VerifyError::Transcript(TranscriptError::FsReplayMismatch(0)));
        }
        decs::check_degree_bound(&proof.r_a, p.ncols + p.ell - 1)?;

        let d0 = fs.digests[ROUND_GAMMA];
        let (gamma_prime_k, gamma_agg_k) = fs.replay_round(
            ROUND_GAMMA_PRIME,
            &[&d0[..], &proof.root_a[..]],
            p.kappa[1],
            proof.fs_counters[1],
            |h| {
                (
                    transcript::derive_k_matrix(h, &self.ext, "GammaPrimePar", p.rho, self.constraints.num_par()),
                    transcript::derive_k_matrix(h, &self.ext, "GammaPrimeAgg", p.rho, self.constraints.num_agg()),
                )
            },
        )?;
        if fs.digests[1] != proof.fs_digests[1] {
            return Err(VerifyError::Transcript(TranscriptError::FsReplayMismatch(1)));
        }
        let d1 = fs.digests[ROUND_GAMMA_PRIME];

        let combined_len = proof.q_rows.len() + proof.mask_rows.len();
        let gamma_b = transcript::derive_fq_matrix(&d1, "GammaB", p.eta, combined_len);

        decs::check_degree_bound(&proof.r_b, p.d_q)?;
        decs::check_degree_bound(&proof.q_rows, p.d_q)?;
        decs::check_degree_bound(&proof.mask_rows, p.d_q)?;

        let m = proof.c_matrix.len();
        let c_matrix = fs.replay_round(
            ROUND_EVAL_POINTS,
            &[&d1[..], &proof.root_b[..]],
            p.kappa[2],
            proof.fs_counters[2],
            |h| transcript::derive_fq_matrix(h, "CMatrix", m, proof.witness_count),
        )?;
        if fs.digests[2] != proof.fs_digests[2] {
            return Err(VerifyError::Transcript(TranscriptError::FsReplayMismatch(2)));
        }
        if c_matrix != proof.c_matrix {
            return Err(VerifyError::FsDerivationMismatch(2, "CMatrix"));
        }
        let d2 = fs.digests[ROUND_EVAL_POINTS];
        let eval_points = transcript::derive_eval_points(&d2, "EvalPoints", m);
        if eval_points != proof.eval_points {
            return Err(VerifyError::FsDerivationMismatch(2, "EvalPoints"));
        }

        let tail_indices = fs.replay_round(
            ROUND_TAIL,
            &[&d2[..]],
            p.kappa[3],
            proof.fs_counters[3],
            |h| transcript::derive_distinct_indices(h, "TailIndices", p.ell, p.ncols + p.ell, p.n),
        )?;
        if fs.digests[3] != proof.fs_digests[3] {
            return Err(VerifyError::Transcript(TranscriptError::FsReplayMismatch(3)));
        }
        if tail_indices != proof.tail_indices {
            return Err(VerifyError::FsDerivationMismatch(3, "TailIndices"));
        }

        let ok_lin = lvcs::eval_step2(
            &proof.root_a,
            proof.depth_a,
            &self.ring,
            p.ncols,
            p.ell,
            p.n,
            &gamma_a,
            &proof.r_a,
            &proof.c_matrix,
            &proof.v_targets_a,
            &proof.bar_values_a,
            &proof.tail_indices,
            &proof.mask_opening_a,
            &proof.tail_opening_a,
        )?;
        if !ok_lin {
            tracing::warn!("okLin failed: witness linear-combination relation mismatch");
        }

        let c_matrix_b = identity_matrix(combined_len);
        let ok_struct_b = lvcs::eval_step2(
            &proof.root_b,
            proof.depth_b,
            &self.ring,
            p.ncols,
            p.ell,
            p.n,
            &gamma_b,
            &proof.r_b,
            &c_matrix_b,
            &proof.v_targets_b,
            &proof.bar_values_b,
            &proof.tail_indices,
            &proof.mask_opening_b,
            &proof.tail_opening_b,
        )?;
        if !ok_struct_b {
            tracing::warn!("okEq4 failed: Q/M commitment is not self-consistent with its own opening");
        }

        // Eq.(4): Q_k(i) = M_k(i) + Σ_t Γ'_{k,t}F_par,t(i) + Σ_u γ'_{k,u}F_agg,u(i)
        // at every tail index, using the transmitted q_rows/mask_rows (not
        // merely the committed combination's self-consistency above) so a
        // prover cannot commit an unrelated Q and have it pass regardless.
        let mut ok_tail_binding = true;
        let mut ok_eq4_residual = true;
        let q_rows_len = proof.q_rows.len();
        for k in 0..p.rho {
            for (t, &i) in proof.tail_opening_a.indices.iter().enumerate() {
                let point = self.ring.omega.pow(i as u64);
                let (q_val, m_val) = match (
                    reconstruct_k_at(&proof.q_rows, k * theta, theta, point),
                    reconstruct_k_at(&proof.mask_rows, k * theta, theta, point),
                ) {
                    (Some(q), Some(m)) => (q, m),
                    _ => {
                        ok_tail_binding = false;
                        ok_eq4_residual = false;
                        continue;
                    }
                };

                for l in 0..theta {
                    let q_bound = proof
                        .tail_opening_b
                        .row_values
                        .get(k * theta + l)
                        .and_then(|row| row.get(t));
                    let m_bound = proof
                        .tail_opening_b
                        .row_values
                        .get(q_rows_len + k * theta + l)
                        .and_then(|row| row.get(t));
                    if q_bound != Some(&q_val.limbs[l]) || m_bound != Some(&m_val.limbs[l]) {
                        ok_tail_binding = false;
                    }
                }

                let p_at_tail: Vec<Fq> = (0..proof.witness_count)
                    .map(|j| proof.tail_opening_a.row_values.get(j).and_then(|row| row.get(t)).copied().unwrap_or(Fq::ZERO))
                    .collect();
                let f_par_vals = self.constraints.eval_par_at(&p_at_tail, point, p.d_q);
                let f_agg_vals = self.constraints.eval_agg_at(&p_at_tail, point, p.d_q);

                let mut rhs = m_val.clone();
                for (tt, &fv) in f_par_vals.iter().enumerate() {
                    let term = self.ext.mul(&gamma_prime_k[k][tt], &K::from_fq(theta, fv));
                    rhs = self.ext.add(&rhs, &term);
                }
                for (u, &fv) in f_agg_vals.iter().enumerate() {
                    let term = self.ext.mul(&gamma_agg_k[k][u], &K::from_fq(theta, fv));
                    rhs = self.ext.add(&rhs, &term);
                }
                if q_val != rhs {
                    ok_eq4_residual = false;
                }
            }
        }
        if !ok_tail_binding {
            tracing::warn!("okEq4 failed: transmitted q_rows/mask_rows do not match the Merkle-bound tail opening");
        }
        if !ok_eq4_residual {
            tracing::warn!("okEq4 failed: Eq.(4) residual mismatch at a tail index");
        }
        let ok_eq4 = ok_struct_b && ok_tail_binding && ok_eq4_residual;

        let expected_v_targets_q: Vec<Vec<Fq>> = proof
            .q_rows
            .iter()
            .map(|poly| {
                self.ring.subgroup()[..p.ncols]
                    .iter()
                    .map(|&pt| horner_eval(poly, pt))
                    .collect()
            })
            .collect();
        let v_targets_q_consistent =
            proof.v_targets_b.len() >= q_rows_len && proof.v_targets_b[..q_rows_len] == expected_v_targets_q[..];
        let ok_sum = v_targets_q_consistent
            && proof.v_targets_b[..q_rows_len]
                .iter()
                .all(|row| row.iter().copied().sum::<Fq>() == Fq::ZERO);
        if !ok_sum {
            tracing::warn!("okSum failed: sum_Omega Q_i(omega) != 0, or q_rows disagrees with the transmitted v_targets");
        }

        Ok(Verdict { ok_lin, ok_eq4, ok_sum })
    }
}

fn identity_matrix(n: usize) -> Vec<Vec<Fq>> {
    (0..n)
        .map(|i| {
            let mut row = vec![Fq::ZERO; n];
            row[i] = Fq::ONE;
            row
        })
        .collect()
}

/// The subset of [`SessionParams`] that must match exactly between a proof
/// and a verifying session (every field except `kappa`, which only affects
/// how hard the prover must grind, not what the proof claims). `chi` is
/// folded in as a fingerprint rather than compared structurally so the key
/// stays a plain tuple; a verifier/prover disagreeing on `chi` under a
/// matching `theta` is exactly the case this guards against.
fn proof_params_key(p: &SessionParams) -> (usize, usize, usize, usize, usize, usize, usize, usize, u64) {
    (p.n, p.ncols, p.ell, p.rho, p.eta, p.theta, p.d_q, p.nonce_len, chi_fingerprint(&p.chi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::NullConstraints;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn toy_params() -> SessionParams {
        SessionParams {
            n: 32,
            ncols: 4,
            ell: 2,
            rho: 2,
            eta: 2,
            theta: 1,
            chi: vec![],
            d_q: 5,
            kappa: [4, 4, 4, 4],
            nonce_len: 16,
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn honest_proof_verifies_with_all_true_verdict() {
        init_tracing();
        let params = toy_params();
        let cs = NullConstraints;
        let prover = ProverSession::new(params.clone(), &cs).unwrap();
        let mut rng = StdRng::seed_from_u64(100);
        let witness = vec![
            vec![Fq::from_u64(1), Fq::from_u64(2), Fq::from_u64(3), Fq::from_u64(4)],
            vec![Fq::from_u64(9), Fq::from_u64(8), Fq::from_u64(7), Fq::from_u64(6)],
        ];
        let proof = prover.build_proof(&witness, &mut rng);

        let verifier = VerifierSession::new(params, &cs).unwrap();
        let verdict = verifier.verify(&proof).unwrap();
        assert!(verdict.all_ok());
    }

    #[test]
    fn honest_proof_verifies_in_small_field_extension_mode() {
        let mut rng = StdRng::seed_from_u64(103);
        let ext = crate::ext_field::random_irreducible(2, &mut rng).expect("degree-2 irreducible exists");
        let mut params = toy_params();
        params.theta = 2;
        params.chi = ext.chi;

        let cs = NullConstraints;
        let prover = ProverSession::new(params.clone(), &cs).unwrap();
        let witness = vec![vec![Fq::from_u64(1), Fq::from_u64(2), Fq::from_u64(3), Fq::from_u64(4)]];
        let proof = prover.build_proof(&witness, &mut rng);

        let verifier = VerifierSession::new(params, &cs).unwrap();
        let verdict = verifier.verify(&proof).unwrap();
        assert!(verdict.all_ok());
    }

    #[test]
    fn tampered_v_target_fails_ok_lin_without_a_structural_error() {
        let params = toy_params();
        let cs = NullConstraints;
        let prover = ProverSession::new(params.clone(), &cs).unwrap();
        let mut rng = StdRng::seed_from_u64(101);
        let witness = vec![vec![Fq::from_u64(1), Fq::from_u64(2), Fq::from_u64(3), Fq::from_u64(4)]];
        let mut proof = prover.build_proof(&witness, &mut rng);
        proof.v_targets_a[0][0] = proof.v_targets_a[0][0].add(Fq::ONE);

        let verifier = VerifierSession::new(params, &cs).unwrap();
        let verdict = verifier.verify(&proof).unwrap();
        assert!(!verdict.ok_lin);
    }

    #[test]
    fn mismatched_session_params_are_rejected() {
        let params = toy_params();
        let cs = NullConstraints;
        let prover = ProverSession::new(params.clone(), &cs).unwrap();
        let mut rng = StdRng::seed_from_u64(102);
        let witness = vec![vec![Fq::from_u64(1), Fq::from_u64(2), Fq::from_u64(3), Fq::from_u64(4)]];
        let proof = prover.build_proof(&witness, &mut rng);

        let mut other = params;
        other.eta = 3;
        let verifier = VerifierSession::new(other, &cs).unwrap();
        assert!(matches!(verifier.verify(&proof), Err(VerifyError::ParamsMismatch)));
    }

    #[test]
    fn invalid_params_are_rejected_at_construction() {
        let mut params = toy_params();
        params.n = 31; // not a power of two
        let cs = NullConstraints;
        assert!(matches!(
            ProverSession::new(params, &cs),
            Err(ProveError::InvalidParams(_))
        ));
    }
}
