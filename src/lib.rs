//! Crate root: public surface and module layout for a NIZK proof system
//! built from a degree-bounded evaluation-domain commitment scheme (DECS), a
//! linear vector commitment layered on top (LVCS), and a four-round
//! Fiat–Shamir PIOP driver (PACS) that compiles the two into a
//! non-interactive proof.
//!
//! ## Invariants
//!
//! - **Field.** All arithmetic is over the Goldilocks prime field
//!   `q = 2^64 − 2^32 + 1` ([`field::Fq`]), with an optional degree-`θ`
//!   extension ([`ext_field::K`]) for small-field ("theta > 1") modes.
//! - **Commitment.** Rows are committed via a binary Merkle tree over
//!   evaluation-domain values ([`merkle`]), opened with frontier-compressed
//!   paths; [`decs`] layers the degree-bound + linear-relation check on top,
//!   [`lvcs`] layers arbitrary linear-combination queries on top of that.
//! - **Fiat–Shamir.** Every round is accepted only once a SHAKE-256 digest's
//!   top `κ_round` bits are zero ([`transcript`]); the verifier replays the
//!   exact same grind-and-derive sequence.
//! - **Verdict, not just Result.** A sound/unsound proof is reported via
//!   [`scheduler::Verdict`] (three independent booleans); `Result` is
//!   reserved for structural failures a verifier cannot meaningfully check
//!   against (malformed openings, FS replay mismatches, degree violations).
//!
//! We forbid unsafe code throughout.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// Modular arithmetic over the Goldilocks field, NTT/INTT, and Lagrange
/// interpolation.
pub mod field;
/// Degree-`θ` extension field `K = F_q[X]/(χ)` for small-field mode.
pub mod ext_field;
/// Binary Merkle commitment with frontier-compressed openings.
pub mod merkle;
/// Degree-bounded evaluation-domain commitment scheme.
pub mod decs;
/// Linear vector commitment scheme layered on DECS.
pub mod lvcs;
/// Fiat–Shamir transcript: grinding + domain-separated derivation.
pub mod transcript;
/// Mask polynomial sampler and quotient (`Q_i`) builder.
pub mod mask;
/// Constraint evaluator hooks (`F_par`/`F_agg`) and the null constraint system.
pub mod constraints;
/// PACS driver: prover/verifier session orchestration and Fiat–Shamir schedule.
pub mod scheduler;
/// Fixed-width bit-packing for matrices of field elements.
pub mod packing;
/// Streaming/blocking utilities shared by the commitment layers.
pub mod stream;
/// Host-facing façade: session builders and the proof wire format.
pub mod api;

pub use crate::ext_field::{ExtField, ExtFieldError, K};
pub use crate::field::{Fq, FieldError, Ring};
pub use crate::scheduler::{
    ProveError, Proof, ProverSession, SessionParams, Verdict, VerifierSession, VerifyError,
};

/// Security parameter λ in bits. Individual round grinding strength is
/// configured per round via [`SessionParams::kappa`]; this constant is the
/// nominal target a caller should aim `Σ κ_round` and the FS digest width
/// toward, not a value enforced internally.
pub const SECURITY_LAMBDA: usize = 128;
