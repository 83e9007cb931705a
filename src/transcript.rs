//! Fiat–Shamir transcript: grinding + domain-separated derivation (§4.6).
//!
//! Four rounds, each with a fixed label (`"fs-gamma"`, `"fs-gammap"`,
//! `"fs-eprime"`, `"fs-tail"`). `grind_and_derive` is the prover-side loop:
//! try successive counters until the SHAKE-256 digest's top `κ_round` bits
//! are zero, then hand the accepted digest to a caller-supplied derivation
//! closure. `replay_round` is the verifier-side mirror: recompute the
//! digest at the *transmitted* counter and independently check the same
//! grinding predicate before trusting anything derived from it.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use thiserror::Error;

use crate::ext_field::{ExtField, K};
use crate::field::Fq;

/// Number of FS rounds (§4.6/§4.8): γ, (Γ′,γ′), evaluation points, tail.
pub const NUM_ROUNDS: usize = 4;

/// Round indices, named for readability at call sites.
pub const ROUND_GAMMA: usize = 0;
pub const ROUND_GAMMA_PRIME: usize = 1;
pub const ROUND_EVAL_POINTS: usize = 2;
pub const ROUND_TAIL: usize = 3;

/// Fixed per-round transcript-binding labels (§4.6).
pub const ROUND_LABELS: [&str; NUM_ROUNDS] = ["fs-gamma", "fs-gammap", "fs-eprime", "fs-tail"];

/// A grind-and-derive digest: the SHAKE-256 XOF squeezed to 64 bytes.
pub type Digest = [u8; 64];

/// Errors from transcript replay and grinding.
#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("round index {0} is out of range (must be < {NUM_ROUNDS})")]
    RoundOutOfRange(usize),
    #[error("round {0}'s counter overflowed while grinding — no digest in range satisfies its κ-bit prefix")]
    CounterOverflow(usize),
    #[error("round {0}'s accepted digest does not satisfy its κ-bit zero prefix")]
    GrindingFailed(usize),
    #[error("round {0}'s recomputed digest does not match the transcript state")]
    FsReplayMismatch(usize),
    #[error("labels digest is absent from the proof; an absent digest is never backfilled")]
    MissingLabelsDigest,
}

/// Fiat–Shamir state: salt, one counter and one accepted digest per round
/// (§3 "FS state").
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FsState {
    pub salt: [u8; 32],
    pub counters: [u64; NUM_ROUNDS],
    #[serde(with = "digest_array_serde")]
    pub digests: [Digest; NUM_ROUNDS],
}

impl FsState {
    /// Fresh state with a random 32-byte salt and all-zero counters/digests.
    pub fn new(rng: &mut impl rand::RngCore) -> Self {
        let mut salt = [0u8; 32];
        rng.fill_bytes(&mut salt);
        Self {
            salt,
            counters: [0; NUM_ROUNDS],
            digests: [[0u8; 64]; NUM_ROUNDS],
        }
    }

    /// Reconstruct state from its wire parts (verifier side).
    pub fn from_parts(salt: [u8; 32], counters: [u64; NUM_ROUNDS], digests: [Digest; NUM_ROUNDS]) -> Self {
        Self { salt, counters, digests }
    }

    /// `GrindAndDerive(round, material, derive)` (§4.6): starting from this
    /// round's current counter, try successive counters until
    /// `SHAKE256.Expand(label, salt||material||counter, 64)`'s top
    /// `kappa_bits` bits are zero; accept, record `(counter, digest)`, and
    /// return `derive(digest)`.
    pub fn grind_and_derive<T>(
        &mut self,
        round: usize,
        material: &[&[u8]],
        kappa_bits: u32,
        derive: impl FnOnce(&Digest) -> T,
    ) -> Result<T, TranscriptError> {
        if round >= NUM_ROUNDS {
            return Err(TranscriptError::RoundOutOfRange(round));
        }
        let label = ROUND_LABELS[round];
        let mut counter = self.counters[round];
        loop {
            let h = grind_digest(&self.salt, label, material, counter);
            if satisfies_kappa(&h, kappa_bits) {
                self.counters[round] = counter;
                self.digests[round] = h;
                return Ok(derive(&h));
            }
            counter = counter
                .checked_add(1)
                .ok_or(TranscriptError::CounterOverflow(round))?;
        }
    }

    /// Verifier-side replay: recompute the digest at the *transmitted*
    /// `counter`, reject if it does not itself satisfy the κ-bit grinding
    /// predicate (an honest prover's counter always does), record it, and
    /// return `derive(digest)`.
    pub fn replay_round<T>(
        &mut self,
        round: usize,
        material: &[&[u8]],
        kappa_bits: u32,
        counter: u64,
        derive: impl FnOnce(&Digest) -> T,
    ) -> Result<T, TranscriptError> {
        if round >= NUM_ROUNDS {
            return Err(TranscriptError::RoundOutOfRange(round));
        }
        let label = ROUND_LABELS[round];
        let h = grind_digest(&self.salt, label, material, counter);
        if !satisfies_kappa(&h, kappa_bits) {
            return Err(TranscriptError::GrindingFailed(round));
        }
        self.counters[round] = counter;
        self.digests[round] = h;
        Ok(derive(&h))
    }

    /// Check a previously-accepted round's digest matches what a fresh
    /// `grind_and_derive`/`replay_round` call just recomputed — used when a
    /// proof carries an explicit digest value the verifier must bind to,
    /// rather than accepting silently re-derived state.
    pub fn check_digest(&self, round: usize, expected: &Digest) -> Result<(), TranscriptError> {
        if round >= NUM_ROUNDS {
            return Err(TranscriptError::RoundOutOfRange(round));
        }
        if &self.digests[round] != expected {
            return Err(TranscriptError::FsReplayMismatch(round));
        }
        Ok(())
    }
}

fn shake_expand(label: &str, input: &[u8], out_len: usize) -> Vec<u8> {
    let mut hasher = Shake256::default();
    hasher.update(label.as_bytes());
    hasher.update(input);
    let mut reader = hasher.finalize_xof();
    let mut out = vec![0u8; out_len];
    reader.read(&mut out);
    out
}

fn grind_digest(salt: &[u8; 32], label: &str, material: &[&[u8]], counter: u64) -> Digest {
    let mut input = Vec::new();
    input.extend_from_slice(salt);
    for m in material {
        input.extend_from_slice(m);
    }
    input.extend_from_slice(&counter.to_le_bytes());
    let bytes = shake_expand(label, &input, 64);
    let mut out = [0u8; 64];
    out.copy_from_slice(&bytes);
    out
}

/// True iff the top `kappa_bits` bits of `h` (MSB-first within each byte)
/// are all zero.
fn satisfies_kappa(h: &Digest, kappa_bits: u32) -> bool {
    if kappa_bits == 0 {
        return true;
    }
    let full_bytes = (kappa_bits / 8) as usize;
    let rem_bits = kappa_bits % 8;
    if h[..full_bytes.min(h.len())].iter().any(|&b| b != 0) {
        return false;
    }
    if rem_bits > 0 && full_bytes < h.len() {
        let mask = 0xFFu8 << (8 - rem_bits);
        if h[full_bytes] & mask != 0 {
            return false;
        }
    }
    true
}

/// Squeeze `count` base-field scalars from an accepted digest under a
/// sub-label (§4.6 "each scalar is a SHAKE-256 squeeze reduced mod q").
fn squeeze_scalars(h: &Digest, sublabel: &str, count: usize) -> Vec<Fq> {
    let bytes = shake_expand(sublabel, h, count * 8);
    bytes
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            Fq::from_le_bytes(b)
        })
        .collect()
}

/// Derive a `rows × cols` base-field challenge matrix from an accepted
/// digest (the θ=1 branch of Γ/Γ′/γ′ derivation).
pub fn derive_fq_matrix(h: &Digest, sublabel: &str, rows: usize, cols: usize) -> Vec<Vec<Fq>> {
    let flat = squeeze_scalars(h, sublabel, rows * cols);
    flat.chunks(cols).map(|c| c.to_vec()).collect()
}

/// Derive a `rows × cols` `K`-challenge matrix (θ > 1 branch): each scalar
/// becomes `θ` consecutive base-field squeezes forming one `K` limb vector.
pub fn derive_k_matrix(
    h: &Digest,
    ext: &ExtField,
    sublabel: &str,
    rows: usize,
    cols: usize,
) -> Vec<Vec<K>> {
    let flat = squeeze_scalars(h, sublabel, rows * cols * ext.theta);
    let elems: Vec<K> = flat
        .chunks(ext.theta)
        .map(|limbs| K { limbs: limbs.to_vec() })
        .collect();
    elems.chunks(cols).map(|c| c.to_vec()).collect()
}

/// Derive `count` base-field evaluation points (θ=1 branch of round 2).
pub fn derive_eval_points(h: &Digest, sublabel: &str, count: usize) -> Vec<Fq> {
    squeeze_scalars(h, sublabel, count)
}

/// Derive `count` `K`-points (θ>1 branch of round 2).
pub fn derive_k_points(h: &Digest, ext: &ExtField, sublabel: &str, count: usize) -> Vec<K> {
    let flat = squeeze_scalars(h, sublabel, count * ext.theta);
    flat.chunks(ext.theta)
        .map(|limbs| K { limbs: limbs.to_vec() })
        .collect()
}

/// Derive `ell` distinct indices in `[lo, hi)` from an accepted digest via
/// rejection sampling (round 3's tail-index set `E`).
///
/// Panics if `hi - lo < ell` (no such set exists) — a parameter-validation
/// bug, not a runtime condition a caller should route through `Result`.
pub fn derive_distinct_indices(h: &Digest, sublabel: &str, ell: usize, lo: usize, hi: usize) -> Vec<usize> {
    let range = hi - lo;
    assert!(range >= ell, "cannot draw {ell} distinct indices from a range of {range}");
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(ell);
    let mut ctr: u64 = 0;
    while out.len() < ell {
        let mut input = h.to_vec();
        input.extend_from_slice(&ctr.to_le_bytes());
        let bytes = shake_expand(sublabel, &input, 8);
        let mut b = [0u8; 8];
        b.copy_from_slice(&bytes);
        let v = u64::from_le_bytes(b);
        let idx = lo + (v as usize % range);
        if seen.insert(idx) {
            out.push(idx);
        }
        ctr += 1;
    }
    out.sort_unstable();
    out
}

/// `SHAKE256` digest (32 bytes) over a sorted, deduplicated set of public
/// labels — the "labels digest" bound into every proof (§3, §9 Open
/// Question #1). Computed once at `build()` time and never backfilled by
/// `verify()`: an absent digest is a structural `FsReplayMismatch`, not a
/// value the verifier recomputes on the proof's behalf (see DESIGN.md).
pub fn labels_digest(labels: &[&str]) -> [u8; 32] {
    let mut sorted: Vec<&str> = labels.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut hasher = Shake256::default();
    hasher.update(b"labels-digest");
    for l in &sorted {
        hasher.update(&(l.len() as u32).to_le_bytes());
        hasher.update(l.as_bytes());
    }
    let mut reader = hasher.finalize_xof();
    let mut out = [0u8; 32];
    reader.read(&mut out);
    out
}

mod digest_array_serde {
    use super::Digest;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &[Digest; 4], s: S) -> Result<S::Ok, S::Error> {
        let as_vecs: Vec<Vec<u8>> = v.iter().map(|d| d.to_vec()).collect();
        as_vecs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[Digest; 4], D::Error> {
        let as_vecs: Vec<Vec<u8>> = Vec::deserialize(d)?;
        if as_vecs.len() != 4 {
            return Err(serde::de::Error::custom("expected exactly 4 digests"));
        }
        let mut out = [[0u8; 64]; 4];
        for (o, v) in out.iter_mut().zip(as_vecs.iter()) {
            if v.len() != 64 {
                return Err(serde::de::Error::custom("each digest must be 64 bytes"));
            }
            o.copy_from_slice(v);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn grind_and_derive_accepts_a_digest_satisfying_kappa() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut fs = FsState::new(&mut rng);
        let root = b"root-bytes";
        let derived = fs
            .grind_and_derive(ROUND_GAMMA, &[root], 8, |h| h.to_vec())
            .unwrap();
        assert!(satisfies_kappa(&fs.digests[ROUND_GAMMA], 8));
        assert_eq!(derived, fs.digests[ROUND_GAMMA].to_vec());
    }

    #[test]
    fn replay_reproduces_the_same_digest_and_counter() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut fs = FsState::new(&mut rng);
        let root = b"root-bytes";
        fs.grind_and_derive(ROUND_GAMMA, &[root], 6, |_| ()).unwrap();
        let (counter, digest) = (fs.counters[ROUND_GAMMA], fs.digests[ROUND_GAMMA]);

        let mut replay = FsState::from_parts(fs.salt, [0; NUM_ROUNDS], [[0u8; 64]; NUM_ROUNDS]);
        replay
            .replay_round(ROUND_GAMMA, &[root], 6, counter, |_| ())
            .unwrap();
        assert_eq!(replay.digests[ROUND_GAMMA], digest);
    }

    #[test]
    fn replay_rejects_a_counter_that_fails_the_grinding_predicate() {
        let mut rng = StdRng::seed_from_u64(3);
        let fs = FsState::new(&mut rng);
        let mut replay = fs.clone();
        // Counter 0 essentially never satisfies a demanding kappa; use a high
        // bound to make the rejection deterministic across seeds.
        let result = replay.replay_round(ROUND_GAMMA, &[b"root"], 40, 0, |_| ());
        assert!(matches!(result, Err(TranscriptError::GrindingFailed(ROUND_GAMMA))));
    }

    #[test]
    fn fs_replay_is_deterministic_given_the_same_transcript() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut fs1 = FsState::new(&mut rng);
        let gamma1 = fs1
            .grind_and_derive(ROUND_GAMMA, &[b"root"], 4, |h| derive_fq_matrix(h, "Gamma", 2, 3))
            .unwrap();

        let mut fs2 = FsState::from_parts(fs1.salt, [0; NUM_ROUNDS], [[0u8; 64]; NUM_ROUNDS]);
        let gamma2 = fs2
            .replay_round(ROUND_GAMMA, &[b"root"], 4, fs1.counters[ROUND_GAMMA], |h| {
                derive_fq_matrix(h, "Gamma", 2, 3)
            })
            .unwrap();

        assert_eq!(gamma1, gamma2);
    }

    #[test]
    fn derive_distinct_indices_are_unique_and_in_range() {
        let mut rng = StdRng::seed_from_u64(5);
        let fs = FsState::new(&mut rng);
        let idxs = derive_distinct_indices(&fs.digests[0], "Tail", 4, 6, 16);
        let mut sorted = idxs.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), idxs.len());
        assert!(idxs.iter().all(|&i| i >= 6 && i < 16));
    }

    #[test]
    fn labels_digest_is_order_independent_and_deduplicates() {
        let a = labels_digest(&["fs-tail", "fs-gamma", "fs-gammap"]);
        let b = labels_digest(&["fs-gamma", "fs-gammap", "fs-tail", "fs-gamma"]);
        assert_eq!(a, b);
    }

    #[test]
    fn fs_state_serde_roundtrip() {
        let mut rng = StdRng::seed_from_u64(6);
        let fs = FsState::new(&mut rng);
        let json = serde_json::to_string(&fs).unwrap();
        let back: FsState = serde_json::from_str(&json).unwrap();
        assert_eq!(fs, back);
    }
}
