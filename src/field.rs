//! Modular arithmetic and the NTT-friendly ring.
//!
//! `Fq` is a 64-bit prime field element. The modulus is fixed to the
//! Goldilocks prime `2^64 - 2^32 + 1`, so a 128-bit intermediate product is
//! always enough to reduce a multiplication, and the multiplicative group has
//! 2-adicity 32 — power-of-two evaluation domains up to `N = 2^32` have a
//! primitive root of unity.
//!
//! [`Ring`] wraps an `N` together with its chosen primitive `N`-th root of
//! unity and exposes the coefficient/evaluation transform (`ntt`/`intt`) and
//! Lagrange interpolation over an arbitrary sampled set of points.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The Goldilocks prime: `2^64 - 2^32 + 1`.
pub const MODULUS: u64 = 0xFFFF_FFFF_0000_0001;

/// A fixed multiplicative generator of `Fq*`.
const MULTIPLICATIVE_GENERATOR: Fq = Fq(7);

/// An element of `F_q` for the fixed Goldilocks modulus.
///
/// Internally a reduced residue in `[0, MODULUS)`; all arithmetic methods
/// take and return reduced values, so no method needs to re-check range.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fq(u64);

impl serde::Serialize for Fq {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Fq {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = u64::deserialize(d)?;
        if v >= MODULUS {
            return Err(serde::de::Error::custom(format!(
                "Fq value {v} is not a canonically reduced residue (>= modulus)"
            )));
        }
        Ok(Fq(v))
    }
}

impl std::fmt::Debug for Fq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fq({})", self.0)
    }
}

impl Fq {
    /// The additive identity.
    pub const ZERO: Fq = Fq(0);
    /// The multiplicative identity.
    pub const ONE: Fq = Fq(1);

    /// Reduce `v` modulo the field's modulus.
    #[inline]
    pub fn new(v: u64) -> Self {
        Fq(v % MODULUS)
    }

    /// Alias for [`Fq::new`], for call sites that prefer naming the source type.
    #[inline]
    pub fn from_u64(v: u64) -> Self {
        Self::new(v)
    }

    /// Reduce a signed residue, wrapping negative inputs into `[0, MODULUS)`.
    pub fn from_i64(v: i64) -> Self {
        if v >= 0 {
            Self::new(v as u64)
        } else {
            Self::new(MODULUS - ((-v) as u64 % MODULUS))
        }
    }

    /// The underlying reduced residue.
    #[inline]
    pub fn to_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn add(self, rhs: Self) -> Self {
        let (sum, carry) = self.0.overflowing_add(rhs.0);
        Fq(if carry || sum >= MODULUS {
            sum.wrapping_sub(MODULUS)
        } else {
            sum
        })
    }

    #[inline]
    pub fn sub(self, rhs: Self) -> Self {
        let (diff, borrow) = self.0.overflowing_sub(rhs.0);
        Fq(if borrow {
            diff.wrapping_add(MODULUS)
        } else {
            diff
        })
    }

    #[inline]
    pub fn neg(self) -> Self {
        if self.0 == 0 {
            self
        } else {
            Fq(MODULUS - self.0)
        }
    }

    #[inline]
    pub fn mul(self, rhs: Self) -> Self {
        let wide = (self.0 as u128) * (rhs.0 as u128);
        Fq((wide % MODULUS as u128) as u64)
    }

    /// `self^exp` by square-and-multiply.
    pub fn pow(self, mut exp: u64) -> Self {
        let mut base = self;
        let mut acc = Fq::ONE;
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc.mul(base);
            }
            base = base.mul(base);
            exp >>= 1;
        }
        acc
    }

    /// Multiplicative inverse via Fermat's little theorem (`self^(q-2)`).
    ///
    /// Returns `None` for zero.
    pub fn inverse(self) -> Option<Self> {
        if self.is_zero() {
            None
        } else {
            Some(self.pow(MODULUS - 2))
        }
    }

    /// Little-endian 8-byte encoding of the reduced residue.
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decode a little-endian 8-byte residue, reducing if it is out of range.
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self::new(u64::from_le_bytes(bytes))
    }
}

impl std::ops::Add for Fq {
    type Output = Fq;
    fn add(self, rhs: Self) -> Fq {
        Fq::add(self, rhs)
    }
}
impl std::ops::Sub for Fq {
    type Output = Fq;
    fn sub(self, rhs: Self) -> Fq {
        Fq::sub(self, rhs)
    }
}
impl std::ops::Mul for Fq {
    type Output = Fq;
    fn mul(self, rhs: Self) -> Fq {
        Fq::mul(self, rhs)
    }
}
impl std::ops::Neg for Fq {
    type Output = Fq;
    fn neg(self) -> Fq {
        Fq::neg(self)
    }
}
impl std::ops::AddAssign for Fq {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl std::ops::SubAssign for Fq {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl std::ops::MulAssign for Fq {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}
impl std::iter::Sum for Fq {
    fn sum<I: Iterator<Item = Fq>>(iter: I) -> Self {
        iter.fold(Fq::ZERO, |a, b| a + b)
    }
}

/// Errors from ring construction, transforms, and interpolation.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("ring size must be a power of two (got {0})")]
    NotPowerOfTwo(usize),
    #[error("no primitive {0}-th root of unity exists for this modulus")]
    NoRootOfUnity(usize),
    #[error("interpolation set has {m} points but the ring only has {n}")]
    DomainDegreeExceeded { m: usize, n: usize },
    #[error("interpolation points must be pairwise distinct (duplicate at index {0})")]
    DuplicateInterpolationPoint(usize),
}

/// A primitive `n`-th root of unity for the fixed Goldilocks modulus.
pub fn root_of_unity(n: usize) -> Result<Fq, FieldError> {
    if n == 0 || !n.is_power_of_two() {
        return Err(FieldError::NotPowerOfTwo(n));
    }
    let n_u64 = n as u64;
    if (MODULUS - 1) % n_u64 != 0 {
        return Err(FieldError::NoRootOfUnity(n));
    }
    let exp = (MODULUS - 1) / n_u64;
    Ok(MULTIPLICATIVE_GENERATOR.pow(exp))
}

/// An NTT-friendly evaluation ring of size `n` (a power of two).
///
/// A polynomial is represented as a `Vec<Fq>` of length `n` in one of two
/// isomorphic views — coefficient domain or evaluation domain (values on the
/// subgroup `{1, ω, …, ω^{n-1}}`) — and callers declare which view they hold;
/// `Ring` itself does not tag the buffer.
#[derive(Debug, Clone)]
pub struct Ring {
    /// Ring size (a power of two).
    pub n: usize,
    /// Primitive `n`-th root of unity generating the evaluation subgroup.
    pub omega: Fq,
    omega_inv: Fq,
    n_inv: Fq,
}

impl Ring {
    /// Build a ring of size `n`, deriving its root of unity and inverses.
    pub fn new(n: usize) -> Result<Self, FieldError> {
        let omega = root_of_unity(n)?;
        let omega_inv = omega.inverse().expect("root of unity is nonzero");
        let n_inv = Fq::from_u64(n as u64)
            .inverse()
            .ok_or(FieldError::NotPowerOfTwo(n))?;
        Ok(Self {
            n,
            omega,
            omega_inv,
            n_inv,
        })
    }

    /// The evaluation set `{ω^0, ω^1, …, ω^{n-1}}`.
    pub fn subgroup(&self) -> Vec<Fq> {
        let mut out = Vec::with_capacity(self.n);
        let mut acc = Fq::ONE;
        for _ in 0..self.n {
            out.push(acc);
            acc = acc.mul(self.omega);
        }
        out
    }

    /// Forward NTT: coefficient domain → evaluation domain, in place.
    ///
    /// Panics if `buf.len() != self.n`.
    pub fn ntt_in_place(&self, buf: &mut [Fq]) {
        assert_eq!(buf.len(), self.n, "NTT buffer length must equal ring size");
        ntt_core(buf, self.omega);
    }

    /// Inverse NTT: evaluation domain → coefficient domain, in place.
    pub fn intt_in_place(&self, buf: &mut [Fq]) {
        assert_eq!(buf.len(), self.n, "INTT buffer length must equal ring size");
        ntt_core(buf, self.omega_inv);
        for v in buf.iter_mut() {
            *v = v.mul(self.n_inv);
        }
    }

    /// Pointwise multiplication of two evaluation-domain vectors.
    pub fn pointwise_mul(&self, a: &[Fq], b: &[Fq]) -> Vec<Fq> {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b.iter()).map(|(&x, &y)| x.mul(y)).collect()
    }

    /// Lagrange-interpolate `(xs[i], ys[i])` into a coefficient-domain
    /// polynomial of degree `< xs.len()`.
    ///
    /// Uses a precomputed master vanishing polynomial `T(X) = Π (X - x_i)`
    /// and, per point, the quotient `T(X)/(X - x_i)` evaluated at `x_i` to
    /// get the denominator `T'(x_i)` in one pass; each denominator inverse is
    /// computed exactly once.
    pub fn lagrange_interpolate(&self, xs: &[Fq], ys: &[Fq]) -> Result<Vec<Fq>, FieldError> {
        assert_eq!(xs.len(), ys.len(), "xs and ys must have equal length");
        let m = xs.len();
        if m > self.n {
            return Err(FieldError::DomainDegreeExceeded { m, n: self.n });
        }
        for i in 1..m {
            if xs[..i].contains(&xs[i]) {
                return Err(FieldError::DuplicateInterpolationPoint(i));
            }
        }
        if m == 0 {
            return Ok(Vec::new());
        }

        let t = vanishing_poly(xs);
        let mut coeffs = vec![Fq::ZERO; m];
        for i in 0..m {
            let qi = synthetic_divide_by_linear(&t, xs[i]);
            let denom = horner_eval(&qi, xs[i]);
            let denom_inv = denom
                .inverse()
                .expect("distinct interpolation points give a nonzero derivative");
            let w = ys[i].mul(denom_inv);
            for (k, &qc) in qi.iter().enumerate() {
                coeffs[k] = coeffs[k].add(w.mul(qc));
            }
        }
        Ok(coeffs)
    }
}

/// Horner evaluation of a coefficient-domain polynomial (lowest degree first).
pub fn horner_eval(coeffs: &[Fq], x: Fq) -> Fq {
    let mut acc = Fq::ZERO;
    for &c in coeffs.iter().rev() {
        acc = acc.mul(x).add(c);
    }
    acc
}

/// `Σ_{ω ∈ pts} ω^k`, the power sums used by the mask sampler (§4.7).
pub fn power_sum(pts: &[Fq], k: u64) -> Fq {
    pts.iter().map(|&p| p.pow(k)).sum()
}

fn bit_reverse_permute(buf: &mut [Fq]) {
    let n = buf.len();
    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = (i as u32).reverse_bits() >> (32 - bits);
        let j = j as usize;
        if i < j {
            buf.swap(i, j);
        }
    }
}

/// Iterative radix-2 Cooley–Tukey NTT using `root` as the transform's
/// primitive `n`-th root of unity (the inverse transform just passes
/// `omega_inv` and lets the caller rescale by `n^{-1}`).
fn ntt_core(buf: &mut [Fq], root: Fq) {
    let n = buf.len();
    if n <= 1 {
        return;
    }
    bit_reverse_permute(buf);
    let mut len = 2usize;
    while len <= n {
        let w_len = root.pow((n / len) as u64);
        let mut i = 0;
        while i < n {
            let mut w = Fq::ONE;
            for j in 0..len / 2 {
                let u = buf[i + j];
                let v = buf[i + j + len / 2].mul(w);
                buf[i + j] = u.add(v);
                buf[i + j + len / 2] = u.sub(v);
                w = w.mul(w_len);
            }
            i += len;
        }
        len <<= 1;
    }
}

/// `T(X) = Π_i (X - x_i)`, monic, coefficients low-degree first.
fn vanishing_poly(xs: &[Fq]) -> Vec<Fq> {
    let mut coeffs = vec![Fq::ONE];
    for &x in xs {
        let mut next = vec![Fq::ZERO; coeffs.len() + 1];
        for (i, &c) in coeffs.iter().enumerate() {
            next[i + 1] = next[i + 1].add(c);
            next[i] = next[i].sub(c.mul(x));
        }
        coeffs = next;
    }
    coeffs
}

/// Divide the monic polynomial `coeffs` (low-degree first) by `(X - root)`,
/// assuming `root` is an actual root. The remainder is not checked; callers
/// only ever pass roots of `coeffs` itself.
fn synthetic_divide_by_linear(coeffs: &[Fq], root: Fq) -> Vec<Fq> {
    let deg = coeffs.len() - 1;
    let mut q = vec![Fq::ZERO; deg];
    q[deg - 1] = coeffs[deg];
    for k in (0..deg - 1).rev() {
        q[k] = coeffs[k + 1].add(root.mul(q[k + 1]));
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sub_neg_roundtrip() {
        let a = Fq::from_u64(12345);
        let b = Fq::from_u64(MODULUS - 1);
        assert_eq!(a.add(b).sub(b), a);
        assert_eq!(a.add(a.neg()), Fq::ZERO);
    }

    #[test]
    fn inverse_is_multiplicative_identity() {
        let a = Fq::from_u64(987654321);
        let inv = a.inverse().unwrap();
        assert_eq!(a.mul(inv), Fq::ONE);
    }

    #[test]
    fn ntt_intt_roundtrip() {
        let ring = Ring::new(16).unwrap();
        let mut coeffs: Vec<Fq> = (0..16u64).map(Fq::from_u64).collect();
        let original = coeffs.clone();
        ring.ntt_in_place(&mut coeffs);
        ring.intt_in_place(&mut coeffs);
        assert_eq!(coeffs, original);
    }

    #[test]
    fn ntt_matches_naive_evaluation() {
        let ring = Ring::new(8).unwrap();
        let coeffs: Vec<Fq> = (0..8u64).map(Fq::from_u64).collect();
        let mut transformed = coeffs.clone();
        ring.ntt_in_place(&mut transformed);

        let subgroup = ring.subgroup();
        for (i, &point) in subgroup.iter().enumerate() {
            assert_eq!(horner_eval(&coeffs, point), transformed[i]);
        }
    }

    #[test]
    fn lagrange_interpolate_recovers_polynomial() {
        let ring = Ring::new(16).unwrap();
        let xs: Vec<Fq> = (1..=4u64).map(Fq::from_u64).collect();
        let poly = vec![Fq::from_u64(3), Fq::from_u64(1), Fq::from_u64(2)]; // 3 + X + 2X^2
        let ys: Vec<Fq> = xs.iter().map(|&x| horner_eval(&poly, x)).collect();

        let recovered = ring.lagrange_interpolate(&xs, &ys).unwrap();
        for &x in &xs {
            assert_eq!(horner_eval(&recovered, x), horner_eval(&poly, x));
        }
    }

    #[test]
    fn lagrange_rejects_oversized_set() {
        let ring = Ring::new(4).unwrap();
        let xs: Vec<Fq> = (0..8u64).map(Fq::from_u64).collect();
        let ys = xs.clone();
        assert!(matches!(
            ring.lagrange_interpolate(&xs, &ys),
            Err(FieldError::DomainDegreeExceeded { m: 8, n: 4 })
        ));
    }

    #[test]
    fn lagrange_rejects_duplicate_points() {
        let ring = Ring::new(16).unwrap();
        let xs = vec![Fq::from_u64(1), Fq::from_u64(1)];
        let ys = vec![Fq::from_u64(5), Fq::from_u64(9)];
        assert!(matches!(
            ring.lagrange_interpolate(&xs, &ys),
            Err(FieldError::DuplicateInterpolationPoint(1))
        ));
    }
}
