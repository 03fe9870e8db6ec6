//! Linear algebra helpers for statically sized covariance matrices.
//!
//! Public API:
//!     pub fn symmetrize(m) -> SMatrix
//!     pub fn is_symmetric(m, tolerance) -> bool
//!     pub fn reciprocal_condition(m, inverse) -> f64
//!     pub fn try_invert_spd(m) -> Option<SMatrix>
//!
//! Strategy for inverting the innovation covariance $S = H P H^T + R$:
//! 1) Symmetrize (exact no-op for a symmetric $S$, removes rounding noise of $H P H^T$)
//! 2) Cholesky (fast path, $S$ is SPD whenever $P$ and $R$ are)
//! 3) LU inverse (symmetric but indefinite $S$ from inconsistent inputs)
//! 4) Reject the result if it is non-finite or $S$ is numerically singular, i.e. its reciprocal
//!    condition number in the 1-norm is below [`MIN_RECIPROCAL_CONDITION`]
//!
//! A rank deficient $S$ rarely produces an exact zero pivot: rounding leaves a tiny one and the
//! "inverse" has entries around $10^{15}$. The conditioning test catches those on both paths.
//! No jitter is added: a singular innovation is reported to the caller instead of repaired.

use nalgebra::SMatrix;
use nalgebra::linalg::Cholesky;

/// Smallest accepted $1 / (\lVert S \rVert_1 \lVert S^{-1} \rVert_1)$; about twelve
/// significant digits lost in the gain.
pub const MIN_RECIPROCAL_CONDITION: f64 = 1e-12;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
#[inline]
pub fn symmetrize<const D: usize>(m: &SMatrix<f64, D, D>) -> SMatrix<f64, D, D> {
    (m + m.transpose()) * 0.5
}

/// Whether `m` equals its transpose up to `tolerance`, relative to the largest entry (or 1).
pub fn is_symmetric<const D: usize>(m: &SMatrix<f64, D, D>, tolerance: f64) -> bool {
    let scale = m.amax().max(1.0);
    let mut max_abs = 0.0f64;
    for i in 0..D {
        for j in (i + 1)..D {
            max_abs = max_abs.max((m[(i, j)] - m[(j, i)]).abs());
        }
    }
    max_abs <= tolerance * scale
}

/// Maximum absolute column sum.
fn one_norm<const D: usize>(m: &SMatrix<f64, D, D>) -> f64 {
    m.column_iter()
        .map(|col| col.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Reciprocal condition number of `m` in the 1-norm, given its computed `inverse`.
///
/// 1 for the identity, 0 for a zero matrix, close to machine epsilon for a matrix that is
/// singular up to rounding.
pub fn reciprocal_condition<const D: usize>(
    m: &SMatrix<f64, D, D>,
    inverse: &SMatrix<f64, D, D>,
) -> f64 {
    let product = one_norm(m) * one_norm(inverse);
    if product > 0.0 && product.is_finite() {
        1.0 / product
    } else {
        0.0
    }
}

/// Invert a symmetric positive (semi-)definite matrix, Cholesky first, LU as fallback.
///
/// Returns `None` if the matrix is singular or ill-conditioned (see
/// [`MIN_RECIPROCAL_CONDITION`]), or if the inverse contains non-finite entries.
pub fn try_invert_spd<const D: usize>(m: &SMatrix<f64, D, D>) -> Option<SMatrix<f64, D, D>> {
    if !m.iter().all(|v| v.is_finite()) {
        return None;
    }
    let m = symmetrize(m);
    let inverse = match Cholesky::new(m) {
        Some(ch) => ch.inverse(),
        None => m.try_inverse()?,
    };
    (inverse.iter().all(|v| v.is_finite())
        && reciprocal_condition(&m, &inverse) >= MIN_RECIPROCAL_CONDITION)
        .then_some(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Matrix2, Matrix3, Vector3};

    fn approx_eq<const D: usize>(a: &SMatrix<f64, D, D>, b: &SMatrix<f64, D, D>, tol: f64) -> bool {
        (a - b).amax() <= tol
    }

    #[test]
    fn t_symmetrize() {
        let m = Matrix2::new(1.0, 2.0, 0.0, 3.0);
        let s = symmetrize(&m);
        assert!(approx_eq(&s, &Matrix2::new(1.0, 1.0, 1.0, 3.0), 1e-15));
        assert!(is_symmetric(&s, 0.0));
    }

    #[test]
    fn t_is_symmetric() {
        let a = Matrix3::new(1.0, 2.0, 0.5, 0.0, 1.0, -1.0, 0.0, 0.0, 0.2);
        let p = a * a.transpose();
        assert!(is_symmetric(&p, 1e-12));
        assert!(!is_symmetric(&a, 1e-12));
    }

    #[test]
    fn t_is_symmetric_relative_tolerance() {
        let mut m = Matrix2::new(1e6, 3e5, 3e5, 2e6);
        m[(0, 1)] += 1e-4;
        assert!(is_symmetric(&m, 1e-9));
        assert!(!is_symmetric(&m, 1e-12));
    }

    #[test]
    fn t_invert_spd() {
        let a = Matrix3::new(1.0, 2.0, 0.5, 0.0, 1.0, -1.0, 0.0, 0.0, 0.2);
        let p = a * a.transpose();
        let inv = try_invert_spd(&p).expect("SPD matrix should invert");
        assert!(approx_eq(&(p * inv), &Matrix3::identity(), 1e-9));
    }

    #[test]
    fn t_invert_indefinite_falls_back_to_lu() {
        let m = Matrix2::new(1.0, 2.0, 2.0, 1.0); // eigenvalues: 3, -1
        assert!(Cholesky::new(m).is_none());
        let inv = try_invert_spd(&m).expect("invertible indefinite matrix");
        assert!(approx_eq(&(m * inv), &Matrix2::identity(), 1e-12));
    }

    #[test]
    fn t_invert_singular_is_none() {
        assert!(try_invert_spd(&Matrix2::<f64>::zeros()).is_none());
        assert!(try_invert_spd(&Matrix2::new(1.0, 1.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn t_invert_rank_one_is_none() {
        // [[s, s], [s, s]]: singular, but rounding usually leaves a tiny Cholesky pivot
        for s in [1.05, 0.3, 0.37, 1.0 / 3.0, 2.5e-3, 7.0e4] {
            let m = Matrix2::new(s, s, s, s);
            assert!(try_invert_spd(&m).is_none(), "s = {s}");
        }
        let v = Vector3::new(0.3, -1.7, 2.2);
        assert!(try_invert_spd(&(v * v.transpose())).is_none());
        let w = Vector3::new(1.0, 0.1, 0.4);
        let rank_two = v * v.transpose() + w * w.transpose();
        assert!(try_invert_spd(&rank_two).is_none());
    }

    #[test]
    fn t_invert_ill_conditioned_is_none() {
        assert!(try_invert_spd(&Matrix2::new(1.0, 0.0, 0.0, 1e-14)).is_none());
        assert!(try_invert_spd(&Matrix2::new(1.0, 0.0, 0.0, 1e-6)).is_some());
    }

    #[test]
    fn t_reciprocal_condition() {
        let id = Matrix2::<f64>::identity();
        assert_eq!(reciprocal_condition(&id, &id), 1.0);
        let m = Matrix2::new(2.0, 0.0, 0.0, 0.5);
        let inv = Matrix2::new(0.5, 0.0, 0.0, 2.0);
        assert_eq!(reciprocal_condition(&m, &inv), 0.25);
        assert_eq!(reciprocal_condition(&Matrix2::zeros(), &id), 0.0);
    }

    #[test]
    fn t_invert_symmetrizes_input() {
        let a = Matrix3::new(1.0, 2.0, 0.5, 0.0, 1.0, -1.0, 0.0, 0.0, 0.2);
        let p = a * a.transpose();
        let mut skewed = p;
        skewed[(0, 1)] += 1e-13;
        let inv = try_invert_spd(&skewed).expect("nearly symmetric SPD matrix");
        assert!(is_symmetric(&inv, 1e-9));
        assert!(approx_eq(&(p * inv), &Matrix3::identity(), 1e-9));
    }

    #[test]
    fn t_invert_non_finite_is_none() {
        let m = Matrix2::new(f64::NAN, 0.0, 0.0, 1.0);
        assert!(try_invert_spd(&m).is_none());
    }
}
