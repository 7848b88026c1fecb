//! Frame representation
//!
//! A frame is an ordered collection of `n` unit vectors in C^d, stored as the rows of
//! an `n × d` complex array. Each vector is only defined up to a global U(1) phase;
//! the stored representative has its first non-negligible component real-positive.

use ndarray::{Array2, ArrayView1};
use num_complex::Complex64;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{MofError, Result};
use crate::linalg::{cnorm, hdot, CMatrix, Matrix};

/// Components with modulus below this are skipped when choosing the phase anchor
const PHASE_ANCHOR_TOL: f64 = 1e-12;

/// Rows with norm below this are rejected as zero vectors
const ZERO_NORM_TOL: f64 = 1e-300;

/// Represents `n` unit vectors in C^d modulo per-vector phase
#[derive(Debug, Clone)]
pub struct Frame {
    vectors: CMatrix,
}

impl Frame {
    /// Wraps an `(n, d)` complex array, normalizing and gauge-fixing every row
    ///
    /// Fails on empty input, non-finite entries and zero rows.
    pub fn from_array(vectors: CMatrix) -> Result<Self> {
        let (n, d) = vectors.dim();
        if n == 0 || d == 0 {
            return Err(MofError::ShapeMismatch {
                expected: (n.max(1), d.max(1)),
                found: (n, d),
            });
        }
        if vectors.iter().any(|z| !z.re.is_finite() || !z.im.is_finite()) {
            return Err(MofError::NonFinite { what: "frame vectors" });
        }
        for (index, row) in vectors.rows().into_iter().enumerate() {
            if cnorm(&row) <= ZERO_NORM_TOL {
                return Err(MofError::ZeroVector { index });
            }
        }
        Ok(Self::normalized(vectors))
    }

    /// Builds a frame from rows known to be non-zero
    pub(crate) fn normalized(mut vectors: CMatrix) -> Self {
        for mut row in vectors.rows_mut() {
            let norm = cnorm(&row);
            row.mapv_inplace(|z| z / norm);
            let anchor = row
                .iter()
                .find(|z| z.norm() > PHASE_ANCHOR_TOL)
                .copied()
                .unwrap_or(Complex64::new(1.0, 0.0));
            let phase = anchor.conj() / anchor.norm();
            row.mapv_inplace(|z| z * phase);
        }
        Self { vectors }
    }

    /// Samples each row uniformly from the unit sphere of C^d, then gauge-fixes
    ///
    /// Normalized i.i.d. complex Gaussians are Haar-distributed, and the phase fix
    /// picks one representative per class without biasing the distribution.
    pub fn random<R: Rng>(n: usize, d: usize, rng: &mut R) -> Result<Self> {
        let vectors = Array2::from_shape_simple_fn((n, d), || {
            Complex64::new(rng.sample(StandardNormal), rng.sample(StandardNormal))
        });
        Self::from_array(vectors)
    }

    /// Number of vectors
    pub fn n(&self) -> usize {
        self.vectors.nrows()
    }

    /// Ambient complex dimension
    pub fn d(&self) -> usize {
        self.vectors.ncols()
    }

    /// `(n, d)`
    pub fn shape(&self) -> (usize, usize) {
        self.vectors.dim()
    }

    pub fn vectors(&self) -> &CMatrix {
        &self.vectors
    }

    pub fn vector(&self, index: usize) -> ArrayView1<'_, Complex64> {
        self.vectors.row(index)
    }

    /// Complex Gram matrix `G = V V†` of shape `(n, n)`
    pub fn gram(&self) -> CMatrix {
        let n = self.n();
        let mut g = CMatrix::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let value = hdot(&self.vectors.row(j), &self.vectors.row(i));
                g[[i, j]] = value;
                g[[j, i]] = value.conj();
            }
        }
        g
    }

    /// Pairwise overlaps `|⟨f_i, f_j⟩|`, with ones on the diagonal
    pub fn overlaps(&self) -> Matrix {
        let mut out = self.gram().mapv(|z| z.norm());
        out.diag_mut().fill(1.0);
        out
    }

    /// Pairwise chordal distances `2 sqrt(1 - |⟨f_i, f_j⟩|²)`, zero on the diagonal
    pub fn chordal_distances(&self) -> Matrix {
        self.overlaps()
            .mapv(|x| 2.0 * (1.0 - x * x).max(0.0).sqrt())
    }

    /// Phase-invariant projector distance `sqrt(Σ_i ‖g_i - ⟨f_i, g_i⟩ f_i‖²)`
    ///
    /// For unit rows each term equals `1 - |⟨f_i, g_i⟩|²`, but the residual form
    /// does not cancel catastrophically, so a frame is at distance 0 from itself.
    pub fn distance(&self, other: &Frame) -> Result<f64> {
        if self.shape() != other.shape() {
            return Err(MofError::ShapeMismatch {
                expected: self.shape(),
                found: other.shape(),
            });
        }
        let total = self
            .vectors
            .rows()
            .into_iter()
            .zip(other.vectors.rows())
            .map(|(f, g)| {
                let mut residual = g.to_owned();
                residual.scaled_add(-hdot(&f, &g), &f);
                residual.iter().map(|z| z.norm_sqr()).sum::<f64>()
            })
            .sum::<f64>();
        Ok(total.sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_from_array_normalizes_and_fixes_phase() {
        let raw = array![[c(0.0, 3.0), c(4.0, 0.0)], [c(0.0, 0.0), c(0.0, -2.0)]];
        let frame = Frame::from_array(raw).unwrap();

        for row in frame.vectors().rows() {
            assert_abs_diff_eq!(cnorm(&row), 1.0, epsilon = 1e-12);
        }
        // first non-zero component is real-positive
        assert_abs_diff_eq!(frame.vectors()[[0, 0]].re, 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(frame.vectors()[[0, 0]].im, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(frame.vectors()[[0, 1]].im, -0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(frame.vectors()[[1, 1]].re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_renormalization_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(7);
        let frame = Frame::random(5, 3, &mut rng).unwrap();
        let again = Frame::from_array(frame.vectors().clone()).unwrap();
        for (a, b) in frame.vectors().iter().zip(again.vectors().iter()) {
            assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-14);
        }
        assert_abs_diff_eq!(frame.distance(&frame).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_phase_invariance() {
        let mut rng = StdRng::seed_from_u64(11);
        let frame = Frame::random(4, 3, &mut rng).unwrap();
        let mut rotated = frame.vectors().clone();
        for (i, mut row) in rotated.rows_mut().into_iter().enumerate() {
            let phase = Complex64::from_polar(1.0, 0.7 * i as f64 + 0.3);
            row.mapv_inplace(|z| z * phase);
        }
        let other = Frame::from_array(rotated).unwrap();
        assert_abs_diff_eq!(frame.distance(&other).unwrap(), 0.0, epsilon = 1e-12);
        for (a, b) in frame.vectors().iter().zip(other.vectors().iter()) {
            assert_abs_diff_eq!((a - b).norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_self_distance_vanishes() {
        let mut rng = StdRng::seed_from_u64(23);
        let worst = (0..200)
            .map(|_| {
                let frame = Frame::random(6, 5, &mut rng).unwrap();
                frame.distance(&frame).unwrap()
            })
            .fold(0.0, f64::max);
        assert!(worst < 1e-12, "self distance {worst}");

        let a = Frame::random(3, 2, &mut rng).unwrap();
        let b = Frame::random(3, 2, &mut rng).unwrap();
        let expected: f64 = a
            .vectors()
            .rows()
            .into_iter()
            .zip(b.vectors().rows())
            .map(|(f, g)| 1.0 - hdot(&f, &g).norm_sqr())
            .sum::<f64>()
            .sqrt();
        assert_abs_diff_eq!(a.distance(&b).unwrap(), expected, epsilon = 1e-12);
        assert_abs_diff_eq!(a.distance(&b).unwrap(), b.distance(&a).unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_zero_vector_rejected() {
        let raw = array![[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(0.0, 0.0)]];
        assert_eq!(
            Frame::from_array(raw).unwrap_err(),
            MofError::ZeroVector { index: 1 }
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let raw = array![[c(f64::NAN, 0.0), c(1.0, 0.0)]];
        assert!(matches!(
            Frame::from_array(raw),
            Err(MofError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_gram_and_chordal_distances() {
        let s = 0.5_f64.sqrt();
        let raw = array![[c(1.0, 0.0), c(0.0, 0.0)], [c(s, 0.0), c(0.0, s)]];
        let frame = Frame::from_array(raw).unwrap();

        let g = frame.gram();
        assert_abs_diff_eq!(g[[0, 0]].re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(g[[0, 1]].norm(), s, epsilon = 1e-12);
        assert_abs_diff_eq!((g[[0, 1]] - g[[1, 0]].conj()).norm(), 0.0, epsilon = 1e-12);

        let dist = frame.chordal_distances();
        assert_abs_diff_eq!(dist[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(dist[[0, 1]], 2.0 * s, epsilon = 1e-12);
    }
}
