//! Geometry of the product of complex projective spaces
//!
//! A frame of `n` vectors in C^d is a point of (CP^{d-1})^n. Every operator here acts
//! on one factor at a time through [`ProjectiveFactor`] and is composed row-wise by
//! [`ProductManifold`]. Tangent vectors are horizontal lifts: one complex row per
//! factor, Hermitian-orthogonal to the stored representative of that factor.

use ndarray::{ArrayBase, ArrayView1, Data, Ix1};
use num_complex::Complex64;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{MofError, Result};
use crate::frame::Frame;
use crate::linalg::{cnorm, hdot, real_dot, CMatrix, CVector};

/// Below this overlap modulus two factors are treated as antipodal (cut locus)
pub const ANTIPODAL_TOL: f64 = 1e-9;

/// Below this geodesic separation two factors are treated as the same point
pub const COINCIDENT_TOL: f64 = 1e-14;

/// Result of bringing `q` into the gauge of `p`
struct Alignment {
    /// `⟨p, q⟩ / |⟨p, q⟩|`
    phase: Complex64,
    cos: f64,
    sin: f64,
    /// Unit horizontal direction at `p` pointing at `q`; zero when coincident
    direction: CVector,
}

/// One copy of CP^{d-1}, parameterized only by `d`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectiveFactor {
    d: usize,
}

impl ProjectiveFactor {
    pub fn new(d: usize) -> Self {
        Self { d }
    }

    pub fn d(&self) -> usize {
        self.d
    }

    /// Real dimension `2(d - 1)`
    pub fn dim(&self) -> usize {
        2 * (self.d - 1)
    }

    /// Removes the complex component along `p`: `v - ⟨p, v⟩ p`
    pub fn project<S1, S2>(&self, p: &ArrayBase<S1, Ix1>, v: &ArrayBase<S2, Ix1>) -> CVector
    where
        S1: Data<Elem = Complex64>,
        S2: Data<Elem = Complex64>,
    {
        let coeff = hdot(p, v);
        let mut out = v.to_owned();
        out.scaled_add(-coeff, p);
        out
    }

    /// Metric retraction `(p + t) / ‖p + t‖`, phase-aligned so that `⟨p, q⟩ ≥ 0`
    ///
    /// The alignment picks the representative continuous in `t`; it is lost once the
    /// row is stored in a [`Frame`], which applies its own gauge.
    pub fn retract<S1, S2>(&self, p: &ArrayBase<S1, Ix1>, t: &ArrayBase<S2, Ix1>) -> Result<CVector>
    where
        S1: Data<Elem = Complex64>,
        S2: Data<Elem = Complex64>,
    {
        let mut q = p.to_owned() + t;
        let norm = cnorm(&q);
        if !(norm > f64::EPSILON) {
            return Err(MofError::DegenerateRetraction { factor: 0 });
        }
        q.mapv_inplace(|z| z / norm);

        let overlap = hdot(p, &q);
        if overlap.norm() > ANTIPODAL_TOL {
            let gauge = overlap.conj() / overlap.norm();
            q.mapv_inplace(|z| z * gauge);
        }
        Ok(q)
    }

    /// Exponential map along the Fubini-Study geodesic `cos‖t‖ p + sin‖t‖ t/‖t‖`
    pub fn exp<S1, S2>(&self, p: &ArrayBase<S1, Ix1>, t: &ArrayBase<S2, Ix1>) -> CVector
    where
        S1: Data<Elem = Complex64>,
        S2: Data<Elem = Complex64>,
    {
        let theta = cnorm(t);
        let (scale_cos, scale_sin) = if theta < 1e-12 {
            (1.0 - 0.5 * theta * theta, 1.0)
        } else {
            (theta.cos(), theta.sin() / theta)
        };
        let mut q = p.mapv(|z| z * scale_cos);
        q.scaled_add(Complex64::new(scale_sin, 0.0), t);
        let norm = cnorm(&q);
        q.mapv_inplace(|z| z / norm);
        q
    }

    /// Inverse of [`exp`](Self::exp): the tangent at `p` whose geodesic reaches `q`
    pub fn log<S1, S2>(&self, p: &ArrayBase<S1, Ix1>, q: &ArrayBase<S2, Ix1>) -> Result<CVector>
    where
        S1: Data<Elem = Complex64>,
        S2: Data<Elem = Complex64>,
    {
        let a = self.align(p, q)?;
        let theta = a.sin.atan2(a.cos);
        Ok(a.direction.mapv(|z| z * theta))
    }

    /// Geodesic distance `arccos |⟨p, q⟩|`
    pub fn distance<S1, S2>(&self, p: &ArrayBase<S1, Ix1>, q: &ArrayBase<S2, Ix1>) -> f64
    where
        S1: Data<Elem = Complex64>,
        S2: Data<Elem = Complex64>,
    {
        let overlap = hdot(p, q).norm().min(1.0);
        let mut perp = q.to_owned();
        perp.scaled_add(-hdot(p, q), p);
        cnorm(&perp).atan2(overlap)
    }

    /// Parallel transport of a horizontal vector from `p` to `q`
    ///
    /// With `q̃` the representative of `q` aligned to `p`, `u` the unit direction of
    /// the connecting geodesic and `c = ⟨u, v⟩`, the transported vector is
    /// `v + c ((cos θ - 1) u - sin θ p)`, then re-expressed at `q`'s stored
    /// representative. The map is complex-linear and isometric.
    pub fn transport<S1, S2, S3>(
        &self,
        p: &ArrayBase<S1, Ix1>,
        q: &ArrayBase<S2, Ix1>,
        v: &ArrayBase<S3, Ix1>,
    ) -> Result<CVector>
    where
        S1: Data<Elem = Complex64>,
        S2: Data<Elem = Complex64>,
        S3: Data<Elem = Complex64>,
    {
        let a = self.align(p, q)?;
        let mut out = v.to_owned();

        if a.sin > COINCIDENT_TOL {
            let c = hdot(&a.direction, v);
            out.scaled_add(c * (a.cos - 1.0), &a.direction);
            out.scaled_add(-c * a.sin, p);
        }

        out.mapv_inplace(|z| z * a.phase);
        Ok(out)
    }

    fn align<S1, S2>(&self, p: &ArrayBase<S1, Ix1>, q: &ArrayBase<S2, Ix1>) -> Result<Alignment>
    where
        S1: Data<Elem = Complex64>,
        S2: Data<Elem = Complex64>,
    {
        let overlap = hdot(p, q);
        let r = overlap.norm();
        if !(r >= ANTIPODAL_TOL) {
            return Err(MofError::Antipodal {
                factor: 0,
                overlap: r,
            });
        }
        let phase = overlap / r;

        // q̃ - r p is the Hermitian-orthogonal part of the aligned representative
        let mut perp = q.mapv(|z| z * phase.conj());
        perp.scaled_add(Complex64::new(-r, 0.0), p);
        let s = cnorm(&perp);
        let scale = r.hypot(s);

        let direction = if s > COINCIDENT_TOL {
            perp.mapv(|z| z / s)
        } else {
            CVector::zeros(self.d)
        };

        Ok(Alignment {
            phase,
            cos: r / scale,
            sin: s / scale,
            direction,
        })
    }
}

/// The product manifold (CP^{d-1})^n on which frames live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductManifold {
    /// Number of factors (frame vectors)
    pub n: usize,
    /// Complex dimension of each factor's ambient space
    pub d: usize,
    factor: ProjectiveFactor,
}

impl ProductManifold {
    /// Creates `(CP^{d-1})^n`; requires `d ≥ 2` and `n ≥ 1`
    pub fn new(n: usize, d: usize) -> Result<Self> {
        if d < 2 {
            return Err(MofError::InvalidConfig(format!(
                "ambient dimension must be at least 2, got d = {d}"
            )));
        }
        if n < 1 {
            return Err(MofError::InvalidConfig(
                "a frame needs at least one vector".to_string(),
            ));
        }
        Ok(Self {
            n,
            d,
            factor: ProjectiveFactor::new(d),
        })
    }

    /// Manifold matching the shape of an existing frame
    pub fn for_frame(frame: &Frame) -> Result<Self> {
        Self::new(frame.n(), frame.d())
    }

    pub fn factor(&self) -> ProjectiveFactor {
        self.factor
    }

    /// Real dimension `2n(d - 1)`
    pub fn dim(&self) -> usize {
        self.n * self.factor.dim()
    }

    /// Tangent-space projection of an ambient `(n, d)` array
    pub fn project(&self, point: &Frame, ambient: &CMatrix) -> Result<CMatrix> {
        self.check_point(point)?;
        self.check_array(ambient)?;
        self.map_rows(point, ambient, |p, v| Ok(self.factor.project(&p, &v)))
    }

    /// Retraction `R_p(t)`; `R_p(0) = p`
    ///
    /// Each row is the same projective point as [`ProjectiveFactor::retract`], returned
    /// in the frame gauge (first significant component real and positive). `⟨p_i, q_i⟩`
    /// is therefore not real in general; compare results with [`Frame::distance`].
    pub fn retract(&self, point: &Frame, tangent: &CMatrix) -> Result<Frame> {
        self.check_point(point)?;
        self.check_array(tangent)?;
        let rows = self.map_rows(point, tangent, |p, t| self.factor.retract(&p, &t))?;
        Ok(Frame::normalized(rows))
    }

    /// Exponential map, factor-wise along Fubini-Study geodesics
    pub fn exp(&self, point: &Frame, tangent: &CMatrix) -> Result<Frame> {
        self.check_point(point)?;
        self.check_array(tangent)?;
        let rows = self.map_rows(point, tangent, |p, t| Ok(self.factor.exp(&p, &t)))?;
        Ok(Frame::normalized(rows))
    }

    /// Logarithm map: tangent at `from` whose exponential is `to`
    pub fn log(&self, from: &Frame, to: &Frame) -> Result<CMatrix> {
        self.check_point(from)?;
        self.check_point(to)?;
        self.map_rows(from, to.vectors(), |p, q| self.factor.log(&p, &q))
    }

    /// Parallel transport of `tangent` from `from` to `to`, factor-wise
    pub fn parallel_transport(&self, from: &Frame, to: &Frame, tangent: &CMatrix) -> Result<CMatrix> {
        self.check_point(from)?;
        self.check_point(to)?;
        self.check_array(tangent)?;

        let mut out = CMatrix::zeros((self.n, self.d));
        for i in 0..self.n {
            let row = self
                .factor
                .transport(&from.vector(i), &to.vector(i), &tangent.row(i))
                .map_err(|e| e.at_factor(i))?;
            out.row_mut(i).assign(&row);
        }
        Ok(out)
    }

    /// Riemannian metric `Re Σ_i ⟨a_i, b_i⟩`
    pub fn inner(&self, a: &CMatrix, b: &CMatrix) -> f64 {
        real_dot(a, b)
    }

    pub fn norm(&self, tangent: &CMatrix) -> f64 {
        cnorm(tangent)
    }

    /// Geodesic distance `sqrt(Σ_i θ_i²)`
    pub fn distance(&self, a: &Frame, b: &Frame) -> Result<f64> {
        self.check_point(a)?;
        self.check_point(b)?;
        let total = (0..self.n)
            .map(|i| self.factor.distance(&a.vector(i), &b.vector(i)).powi(2))
            .sum::<f64>();
        Ok(total.sqrt())
    }

    /// Whether every row of `v` is Hermitian-orthogonal to its base vector
    pub fn is_tangent(&self, point: &Frame, v: &CMatrix, tol: f64) -> bool {
        point.shape() == v.dim()
            && (0..self.n).all(|i| hdot(&point.vector(i), &v.row(i)).norm() <= tol)
    }

    /// Gaussian tangent vector at `point` (ambient Gaussian, projected)
    pub fn random_tangent<R: Rng>(&self, point: &Frame, rng: &mut R) -> Result<CMatrix> {
        let ambient = CMatrix::from_shape_simple_fn((self.n, self.d), || {
            Complex64::new(rng.sample(StandardNormal), rng.sample(StandardNormal))
        });
        self.project(point, &ambient)
    }

    fn map_rows<F>(&self, point: &Frame, other: &CMatrix, op: F) -> Result<CMatrix>
    where
        F: Fn(ArrayView1<'_, Complex64>, ArrayView1<'_, Complex64>) -> Result<CVector>,
    {
        let mut out = CMatrix::zeros((self.n, self.d));
        for i in 0..self.n {
            let row = op(point.vector(i), other.row(i)).map_err(|e| e.at_factor(i))?;
            out.row_mut(i).assign(&row);
        }
        Ok(out)
    }

    fn check_point(&self, point: &Frame) -> Result<()> {
        if point.shape() != (self.n, self.d) {
            return Err(MofError::ShapeMismatch {
                expected: (self.n, self.d),
                found: point.shape(),
            });
        }
        Ok(())
    }

    fn check_array(&self, array: &CMatrix) -> Result<()> {
        if array.dim() != (self.n, self.d) {
            return Err(MofError::ShapeMismatch {
                expected: (self.n, self.d),
                found: array.dim(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup(n: usize, d: usize, seed: u64) -> (ProductManifold, Frame, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let manifold = ProductManifold::new(n, d).unwrap();
        let frame = Frame::random(n, d, &mut rng).unwrap();
        (manifold, frame, rng)
    }

    fn assert_close(a: &CMatrix, b: &CMatrix, tol: f64) {
        assert_eq!(a.dim(), b.dim());
        let diff = a - b;
        assert!(cnorm(&diff) < tol, "difference {:.3e} exceeds {tol:.1e}", cnorm(&diff));
    }

    #[test]
    fn test_project_is_tangent_and_idempotent() {
        let (manifold, frame, mut rng) = setup(3, 4, 1);
        let ambient = CMatrix::from_shape_simple_fn((3, 4), || {
            Complex64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5)
        });

        let t = manifold.project(&frame, &ambient).unwrap();
        assert!(manifold.is_tangent(&frame, &t, 1e-12));

        let again = manifold.project(&frame, &t).unwrap();
        assert_close(&t, &again, 1e-12);
    }

    #[test]
    fn test_retract_zero_is_identity() {
        let (manifold, frame, _) = setup(4, 3, 2);
        let zero = CMatrix::zeros((4, 3));
        let same = manifold.retract(&frame, &zero).unwrap();
        assert_close(frame.vectors(), same.vectors(), 1e-14);
    }

    #[test]
    fn test_retract_agrees_with_exp_to_first_order() {
        let (manifold, frame, mut rng) = setup(2, 3, 3);
        let t = manifold.random_tangent(&frame, &mut rng).unwrap();

        for &h in &[1e-2, 1e-3] {
            let step = t.mapv(|z| z * h);
            let r = manifold.retract(&frame, &step).unwrap();
            let e = manifold.exp(&frame, &step).unwrap();
            // both are second-order close in h
            let gap = r.distance(&e).unwrap();
            assert!(gap < 10.0 * h * h * manifold.norm(&t).powi(2), "gap {gap} at h = {h}");
        }
    }

    #[test]
    fn test_retract_aligns_phase_with_base() {
        let factor = ProjectiveFactor::new(2);
        let p = array![Complex64::new(0.0, 1.0), Complex64::new(0.0, 0.0)];
        let t = array![Complex64::new(0.0, 0.0), Complex64::new(0.3, 0.4)];
        let q = factor.retract(&p, &t).unwrap();
        let overlap = hdot(&p, &q);
        assert!(overlap.re > 0.0);
        assert_abs_diff_eq!(overlap.im, 0.0, epsilon = 1e-14);
    }

    #[test]
    fn test_product_retract_returns_frame_gauge() {
        let manifold = ProductManifold::new(1, 2).unwrap();
        let p = Frame::from_array(array![[Complex64::new(0.0, 0.0), Complex64::new(1.0, 0.0)]]).unwrap();
        for eps in [1e-2, 1e-6, 1e-10] {
            let t = array![[Complex64::new(0.0, eps), Complex64::new(0.0, 0.0)]];
            let q = manifold.retract(&p, &t).unwrap();

            // stored representative: first component real and positive
            assert!(q.vectors()[[0, 0]].re > 0.0);
            assert_abs_diff_eq!(q.vectors()[[0, 0]].im, 0.0, epsilon = 1e-15);

            // same projective point as the phase-aligned factor retraction
            let aligned = manifold.factor().retract(&p.vector(0), &t.row(0)).unwrap();
            let overlap = hdot(&p.vector(0), &aligned);
            assert!(overlap.re >= 0.0);
            assert_abs_diff_eq!(overlap.im, 0.0, epsilon = 1e-14);
            assert_abs_diff_eq!(hdot(&q.vector(0), &aligned).norm(), 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(q.distance(&p).unwrap(), eps / (1.0 + eps * eps).sqrt(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_exp_log_roundtrip() {
        let (manifold, frame, mut rng) = setup(3, 3, 4);
        let t = manifold.random_tangent(&frame, &mut rng).unwrap().mapv(|z| z * 0.3);
        let target = manifold.exp(&frame, &t).unwrap();
        let back = manifold.log(&frame, &target).unwrap();
        let reached = manifold.exp(&frame, &back).unwrap();
        assert!(reached.distance(&target).unwrap() < 1e-7);
        assert_abs_diff_eq!(
            manifold.distance(&frame, &target).unwrap(),
            manifold.norm(&back),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_transport_zero_and_identity() {
        let (manifold, frame, mut rng) = setup(3, 3, 5);
        let other = manifold
            .retract(&frame, &manifold.random_tangent(&frame, &mut rng).unwrap().mapv(|z| z * 0.2))
            .unwrap();

        let zero = CMatrix::zeros((3, 3));
        let moved = manifold.parallel_transport(&frame, &other, &zero).unwrap();
        assert_close(&moved, &zero, 1e-15);

        let t = manifold.random_tangent(&frame, &mut rng).unwrap();
        let same = manifold.parallel_transport(&frame, &frame, &t).unwrap();
        assert_close(&same, &t, 1e-12);
    }

    #[test]
    fn test_transport_roundtrip_and_isometry() {
        let (manifold, frame, mut rng) = setup(4, 3, 6);
        let step = manifold.random_tangent(&frame, &mut rng).unwrap().mapv(|z| z * 0.4);
        let other = manifold.retract(&frame, &step).unwrap();

        let a = manifold.random_tangent(&frame, &mut rng).unwrap();
        let b = manifold.random_tangent(&frame, &mut rng).unwrap();
        let ta = manifold.parallel_transport(&frame, &other, &a).unwrap();
        let tb = manifold.parallel_transport(&frame, &other, &b).unwrap();

        assert!(manifold.is_tangent(&other, &ta, 1e-12));
        assert_abs_diff_eq!(manifold.inner(&ta, &tb), manifold.inner(&a, &b), epsilon = 1e-12);
        assert_abs_diff_eq!(hdot(&ta, &tb).im, hdot(&a, &b).im, epsilon = 1e-12);

        let back = manifold.parallel_transport(&other, &frame, &ta).unwrap();
        assert_close(&back, &a, 1e-12);
    }

    #[test]
    fn test_transport_of_velocity_along_geodesic() {
        let (manifold, frame, mut rng) = setup(2, 4, 7);
        let t = manifold.random_tangent(&frame, &mut rng).unwrap().mapv(|z| z * 0.25);
        let end = manifold.exp(&frame, &t).unwrap();

        // the geodesic's velocity is parallel: it arrives as -log(end -> start)
        let moved = manifold.parallel_transport(&frame, &end, &t).unwrap();
        let back = manifold.log(&end, &frame).unwrap().mapv(|z| -z);
        assert_close(&moved, &back, 1e-9);
    }

    #[test]
    fn test_antipodal_factor_is_rejected() {
        let manifold = ProductManifold::new(2, 2).unwrap();
        let one = Complex64::new(1.0, 0.0);
        let zero = Complex64::new(0.0, 0.0);
        let a = Frame::from_array(array![[one, zero], [one, zero]]).unwrap();
        let b = Frame::from_array(array![[one, one], [zero, one]]).unwrap();
        let t = CMatrix::zeros((2, 2));

        let err = manifold.parallel_transport(&a, &b, &t).unwrap_err();
        assert!(matches!(err, MofError::Antipodal { factor: 1, .. }));
        assert!(err.is_degenerate_geometry());
    }

    #[test]
    fn test_shape_checks() {
        let (manifold, frame, _) = setup(2, 3, 8);
        let wrong = CMatrix::zeros((3, 3));
        assert!(matches!(
            manifold.retract(&frame, &wrong),
            Err(MofError::ShapeMismatch { .. })
        ));
        assert!(ProductManifold::new(2, 1).is_err());
        assert!(ProductManifold::new(0, 3).is_err());
    }
}
