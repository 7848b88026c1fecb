//! Orthonormal tangent charts
//!
//! A [`Chart`] fixes a real orthonormal basis of the tangent space at a base frame, so
//! tangent vectors can be handled as plain real coordinate vectors. Every basis vector
//! is supported on a single factor, so the basis is stored as one `2(d-1) × d` block
//! per factor; coordinates of factor `i` occupy the slice `[i·k, (i+1)·k)` with
//! `k = 2(d-1)`.
//!
//! Coordinates are meaningless without their chart. [`Anchored`] keeps the two
//! together and is the only way coordinate-valued state changes charts.

use ndarray::{ArrayBase, Data, Ix1};
use num_complex::Complex64;

use crate::error::{MofError, Result};
use crate::frame::Frame;
use crate::linalg::{complement_basis, congruence, orthonormalize_rows, real_dot, CMatrix, Matrix, Vector};
use crate::manifold::ProductManifold;

#[derive(Debug, Clone)]
pub struct Chart {
    base: Frame,
    manifold: ProductManifold,
    /// Real-orthonormal tangent directions of each factor, one per row
    blocks: Vec<CMatrix>,
}

impl Chart {
    /// Builds a fresh chart at `base`, independent of any earlier chart
    ///
    /// Each factor's Hermitian complement is completed to a unitary basis
    /// `e_1 … e_{d-1}`; the real basis is `e_1, i e_1, …, e_{d-1}, i e_{d-1}`.
    pub fn build(base: &Frame) -> Result<Self> {
        let manifold = ProductManifold::for_frame(base)?;
        let (n, d) = base.shape();
        let i = Complex64::new(0.0, 1.0);

        let mut blocks = Vec::with_capacity(n);
        for factor in 0..n {
            let complement = complement_basis(&base.vector(factor).to_owned())?;
            let mut block = CMatrix::zeros((2 * (d - 1), d));
            for (j, e) in complement.rows().into_iter().enumerate() {
                block.row_mut(2 * j).assign(&e);
                block.row_mut(2 * j + 1).assign(&e.mapv(|z| z * i));
            }
            blocks.push(block);
        }

        Ok(Self {
            base: base.clone(),
            manifold,
            blocks,
        })
    }

    pub fn base(&self) -> &Frame {
        &self.base
    }

    pub fn manifold(&self) -> ProductManifold {
        self.manifold
    }

    /// Number of real coordinates, `2n(d-1)`
    pub fn dim(&self) -> usize {
        self.manifold.dim()
    }

    fn block_dim(&self) -> usize {
        self.manifold.factor().dim()
    }

    /// The `k`-th basis vector as a full `(n, d)` tangent array
    pub fn basis_vector(&self, k: usize) -> Result<CMatrix> {
        if k >= self.dim() {
            return Err(MofError::DimensionMismatch {
                expected: self.dim(),
                found: k,
            });
        }
        let (factor, row) = (k / self.block_dim(), k % self.block_dim());
        let mut out = CMatrix::zeros(self.base.shape());
        out.row_mut(factor).assign(&self.blocks[factor].row(row));
        Ok(out)
    }

    /// Real inner products of all basis vectors; the identity for a valid chart
    pub fn gram(&self) -> Matrix {
        let dim = self.dim();
        let mut g = Matrix::zeros((dim, dim));
        for a in 0..dim {
            for b in 0..dim {
                let (fa, ra) = (a / self.block_dim(), a % self.block_dim());
                let (fb, rb) = (b / self.block_dim(), b % self.block_dim());
                if fa == fb {
                    g[[a, b]] = real_dot(&self.blocks[fa].row(ra), &self.blocks[fb].row(rb));
                }
            }
        }
        g
    }

    /// Real coordinates of a tangent vector at the base point
    pub fn encode(&self, tangent: &CMatrix) -> Result<Vector> {
        if tangent.dim() != self.base.shape() {
            return Err(MofError::ShapeMismatch {
                expected: self.base.shape(),
                found: tangent.dim(),
            });
        }
        let k = self.block_dim();
        let mut coords = Vector::zeros(self.dim());
        for (factor, block) in self.blocks.iter().enumerate() {
            let v = tangent.row(factor);
            for (r, basis) in block.rows().into_iter().enumerate() {
                coords[factor * k + r] = real_dot(&basis, &v);
            }
        }
        Ok(coords)
    }

    /// Tangent vector with the given real coordinates; exact inverse of [`encode`](Self::encode)
    pub fn decode<S>(&self, coords: &ArrayBase<S, Ix1>) -> Result<CMatrix>
    where
        S: Data<Elem = f64>,
    {
        if coords.len() != self.dim() {
            return Err(MofError::DimensionMismatch {
                expected: self.dim(),
                found: coords.len(),
            });
        }
        let k = self.block_dim();
        let mut tangent = CMatrix::zeros(self.base.shape());
        for (factor, block) in self.blocks.iter().enumerate() {
            let mut row = tangent.row_mut(factor);
            for (r, basis) in block.rows().into_iter().enumerate() {
                row.scaled_add(Complex64::new(coords[factor * k + r], 0.0), &basis);
            }
        }
        Ok(tangent)
    }

    /// Chart at `new_base` whose basis is this basis parallel-transported there
    ///
    /// The transported rows are re-projected onto the new tangent space and
    /// re-orthonormalized so rounding does not accumulate across generations.
    pub fn rebase(&self, new_base: &Frame) -> Result<Chart> {
        self.check_compatible(new_base)?;
        let factor_op = self.manifold.factor();

        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (factor, block) in self.blocks.iter().enumerate() {
            let p = self.base.vector(factor);
            let q = new_base.vector(factor);
            let mut moved = CMatrix::zeros(block.dim());
            for (r, basis) in block.rows().into_iter().enumerate() {
                let transported = factor_op
                    .transport(&p, &q, &basis)
                    .map_err(|e| e.at_factor(factor))?;
                moved.row_mut(r).assign(&factor_op.project(&q, &transported));
            }
            blocks.push(orthonormalize_rows(&moved)?);
        }

        Ok(Chart {
            base: new_base.clone(),
            manifold: self.manifold,
            blocks,
        })
    }

    /// Re-expresses coordinates of this chart in `target`'s chart via parallel transport
    pub fn transport_coordinates<S>(&self, coords: &ArrayBase<S, Ix1>, target: &Chart) -> Result<Vector>
    where
        S: Data<Elem = f64>,
    {
        self.check_compatible(&target.base)?;
        let tangent = self.decode(coords)?;
        let moved = self
            .manifold
            .parallel_transport(&self.base, &target.base, &tangent)?;
        target.encode(&moved)
    }

    /// Linear map taking this chart's coordinates to `target`'s
    ///
    /// `M[j, k] = Re⟨b'_j, T(b_k)⟩`, block-diagonal by factor. For any coordinate
    /// vector `x`, `transport_coordinates(x, target) == M x`, and a covariance in
    /// this chart becomes `M C Mᵀ` in the target chart.
    pub fn transition_matrix(&self, target: &Chart) -> Result<Matrix> {
        self.check_compatible(&target.base)?;
        let factor_op = self.manifold.factor();
        let k = self.block_dim();
        let mut m = Matrix::zeros((self.dim(), self.dim()));

        for (factor, (block, target_block)) in self.blocks.iter().zip(&target.blocks).enumerate() {
            let p = self.base.vector(factor);
            let q = target.base.vector(factor);
            let offset = factor * k;
            for (col, basis) in block.rows().into_iter().enumerate() {
                let moved = factor_op
                    .transport(&p, &q, &basis)
                    .map_err(|e| e.at_factor(factor))?;
                for (row, target_basis) in target_block.rows().into_iter().enumerate() {
                    m[[offset + row, offset + col]] = real_dot(&target_basis, &moved);
                }
            }
        }
        Ok(m)
    }

    fn check_compatible(&self, other: &Frame) -> Result<()> {
        if other.shape() != self.base.shape() {
            return Err(MofError::ShapeMismatch {
                expected: self.base.shape(),
                found: other.shape(),
            });
        }
        Ok(())
    }
}

/// Values expressed in chart coordinates, transformed by a chart transition map
pub trait ChartValued: Sized {
    /// Re-expresses `self` under the coordinate change `x ↦ M x`
    fn transform(self, m: &Matrix) -> Self;
}

impl ChartValued for Vector {
    fn transform(self, m: &Matrix) -> Self {
        m.dot(&self)
    }
}

/// A symmetric bilinear form in chart coordinates, e.g. a covariance matrix
#[derive(Debug, Clone, PartialEq)]
pub struct Form(pub Matrix);

impl ChartValued for Form {
    fn transform(self, m: &Matrix) -> Self {
        Form(congruence(m, &self.0))
    }
}

impl<A: ChartValued, B: ChartValued> ChartValued for (A, B) {
    fn transform(self, m: &Matrix) -> Self {
        (self.0.transform(m), self.1.transform(m))
    }
}

/// A chart together with the coordinate-valued data expressed in it
#[derive(Debug, Clone)]
pub struct Anchored<T> {
    chart: Chart,
    value: T,
}

impl<T: ChartValued> Anchored<T> {
    pub fn new(chart: Chart, value: T) -> Self {
        Self { chart, value }
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_parts(self) -> (Chart, T) {
        (self.chart, self.value)
    }

    /// Moves the data into `target`'s coordinates
    pub fn recenter(self, target: Chart) -> Result<Self> {
        let m = self.chart.transition_matrix(&target)?;
        Ok(Anchored {
            value: self.value.transform(&m),
            chart: target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{cnorm, frobenius_norm, identity};
    use ndarray::Axis;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_setup(n: usize, d: usize, seed: u64) -> (ProductManifold, Frame, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let frame = Frame::random(n, d, &mut rng).unwrap();
        (ProductManifold::new(n, d).unwrap(), frame, rng)
    }

    fn nearby(manifold: &ProductManifold, frame: &Frame, rng: &mut StdRng, scale: f64) -> Frame {
        let t = manifold.random_tangent(frame, rng).unwrap().mapv(|z| z * scale);
        manifold.retract(frame, &t).unwrap()
    }

    fn random_coords(dim: usize, rng: &mut StdRng) -> Vector {
        Vector::from_shape_fn(dim, |_| rng.gen::<f64>() * 2.0 - 1.0)
    }

    #[test]
    fn test_build_is_orthonormal_and_tangent() {
        let (manifold, frame, _) = random_setup(3, 4, 21);
        let chart = Chart::build(&frame).unwrap();
        assert_eq!(chart.dim(), 18);

        let g = chart.gram();
        assert!(frobenius_norm(&(&g - &identity(18))) < 1e-12);
        for k in 0..chart.dim() {
            let b = chart.basis_vector(k).unwrap();
            assert!(manifold.is_tangent(&frame, &b, 1e-12));
        }
    }

    #[test]
    fn test_encode_decode_inverse() {
        let (manifold, frame, mut rng) = random_setup(3, 3, 22);
        let chart = Chart::build(&frame).unwrap();

        let t = manifold.random_tangent(&frame, &mut rng).unwrap();
        let back = chart.decode(&chart.encode(&t).unwrap()).unwrap();
        assert!(cnorm(&(&back - &t)) < 1e-12);

        let x = random_coords(chart.dim(), &mut rng);
        let again = chart.encode(&chart.decode(&x).unwrap()).unwrap();
        for (a, b) in x.iter().zip(again.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_coordinates_preserve_metric() {
        let (manifold, frame, mut rng) = random_setup(2, 3, 23);
        let chart = Chart::build(&frame).unwrap();
        let a = manifold.random_tangent(&frame, &mut rng).unwrap();
        let b = manifold.random_tangent(&frame, &mut rng).unwrap();
        let dot = chart.encode(&a).unwrap().dot(&chart.encode(&b).unwrap());
        assert_abs_diff_eq!(dot, manifold.inner(&a, &b), epsilon = 1e-12);
    }

    #[test]
    fn test_rebase_stays_orthonormal() {
        let (manifold, frame, mut rng) = random_setup(2, 4, 24);
        let mut chart = Chart::build(&frame).unwrap();
        for _ in 0..50 {
            let next = nearby(&manifold, chart.base(), &mut rng, 0.1);
            chart = chart.rebase(&next).unwrap();
        }
        let g = chart.gram();
        assert!(frobenius_norm(&(&g - &identity(chart.dim()))) < 1e-12);
        for k in 0..chart.dim() {
            let b = chart.basis_vector(k).unwrap();
            assert!(manifold.is_tangent(chart.base(), &b, 1e-12));
        }
    }

    #[test]
    fn test_rebase_along_geodesic_is_transitive() {
        let (manifold, a, mut rng) = random_setup(2, 3, 25);
        let t = manifold.random_tangent(&a, &mut rng).unwrap().mapv(|z| z * 0.15);
        let b = manifold.exp(&a, &t).unwrap();
        let c = manifold.exp(&a, &t.mapv(|z| z * 2.0)).unwrap();

        let chart_a = Chart::build(&a).unwrap();
        let via_b = chart_a.rebase(&b).unwrap().rebase(&c).unwrap();
        let direct = chart_a.rebase(&c).unwrap();

        for k in 0..direct.dim() {
            let diff = &via_b.basis_vector(k).unwrap() - &direct.basis_vector(k).unwrap();
            assert!(cnorm(&diff) < 1e-9, "basis vector {k} differs by {:.3e}", cnorm(&diff));
        }
    }

    #[test]
    fn test_transport_coordinates_matches_transition_matrix() {
        let (manifold, frame, mut rng) = random_setup(3, 3, 26);
        let chart = Chart::build(&frame).unwrap();
        let other = nearby(&manifold, &frame, &mut rng, 0.3);
        // a fresh chart at the target: the map is a general rotation
        let target = Chart::build(&other).unwrap();

        let m = chart.transition_matrix(&target).unwrap();
        let x = random_coords(chart.dim(), &mut rng);
        let direct = chart.transport_coordinates(&x, &target).unwrap();
        let mapped = m.dot(&x);
        for (a, b) in direct.iter().zip(mapped.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }

        // transport is an isometry between orthonormal bases
        let mtm = m.t().dot(&m);
        assert!(frobenius_norm(&(&mtm - &identity(chart.dim()))) < 1e-10);
    }

    #[test]
    fn test_transition_into_rebased_chart_is_identity() {
        let (manifold, frame, mut rng) = random_setup(2, 3, 27);
        let chart = Chart::build(&frame).unwrap();
        let other = nearby(&manifold, &frame, &mut rng, 0.2);
        let rebased = chart.rebase(&other).unwrap();
        let m = chart.transition_matrix(&rebased).unwrap();
        assert!(frobenius_norm(&(&m - &identity(chart.dim()))) < 1e-10);
    }

    #[test]
    fn test_anchored_covariance_follows_sampled_vectors() {
        let (manifold, frame, mut rng) = random_setup(2, 3, 28);
        let chart = Chart::build(&frame).unwrap();
        let target = Chart::build(&nearby(&manifold, &frame, &mut rng, 0.25)).unwrap();

        let x = random_coords(chart.dim(), &mut rng);
        let y = random_coords(chart.dim(), &mut rng);
        // rank-two covariance x xᵀ + y yᵀ
        let xc = x.clone().insert_axis(Axis(1));
        let yc = y.clone().insert_axis(Axis(1));
        let cov = xc.dot(&xc.t()) + yc.dot(&yc.t());

        let moved = Anchored::new(chart.clone(), Form(cov))
            .recenter(target.clone())
            .unwrap();
        let tx = chart.transport_coordinates(&x, &target).unwrap();
        let ty = chart.transport_coordinates(&y, &target).unwrap();
        for a in 0..chart.dim() {
            for b in 0..chart.dim() {
                let expected = tx[a] * tx[b] + ty[a] * ty[b];
                assert_abs_diff_eq!(moved.value().0[[a, b]], expected, epsilon = 1e-12);
            }
        }
        assert_eq!(moved.chart().base().shape(), (2, 3));
    }

    #[test]
    fn test_dimension_checks() {
        let (_, frame, _) = random_setup(2, 3, 29);
        let chart = Chart::build(&frame).unwrap();
        assert!(matches!(
            chart.decode(&Vector::zeros(3)),
            Err(MofError::DimensionMismatch { expected: 8, found: 3 })
        ));
        assert!(chart.basis_vector(8).is_err());
    }
}
