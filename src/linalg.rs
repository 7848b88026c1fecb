//! Linear algebra utilities in functional style
//!
//! Real matrices carry the optimizer state (covariance, paths, chart transition maps),
//! complex arrays carry frames and tangent vectors. Everything is pure Rust on top of
//! `ndarray`, without BLAS/LAPACK.

use ndarray::{Array1, Array2, ArrayBase, Data, Dimension};
use num_complex::Complex64;

use crate::error::{MofError, Result};

/// Type alias for real matrix (2D array)
pub type Matrix = Array2<f64>;

/// Type alias for real vector (1D array)
pub type Vector = Array1<f64>;

/// Complex matrix; frames and tangent vectors are stored row-per-factor
pub type CMatrix = Array2<Complex64>;

/// Complex vector (one factor)
pub type CVector = Array1<Complex64>;

const JACOBI_MAX_SWEEPS: usize = 64;

/// Creates an identity matrix of given size
///
/// # Examples
/// ```
/// use manifold_mof::linalg::identity;
/// let i = identity(3);
/// assert_eq!(i.shape(), &[3, 3]);
/// ```
pub fn identity(n: usize) -> Matrix {
    Array2::eye(n)
}

/// Creates a zero matrix of given dimensions
pub fn zeros(rows: usize, cols: usize) -> Matrix {
    Array2::zeros((rows, cols))
}

/// Congruence transform `M A Mᵀ`
pub fn congruence(m: &Matrix, a: &Matrix) -> Matrix {
    m.dot(a).dot(&m.t())
}

/// Frobenius norm of a matrix
pub fn frobenius_norm(m: &Matrix) -> f64 {
    m.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Returns `(A + Aᵀ) / 2`
pub fn symmetrize(m: &Matrix) -> Matrix {
    (m + &m.t()) * 0.5
}

/// Hermitian inner product `⟨a, b⟩ = Σ conj(a_k) b_k`, conjugate-linear in `a`
pub fn hdot<S1, S2, D>(a: &ArrayBase<S1, D>, b: &ArrayBase<S2, D>) -> Complex64
where
    S1: Data<Elem = Complex64>,
    S2: Data<Elem = Complex64>,
    D: Dimension,
{
    a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum()
}

/// Real part of the Hermitian inner product; the Riemannian metric on tangent vectors
pub fn real_dot<S1, S2, D>(a: &ArrayBase<S1, D>, b: &ArrayBase<S2, D>) -> f64
where
    S1: Data<Elem = Complex64>,
    S2: Data<Elem = Complex64>,
    D: Dimension,
{
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| x.re * y.re + x.im * y.im)
        .sum()
}

/// Euclidean norm of a complex array
pub fn cnorm<S, D>(a: &ArrayBase<S, D>) -> f64
where
    S: Data<Elem = Complex64>,
    D: Dimension,
{
    a.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt()
}

/// Computes eigenvalues and eigenvectors of a symmetric matrix
///
/// Cyclic Jacobi sweeps until the off-diagonal mass is negligible relative to
/// the diagonal. Returns `(eigenvalues, eigenvectors)` sorted ascending,
/// eigenvectors as columns.
pub fn eig(m: &Matrix) -> Result<(Vector, Matrix)> {
    let (rows, cols) = m.dim();
    if rows != cols {
        return Err(MofError::NotSquare { rows, cols });
    }
    if m.iter().any(|x| !x.is_finite()) {
        return Err(MofError::NonFinite { what: "eigensolver input" });
    }

    let (values, vectors) = jacobi_eigenvalue(&symmetrize(m))?;
    Ok(sort_ascending(values, vectors))
}

fn jacobi_eigenvalue(a: &Matrix) -> Result<(Vector, Matrix)> {
    let n = a.nrows();
    let mut a_work = a.clone();
    let mut v = identity(n);

    if n < 2 {
        return Ok((a_work.diag().to_owned(), v));
    }

    for _ in 0..JACOBI_MAX_SWEEPS {
        let off = off_diagonal_norm(&a_work);
        let scale = a_work.diag().iter().map(|x| x * x).sum::<f64>().sqrt();
        if off <= 1e-14 * scale.max(f64::MIN_POSITIVE) || off == 0.0 {
            return Ok((a_work.diag().to_owned(), v));
        }

        for p in 0..n - 1 {
            for q in (p + 1)..n {
                let apq = a_work[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                // t = tan(theta), chosen as the smaller root for stability
                let tau = (a_work[[q, q]] - a_work[[p, p]]) / (2.0 * apq);
                let t = tau.signum() / (tau.abs() + (1.0 + tau * tau).sqrt());
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = t * c;
                apply_jacobi_rotation(&mut a_work, &mut v, p, q, c, s);
            }
        }
    }

    Err(MofError::EigenNoConvergence {
        sweeps: JACOBI_MAX_SWEEPS,
    })
}

fn off_diagonal_norm(a: &Matrix) -> f64 {
    let n = a.nrows();
    let mut sum = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                sum += a[[i, j]] * a[[i, j]];
            }
        }
    }
    sum.sqrt()
}

/// Applies the rotation `A ← Jᵀ A J`, `V ← V J` in the (p, q) plane
fn apply_jacobi_rotation(a: &mut Matrix, v: &mut Matrix, p: usize, q: usize, c: f64, s: f64) {
    let n = a.nrows();

    for k in 0..n {
        let akp = a[[k, p]];
        let akq = a[[k, q]];
        a[[k, p]] = c * akp - s * akq;
        a[[k, q]] = s * akp + c * akq;
    }
    for k in 0..n {
        let apk = a[[p, k]];
        let aqk = a[[q, k]];
        a[[p, k]] = c * apk - s * aqk;
        a[[q, k]] = s * apk + c * aqk;
    }
    a[[p, q]] = 0.0;
    a[[q, p]] = 0.0;

    for k in 0..n {
        let vkp = v[[k, p]];
        let vkq = v[[k, q]];
        v[[k, p]] = c * vkp - s * vkq;
        v[[k, q]] = s * vkp + c * vkq;
    }
}

fn sort_ascending(values: Vector, vectors: Matrix) -> (Vector, Matrix) {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));

    let mut sorted_vectors = zeros(n, n);
    for (new_j, &old_j) in order.iter().enumerate() {
        sorted_vectors.column_mut(new_j).assign(&vectors.column(old_j));
    }
    let sorted_values = order.iter().map(|&i| values[i]).collect::<Vector>();
    (sorted_values, sorted_vectors)
}

/// Raises every eigenvalue below `floor` to `floor`; returns how many were raised
pub fn floor_eigenvalues(values: &mut Vector, floor: f64) -> usize {
    let mut raised = 0;
    for value in values.iter_mut() {
        if !(*value >= floor) {
            *value = floor;
            raised += 1;
        }
    }
    raised
}

/// Rebuilds `B diag(λ) Bᵀ` from an eigendecomposition
pub fn reconstruct(values: &Vector, vectors: &Matrix) -> Matrix {
    let mut scaled = vectors.clone();
    for (mut column, &value) in scaled.columns_mut().into_iter().zip(values.iter()) {
        column *= value;
    }
    scaled.dot(&vectors.t())
}

/// Real Gram-Schmidt on the rows of a complex matrix
///
/// Orthonormality is measured with `Re⟨·,·⟩`, so `v` and `i·v` count as independent.
/// Fails if a row becomes numerically dependent on its predecessors.
pub fn orthonormalize_rows(block: &CMatrix) -> Result<CMatrix> {
    let (k, _) = block.dim();
    let mut q = block.clone();

    for j in 0..k {
        // two passes keep the result orthogonal to working precision
        for _ in 0..2 {
            for i in 0..j {
                let proj = real_dot(&q.row(i), &q.row(j));
                let qi = q.row(i).to_owned();
                q.row_mut(j).scaled_add(Complex64::new(-proj, 0.0), &qi);
            }
        }

        let norm = cnorm(&q.row(j));
        if norm < 1e-10 {
            return Err(MofError::RankDeficient {
                found: j,
                expected: k,
            });
        }
        q.row_mut(j).mapv_inplace(|z| z / norm);
    }

    Ok(q)
}

/// Orthonormal basis (rows) of the Hermitian complement of a unit vector `p` in C^d
///
/// Completes `p` with the standard basis by complex Gram-Schmidt, keeping the
/// `d - 1` directions that survive; the result is unitary-orthogonal to `p`.
pub fn complement_basis(p: &CVector) -> Result<CMatrix> {
    let d = p.len();
    let mut basis: Vec<CVector> = Vec::with_capacity(d);
    basis.push(p.clone());

    for axis in 0..d {
        if basis.len() == d {
            break;
        }
        let mut e = CVector::zeros(d);
        e[axis] = Complex64::new(1.0, 0.0);
        for _ in 0..2 {
            for b in &basis {
                let coeff = hdot(b, &e);
                e.scaled_add(-coeff, b);
            }
        }
        let norm = cnorm(&e);
        // the axis most aligned with p leaves a residual of ~0
        if norm > 1e-6 {
            basis.push(e.mapv(|z| z / norm));
        }
    }

    if basis.len() != d {
        return Err(MofError::RankDeficient {
            found: basis.len() - 1,
            expected: d - 1,
        });
    }

    let mut out = CMatrix::zeros((d - 1, d));
    for (row, b) in basis.iter().skip(1).enumerate() {
        out.row_mut(row).assign(b);
    }
    Ok(out)
}
