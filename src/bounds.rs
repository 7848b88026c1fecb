//! Lower bounds on frame energies, used to recognize known optima

/// Welch bound on coherence: `sqrt((n - d) / (d (n - 1)))` for `n > d`, else 0
pub fn welch_bound(d: usize, n: usize) -> f64 {
    if n <= d || d == 0 {
        return 0.0;
    }
    let (d, n) = (d as f64, n as f64);
    ((n - d) / (d * (n - 1.0))).sqrt()
}

/// Lower bound on [`FramePotential`](crate::energy::FramePotential) of order `t`
///
/// `Σ_{i,j} |⟨f_i, f_j⟩|^{2t} ≥ n² / C(d + t - 1, t)`, minus the `n` diagonal terms.
/// Attained exactly by complex projective t-designs (tight frames for `t = 1`).
pub fn frame_potential_bound(d: usize, n: usize, t: u32) -> f64 {
    if d == 0 {
        return 0.0;
    }
    let n_f = n as f64;
    let symmetric_dim = binomial(d + t as usize - 1, t as usize);
    (n_f * n_f / symmetric_dim - n_f).max(0.0)
}

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}
