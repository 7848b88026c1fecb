//! Energies on frames
//!
//! The optimizer only needs the [`Energy`] trait; the concrete energies here are the
//! usual coherence surrogates and are what the binary and the tests minimize.

use thiserror::Error;

use crate::frame::Frame;

/// Failure of a single energy evaluation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnergyError {
    #[error("energy is not finite ({0})")]
    NonFinite(f64),
    #[error("energy evaluation failed: {0}")]
    Failed(String),
}

/// A pure, deterministic scalar objective on frames of fixed shape; lower is better
pub trait Energy: Sync {
    fn evaluate(&self, frame: &Frame) -> Result<f64, EnergyError>;
}

impl<F> Energy for F
where
    F: Fn(&Frame) -> f64 + Sync,
{
    fn evaluate(&self, frame: &Frame) -> Result<f64, EnergyError> {
        let value = self(frame);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EnergyError::NonFinite(value))
        }
    }
}

/// Squared overlaps `|⟨f_i, f_j⟩|²` for `i < j`
fn squared_overlaps(frame: &Frame) -> Vec<f64> {
    let g = frame.gram();
    let n = frame.n();
    let mut out = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            out.push(g[[i, j]].norm_sqr());
        }
    }
    out
}

/// Frame potential of order `t`: `Σ_{i≠j} |⟨f_i, f_j⟩|^{2t}`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePotential {
    pub t: u32,
}

impl FramePotential {
    pub fn new(t: u32) -> Self {
        Self { t }
    }

    pub fn value(&self, frame: &Frame) -> f64 {
        let exponent = self.t as i32;
        2.0 * squared_overlaps(frame).into_iter().map(|x| x.powi(exponent)).sum::<f64>()
    }
}

impl Energy for FramePotential {
    fn evaluate(&self, frame: &Frame) -> Result<f64, EnergyError> {
        Ok(self.value(frame))
    }
}

/// Smooth coherence surrogate `(Σ_{i<j} |⟨f_i, f_j⟩|^p)^{1/p}`, approaching
/// [`coherence`] from above as `p → ∞`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PCoherence {
    pub p: f64,
}

impl PCoherence {
    pub fn new(p: f64) -> Self {
        Self { p }
    }

    pub fn value(&self, frame: &Frame) -> f64 {
        let max = coherence(frame);
        if max == 0.0 {
            return 0.0;
        }
        // scale by the maximum so large p does not underflow
        let half_p = 0.5 * self.p;
        let sum = squared_overlaps(frame)
            .into_iter()
            .map(|x| (x / (max * max)).powf(half_p))
            .sum::<f64>();
        max * sum.powf(1.0 / self.p)
    }
}

impl Energy for PCoherence {
    fn evaluate(&self, frame: &Frame) -> Result<f64, EnergyError> {
        if !(self.p >= 1.0) {
            return Err(EnergyError::Failed(format!(
                "p-coherence needs p >= 1, got {}",
                self.p
            )));
        }
        let value = self.value(frame);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EnergyError::NonFinite(value))
        }
    }
}

/// Maximum pairwise overlap `max_{i≠j} |⟨f_i, f_j⟩|`; zero for a single vector
pub fn coherence(frame: &Frame) -> f64 {
    squared_overlaps(frame).into_iter().fold(0.0, f64::max).sqrt()
}
