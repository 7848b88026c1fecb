//! Search problems and policies that solve them

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::cma::{CmaConfig, RiemannianCma, Termination};
use crate::energy::Energy;
use crate::error::{MofError, Result};
use crate::frame::Frame;

/// Shape of the frames to search over, with an optional starting point
#[derive(Debug, Clone)]
pub struct Problem {
    /// Ambient dimension
    pub d: usize,
    /// Number of vectors
    pub n: usize,
    pub start: Option<Frame>,
}

impl Problem {
    pub fn new(d: usize, n: usize) -> Result<Self> {
        if d < 2 {
            return Err(MofError::InvalidConfig(format!(
                "ambient dimension must be at least 2, got d = {d}"
            )));
        }
        if n < 1 {
            return Err(MofError::InvalidConfig("a frame needs at least one vector".to_string()));
        }
        Ok(Self { d, n, start: None })
    }

    pub fn with_start(mut self, start: Frame) -> Result<Self> {
        if start.shape() != (self.n, self.d) {
            return Err(MofError::ShapeMismatch {
                expected: (self.n, self.d),
                found: start.shape(),
            });
        }
        self.start = Some(start);
        Ok(self)
    }
}

/// Why a search returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    Terminal(Termination),
    Cancelled,
    Deadline,
}

/// Result of a search
#[derive(Debug, Clone)]
pub struct Outcome {
    pub best_frame: Frame,
    pub best_energy: f64,
    pub generations: usize,
    pub stop: Stop,
}

/// Cooperative cancellation flag, checked between generations
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something that proposes a low-energy frame for a problem
pub trait SearchPolicy {
    fn propose(&self, problem: &Problem, energy: &dyn Energy, cancel: &CancelToken) -> Result<Outcome>;
}

/// Runs [`RiemannianCma`] to termination, cancellation or the deadline
#[derive(Debug, Clone, Default)]
pub struct RiemannianCmaPolicy {
    pub config: CmaConfig,
    /// Wall-clock budget, measured from the start of `propose`
    pub deadline: Option<Duration>,
}

impl RiemannianCmaPolicy {
    pub fn new(config: CmaConfig) -> Self {
        Self {
            config,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl SearchPolicy for RiemannianCmaPolicy {
    fn propose(&self, problem: &Problem, energy: &dyn Energy, cancel: &CancelToken) -> Result<Outcome> {
        let deadline = self.deadline.map(|budget| Instant::now() + budget);
        let mut optimizer = RiemannianCma::new(problem, self.config.clone())?;
        let outcome = optimizer.run(energy, cancel, deadline)?;
        info!(
            d = problem.d,
            n = problem.n,
            energy = outcome.best_energy,
            generations = outcome.generations,
            stop = ?outcome.stop,
            "search finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy::FramePotential;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_problem_validation() {
        assert!(Problem::new(1, 3).is_err());
        assert!(Problem::new(2, 0).is_err());

        let mut rng = StdRng::seed_from_u64(0);
        let wrong = Frame::random(2, 3, &mut rng).unwrap();
        let err = Problem::new(2, 3).unwrap().with_start(wrong).unwrap_err();
        assert_eq!(
            err,
            MofError::ShapeMismatch {
                expected: (3, 2),
                found: (2, 3)
            }
        );
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_policy_through_trait_object() {
        let policy: Box<dyn SearchPolicy> =
            Box::new(RiemannianCmaPolicy::new(CmaConfig::default().with_seed(11)));
        let problem = Problem::new(2, 2).unwrap();
        let outcome = policy
            .propose(&problem, &FramePotential::new(1), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.stop, Stop::Terminal(Termination::ToleranceReached));
        assert_eq!(outcome.best_frame.shape(), (2, 2));
        assert!(outcome.best_energy < 1e-9);
    }

    #[test]
    fn test_zero_deadline_returns_start() {
        let policy = RiemannianCmaPolicy::new(CmaConfig::default()).with_deadline(Duration::ZERO);
        let outcome = policy
            .propose(&Problem::new(3, 3).unwrap(), &FramePotential::new(1), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.stop, Stop::Deadline);
        assert_eq!(outcome.generations, 0);
    }
}
