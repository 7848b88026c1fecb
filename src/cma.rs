//! Riemannian CMA-ES on the frame manifold
//!
//! The search distribution lives in the tangent space at the current mean. Its
//! covariance, both evolution paths and the cached eigendecomposition are coordinates
//! of the chart at that mean, and are carried together with it in an [`Anchored`]
//! value. After every re-centering they are pushed through the chart transition map,
//! so adaptation keeps pointing in the same geometric directions.

use std::fmt;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chart::{Anchored, Chart, ChartValued, Form};
use crate::energy::{Energy, EnergyError};
use crate::error::{MofError, Result};
use crate::frame::Frame;
use crate::linalg::{eig, floor_eigenvalues, identity, reconstruct, symmetrize, Matrix, Vector};
use crate::manifold::ProductManifold;
use crate::search::{CancelToken, Outcome, Problem, Stop};

/// How the chart at a new mean is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartUpdate {
    /// Parallel-transport the previous basis (transition maps stay near the identity)
    #[default]
    Rebase,
    /// Build an unrelated basis at every mean (transition maps are general rotations)
    Rebuild,
}

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CmaConfig {
    /// Initial step size
    pub sigma0: f64,
    /// λ; defaults to `4 + ⌊3 ln N⌋`
    pub population_size: Option<usize>,
    /// μ; defaults to `⌊λ / 2⌋`
    pub parent_number: Option<usize>,
    pub max_generations: usize,
    /// Converged once the generation-best energy changes by less than this ...
    pub tol_fun: f64,
    /// ... or the largest sampling deviation `σ sqrt(λ_max(C))` drops below this,
    /// for `patience` consecutive generations
    pub tol_sigma: f64,
    pub patience: usize,
    pub sigma_floor: f64,
    pub sigma_ceiling: f64,
    /// Covariance eigenvalues are kept above `eigen_floor · λ_max(C)`
    pub eigen_floor: f64,
    /// Consecutive covariance repairs tolerated before stalling
    pub max_repairs: usize,
    pub seed: Option<u64>,
    /// Evaluate candidates on the rayon pool
    pub parallel: bool,
    pub chart_update: ChartUpdate,
    /// Log progress every `log_every` generations; 0 disables
    pub log_every: usize,
}

impl Default for CmaConfig {
    fn default() -> Self {
        Self {
            sigma0: 0.3,
            population_size: None,
            parent_number: None,
            max_generations: 2000,
            tol_fun: 1e-12,
            tol_sigma: 1e-10,
            patience: 10,
            sigma_floor: 1e-20,
            sigma_ceiling: 1e6,
            eigen_floor: 1e-14,
            max_repairs: 5,
            seed: None,
            parallel: true,
            chart_update: ChartUpdate::Rebase,
            log_every: 50,
        }
    }
}

impl CmaConfig {
    pub fn with_sigma0(mut self, sigma0: f64) -> Self {
        self.sigma0 = sigma0;
        self
    }

    pub fn with_population(mut self, lambda: usize, mu: usize) -> Self {
        self.population_size = Some(lambda);
        self.parent_number = Some(mu);
        self
    }

    pub fn with_max_generations(mut self, max_generations: usize) -> Self {
        self.max_generations = max_generations;
        self
    }

    pub fn with_tolerances(mut self, tol_fun: f64, tol_sigma: f64) -> Self {
        self.tol_fun = tol_fun;
        self.tol_sigma = tol_sigma;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_chart_update(mut self, chart_update: ChartUpdate) -> Self {
        self.chart_update = chart_update;
        self
    }

    /// Population size and parent number for a search space of real dimension `dim`
    pub fn resolve_population(&self, dim: usize) -> (usize, usize) {
        let lambda = self
            .population_size
            .unwrap_or_else(|| 4 + (3.0 * (dim.max(1) as f64).ln()).floor() as usize);
        let mu = self.parent_number.unwrap_or(lambda / 2);
        (lambda, mu)
    }

    /// Checks the configuration against a `(d, n)` problem
    pub fn validate(&self, d: usize, n: usize) -> Result<()> {
        let fail = |msg: String| Err(MofError::InvalidConfig(msg));

        if d < 2 {
            return fail(format!("ambient dimension must be at least 2, got d = {d}"));
        }
        if n < 1 {
            return fail("a frame needs at least one vector".to_string());
        }
        if !(self.sigma0.is_finite() && self.sigma0 > 0.0) {
            return fail(format!("sigma0 must be positive, got {}", self.sigma0));
        }

        let (lambda, mu) = self.resolve_population(2 * n * (d - 1));
        if lambda < 2 {
            return fail(format!("population size must be at least 2, got {lambda}"));
        }
        if mu == 0 || mu >= lambda {
            return fail(format!("need 0 < mu < lambda, got mu = {mu}, lambda = {lambda}"));
        }

        if self.max_generations == 0 {
            return fail("max_generations must be at least 1".to_string());
        }
        if !(self.tol_fun.is_finite() && self.tol_fun >= 0.0) {
            return fail(format!("tol_fun must be finite and non-negative, got {}", self.tol_fun));
        }
        if !(self.tol_sigma.is_finite() && self.tol_sigma >= 0.0) {
            return fail(format!(
                "tol_sigma must be finite and non-negative, got {}",
                self.tol_sigma
            ));
        }
        if self.patience == 0 {
            return fail("patience must be at least 1".to_string());
        }
        if !(self.sigma_floor > 0.0 && self.sigma_floor < self.sigma0) {
            return fail(format!(
                "sigma_floor must lie in (0, sigma0), got {}",
                self.sigma_floor
            ));
        }
        if !(self.sigma_ceiling > self.sigma0) {
            return fail(format!(
                "sigma_ceiling must exceed sigma0, got {}",
                self.sigma_ceiling
            ));
        }
        if !(self.eigen_floor > 0.0 && self.eigen_floor < 1.0) {
            return fail(format!("eigen_floor must lie in (0, 1), got {}", self.eigen_floor));
        }
        Ok(())
    }
}

/// Lifecycle of the optimizer; only `Initialized` and `Running` accept further steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerState {
    Initialized,
    Running,
    Converged,
    Stalled,
}

/// Why the optimizer reached a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Energy change or sampling spread stayed below tolerance
    ToleranceReached,
    GenerationCap,
    SigmaCollapsed,
    SigmaDiverged,
    /// A step hit the cut locus of a projective factor
    GeometryDegenerate,
    /// Covariance kept losing positive-definiteness
    CovarianceBreakdown,
}

impl Termination {
    pub fn state(&self) -> OptimizerState {
        match self {
            Termination::ToleranceReached => OptimizerState::Converged,
            _ => OptimizerState::Stalled,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Termination::ToleranceReached => "tolerance reached",
            Termination::GenerationCap => "generation cap reached without convergence",
            Termination::SigmaCollapsed => "step size collapsed below the numerical floor",
            Termination::SigmaDiverged => "step size diverged",
            Termination::GeometryDegenerate => "degenerate geometry (antipodal step)",
            Termination::CovarianceBreakdown => "covariance repeatedly lost positive-definiteness",
        };
        f.write_str(text)
    }
}

/// Per-generation report returned by [`RiemannianCma::step`]
#[derive(Debug, Clone)]
pub struct Generation {
    /// Number of completed generations
    pub index: usize,
    /// Best energy among this generation's candidates; `None` if the step aborted
    pub best_energy: Option<f64>,
    pub best_frame: Option<Frame>,
    pub failed_evaluations: usize,
    pub sigma: f64,
    pub state: OptimizerState,
    pub termination: Option<Termination>,
}

/// Standard CMA-ES strategy parameters for a given dimension and population
#[derive(Debug, Clone)]
struct StrategyParams {
    dim: usize,
    lambda: usize,
    mu: usize,
    weights: Vector,
    mu_eff: f64,
    c_sigma: f64,
    d_sigma: f64,
    c_c: f64,
    c_1: f64,
    c_mu: f64,
    chi_n: f64,
}

impl StrategyParams {
    fn new(dim: usize, lambda: usize, mu: usize) -> Self {
        let n = dim as f64;

        let raw: Vector = (1..=mu)
            .map(|i| ((lambda as f64 + 1.0) / 2.0).ln() - (i as f64).ln())
            .collect();
        let weights = &raw / raw.sum();
        let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let c_sigma = (mu_eff + 2.0) / (n + mu_eff + 5.0);
        let d_sigma = 1.0 + 2.0 * (((mu_eff - 1.0) / (n + 1.0)).sqrt() - 1.0).max(0.0) + c_sigma;
        let c_c = (4.0 + mu_eff / n) / (n + 4.0 + 2.0 * mu_eff / n);
        let c_1 = 2.0 / ((n + 1.3).powi(2) + mu_eff);
        let c_mu = (1.0 - c_1)
            .min(2.0 * (mu_eff - 2.0 + 1.0 / mu_eff) / ((n + 2.0).powi(2) + mu_eff));
        let chi_n = n.sqrt() * (1.0 - 1.0 / (4.0 * n) + 1.0 / (21.0 * n * n));

        Self {
            dim,
            lambda,
            mu,
            weights,
            mu_eff,
            c_sigma,
            d_sigma,
            c_c,
            c_1,
            c_mu,
            chi_n,
        }
    }
}

/// `C = B diag(scales²) Bᵀ`
#[derive(Debug, Clone)]
struct Eigen {
    vectors: Matrix,
    scales: Vector,
}

impl Eigen {
    fn identity(dim: usize) -> Self {
        Self {
            vectors: identity(dim),
            scales: Vector::ones(dim),
        }
    }

    /// `B diag(scales) z`, a sample of N(0, C) from a standard normal `z`
    fn color(&self, z: &Vector) -> Vector {
        self.vectors.dot(&(&self.scales * z))
    }

    fn max_scale(&self) -> f64 {
        self.scales.iter().cloned().fold(0.0, f64::max)
    }
}

impl ChartValued for Eigen {
    fn transform(self, m: &Matrix) -> Self {
        Eigen {
            vectors: m.dot(&self.vectors),
            scales: self.scales,
        }
    }
}

/// Search distribution shape, in coordinates of the chart it is anchored to
#[derive(Debug, Clone)]
struct Distribution {
    covariance: Form,
    eigen: Eigen,
    path_sigma: Vector,
    path_c: Vector,
}

impl ChartValued for Distribution {
    fn transform(self, m: &Matrix) -> Self {
        Distribution {
            covariance: self.covariance.transform(m),
            eigen: self.eigen.transform(m),
            path_sigma: self.path_sigma.transform(m),
            path_c: self.path_c.transform(m),
        }
    }
}

/// The recombined step of one generation, before it is re-expressed at the new mean
#[derive(Debug, Clone)]
struct Selection {
    /// `y_{i:λ}` of the μ best candidates, in `C`-scaled units
    steps: Vec<Vector>,
    /// `y_w = Σ w_i y_{i:λ}`
    mean_step: Vector,
    /// `C^{-1/2} y_w = B z_w`
    whitened_step: Vector,
}

impl ChartValued for Selection {
    fn transform(self, m: &Matrix) -> Self {
        Selection {
            steps: self.steps.into_iter().map(|y| y.transform(m)).collect(),
            mean_step: self.mean_step.transform(m),
            whitened_step: self.whitened_step.transform(m),
        }
    }
}

struct Candidate {
    frame: Frame,
    energy: f64,
    failure: Option<EnergyError>,
}

/// Riemannian CMA-ES over `(CP^{d-1})^n`
pub struct RiemannianCma {
    config: CmaConfig,
    params: StrategyParams,
    manifold: ProductManifold,
    rng: StdRng,
    sigma: f64,
    /// The chart's base point is the current mean
    distribution: Anchored<Distribution>,
    generation: usize,
    state: OptimizerState,
    termination: Option<Termination>,
    best: Option<(Frame, f64)>,
    previous_generation_best: Option<f64>,
    fun_streak: usize,
    sigma_streak: usize,
    repairs: usize,
}

impl RiemannianCma {
    /// Validates the configuration and sets up the initial distribution
    ///
    /// The mean is the problem's start frame or a random frame drawn from the
    /// seeded generator; the chart is built fresh there, `C = I`, paths are zero.
    pub fn new(problem: &Problem, config: CmaConfig) -> Result<Self> {
        config.validate(problem.d, problem.n)?;
        let manifold = ProductManifold::new(problem.n, problem.d)?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mean = match &problem.start {
            Some(frame) => frame.clone(),
            None => Frame::random(problem.n, problem.d, &mut rng)?,
        };

        let dim = manifold.dim();
        let (lambda, mu) = config.resolve_population(dim);
        let params = StrategyParams::new(dim, lambda, mu);
        let chart = Chart::build(&mean)?;
        let distribution = Distribution {
            covariance: Form(identity(dim)),
            eigen: Eigen::identity(dim),
            path_sigma: Vector::zeros(dim),
            path_c: Vector::zeros(dim),
        };

        debug!(d = problem.d, n = problem.n, dim, lambda, mu, "initialized Riemannian CMA-ES");

        Ok(Self {
            sigma: config.sigma0,
            config,
            params,
            manifold,
            rng,
            distribution: Anchored::new(chart, distribution),
            generation: 0,
            state: OptimizerState::Initialized,
            termination: None,
            best: None,
            previous_generation_best: None,
            fun_streak: 0,
            sigma_streak: 0,
            repairs: 0,
        })
    }

    pub fn state(&self) -> OptimizerState {
        self.state
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// Current mean, the base point of [`chart`](Self::chart)
    pub fn mean(&self) -> &Frame {
        self.distribution.chart().base()
    }

    pub fn chart(&self) -> &Chart {
        self.distribution.chart()
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Covariance in coordinates of [`chart`](Self::chart)
    pub fn covariance(&self) -> &Matrix {
        &self.distribution.value().covariance.0
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Best candidate seen so far and its energy
    pub fn best(&self) -> Option<(&Frame, f64)> {
        self.best.as_ref().map(|(frame, energy)| (frame, *energy))
    }

    /// Real dimension of the search space
    pub fn dim(&self) -> usize {
        self.params.dim
    }

    /// `(λ, μ)`
    pub fn population(&self) -> (usize, usize) {
        (self.params.lambda, self.params.mu)
    }

    pub fn manifold(&self) -> ProductManifold {
        self.manifold
    }

    /// Runs one generation
    ///
    /// Degenerate geometry during the step moves the optimizer to `Stalled` and is
    /// reported in the returned [`Generation`]; stepping a terminated optimizer fails.
    pub fn step<E: Energy + ?Sized>(&mut self, energy: &E) -> Result<Generation> {
        match self.state {
            OptimizerState::Converged | OptimizerState::Stalled => {
                let reason = self.termination.unwrap_or(Termination::GenerationCap);
                return Err(MofError::Terminated(reason));
            }
            OptimizerState::Initialized => self.state = OptimizerState::Running,
            OptimizerState::Running => {}
        }

        match self.advance(energy) {
            Ok(report) => Ok(report),
            Err(err) if err.is_degenerate_geometry() => {
                warn!(generation = self.generation, error = %err, "degenerate step, stalling");
                self.terminate(Termination::GeometryDegenerate);
                Ok(self.report(None, 0))
            }
            Err(err) => Err(err),
        }
    }

    fn advance<E: Energy + ?Sized>(&mut self, energy: &E) -> Result<Generation> {
        let StrategyParams { dim, lambda, mu, .. } = self.params;
        let (chart, distribution) = (self.distribution.chart(), self.distribution.value());

        // 1. sample in the current chart
        let rng = &mut self.rng;
        let whitened: Vec<Vector> = (0..lambda)
            .map(|_| Vector::from_shape_simple_fn(dim, || rng.sample(StandardNormal)))
            .collect();
        let steps: Vec<Vector> = whitened.iter().map(|z| distribution.eigen.color(z)).collect();

        // 2-3. decode, retract and score
        let candidates = self.evaluate(energy, chart, &steps)?;
        let failed = candidates.iter().filter(|c| c.failure.is_some()).count();
        for (index, candidate) in candidates.iter().enumerate() {
            if let Some(failure) = &candidate.failure {
                warn!(generation = self.generation, candidate = index, error = %failure, "energy evaluation failed");
            }
        }
        if failed == candidates.len() {
            return Err(MofError::Energy(format!(
                "all {lambda} candidates of generation {} failed",
                self.generation
            )));
        }

        let mut order: Vec<usize> = (0..lambda).collect();
        order.sort_by(|&a, &b| candidates[a].energy.total_cmp(&candidates[b].energy));
        let generation_best = candidates[order[0]].energy;

        // 4. recombine the pre-retraction coordinates of the μ best
        let weights = &self.params.weights;
        let selected: Vec<Vector> = order[..mu].iter().map(|&k| steps[k].clone()).collect();
        let mut mean_step = Vector::zeros(dim);
        let mut mean_whitened = Vector::zeros(dim);
        for (rank, &k) in order[..mu].iter().enumerate() {
            mean_step.scaled_add(weights[rank], &steps[k]);
            mean_whitened.scaled_add(weights[rank], &whitened[k]);
        }
        let selection = Selection {
            steps: selected,
            whitened_step: distribution.eigen.vectors.dot(&mean_whitened),
            mean_step,
        };

        // 5. move the mean
        let shift = chart.decode(&selection.mean_step.mapv(|y| y * self.sigma))?;
        let new_mean = self.manifold.retract(chart.base(), &shift)?;

        // 6. chart at the new mean; carry every coordinate-valued quantity into it
        let new_chart = match self.config.chart_update {
            ChartUpdate::Rebase => chart.rebase(&new_mean)?,
            ChartUpdate::Rebuild => Chart::build(&new_mean)?,
        };
        let carried = Anchored::new(chart.clone(), (distribution.clone(), selection))
            .recenter(new_chart)?;
        let (new_chart, (distribution, selection)) = carried.into_parts();

        // 7. adapt in the new chart
        let (new_distribution, repaired) = self.adapt(distribution, &selection)?;

        let improved = self
            .best
            .as_ref()
            .map_or(true, |(_, best_energy)| generation_best < *best_energy);
        if improved {
            self.best = Some((candidates[order[0]].frame.clone(), generation_best));
        }

        self.distribution = Anchored::new(new_chart, new_distribution);
        // 8.
        self.generation += 1;

        if repaired {
            self.repairs += 1;
            warn!(
                generation = self.generation,
                consecutive = self.repairs,
                "covariance lost positive-definiteness, eigenvalues floored"
            );
        } else {
            self.repairs = 0;
        }

        self.check_termination(generation_best);
        let mut report = self.report(Some(generation_best), failed);
        report.best_frame = Some(candidates[order[0]].frame.clone());

        if self.config.log_every > 0 && self.generation % self.config.log_every == 0 {
            info!(
                generation = self.generation,
                energy = generation_best,
                best = self.best.as_ref().map(|(_, e)| *e).unwrap_or(f64::INFINITY),
                sigma = self.sigma,
                "generation complete"
            );
        } else {
            debug!(generation = self.generation, energy = generation_best, sigma = self.sigma);
        }

        Ok(report)
    }

    /// Evaluates each coordinate sample against the frozen mean and chart
    fn evaluate<E: Energy + ?Sized>(&self, energy: &E, chart: &Chart, steps: &[Vector]) -> Result<Vec<Candidate>> {
        let sigma = self.sigma;
        let manifold = self.manifold;
        let score = |y: &Vector| -> Result<Candidate> {
            let tangent = chart.decode(&y.mapv(|v| v * sigma))?;
            let frame = manifold.retract(chart.base(), &tangent)?;
            let (value, failure) = match energy.evaluate(&frame) {
                Ok(value) if value.is_finite() => (value, None),
                Ok(value) => (f64::INFINITY, Some(EnergyError::NonFinite(value))),
                Err(err) => (f64::INFINITY, Some(err)),
            };
            Ok(Candidate {
                frame,
                energy: value,
                failure,
            })
        };

        if self.config.parallel {
            steps.par_iter().map(score).collect()
        } else {
            steps.iter().map(score).collect()
        }
    }

    /// Path, step-size and covariance updates; returns the new distribution and
    /// whether the covariance had to be repaired
    fn adapt(&mut self, distribution: Distribution, selection: &Selection) -> Result<(Distribution, bool)> {
        let p = &self.params;
        let Distribution {
            covariance: Form(covariance),
            path_sigma,
            path_c,
            ..
        } = distribution;

        let path_sigma = path_sigma * (1.0 - p.c_sigma)
            + &selection.whitened_step * (p.c_sigma * (2.0 - p.c_sigma) * p.mu_eff).sqrt();

        let ps_norm = path_sigma.dot(&path_sigma).sqrt();
        let damping = (1.0 - (1.0 - p.c_sigma).powi(2 * (self.generation as i32 + 1))).sqrt();
        let h_sigma = ps_norm / damping / p.chi_n < 1.4 + 2.0 / (p.dim as f64 + 1.0);
        let h = if h_sigma { 1.0 } else { 0.0 };

        let path_c = path_c * (1.0 - p.c_c)
            + &selection.mean_step * (h * (p.c_c * (2.0 - p.c_c) * p.mu_eff).sqrt());

        let decay = 1.0 - p.c_1 - p.c_mu + (1.0 - h) * p.c_1 * p.c_c * (2.0 - p.c_c);
        let mut next = covariance * decay + outer(&path_c, &path_c) * p.c_1;
        for (w, y) in p.weights.iter().zip(&selection.steps) {
            next = next + outer(y, y) * (p.c_mu * w);
        }

        self.sigma *= ((p.c_sigma / p.d_sigma) * (ps_norm / p.chi_n - 1.0)).exp();

        let next = symmetrize(&next);
        let (mut values, vectors) = eig(&next)?;
        let largest = values.iter().cloned().fold(0.0, f64::max);
        let floor = self.config.eigen_floor * largest.max(f64::MIN_POSITIVE);
        let repaired = floor_eigenvalues(&mut values, floor) > 0;
        let covariance = if repaired {
            reconstruct(&values, &vectors)
        } else {
            next
        };

        let eigen = Eigen {
            scales: values.mapv(f64::sqrt),
            vectors,
        };
        Ok((
            Distribution {
                covariance: Form(covariance),
                eigen,
                path_sigma,
                path_c,
            },
            repaired,
        ))
    }

    fn check_termination(&mut self, generation_best: f64) {
        let cfg = &self.config;

        if let Some(previous) = self.previous_generation_best {
            if (previous - generation_best).abs() < cfg.tol_fun {
                self.fun_streak += 1;
            } else {
                self.fun_streak = 0;
            }
        }
        self.previous_generation_best = Some(generation_best);

        let spread = self.sigma * self.distribution.value().eigen.max_scale();
        if spread < cfg.tol_sigma {
            self.sigma_streak += 1;
        } else {
            self.sigma_streak = 0;
        }

        let reason = if !self.sigma.is_finite() || self.sigma > cfg.sigma_ceiling {
            Some(Termination::SigmaDiverged)
        } else if self.repairs > cfg.max_repairs {
            Some(Termination::CovarianceBreakdown)
        } else if self.fun_streak >= cfg.patience || self.sigma_streak >= cfg.patience {
            Some(Termination::ToleranceReached)
        } else if self.sigma < cfg.sigma_floor {
            Some(Termination::SigmaCollapsed)
        } else if self.generation >= cfg.max_generations {
            Some(Termination::GenerationCap)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.terminate(reason);
        }
    }

    fn terminate(&mut self, reason: Termination) {
        self.state = reason.state();
        self.termination = Some(reason);
        info!(
            generation = self.generation,
            state = ?self.state,
            reason = %reason,
            "optimizer terminated"
        );
    }

    fn report(&self, best_energy: Option<f64>, failed_evaluations: usize) -> Generation {
        Generation {
            index: self.generation,
            best_energy,
            best_frame: None,
            failed_evaluations,
            sigma: self.sigma,
            state: self.state,
            termination: self.termination,
        }
    }

    /// Steps until a terminal state, checking `cancel` and `deadline` between generations
    pub fn run<E: Energy + ?Sized>(
        &mut self,
        energy: &E,
        cancel: &CancelToken,
        deadline: Option<Instant>,
    ) -> Result<Outcome> {
        let stop = loop {
            if let Some(reason) = self.termination {
                break Stop::Terminal(reason);
            }
            if cancel.is_cancelled() {
                info!(generation = self.generation, "optimization cancelled");
                break Stop::Cancelled;
            }
            if deadline.is_some_and(|limit| Instant::now() >= limit) {
                info!(generation = self.generation, "optimization deadline reached");
                break Stop::Deadline;
            }
            self.step(energy)?;
        };

        let (best_frame, best_energy) = match &self.best {
            Some((frame, value)) => (frame.clone(), *value),
            None => {
                let value = energy
                    .evaluate(self.mean())
                    .ok()
                    .filter(|v| v.is_finite())
                    .unwrap_or(f64::INFINITY);
                (self.mean().clone(), value)
            }
        };

        Ok(Outcome {
            best_frame,
            best_energy,
            generations: self.generation,
            stop,
        })
    }
}

fn outer(a: &Vector, b: &Vector) -> Matrix {
    let mut out = Matrix::zeros((a.len(), b.len()));
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[[i, j]] = x * y;
        }
    }
    out
}
