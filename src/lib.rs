//! # Manifold MOF
//!
//! Searches for maximally orthogonal frames: `n` unit vectors in `C^d` whose pairwise
//! overlaps are as small as possible. A frame is a point of `(CP^{d-1})^n`, and the
//! search is a CMA-ES whose distribution lives in tangent-space charts of that
//! manifold and is carried between charts as the mean moves.
//!
//! ## Modules
//!
//! - `linalg`: Dense real and complex linear algebra helpers
//! - `frame`: Frames with a canonical phase gauge
//! - `manifold`: Geometry of `CP^{d-1}` and its products
//! - `chart`: Orthonormal tangent coordinates and transition maps between them
//! - `cma`: Riemannian CMA-ES
//! - `energy`: Frame energies (frame potential, p-coherence)
//! - `bounds`: Welch and frame-potential lower bounds
//! - `search`: Problems, search policies and cancellation

pub mod bounds;
pub mod chart;
pub mod cma;
pub mod energy;
pub mod error;
pub mod frame;
pub mod linalg;
pub mod manifold;
pub mod search;

/// Re-export commonly used types
pub use chart::{Anchored, Chart, ChartValued};
pub use cma::{ChartUpdate, CmaConfig, Generation, OptimizerState, RiemannianCma, Termination};
pub use energy::{Energy, EnergyError};
pub use error::{MofError, Result};
pub use frame::Frame;
pub use linalg::{Matrix, Vector};
pub use manifold::{ProductManifold, ProjectiveFactor};
pub use search::{CancelToken, Outcome, Problem, RiemannianCmaPolicy, SearchPolicy, Stop};
