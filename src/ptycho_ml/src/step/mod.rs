//! Quadratic step model for the conjugate-gradient line search.
//!
//! `make_a012` produces per-pattern [`QuadraticCoefficients`] along a single
//! combined direction; `fill_b` assembles the joint probe/object
//! [`StepMatrix`]. The solvers here turn either into step lengths.

pub mod solver;
pub mod types;

pub use solver::{brenorm_from_error, StepRejection};
pub use types::{QuadraticCoefficients, StepMatrix, StepWaves};
