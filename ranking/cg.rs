//! # Matrix-Free Conjugate Gradient
//!
//! Solves `A x = b` for a symmetric positive definite operator `A`, which is
//! the same as minimising `½ xᵗAx − bᵗx`. The solver only touches `A` through
//! [`LinearOperator::apply`], once per iteration.
//!
//! An optional [`IterationObserver`] is invoked synchronously after every
//! iterate is formed. It may ask the solver to stop and hand back a vector of
//! its choosing (for instance an earlier, better iterate); the solver honours
//! that request before doing any further work.

use crate::matrix::MatrixError;
use crate::operator::LinearOperator;
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Operator of dimension {expected} cannot be applied to a vector of length {found}.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error(
        "Non-positive curvature {curvature:.6e} at iteration {iteration}; the operator is not positive definite."
    )]
    NonPositiveCurvature { iteration: usize, curvature: f64 },

    #[error("Non-finite values appeared at iteration {iteration}.")]
    NonFinite { iteration: usize },

    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CgOptions {
    /// Stop once `‖r‖ ≤ max(tolerance·‖b‖, absolute_tolerance)`.
    pub tolerance: f64,
    pub absolute_tolerance: f64,
    /// Defaults to ten times the operator dimension.
    pub max_iterations: Option<usize>,
}

impl Default for CgOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            absolute_tolerance: 0.0,
            max_iterations: None,
        }
    }
}

/// The status of the CG solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CgStatus {
    /// Residual fell below the tolerance.
    Converged,
    /// Hit the iteration cap first. The last iterate is still returned.
    MaxIterationsReached,
    /// An observer requested termination and supplied the returned vector.
    EarlyStopped,
}

#[derive(Clone, Debug)]
pub struct CgOutcome {
    pub solution: Array1<f64>,
    pub status: CgStatus,
    pub iterations: usize,
    /// Residual norm of the last iterate the solver formed. After an early
    /// stop this describes the iterate at the halting iteration, not the
    /// returned vector.
    pub residual_norm: f64,
}

/// What the solver should do after an observer has seen an iterate.
#[derive(Clone, Debug, PartialEq)]
pub enum IterationControl {
    Continue,
    /// Stop immediately and return this vector as the solution.
    Stop(Array1<f64>),
}

pub trait IterationObserver {
    /// Called once per iteration, with 1-based `iteration`.
    fn observe(&mut self, iteration: usize, iterate: ArrayView1<f64>) -> IterationControl;
}

/// Runs conjugate gradient from `x₀ = 0`.
pub fn conjugate_gradient<O>(
    operator: &O,
    rhs: ArrayView1<f64>,
    options: &CgOptions,
    mut observer: Option<&mut dyn IterationObserver>,
) -> Result<CgOutcome, SolverError>
where
    O: LinearOperator + ?Sized,
{
    let dim = operator.dim();
    if rhs.len() != dim {
        return Err(SolverError::DimensionMismatch {
            expected: dim,
            found: rhs.len(),
        });
    }
    let max_iterations = options.max_iterations.unwrap_or(10 * dim);

    let rhs_norm = rhs.dot(&rhs).sqrt();
    if !rhs_norm.is_finite() {
        return Err(SolverError::NonFinite { iteration: 0 });
    }
    let threshold = (options.tolerance * rhs_norm).max(options.absolute_tolerance);

    let mut x = Array1::<f64>::zeros(dim);
    if rhs_norm == 0.0 {
        log::debug!("Right-hand side is zero; returning the zero vector.");
        return Ok(CgOutcome {
            solution: x,
            status: CgStatus::Converged,
            iterations: 0,
            residual_norm: 0.0,
        });
    }

    let mut residual = rhs.to_owned();
    let mut direction = residual.clone();
    let mut residual_sq = residual.dot(&residual);
    let mut residual_norm = residual_sq.sqrt();

    for iteration in 1..=max_iterations {
        let image = operator.apply(direction.view())?;
        let curvature = direction.dot(&image);
        if !curvature.is_finite() {
            return Err(SolverError::NonFinite { iteration });
        }
        if curvature <= 0.0 {
            return Err(SolverError::NonPositiveCurvature {
                iteration,
                curvature,
            });
        }

        let alpha = residual_sq / curvature;
        x.scaled_add(alpha, &direction);
        residual.scaled_add(-alpha, &image);
        let next_residual_sq = residual.dot(&residual);
        residual_norm = next_residual_sq.sqrt();
        log::debug!("CG iteration {iteration}: residual norm {residual_norm:.6e}");

        if let Some(observer) = observer.as_mut() {
            if let IterationControl::Stop(chosen) = observer.observe(iteration, x.view()) {
                log::info!("CG stopped by observer at iteration {iteration}.");
                return Ok(CgOutcome {
                    solution: chosen,
                    status: CgStatus::EarlyStopped,
                    iterations: iteration,
                    residual_norm,
                });
            }
        }

        if residual_norm <= threshold {
            return Ok(CgOutcome {
                solution: x,
                status: CgStatus::Converged,
                iterations: iteration,
                residual_norm,
            });
        }

        let beta = next_residual_sq / residual_sq;
        direction *= beta;
        direction += &residual;
        residual_sq = next_residual_sq;
    }

    log::warn!(
        "CG reached the iteration cap of {max_iterations} with residual norm {residual_norm:.6e} (threshold {threshold:.6e})."
    );
    Ok(CgOutcome {
        solution: x,
        status: CgStatus::MaxIterationsReached,
        iterations: max_iterations,
        residual_norm,
    })
}
