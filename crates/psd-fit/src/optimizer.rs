//! Bounded nonlinear least squares.
//!
//! A Levenberg-Marquardt loop over residual vectors. Each iteration
//! solves the damped normal equations `(JᵀJ + λ·diag(JᵀJ))·δ = −Jᵀr`
//! and clamps the trial point into the box; a trial is accepted only on
//! a strict decrease of the sum of squares. Convergence is declared on
//! the projected gradient alone, so a run that merely stops making
//! progress reports `converged == false`.

use std::fmt;

use nalgebra::{DMatrix, DVector};
use psd_core::{Error, Result};

/// Damping applied to the first normal-equation solve.
const LAMBDA_INIT: f64 = 1e-3;
/// Smallest damping the solver relaxes back to after accepted steps.
const LAMBDA_MIN: f64 = 1e-12;

/// Iteration budget and convergence tolerances.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Hard cutoff on solver iterations.
    pub max_iter: u64,
    /// Tolerance on the infinity norm of the projected gradient, taken
    /// relative to the squared scale of the initial residuals.
    pub tol: f64,
    /// Damping escalations tried within a single iteration before the
    /// step search is abandoned.
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Outcome of a bounded minimization.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best parameters found, clamped to the bounds.
    pub parameters: Vec<f64>,
    /// Sum of squared residuals at `parameters`.
    pub fval: f64,
    /// Iterations actually used.
    pub n_iter: u64,
    /// Residual evaluations.
    pub n_fev: usize,
    /// Jacobian evaluations.
    pub n_gev: usize,
    /// Whether the projected gradient met the tolerance. A run that
    /// exhausted its budget or found no acceptable step reports `false`
    /// even when the cost stopped moving.
    pub converged: bool,
    /// The solver's termination message.
    pub message: String,
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6e}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

/// A residual vector over a parameter vector; the solver minimizes the
/// sum of its squares.
pub trait LeastSquaresProblem: Send + Sync {
    /// Evaluate the residuals.
    fn residuals(&self, params: &[f64]) -> Result<Vec<f64>>;

    /// Jacobian of the residuals, one row per residual and one column
    /// per parameter; central differences unless overridden.
    fn jacobian(&self, params: &[f64]) -> Result<Vec<Vec<f64>>> {
        let n = params.len();
        let mut columns = Vec::with_capacity(n);
        for j in 0..n {
            // Step relative to the parameter's own scale.
            let eps = 1e-6 * params[j].abs().max(1.0);

            let mut plus = params.to_vec();
            plus[j] += eps;
            let r_plus = self.residuals(&plus)?;

            let mut minus = params.to_vec();
            minus[j] -= eps;
            let r_minus = self.residuals(&minus)?;

            let col: Vec<f64> =
                r_plus.iter().zip(&r_minus).map(|(a, b)| (a - b) / (2.0 * eps)).collect();
            columns.push(col);
        }
        let rows = columns.first().map_or(0, Vec::len);
        Ok((0..rows).map(|i| columns.iter().map(|c| c[i]).collect()).collect())
    }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

/// Gradient of the sum of squares with components that point out of the
/// box at an active bound zeroed, so a constrained minimum on a face
/// registers as stationary.
fn projected_gradient(
    gradient: &DVector<f64>,
    params: &[f64],
    bounds: &[(f64, f64)],
) -> DVector<f64> {
    const EDGE: f64 = 1e-12;
    let mut g = gradient.clone();
    for (i, (&x, &(lo, hi))) in params.iter().zip(bounds.iter()).enumerate() {
        if x <= lo + EDGE && g[i] > 0.0 {
            g[i] = 0.0;
        }
        if x >= hi - EDGE && g[i] < 0.0 {
            g[i] = 0.0;
        }
    }
    g
}

fn jacobian_matrix(
    problem: &dyn LeastSquaresProblem,
    params: &[f64],
    n_residuals: usize,
) -> Result<DMatrix<f64>> {
    let rows = problem.jacobian(params)?;
    if rows.len() != n_residuals || rows.iter().any(|r| r.len() != params.len()) {
        return Err(Error::Config(format!(
            "jacobian shape {}x{} does not match {} residuals over {} parameters",
            rows.len(),
            rows.first().map_or(0, Vec::len),
            n_residuals,
            params.len()
        )));
    }
    Ok(DMatrix::from_fn(n_residuals, params.len(), |i, j| rows[i][j]))
}

/// Levenberg-Marquardt with box constraints via clamping.
pub struct BoundedLm {
    config: OptimizerConfig,
}

impl BoundedLm {
    /// Solver with the given budget and tolerances.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize the sum of squared residuals from `init`, keeping every
    /// parameter inside its `(lower, upper)` bound.
    ///
    /// A non-converged run is not an error here; the caller decides what
    /// to do with `converged == false`.
    pub fn minimize(
        &self,
        problem: &dyn LeastSquaresProblem,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init.is_empty() {
            return Err(Error::Config("at least one parameter is required".into()));
        }
        if init.len() != bounds.len() {
            return Err(Error::Config(format!(
                "{} initial parameters but {} bounds",
                init.len(),
                bounds.len()
            )));
        }
        for (i, &(lo, hi)) in bounds.iter().enumerate() {
            if !(lo < hi) {
                return Err(Error::Config(format!(
                    "bound {i} is empty: ({lo}, {hi})"
                )));
            }
        }

        let n_params = init.len();
        let mut params = clamp_params(init, bounds);
        let first = problem.residuals(&params)?;
        if first.is_empty() {
            return Err(Error::Config("the problem produced no residuals".into()));
        }
        let mut residuals = DVector::from_vec(first);
        let mut n_fev = 1usize;
        let mut n_gev = 0usize;
        let mut cost = residuals.norm_squared();
        if !cost.is_finite() {
            return Err(Error::Computation(format!(
                "sum of squares is not finite at the initial parameters: {cost}"
            )));
        }

        // Tie the gradient tolerance to the size of the initial
        // residuals, which makes `tol` dimensionless.
        let scale = residuals.amax().max(1.0);
        let gtol = self.config.tol * scale * scale;

        let mut lambda = LAMBDA_INIT;
        let mut n_iter = 0u64;
        let (converged, message) = loop {
            let jac = jacobian_matrix(problem, &params, residuals.len())?;
            n_gev += 1;
            let gradient = jac.transpose() * &residuals;
            let projected = projected_gradient(&gradient, &params, bounds);
            if projected.amax() <= gtol {
                break (true, "projected gradient within tolerance");
            }
            if n_iter >= self.config.max_iter {
                break (false, "iteration budget exhausted");
            }

            let jtj = jac.transpose() * &jac;
            // Marquardt scaling: damp along the curvature diagonal so
            // the step length adapts to each parameter's own scale.
            let diag: Vec<f64> = (0..n_params)
                .map(|j| {
                    let d = jtj[(j, j)];
                    if d.is_finite() && d > 0.0 { d } else { 1.0 }
                })
                .collect();
            let neg_gradient = -&gradient;

            let mut accepted = false;
            for _ in 0..self.config.m.max(1) {
                let mut damped = jtj.clone();
                for j in 0..n_params {
                    damped[(j, j)] += lambda * diag[j];
                }
                if let Some(chol) = damped.cholesky() {
                    let delta = chol.solve(&neg_gradient);
                    let trial: Vec<f64> = params
                        .iter()
                        .zip(bounds.iter())
                        .enumerate()
                        .map(|(j, (&p, &(lo, hi)))| (p + delta[j]).clamp(lo, hi))
                        .collect();
                    let trial_residuals = DVector::from_vec(problem.residuals(&trial)?);
                    n_fev += 1;
                    let trial_cost = trial_residuals.norm_squared();
                    if trial_cost.is_finite() && trial_cost < cost {
                        params = trial;
                        residuals = trial_residuals;
                        cost = trial_cost;
                        lambda = (lambda * 0.1).max(LAMBDA_MIN);
                        accepted = true;
                        break;
                    }
                }
                lambda *= 10.0;
            }
            n_iter += 1;
            if !accepted {
                break (false, "no further decrease found");
            }
        };

        Ok(OptimizationResult {
            parameters: params,
            fval: cost,
            n_iter,
            n_fev,
            n_gev,
            converged,
            message: message.to_string(),
        })
    }
}

impl Default for BoundedLm {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}
