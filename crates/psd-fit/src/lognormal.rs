//! Multi-mode log-normal curve fitting.
//!
//! [`fit`] matches a sum of 1 to 3 log-normal modes to an observed
//! `(diameter, response)` curve by bounded nonlinear least squares and
//! reports per-parameter standard errors derived from the Gauss-Newton
//! covariance at the optimum.

use std::fmt;

use nalgebra::DMatrix;
use psd_core::{Error, Result, Weight};
use serde::{Deserialize, Serialize};

use crate::kernel::{basis_kernel, mixture, ModeParams};
use crate::optimizer::{BoundedLm, LeastSquaresProblem, OptimizerConfig};

/// Spread seeded into every mode when no initial guess is supplied.
const GSD_SEED: f64 = 1.7;

/// Box constraints per mode. The lower `gsd` bound keeps the kernel away
/// from the delta-function degeneracy at `gsd = 1`.
const N_BOUNDS: (f64, f64) = (0.0, 1e9);
const GM_BOUNDS: (f64, f64) = (1e-4, 1e5);
const GSD_BOUNDS: (f64, f64) = (1.0001, 5.0);

/// Options for [`fit`].
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Number of log-normal modes, 1 to 3.
    pub modes: usize,
    /// Weight basis the observed responses are on.
    pub weight: Weight,
    /// Initial guess, `[n, gm, gsd]` per mode, flattened. Seeded from the
    /// observed curve when absent.
    pub p0: Option<Vec<f64>>,
    /// Lower diameter limit; points below it do not participate.
    pub xmin: Option<f64>,
    /// Upper diameter limit; points above it do not participate.
    pub xmax: Option<f64>,
    /// Iteration budget and tolerances for the underlying solver.
    pub optimizer: OptimizerConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            modes: 1,
            weight: Weight::Number,
            p0: None,
            xmin: None,
            xmax: None,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl FitOptions {
    /// Options for a fit with `modes` modes and defaults otherwise.
    pub fn new(modes: usize) -> Self {
        Self { modes, ..Self::default() }
    }

    /// Set the weight basis of the observed responses.
    pub fn with_weight(mut self, weight: Weight) -> Self {
        self.weight = weight;
        self
    }

    /// Supply an explicit initial guess.
    pub fn with_p0(mut self, p0: Vec<f64>) -> Self {
        self.p0 = Some(p0);
        self
    }

    /// Restrict the fit to diameters within `[xmin, xmax]`.
    pub fn with_domain(mut self, xmin: Option<f64>, xmax: Option<f64>) -> Self {
        self.xmin = xmin;
        self.xmax = xmax;
        self
    }

    /// Replace the solver configuration.
    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }
}

/// Standard errors of one mode's parameters, same units as the
/// parameters. NaN when the covariance was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeErrors {
    /// Standard error of the number concentration.
    pub n: f64,
    /// Standard error of the geometric mean diameter.
    pub gm: f64,
    /// Standard error of the geometric standard deviation.
    pub gsd: f64,
}

/// Outcome of a converged fit. Immutable; `predict` and `summary` are
/// read-only views of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Weight basis the fit ran on.
    pub weight: Weight,
    /// Fitted `(n, gm, gsd)` per mode.
    pub params: Vec<ModeParams>,
    /// Standard errors per mode.
    pub errors: Vec<ModeErrors>,
    /// Row-major `(3·modes)²` parameter covariance; `None` when the
    /// Gauss-Newton matrix could not be inverted.
    pub covariance: Option<Vec<f64>>,
    /// Diameters that participated in the fit, input order.
    pub xs: Vec<f64>,
    /// Fitted curve evaluated at `xs`.
    pub fitted: Vec<f64>,
    /// Smallest and largest diameter actually used.
    pub domain: (f64, f64),
    /// Sum of squared residuals at the optimum.
    pub sse: f64,
    /// Solver iterations used.
    pub n_iter: u64,
}

impl FitResult {
    /// Evaluate the fitted mixture at new diameters under any basis.
    ///
    /// The basis is independent of the one the fit ran on: the mode
    /// triples determine the number, surface, and volume curves alike.
    pub fn predict(&self, dps: &[f64], weight: Weight) -> Result<Vec<f64>> {
        mixture(&self.params, weight, dps)
    }

    /// Small aligned table of parameters ± standard errors per mode.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("mode          N (#/cm³)              GM (µm)                GSD\n");
        for (i, (p, e)) in self.params.iter().zip(&self.errors).enumerate() {
            out.push_str(&format!(
                "{i:<4} {:>12.4e} ± {:<10.3e} {:>9.4} ± {:<10.3e} {:>7.4} ± {:<10.3e}\n",
                p.n, e.n, p.gm, e.gm, p.gsd, e.gsd
            ));
        }
        out
    }
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Residuals of a mode mixture against the observed curve.
struct CurveResiduals<'a> {
    xs: &'a [f64],
    ys: &'a [f64],
    kernel: fn(&ModeParams, f64) -> f64,
}

fn predict_at(params: &[f64], kernel: fn(&ModeParams, f64) -> f64, dp: f64) -> f64 {
    params
        .chunks_exact(3)
        .map(|c| kernel(&ModeParams { n: c[0], gm: c[1], gsd: c[2] }, dp))
        .sum()
}

impl LeastSquaresProblem for CurveResiduals<'_> {
    fn residuals(&self, params: &[f64]) -> Result<Vec<f64>> {
        Ok(self
            .xs
            .iter()
            .zip(self.ys)
            .map(|(&xi, &yi)| predict_at(params, self.kernel, xi) - yi)
            .collect())
    }
}

/// Fit a `modes`-mode log-normal mixture to the observed curve.
///
/// `x` are diameters in µm, `y` the matching responses on
/// `options.weight`'s basis. Validation failures (mode count, guess
/// length, bad inputs) surface as [`Error::Config`] before any numeric
/// work; a run that stops without converging surfaces as
/// [`Error::FitConvergence`] with the last parameters as a diagnostic.
pub fn fit(x: &[f64], y: &[f64], options: &FitOptions) -> Result<FitResult> {
    if !(1..=3).contains(&options.modes) {
        return Err(Error::Config(format!(
            "mode count must be 1, 2, or 3, got {}",
            options.modes
        )));
    }
    if x.len() != y.len() {
        return Err(Error::Config(format!(
            "x has {} points but y has {}",
            x.len(),
            y.len()
        )));
    }
    let kernel = basis_kernel(options.weight)?;
    let lo = options.xmin.unwrap_or(f64::NEG_INFINITY);
    let hi = options.xmax.unwrap_or(f64::INFINITY);
    if lo.is_nan() || hi.is_nan() {
        return Err(Error::Config("domain limits must not be NaN".into()));
    }

    let mut xs = Vec::with_capacity(x.len());
    let mut ys = Vec::with_capacity(y.len());
    for (&xi, &yi) in x.iter().zip(y) {
        if xi < lo || xi > hi {
            continue;
        }
        if !xi.is_finite() || xi <= 0.0 {
            return Err(Error::Config(format!(
                "diameters must be finite and > 0, got {xi}"
            )));
        }
        if !yi.is_finite() {
            return Err(Error::Config(format!(
                "responses must be finite, got {yi} at diameter {xi}"
            )));
        }
        xs.push(xi);
        ys.push(yi);
    }

    let n_params = 3 * options.modes;
    if xs.len() < n_params {
        return Err(Error::Config(format!(
            "a {}-mode fit needs at least {} points in its domain, got {}",
            options.modes, n_params, xs.len()
        )));
    }

    let p0 = match &options.p0 {
        Some(p0) => {
            if p0.len() != n_params {
                return Err(Error::Config(format!(
                    "initial guess has {} values, expected {} for {} modes",
                    p0.len(),
                    n_params,
                    options.modes
                )));
            }
            p0.clone()
        }
        None => default_seeds(&xs, &ys, options.modes, kernel),
    };
    let bounds: Vec<(f64, f64)> = (0..options.modes)
        .flat_map(|_| [N_BOUNDS, GM_BOUNDS, GSD_BOUNDS])
        .collect();

    let problem = CurveResiduals { xs: &xs, ys: &ys, kernel };
    let solver = BoundedLm::new(options.optimizer.clone());
    let run = solver.minimize(&problem, &p0, &bounds)?;
    if !run.converged {
        log::debug!(
            "log-normal fit stopped after {} iterations without converging: {}",
            run.n_iter,
            run.message
        );
        return Err(Error::FitConvergence {
            iterations: run.n_iter,
            last_params: run.parameters,
        });
    }

    let best = run.parameters;
    let (covariance, errors) = parameter_uncertainties(&xs, &best, kernel, run.fval);
    let fitted: Vec<f64> = xs.iter().map(|&xi| predict_at(&best, kernel, xi)).collect();
    let params: Vec<ModeParams> = best
        .chunks_exact(3)
        .map(|c| ModeParams { n: c[0], gm: c[1], gsd: c[2] })
        .collect();
    let dmin = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let dmax = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(FitResult {
        weight: options.weight,
        params,
        errors,
        covariance,
        xs,
        fitted,
        domain: (dmin, dmax),
        sse: run.fval,
        n_iter: run.n_iter,
    })
}

/// Heuristic starting point: one mode seeded at the observed peak, or
/// several seeded at evenly log-spaced diameters across the domain. Each
/// mode's `n` comes from inverting a unit-concentration kernel against
/// the observed response near its seed diameter.
fn default_seeds(
    xs: &[f64],
    ys: &[f64],
    modes: usize,
    kernel: fn(&ModeParams, f64) -> f64,
) -> Vec<f64> {
    let seed_at = |gm: f64, observed: f64| {
        let unit = ModeParams { n: 1.0, gm, gsd: GSD_SEED };
        let per_unit = kernel(&unit, gm);
        [(observed / per_unit).max(0.0), gm, GSD_SEED]
    };

    if modes == 1 {
        let mut peak = 0;
        for (i, &yi) in ys.iter().enumerate() {
            if yi > ys[peak] {
                peak = i;
            }
        }
        return seed_at(xs[peak], ys[peak]).to_vec();
    }

    let ln_lo = xs.iter().copied().fold(f64::INFINITY, f64::min).ln();
    let ln_hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max).ln();
    let mut seeds = Vec::with_capacity(3 * modes);
    for i in 0..modes {
        let frac = (i + 1) as f64 / (modes + 1) as f64;
        let gm = (ln_lo + frac * (ln_hi - ln_lo)).exp();
        let mut nearest = 0;
        for (j, &xj) in xs.iter().enumerate() {
            if (xj.ln() - gm.ln()).abs() < (xs[nearest].ln() - gm.ln()).abs() {
                nearest = j;
            }
        }
        seeds.extend_from_slice(&seed_at(gm, ys[nearest]));
    }
    seeds
}

/// Standard errors from the Gauss-Newton covariance at the optimum:
/// `cov = (JᵀJ)⁻¹ · SSE / (m − p)`, with `J` the numerical Jacobian of
/// the model curve. The residual-variance scaling means an exact fit
/// reports near-zero errors.
fn parameter_uncertainties(
    xs: &[f64],
    params: &[f64],
    kernel: fn(&ModeParams, f64) -> f64,
    sse: f64,
) -> (Option<Vec<f64>>, Vec<ModeErrors>) {
    let m = xs.len();
    let p = params.len();
    let nan_errors = || {
        params
            .chunks_exact(3)
            .map(|_| ModeErrors { n: f64::NAN, gm: f64::NAN, gsd: f64::NAN })
            .collect::<Vec<_>>()
    };
    if m <= p {
        log::warn!(
            "no residual degrees of freedom ({m} points, {p} parameters); standard errors unavailable"
        );
        return (None, nan_errors());
    }

    let mut jac = DMatrix::zeros(m, p);
    for j in 0..p {
        let eps = 1e-6 * params[j].abs().max(1.0);
        let mut plus = params.to_vec();
        plus[j] += eps;
        let mut minus = params.to_vec();
        minus[j] -= eps;
        for (i, &xi) in xs.iter().enumerate() {
            jac[(i, j)] =
                (predict_at(&plus, kernel, xi) - predict_at(&minus, kernel, xi)) / (2.0 * eps);
        }
    }

    let jtj = jac.transpose() * &jac;
    let inverse = match invert_spd(&jtj) {
        Some(inv) => inv,
        None => {
            log::warn!("Gauss-Newton matrix is singular; standard errors unavailable");
            return (None, nan_errors());
        }
    };
    let cov = inverse * (sse / (m - p) as f64);

    let mut errors = Vec::with_capacity(p / 3);
    for mode in 0..p / 3 {
        let err = |k: usize| {
            let var = cov[(3 * mode + k, 3 * mode + k)];
            if var >= 0.0 { var.sqrt() } else { f64::NAN }
        };
        errors.push(ModeErrors { n: err(0), gm: err(1), gsd: err(2) });
    }
    let cov_ref = &cov;
    let flat: Vec<f64> = (0..p).flat_map(|i| (0..p).map(move |j| cov_ref[(i, j)])).collect();
    (Some(flat), errors)
}

/// Cholesky inversion with escalating diagonal damping, LU as the last
/// resort.
fn invert_spd(mat: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if let Some(chol) = mat.clone().cholesky() {
        return Some(chol.inverse());
    }
    let n = mat.nrows();
    let scale = mat.diagonal().amax().max(1e-300);
    let mut damping = 1e-12 * scale;
    for _ in 0..8 {
        let damped = mat + DMatrix::identity(n, n) * damping;
        if let Some(chol) = damped.cholesky() {
            return Some(chol.inverse());
        }
        damping *= 10.0;
    }
    mat.clone().try_inverse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn log_grid(lo: f64, hi: f64, n: usize) -> Vec<f64> {
        let step = (hi.ln() - lo.ln()) / (n - 1) as f64;
        (0..n).map(|i| (lo.ln() + i as f64 * step).exp()).collect()
    }

    #[test]
    fn test_mode_count_validation() {
        let x = log_grid(0.1, 2.0, 12);
        let y = vec![1.0; 12];
        assert!(fit(&x, &y, &FitOptions::new(0)).is_err());
        assert!(fit(&x, &y, &FitOptions::new(4)).is_err());
    }

    #[test]
    fn test_initial_guess_length_validation() {
        let x = log_grid(0.1, 2.0, 12);
        let y = vec![1.0; 12];
        let options = FitOptions::new(2).with_p0(vec![1.0, 0.5, 1.5, 2.0, 1.0]);
        let err = fit(&x, &y, &options).unwrap_err();
        assert!(err.to_string().contains("expected 6"));
    }

    #[test]
    fn test_input_shape_validation() {
        let x = log_grid(0.1, 2.0, 12);
        assert!(fit(&x, &[1.0; 11], &FitOptions::new(1)).is_err());
        // Five in-domain points cannot constrain a two-mode fit.
        assert!(fit(&x[..5], &[1.0; 5], &FitOptions::new(2)).is_err());
        assert!(fit(&[0.1, -0.2, 0.3], &[1.0; 3], &FitOptions::new(1)).is_err());
        assert!(fit(&[0.1, 0.2, 0.3], &[1.0, f64::NAN, 3.0], &FitOptions::new(1)).is_err());
    }

    #[test]
    fn test_rejects_mass_and_diameter_bases() {
        let x = log_grid(0.1, 2.0, 12);
        let y = vec![1.0; 12];
        assert!(fit(&x, &y, &FitOptions::new(1).with_weight(Weight::Mass)).is_err());
        assert!(fit(&x, &y, &FitOptions::new(1).with_weight(Weight::Diameter)).is_err());
    }

    #[test]
    fn test_domain_restriction_controls_the_points_used() {
        let truth = ModeParams::new(800.0, 0.4, 1.6).unwrap();
        let x = log_grid(0.05, 5.0, 40);
        let y: Vec<f64> = x.iter().map(|&dp| truth.number(dp)).collect();
        let options = FitOptions::new(1).with_domain(Some(0.1), Some(2.0));
        let result = fit(&x, &y, &options).unwrap();

        let inside = x.iter().filter(|&&v| (0.1..=2.0).contains(&v)).count();
        assert_eq!(result.xs.len(), inside);
        assert_eq!(result.fitted.len(), inside);
        assert!(result.domain.0 >= 0.1 && result.domain.1 <= 2.0);
        // Seeded from the restricted curve alone, the fit still has to
        // land on the generating mode.
        assert_relative_eq!(result.params[0].gm, 0.4, max_relative = 0.01);
    }

    #[test]
    fn test_single_mode_seed_tracks_the_peak() {
        let truth = ModeParams::new(1500.0, 0.6, 1.9).unwrap();
        let x = log_grid(0.05, 5.0, 60);
        let y: Vec<f64> = x.iter().map(|&dp| truth.number(dp)).collect();
        let seeds = default_seeds(&x, &y, 1, ModeParams::number);
        assert_eq!(seeds.len(), 3);
        // The dN/dDp curve peaks below the geometric mean; the seed
        // diameter must land in that neighborhood.
        assert!(seeds[1] > 0.2 && seeds[1] < 0.6, "seed gm = {}", seeds[1]);
        assert!(seeds[0] > 0.0);
        assert_relative_eq!(seeds[2], GSD_SEED);
    }

    #[test]
    fn test_multi_mode_seeds_are_log_spaced() {
        let x = log_grid(0.01, 10.0, 50);
        let y = vec![100.0; 50];
        let seeds = default_seeds(&x, &y, 3, ModeParams::number);
        assert_eq!(seeds.len(), 9);
        let gms = [seeds[1], seeds[4], seeds[7]];
        assert!(gms[0] < gms[1] && gms[1] < gms[2]);
        // Evenly spaced in log diameter.
        assert_relative_eq!(
            gms[1].ln() - gms[0].ln(),
            gms[2].ln() - gms[1].ln(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_summary_lists_every_mode() {
        let result = FitResult {
            weight: Weight::Number,
            params: vec![
                ModeParams { n: 1.2e4, gm: 0.3, gsd: 1.7 },
                ModeParams { n: 3.0e2, gm: 2.1, gsd: 1.4 },
            ],
            errors: vec![
                ModeErrors { n: 1.1e2, gm: 0.01, gsd: 0.02 },
                ModeErrors { n: 8.0, gm: 0.05, gsd: 0.03 },
            ],
            covariance: None,
            xs: vec![0.3],
            fitted: vec![0.0],
            domain: (0.3, 0.3),
            sse: 0.0,
            n_iter: 12,
        };
        let text = result.summary();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("GM"));
        assert!(text.contains("±"));
        assert_eq!(format!("{result}"), text);
    }

    #[test]
    fn test_gauss_newton_errors_grow_with_noise() {
        // Same curve, one exact and one perturbed; the scaled covariance
        // must report larger uncertainties for the noisy fit.
        let truth = ModeParams::new(1000.0, 0.5, 1.8).unwrap();
        let x = log_grid(0.1, 2.5, 40);
        let exact: Vec<f64> = x.iter().map(|&dp| truth.number(dp)).collect();
        let wobbled: Vec<f64> = exact
            .iter()
            .enumerate()
            .map(|(i, v)| v * if i % 2 == 0 { 1.02 } else { 0.98 })
            .collect();

        let params = vec![1000.0, 0.5, 1.8];
        let (_, clean) = parameter_uncertainties(&x, &params, ModeParams::number, {
            let fitted: Vec<f64> = x.iter().map(|&dp| truth.number(dp)).collect();
            fitted.iter().zip(&exact).map(|(f, o)| (o - f).powi(2)).sum()
        });
        let (_, noisy) = parameter_uncertainties(&x, &params, ModeParams::number, {
            let fitted: Vec<f64> = x.iter().map(|&dp| truth.number(dp)).collect();
            fitted.iter().zip(&wobbled).map(|(f, o)| (o - f).powi(2)).sum()
        });
        assert!(clean[0].n < 1e-6);
        assert!(noisy[0].n > clean[0].n);
        assert!(noisy[0].gm > 0.0);
    }

    #[test]
    fn test_no_degrees_of_freedom_gives_nan_errors() {
        let (cov, errors) = parameter_uncertainties(
            &[0.2, 0.5, 1.0],
            &[100.0, 0.5, 1.5],
            ModeParams::number,
            0.0,
        );
        assert!(cov.is_none());
        assert!(errors[0].n.is_nan() && errors[0].gm.is_nan() && errors[0].gsd.is_nan());
    }
}
