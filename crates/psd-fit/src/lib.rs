//! # psd-fit
//!
//! Multi-mode log-normal fitting for particle-size-distribution curves:
//! mode kernels on the number, surface, and volume bases, a bounded
//! Levenberg-Marquardt solver, and least-squares fitting with
//! covariance-derived parameter standard errors.
//!
//! ```
//! use psd_fit::{fit, FitOptions, ModeParams};
//!
//! # fn main() -> psd_core::Result<()> {
//! let truth = ModeParams::new(1000.0, 0.5, 1.8)?;
//! let x: Vec<f64> = (0..40).map(|i| 0.1 * 1.09f64.powi(i)).collect();
//! let y: Vec<f64> = x.iter().map(|&dp| truth.number(dp)).collect();
//!
//! let result = fit(&x, &y, &FitOptions::new(1))?;
//! assert!((result.params[0].gm - 0.5).abs() / 0.5 < 0.01);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod kernel;
pub mod lognormal;
pub mod optimizer;

pub use kernel::{mixture, ModeParams};
pub use lognormal::{fit, FitOptions, FitResult, ModeErrors};
pub use optimizer::{BoundedLm, LeastSquaresProblem, OptimizationResult, OptimizerConfig};
