//! Log-normal mode kernels.
//!
//! A mode is the triple `(n, gm, gsd)`: total number concentration,
//! geometric mean diameter, and geometric standard deviation. The number
//! kernel is the log-normal density on diameter,
//!
//! ```text
//! f(dp) = n / (sqrt(2π) · ln(gsd) · dp) · exp(-(ln dp - ln gm)² / (2 ln²gsd))
//! ```
//!
//! so `∫ f(dp) d(dp) = n`. The surface and volume kernels scale `f` by
//! `π·dp²` and `(π/6)·dp³`.

use std::f64::consts::PI;

use psd_core::{Error, Result, Weight};
use serde::{Deserialize, Serialize};

/// sqrt(2π)
const SQRT_2PI: f64 = 2.506_628_274_631_000_5;

/// One log-normal mode: `(n, gm, gsd)`.
///
/// Kernel evaluation assumes the invariants checked by [`ModeParams::new`]
/// (`n >= 0`, `gm > 0`, `gsd > 1`); out-of-range fields produce NaN rather
/// than panicking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeParams {
    /// Number concentration, #/cm³.
    pub n: f64,
    /// Geometric mean diameter, µm.
    pub gm: f64,
    /// Geometric standard deviation, dimensionless.
    pub gsd: f64,
}

impl ModeParams {
    /// Validated construction.
    pub fn new(n: f64, gm: f64, gsd: f64) -> Result<Self> {
        let mode = Self { n, gm, gsd };
        mode.validate()?;
        Ok(mode)
    }

    /// Check the mode invariants.
    pub fn validate(&self) -> Result<()> {
        if !self.n.is_finite() || self.n < 0.0 {
            return Err(Error::Config(format!(
                "mode number concentration must be finite and >= 0, got {}",
                self.n
            )));
        }
        if !self.gm.is_finite() || self.gm <= 0.0 {
            return Err(Error::Config(format!(
                "mode geometric mean diameter must be finite and > 0, got {}",
                self.gm
            )));
        }
        if !self.gsd.is_finite() || self.gsd <= 1.0 {
            return Err(Error::Config(format!(
                "mode geometric standard deviation must be finite and > 1, got {}",
                self.gsd
            )));
        }
        Ok(())
    }

    /// Number-weighted density `dN/dDp` at `dp` µm, #/cm³/µm.
    pub fn number(&self, dp: f64) -> f64 {
        let s = self.gsd.ln();
        let z = (dp.ln() - self.gm.ln()) / s;
        self.n / (SQRT_2PI * s * dp) * (-0.5 * z * z).exp()
    }

    /// Surface-area-weighted density `dS/dDp`, µm²/cm³/µm.
    pub fn surface(&self, dp: f64) -> f64 {
        PI * dp * dp * self.number(dp)
    }

    /// Volume-weighted density `dV/dDp`, µm³/cm³/µm.
    pub fn volume(&self, dp: f64) -> f64 {
        PI / 6.0 * dp * dp * dp * self.number(dp)
    }
}

/// Kernel for the requested weight basis.
///
/// Fitting and prediction run on the number, surface, and volume bases
/// only. A mode's triple determines all three; mass follows from the
/// volume basis and a particle density downstream.
pub(crate) fn basis_kernel(weight: Weight) -> Result<fn(&ModeParams, f64) -> f64> {
    match weight {
        Weight::Number => Ok(ModeParams::number),
        Weight::Surface => Ok(ModeParams::surface),
        Weight::Volume => Ok(ModeParams::volume),
        Weight::Diameter | Weight::Mass => Err(Error::Config(format!(
            "log-normal curves are evaluated on the number, surface, and volume bases, not {weight:?}"
        ))),
    }
}

/// Evaluate a mixture of modes at each diameter under the chosen basis.
pub fn mixture(modes: &[ModeParams], weight: Weight, dps: &[f64]) -> Result<Vec<f64>> {
    let kernel = basis_kernel(weight)?;
    for &dp in dps {
        if !dp.is_finite() || dp <= 0.0 {
            return Err(Error::Config(format!(
                "evaluation diameters must be finite and > 0, got {dp}"
            )));
        }
    }
    Ok(dps
        .iter()
        .map(|&dp| modes.iter().map(|m| kernel(m, dp)).sum())
        .collect())
}
