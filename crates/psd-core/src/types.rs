//! Common value types shared across the psd workspace

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Weighting basis for a particle-size distribution quantity.
///
/// `Number`, `Surface`, `Volume` and `Mass` are valid everywhere
/// (derived tables, integration, statistics, fitting). `Diameter` only
/// exists as a derived-table basis and is rejected by the moment
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weight {
    /// Number concentration (#/cm³).
    Number,
    /// Diameter-weighted concentration (µm/cm³).
    Diameter,
    /// Surface-area concentration (µm²/cm³).
    Surface,
    /// Volume concentration (µm³/cm³).
    Volume,
    /// Mass concentration (µg/m³ by the usual unit bookkeeping).
    Mass,
}

impl Weight {
    /// Whether this basis participates in integration/statistics/fitting.
    pub fn is_moment_basis(self) -> bool {
        !matches!(self, Weight::Diameter)
    }
}

/// Assumed spherical-particle density, in g/cm³.
///
/// Mass-weighted quantities scale the volume distribution by a density
/// that is either uniform or resolved per bin (e.g. a coarse-mode /
/// fine-mode split).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Density {
    /// One density applied to every bin.
    Constant(f64),
    /// One density per bin, ordered like the bin set.
    PerBin(Vec<f64>),
}

impl Density {
    /// Build a per-bin density table by evaluating `rho` at each bin
    /// midpoint diameter (µm).
    pub fn from_fn(midpoints: &[f64], rho: impl Fn(f64) -> f64) -> Self {
        Density::PerBin(midpoints.iter().map(|&dp| rho(dp)).collect())
    }

    /// Density for bin `i`. A constant density ignores the index.
    pub fn for_bin(&self, i: usize) -> f64 {
        match self {
            Density::Constant(rho) => *rho,
            Density::PerBin(rhos) => rhos[i],
        }
    }

    /// Validate against a bin count: densities must be finite, positive,
    /// and (for the per-bin form) cover every bin.
    pub fn validate(&self, n_bins: usize) -> Result<()> {
        match self {
            Density::Constant(rho) => {
                if !rho.is_finite() || *rho <= 0.0 {
                    return Err(Error::Config(format!(
                        "density must be finite and > 0, got {rho}"
                    )));
                }
            }
            Density::PerBin(rhos) => {
                if rhos.len() != n_bins {
                    return Err(Error::Config(format!(
                        "per-bin density length mismatch: expected {n_bins}, got {}",
                        rhos.len()
                    )));
                }
                if let Some(bad) = rhos.iter().find(|r| !r.is_finite() || **r <= 0.0) {
                    return Err(Error::Config(format!(
                        "per-bin densities must be finite and > 0, got {bad}"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for Density {
    /// 1.65 g/cm³, the customary ambient-aerosol assumption.
    fn default() -> Self {
        Density::Constant(1.65)
    }
}
