//! Diameter-bin geometry.
//!
//! A bin set is an ordered sequence of `(left, mid, right)` diameter
//! triples, strictly increasing across bins. All internal math runs in
//! micrometers; nanometer input is scaled once at construction.

use psd_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Unit of the diameters handed to a [`BinGeometry`] constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiameterUnits {
    /// Micrometers (µm), the canonical internal unit.
    Micrometers,
    /// Nanometers; values are divided by 1000 at construction.
    Nanometers,
}

impl DiameterUnits {
    fn to_micrometers(self) -> f64 {
        match self {
            DiameterUnits::Micrometers => 1.0,
            DiameterUnits::Nanometers => 1e-3,
        }
    }
}

/// Validated diameter-bin set.
///
/// Bins are not required to be contiguous (gaps are tolerated), but they
/// must be ordered by midpoint and each bin must satisfy
/// `0 < left < mid < right`, which guarantees `dlogDp > 0` everywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinGeometry {
    bins: Vec<[f64; 3]>,
    midpoints: Vec<f64>,
    dlogdp: Vec<f64>,
}

impl BinGeometry {
    /// Build from an explicit `(left, mid, right)` triple per bin.
    pub fn from_bins(bins: &[[f64; 3]], units: DiameterUnits) -> Result<Self> {
        let scale = units.to_micrometers();
        let scaled: Vec<[f64; 3]> =
            bins.iter().map(|b| [b[0] * scale, b[1] * scale, b[2] * scale]).collect();
        Self::from_scaled(scaled)
    }

    /// Build from `N + 1` strictly increasing boundary points; the
    /// midpoint of each bin defaults to the geometric mean
    /// `sqrt(left * right)`.
    pub fn from_boundaries(boundaries: &[f64], units: DiameterUnits) -> Result<Self> {
        Self::from_boundaries_with(boundaries, units, |left, right| (left * right).sqrt())
    }

    /// Build from boundary points with a caller-supplied midpoint rule.
    ///
    /// The rule receives `(left, right)` in micrometers and must return a
    /// midpoint strictly inside the bin.
    pub fn from_boundaries_with(
        boundaries: &[f64],
        units: DiameterUnits,
        midpoint: impl Fn(f64, f64) -> f64,
    ) -> Result<Self> {
        if boundaries.len() < 2 {
            return Err(Error::Config(format!(
                "at least 2 boundary points are required to form a bin, got {}",
                boundaries.len()
            )));
        }
        let scale = units.to_micrometers();
        let pts: Vec<f64> = boundaries.iter().map(|b| b * scale).collect();

        let mut bins = Vec::with_capacity(pts.len() - 1);
        for pair in pts.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            bins.push([left, midpoint(left, right), right]);
        }
        Self::from_scaled(bins)
    }

    fn from_scaled(bins: Vec<[f64; 3]>) -> Result<Self> {
        if bins.is_empty() {
            return Err(Error::Config("bin set must contain at least one bin".into()));
        }
        for (i, b) in bins.iter().enumerate() {
            let [left, mid, right] = *b;
            if !(left.is_finite() && mid.is_finite() && right.is_finite()) {
                return Err(Error::Config(format!(
                    "bin {i} has non-finite edges: [{left}, {mid}, {right}]"
                )));
            }
            if left <= 0.0 {
                return Err(Error::Config(format!(
                    "bin {i} has non-positive left edge {left}; diameters must be > 0"
                )));
            }
            if !(left < mid && mid < right) {
                return Err(Error::Config(format!(
                    "bin {i} edges must satisfy left < mid < right, got [{left}, {mid}, {right}]"
                )));
            }
        }
        for i in 1..bins.len() {
            if bins[i][1] <= bins[i - 1][1] {
                return Err(Error::Config(format!(
                    "bin midpoints must be strictly increasing, got {} after {} at bin {i}",
                    bins[i][1],
                    bins[i - 1][1]
                )));
            }
        }

        let midpoints = bins.iter().map(|b| b[1]).collect();
        let dlogdp = bins.iter().map(|b| b[2].log10() - b[0].log10()).collect();
        Ok(Self { bins, midpoints, dlogdp })
    }

    /// Re-run the construction invariants.
    ///
    /// Deserialized geometry bypasses the constructors, so consumers that
    /// accept a [`BinGeometry`] from outside (e.g. the sizer) validate it
    /// again before trusting it.
    pub fn validate(&self) -> Result<()> {
        let rebuilt = Self::from_scaled(self.bins.clone())?;
        if rebuilt.midpoints != self.midpoints || rebuilt.dlogdp != self.dlogdp {
            return Err(Error::Config(
                "bin geometry is internally inconsistent with its edges".into(),
            ));
        }
        Ok(())
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Whether the set holds no bins (never true for a constructed set).
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// `(left, mid, right)` triples, µm.
    pub fn bins(&self) -> &[[f64; 3]] {
        &self.bins
    }

    /// Bin `i`'s `(left, mid, right)` triple, µm.
    pub fn bin(&self, i: usize) -> [f64; 3] {
        self.bins[i]
    }

    /// Representative midpoint diameter per bin, µm.
    pub fn midpoints(&self) -> &[f64] {
        &self.midpoints
    }

    /// `log10(right) - log10(left)` per bin.
    pub fn dlogdp(&self) -> &[f64] {
        &self.dlogdp
    }

    /// Smallest diameter covered by the set (left edge of the first bin).
    pub fn min_diameter(&self) -> f64 {
        self.bins[0][0]
    }

    /// Largest diameter covered by the set (right edge of the last bin).
    pub fn max_diameter(&self) -> f64 {
        self.bins[self.bins.len() - 1][2]
    }
}
