//! The particle-sizer engine.
//!
//! [`ParticleSizer`] owns one immutable [`BinGeometry`] and one canonical
//! data table stored as `dN/dlogDp`. Every derived quantity (surface area,
//! volume, mass, their normalized forms, range integrals, per-scan summary
//! statistics) is recomputed on demand from that canonical table, so the
//! outputs always reflect the current data. Time slicing and resampling
//! return a new sizer instead of mutating in place.
//!
//! Unit conventions: diameters in µm, number concentrations in #/cm³,
//! densities in g/cm³. With those inputs the mass tables come out in
//! µg/m³ without further conversion.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use chrono::{DateTime, Duration, Utc};
use psd_core::{Density, Error, Result, Weight};
use serde::{Deserialize, Serialize};

use crate::bins::BinGeometry;
use crate::table::{ScanSeries, ScanTable};

/// What the raw per-bin values represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawFormat {
    /// Plain per-bin concentrations `dN`; divided by `dlogDp` once at
    /// construction.
    #[default]
    Dn,
    /// Already log-normalized `dN/dlogDp`; stored as-is.
    DnDlogDp,
}

/// Construction-time configuration of a [`ParticleSizer`].
///
/// Instrument-specific presets reduce to a value of this struct: bin
/// geometry, a default particle density, and the raw-value convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizerConfig {
    /// The diameter-bin geometry.
    pub bins: BinGeometry,
    /// Default density for mass-weighted operations, g/cm³.
    pub density: Density,
    /// How to interpret the raw table's values.
    pub format: RawFormat,
}

impl SizerConfig {
    /// Config with the default density (1.65 g/cm³) and `RawFormat::Dn`.
    pub fn new(bins: BinGeometry) -> Self {
        Self { bins, density: Density::default(), format: RawFormat::default() }
    }

    /// Replace the default density.
    pub fn with_density(mut self, density: Density) -> Self {
        self.density = density;
        self
    }

    /// Declare the raw-value convention.
    pub fn with_format(mut self, format: RawFormat) -> Self {
        self.format = format;
        self
    }
}

/// Per-scan summary statistics for one weight basis.
///
/// `mean`, `gm`, and `gsd` are NaN on a zero-total scan; `total` is 0 and
/// `mode` falls back to the first bin midpoint there.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RowStats {
    /// Total of the chosen weight's un-normalized per-bin values.
    pub total: f64,
    /// Total number concentration, #/cm³.
    pub number: f64,
    /// Total surface-area concentration, µm²/cm³.
    pub surface_area: f64,
    /// Total volume concentration, µm³/cm³.
    pub volume: f64,
    /// Weighted arithmetic mean diameter, µm.
    pub mean: f64,
    /// Weighted geometric mean diameter, µm.
    pub gm: f64,
    /// Midpoint of the bin with the largest normalized value, µm.
    pub mode: f64,
    /// Weighted geometric standard deviation (dimensionless, ≥ 1).
    pub gsd: f64,
}

/// [`RowStats`] for every scan, with the timestamps they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsTable {
    /// Scan timestamps, one per row.
    pub timestamps: Vec<DateTime<Utc>>,
    /// The weight basis the statistics were computed under.
    pub weight: Weight,
    /// One record per scan.
    pub rows: Vec<RowStats>,
}

/// Size-distribution engine over one scan table.
#[derive(Debug, Clone)]
pub struct ParticleSizer {
    config: SizerConfig,
    /// Canonical `dN/dlogDp` values, auxiliary columns attached.
    data: ScanTable,
    /// `π · mid²` per bin.
    surface_factor: Vec<f64>,
    /// `(π/6) · mid³` per bin.
    volume_factor: Vec<f64>,
    ln_mid: Vec<f64>,
}

impl ParticleSizer {
    /// Validate the configuration against the raw table and store the
    /// canonical `dN/dlogDp` form.
    pub fn new(config: SizerConfig, raw: ScanTable) -> Result<Self> {
        config.bins.validate()?;
        config.density.validate(config.bins.len())?;
        if raw.n_bins() != config.bins.len() {
            return Err(Error::Config(format!(
                "raw table has {} bin columns but the geometry defines {} bins",
                raw.n_bins(),
                config.bins.len()
            )));
        }

        let data = match config.format {
            RawFormat::DnDlogDp => raw,
            RawFormat::Dn => {
                let inv: Vec<f64> = config.bins.dlogdp().iter().map(|d| 1.0 / d).collect();
                let mut canonical = raw.scaled_per_bin(&inv)?;
                for (name, col) in raw.meta() {
                    canonical.insert_meta(name.clone(), col.clone())?;
                }
                canonical
            }
        };

        let mids = config.bins.midpoints();
        let surface_factor = mids.iter().map(|&m| PI * m * m).collect();
        let volume_factor = mids.iter().map(|&m| PI / 6.0 * m * m * m).collect();
        let ln_mid = mids.iter().map(|&m| m.ln()).collect();
        Ok(Self { config, data, surface_factor, volume_factor, ln_mid })
    }

    /// The configuration this sizer was built with.
    pub fn config(&self) -> &SizerConfig {
        &self.config
    }

    /// The bin geometry.
    pub fn bins(&self) -> &BinGeometry {
        &self.config.bins
    }

    /// Number of scans.
    pub fn n_rows(&self) -> usize {
        self.data.n_rows()
    }

    /// Number of diameter bins.
    pub fn n_bins(&self) -> usize {
        self.config.bins.len()
    }

    /// Auxiliary (non-bin) columns of the input, carried unchanged.
    pub fn scan_stats(&self) -> &BTreeMap<String, Vec<f64>> {
        self.data.meta()
    }

    /// Normalized factor per bin turning `dN/dlogDp` into the chosen
    /// weight's `dX/dlogDp`.
    fn weight_factors(&self, weight: Weight, density: &Density) -> Vec<f64> {
        let mids = self.config.bins.midpoints();
        (0..mids.len())
            .map(|i| match weight {
                Weight::Number => 1.0,
                Weight::Diameter => mids[i],
                Weight::Surface => self.surface_factor[i],
                Weight::Volume => self.volume_factor[i],
                Weight::Mass => self.volume_factor[i] * density.for_bin(i),
            })
            .collect()
    }

    fn derived(&self, weight: Weight, density: &Density, unnormalize: bool) -> Result<ScanTable> {
        let mut factors = self.weight_factors(weight, density);
        if unnormalize {
            for (f, d) in factors.iter_mut().zip(self.config.bins.dlogdp()) {
                *f *= d;
            }
        }
        self.data.scaled_per_bin(&factors)
    }

    /// Canonical number distribution `dN/dlogDp`, #/cm³.
    pub fn dndlogdp(&self) -> &ScanTable {
        &self.data
    }

    /// Per-bin number concentration `dN`, #/cm³.
    pub fn dn(&self) -> Result<ScanTable> {
        self.derived(Weight::Number, &self.config.density, true)
    }

    /// Diameter-weighted distribution `dD/dlogDp`, µm/cm³.
    pub fn dddlogdp(&self) -> Result<ScanTable> {
        self.derived(Weight::Diameter, &self.config.density, false)
    }

    /// Per-bin diameter concentration `dD`, µm/cm³.
    pub fn dd(&self) -> Result<ScanTable> {
        self.derived(Weight::Diameter, &self.config.density, true)
    }

    /// Surface-area distribution `dS/dlogDp`, µm²/cm³.
    pub fn dsdlogdp(&self) -> Result<ScanTable> {
        self.derived(Weight::Surface, &self.config.density, false)
    }

    /// Per-bin surface-area concentration `dS`, µm²/cm³.
    pub fn ds(&self) -> Result<ScanTable> {
        self.derived(Weight::Surface, &self.config.density, true)
    }

    /// Volume distribution `dV/dlogDp`, µm³/cm³.
    pub fn dvdlogdp(&self) -> Result<ScanTable> {
        self.derived(Weight::Volume, &self.config.density, false)
    }

    /// Per-bin volume concentration `dV`, µm³/cm³.
    pub fn dv(&self) -> Result<ScanTable> {
        self.derived(Weight::Volume, &self.config.density, true)
    }

    /// Mass distribution `dM/dlogDp` under the configured density, µg/m³.
    pub fn dmdlogdp(&self) -> Result<ScanTable> {
        self.derived(Weight::Mass, &self.config.density, false)
    }

    /// Per-bin mass concentration `dM` under the configured density, µg/m³.
    pub fn dm(&self) -> Result<ScanTable> {
        self.derived(Weight::Mass, &self.config.density, true)
    }

    /// `dM/dlogDp` under a caller-supplied density.
    pub fn dmdlogdp_with_density(&self, density: &Density) -> Result<ScanTable> {
        density.validate(self.n_bins())?;
        self.derived(Weight::Mass, density, false)
    }

    /// `dM` under a caller-supplied density.
    pub fn dm_with_density(&self, density: &Density) -> Result<ScanTable> {
        density.validate(self.n_bins())?;
        self.derived(Weight::Mass, density, true)
    }

    /// Column-wise mean of the canonical `dN/dlogDp` table, one value per
    /// bin. NaN cells poison their column's mean.
    ///
    /// This is the curve usually handed to a log-normal fit, paired with
    /// [`BinGeometry::midpoints`].
    pub fn mean_dndlogdp(&self) -> Vec<f64> {
        let n = self.n_bins();
        let rows = self.data.n_rows();
        let mut sums = vec![0.0; n];
        for r in 0..rows {
            for (s, v) in sums.iter_mut().zip(self.data.row(r)) {
                *s += v;
            }
        }
        sums.iter().map(|s| s / rows as f64).collect()
    }

    /// Integrate the chosen weight between two diameters under the
    /// configured density. See [`Self::integrate_with_density`].
    pub fn integrate(&self, weight: Weight, dmin: f64, dmax: f64) -> Result<ScanSeries> {
        self.integrate_with_density(weight, dmin, dmax, &self.config.density)
    }

    /// Per-scan total of the chosen weight restricted to `[dmin, dmax]` µm.
    ///
    /// Fully covered bins contribute their whole un-normalized value. A bin
    /// straddling either limit contributes the fraction of its log₁₀-width
    /// that lies inside the interval, which is linear interpolation in log
    /// diameter space. Limits are clamped to the geometry's range, and
    /// `dmin >= dmax` yields zeros. Bins left entirely outside contribute
    /// nothing, even when their cells are NaN.
    pub fn integrate_with_density(
        &self,
        weight: Weight,
        dmin: f64,
        dmax: f64,
        density: &Density,
    ) -> Result<ScanSeries> {
        if !weight.is_moment_basis() {
            return Err(Error::Config(format!(
                "integration is defined for the number, surface, volume, and mass bases, not {weight:?}"
            )));
        }
        density.validate(self.n_bins())?;
        if dmin.is_nan() || dmax.is_nan() {
            return Err(Error::Config("integration limits must not be NaN".into()));
        }

        let timestamps = self.data.timestamps().to_vec();
        let geom = &self.config.bins;
        let lo = dmin.max(geom.min_diameter());
        let hi = dmax.min(geom.max_diameter());
        if dmin >= dmax || lo >= hi {
            return Ok(ScanSeries { timestamps, values: vec![0.0; self.data.n_rows()] });
        }

        let fracs: Vec<f64> = geom
            .bins()
            .iter()
            .zip(geom.dlogdp())
            .map(|(b, dlog)| {
                let l = b[0].max(lo);
                let r = b[2].min(hi);
                if r <= l {
                    0.0
                } else {
                    ((r.log10() - l.log10()) / dlog).clamp(0.0, 1.0)
                }
            })
            .collect();

        let wf = self.weight_factors(weight, density);
        let combined: Vec<f64> = (0..self.n_bins())
            .map(|i| wf[i] * geom.dlogdp()[i] * fracs[i])
            .collect();

        let mut values = Vec::with_capacity(self.data.n_rows());
        for r in 0..self.data.n_rows() {
            let row = self.data.row(r);
            let mut acc = 0.0;
            for i in 0..row.len() {
                if fracs[i] > 0.0 {
                    acc += row[i] * combined[i];
                }
            }
            values.push(acc);
        }
        Ok(ScanSeries { timestamps, values })
    }

    /// Particulate-matter loading: mass integrated from the smallest
    /// covered diameter up to `dmax` µm (e.g. `pm(2.5)` for PM2.5), in
    /// µg/m³ under the configured density.
    pub fn pm(&self, dmax: f64) -> Result<ScanSeries> {
        self.integrate(Weight::Mass, self.config.bins.min_diameter(), dmax)
    }

    /// [`Self::pm`] under a caller-supplied density.
    pub fn pm_with_density(&self, dmax: f64, density: &Density) -> Result<ScanSeries> {
        self.integrate_with_density(Weight::Mass, self.config.bins.min_diameter(), dmax, density)
    }

    /// Summary statistics per scan under the configured density. See
    /// [`Self::stats_with_density`].
    pub fn stats(&self, weight: Weight) -> Result<StatsTable> {
        self.stats_with_density(weight, &self.config.density)
    }

    /// Summary statistics per scan for the chosen weight basis.
    ///
    /// Each scan is reduced in a single pass over its bins using
    /// precomputed per-bin factors. A scan whose weights sum to zero gets
    /// NaN `mean`/`gm`/`gsd` rather than an error; its `total` is 0 and
    /// its `mode` is the first bin midpoint.
    pub fn stats_with_density(&self, weight: Weight, density: &Density) -> Result<StatsTable> {
        if !weight.is_moment_basis() {
            return Err(Error::Config(format!(
                "statistics are defined for the number, surface, volume, and mass bases, not {weight:?}"
            )));
        }
        density.validate(self.n_bins())?;

        let n = self.n_bins();
        let dlogdp = self.config.bins.dlogdp();
        let mids = self.config.bins.midpoints();
        let wf = self.weight_factors(weight, density);
        // Un-normalization factors, chosen weight and the three fixed totals.
        let w_dlog: Vec<f64> = (0..n).map(|i| wf[i] * dlogdp[i]).collect();
        let s_dlog: Vec<f64> = (0..n).map(|i| self.surface_factor[i] * dlogdp[i]).collect();
        let v_dlog: Vec<f64> = (0..n).map(|i| self.volume_factor[i] * dlogdp[i]).collect();

        let mut rows = Vec::with_capacity(self.data.n_rows());
        for r in 0..self.data.n_rows() {
            let row = self.data.row(r);
            let mut total = 0.0;
            let mut number = 0.0;
            let mut surface_area = 0.0;
            let mut volume = 0.0;
            let mut sum_w_mid = 0.0;
            let mut sum_w_ln = 0.0;
            let mut sum_w_ln2 = 0.0;
            let mut best = f64::NEG_INFINITY;
            let mut mode = mids[0];
            for i in 0..n {
                let v = row[i];
                let w = v * w_dlog[i];
                total += w;
                number += v * dlogdp[i];
                surface_area += v * s_dlog[i];
                volume += v * v_dlog[i];
                sum_w_mid += w * mids[i];
                sum_w_ln += w * self.ln_mid[i];
                sum_w_ln2 += w * self.ln_mid[i] * self.ln_mid[i];
                let norm = v * wf[i];
                if norm > best {
                    best = norm;
                    mode = mids[i];
                }
            }
            let mean = sum_w_mid / total;
            let mean_ln = sum_w_ln / total;
            let gm = mean_ln.exp();
            let var_ln = sum_w_ln2 / total - mean_ln * mean_ln;
            // Rounding can push an exactly-zero variance slightly negative.
            let gsd = if var_ln < 0.0 { 1.0 } else { var_ln.sqrt().exp() };
            rows.push(RowStats { total, number, surface_area, volume, mean, gm, mode, gsd });
        }
        Ok(StatsTable {
            timestamps: self.data.timestamps().to_vec(),
            weight,
            rows,
        })
    }

    /// New sizer restricted to scans with `start <= t <= end`.
    pub fn slice(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<ParticleSizer> {
        if start > end {
            return Err(Error::Config(format!(
                "slice start {start} is after its end {end}"
            )));
        }
        let keep: Vec<usize> = self
            .data
            .timestamps()
            .iter()
            .enumerate()
            .filter(|(_, t)| start <= **t && **t <= end)
            .map(|(i, _)| i)
            .collect();
        self.subset(&keep)
    }

    fn subset(&self, keep: &[usize]) -> Result<ParticleSizer> {
        let timestamps = keep.iter().map(|&i| self.data.timestamps()[i]).collect();
        let rows = keep.iter().map(|&i| self.data.row(i).to_vec()).collect();
        let mut table = ScanTable::from_rows(timestamps, self.data.labels().to_vec(), rows)?;
        for (name, col) in self.data.meta() {
            table.insert_meta(name.clone(), keep.iter().map(|&i| col[i]).collect())?;
        }
        let config = self.config.clone().with_format(RawFormat::DnDlogDp);
        ParticleSizer::new(config, table)
    }

    /// New sizer with scans averaged into fixed intervals of `every`.
    ///
    /// Buckets are counted forward from the Unix epoch and labeled with
    /// their start time; each bucket holds the arithmetic mean of its
    /// members, canonical values and auxiliary columns alike. Empty
    /// buckets simply do not appear.
    pub fn resample(&self, every: Duration) -> Result<ParticleSizer> {
        let step = every.num_milliseconds();
        if step <= 0 {
            return Err(Error::Config(format!(
                "resample interval must be positive, got {every}"
            )));
        }

        let mut buckets: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, t) in self.data.timestamps().iter().enumerate() {
            buckets.entry(t.timestamp_millis().div_euclid(step)).or_default().push(i);
        }

        let n = self.n_bins();
        let mut timestamps = Vec::with_capacity(buckets.len());
        let mut rows = Vec::with_capacity(buckets.len());
        let mut meta: BTreeMap<String, Vec<f64>> =
            self.data.meta().keys().map(|k| (k.clone(), Vec::new())).collect();
        for (bucket, members) in &buckets {
            let start = DateTime::from_timestamp_millis(bucket * step).ok_or_else(|| {
                Error::Computation("resample bucket start is outside the representable time range".into())
            })?;
            timestamps.push(start);

            let count = members.len() as f64;
            let mut mean = vec![0.0; n];
            for &i in members {
                for (m, v) in mean.iter_mut().zip(self.data.row(i)) {
                    *m += v;
                }
            }
            for m in &mut mean {
                *m /= count;
            }
            rows.push(mean);

            for (name, out) in meta.iter_mut() {
                let col = &self.data.meta()[name];
                out.push(members.iter().map(|&i| col[i]).sum::<f64>() / count);
            }
        }

        let mut table = ScanTable::from_rows(timestamps, self.data.labels().to_vec(), rows)?;
        for (name, col) in meta {
            table.insert_meta(name, col)?;
        }
        let config = self.config.clone().with_format(RawFormat::DnDlogDp);
        ParticleSizer::new(config, table)
    }
}
