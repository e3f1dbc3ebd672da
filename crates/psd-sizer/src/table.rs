//! Timestamped scan storage.
//!
//! A [`ScanTable`] is a dense row-major matrix of per-bin values, one row
//! per scan, plus any number of named auxiliary columns (temperature,
//! pressure, flow rate, ...) that ride along with the size data.
//!
//! Construction validates shape only. Non-finite and negative values are
//! stored as-is and propagate through downstream arithmetic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use psd_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// How to identify the per-bin columns in a named-column input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinColumns {
    /// Columns whose name is `<prefix><integer>` are bin columns, ordered
    /// by the integer suffix (`bin0`, `bin1`, ...). Everything else
    /// becomes an auxiliary column.
    Prefix(String),
    /// Exactly these column names, in this bin order. Everything else
    /// becomes an auxiliary column.
    Labels(Vec<String>),
}

/// Dense timestamped scan matrix with auxiliary columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTable {
    timestamps: Vec<DateTime<Utc>>,
    labels: Vec<String>,
    /// Row-major, `n_rows * n_bins`.
    values: Vec<f64>,
    meta: BTreeMap<String, Vec<f64>>,
}

impl ScanTable {
    /// Build from one row of per-bin values per scan.
    pub fn from_rows(
        timestamps: Vec<DateTime<Utc>>,
        labels: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::Config("scan table needs at least one bin column".into()));
        }
        if timestamps.len() != rows.len() {
            return Err(Error::Config(format!(
                "timestamp count {} does not match row count {}",
                timestamps.len(),
                rows.len()
            )));
        }
        let n_bins = labels.len();
        let mut values = Vec::with_capacity(rows.len() * n_bins);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_bins {
                return Err(Error::Config(format!(
                    "row {i} has {} values, expected {n_bins}",
                    row.len()
                )));
            }
            values.extend_from_slice(row);
        }
        Ok(Self { timestamps, labels, values, meta: BTreeMap::new() })
    }

    /// Build from named columns, splitting bin columns from auxiliary
    /// columns according to `selector`.
    pub fn from_columns(
        timestamps: Vec<DateTime<Utc>>,
        columns: Vec<(String, Vec<f64>)>,
        selector: &BinColumns,
    ) -> Result<Self> {
        let n_rows = timestamps.len();
        for (name, col) in &columns {
            if col.len() != n_rows {
                return Err(Error::Config(format!(
                    "column '{name}' has {} values, expected {n_rows}",
                    col.len()
                )));
            }
        }

        let mut bin_cols: Vec<(usize, String, Vec<f64>)> = Vec::new();
        let mut meta = BTreeMap::new();

        match selector {
            BinColumns::Prefix(prefix) => {
                for (name, col) in columns {
                    match name.strip_prefix(prefix.as_str()).and_then(|s| s.parse::<usize>().ok())
                    {
                        Some(idx) => {
                            if bin_cols.iter().any(|(i, _, _)| *i == idx) {
                                return Err(Error::Config(format!(
                                    "duplicate bin index {idx} for prefix '{prefix}'"
                                )));
                            }
                            bin_cols.push((idx, name, col));
                        }
                        None => {
                            meta.insert(name, col);
                        }
                    }
                }
                bin_cols.sort_by_key(|(idx, _, _)| *idx);
            }
            BinColumns::Labels(labels) => {
                let mut remaining: BTreeMap<String, Vec<f64>> = columns.into_iter().collect();
                for (order, name) in labels.iter().enumerate() {
                    let col = remaining.remove(name).ok_or_else(|| {
                        Error::Config(format!("bin column '{name}' not found in input"))
                    })?;
                    bin_cols.push((order, name.clone(), col));
                }
                meta = remaining;
            }
        }

        if bin_cols.is_empty() {
            return Err(Error::Config("no bin columns matched the selector".into()));
        }

        let n_bins = bin_cols.len();
        let labels: Vec<String> = bin_cols.iter().map(|(_, name, _)| name.clone()).collect();
        let mut values = vec![0.0; n_rows * n_bins];
        for (j, (_, _, col)) in bin_cols.iter().enumerate() {
            for (i, v) in col.iter().enumerate() {
                values[i * n_bins + j] = *v;
            }
        }
        Ok(Self { timestamps, labels, values, meta })
    }

    /// Attach (or replace) an auxiliary column.
    pub fn insert_meta(&mut self, name: impl Into<String>, column: Vec<f64>) -> Result<()> {
        if column.len() != self.n_rows() {
            return Err(Error::Config(format!(
                "auxiliary column has {} values, expected {}",
                column.len(),
                self.n_rows()
            )));
        }
        self.meta.insert(name.into(), column);
        Ok(())
    }

    /// Number of scans (rows).
    pub fn n_rows(&self) -> usize {
        self.timestamps.len()
    }

    /// Number of bin columns.
    pub fn n_bins(&self) -> usize {
        self.labels.len()
    }

    /// Scan timestamps, one per row.
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Bin column names, in bin order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Row-major value storage, `n_rows * n_bins`.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Per-bin values of row `i`.
    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.n_bins();
        &self.values[i * n..(i + 1) * n]
    }

    /// Auxiliary columns keyed by name.
    pub fn meta(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.meta
    }

    /// One auxiliary column, if present.
    pub fn meta_column(&self, name: &str) -> Option<&[f64]> {
        self.meta.get(name).map(|c| c.as_slice())
    }

    /// New table with every column `j` multiplied by `factors[j]`.
    ///
    /// Auxiliary columns are dropped: a scaled table is derived data and
    /// the originals stay with the source table.
    pub fn scaled_per_bin(&self, factors: &[f64]) -> Result<ScanTable> {
        if factors.len() != self.n_bins() {
            return Err(Error::Config(format!(
                "got {} scale factors for {} bins",
                factors.len(),
                self.n_bins()
            )));
        }
        let n = self.n_bins();
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(k, v)| v * factors[k % n])
            .collect();
        Ok(ScanTable {
            timestamps: self.timestamps.clone(),
            labels: self.labels.clone(),
            values,
            meta: BTreeMap::new(),
        })
    }
}

/// One scalar value per scan, e.g. an integrated concentration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSeries {
    /// Scan timestamps, one per value.
    pub timestamps: Vec<DateTime<Utc>>,
    /// The per-scan values.
    pub values: Vec<f64>,
}
