//! # psd-sizer
//!
//! Particle-size-distribution engine: diameter-bin geometry, timestamped
//! scan tables, derived number/surface/volume/mass distributions, range
//! integration with log-space partial bins, weighted per-scan summary
//! statistics, and value-returning time slice/resample transforms.
//!
//! ```no_run
//! use psd_core::Weight;
//! use psd_sizer::{BinGeometry, DiameterUnits, ParticleSizer, ScanTable, SizerConfig};
//!
//! # fn main() -> psd_core::Result<()> {
//! # let (timestamps, labels, rows) = (vec![], vec!["a".to_string(), "b".to_string()], vec![]);
//! let bins = BinGeometry::from_boundaries(&[0.35, 0.46, 0.66], DiameterUnits::Micrometers)?;
//! let table = ScanTable::from_rows(timestamps, labels, rows)?;
//! let sizer = ParticleSizer::new(SizerConfig::new(bins), table)?;
//! let pm25 = sizer.pm(2.5)?;
//! let stats = sizer.stats(Weight::Number)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bins;
pub mod sizer;
pub mod table;

pub use bins::{BinGeometry, DiameterUnits};
pub use sizer::{ParticleSizer, RawFormat, RowStats, SizerConfig, StatsTable};
pub use table::{BinColumns, ScanSeries, ScanTable};
