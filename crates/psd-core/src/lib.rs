//! # psd-core
//!
//! Shared foundation for the psd workspace: the error taxonomy and the
//! small value types (weighting basis, particle density) that both the
//! sizer engine and the log-normal fit engine consume.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Density, Weight};
