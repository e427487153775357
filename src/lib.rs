//! Combination engine for reflectometry measurements.
//!
//! Raw points from one or more datasets are grouped (by tolerance, exact
//! target, or a fixed Q grid), merged with Poisson- or Gauss-correct
//! intensity statistics and mixture geometry, and returned in display order.

pub mod combine;
pub mod config;
pub mod dataset;
pub mod error;
pub mod join;
pub mod quality;

pub use config::{ConfigError, JoinConfig};
pub use dataset::ReflDataset;
pub use error::{JoinError, JoinResult};
pub use join::{join, join_datasets, rebin, FileOrder, GroupKey, JoinOptions};
pub use quality::QualityReport;
