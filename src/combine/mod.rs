pub mod average;
pub mod binning;
pub mod columns;
pub mod geometry;
pub mod grouping;
pub mod merge;
pub mod moments;
pub mod sequence;
#[cfg(test)]
pub mod test_helpers;

// Internal building blocks
mod normbase;

// Public surface
pub use average::IntensityRule;
pub use binning::{BinAssignment, BinEdges, QGrid};
pub use columns::{Columns, Field};
pub use grouping::{IndexSet, Tolerance};
pub use merge::{CombinedPoint, Combiner};
pub use normbase::{AverageMode, GeometryWeights, Normbase};
pub(crate) use normbase::norm;
