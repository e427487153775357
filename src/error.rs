// src/error.rs
use thiserror::Error;

use crate::combine::Normbase;

/// Library-wide error for refl-join.
///
/// Only input validation is fatal. Numerical edge cases (zero counts, empty
/// bins, zero weight sums) are absorbed by the guard functions in
/// [`crate::combine::average::guards`] and never surface here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JoinError {
    /// Datasets intended for one combination were normalized differently.
    #[error(
        "refl-join: can't mix {expected} and {found} normalized data (dataset {dataset}). \
hint: normalize every dataset in the group the same way before join"
    )]
    MixedNormbase {
        expected: Normbase,
        found: Normbase,
        dataset: String,
    },

    /// A vector field does not match the number of points in its dataset.
    #[error("refl-join: {field} length {got} does not match data length {expected} in {dataset}")]
    ShapeMismatch {
        field: &'static str,
        dataset: String,
        expected: usize,
        got: usize,
    },

    /// Bin edges must be strictly increasing or strictly decreasing.
    #[error("refl-join: bin edges are not strictly monotonic at index {index} ({prev} then {next})")]
    NonMonotonicEdges { index: usize, prev: f64, next: f64 },

    /// Bin edges are structurally unusable (too few, NaN, interior infinity).
    #[error("refl-join: invalid bin edges: {what}")]
    InvalidEdges { what: &'static str },

    /// Q grid parameters cannot produce a grid.
    #[error("refl-join: invalid Q grid: {what}")]
    InvalidGrid { what: String },

    /// A normalization, averaging, ordering or grouping mode string was not recognized.
    #[error("refl-join: unknown {kind} {value:?} (expected {expected})")]
    UnknownMode {
        kind: &'static str,
        value: String,
        expected: &'static str,
    },

    /// Tolerances are multipliers on resolution and must be finite and >= 0.
    #[error("refl-join: invalid {name}={value}; hint: tolerance must be finite and >= 0")]
    InvalidTolerance { name: &'static str, value: f64 },

    /// A simulation parameter (rate, interval, trial count) is out of range.
    #[error("refl-join: invalid {name}={value}; must be finite and > 0")]
    InvalidParameter { name: &'static str, value: f64 },

    /// Nothing to combine.
    #[error("refl-join: empty group ({context})")]
    EmptyGroup { context: &'static str },
}

pub type JoinResult<T> = Result<T, JoinError>;
