//! Grid binning: assign points to a fixed set of output bins.
//!
//! # Semantics
//! - Bins are **half-open** `[e_k, e_{k+1})` for ascending edges, mirrored
//!   `(e_{k+1}, e_k]` for descending edges.
//! - Only the first and last edge may be infinite. An outer bin whose outer
//!   edge is infinite is a **catch-all** bin: it absorbs underflow/overflow
//!   and is never output.
//! - Points outside the edges, or with a NaN coordinate, are unassigned.
//!
//! # Performance
//! Each lookup is a binary search on the edges. Large coordinate batches are
//! located with Rayon.

use rayon::prelude::*;

use crate::combine::grouping::IndexSet;
use crate::{JoinError, JoinResult};

/// Crossover for parallel bin lookup.
const PAR_MIN: usize = 32_768;

/// Relative slop when counting regular grid steps, so `(qmax − qmin)/qstep`
/// landing a few ulps above an integer does not add a center at `qmax`.
const GRID_SLOP: f64 = 1e-9;

/// Largest grid [`QGrid::centers`] will build.
pub const MAX_GRID_CENTERS: usize = 10_000_000;

/// Validated, strictly monotonic bin edges.
#[derive(Debug, Clone, PartialEq)]
pub struct BinEdges {
    edges: Vec<f64>,
    descending: bool,
}

impl BinEdges {
    /// Validate `edges`: at least two, no NaN, infinities only at the ends,
    /// strictly increasing or strictly decreasing.
    pub fn new(edges: Vec<f64>) -> JoinResult<Self> {
        if edges.len() < 2 {
            return Err(JoinError::InvalidEdges {
                what: "need at least two edges",
            });
        }
        if edges.iter().any(|e| e.is_nan()) {
            return Err(JoinError::InvalidEdges { what: "NaN edge" });
        }
        let last = edges.len() - 1;
        if edges[1..last].iter().any(|e| e.is_infinite()) {
            return Err(JoinError::InvalidEdges {
                what: "infinite interior edge",
            });
        }
        let descending = edges[1] < edges[0];
        for (i, w) in edges.windows(2).enumerate() {
            let ok = if descending { w[1] < w[0] } else { w[1] > w[0] };
            if !ok {
                return Err(JoinError::NonMonotonicEdges {
                    index: i + 1,
                    prev: w[0],
                    next: w[1],
                });
            }
        }
        Ok(Self { edges, descending })
    }

    /// Edges halfway between adjacent centers; the outer edges mirror the
    /// first and last interior edge about the end centers.
    ///
    /// `extended` adds an infinite catch-all edge on each side.
    pub fn from_centers(centers: &[f64], extended: bool) -> JoinResult<Self> {
        if centers.len() < 2 {
            return Err(JoinError::InvalidEdges {
                what: "need at least two bin centers",
            });
        }
        let mid: Vec<f64> = centers.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
        let (first, last) = (centers[0], centers[centers.len() - 1]);
        let descending = centers[1] < centers[0];

        let mut edges = Vec::with_capacity(mid.len() + 4);
        if extended {
            edges.push(if descending { f64::INFINITY } else { f64::NEG_INFINITY });
        }
        edges.push(2.0 * first - mid[0]);
        edges.extend_from_slice(&mid);
        edges.push(2.0 * last - mid[mid.len() - 1]);
        if extended {
            edges.push(if descending { f64::NEG_INFINITY } else { f64::INFINITY });
        }
        Self::new(edges)
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.edges
    }

    #[inline]
    pub fn n_bins(&self) -> usize {
        self.edges.len() - 1
    }

    #[inline]
    pub fn is_descending(&self) -> bool {
        self.descending
    }

    /// True for an outer bin bounded by an infinite edge.
    #[inline]
    pub fn is_catch_all(&self, bin: usize) -> bool {
        let last = self.n_bins() - 1;
        (bin == 0 && self.edges[0].is_infinite()) || (bin == last && self.edges[last + 1].is_infinite())
    }

    /// Bin containing `x`, or `None` when outside the edges or NaN.
    pub fn locate(&self, x: f64) -> Option<usize> {
        if x.is_nan() {
            return None;
        }
        let e = &self.edges;
        let last = e.len() - 1;
        let k = if self.descending {
            if x > e[0] || x <= e[last] {
                return None;
            }
            e.partition_point(|&edge| edge >= x)
        } else {
            if x < e[0] || x >= e[last] {
                return None;
            }
            e.partition_point(|&edge| edge <= x)
        };
        Some(k - 1)
    }
}

/// Result of placing every point on the grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BinAssignment {
    /// Bin of each point, `None` when it fell outside the edges.
    pub bin_index: Vec<Option<usize>>,
    pub points_per_bin: Vec<usize>,
}

impl BinAssignment {
    /// One index set per bin, in bin order, empty bins included.
    pub fn groups(&self) -> Vec<IndexSet> {
        let mut groups: Vec<IndexSet> = self
            .points_per_bin
            .iter()
            .map(|&n| Vec::with_capacity(n))
            .collect();
        for (point, bin) in self.bin_index.iter().enumerate() {
            if let Some(b) = *bin {
                groups[b].push(point);
            }
        }
        groups
    }

    /// Bins that produce output: occupied and not catch-all.
    pub fn output_bins(&self, edges: &BinEdges) -> Vec<usize> {
        self.points_per_bin
            .iter()
            .enumerate()
            .filter(|&(bin, &n)| n > 0 && !edges.is_catch_all(bin))
            .map(|(bin, _)| bin)
            .collect()
    }

    /// Points that landed outside the edges (or had NaN coordinates).
    pub fn unassigned(&self) -> usize {
        self.bin_index.iter().filter(|b| b.is_none()).count()
    }

    /// Points that landed in a catch-all bin.
    pub fn in_catch_all(&self, edges: &BinEdges) -> usize {
        self.points_per_bin
            .iter()
            .enumerate()
            .filter(|&(bin, _)| edges.is_catch_all(bin))
            .map(|(_, &n)| n)
            .sum()
    }
}

/// Assign each coordinate to its bin.
pub fn assign(edges: &BinEdges, coords: &[f64]) -> BinAssignment {
    let bin_index: Vec<Option<usize>> = if coords.len() >= PAR_MIN {
        coords.par_iter().map(|&x| edges.locate(x)).collect()
    } else {
        coords.iter().map(|&x| edges.locate(x)).collect()
    };
    let mut points_per_bin = vec![0usize; edges.n_bins()];
    for b in bin_index.iter().flatten() {
        points_per_bin[*b] += 1;
    }
    log::debug!(
        "binned {} points into {} of {} bins",
        coords.len(),
        points_per_bin.iter().filter(|&&n| n > 0).count(),
        edges.n_bins()
    );
    BinAssignment {
        bin_index,
        points_per_bin,
    }
}

/// Output Q grid for rebinning.
///
/// `qstep == 0` means no binning. With `qstep_max` above `qstep` the step
/// grows linearly from `qstep` to `qstep_max` across the range.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QGrid {
    pub qmin: f64,
    pub qmax: f64,
    pub qstep: f64,
    pub qstep_max: Option<f64>,
}

impl QGrid {
    pub fn new(qmin: f64, qmax: f64, qstep: f64, qstep_max: Option<f64>) -> JoinResult<Self> {
        let grid = Self {
            qmin,
            qmax,
            qstep,
            qstep_max,
        };
        grid.validate()?;
        Ok(grid)
    }

    fn validate(&self) -> JoinResult<()> {
        let invalid = |what: String| Err(JoinError::InvalidGrid { what });
        if !(self.qstep.is_finite() && self.qstep >= 0.0) {
            return invalid(format!("qstep={} must be finite and >= 0", self.qstep));
        }
        if self.is_nobin() {
            return Ok(());
        }
        if !(self.qmin.is_finite() && self.qmax.is_finite() && self.qmax >= self.qmin) {
            return invalid(format!(
                "need finite qmin <= qmax (got {}..{})",
                self.qmin, self.qmax
            ));
        }
        if let Some(max) = self.qstep_max {
            if !(max.is_finite() && max >= self.qstep) {
                return invalid(format!("qstep_max={max} must be >= qstep={}", self.qstep));
            }
        }
        let estimate = self.span_in_steps();
        if !(estimate <= MAX_GRID_CENTERS as f64) {
            return invalid(format!(
                "qstep={} over {}..{} needs about {estimate:.3e} bins, more than {MAX_GRID_CENTERS}",
                self.qstep, self.qmin, self.qmax
            ));
        }
        Ok(())
    }

    /// Approximate number of centers, before rounding.
    fn span_in_steps(&self) -> f64 {
        let span = self.qmax - self.qmin;
        match self.qstep_max {
            Some(max) if max > self.qstep => 2.0 * span / (max + self.qstep),
            _ => span / self.qstep,
        }
    }

    #[inline]
    pub fn is_nobin(&self) -> bool {
        self.qstep == 0.0
    }

    /// Bin centers, increasing from `qmin`.
    pub fn centers(&self) -> JoinResult<Vec<f64>> {
        self.validate()?;
        if self.is_nobin() {
            return Ok(Vec::new());
        }
        let steps = self.span_in_steps();
        let centers = match self.qstep_max {
            Some(max) if max > self.qstep => {
                let n = (steps.ceil() as usize).max(1);
                let mut q = self.qmin - self.qstep;
                linspace(self.qstep, max, n)
                    .into_iter()
                    .map(|dq| {
                        q += dq;
                        q
                    })
                    .collect()
            }
            _ => {
                let n = ((steps - GRID_SLOP * steps.max(1.0)).ceil() as usize).max(1);
                (0..n).map(|i| self.qmin + i as f64 * self.qstep).collect()
            }
        };
        Ok(centers)
    }

    /// Edges around [`Self::centers`], with catch-all bins when `extended`.
    ///
    /// A grid of one center gets a single bin `qstep` wide.
    pub fn edges(&self, extended: bool) -> JoinResult<BinEdges> {
        if self.is_nobin() {
            return Err(JoinError::InvalidGrid {
                what: "qstep=0 has no bin edges".into(),
            });
        }
        match self.centers()?.as_slice() {
            &[c] => {
                let half = 0.5 * self.qstep;
                let mut edges = vec![c - half, c + half];
                if extended {
                    edges.insert(0, f64::NEG_INFINITY);
                    edges.push(f64::INFINITY);
                }
                BinEdges::new(edges)
            }
            centers => BinEdges::from_centers(centers, extended),
        }
    }
}

fn linspace(a: f64, b: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![a],
        _ => {
            let step = (b - a) / (n - 1) as f64;
            (0..n).map(|i| a + i as f64 * step).collect()
        }
    }
}
