//! Intensity combination for a group of rate measurements `v ± dv`.
//!
//! The Poisson rules recover the counts `N_i` and the counting interval `M_i`
//! (monitor counts or seconds) hidden in each rate and its uncertainty, add
//! them, and divide: the combined rate is the rate that would have been
//! measured over the whole interval.
//!
//! | rule      | implied interval `M_i`  | `v̄`          | `dv̄`                       |
//! |-----------|-------------------------|--------------|----------------------------|
//! | `Sum`     | n/a                     | `Σv`         | `sqrt(Σdv²)`               |
//! | `Monitor` | `v(v+1)/dv²`            | `ΣN/ΣM`      | `v̄·sqrt(1/ΣN + 1/ΣM)`      |
//! | `Time`    | `v/dv²`                 | `ΣN/ΣM`      | `sqrt(v̄/ΣM)`               |
//! | `Gauss`   | n/a                     | `Σ(v/dv²)/Σ(1/dv²)` | `1/sqrt(Σ1/dv²)`    |
//!
//! with `N_i = v_i·M_i`. Every division goes through [`guards`].

use crate::combine::normbase::{AverageMode, Normbase};

/// Which intensity formula applies to a group.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IntensityRule {
    /// Unnormalized counts: add them.
    Sum,
    /// Counts against a Poisson-distributed monitor.
    Monitor,
    /// Counts against an interval known without error (time, source power).
    Time,
    /// Inverse-variance weighted mean.
    Gauss,
}

impl IntensityRule {
    /// Rule for data normalized by `normbase` and averaged with `mode`.
    ///
    /// A region-of-interest count is itself Poisson, like a monitor; an
    /// integrated source power is known as precisely as a count time.
    pub fn select(normbase: Normbase, mode: AverageMode) -> Self {
        match (mode, normbase) {
            (AverageMode::Gauss, _) => IntensityRule::Gauss,
            (AverageMode::Poisson, Normbase::None) => IntensityRule::Sum,
            (AverageMode::Poisson, Normbase::Monitor | Normbase::Roi) => IntensityRule::Monitor,
            (AverageMode::Poisson, Normbase::Time | Normbase::Power) => IntensityRule::Time,
        }
    }

    /// Rules that infer counts and intervals from the rates.
    #[inline]
    pub fn infers_counts(self) -> bool {
        matches!(self, IntensityRule::Monitor | IntensityRule::Time)
    }
}

/// Combined intensity of one group.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Intensity {
    pub v: f64,
    pub dv: f64,
    /// Total counts behind the combined value (`ΣN`, or `Σv` for `Sum`);
    /// NaN for `Gauss`.
    pub counts: f64,
    /// Total implied interval `ΣM`; NaN unless the rule infers counts.
    pub interval: f64,
    /// Negative rates clamped to zero before combination.
    pub clamped: usize,
}

/// Numerical guards for the averaging formulas.
///
/// Each guard keeps one division or square root finite; callers never test
/// for zero themselves.
pub mod guards {
    /// A zero uncertainty means zero counts: use one count.
    #[inline]
    pub fn nonzero_uncertainty(dv: f64) -> f64 {
        if dv == 0.0 {
            1.0
        } else {
            dv
        }
    }

    /// Counting interval implied by a rate `v ± dv`.
    ///
    /// `poisson_interval` selects `v(v+1)/dv²` (monitor counts, themselves
    /// uncertain) over `v/dv²` (exact interval). At zero counts the interval
    /// is `1/dv`, which keeps the count uncertainty at one.
    #[inline]
    pub fn implied_monitor(v: f64, dv: f64, poisson_interval: bool) -> f64 {
        let dv = nonzero_uncertainty(dv);
        if v == 0.0 {
            1.0 / dv
        } else if poisson_interval {
            v * (v + 1.0) / (dv * dv)
        } else {
            v / (dv * dv)
        }
    }

    /// Negative rates have no Poisson interpretation; they count as zero.
    ///
    /// Returns the rate to use and whether it was clamped.
    #[inline]
    pub fn clamp_rate(v: f64) -> (f64, bool) {
        if v < 0.0 {
            (0.0, true)
        } else {
            (v, false)
        }
    }

    /// Add one to a denominator that belongs to an empty group.
    #[inline]
    pub fn protect_denominator(denominator: f64, empty: bool) -> f64 {
        if empty {
            denominator + 1.0
        } else {
            denominator
        }
    }

    /// Uncertainty of a zero rate over a Poisson monitor interval `m`:
    /// `sqrt(1 + 1/m)/m`, i.e. one count with the monitor error folded in.
    #[inline]
    pub fn zero_rate_uncertainty(m: f64) -> f64 {
        (1.0 + 1.0 / m).sqrt() / m
    }
}

use guards::{clamp_rate, implied_monitor, nonzero_uncertainty, protect_denominator, zero_rate_uncertainty};

/// Combine the rates `v ± dv` of one group with `rule`.
///
/// An empty group yields a finite placeholder (zero rate); callers mark such
/// points as masked.
pub fn combine_intensity(rule: IntensityRule, v: &[f64], dv: &[f64]) -> Intensity {
    debug_assert_eq!(v.len(), dv.len());
    let empty = v.is_empty();
    match rule {
        IntensityRule::Sum => {
            let total: f64 = v.iter().sum();
            let var: f64 = dv.iter().map(|d| d * d).sum();
            Intensity {
                v: total,
                dv: var.sqrt(),
                counts: total,
                interval: f64::NAN,
                clamped: 0,
            }
        }
        IntensityRule::Gauss => {
            let (mut swx, mut sw) = (0.0, 0.0);
            for (&x, &d) in v.iter().zip(dv) {
                let w = nonzero_uncertainty(d).powi(-2);
                swx += w * x;
                sw += w;
            }
            let sw = protect_denominator(sw, empty);
            Intensity {
                v: swx / sw,
                dv: 1.0 / sw.sqrt(),
                counts: f64::NAN,
                interval: f64::NAN,
                clamped: 0,
            }
        }
        IntensityRule::Monitor | IntensityRule::Time => {
            let poisson_interval = rule == IntensityRule::Monitor;
            let (mut counts, mut interval, mut clamped) = (0.0, 0.0, 0usize);
            for (&x, &d) in v.iter().zip(dv) {
                let (x, was_clamped) = clamp_rate(x);
                clamped += was_clamped as usize;
                let m = implied_monitor(x, d, poisson_interval);
                interval += m;
                counts += x * m;
            }
            let interval = protect_denominator(interval, empty);
            let rate = counts / interval;
            let dv = if !poisson_interval {
                (rate / interval).sqrt()
            } else if rate == 0.0 {
                zero_rate_uncertainty(interval)
            } else {
                rate * (1.0 / counts + 1.0 / interval).sqrt()
            };
            Intensity {
                v: rate,
                dv,
                counts,
                interval,
                clamped,
            }
        }
    }
}
