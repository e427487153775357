//! Weighted moments for the geometry of a merged point.
//!
//! A merged point stands for a mixture of the resolution functions of its
//! members. Its spread is the mixture standard deviation
//!
//! `σ² = Σw(d² + x²)/Σw − x̄²`
//!
//! evaluated in the two-pass form `⟨d²⟩ + ⟨(x − x̄)²⟩`, so identical members
//! keep their own width and separated members widen it.

use std::borrow::Cow;

/// Sanitized weights.
///
/// Negative or non-finite entries count as zero; when nothing positive is
/// left every point gets the same weight.
pub fn effective_weights(w: &[f64]) -> Cow<'_, [f64]> {
    let clean = w.iter().all(|x| x.is_finite() && *x >= 0.0);
    let total: f64 = w.iter().filter(|x| x.is_finite()).map(|x| x.max(0.0)).sum();
    if !(total > 0.0) {
        return Cow::Owned(vec![1.0; w.len()]);
    }
    if clean {
        Cow::Borrowed(w)
    } else {
        Cow::Owned(
            w.iter()
                .map(|&x| if x.is_finite() { x.max(0.0) } else { 0.0 })
                .collect(),
        )
    }
}

/// `Σw·x / Σw`. NaN for no points.
#[inline]
pub fn weighted_mean(x: &[f64], w: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), w.len());
    let (mut sx, mut sw) = (0.0, 0.0);
    for (&xi, &wi) in x.iter().zip(w) {
        sx += wi * xi;
        sw += wi;
    }
    sx / sw
}

/// `Σw / Σ(w/x)`: the wavelength whose `1/λ` is the mean `1/λ`.
#[inline]
pub fn harmonic_mean(x: &[f64], w: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), w.len());
    let (mut s_inv, mut sw) = (0.0, 0.0);
    for (&xi, &wi) in x.iter().zip(w) {
        s_inv += wi / xi;
        sw += wi;
    }
    sw / s_inv
}

/// Mixture standard deviation of points `x ± d`.
pub fn mixture_spread(x: &[f64], d: &[f64], w: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), d.len());
    let mean = weighted_mean(x, w);
    let (mut s, mut sw) = (0.0, 0.0);
    for ((&xi, &di), &wi) in x.iter().zip(d).zip(w) {
        let dx = xi - mean;
        s += wi * (di * di + dx * dx);
        sw += wi;
    }
    (s / sw).max(0.0).sqrt()
}
