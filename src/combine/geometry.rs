//! Reflectometry geometry: momentum transfer from angles and wavelength, and
//! the resolution that follows from angular divergence and wavelength spread.
//!
//! Angles are in degrees, wavelengths in Å, Q in 1/Å. All widths are 1-σ.

use std::f64::consts::PI;

const FOUR_PI: f64 = 4.0 * PI;

/// `2·sqrt(2·ln 2)`: ratio of FWHM to 1-σ for a gaussian.
const FWHM_SCALE: f64 = 2.354_820_045_030_949_4;

#[inline]
pub fn fwhm_to_sigma(s: f64) -> f64 {
    s / FWHM_SCALE
}

#[inline]
pub fn sigma_to_fwhm(s: f64) -> f64 {
    s * FWHM_SCALE
}

/// `Q = 4π sin(θ)/λ`.
#[inline]
pub fn theta_l_to_q(theta: f64, l: f64) -> f64 {
    FOUR_PI * theta.to_radians().sin() / l
}

/// `θ = asin(|Q| λ / 4π)` in degrees.
///
/// The argument is clamped to `[-1, 1]` so that rounding in averaged Q and λ
/// near grazing-to-normal incidence cannot produce NaN.
#[inline]
pub fn q_l_to_theta(q: f64, l: f64) -> f64 {
    (q.abs() * l / FOUR_PI).clamp(-1.0, 1.0).asin().to_degrees()
}

/// `(Qx, Qz)` for incident angle `ti`, detector angle `td` and wavelength `l`.
#[inline]
pub fn ti_td_l_to_qxz(ti: f64, td: f64, l: f64) -> (f64, f64) {
    let k = 2.0 * PI / l;
    let (a, b) = ((td - ti).to_radians(), ti.to_radians());
    let qx = k * (a.cos() - b.cos());
    let qz = k * (a.sin() + b.sin());
    (qx, qz)
}

/// 1-σ Q resolution from angular divergence and wavelength dispersion.
///
/// `ΔQ = (4π/λ)·sqrt((sin θ·Δλ/λ)² + (cos θ·Δθ)²)`, written this way instead
/// of `Q·sqrt((Δλ/λ)² + (Δθ/tan θ)²)` to avoid cancellation at `Q = 0`.
#[inline]
pub fn dtdl_to_dq(t: f64, dt: f64, l: f64, dl: f64) -> f64 {
    let (t, dt) = (t.to_radians(), dt.to_radians());
    let a = t.sin() * dl / l;
    let b = t.cos() * dt;
    (FOUR_PI / l) * (a * a + b * b).sqrt()
}

/// 1-σ angular divergence (degrees) defined by two slits.
///
/// `s1, s2` are openings and `d1, d2` distances from the sample, all in the
/// same length unit. The FWHM divergence is `½(s1 + s2)/|d1 − d2|` radians.
#[inline]
pub fn divergence_simple(s1: f64, s2: f64, d1: f64, d2: f64) -> f64 {
    let fwhm = 0.5 * (s1 + s2) / (d1 - d2).abs();
    fwhm_to_sigma(fwhm.to_degrees())
}
