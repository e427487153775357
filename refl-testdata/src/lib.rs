//! refl-testdata
//! Synthetic specular scans shared by benches and tests.
//! Counts are Poisson draws over a monitor, so rates carry realistic
//! low-count statistics near the high-Q end.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};

/// Wavelength used by every generated scan (Å).
pub const WAVELENGTH: f64 = 4.75;
/// Wavelength spread (Å).
pub const WAVELENGTH_SPREAD: f64 = 0.02;

/// Reflectivity profile the counts are drawn from.
#[derive(Clone, Copy, Debug)]
pub enum Profile {
    /// Constant rate per monitor count.
    Flat { rate: f64 },
    /// Fresnel-like fall-off past a critical edge at `qc`, plus background.
    Fresnel { qc: f64, background: f64 },
}

impl Profile {
    /// Expected rate per monitor count at `q`.
    pub fn rate(&self, q: f64) -> f64 {
        match *self {
            Profile::Flat { rate } => rate,
            Profile::Fresnel { qc, background } => {
                let r = if q <= qc { 1.0 } else { (qc / (2.0 * q)).powi(4) };
                r + background
            }
        }
    }
}

/// One monitor-normalized specular scan as plain columns.
#[derive(Clone, Debug)]
pub struct Scan {
    pub name: String,
    /// Incident angle per point (degrees); `Td = 2·Ti`.
    pub ti: Vec<f64>,
    /// Angular divergence (degrees, 1-σ).
    pub dt: f64,
    /// Monitor counts per point.
    pub monitor: Vec<f64>,
    /// Detector counts per point.
    pub counts: Vec<f64>,
}

impl Scan {
    #[inline]
    pub fn len(&self) -> usize {
        self.ti.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ti.is_empty()
    }

    /// Rate `N/M` with `dv = v·sqrt(1/N + 1/M)`; a zero count uses
    /// `sqrt(1 + 1/M)/M`.
    pub fn rates(&self) -> (Vec<f64>, Vec<f64>) {
        self.counts
            .iter()
            .zip(&self.monitor)
            .map(|(&n, &m)| {
                let v = n / m;
                let dv = if n == 0.0 {
                    (1.0 + 1.0 / m).sqrt() / m
                } else {
                    v * (1.0 / n + 1.0 / m).sqrt()
                };
                (v, dv)
            })
            .unzip()
    }
}

/// `Qz` for incident angle `ti` (degrees) at [`WAVELENGTH`].
#[inline]
pub fn q_of(ti: f64) -> f64 {
    4.0 * std::f64::consts::PI * ti.to_radians().sin() / WAVELENGTH
}

/// Draw one count for expectation `lambda`; zero expectation gives zero.
fn draw(rng: &mut StdRng, lambda: f64) -> f64 {
    match Poisson::new(lambda) {
        Ok(p) => p.sample(rng),
        Err(_) => 0.0,
    }
}

/// A scan of `n` points from `theta_min` to `theta_max`, `monitor` counts per point.
pub fn gen_scan(profile: Profile, n: usize, theta: (f64, f64), monitor: f64, seed: u64) -> Scan {
    let mut rng = StdRng::seed_from_u64(seed);
    let (lo, hi) = theta;
    let step = if n > 1 { (hi - lo) / (n - 1) as f64 } else { 0.0 };
    let ti: Vec<f64> = (0..n).map(|i| lo + step * i as f64).collect();
    let counts = ti
        .iter()
        .map(|&t| draw(&mut rng, profile.rate(q_of(t)) * monitor))
        .collect();
    Scan {
        name: format!("scan-{seed}"),
        ti,
        dt: 0.01,
        monitor: vec![monitor; n],
        counts,
    }
}

/// `repeats` scans over the same nominal angles, each angle jittered by a
/// small fraction of `dt` and each monitor varied by up to ±20 %.
pub fn gen_repeated_scans(profile: Profile, n: usize, repeats: usize, seed: u64) -> Vec<Scan> {
    let mut rng = StdRng::seed_from_u64(seed);
    let jitter = Normal::new(0.0_f64, 1e-4).unwrap();
    let base = gen_scan(profile, n, (0.1, 3.0), 1.0e4, seed);
    (0..repeats)
        .map(|r| {
            let ti: Vec<f64> = base
                .ti
                .iter()
                .map(|&t| t + jitter.sample(&mut rng))
                .collect();
            let monitor: Vec<f64> = (0..n)
                .map(|_| (1.0e4 * rng.random_range(0.8_f64..1.2)).round())
                .collect();
            let counts = ti
                .iter()
                .zip(&monitor)
                .map(|(&t, &m)| draw(&mut rng, profile.rate(q_of(t)) * m))
                .collect();
            Scan {
                name: format!("scan-{seed}-{r}"),
                ti,
                dt: base.dt,
                monitor,
                counts,
            }
        })
        .collect()
}
