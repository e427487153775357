//! Monte Carlo check of the averaging rules.
//!
//! Counts are drawn from a Poisson distribution at a fixed rate over a set
//! of counting intervals, turned into rates with their usual uncertainties,
//! and averaged both ways. The reference is the rate measured over the pooled
//! interval `ΣN/ΣM`, which is what a merged point should reproduce.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};

use crate::combine::average::{combine_intensity, guards, Intensity, IntensityRule};
use crate::combine::{AverageMode, Normbase};
use crate::{JoinError, JoinResult};

/// Averaging error of one method, accumulated over the trials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MethodReport {
    /// Mean of `(v̄ − r_pooled)/rate`.
    pub bias: f64,
    /// Mean of `dv̄ / dr_pooled`.
    pub uncertainty_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    pub trials: usize,
    pub rate: f64,
    pub poisson: MethodReport,
    pub gauss: MethodReport,
}

impl QualityReport {
    pub fn to_line(&self) -> String {
        format!(
            "QualityReport(trials={}, rate={:.6e}, poisson bias={:+.3e} dv ratio={:.4}, \
gauss bias={:+.3e} dv ratio={:.4})",
            self.trials,
            self.rate,
            self.poisson.bias,
            self.poisson.uncertainty_ratio,
            self.gauss.bias,
            self.gauss.uncertainty_ratio
        )
    }

    pub fn log(&self) {
        log::info!("{}", self.to_line());
    }
}

/// Simulation set-up; see [`Quality::run`].
#[derive(Debug, Clone)]
pub struct Quality {
    rate: f64,
    monitors: Vec<f64>,
    norm: Normbase,
    trials: usize,
    seed: u64,
}

impl Quality {
    /// `rate` counts per unit interval, measured once over each of `monitors`.
    pub fn new(rate: f64, monitors: Vec<f64>) -> Self {
        Self {
            rate,
            monitors,
            norm: Normbase::Monitor,
            trials: 1000,
            seed: 42,
        }
    }

    /// `Monitor` intervals carry their own counting error; `Time` is exact.
    pub fn norm(mut self, norm: Normbase) -> Self {
        self.norm = norm;
        self
    }

    pub fn trials(mut self, trials: usize) -> Self {
        self.trials = trials;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> JoinResult<()> {
        let positive = |name, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(JoinError::InvalidParameter { name, value })
            }
        };
        positive("rate", self.rate)?;
        positive("trials", self.trials as f64)?;
        if self.monitors.is_empty() {
            return Err(JoinError::EmptyGroup {
                context: "no counting intervals",
            });
        }
        for &m in &self.monitors {
            positive("monitor", m)?;
        }
        match self.norm {
            Normbase::Monitor | Normbase::Time => Ok(()),
            other => Err(JoinError::UnknownMode {
                kind: "quality norm",
                value: other.to_string(),
                expected: "'monitor' or 'time'",
            }),
        }
    }

    /// Rate and 1-σ uncertainty for `n` counts over interval `m`.
    fn measured(&self, n: f64, m: f64) -> (f64, f64) {
        let y = n / m;
        let dy = match (self.norm, n == 0.0) {
            (Normbase::Monitor, true) => guards::zero_rate_uncertainty(m),
            (Normbase::Monitor, false) => y * (1.0 / n + 1.0 / m).sqrt(),
            // sqrt(y/m) over an exact interval, zero at zero counts
            _ => n.sqrt() / m,
        };
        (y, dy)
    }

    pub fn run(&self) -> JoinResult<QualityReport> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let sources = self
            .monitors
            .iter()
            .map(|&m| {
                Poisson::new(self.rate * m).map_err(|_| JoinError::InvalidParameter {
                    name: "expected counts",
                    value: self.rate * m,
                })
            })
            .collect::<JoinResult<Vec<_>>>()?;

        let poisson_rule = IntensityRule::select(self.norm, AverageMode::Poisson);
        let total_m: f64 = self.monitors.iter().sum();
        // bias sum, uncertainty ratio sum, trials with a nonzero pooled dv
        let (mut p_acc, mut g_acc) = ([0.0; 3], [0.0; 3]);
        let mut v = vec![0.0; self.monitors.len()];
        let mut dv = vec![0.0; self.monitors.len()];

        for _ in 0..self.trials {
            let mut total_n = 0.0;
            for (k, (source, &m)) in sources.iter().zip(&self.monitors).enumerate() {
                let n: f64 = source.sample(&mut rng);
                total_n += n;
                (v[k], dv[k]) = self.measured(n, m);
            }
            let (pooled, pooled_dv) = self.measured(total_n, total_m);
            let accumulate = |acc: &mut [f64; 3], out: Intensity| {
                acc[0] += (out.v - pooled) / self.rate;
                if pooled_dv > 0.0 {
                    acc[1] += out.dv / pooled_dv;
                    acc[2] += 1.0;
                }
            };
            accumulate(&mut p_acc, combine_intensity(poisson_rule, &v, &dv));
            accumulate(&mut g_acc, combine_intensity(IntensityRule::Gauss, &v, &dv));
        }

        let n = self.trials as f64;
        let report = |acc: [f64; 3]| MethodReport {
            bias: acc[0] / n,
            uncertainty_ratio: if acc[2] > 0.0 { acc[1] / acc[2] } else { f64::NAN },
        };
        Ok(QualityReport {
            trials: self.trials,
            rate: self.rate,
            poisson: report(p_acc),
            gauss: report(g_acc),
        })
    }
}
