//! Group combination: one [`CombinedPoint`] per index set.

use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::combine::average::{combine_intensity, IntensityRule};
use crate::combine::columns::{Columns, Field};
use crate::combine::geometry::q_l_to_theta;
use crate::combine::moments::{effective_weights, harmonic_mean, mixture_spread, weighted_mean};
use crate::combine::normbase::{AverageMode, GeometryWeights, Normbase};

/// Groups are combined with Rayon from this many on.
const PAR_MIN: usize = 2_048;

/// Fields added up across a group rather than averaged.
const SUMMED: [Field; 3] = [Field::Monitor, Field::Time, Field::Roi];

/// A merged measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedPoint {
    values: [f64; Field::COUNT],
    /// Angle back-solved from the combined `Qz` and detector wavelength.
    pub theta: f64,
    pub environment: BTreeMap<String, f64>,
    /// Number of raw points merged; zero marks an empty (masked) bin.
    pub points: usize,
    /// Counts behind `v` when the rule infers them; NaN otherwise.
    pub counts: f64,
    /// Negative rates clamped to zero during combination.
    pub clamped: usize,
}

impl CombinedPoint {
    #[inline]
    pub fn get(&self, field: Field) -> f64 {
        self.values[field as usize]
    }

    #[inline]
    pub fn set(&mut self, field: Field, value: f64) {
        self.values[field as usize] = value;
    }

    #[inline]
    pub fn v(&self) -> f64 {
        self.get(Field::V)
    }

    #[inline]
    pub fn dv(&self) -> f64 {
        self.get(Field::Dv)
    }

    #[inline]
    pub fn qz(&self) -> f64 {
        self.get(Field::Qz)
    }

    #[inline]
    pub fn dq(&self) -> f64 {
        self.get(Field::DQ)
    }

    #[inline]
    pub fn is_masked(&self) -> bool {
        self.points == 0
    }
}

/// Combines index sets drawn from one [`Columns`] arena.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Combiner {
    rule: IntensityRule,
    weights: GeometryWeights,
    normbase: Normbase,
}

impl Combiner {
    pub fn new(normbase: Normbase, average: AverageMode, weights: GeometryWeights) -> Self {
        Self {
            rule: IntensityRule::select(normbase, average),
            weights,
            normbase,
        }
    }

    #[inline]
    pub fn rule(&self) -> IntensityRule {
        self.rule
    }

    /// Column whose values weight the geometry under [`GeometryWeights::Normbase`].
    fn normbase_field(&self) -> Field {
        match self.normbase {
            Normbase::Monitor => Field::Monitor,
            Normbase::Time => Field::Time,
            Normbase::Roi => Field::Roi,
            Normbase::Power => Field::SourcePower,
            Normbase::None => Field::V,
        }
    }

    /// Merge the points at `indices`.
    ///
    /// One member passes through unchanged. No members gives a masked,
    /// all-finite placeholder.
    pub fn combine(&self, columns: &Columns, indices: &[usize]) -> CombinedPoint {
        match indices {
            [] => self.masked(),
            [only] => passthrough(columns, *only),
            _ => self.merge(columns, indices),
        }
    }

    fn masked(&self) -> CombinedPoint {
        let intensity = combine_intensity(self.rule, &[], &[]);
        let mut values = [0.0; Field::COUNT];
        values[Field::V as usize] = intensity.v;
        values[Field::Dv as usize] = intensity.dv;
        CombinedPoint {
            values,
            theta: 0.0,
            environment: BTreeMap::new(),
            points: 0,
            counts: 0.0,
            clamped: 0,
        }
    }

    fn merge(&self, columns: &Columns, indices: &[usize]) -> CombinedPoint {
        let gather = |col: &[f64]| -> Vec<f64> { indices.iter().map(|&i| col[i]).collect() };
        let take = |f: Field| gather(columns.get(f));

        let (v, dv) = (take(Field::V), take(Field::Dv));
        let intensity = combine_intensity(self.rule, &v, &dv);

        let raw_weights = match self.weights {
            GeometryWeights::Equal => vec![1.0; indices.len()],
            GeometryWeights::Intensity => v.iter().map(|x| x.max(0.0)).collect(),
            GeometryWeights::Normbase => take(self.normbase_field()),
        };
        let w = effective_weights(&raw_weights);

        let mut values = [f64::NAN; Field::COUNT];
        for f in Field::ALL {
            values[f as usize] = if SUMMED.contains(&f) {
                take(f).iter().sum()
            } else {
                weighted_mean(&take(f), &w)
            };
        }
        values[Field::V as usize] = intensity.v;
        values[Field::Dv as usize] = intensity.dv;

        let (ti, ld, qz) = (take(Field::Ti), take(Field::Ld), take(Field::Qz));
        values[Field::Li as usize] = harmonic_mean(&take(Field::Li), &w);
        values[Field::Ld as usize] = harmonic_mean(&ld, &w);
        values[Field::DL as usize] = mixture_spread(&ld, &take(Field::DL), &w);
        values[Field::DT as usize] = mixture_spread(&ti, &take(Field::DT), &w);
        values[Field::DQ as usize] = mixture_spread(&qz, &take(Field::DQ), &w);

        let environment = columns
            .environment
            .iter()
            .map(|(name, col)| (name.clone(), weighted_mean(&gather(col), &w)))
            .collect();

        CombinedPoint {
            theta: q_l_to_theta(values[Field::Qz as usize], values[Field::Ld as usize]),
            values,
            environment,
            points: indices.len(),
            counts: intensity.counts,
            clamped: intensity.clamped,
        }
    }

    /// Combine every group, keeping group order.
    pub fn merge_groups(&self, columns: &Columns, groups: &[Vec<usize>]) -> Vec<CombinedPoint> {
        if groups.len() >= PAR_MIN {
            groups.par_iter().map(|g| self.combine(columns, g)).collect()
        } else {
            groups.iter().map(|g| self.combine(columns, g)).collect()
        }
    }
}

fn passthrough(columns: &Columns, index: usize) -> CombinedPoint {
    let values: [f64; Field::COUNT] = std::array::from_fn(|k| columns.get(Field::ALL[k])[index]);
    CombinedPoint {
        theta: q_l_to_theta(values[Field::Qz as usize], values[Field::Ld as usize]),
        values,
        environment: columns
            .environment
            .iter()
            .map(|(name, col)| (name.clone(), col[index]))
            .collect(),
        points: 1,
        counts: f64::NAN,
        clamped: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combine::columns::set_q;
    use crate::combine::test_helpers::{assert_all_finite, assert_exact, assert_rel_close};

    fn arena(ti: Vec<f64>, v: Vec<f64>, dv: Vec<f64>, monitor: Vec<f64>) -> Columns {
        let n = ti.len();
        let td = ti.iter().map(|t| 2.0 * t).collect();
        let mut cols = Columns::from_fields(vec![
            (Field::V, v),
            (Field::Dv, dv),
            (Field::Ti, ti.clone()),
            (Field::TiTarget, ti),
            (Field::Td, td),
            (Field::DT, vec![0.01; n]),
            (Field::Ld, vec![4.75; n]),
            (Field::DL, vec![0.02; n]),
            (Field::Monitor, monitor),
            (Field::Time, vec![10.0; n]),
        ])
        .unwrap();
        set_q(&mut cols);
        cols
    }

    fn monitor_combiner() -> Combiner {
        Combiner::new(Normbase::Monitor, AverageMode::Poisson, GeometryWeights::Normbase)
    }

    #[test]
    fn single_member_passes_through() {
        let cols = arena(vec![0.5, 0.7], vec![-0.2, 0.4], vec![0.1, 0.1], vec![100.0, 200.0]);
        let p = monitor_combiner().combine(&cols, &[0]);
        assert_eq!(p.points, 1);
        // a lone negative rate is not clamped
        assert_exact("v", -0.2, p.v());
        assert_exact("Ti", 0.5, p.get(Field::Ti));
        assert_exact("monitor", 100.0, p.get(Field::Monitor));
        assert_rel_close("theta", 0.5, p.theta, 1e-12);
    }

    #[test]
    fn empty_group_is_masked_and_finite() {
        let cols = arena(vec![0.5], vec![1.0], vec![0.1], vec![100.0]);
        let p = monitor_combiner().combine(&cols, &[]);
        assert!(p.is_masked());
        assert_all_finite("masked", &p.values);
    }

    #[test]
    fn identical_repeats_keep_geometry_and_sum_counters() {
        let cols = arena(vec![0.5; 3], vec![2.0; 3], vec![0.2; 3], vec![100.0; 3]);
        let p = monitor_combiner().combine(&cols, &[0, 1, 2]);
        assert_eq!(p.points, 3);
        assert_rel_close("v", 2.0, p.v(), 1e-12);
        assert!(p.dv() < 0.2);
        assert_rel_close("Ti", 0.5, p.get(Field::Ti), 1e-12);
        assert_rel_close("dT", 0.01, p.get(Field::DT), 1e-9);
        assert_rel_close("dQ", cols.get(Field::DQ)[0], p.dq(), 1e-9);
        assert_rel_close("monitor", 300.0, p.get(Field::Monitor), 1e-12);
        assert_rel_close("time", 30.0, p.get(Field::Time), 1e-12);
    }

    #[test]
    fn geometry_is_weighted_by_monitor() {
        let cols = arena(vec![0.5, 0.6], vec![1.0, 1.0], vec![0.1, 0.1], vec![100.0, 300.0]);
        let p = monitor_combiner().combine(&cols, &[0, 1]);
        assert_rel_close("Ti", 0.575, p.get(Field::Ti), 1e-12);
        assert!(p.dq() > cols.get(Field::DQ)[0].max(cols.get(Field::DQ)[1]));

        let equal = Combiner::new(Normbase::Monitor, AverageMode::Poisson, GeometryWeights::Equal);
        assert_rel_close("Ti", 0.55, equal.combine(&cols, &[0, 1]).get(Field::Ti), 1e-12);
    }

    #[test]
    fn environment_is_averaged() {
        let mut cols = arena(vec![0.5, 0.5], vec![1.0, 1.0], vec![0.1, 0.1], vec![1.0, 1.0]);
        cols.environment.insert("temperature".into(), vec![300.0, 302.0]);
        let p = monitor_combiner().combine(&cols, &[0, 1]);
        assert_rel_close("T", 301.0, p.environment["temperature"], 1e-12);
    }

    #[test]
    fn parallel_merge_preserves_order() {
        let n = PAR_MIN + 10;
        let ti: Vec<f64> = (0..n).map(|i| 0.1 + i as f64 * 1e-3).collect();
        let cols = arena(ti, vec![1.0; n], vec![0.1; n], vec![10.0; n]);
        let groups: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        let out = monitor_combiner().merge_groups(&cols, &groups);
        assert_eq!(out.len(), n);
        for (i, p) in out.iter().enumerate() {
            assert_exact("Ti", cols.get(Field::Ti)[i], p.get(Field::Ti));
        }
    }
}
