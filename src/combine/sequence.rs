//! Output ordering of combined points.

use std::cmp::Ordering;

use crate::combine::columns::Field;
use crate::combine::merge::CombinedPoint;
use crate::dataset::Intent;

/// Sort keys for a measurement of `intent`, most significant first.
///
/// Rocking curves sweep `Qx`; slit scans (direct beam intensity) vary the
/// divergence and wavelength; everything else is ordered along `Qz`.
pub fn sort_keys_for(intent: Intent) -> [Field; 3] {
    if intent.is_rock() {
        [Field::Qx, Field::Qz, Field::DQ]
    } else if intent.is_slit() {
        [Field::DT, Field::Ld, Field::DL]
    } else {
        [Field::Qz, Field::DQ, Field::Qx]
    }
}

/// `total_cmp`, except that NaN of either sign sorts after every number.
#[inline]
fn cmp_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.total_cmp(&b),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    }
}

/// Stable lexicographic sort of `points` on `keys`.
pub fn sort_points(points: &mut [CombinedPoint], keys: &[Field]) {
    if points.len() <= 1 {
        return;
    }
    points.sort_by(|a, b| {
        keys.iter()
            .map(|&k| cmp_nan_last(a.get(k), b.get(k)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combine::columns::Columns;
    use crate::combine::merge::Combiner;
    use crate::combine::{AverageMode, GeometryWeights, Normbase};

    fn points(qz: &[f64], dq: &[f64], qx: &[f64]) -> Vec<CombinedPoint> {
        let n = qz.len();
        let cols = Columns::from_fields(vec![
            (Field::V, (0..n).map(|i| i as f64).collect()),
            (Field::Qz, qz.to_vec()),
            (Field::DQ, dq.to_vec()),
            (Field::Qx, qx.to_vec()),
        ])
        .unwrap();
        let c = Combiner::new(Normbase::None, AverageMode::Poisson, GeometryWeights::Equal);
        (0..n).map(|i| c.combine(&cols, &[i])).collect()
    }

    fn order(points: &[CombinedPoint]) -> Vec<f64> {
        points.iter().map(|p| p.v()).collect()
    }

    #[test]
    fn specular_orders_by_qz_then_dq() {
        let mut p = points(&[0.02, 0.01, 0.02, f64::NAN], &[0.002, 0.001, 0.001, 0.0], &[0.0; 4]);
        sort_points(&mut p, &sort_keys_for(Intent::Specular));
        assert_eq!(order(&p), vec![1.0, 2.0, 0.0, 3.0]);
    }

    #[test]
    fn rocking_curves_order_by_qx() {
        let mut p = points(&[0.02, 0.01, 0.03], &[0.001; 3], &[0.001, -0.002, 0.0]);
        sort_points(&mut p, &sort_keys_for(Intent::RockSample));
        assert_eq!(order(&p), vec![1.0, 2.0, 0.0]);
    }

    #[test]
    fn ties_keep_input_order() {
        let mut p = points(&[0.01; 3], &[0.001; 3], &[0.0; 3]);
        sort_points(&mut p, &sort_keys_for(Intent::Specular));
        assert_eq!(order(&p), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn slit_scans_use_divergence_keys() {
        assert_eq!(sort_keys_for(Intent::Slit), [Field::DT, Field::Ld, Field::DL]);
    }
}
