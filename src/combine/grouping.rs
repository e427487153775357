//! Tolerance grouping: discover which points are repeated measurements of the
//! same nominal condition.
//!
//! Grouping refines an initial "everything together" index set one dimension
//! at a time. Within each subgroup the points are sorted along the dimension
//! and swept greedily; a point joins the running group while it lies inside
//! the tolerance window of every point already in it.
//!
//! Resolution dimensions are split before wavelength, and wavelength before
//! angle. Splitting a loose dimension first lets a run of points with wide
//! resolution be cut every time a tight-resolution point shows up in the
//! sweep.

use std::collections::HashMap;

use ordered_float::OrderedFloat;

use crate::combine::columns::{Columns, Field};

/// Indices into the flat columns of one merge candidate.
pub type IndexSet = Vec<usize>;

/// Grouping tolerances, as multipliers on each point's own resolution.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Tolerance {
    /// Allowed separation in angle/wavelength/Q.
    pub q: f64,
    /// Allowed difference in resolution.
    pub dq: f64,
}

impl Tolerance {
    /// Both zero: group on target positions instead of measured ones.
    #[inline]
    pub fn is_exact(&self) -> bool {
        self.q == 0.0 && self.dq == 0.0
    }
}

/// Split every index set along `data`, keeping points within `width` of each other.
pub fn group_by_dim(index_sets: Vec<IndexSet>, data: &[f64], width: &[f64]) -> Vec<IndexSet> {
    let mut refinement = Vec::with_capacity(index_sets.len());
    for subgroup in index_sets {
        refinement.extend(split_subgroup(subgroup, data, width));
    }
    refinement
}

/// Greedy interval sweep over one subgroup.
///
/// Returns the subgroups in increasing `data` order. Points whose value is
/// not finite cannot be placed on the axis; they stay together in one
/// trailing subgroup.
fn split_subgroup(indices: IndexSet, data: &[f64], width: &[f64]) -> Vec<IndexSet> {
    if indices.len() <= 1 {
        return vec![indices];
    }

    let (mut order, unplaced): (Vec<usize>, Vec<usize>) =
        indices.into_iter().partition(|&k| data[k].is_finite());
    // Ties broken by index so the sweep does not depend on input order.
    order.sort_by(|&a, &b| data[a].total_cmp(&data[b]).then(a.cmp(&b)));

    let mut groups: Vec<IndexSet> = Vec::new();
    let mut current: IndexSet = Vec::new();
    let (mut start, mut end) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for k in order {
        let (x, w) = (data[k], width[k]);
        // Out of range either past the tightest upper bound seen so far, or
        // because this point's window no longer reaches the group opener.
        if x > end || x - w > start {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            current.push(k);
            start = x;
            end = x + w;
        } else {
            current.push(k);
            end = end.min(x + w);
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    if !unplaced.is_empty() {
        groups.push(unplaced);
    }
    groups
}

#[inline]
fn scaled(factor: f64, width: &[f64]) -> Vec<f64> {
    width.iter().map(|w| factor * w).collect()
}

#[inline]
fn all_indices(columns: &Columns) -> Vec<IndexSet> {
    if columns.is_empty() {
        Vec::new()
    } else {
        vec![(0..columns.len()).collect()]
    }
}

/// Group by measured instrument geometry.
///
/// Passes, tightest first: `dT`, `dL` (width `dq·resolution`), then `Ld`
/// (width `q·dL`), `Ti` and `Td` (width `q·dT`).
pub fn group_by_actual_angles(columns: &Columns, tol: Tolerance) -> Vec<IndexSet> {
    let (ti, td, dt) = (
        columns.get(Field::Ti),
        columns.get(Field::Td),
        columns.get(Field::DT),
    );
    let (ld, dl) = (columns.get(Field::Ld), columns.get(Field::DL));

    let mut groups = all_indices(columns);
    groups = group_by_dim(groups, dt, &scaled(tol.dq, dt));
    log::debug!("dT groups: {}", groups.len());
    groups = group_by_dim(groups, dl, &scaled(tol.dq, dl));
    log::debug!("dL groups: {}", groups.len());
    let angle_width = scaled(tol.q, dt);
    groups = group_by_dim(groups, ld, &scaled(tol.q, dl));
    log::debug!("Ld groups: {}", groups.len());
    groups = group_by_dim(groups, ti, &angle_width);
    log::debug!("Ti groups: {}", groups.len());
    groups = group_by_dim(groups, td, &angle_width);
    log::debug!("Td groups: {}", groups.len());
    groups
}

/// Group by momentum transfer: `dQ` first, then `Qz` and `Qx` within `q·dQ`.
pub fn group_by_q(columns: &Columns, tol: Tolerance) -> Vec<IndexSet> {
    let (qx, qz, dq) = (
        columns.get(Field::Qx),
        columns.get(Field::Qz),
        columns.get(Field::DQ),
    );
    let q_width = scaled(tol.q, dq);

    let mut groups = all_indices(columns);
    groups = group_by_dim(groups, dq, &scaled(tol.dq, dq));
    groups = group_by_dim(groups, qz, &q_width);
    groups = group_by_dim(groups, qx, &q_width);
    log::debug!("Q groups: {}", groups.len());
    groups
}

/// Exact grouping on the nominal (target) geometry.
///
/// Points merge when `(Ti_target, Td_target, dT_target, Ld, dL)` are
/// bit-for-bit equal, which is how repeated measurements at one setpoint
/// show up. Groups are returned in order of first appearance.
pub fn group_by_target(columns: &Columns) -> Vec<IndexSet> {
    let keys = [
        columns.get(Field::TiTarget),
        columns.get(Field::TdTarget),
        columns.get(Field::DtTarget),
        columns.get(Field::Ld),
        columns.get(Field::DL),
    ];
    let mut slot: HashMap<[OrderedFloat<f64>; 5], usize> = HashMap::new();
    let mut groups: Vec<IndexSet> = Vec::new();
    for index in 0..columns.len() {
        let key = keys.map(|col| OrderedFloat(col[index]));
        let at = *slot.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[at].push(index);
    }
    log::debug!("target groups: {}", groups.len());
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut groups: Vec<IndexSet>) -> Vec<IndexSet> {
        for g in groups.iter_mut() {
            g.sort_unstable();
        }
        groups.sort();
        groups
    }

    #[test]
    fn singleton_is_returned_untouched() {
        let out = group_by_dim(vec![vec![3]], &[0.0, 0.0, 0.0, 1.0], &[0.0; 4]);
        assert_eq!(out, vec![vec![3]]);
    }

    #[test]
    fn splits_on_gaps_larger_than_width() {
        let data = [1.0, 1.05, 2.0, 2.02, 5.0];
        let width = [0.1; 5];
        let out = group_by_dim(vec![(0..5).collect()], &data, &width);
        assert_eq!(out, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn chained_points_do_not_drift_past_the_opener() {
        // Each neighbour is within 0.1 but the run spans 0.16.
        let data = [0.0, 0.08, 0.16];
        let width = [0.1; 3];
        let out = group_by_dim(vec![vec![0, 1, 2]], &data, &width);
        assert_eq!(out, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn tight_point_closes_window_early() {
        // Point 1 has a narrow window: point 2 is past its upper bound.
        let data = [0.0, 0.01, 0.05];
        let width = [0.1, 0.02, 0.1];
        let out = group_by_dim(vec![vec![0, 1, 2]], &data, &width);
        assert_eq!(out, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn non_finite_values_form_their_own_group() {
        let data = [1.0, f64::NAN, 1.0, f64::NAN];
        let out = group_by_dim(vec![vec![0, 1, 2, 3]], &data, &[0.1; 4]);
        assert_eq!(out, vec![vec![0, 2], vec![1, 3]]);
    }

    #[test]
    fn sweep_is_independent_of_input_order() {
        let data = [0.3, 0.0, 0.31, 0.02, 0.6, 0.05];
        let width = [0.04, 0.03, 0.04, 0.03, 0.1, 0.03];
        let a = group_by_dim(vec![vec![0, 1, 2, 3, 4, 5]], &data, &width);
        let b = group_by_dim(vec![vec![5, 4, 3, 2, 1, 0]], &data, &width);
        let c = group_by_dim(vec![vec![2, 0, 5, 1, 4, 3]], &data, &width);
        assert_eq!(sorted(a.clone()), sorted(b));
        assert_eq!(sorted(a), sorted(c));
    }

    #[test]
    fn exact_mode_only_merges_identical_targets() {
        let cols = Columns::from_fields(vec![
            (Field::V, vec![1.0; 4]),
            (Field::TiTarget, vec![0.5, 0.5, 0.5000001, 0.5]),
            (Field::TdTarget, vec![1.0, 1.0, 1.0, 1.0]),
            (Field::DtTarget, vec![0.01, 0.01, 0.01, 0.02]),
            (Field::Ld, vec![4.75; 4]),
            (Field::DL, vec![0.02; 4]),
        ])
        .unwrap();
        assert_eq!(group_by_target(&cols), vec![vec![0, 1], vec![2], vec![3]]);
    }

    fn repeated_angles(dt: f64) -> Columns {
        let ti = vec![1.000, 1.001, 1.002];
        let td = ti.iter().map(|t| 2.0 * t).collect();
        Columns::from_fields(vec![
            (Field::V, vec![1.0; 3]),
            (Field::Ti, ti),
            (Field::Td, td),
            (Field::DT, vec![dt; 3]),
            (Field::Ld, vec![4.75; 3]),
            (Field::DL, vec![0.02; 3]),
        ])
        .unwrap()
    }

    #[test]
    fn nearby_angles_merge_only_within_resolution() {
        let tol = Tolerance { q: 0.5, dq: 0.002 };
        let wide = group_by_actual_angles(&repeated_angles(0.01), tol);
        assert_eq!(wide, vec![vec![0, 1, 2]]);
        let narrow = group_by_actual_angles(&repeated_angles(0.0001), tol);
        assert_eq!(narrow, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn resolution_is_split_before_angle() {
        // Two interleaved scans: wide and narrow divergence at nearby angles.
        let cols = Columns::from_fields(vec![
            (Field::V, vec![1.0; 4]),
            (Field::Ti, vec![1.0, 1.001, 1.002, 1.003]),
            (Field::Td, vec![2.0, 2.002, 2.004, 2.006]),
            (Field::DT, vec![0.05, 0.001, 0.05, 0.001]),
            (Field::Ld, vec![4.75; 4]),
            (Field::DL, vec![0.02; 4]),
        ])
        .unwrap();
        let tol = Tolerance { q: 0.5, dq: 0.002 };
        let groups = sorted(group_by_actual_angles(&cols, tol));
        assert_eq!(groups, vec![vec![0, 2], vec![1], vec![3]]);
    }

    /// Interleaved scans: two divergences, a second wavelength, and a pair
    /// of points that share `Ti` but not `Td`.
    fn mixed_scans() -> Vec<(Field, Vec<f64>)> {
        let ti = vec![1.0, 1.001, 1.002, 1.003, 2.0, 2.0005, 0.5, 0.5];
        let mut td: Vec<f64> = ti.iter().map(|t| 2.0 * t).collect();
        td[7] = 1.2;
        vec![
            (Field::V, vec![1.0; 8]),
            (Field::Ti, ti),
            (Field::Td, td),
            (Field::DT, vec![0.05, 0.001, 0.05, 0.001, 0.01, 0.01, 0.01, 0.01]),
            (Field::Ld, vec![4.75, 4.75, 4.75, 4.75, 4.75, 5.0, 4.75, 4.75]),
            (Field::DL, vec![0.02; 8]),
        ]
    }

    fn permuted(fields: &[(Field, Vec<f64>)], perm: &[usize]) -> Columns {
        let rows = fields
            .iter()
            .map(|(f, col)| (*f, perm.iter().map(|&k| col[k]).collect()))
            .collect();
        Columns::from_fields(rows).unwrap()
    }

    #[test]
    fn angle_passes_are_independent_of_row_order() {
        let tol = Tolerance { q: 0.5, dq: 0.002 };
        let fields = mixed_scans();
        let identity: Vec<usize> = (0..8).collect();
        let reference = sorted(group_by_actual_angles(&permuted(&fields, &identity), tol));
        assert_eq!(
            reference,
            vec![vec![0, 2], vec![1], vec![3], vec![4], vec![5], vec![6], vec![7]]
        );

        let reversed: Vec<usize> = (0..8).rev().collect();
        for perm in [reversed, vec![3, 7, 0, 5, 1, 6, 2, 4]] {
            let groups = group_by_actual_angles(&permuted(&fields, &perm), tol);
            // map rows of the permuted columns back to the original rows
            let back = groups
                .into_iter()
                .map(|g| g.into_iter().map(|row| perm[row]).collect())
                .collect();
            assert_eq!(sorted(back), reference, "order {perm:?}");
        }
    }

    #[test]
    fn q_grouping_splits_resolution_then_qz_then_qx() {
        let cols = Columns::from_fields(vec![
            (Field::V, vec![1.0; 5]),
            (Field::Qz, vec![0.0100, 0.01005, 0.0200, 0.01002, 0.0100]),
            (Field::Qx, vec![0.0, 0.0, 0.0, 0.0, 1e-3]),
            (Field::DQ, vec![2e-4, 2e-4, 2e-4, 4e-4, 2e-4]),
        ])
        .unwrap();
        let tol = Tolerance { q: 0.5, dq: 0.002 };
        // 3 is near 0 in Qz but has twice the resolution; 4 is off in Qx
        let groups = sorted(group_by_q(&cols, tol));
        assert_eq!(groups, vec![vec![0, 1], vec![2], vec![3], vec![4]]);

        let loose = Tolerance { q: 10.0, dq: 2.0 };
        let groups = sorted(group_by_q(&cols, loose));
        assert_eq!(groups, vec![vec![0, 1, 3, 4], vec![2]]);
    }
}
