//! Column assembly: flatten a group of datasets into one arena of per-point
//! columns that grouping, binning and combination index into.

use std::collections::BTreeMap;

use crate::combine::geometry::{divergence_simple, dtdl_to_dq, ti_td_l_to_qxz};
use crate::dataset::{Column, ReflDataset};
use crate::{JoinError, JoinResult};

/// Per-point fields carried through a combination.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    V,
    Dv,
    Ti,
    TiTarget,
    Td,
    TdTarget,
    DT,
    /// Divergence implied by the target slit openings.
    DtTarget,
    Li,
    Ld,
    DL,
    Monitor,
    Time,
    Roi,
    SourcePower,
    SourcePowerVariance,
    QzTarget,
    S1,
    S2,
    S3,
    S4,
    Qx,
    Qz,
    DQ,
}

impl Field {
    pub const COUNT: usize = 24;

    pub const ALL: [Field; Field::COUNT] = [
        Field::V,
        Field::Dv,
        Field::Ti,
        Field::TiTarget,
        Field::Td,
        Field::TdTarget,
        Field::DT,
        Field::DtTarget,
        Field::Li,
        Field::Ld,
        Field::DL,
        Field::Monitor,
        Field::Time,
        Field::Roi,
        Field::SourcePower,
        Field::SourcePowerVariance,
        Field::QzTarget,
        Field::S1,
        Field::S2,
        Field::S3,
        Field::S4,
        Field::Qx,
        Field::Qz,
        Field::DQ,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::V => "v",
            Field::Dv => "dv",
            Field::Ti => "Ti",
            Field::TiTarget => "Ti_target",
            Field::Td => "Td",
            Field::TdTarget => "Td_target",
            Field::DT => "dT",
            Field::DtTarget => "dT_target",
            Field::Li => "Li",
            Field::Ld => "Ld",
            Field::DL => "dL",
            Field::Monitor => "monitor",
            Field::Time => "time",
            Field::Roi => "roi",
            Field::SourcePower => "source_power",
            Field::SourcePowerVariance => "source_power_variance",
            Field::QzTarget => "Qz_target",
            Field::S1 => "s1",
            Field::S2 => "s2",
            Field::S3 => "s3",
            Field::S4 => "s4",
            Field::Qx => "Qx",
            Field::Qz => "Qz",
            Field::DQ => "dQ",
        }
    }
}

/// Struct-of-arrays view over every point of a group of datasets.
///
/// All columns (including environment columns) have the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Columns {
    data: [Vec<f64>; Field::COUNT],
    pub environment: BTreeMap<String, Vec<f64>>,
}

impl Columns {
    #[inline]
    pub fn len(&self) -> usize {
        self.data[Field::V as usize].len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn get(&self, field: Field) -> &[f64] {
        &self.data[field as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, field: Field) -> &mut Vec<f64> {
        &mut self.data[field as usize]
    }

    /// Build columns directly from vectors; missing fields are NaN.
    ///
    /// Every provided vector must have the length of `v`.
    pub fn from_fields(fields: Vec<(Field, Vec<f64>)>) -> JoinResult<Self> {
        let n = fields
            .iter()
            .find(|(f, _)| *f == Field::V)
            .map(|(_, v)| v.len())
            .ok_or(JoinError::EmptyGroup {
                context: "columns without intensities",
            })?;
        let mut out = Columns::default();
        for f in Field::ALL {
            out.data[f as usize] = vec![f64::NAN; n];
        }
        for (f, v) in fields {
            if v.len() != n {
                return Err(JoinError::ShapeMismatch {
                    field: f.name(),
                    dataset: "columns".into(),
                    expected: n,
                    got: v.len(),
                });
            }
            out.data[f as usize] = v;
        }
        Ok(out)
    }

    /// Keep only rows where `keep[i]` is true (copy-on-write).
    pub fn select(&self, keep: &[bool]) -> Columns {
        debug_assert_eq!(keep.len(), self.len());
        let pick = |v: &Vec<f64>| -> Vec<f64> {
            v.iter()
                .zip(keep)
                .filter_map(|(x, &k)| k.then_some(*x))
                .collect()
        };
        Columns {
            data: std::array::from_fn(|i| pick(&self.data[i])),
            environment: self
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), pick(v)))
                .collect(),
        }
    }
}

#[inline]
fn optional(
    col: Option<&Column>,
    n: usize,
    field: &'static str,
    dataset: &str,
) -> JoinResult<Vec<f64>> {
    match col {
        Some(c) => c.broadcast(n, field, dataset),
        None => Ok(vec![f64::NAN; n]),
    }
}

/// Target divergence from the target openings of slits 1 and 2, when the
/// dataset records them; otherwise the measured divergence.
fn target_divergence(data: &ReflDataset, dt: &[f64], n: usize) -> JoinResult<Vec<f64>> {
    let slits = &data.slits;
    match (&slits.s1_target, &slits.s2_target, slits.d1, slits.d2) {
        (Some(s1), Some(s2), Some(d1), Some(d2)) if d1 != d2 => {
            let s1 = s1.broadcast(n, "s1_target", &data.name)?;
            let s2 = s2.broadcast(n, "s2_target", &data.name)?;
            Ok(s1
                .iter()
                .zip(&s2)
                .map(|(&a, &b)| divergence_simple(a, b, d1, d2))
                .collect())
        }
        _ => Ok(dt.to_vec()),
    }
}

/// Stack one dataset's fields, in [`Field::ALL`] order.
fn dataset_fields(data: &ReflDataset) -> JoinResult<[Vec<f64>; Field::COUNT]> {
    let n = data.len();
    let name = data.name.as_str();
    if data.dv.len() != n {
        return Err(JoinError::ShapeMismatch {
            field: "dv",
            dataset: name.to_string(),
            expected: n,
            got: data.dv.len(),
        });
    }
    let ti = data.ti.broadcast(n, "Ti", name)?;
    let td = data.td.broadcast(n, "Td", name)?;
    let dt = data.dt.broadcast(n, "dT", name)?;
    // A missing target means the instrument was driven to where it reads.
    let ti_target = match &data.ti_target {
        Some(c) => c.broadcast(n, "Ti_target", name)?,
        None => ti.clone(),
    };
    let td_target = match &data.td_target {
        Some(c) => c.broadcast(n, "Td_target", name)?,
        None => td.clone(),
    };
    let dt_target = target_divergence(data, &dt, n)?;
    let dq = match &data.dq {
        Some(v) if v.len() == n => v.clone(),
        Some(v) => {
            return Err(JoinError::ShapeMismatch {
                field: "dQ",
                dataset: name.to_string(),
                expected: n,
                got: v.len(),
            })
        }
        None => vec![f64::NAN; n],
    };
    let m = &data.monitor;
    Ok([
        data.v.clone(),
        data.dv.clone(),
        ti,
        ti_target,
        td,
        td_target,
        dt,
        dt_target,
        optional(data.li.as_ref(), n, "Li", name)?,
        data.ld.broadcast(n, "Ld", name)?,
        data.dl.broadcast(n, "dL", name)?,
        m.counts.broadcast(n, "monitor", name)?,
        m.count_time.broadcast(n, "time", name)?,
        optional(m.roi_counts.as_ref(), n, "roi", name)?,
        optional(m.source_power.as_ref(), n, "source_power", name)?,
        optional(
            m.source_power_variance.as_ref(),
            n,
            "source_power_variance",
            name,
        )?,
        optional(data.qz_target.as_ref(), n, "Qz_target", name)?,
        optional(data.slits.s1.as_ref(), n, "s1", name)?,
        optional(data.slits.s2.as_ref(), n, "s2", name)?,
        optional(data.slits.s3.as_ref(), n, "s3", name)?,
        optional(data.slits.s4.as_ref(), n, "s4", name)?,
        vec![f64::NAN; n],
        vec![f64::NAN; n],
        dq,
    ])
}

/// Sample environment names recorded by every dataset in the group.
fn common_environment(group: &[&ReflDataset]) -> Vec<String> {
    let Some(head) = group.first() else {
        return Vec::new();
    };
    head.sample
        .environment
        .keys()
        .filter(|k| {
            group
                .iter()
                .all(|d| d.sample.environment.contains_key(k.as_str()))
        })
        .cloned()
        .collect()
}

/// Concatenate every field of every dataset into flat columns.
///
/// Scalars are broadcast to the dataset length; any vector field whose length
/// differs from the dataset's `v` is a [`JoinError::ShapeMismatch`].
pub fn stack_columns(group: &[&ReflDataset]) -> JoinResult<Columns> {
    let mut out = Columns::default();
    for data in group {
        let fields = dataset_fields(data)?;
        for (dst, src) in out.data.iter_mut().zip(fields) {
            dst.extend(src);
        }
    }
    for env_name in common_environment(group) {
        let mut col = Vec::with_capacity(out.len());
        for data in group {
            let n = data.len();
            let values = &data.sample.environment[&env_name];
            // Environment names are dynamic; report them generically.
            col.extend(values.broadcast(n, "environment", &data.name)?);
        }
        out.environment.insert(env_name, col);
    }
    Ok(out)
}

/// Drop points that are masked out or whose intensity is not finite.
pub fn apply_mask(group: &[&ReflDataset], columns: &Columns) -> JoinResult<Columns> {
    let mut keep = Vec::with_capacity(columns.len());
    for data in group {
        match &data.mask {
            Some(mask) if mask.len() != data.len() => {
                return Err(JoinError::ShapeMismatch {
                    field: "mask",
                    dataset: data.name.clone(),
                    expected: data.len(),
                    got: mask.len(),
                })
            }
            Some(mask) => keep.extend(mask.iter().zip(&data.v).map(|(&m, v)| m && v.is_finite())),
            None => keep.extend(data.v.iter().map(|v| v.is_finite())),
        }
    }
    if keep.iter().all(|&k| k) {
        return Ok(columns.clone());
    }
    let dropped = keep.iter().filter(|&&k| !k).count();
    log::debug!("apply_mask: dropping {dropped} of {} points", keep.len());
    Ok(columns.select(&keep))
}

/// Fill `Qx`, `Qz` and `dQ` from the instrument geometry.
///
/// A finite `dQ` already present (explicit resolution from binned data) is kept.
pub fn set_q(columns: &mut Columns) {
    let n = columns.len();
    let mut qx = Vec::with_capacity(n);
    let mut qz = Vec::with_capacity(n);
    let mut dq = Vec::with_capacity(n);
    {
        let (ti, td, dt) = (
            columns.get(Field::Ti),
            columns.get(Field::Td),
            columns.get(Field::DT),
        );
        let (ld, dl, dq_in) = (
            columns.get(Field::Ld),
            columns.get(Field::DL),
            columns.get(Field::DQ),
        );
        for i in 0..n {
            let (x, z) = ti_td_l_to_qxz(ti[i], td[i], ld[i]);
            qx.push(x);
            qz.push(z);
            dq.push(if dq_in[i].is_finite() {
                dq_in[i]
            } else {
                dtdl_to_dq(td[i] - ti[i], dt[i], ld[i], dl[i])
            });
        }
    }
    *columns.get_mut(Field::Qx) = qx;
    *columns.get_mut(Field::Qz) = qz;
    *columns.get_mut(Field::DQ) = dq;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combine::Normbase;
    use approx::assert_relative_eq;

    fn scan(name: &str, ti: Vec<f64>) -> ReflDataset {
        let n = ti.len();
        ReflDataset::new(name, Normbase::Monitor, vec![1.0; n], vec![0.1; n])
            .with_specular_angles(ti, 0.01)
            .with_wavelength(4.75, 0.02)
            .with_monitor(1000.0, 10.0)
    }

    #[test]
    fn stacks_datasets_in_order_and_broadcasts_scalars() {
        let a = scan("a", vec![0.1, 0.2]);
        let b = scan("b", vec![0.3]);
        let cols = stack_columns(&[&a, &b]).unwrap();
        assert_eq!(cols.len(), 3);
        assert_eq!(cols.get(Field::Ti), &[0.1, 0.2, 0.3]);
        assert_eq!(cols.get(Field::Ld), &[4.75; 3]);
        assert_eq!(cols.get(Field::Monitor), &[1000.0; 3]);
        assert!(cols.get(Field::Li).iter().all(|x| x.is_nan()));
        // no slit targets recorded: the target divergence is the measured one
        assert_eq!(cols.get(Field::DtTarget), cols.get(Field::DT));
    }

    #[test]
    fn shape_mismatch_names_field_and_dataset() {
        let mut a = scan("bad.ng1", vec![0.1, 0.2, 0.3]);
        a.dt = Column::Vector(vec![0.01, 0.02]);
        let err = stack_columns(&[&a]).unwrap_err();
        assert!(matches!(
            err,
            JoinError::ShapeMismatch { field: "dT", expected: 3, got: 2, .. }
        ));
    }

    #[test]
    fn mask_and_non_finite_intensity_are_dropped() {
        let mut a = scan("a", vec![0.1, 0.2, 0.3]);
        a.mask = Some(vec![true, false, true]);
        let mut b = scan("b", vec![0.4, 0.5]);
        b.v[1] = f64::NAN;
        let cols = stack_columns(&[&a, &b]).unwrap();
        let kept = apply_mask(&[&a, &b], &cols).unwrap();
        assert_eq!(kept.get(Field::Ti), &[0.1, 0.3, 0.4]);
        // the input columns are untouched
        assert_eq!(cols.len(), 5);
    }

    #[test]
    fn environment_kept_only_when_every_dataset_has_it() {
        let mut a = scan("a", vec![0.1]);
        let mut b = scan("b", vec![0.2]);
        a.sample.environment.insert("temperature".into(), Column::Scalar(300.0));
        a.sample.environment.insert("field".into(), Column::Scalar(0.5));
        b.sample.environment.insert("temperature".into(), Column::Scalar(301.0));
        let cols = stack_columns(&[&a, &b]).unwrap();
        assert_eq!(cols.environment.len(), 1);
        assert_eq!(cols.environment["temperature"], vec![300.0, 301.0]);
    }

    #[test]
    fn target_divergence_from_slits() {
        let mut a = scan("a", vec![0.1, 0.2]);
        a.slits.s1_target = Some(Column::Scalar(1.0));
        a.slits.s2_target = Some(Column::Vector(vec![1.0, 2.0]));
        a.slits.d1 = Some(-1500.0);
        a.slits.d2 = Some(-500.0);
        let cols = stack_columns(&[&a]).unwrap();
        let dt = cols.get(Field::DtTarget);
        assert_relative_eq!(dt[0], divergence_simple(1.0, 1.0, -1500.0, -500.0));
        assert!(dt[1] > dt[0]);
    }

    #[test]
    fn set_q_keeps_explicit_resolution() {
        let mut a = scan("a", vec![0.5, 1.0]);
        a.dq = Some(vec![0.001, f64::NAN]);
        let mut cols = stack_columns(&[&a]).unwrap();
        set_q(&mut cols);
        assert_eq!(cols.get(Field::DQ)[0], 0.001);
        let derived = dtdl_to_dq(1.0, 0.01, 4.75, 0.02);
        assert_relative_eq!(cols.get(Field::DQ)[1], derived, max_relative = 1e-12);
        assert!(cols.get(Field::Qz)[1] > cols.get(Field::Qz)[0]);
    }
}
