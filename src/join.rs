//! Dataset-level join and rebin.
//!
//! `join` splits the input into groups that share a metadata key, orders
//! each group's files, and merges each group into one dataset:
//!
//! ```text
//! check normbase → stack columns → mask → Q → group points → combine → sort → build
//! ```
//!
//! `rebin` replaces point grouping with a fixed Q grid.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::combine::columns::{apply_mask, set_q, stack_columns};
use crate::combine::grouping::{group_by_actual_angles, group_by_q, group_by_target};
use crate::combine::sequence::{sort_keys_for, sort_points};
use crate::combine::{
    binning, norm, AverageMode, BinEdges, CombinedPoint, Columns, Combiner, Field,
    GeometryWeights, IntensityRule, Normbase, QGrid, Tolerance,
};
use crate::dataset::{Column, Intent, ReflDataset};
use crate::{JoinError, JoinResult};

/* =============================================================================
 * Options
 * ============================================================================= */

/// Order of the files within a join group; the first file supplies the
/// metadata of the joined dataset.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileOrder {
    #[default]
    File,
    Time,
    Theta,
    Slit,
    None,
}

impl FileOrder {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            FileOrder::File => "file",
            FileOrder::Time => "time",
            FileOrder::Theta => "theta",
            FileOrder::Slit => "slit",
            FileOrder::None => "none",
        }
    }
}

impl fmt::Display for FileOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileOrder {
    type Err = JoinError;

    fn from_str(s: &str) -> JoinResult<Self> {
        match norm(s).as_str() {
            "file" | "name" => Ok(FileOrder::File),
            "time" => Ok(FileOrder::Time),
            "theta" => Ok(FileOrder::Theta),
            "slit" => Ok(FileOrder::Slit),
            "none" => Ok(FileOrder::None),
            _ => Err(JoinError::UnknownMode {
                kind: "order",
                value: s.to_string(),
                expected: "'file', 'time', 'theta', 'slit' or 'none'",
            }),
        }
    }
}

/// Dataset metadata that splits the input into separate joins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GroupKey {
    Polarization,
    Probe,
    Entry,
    FileNumber,
    Instrument,
    Intent,
    SampleName,
    SampleDescription,
}

impl GroupKey {
    pub fn as_str(self) -> &'static str {
        match self {
            GroupKey::Polarization => "polarization",
            GroupKey::Probe => "probe",
            GroupKey::Entry => "entry",
            GroupKey::FileNumber => "filenumber",
            GroupKey::Instrument => "instrument",
            GroupKey::Intent => "intent",
            GroupKey::SampleName => "sample.name",
            GroupKey::SampleDescription => "sample.description",
        }
    }

    /// Parse a comma-separated key list such as `"polarization,sample.name"`.
    /// An empty string means no split.
    pub fn parse_list(s: &str) -> JoinResult<Vec<GroupKey>> {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::parse::<GroupKey>)
            .collect()
    }

    fn value(self, data: &ReflDataset) -> KeyPart {
        match self {
            GroupKey::Polarization => KeyPart::Text(data.polarization.clone()),
            GroupKey::Probe => KeyPart::Text(data.probe.to_string()),
            GroupKey::Entry => KeyPart::Text(data.entry.clone()),
            GroupKey::FileNumber => match data.filenumber {
                Some(n) => KeyPart::Number(n),
                None => KeyPart::Missing,
            },
            GroupKey::Instrument => KeyPart::Text(data.instrument.clone()),
            GroupKey::Intent => KeyPart::Text(data.intent.to_string()),
            GroupKey::SampleName => KeyPart::Text(data.sample.name.clone()),
            GroupKey::SampleDescription => KeyPart::Text(data.sample.description.clone()),
        }
    }
}

impl FromStr for GroupKey {
    type Err = JoinError;

    fn from_str(s: &str) -> JoinResult<Self> {
        match norm(s).as_str() {
            "polarization" => Ok(GroupKey::Polarization),
            "probe" => Ok(GroupKey::Probe),
            "entry" => Ok(GroupKey::Entry),
            "filenumber" => Ok(GroupKey::FileNumber),
            "instrument" => Ok(GroupKey::Instrument),
            "intent" => Ok(GroupKey::Intent),
            "sample.name" => Ok(GroupKey::SampleName),
            "sample.description" => Ok(GroupKey::SampleDescription),
            _ => Err(JoinError::UnknownMode {
                kind: "group_by key",
                value: s.to_string(),
                expected: "'polarization', 'probe', 'entry', 'filenumber', 'instrument', \
'intent', 'sample.name' or 'sample.description'",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum KeyPart {
    Missing,
    Number(u64),
    Text(String),
}

/// Join parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOptions {
    q_tolerance: f64,
    dq_tolerance: f64,
    order: FileOrder,
    group_by: Vec<GroupKey>,
    average: AverageMode,
    by_q: bool,
    weights: GeometryWeights,
    low_count_threshold: f64,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            q_tolerance: 0.5,
            dq_tolerance: 0.002,
            order: FileOrder::File,
            group_by: vec![GroupKey::Polarization],
            average: AverageMode::Poisson,
            by_q: false,
            weights: GeometryWeights::Normbase,
            low_count_threshold: 10.0,
        }
    }
}

impl JoinOptions {
    #[inline]
    pub fn builder() -> JoinOptionsBuilder {
        JoinOptionsBuilder::default()
    }

    #[inline]
    pub fn tolerance(&self) -> Tolerance {
        Tolerance {
            q: self.q_tolerance,
            dq: self.dq_tolerance,
        }
    }
    #[inline]
    pub fn order(&self) -> FileOrder {
        self.order
    }
    #[inline]
    pub fn group_by(&self) -> &[GroupKey] {
        &self.group_by
    }
    #[inline]
    pub fn average(&self) -> AverageMode {
        self.average
    }
    #[inline]
    pub fn by_q(&self) -> bool {
        self.by_q
    }
    #[inline]
    pub fn weights(&self) -> GeometryWeights {
        self.weights
    }
    #[inline]
    pub fn low_count_threshold(&self) -> f64 {
        self.low_count_threshold
    }
}

/// Builder for [`JoinOptions`]; `build` validates the tolerances.
#[derive(Debug, Clone, Default)]
pub struct JoinOptionsBuilder {
    opts: JoinOptions,
}

impl JoinOptionsBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allowed separation, as a multiple of each point's resolution.
    #[inline]
    pub fn q_tolerance(mut self, t: f64) -> Self {
        self.opts.q_tolerance = t;
        self
    }

    /// Allowed difference in resolution, as a multiple of the resolution.
    #[inline]
    pub fn dq_tolerance(mut self, t: f64) -> Self {
        self.opts.dq_tolerance = t;
        self
    }

    /// Set both tolerances at once. `0.0` selects exact target grouping.
    #[inline]
    pub fn tolerance(self, t: f64) -> Self {
        self.q_tolerance(t).dq_tolerance(t)
    }

    #[inline]
    pub fn order(mut self, order: FileOrder) -> Self {
        self.opts.order = order;
        self
    }

    #[inline]
    pub fn group_by(mut self, keys: Vec<GroupKey>) -> Self {
        self.opts.group_by = keys;
        self
    }

    #[inline]
    pub fn average(mut self, average: AverageMode) -> Self {
        self.opts.average = average;
        self
    }

    /// Group in Q instead of in instrument angles.
    #[inline]
    pub fn by_q(mut self, yes: bool) -> Self {
        self.opts.by_q = yes;
        self
    }

    #[inline]
    pub fn weights(mut self, weights: GeometryWeights) -> Self {
        self.opts.weights = weights;
        self
    }

    /// Merged points with fewer implied counts than this draw a warning.
    #[inline]
    pub fn low_count_threshold(mut self, counts: f64) -> Self {
        self.opts.low_count_threshold = counts;
        self
    }

    pub fn build(self) -> JoinResult<JoinOptions> {
        let o = &self.opts;
        for (name, value) in [
            ("q_tolerance", o.q_tolerance),
            ("dq_tolerance", o.dq_tolerance),
            ("low_count_threshold", o.low_count_threshold),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(JoinError::InvalidTolerance { name, value });
            }
        }
        Ok(self.opts)
    }
}

/* =============================================================================
 * File grouping and ordering
 * ============================================================================= */

/// Split `datasets` by the values of `keys`; groups come back in key order,
/// files within a group in input order.
pub fn group_by_key<'a>(datasets: &'a [ReflDataset], keys: &[GroupKey]) -> Vec<Vec<&'a ReflDataset>> {
    let mut groups: BTreeMap<Vec<KeyPart>, Vec<&ReflDataset>> = BTreeMap::new();
    for data in datasets {
        let key = keys.iter().map(|k| k.value(data)).collect();
        groups.entry(key).or_default().push(data);
    }
    groups.into_values().collect()
}

#[inline]
fn first_or_nan(col: Option<&Column>) -> f64 {
    col.map_or(f64::NAN, Column::first)
}

/// Stable sort of a group of files.
pub fn sort_files(group: &mut [&ReflDataset], order: FileOrder) {
    let by_pair = |a: (f64, f64), b: (f64, f64)| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1));
    match order {
        FileOrder::None => {}
        FileOrder::File => group.sort_by(|a, b| a.name.cmp(&b.name)),
        FileOrder::Time => {
            let start = |d: &ReflDataset| d.date + d.monitor.start_time.unwrap_or(0.0);
            group.sort_by(|a, b| start(*a).total_cmp(&start(*b)))
        }
        FileOrder::Theta => {
            let angles = |d: &ReflDataset| (d.ti.first(), d.td.first());
            group.sort_by(|a, b| by_pair(angles(*a), angles(*b)))
        }
        FileOrder::Slit => {
            let slits = |d: &ReflDataset| {
                (
                    first_or_nan(d.slits.s1.as_ref()),
                    first_or_nan(d.slits.s2.as_ref()),
                )
            };
            group.sort_by(|a, b| by_pair(slits(*a), slits(*b)))
        }
    }
}

/* =============================================================================
 * Join
 * ============================================================================= */

/// Join `datasets`: one output dataset per `group_by` key.
pub fn join(datasets: &[ReflDataset], options: &JoinOptions) -> JoinResult<Vec<ReflDataset>> {
    let mut output = Vec::new();
    for mut group in group_by_key(datasets, options.group_by()) {
        sort_files(&mut group, options.order());
        output.push(join_datasets(&group, options)?);
    }
    Ok(output)
}

/// Every dataset in `group` must be normalized the same way.
fn common_normbase(group: &[&ReflDataset]) -> JoinResult<Normbase> {
    let head = group.first().ok_or(JoinError::EmptyGroup {
        context: "no datasets to join",
    })?;
    match group.iter().find(|d| d.normbase != head.normbase) {
        Some(other) => Err(JoinError::MixedNormbase {
            expected: head.normbase,
            found: other.normbase,
            dataset: other.name.clone(),
        }),
        None => Ok(head.normbase),
    }
}

/// Stack, mask and derive Q for the points of `group`.
fn assemble(group: &[&ReflDataset]) -> JoinResult<Columns> {
    let stacked = stack_columns(group)?;
    let mut columns = apply_mask(group, &stacked)?;
    set_q(&mut columns);
    Ok(columns)
}

/// Merge the repeated points of all datasets in `group` into one dataset.
///
/// The first dataset supplies the metadata.
pub fn join_datasets(group: &[&ReflDataset], options: &JoinOptions) -> JoinResult<ReflDataset> {
    let normbase = common_normbase(group)?;
    let head = group[0];
    let columns = assemble(group)?;

    let tol = options.tolerance();
    let groups = if tol.is_exact() {
        group_by_target(&columns)
    } else if options.by_q() {
        group_by_q(&columns, tol)
    } else {
        group_by_actual_angles(&columns, tol)
    };
    log::debug!(
        "join {}: {} points in {} groups",
        head.name,
        columns.len(),
        groups.len()
    );

    let combiner = Combiner::new(normbase, options.average(), options.weights());
    let mut points = combiner.merge_groups(&columns, &groups);
    sort_points(&mut points, &sort_keys_for(head.intent));

    let mut warnings = Vec::new();
    let threshold = options.low_count_threshold();
    if combiner.rule() == IntensityRule::Gauss {
        gauss_count_warning(&points, threshold, &mut warnings);
    } else {
        low_count_warning(&points, threshold, &mut warnings);
    }
    clamp_warning(&points, &mut warnings);
    if group.iter().any(|d| d.polarization != head.polarization) {
        warnings.push(format!(
            "{}: datasets with different polarization were joined",
            head.name
        ));
    }

    let mut data = build_dataset(group, &points, normbase);
    for w in &warnings {
        log::warn!("{}: {w}", data.name);
    }
    data.warnings = warnings;
    Ok(data)
}

fn low_count_warning(points: &[CombinedPoint], threshold: f64, warnings: &mut Vec<String>) {
    let low = points
        .iter()
        .filter(|p| p.points > 1 && p.counts < threshold)
        .count();
    if low > 0 {
        warnings.push(format!(
            "{low} merged points have fewer than {threshold} implied counts; \
their Poisson average may be unreliable"
        ));
    }
}

/// Under Gauss the counts are unknown; `(v/dv)²` stands in for them.
fn gauss_count_warning(points: &[CombinedPoint], threshold: f64, warnings: &mut Vec<String>) {
    let low = points
        .iter()
        .filter(|p| p.points > 1 && (p.v() / p.dv()).powi(2) < threshold)
        .count();
    if low > 0 {
        warnings.push(format!(
            "{low} merged points have a relative uncertainty of fewer than {threshold} \
counts; their Gaussian average may be biased low"
        ));
    }
}

fn clamp_warning(points: &[CombinedPoint], warnings: &mut Vec<String>) {
    let clamped: usize = points.iter().map(|p| p.clamped).sum();
    if clamped > 0 {
        warnings.push(format!(
            "{clamped} negative rates were treated as zero for Poisson averaging"
        ));
    }
}

#[inline]
fn column_of(points: &[CombinedPoint], field: Field) -> Vec<f64> {
    points.iter().map(|p| p.get(field)).collect()
}

/// Keep an optional field only where the head dataset had one.
#[inline]
fn like_head<T>(head: &Option<T>, values: Vec<f64>) -> Option<Column> {
    head.as_ref().map(|_| Column::Vector(values))
}

/// Build the output dataset from the head of `group` and the combined points.
pub fn build_dataset(group: &[&ReflDataset], points: &[CombinedPoint], normbase: Normbase) -> ReflDataset {
    let head = group[0];
    let mut data = head.clone();
    let col = |f: Field| column_of(points, f);

    data.path = None;
    data.points = points.len();
    data.merged = Some(points.iter().map(|p| p.points).collect());
    data.date = group.iter().map(|d| d.date).fold(f64::INFINITY, f64::min);
    data.duration = group.iter().map(|d| d.duration).sum();
    data.polarization = if group.iter().all(|d| d.polarization == head.polarization) {
        head.polarization.clone()
    } else {
        String::new()
    };
    data.warnings = Vec::new();
    data.mask = None;

    let (v, dv) = (col(Field::V), col(Field::Dv));
    let (m, t) = (col(Field::Monitor), col(Field::Time));
    let (counts, variance) = match normbase {
        Normbase::None => (v.clone(), dv.iter().map(|d| d * d).collect()),
        Normbase::Time => (
            v.iter().zip(&t).map(|(v, t)| v * t).collect(),
            dv.iter().zip(&t).map(|(d, t)| (d * t).powi(2)).collect(),
        ),
        // monitor variance taken as the monitor count
        Normbase::Monitor => (
            v.iter().zip(&m).map(|(v, m)| v * m).collect(),
            v.iter()
                .zip(&dv)
                .zip(&m)
                .map(|((v, d), m)| (m * d).powi(2) - v * v * m)
                .collect(),
        ),
        Normbase::Roi | Normbase::Power => (Vec::new(), Vec::new()),
    };
    let reconstructed = matches!(normbase, Normbase::None | Normbase::Time | Normbase::Monitor);
    data.detector_counts = reconstructed.then_some(counts);
    data.detector_counts_variance = reconstructed.then_some(variance);
    data.v = v;
    data.dv = dv;

    data.monitor.counts = Column::Vector(m);
    data.monitor.count_time = Column::Vector(t);
    data.monitor.roi_counts = like_head(&head.monitor.roi_counts, col(Field::Roi));
    data.monitor.source_power = like_head(&head.monitor.source_power, col(Field::SourcePower));
    data.monitor.source_power_variance = like_head(
        &head.monitor.source_power_variance,
        col(Field::SourcePowerVariance),
    );

    data.ti = Column::Vector(col(Field::Ti));
    data.td = Column::Vector(col(Field::Td));
    data.ti_target = Some(Column::Vector(col(Field::TiTarget)));
    data.td_target = Some(Column::Vector(col(Field::TdTarget)));
    data.dt = Column::Vector(col(Field::DT));
    data.li = like_head(&head.li, col(Field::Li));
    data.ld = Column::Vector(col(Field::Ld));
    data.dl = Column::Vector(col(Field::DL));
    data.qz_target = like_head(&head.qz_target, col(Field::QzTarget));
    data.dq = head.dq.as_ref().map(|_| col(Field::DQ));

    data.slits.s1 = like_head(&head.slits.s1, col(Field::S1));
    data.slits.s2 = like_head(&head.slits.s2, col(Field::S2));
    data.slits.s3 = like_head(&head.slits.s3, col(Field::S3));
    data.slits.s4 = like_head(&head.slits.s4, col(Field::S4));
    // per-point targets no longer describe the merged points
    data.slits.s1_target = None;
    data.slits.s2_target = None;

    data.sample.environment = match points.first() {
        Some(p) => p
            .environment
            .keys()
            .map(|name| {
                let values = points.iter().map(|p| p.environment[name]).collect();
                (name.clone(), Column::Vector(values))
            })
            .collect(),
        None => BTreeMap::new(),
    };
    data
}

/* =============================================================================
 * Rebin
 * ============================================================================= */

/// Finite `Qz` range over the unmasked points of `datasets`.
pub fn q_range(datasets: &[ReflDataset]) -> JoinResult<(f64, f64)> {
    let group: Vec<&ReflDataset> = datasets.iter().collect();
    let columns = assemble(&group)?;
    let (lo, hi) = columns
        .get(Field::Qz)
        .iter()
        .filter(|q| q.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &q| {
            (lo.min(q), hi.max(q))
        });
    if lo > hi {
        return Err(JoinError::EmptyGroup {
            context: "no finite Qz to span a grid",
        });
    }
    Ok((lo, hi))
}

/// Merge all points of `datasets` onto the Q grid.
///
/// Points are binned on `Qz` and combined with equal weights; empty bins and
/// catch-all bins are dropped. The result is specular data with
/// `Ti = θ̄`, `Td = 2θ̄` and an explicit `dQ`. A `qstep` of zero skips binning
/// and returns the points sorted by `Qz`.
pub fn rebin(datasets: &[ReflDataset], grid: &QGrid, average: AverageMode) -> JoinResult<ReflDataset> {
    let group: Vec<&ReflDataset> = datasets.iter().collect();
    let normbase = common_normbase(&group)?;
    let columns = assemble(&group)?;
    let combiner = Combiner::new(normbase, average, GeometryWeights::Equal);

    let mut warnings = Vec::new();
    let mut points = if grid.is_nobin() {
        let singles: Vec<Vec<usize>> = (0..columns.len()).map(|i| vec![i]).collect();
        combiner.merge_groups(&columns, &singles)
    } else {
        let edges: BinEdges = grid.edges(true)?;
        let assignment = binning::assign(&edges, columns.get(Field::Qz));
        let outside = assignment.unassigned() + assignment.in_catch_all(&edges);
        if outside > 0 {
            warnings.push(format!(
                "{outside} points outside Q range [{}, {}] were discarded",
                grid.qmin, grid.qmax
            ));
        }
        combiner
            .merge_groups(&columns, &assignment.groups())
            .into_iter()
            .enumerate()
            .filter(|(bin, p)| !p.is_masked() && !edges.is_catch_all(*bin))
            .map(|(_, p)| p)
            .collect()
    };
    sort_points(&mut points, &sort_keys_for(Intent::Specular));
    if combiner.rule().infers_counts() {
        clamp_warning(&points, &mut warnings);
    }

    let mut data = build_dataset(&group, &points, normbase);
    let theta: Vec<f64> = points.iter().map(|p| p.theta).collect();
    let two_theta: Vec<f64> = theta.iter().map(|t| 2.0 * t).collect();
    data.intent = Intent::Specular;
    data.ti_target = Some(Column::Vector(theta.clone()));
    data.td_target = Some(Column::Vector(two_theta.clone()));
    data.ti = Column::Vector(theta);
    data.td = Column::Vector(two_theta);
    data.dq = Some(column_of(&points, Field::DQ));
    for w in &warnings {
        log::warn!("{}: {w}", data.name);
    }
    data.warnings = warnings;
    Ok(data)
}
