//! Serde model of one reflectometry dataset as handed over by the loaders and
//! correction steps, and as produced by join/rebin.
//!
//! Per-point fields are [`Column`]s: either one value for the whole dataset
//! or one value per point. Optional fields that a loader could not fill are
//! `None` and turn into NaN when the columns are assembled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::combine::columns::{set_q, stack_columns};
use crate::combine::{Field, Normbase};
use crate::{JoinError, JoinResult};

/// A per-point field that may be stored as a single broadcast value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Column {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Default for Column {
    fn default() -> Self {
        Column::Scalar(f64::NAN)
    }
}

impl From<f64> for Column {
    fn from(v: f64) -> Self {
        Column::Scalar(v)
    }
}

impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Self {
        Column::Vector(v)
    }
}

impl Column {
    /// First value, or NaN for an empty vector.
    #[inline]
    pub fn first(&self) -> f64 {
        match self {
            Column::Scalar(v) => *v,
            Column::Vector(v) => v.first().copied().unwrap_or(f64::NAN),
        }
    }

    /// Expand to exactly `n` values.
    ///
    /// Scalars and length-1 vectors are repeated; a vector of any other
    /// length than `n` is a shape error naming `field` and `dataset`.
    pub fn broadcast(&self, n: usize, field: &'static str, dataset: &str) -> JoinResult<Vec<f64>> {
        match self {
            Column::Scalar(v) => Ok(vec![*v; n]),
            Column::Vector(v) if v.len() == 1 => Ok(vec![v[0]; n]),
            Column::Vector(v) if v.len() == n => Ok(v.clone()),
            Column::Vector(v) => Err(JoinError::ShapeMismatch {
                field,
                dataset: dataset.to_string(),
                expected: n,
                got: v.len(),
            }),
        }
    }
}

/// What a measurement was taken for; decides output ordering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Intent {
    /// Normalization scan (direct beam through the slits).
    #[serde(rename = "intensity")]
    Slit,
    #[serde(rename = "specular")]
    Specular,
    #[serde(rename = "background")]
    Background,
    /// Background with the sample rotated.
    #[serde(rename = "background+")]
    BackgroundPlus,
    /// Background with the detector offset.
    #[serde(rename = "background-")]
    BackgroundMinus,
    #[serde(rename = "rock qx")]
    RockQx,
    #[serde(rename = "rock sample")]
    RockSample,
    #[serde(rename = "rock detector")]
    RockDetector,
    #[serde(rename = "detector efficiency")]
    DetectorEfficiency,
    #[serde(rename = "time")]
    Time,
    #[serde(rename = "other")]
    Other,
    #[serde(rename = "scan")]
    Scan,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Slit => "intensity",
            Intent::Specular => "specular",
            Intent::Background => "background",
            Intent::BackgroundPlus => "background+",
            Intent::BackgroundMinus => "background-",
            Intent::RockQx => "rock qx",
            Intent::RockSample => "rock sample",
            Intent::RockDetector => "rock detector",
            Intent::DetectorEfficiency => "detector efficiency",
            Intent::Time => "time",
            Intent::Other => "other",
            Intent::Scan => "scan",
            Intent::Unknown => "unknown",
        }
    }

    #[inline]
    pub fn is_slit(self) -> bool {
        self == Intent::Slit
    }
    #[inline]
    pub fn is_spec(self) -> bool {
        self == Intent::Specular
    }
    #[inline]
    pub fn is_rock(self) -> bool {
        matches!(
            self,
            Intent::RockQx | Intent::RockSample | Intent::RockDetector
        )
    }
    #[inline]
    pub fn is_back(self) -> bool {
        matches!(
            self,
            Intent::Background | Intent::BackgroundPlus | Intent::BackgroundMinus
        )
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Probe {
    #[default]
    Neutron,
    Xray,
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Probe::Neutron => "neutron",
            Probe::Xray => "xray",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Sample {
    pub name: String,
    pub description: String,
    /// Averaged sample environment readings (temperature, field, ...), in
    /// common units across the datasets of one join.
    pub environment: BTreeMap<String, Column>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Slits {
    pub s1: Option<Column>,
    pub s2: Option<Column>,
    pub s3: Option<Column>,
    pub s4: Option<Column>,
    pub s1_target: Option<Column>,
    pub s2_target: Option<Column>,
    /// Distance of slit 1 from the sample (negative upstream).
    pub d1: Option<f64>,
    /// Distance of slit 2 from the sample.
    pub d2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Monitor {
    pub counts: Column,
    pub count_time: Column,
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub roi_counts: Option<Column>,
    #[serde(default)]
    pub source_power: Option<Column>,
    #[serde(default)]
    pub source_power_variance: Option<Column>,
}

/// One dataset: metadata, normalization basis and per-point columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflDataset {
    pub name: String,
    #[serde(default)]
    pub entry: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub polarization: String,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub probe: Probe,
    #[serde(default)]
    pub instrument: String,
    #[serde(default)]
    pub filenumber: Option<u64>,
    #[serde(default)]
    pub sample: Sample,
    /// Start of the measurement, seconds since the epoch.
    #[serde(default)]
    pub date: f64,
    /// Total counting duration, seconds.
    #[serde(default)]
    pub duration: f64,
    pub normbase: Normbase,

    pub v: Vec<f64>,
    pub dv: Vec<f64>,

    /// Incident (sample) angle.
    pub ti: Column,
    #[serde(default)]
    pub ti_target: Option<Column>,
    /// Detector angle.
    pub td: Column,
    #[serde(default)]
    pub td_target: Option<Column>,
    /// 1-σ angular divergence.
    pub dt: Column,
    /// Monochromator wavelength.
    #[serde(default)]
    pub li: Option<Column>,
    /// Detector wavelength.
    pub ld: Column,
    /// 1-σ wavelength dispersion.
    pub dl: Column,
    #[serde(default)]
    pub slits: Slits,
    #[serde(default)]
    pub monitor: Monitor,
    #[serde(default)]
    pub qz_target: Option<Column>,
    /// Explicit Q resolution when it can no longer be derived from the angles
    /// (binned data).
    #[serde(default)]
    pub dq: Option<Vec<f64>>,
    /// `true` for points that take part in the reduction.
    #[serde(default)]
    pub mask: Option<Vec<bool>>,

    /// Number of points in the dataset after the last reduction step.
    #[serde(default)]
    pub points: usize,
    /// Raw points merged into each output point, when produced by a join.
    #[serde(default)]
    pub merged: Option<Vec<usize>>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub detector_counts: Option<Vec<f64>>,
    #[serde(default)]
    pub detector_counts_variance: Option<Vec<f64>>,
}

impl ReflDataset {
    /// A dataset with the given intensities and scalar geometry; everything
    /// else defaults.
    pub fn new(name: impl Into<String>, normbase: Normbase, v: Vec<f64>, dv: Vec<f64>) -> Self {
        let n = v.len();
        ReflDataset {
            name: name.into(),
            entry: String::new(),
            path: None,
            polarization: String::new(),
            intent: Intent::Unknown,
            probe: Probe::Neutron,
            instrument: String::new(),
            filenumber: None,
            sample: Sample::default(),
            date: 0.0,
            duration: 0.0,
            normbase,
            v,
            dv,
            ti: Column::Scalar(f64::NAN),
            ti_target: None,
            td: Column::Scalar(f64::NAN),
            td_target: None,
            dt: Column::Scalar(0.0),
            li: None,
            ld: Column::Scalar(f64::NAN),
            dl: Column::Scalar(0.0),
            slits: Slits::default(),
            monitor: Monitor {
                counts: Column::Scalar(1.0),
                count_time: Column::Scalar(1.0),
                ..Monitor::default()
            },
            qz_target: None,
            dq: None,
            mask: None,
            points: n,
            merged: None,
            warnings: Vec::new(),
            detector_counts: None,
            detector_counts_variance: None,
        }
    }

    /// Number of measured points.
    #[inline]
    pub fn len(&self) -> usize {
        self.v.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }

    /// Specular scan helper: sets `Ti`, `Td = 2·Ti` and their targets.
    pub fn with_specular_angles(mut self, ti: Vec<f64>, dt: impl Into<Column>) -> Self {
        let td: Vec<f64> = ti.iter().map(|t| 2.0 * t).collect();
        self.ti_target = Some(Column::Vector(ti.clone()));
        self.td_target = Some(Column::Vector(td.clone()));
        self.ti = Column::Vector(ti);
        self.td = Column::Vector(td);
        self.dt = dt.into();
        self
    }

    pub fn with_wavelength(mut self, ld: impl Into<Column>, dl: impl Into<Column>) -> Self {
        self.ld = ld.into();
        self.dl = dl.into();
        self
    }

    pub fn with_monitor(mut self, counts: impl Into<Column>, count_time: impl Into<Column>) -> Self {
        self.monitor.counts = counts.into();
        self.monitor.count_time = count_time.into();
        self
    }

    /// `(Qx, Qz, dQ)` for every point; an explicit `dq` takes precedence.
    pub fn q_columns(&self) -> JoinResult<(Vec<f64>, Vec<f64>, Vec<f64>)> {
        let mut columns = stack_columns(&[self])?;
        set_q(&mut columns);
        Ok((
            columns.get(Field::Qx).to_vec(),
            columns.get(Field::Qz).to_vec(),
            columns.get(Field::DQ).to_vec(),
        ))
    }
}
