//! JSON configuration for join and rebin, and dataset file loading.
//!
//! Every field has a default, so `{}` is a valid config:
//!
//! ```json
//! {
//!   "q_tolerance": 0.5, "dq_tolerance": 0.002,
//!   "order": "file", "group_by": "polarization",
//!   "average": "poisson", "by_q": false, "weights": "normbase",
//!   "low_count_threshold": 10,
//!   "rebin": { "qstep": 0.003, "qstep_max": null, "average": "gauss" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::combine::{AverageMode, GeometryWeights, QGrid};
use crate::dataset::ReflDataset;
use crate::join::{q_range, FileOrder, GroupKey, JoinOptions};
use crate::{JoinError, JoinResult};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Invalid(#[from] JoinError),
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    pub q_tolerance: f64,
    pub dq_tolerance: f64,
    /// Older single tolerance; when set it overrides both tolerances.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    pub order: FileOrder,
    /// Comma-separated [`GroupKey`] list.
    pub group_by: String,
    pub average: AverageMode,
    pub by_q: bool,
    pub weights: GeometryWeights,
    pub low_count_threshold: f64,
    pub rebin: RebinConfig,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            q_tolerance: 0.5,
            dq_tolerance: 0.002,
            tolerance: None,
            order: FileOrder::File,
            group_by: "polarization".into(),
            average: AverageMode::Poisson,
            by_q: false,
            weights: GeometryWeights::Normbase,
            low_count_threshold: 10.0,
            rebin: RebinConfig::default(),
        }
    }
}

impl JoinConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg: JoinConfig = read_json(path)?;
        // surface bad values at load time rather than at first use
        cfg.to_options()?;
        Ok(cfg)
    }

    pub fn to_options(&self) -> JoinResult<JoinOptions> {
        let mut builder = JoinOptions::builder()
            .q_tolerance(self.q_tolerance)
            .dq_tolerance(self.dq_tolerance)
            .order(self.order)
            .group_by(GroupKey::parse_list(&self.group_by)?)
            .average(self.average)
            .by_q(self.by_q)
            .weights(self.weights)
            .low_count_threshold(self.low_count_threshold);
        if let Some(t) = self.tolerance {
            builder = builder.tolerance(t);
        }
        builder.build()
    }
}

/// Q grid settings; missing limits are taken from the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebinConfig {
    pub qmin: Option<f64>,
    pub qmax: Option<f64>,
    /// Step at `qmin`; `0` disables binning.
    pub qstep: f64,
    /// Step at `qmax`; `None` keeps the step constant.
    pub qstep_max: Option<f64>,
    pub average: AverageMode,
}

impl Default for RebinConfig {
    fn default() -> Self {
        Self {
            qmin: None,
            qmax: None,
            qstep: 0.003,
            qstep_max: None,
            average: AverageMode::Gauss,
        }
    }
}

impl RebinConfig {
    /// Resolve the grid, filling missing limits from the `Qz` range of `datasets`.
    pub fn grid_for(&self, datasets: &[ReflDataset]) -> JoinResult<QGrid> {
        if self.qstep == 0.0 {
            return QGrid::new(f64::NAN, f64::NAN, 0.0, None);
        }
        let (qmin, qmax) = match (self.qmin, self.qmax) {
            (Some(lo), Some(hi)) => (lo, hi),
            (lo, hi) => {
                let (data_lo, data_hi) = q_range(datasets)?;
                (lo.unwrap_or(data_lo), hi.unwrap_or(data_hi))
            }
        };
        QGrid::new(qmin, qmax, self.qstep, self.qstep_max)
    }
}

/// Read datasets from a JSON file holding either one dataset or a list.
pub fn read_datasets(path: &Path) -> Result<Vec<ReflDataset>, ConfigError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<ReflDataset>),
        One(Box<ReflDataset>),
    }
    Ok(match read_json(path)? {
        OneOrMany::Many(list) => list,
        OneOrMany::One(data) => vec![*data],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combine::Normbase;

    #[test]
    fn empty_config_gives_defaults() {
        let cfg: JoinConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, JoinConfig::default());
        assert_eq!(cfg.to_options().unwrap(), JoinOptions::default());
    }

    #[test]
    fn legacy_tolerance_overrides_both() {
        let cfg: JoinConfig = serde_json::from_str(r#"{"tolerance": 0.0}"#).unwrap();
        assert!(cfg.to_options().unwrap().tolerance().is_exact());
    }

    #[test]
    fn bad_values_are_reported() {
        let cfg: JoinConfig = serde_json::from_str(r#"{"q_tolerance": -1}"#).unwrap();
        assert!(matches!(
            cfg.to_options(),
            Err(JoinError::InvalidTolerance {
                name: "q_tolerance",
                ..
            })
        ));
        let cfg: JoinConfig = serde_json::from_str(r#"{"group_by": "colour"}"#).unwrap();
        assert!(cfg.to_options().is_err());
        assert!(serde_json::from_str::<JoinConfig>(r#"{"order": "random"}"#).is_err());
    }

    #[test]
    fn rebin_limits_come_from_data() {
        let data = ReflDataset::new("a", Normbase::Monitor, vec![1.0, 1.0], vec![0.1, 0.1])
            .with_specular_angles(vec![0.5, 1.0], 0.01)
            .with_wavelength(4.75, 0.02);
        let rebin = RebinConfig {
            qmin: Some(0.0),
            ..RebinConfig::default()
        };
        let grid = rebin.grid_for(&[data]).unwrap();
        assert_eq!(grid.qmin, 0.0);
        let qz_max = crate::combine::geometry::theta_l_to_q(1.0, 4.75);
        assert!((grid.qmax - qz_max).abs() < 1e-12);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = JoinConfig::load(Path::new("/nonexistent/refl-join.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("refl-join.json"));
    }
}
