use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{JoinError, JoinResult};

/// The quantity used to turn raw detector counts into a rate.
///
/// Fixed per dataset; every dataset joined into one output must share it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")] // "monitor" | "time" | "roi" | "power" | "none"
pub enum Normbase {
    /// Counts per monitor count.
    #[default]
    Monitor,
    /// Counts per second of counting time.
    Time,
    /// Counts per region-of-interest count on a reference detector.
    Roi,
    /// Counts per unit of integrated source power.
    Power,
    /// Unnormalized counts.
    None,
}

impl Normbase {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Normbase::Monitor => "monitor",
            Normbase::Time => "time",
            Normbase::Roi => "roi",
            Normbase::Power => "power",
            Normbase::None => "none",
        }
    }
}

impl fmt::Display for Normbase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Normbase {
    type Err = JoinError;

    fn from_str(s: &str) -> JoinResult<Self> {
        match norm(s).as_str() {
            "monitor" => Ok(Normbase::Monitor),
            "time" => Ok(Normbase::Time),
            "roi" => Ok(Normbase::Roi),
            "power" | "sourcepower" => Ok(Normbase::Power),
            "none" => Ok(Normbase::None),
            _ => Err(JoinError::UnknownMode {
                kind: "normbase",
                value: s.to_string(),
                expected: "'monitor', 'time', 'roi', 'power' or 'none'",
            }),
        }
    }
}

/// How intensities of merged points are averaged.
///
/// `Poisson` infers counts and monitors from each rate and its uncertainty;
/// use `Gauss` once the Poisson relationship is gone (after background
/// subtraction or other non-linear corrections).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AverageMode {
    #[default]
    Poisson,
    Gauss,
}

impl AverageMode {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            AverageMode::Poisson => "poisson",
            AverageMode::Gauss => "gauss",
        }
    }
}

impl fmt::Display for AverageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AverageMode {
    type Err = JoinError;

    fn from_str(s: &str) -> JoinResult<Self> {
        match norm(s).as_str() {
            "poisson" => Ok(AverageMode::Poisson),
            "gauss" | "gaussian" => Ok(AverageMode::Gauss),
            _ => Err(JoinError::UnknownMode {
                kind: "average",
                value: s.to_string(),
                expected: "'poisson' or 'gauss'",
            }),
        }
    }
}

/// Weights used for the geometry moments (angles, wavelength, Q) of a merged point.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeometryWeights {
    /// Every point counts the same.
    Equal,
    /// Weight by measured intensity (negative rates count as zero).
    Intensity,
    /// Weight by the normalization column (monitor, time, roi, power), or by
    /// counts for unnormalized data.
    #[default]
    Normbase,
}

impl FromStr for GeometryWeights {
    type Err = JoinError;

    fn from_str(s: &str) -> JoinResult<Self> {
        match norm(s).as_str() {
            "equal" => Ok(GeometryWeights::Equal),
            "intensity" => Ok(GeometryWeights::Intensity),
            "normbase" => Ok(GeometryWeights::Normbase),
            _ => Err(JoinError::UnknownMode {
                kind: "weights",
                value: s.to_string(),
                expected: "'equal', 'intensity' or 'normbase'",
            }),
        }
    }
}

/// Lowercase/normalize a free-form string by removing `_`, `-` and spaces.
#[inline]
pub(crate) fn norm(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace(['_', '-', ' '], "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_strings_loosely() {
        assert_eq!("Monitor".parse::<Normbase>().unwrap(), Normbase::Monitor);
        assert_eq!(" source_power ".parse::<Normbase>().unwrap(), Normbase::Power);
        assert_eq!("GAUSS".parse::<AverageMode>().unwrap(), AverageMode::Gauss);
        assert_eq!(
            "intensity".parse::<GeometryWeights>().unwrap(),
            GeometryWeights::Intensity
        );
    }

    #[test]
    fn unknown_mode_names_the_offending_value() {
        let err = "counts".parse::<Normbase>().unwrap_err();
        match &err {
            JoinError::UnknownMode { kind, value, .. } => {
                assert_eq!(*kind, "normbase");
                assert_eq!(value, "counts");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("counts"));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let s = serde_json::to_string(&Normbase::Time).unwrap();
        assert_eq!(s, "\"time\"");
        let back: AverageMode = serde_json::from_str("\"gauss\"").unwrap();
        assert_eq!(back, AverageMode::Gauss);
    }
}
