use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use msntree::{MspDialect, PeakListContainer, Polarity, TreeFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgTreeFormat {
    #[default]
    /// Node-link JSON, one tree per line
    Json,
    /// Graph Modelling Language
    Gml,
}

impl From<ArgTreeFormat> for TreeFormat {
    fn from(value: ArgTreeFormat) -> Self {
        match value {
            ArgTreeFormat::Json => TreeFormat::Json,
            ArgTreeFormat::Gml => TreeFormat::Gml,
        }
    }
}

impl Display for ArgTreeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        TreeFormat::from(*self).fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgContainer {
    #[default]
    Json,
    /// `<name>_<stage>.hdf5` files, needs a build with `--features hdf5`
    Hdf5,
}

impl From<ArgContainer> for PeakListContainer {
    fn from(value: ArgContainer) -> Self {
        match value {
            ArgContainer::Json => PeakListContainer::Json,
            ArgContainer::Hdf5 => PeakListContainer::Hdf5,
        }
    }
}

impl Display for ArgContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        PeakListContainer::from(*self).fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgMspDialect {
    #[default]
    /// MassBank record fields
    Massbank,
    /// Generic NIST-style MSP fields
    Msp,
}

impl From<ArgMspDialect> for MspDialect {
    fn from(value: ArgMspDialect) -> Self {
        match value {
            ArgMspDialect::Massbank => MspDialect::MassBank,
            ArgMspDialect::Msp => MspDialect::Msp,
        }
    }
}

impl Display for ArgMspDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        MspDialect::from(*self).fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgPolarity {
    #[default]
    Positive,
    Negative,
}

impl From<ArgPolarity> for Polarity {
    fn from(value: ArgPolarity) -> Self {
        match value {
            ArgPolarity::Positive => Polarity::Positive,
            ArgPolarity::Negative => Polarity::Negative,
        }
    }
}

impl Display for ArgPolarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Polarity::from(*self).fmt(f)
    }
}

/// Which conversion stage the spectral text library is written from
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgMspSource {
    #[default]
    /// One record per header group
    Unmerged,
    /// One record per tree, from the merged peak lists
    Merged,
    /// The header group records, then the merged and MS1 precursor records
    All,
}

impl Display for ArgMspSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgMspSource::Unmerged => f.write_str("unmerged"),
            ArgMspSource::Merged => f.write_str("merged"),
            ArgMspSource::All => f.write_str("all"),
        }
    }
}

pub(crate) fn positive_float_f64(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value <= 0.0 || !value.is_finite() {
        Err(format!("`{s}` is not a positive number"))
    } else {
        Ok(value)
    }
}

pub(crate) const fn default_ppm() -> f64 {
    5.0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_positive_float() {
        assert_eq!(positive_float_f64("2.5"), Ok(2.5));
        assert!(positive_float_f64("0").is_err());
        assert!(positive_float_f64("-1").is_err());
        assert!(positive_float_f64("inf").is_err());
        assert!(positive_float_f64("ppm").is_err());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(MspDialect::from(ArgMspDialect::Massbank), MspDialect::MassBank);
        assert_eq!(ArgContainer::Hdf5.to_string(), "hdf5");
        assert_eq!(ArgTreeFormat::Gml.to_string(), "gml");
        assert_eq!(Polarity::from(ArgPolarity::Negative), Polarity::Negative);
        assert_eq!(
            ArgMspSource::from_str("merged", false),
            Ok(ArgMspSource::Merged)
        );
        assert_eq!(ArgMspSource::All.to_string(), "all");
    }
}
