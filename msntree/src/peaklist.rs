//! Peak lists produced from trees, and the metadata they carry into storage and export.
use std::collections::BTreeMap;

use indexmap::IndexMap;
use mzpeaks::prelude::*;
use mzpeaks::{CentroidPeak, MZPeakSetType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attributes::FormulaSummary;

/// A parallel per-peak attribute column
#[derive(Debug, Clone, PartialEq)]
pub enum PeakColumn {
    Float(Vec<f64>),
    Integer(Vec<i64>),
    Text(Vec<String>),
}

impl PeakColumn {
    pub fn len(&self) -> usize {
        match self {
            PeakColumn::Float(v) => v.len(),
            PeakColumn::Integer(v) => v.len(),
            PeakColumn::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the value at `index` for text output
    pub fn format_value(&self, index: usize) -> Option<String> {
        match self {
            PeakColumn::Float(v) => v.get(index).map(|x| format!("{x:?}")),
            PeakColumn::Integer(v) => v.get(index).map(|i| i.to_string()),
            PeakColumn::Text(v) => v.get(index).cloned(),
        }
    }
}

impl From<Vec<f64>> for PeakColumn {
    fn from(value: Vec<f64>) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<i64>> for PeakColumn {
    fn from(value: Vec<i64>) -> Self {
        Self::Integer(value)
    }
}

impl From<Vec<String>> for PeakColumn {
    fn from(value: Vec<String>) -> Self {
        Self::Text(value)
    }
}

/// Details of the scan a peak list's precursor was selected from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecursorDetail {
    pub mz: f64,
    /// `"<tree id> <parent header>"`
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<FormulaSummary>,
}

impl PrecursorDetail {
    pub fn new(mz: f64, id: String, formula: Option<FormulaSummary>) -> Self {
        Self { mz, id, formula }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakListMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms_level: Option<u8>,
    /// Precursor details keyed by the MS level of the parent scan
    #[serde(default)]
    pub parent: BTreeMap<u8, PrecursorDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert_id: Option<u32>,
}

impl PeakListMetadata {
    /// The precursor detail of the lowest MS level parent
    pub fn lowest_parent(&self) -> Option<(&u8, &PrecursorDetail)> {
        self.parent.iter().next()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PeakListError {
    #[error("Attribute {name:?} has {found} values, but the peak list has {expected} peaks")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Attribute {0:?} already exists")]
    DuplicateAttribute(String),
    #[error("The peak list has {expected} peaks but {found} intensities")]
    IntensityMismatch { expected: usize, found: usize },
}

/// A centroided peak list with optional parallel attribute columns
#[derive(Debug, Clone)]
pub struct PeakList {
    pub id: String,
    pub peaks: MZPeakSetType<CentroidPeak>,
    attributes: IndexMap<String, PeakColumn>,
    flags: Vec<bool>,
    pub metadata: PeakListMetadata,
}

impl PeakList {
    /// Build a peak list, sorting `peaks` by m/z. All peaks start out retained.
    pub fn new(id: impl Into<String>, peaks: Vec<CentroidPeak>) -> Self {
        let peaks = MZPeakSetType::new(peaks);
        let flags = vec![true; peaks.len()];
        Self {
            id: id.into(),
            peaks,
            attributes: IndexMap::new(),
            flags,
            metadata: PeakListMetadata::default(),
        }
    }

    /// Build a peak list from parallel m/z and intensity sequences
    pub fn from_arrays(
        id: impl Into<String>,
        mz: &[f64],
        intensity: &[f32],
    ) -> Result<Self, PeakListError> {
        if mz.len() != intensity.len() {
            return Err(PeakListError::IntensityMismatch {
                expected: mz.len(),
                found: intensity.len(),
            });
        }
        let peaks = mz
            .iter()
            .zip(intensity.iter())
            .enumerate()
            .map(|(i, (mz, inten))| CentroidPeak::new(*mz, *inten, i as u32))
            .collect();
        Ok(Self::new(id, peaks))
    }

    pub fn with_metadata(mut self, metadata: PeakListMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    /// Attach a parallel attribute column. Its length must equal the number of peaks.
    pub fn add_attribute(
        &mut self,
        name: impl Into<String>,
        column: impl Into<PeakColumn>,
    ) -> Result<(), PeakListError> {
        let name = name.into();
        let column = column.into();
        if column.len() != self.len() {
            return Err(PeakListError::LengthMismatch {
                name,
                expected: self.len(),
                found: column.len(),
            });
        }
        if self.attributes.contains_key(&name) {
            return Err(PeakListError::DuplicateAttribute(name));
        }
        self.attributes.insert(name, column);
        Ok(())
    }

    pub fn attribute(&self, name: &str) -> Option<&PeakColumn> {
        self.attributes.get(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&String, &PeakColumn)> {
        self.attributes.iter()
    }

    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    /// Replace the retention flags
    pub fn set_flags(&mut self, flags: Vec<bool>) -> Result<(), PeakListError> {
        if flags.len() != self.len() {
            return Err(PeakListError::LengthMismatch {
                name: "flags".into(),
                expected: self.len(),
                found: flags.len(),
            });
        }
        self.flags = flags;
        Ok(())
    }

    /// Iterate over retained peaks with their row index
    pub fn retained(&self) -> impl Iterator<Item = (usize, &CentroidPeak)> {
        self.peaks
            .iter()
            .enumerate()
            .filter(|(i, _)| self.flags.get(*i).copied().unwrap_or(false))
    }

    pub fn retained_count(&self) -> usize {
        self.flags.iter().filter(|f| **f).count()
    }

    pub fn mz_values(&self) -> Vec<f64> {
        self.peaks.iter().map(|p| p.mz()).collect()
    }

    pub fn intensities(&self) -> Vec<f32> {
        self.peaks.iter().map(|p| p.intensity()).collect()
    }
}

impl PartialEq for PeakList {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.mz_values() == other.mz_values()
            && self.intensities() == other.intensities()
            && self.attributes == other.attributes
            && self.flags == other.flags
            && self.metadata == other.metadata
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sorted_with_columns() -> Result<(), PeakListError> {
        let mut pl = PeakList::from_arrays("pl", &[100.0, 200.0, 300.0], &[5.0, 50.0, 10.0])?;
        assert_eq!(pl.len(), 3);
        assert_eq!(pl.flags(), &[true, true, true]);
        pl.add_attribute("mf", vec!["C".to_string(), "CH".into(), "CH2".into()])?;
        assert!(matches!(
            pl.add_attribute("mass", vec![1.0f64]),
            Err(PeakListError::LengthMismatch { expected: 3, found: 1, .. })
        ));
        assert!(matches!(
            pl.add_attribute("mf", vec![1i64, 2, 3]),
            Err(PeakListError::DuplicateAttribute(_))
        ));
        assert_eq!(
            pl.attribute("mf").and_then(|c| c.format_value(2)),
            Some("CH2".to_string())
        );

        pl.set_flags(vec![true, false, true])?;
        let kept: Vec<_> = pl.retained().map(|(i, p)| (i, p.mz())).collect();
        assert_eq!(kept, vec![(0, 100.0), (2, 300.0)]);
        assert_eq!(pl.retained_count(), 2);
        Ok(())
    }

    #[test]
    fn test_construction_sorts() {
        let pl = PeakList::new(
            "pl",
            vec![
                CentroidPeak::new(300.0, 1.0, 0),
                CentroidPeak::new(100.0, 2.0, 1),
            ],
        );
        assert_eq!(pl.mz_values(), vec![100.0, 300.0]);
        assert_eq!(pl.intensities(), vec![2.0, 1.0]);
        assert!(PeakList::from_arrays("pl", &[1.0], &[]).is_err());
    }

    #[test]
    fn test_lowest_parent() {
        let mut meta = PeakListMetadata::default();
        meta.parent.insert(2, PrecursorDetail::new(121.0, "t h2".into(), None));
        meta.parent.insert(1, PrecursorDetail::new(150.1, "t h1".into(), None));
        assert_eq!(meta.lowest_parent().map(|(l, d)| (*l, d.mz)), Some((1, 150.1)));
    }
}
