//! Peak list containers for the intermediate conversion stages.
//!
//! The JSON container writes one peak list record per line. With the `hdf5` feature the
//! HDF5 container writes one group per peak list holding the numeric arrays as datasets.
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::peaklist::{PeakColumn, PeakList, PeakListError, PeakListMetadata};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Malformed peak list record on line {line}: {source}")]
    JsonError {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid peak list record: {0}")]
    PeakListError(
        #[source]
        #[from]
        PeakListError,
    ),
    #[error("Unknown peak list container {0:?} - json or hdf5")]
    InvalidContainer(String),
    #[error("The {0} container is not available in this build")]
    Unsupported(PeakListContainer),
    #[error("An HDF5 error occurred: {0}")]
    Hdf5Error(String),
}

#[cfg(feature = "hdf5")]
impl From<hdf5::Error> for StoreError {
    fn from(value: hdf5::Error) -> Self {
        Self::Hdf5Error(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeakListContainer {
    #[default]
    Json,
    Hdf5,
}

impl PeakListContainer {
    pub const fn extension(&self) -> &'static str {
        match self {
            PeakListContainer::Json => "json",
            PeakListContainer::Hdf5 => "hdf5",
        }
    }

    pub const fn is_available(&self) -> bool {
        match self {
            PeakListContainer::Json => true,
            PeakListContainer::Hdf5 => cfg!(feature = "hdf5"),
        }
    }
}

impl FromStr for PeakListContainer {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "hdf5" | "h5" => Ok(Self::Hdf5),
            _ => Err(StoreError::InvalidContainer(s.to_string())),
        }
    }
}

impl Display for PeakListContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// The conversion stages that may be persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    NonMerged,
    Merged,
    Ms1Precursors,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Stage::NonMerged => "non_merged_pls",
            Stage::Merged => "merged_pls",
            Stage::Ms1Precursors => "ms1_precursors_pl",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<dir>/<name>_<stage>.<ext>`
pub fn stage_path(dir: &Path, name: &str, stage: Stage, container: PeakListContainer) -> PathBuf {
    dir.join(format!("{name}_{stage}.{}", container.extension()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "values", rename_all = "lowercase")]
enum ColumnRecord {
    /// `null` stands in for NaN, which JSON cannot carry
    Float(Vec<Option<f64>>),
    Integer(Vec<i64>),
    Text(Vec<String>),
}

impl From<&PeakColumn> for ColumnRecord {
    fn from(value: &PeakColumn) -> Self {
        match value {
            PeakColumn::Float(v) => {
                Self::Float(v.iter().map(|x| (!x.is_nan()).then_some(*x)).collect())
            }
            PeakColumn::Integer(v) => Self::Integer(v.clone()),
            PeakColumn::Text(v) => Self::Text(v.clone()),
        }
    }
}

impl From<ColumnRecord> for PeakColumn {
    fn from(value: ColumnRecord) -> Self {
        match value {
            ColumnRecord::Float(v) => Self::Float(v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect()),
            ColumnRecord::Integer(v) => Self::Integer(v),
            ColumnRecord::Text(v) => Self::Text(v),
        }
    }
}

/// The description of a peak list apart from its peak arrays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PeakListHeader {
    id: String,
    #[serde(default)]
    attributes: IndexMap<String, ColumnRecord>,
    #[serde(default)]
    metadata: PeakListMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PeakListRecord {
    id: String,
    mz: Vec<f64>,
    intensity: Vec<f32>,
    #[serde(default)]
    flags: Option<Vec<bool>>,
    #[serde(default)]
    attributes: IndexMap<String, ColumnRecord>,
    #[serde(default)]
    metadata: PeakListMetadata,
}

fn header_of(peak_list: &PeakList) -> PeakListHeader {
    PeakListHeader {
        id: peak_list.id.clone(),
        attributes: peak_list
            .attributes()
            .map(|(k, v)| (k.clone(), ColumnRecord::from(v)))
            .collect(),
        metadata: peak_list.metadata.clone(),
    }
}

fn assemble(
    header: PeakListHeader,
    mz: &[f64],
    intensity: &[f32],
    flags: Option<Vec<bool>>,
) -> Result<PeakList, PeakListError> {
    let mut peak_list = PeakList::from_arrays(header.id, mz, intensity)?.with_metadata(header.metadata);
    for (name, column) in header.attributes {
        peak_list.add_attribute(name, PeakColumn::from(column))?;
    }
    if let Some(flags) = flags {
        peak_list.set_flags(flags)?;
    }
    Ok(peak_list)
}

fn save_json(peak_lists: &[PeakList], path: &Path) -> Result<(), StoreError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for peak_list in peak_lists {
        let header = header_of(peak_list);
        let record = PeakListRecord {
            id: header.id,
            mz: peak_list.mz_values(),
            intensity: peak_list.intensities(),
            flags: Some(peak_list.flags().to_vec()),
            attributes: header.attributes,
            metadata: header.metadata,
        };
        serde_json::to_writer(&mut writer, &record).map_err(io::Error::from)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn load_json(path: &Path) -> Result<Vec<PeakList>, StoreError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut peak_lists = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: PeakListRecord = serde_json::from_str(&line)
            .map_err(|source| StoreError::JsonError { line: i + 1, source })?;
        let header = PeakListHeader {
            id: record.id,
            attributes: record.attributes,
            metadata: record.metadata,
        };
        peak_lists.push(assemble(
            header,
            &record.mz,
            &record.intensity,
            record.flags,
        )?);
    }
    Ok(peak_lists)
}

#[cfg(feature = "hdf5")]
mod hdf5_container {
    use super::*;

    const HEADER_DATASET: &str = "header";

    pub(super) fn save_hdf5(peak_lists: &[PeakList], path: &Path) -> Result<(), StoreError> {
        let handle = hdf5::File::create(path)?;
        for (i, peak_list) in peak_lists.iter().enumerate() {
            let group = handle.create_group(&format!("{i:08}"))?;
            let header = serde_json::to_vec(&header_of(peak_list)).map_err(io::Error::from)?;
            let flags: Vec<u8> = peak_list.flags().iter().map(|f| *f as u8).collect();
            group
                .new_dataset_builder()
                .with_data(&peak_list.mz_values())
                .create("mz")?;
            group
                .new_dataset_builder()
                .with_data(&peak_list.intensities())
                .create("intensity")?;
            group.new_dataset_builder().with_data(&flags).create("flags")?;
            group
                .new_dataset_builder()
                .with_data(&header)
                .create(HEADER_DATASET)?;
        }
        handle.flush()?;
        Ok(())
    }

    pub(super) fn load_hdf5(path: &Path) -> Result<Vec<PeakList>, StoreError> {
        let handle = hdf5::File::open(path)?;
        let mut names = handle.member_names()?;
        names.sort();
        let mut peak_lists = Vec::with_capacity(names.len());
        for name in names {
            let group = handle.group(&name)?;
            let header: Vec<u8> = group.dataset(HEADER_DATASET)?.read_raw()?;
            let header: PeakListHeader = serde_json::from_slice(&header)
                .map_err(|source| StoreError::JsonError { line: 0, source })?;
            let mz: Vec<f64> = group.dataset("mz")?.read_raw()?;
            let intensity: Vec<f32> = group.dataset("intensity")?.read_raw()?;
            let flags: Vec<u8> = group.dataset("flags")?.read_raw()?;
            peak_lists.push(assemble(
                header,
                &mz,
                &intensity,
                Some(flags.into_iter().map(|f| f != 0).collect()),
            )?);
        }
        Ok(peak_lists)
    }
}

/// Write `peak_lists` to `path` in `container`
pub fn save_peaklists<P: AsRef<Path>>(
    peak_lists: &[PeakList],
    path: P,
    container: PeakListContainer,
) -> Result<(), StoreError> {
    let path = path.as_ref();
    match container {
        PeakListContainer::Json => save_json(peak_lists, path)?,
        #[cfg(feature = "hdf5")]
        PeakListContainer::Hdf5 => hdf5_container::save_hdf5(peak_lists, path)?,
        #[cfg(not(feature = "hdf5"))]
        PeakListContainer::Hdf5 => return Err(StoreError::Unsupported(container)),
    }
    debug!("Saved {} peak lists to {}", peak_lists.len(), path.display());
    Ok(())
}

/// Read every peak list stored in `path`
pub fn load_peaklists<P: AsRef<Path>>(
    path: P,
    container: PeakListContainer,
) -> Result<Vec<PeakList>, StoreError> {
    let path = path.as_ref();
    match container {
        PeakListContainer::Json => load_json(path),
        #[cfg(feature = "hdf5")]
        PeakListContainer::Hdf5 => hdf5_container::load_hdf5(path),
        #[cfg(not(feature = "hdf5"))]
        PeakListContainer::Hdf5 => Err(StoreError::Unsupported(container)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attributes::FormulaSummary;
    use crate::peaklist::PrecursorDetail;

    fn example() -> PeakList {
        let mut pl =
            PeakList::from_arrays("tree_1 header", &[85.03, 121.05], &[120.0, 300.0]).unwrap();
        pl.add_attribute("mass", vec![f64::NAN, 121.0502]).unwrap();
        pl.add_attribute("mf", vec![String::new(), "C7H7NO".to_string()])
            .unwrap();
        pl.add_attribute("present", vec![1i64, 1]).unwrap();
        pl.metadata.tree_id = Some("tree_1".into());
        pl.metadata.ms_level = Some(2);
        pl.metadata.convert_id = Some(4);
        pl.metadata.parent.insert(
            1,
            PrecursorDetail::new(
                150.1,
                "tree_1 FTMS + p ESI Full ms [50.00-1000.00]".into(),
                Some(FormulaSummary {
                    mass: 150.0998,
                    adduct: "[M+H]+".into(),
                    mf: "C5H11N3O2".into(),
                }),
            ),
        );
        pl
    }

    #[test]
    fn test_stage_path() {
        assert_eq!(
            stage_path(Path::new("out"), "run", Stage::Merged, PeakListContainer::Json),
            PathBuf::from("out/run_merged_pls.json")
        );
        assert_eq!(
            stage_path(Path::new("out"), "run", Stage::Ms1Precursors, PeakListContainer::Hdf5),
            PathBuf::from("out/run_ms1_precursors_pl.hdf5")
        );
        assert!(matches!(
            "parquet".parse::<PeakListContainer>(),
            Err(StoreError::InvalidContainer(_))
        ));
    }

    #[test_log::test]
    fn test_json_container() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pls.json");
        let mut second = example();
        second.id = "tree_2 header".into();
        second.set_flags(vec![false, true])?;
        let peak_lists = vec![example(), second];
        save_peaklists(&peak_lists, &path, PeakListContainer::Json)?;
        let loaded = load_peaklists(&path, PeakListContainer::Json)?;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].flags(), &[false, true]);
        assert_eq!(loaded[0].metadata, peak_lists[0].metadata);
        match loaded[0].attribute("mass") {
            Some(PeakColumn::Float(v)) => {
                assert!(v[0].is_nan());
                assert_eq!(v[1], 121.0502);
            }
            other => panic!("Expected a float column, found {other:?}"),
        }
        assert_eq!(loaded[0].attribute("present"), peak_lists[0].attribute("present"));
        assert_eq!(loaded[0].attribute("mf"), peak_lists[0].attribute("mf"));
        Ok(())
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn test_hdf5_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pls.hdf5");
        assert!(matches!(
            save_peaklists(&[example()], &path, PeakListContainer::Hdf5),
            Err(StoreError::Unsupported(PeakListContainer::Hdf5))
        ));
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_hdf5_container() -> Result<(), StoreError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pls.hdf5");
        save_peaklists(&[example()], &path, PeakListContainer::Hdf5)?;
        let loaded = load_peaklists(&path, PeakListContainer::Hdf5)?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].metadata, example().metadata);
        assert_eq!(loaded[0].mz_values(), vec![85.03, 121.05]);
        Ok(())
    }
}
