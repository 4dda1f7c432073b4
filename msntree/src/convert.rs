//! Convert fragmentation trees into peak lists.
//!
//! Every tree is split into groups of nodes sharing an acquisition header, and each
//! group becomes one peak list. Optionally the groups of one tree are merged by
//! alignment, and the intensities of every directly fragmented precursor are collected
//! into an MS1 precursor peak list.
use std::collections::btree_map::Entry;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::IndexMap;
use itertools::Itertools;
use mzpeaks::CentroidPeak;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::align::align_peaks;
use crate::attributes::{AttrValue, Attributes, FormulaSummary, FORMULA_KEY};
use crate::peaklist::{PeakList, PeakListError, PeakListMetadata, PrecursorDetail};
use crate::portals::{load_trees, TreeFormat, TreeIOError};
use crate::store::{save_peaklists, stage_path, PeakListContainer, Stage, StoreError};
use crate::tree::MsnTree;

/// Headers of full-scan or SIM sweeps, which carry no fragment peaks of their own
static SWEEP_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(.*Full ms .*)|(.*SIM ms.*)").unwrap());

/// The identifier of the MS1 precursor peak list
pub const MS1_PRECURSORS_ID: &str = "ms1_precursors";

/// The separator between member peak list ids in a merged peak list's id
pub const MERGED_ID_SEPARATOR: &str = "<#>";

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Node {node:?} in tree {tree:?} does not have a {field:?} attribute")]
    MissingField {
        tree: String,
        node: String,
        field: &'static str,
    },
    #[error("Node {node:?} in tree {tree:?} has a {found} {field:?} attribute, expected {expected}")]
    WrongType {
        tree: String,
        node: String,
        field: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("Failed to store peak lists: {0}")]
    StoreError(
        #[source]
        #[from]
        StoreError,
    ),
    #[error("Failed to build a peak list: {0}")]
    PeakListError(
        #[source]
        #[from]
        PeakListError,
    ),
    #[error("Failed to read trees: {0}")]
    TreeIOError(
        #[source]
        #[from]
        TreeIOError,
    ),
}

/// Where the intermediate peak list stages are written
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub dir: PathBuf,
    pub name: String,
    pub container: PeakListContainer,
}

impl StageOutput {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, container: PeakListContainer) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            container,
        }
    }

    pub fn path_for(&self, stage: Stage) -> PathBuf {
        stage_path(&self.dir, &self.name, stage, self.container)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionParams {
    /// Place peaks at their formula mass rather than the observed m/z when every
    /// node of a group has formula candidates
    pub adjust_mz: bool,
    /// Merge the peak lists of each tree by alignment
    pub merge: bool,
    /// The alignment tolerance in parts-per-million
    pub ppm: f64,
    /// Collect the MS1 precursor peak list
    pub ms1: bool,
    /// Skip full-scan and SIM header groups
    pub skip_sweep_headers: bool,
    pub output: Option<StageOutput>,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            adjust_mz: true,
            merge: true,
            ppm: 5.0,
            ms1: true,
            skip_sweep_headers: true,
            output: None,
        }
    }
}

/// Precursor m/z to intensity, accumulated across trees. A repeated m/z keeps the
/// most recently written intensity.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PrecursorAccumulator {
    entries: IndexMap<u64, (f64, f32)>,
}

impl PrecursorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mz: f64, intensity: f32) {
        self.entries.insert(mz.to_bits(), (mz, intensity));
    }

    pub fn get(&self, mz: f64) -> Option<f32> {
        self.entries.get(&mz.to_bits()).map(|(_, i)| *i)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }

    /// The accumulated precursors sorted by m/z
    pub fn sorted(&self) -> Vec<(f64, f32)> {
        let mut entries: Vec<_> = self.entries.values().copied().collect();
        entries.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
        entries
    }

    /// Build the MS1 precursor peak list. Each precursor counts as a pure, single
    /// sample observation.
    pub fn to_peaklist(&self, id: impl Into<String>) -> Result<PeakList, PeakListError> {
        let peaks: Vec<CentroidPeak> = self
            .sorted()
            .into_iter()
            .enumerate()
            .map(|(i, (mz, intensity))| CentroidPeak::new(mz, intensity, i as u32))
            .collect();
        let n = peaks.len();
        let mut peak_list = PeakList::new(id, peaks);
        peak_list.add_attribute("present", vec![1i64; n])?;
        peak_list.add_attribute("fraction", vec![1.0f64; n])?;
        peak_list.add_attribute("occurrence", vec![1i64; n])?;
        peak_list.add_attribute("purity", vec![1.0f64; n])?;
        Ok(peak_list)
    }
}

/// Counts describing one conversion
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ConversionSummary {
    pub trees: usize,
    pub groups: usize,
    pub skipped_groups: usize,
    pub peaks: usize,
    pub merged_peak_lists: usize,
    pub ms1_precursors: usize,
}

impl Add for ConversionSummary {
    type Output = ConversionSummary;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ConversionSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.trees += rhs.trees;
        self.groups += rhs.groups;
        self.skipped_groups += rhs.skipped_groups;
        self.peaks += rhs.peaks;
        self.merged_peak_lists += rhs.merged_peak_lists;
        self.ms1_precursors += rhs.ms1_precursors;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversionOutput {
    /// One peak list per retained header group
    pub peak_lists: Vec<PeakList>,
    /// One peak list per tree id, when merging was requested
    pub merged_peak_lists: Option<Vec<PeakList>>,
    /// The MS1 precursor peak list, when requested
    pub ms1_precursors: Option<PeakList>,
    pub summary: ConversionSummary,
}

/// Typed access to the attributes the conversion reads from a node
struct NodeReader<'a> {
    tree: &'a MsnTree,
    node: &'a str,
    attributes: &'a Attributes,
}

impl<'a> NodeReader<'a> {
    fn new(tree: &'a MsnTree, node: &'a str, attributes: &'a Attributes) -> Self {
        Self {
            tree,
            node,
            attributes,
        }
    }

    fn missing(&self, field: &'static str) -> ConversionError {
        ConversionError::MissingField {
            tree: self.tree.id.clone(),
            node: self.node.to_string(),
            field,
        }
    }

    fn wrong_type(&self, field: &'static str, expected: &'static str, found: &AttrValue) -> ConversionError {
        ConversionError::WrongType {
            tree: self.tree.id.clone(),
            node: self.node.to_string(),
            field,
            expected,
            found: found.type_name().to_string(),
        }
    }

    fn get(&self, field: &'static str) -> Result<&'a AttrValue, ConversionError> {
        self.attributes.get(field).ok_or_else(|| self.missing(field))
    }

    fn header(&self) -> Result<&'a str, ConversionError> {
        let value = self.get("header")?;
        value
            .as_str()
            .ok_or_else(|| self.wrong_type("header", "text", value))
    }

    fn ms_level(&self) -> Result<u8, ConversionError> {
        let value = self.get("mslevel")?;
        value
            .as_i64()
            .and_then(|level| u8::try_from(level).ok())
            .filter(|level| *level >= 1)
            .ok_or_else(|| self.wrong_type("mslevel", "integer between 1 and 255", value))
    }

    fn float(&self, field: &'static str) -> Result<f64, ConversionError> {
        let value = self.get(field)?;
        value
            .as_f64()
            .ok_or_else(|| self.wrong_type(field, "number", value))
    }

    fn mz(&self) -> Result<f64, ConversionError> {
        self.float("mz")
    }

    fn intensity(&self) -> Result<f32, ConversionError> {
        self.float("intensity").map(|i| i as f32)
    }

    /// The node's formula summary. An absent, null or empty candidate set has none.
    fn formula(&self) -> Result<Option<FormulaSummary>, ConversionError> {
        match self.attributes.get(FORMULA_KEY) {
            None | Some(AttrValue::Null) => Ok(None),
            Some(AttrValue::Candidates(candidates)) => Ok(FormulaSummary::from_candidates(candidates)),
            Some(other) => Err(self.wrong_type(FORMULA_KEY, "formula candidates", other)),
        }
    }
}

/// A single peak of a header group, with its sort key precomputed
#[derive(Debug, Clone)]
struct GroupRow {
    primary: f64,
    mz: f64,
    intensity: f32,
    formula: Option<FormulaSummary>,
}

impl GroupRow {
    fn mass(&self) -> f64 {
        self.formula.as_ref().map(|f| f.mass).unwrap_or(f64::NAN)
    }

    fn mf(&self) -> &str {
        self.formula.as_ref().map(|f| f.mf.as_str()).unwrap_or_default()
    }

    fn adduct(&self) -> &str {
        self.formula.as_ref().map(|f| f.adduct.as_str()).unwrap_or_default()
    }

    fn cmp_key(&self, other: &Self) -> std::cmp::Ordering {
        self.primary
            .total_cmp(&other.primary)
            .then(self.intensity.total_cmp(&other.intensity))
            .then(self.mass().total_cmp(&other.mass()))
            .then_with(|| self.mf().cmp(other.mf()))
            .then_with(|| self.adduct().cmp(other.adduct()))
            .then(self.mz.total_cmp(&other.mz))
    }
}

fn build_group_peaklist(
    id: String,
    mut rows: Vec<GroupRow>,
    metadata: PeakListMetadata,
    adjust_mz: bool,
) -> Result<PeakList, PeakListError> {
    let use_mass = adjust_mz && rows.iter().all(|r| r.formula.is_some());
    for row in rows.iter_mut() {
        row.primary = if use_mass { row.mass() } else { row.mz };
    }
    rows.sort_by(|a, b| a.cmp_key(b));

    let primary: Vec<f64> = rows.iter().map(|r| r.primary).collect();
    let intensity: Vec<f32> = rows.iter().map(|r| r.intensity).collect();
    let mut peak_list = PeakList::from_arrays(id, &primary, &intensity)?.with_metadata(metadata);
    if rows.iter().any(|r| r.formula.is_some()) {
        peak_list.add_attribute("mass", rows.iter().map(|r| r.mass()).collect::<Vec<_>>())?;
        peak_list.add_attribute("mz_original", rows.iter().map(|r| r.mz).collect::<Vec<_>>())?;
        peak_list.add_attribute(
            "mf",
            rows.iter().map(|r| r.mf().to_string()).collect::<Vec<_>>(),
        )?;
        peak_list.add_attribute(
            "adduct",
            rows.iter().map(|r| r.adduct().to_string()).collect::<Vec<_>>(),
        )?;
    }
    Ok(peak_list)
}

struct ConvertIdSequence(u32);

impl ConvertIdSequence {
    fn next(&mut self) -> u32 {
        let current = self.0;
        self.0 += 1;
        current
    }
}

fn store_stage(output: Option<&StageOutput>, stage: Stage, peak_lists: &[PeakList]) -> Result<(), ConversionError> {
    if let Some(output) = output {
        let path = output.path_for(stage);
        save_peaklists(peak_lists, &path, output.container)?;
        info!("Wrote {} peak lists for {stage} to {}", peak_lists.len(), path.display());
    }
    Ok(())
}

/// Convert `trees` into peak lists.
///
/// The call either succeeds completely or returns the first error encountered, in
/// which case no peak lists are produced and `accumulator` is left untouched. On
/// success the MS1 precursors of `trees` are added to `accumulator`, and the MS1
/// peak list is built from everything it holds.
pub fn tree_to_peaklists(
    trees: &[MsnTree],
    params: &ConversionParams,
    accumulator: &mut PrecursorAccumulator,
) -> Result<ConversionOutput, ConversionError> {
    let mut staged = accumulator.clone();
    let output = convert_trees(trees, params, &mut staged)?;
    *accumulator = staged;
    Ok(output)
}

fn convert_trees(
    trees: &[MsnTree],
    params: &ConversionParams,
    accumulator: &mut PrecursorAccumulator,
) -> Result<ConversionOutput, ConversionError> {
    let mut summary = ConversionSummary::default();
    let mut convert_ids = ConvertIdSequence(1);

    // Peak lists in tree order, and the positions belonging to each tree id
    let mut peak_lists: Vec<PeakList> = Vec::new();
    let mut by_tree: IndexMap<String, Vec<usize>> = IndexMap::new();

    for tree in trees {
        summary.trees += 1;
        by_tree.entry(tree.id.clone()).or_default();

        let mut nodes: Vec<(NodeReader, &str)> = Vec::with_capacity(tree.node_count());
        for (node_id, attributes) in tree.nodes() {
            let reader = NodeReader::new(tree, node_id, attributes);
            let header = reader.header()?;
            nodes.push((reader, header));
        }
        nodes.sort_by(|a, b| a.1.cmp(b.1));

        for (header, group) in &nodes.iter().group_by(|(_, header)| *header) {
            if params.skip_sweep_headers && SWEEP_HEADER.is_match(header) {
                debug!("Skipping sweep header group {header:?} in {}", tree.id);
                summary.skipped_groups += 1;
                continue;
            }

            let mut metadata = PeakListMetadata {
                tree_id: Some(tree.id.clone()),
                header: Some(header.to_string()),
                ..Default::default()
            };
            let mut rows = Vec::new();

            for (node, _) in group {
                metadata.ms_level = Some(node.ms_level()?);
                for parent_id in tree.predecessors(node.node) {
                    let Some(parent_attributes) = tree.node(parent_id) else {
                        continue;
                    };
                    let parent = NodeReader::new(tree, parent_id, parent_attributes);
                    let parent_level = parent.ms_level()?;
                    let parent_mz = parent.mz()?;
                    if let Entry::Vacant(slot) = metadata.parent.entry(parent_level) {
                        slot.insert(PrecursorDetail::new(
                            parent_mz,
                            format!("{} {}", tree.id, parent.header()?),
                            parent.formula()?,
                        ));
                    }
                    if params.ms1 {
                        accumulator.insert(parent_mz, parent.intensity()?);
                    }
                }
                rows.push(GroupRow {
                    primary: f64::NAN,
                    mz: node.mz()?,
                    intensity: node.intensity()?,
                    formula: node.formula()?,
                });
            }

            if rows.is_empty() {
                warn!("No peaks were found for {header:?} in {}", tree.id);
                continue;
            }

            let n_rows = rows.len();
            let mut peak_list = build_group_peaklist(
                format!("{} {}", tree.id, header),
                rows,
                metadata,
                params.adjust_mz,
            )?;
            peak_list.metadata.convert_id = Some(convert_ids.next());
            debug!(
                "Built peak list {:?} with {n_rows} peaks (convert id {:?})",
                peak_list.id, peak_list.metadata.convert_id
            );
            summary.groups += 1;
            summary.peaks += n_rows;
            if let Some(positions) = by_tree.get_mut(&tree.id) {
                positions.push(peak_lists.len());
            }
            peak_lists.push(peak_list);
        }
    }

    store_stage(params.output.as_ref(), Stage::NonMerged, &peak_lists)?;

    let merged_peak_lists = if params.merge {
        let mut merged = Vec::new();
        for (tree_id, positions) in by_tree.iter() {
            if positions.is_empty() {
                continue;
            }
            let members: Vec<&PeakList> = positions.iter().map(|i| &peak_lists[*i]).collect();
            let merged_id = members.iter().map(|pl| pl.id.as_str()).join(MERGED_ID_SEPARATOR);
            let matrix = align_peaks(members.iter().copied(), params.ppm);
            let mut peak_list = matrix.to_peaklist(merged_id)?;
            peak_list.metadata.tree_id = Some(tree_id.clone());
            if let Some(detail) = members[0].metadata.parent.get(&1) {
                peak_list.metadata.parent.insert(1, detail.clone());
            }
            peak_list.metadata.convert_id = Some(convert_ids.next());
            debug!(
                "Merged {} peak lists of {tree_id} into {} peaks",
                members.len(),
                peak_list.len()
            );
            merged.push(peak_list);
        }
        summary.merged_peak_lists = merged.len();
        store_stage(params.output.as_ref(), Stage::Merged, &merged)?;
        Some(merged)
    } else {
        None
    };

    let ms1_precursors = if params.ms1 {
        let mut peak_list = accumulator.to_peaklist(MS1_PRECURSORS_ID)?;
        peak_list.metadata.convert_id = Some(convert_ids.next());
        summary.ms1_precursors = peak_list.len();
        store_stage(
            params.output.as_ref(),
            Stage::Ms1Precursors,
            std::slice::from_ref(&peak_list),
        )?;
        Some(peak_list)
    } else {
        None
    };

    info!(
        "Converted {} trees into {} peak lists ({} sweep groups skipped, {} merged, {} MS1 precursors)",
        summary.trees,
        summary.groups,
        summary.skipped_groups,
        summary.merged_peak_lists,
        summary.ms1_precursors
    );

    Ok(ConversionOutput {
        peak_lists,
        merged_peak_lists,
        ms1_precursors,
        summary,
    })
}

/// Load trees from `path` and convert them with a fresh precursor accumulator
pub fn tree_file_to_peaklists<P: AsRef<Path>>(
    path: P,
    format: TreeFormat,
    params: &ConversionParams,
) -> Result<ConversionOutput, ConversionError> {
    let trees = load_trees(path, format)?;
    let mut accumulator = PrecursorAccumulator::new();
    tree_to_peaklists(&trees, params, &mut accumulator)
}
