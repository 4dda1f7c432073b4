//! Convert MSn fragmentation trees into peak lists and spectral library records.
//!
//! Trees are read with [`portals::load_trees`], turned into peak lists with
//! [`convert::tree_to_peaklists`], and written out with [`store::save_peaklists`] or
//! [`msp::write_msp`].
pub mod attributes;
pub mod literal;
pub mod tree;

pub mod align;
pub mod convert;
pub mod msp;
pub mod peaklist;
pub mod portals;
pub mod store;

pub use attributes::{AttrValue, Attributes, CandidateSet, FormulaCandidate, FormulaSummary};
pub use convert::{
    tree_file_to_peaklists, tree_to_peaklists, ConversionError, ConversionOutput,
    ConversionParams, ConversionSummary, PrecursorAccumulator, StageOutput,
};
pub use msp::{write_msp, MspDialect, MspError, MspOptions, MspWriter, Polarity};
pub use peaklist::{PeakColumn, PeakList, PeakListMetadata, PrecursorDetail};
pub use portals::{
    load_groups, load_trees, save_groups, save_trees, TreeFormat, TreeIOError,
};
pub use store::{load_peaklists, save_peaklists, PeakListContainer, Stage, StoreError};
pub use tree::MsnTree;

#[cfg(test)]
mod test {
    use std::fs;

    use mzpeaks::prelude::*;

    use super::*;

    #[test]
    fn test_file() -> Result<(), Box<dyn std::error::Error>> {
        let trees = load_trees("./tests/data/example_trees.json", TreeFormat::Json)?;
        assert_eq!(trees.len(), 2);

        let mut accumulator = PrecursorAccumulator::new();
        let output = tree_to_peaklists(&trees, &ConversionParams::default(), &mut accumulator)?;
        assert_eq!(output.peak_lists.len(), 3);
        let merged = output.merged_peak_lists.as_ref().unwrap();
        assert_eq!(merged.len(), 2);
        let ms1 = output.ms1_precursors.as_ref().unwrap();
        assert_eq!(ms1.len(), 3);

        // The first tree's MS2 group has formula candidates on every node
        let annotated = &output.peak_lists[0];
        assert!(annotated.has_attribute("mf"));
        assert!((annotated.peaks[0].mz() - 69.0698).abs() < 1e-9);
        assert!((annotated.peaks[1].mz() - 86.0964).abs() < 1e-9);

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("library.txt");
        let written = write_msp(&output.peak_lists, &path, MspOptions::default())?;
        assert_eq!(written, 3);
        let text = fs::read_to_string(&path)?;
        assert_eq!(text.matches("RECORD_TITLE:").count(), 3);
        assert!(text.contains("CH$FORMULA: C6H13NO2\n"));

        let gml = dir.path().join("trees.gml.gz");
        save_trees(&trees, &gml, TreeFormat::Gml)?;
        let reloaded = load_trees(&gml, TreeFormat::Gml)?;
        assert_eq!(reloaded, trees);
        Ok(())
    }
}
