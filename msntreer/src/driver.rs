use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use msntree::portals::resolve_format;
use msntree::{
    load_trees, save_trees, tree_to_peaklists, write_msp, ConversionError, ConversionOutput,
    ConversionParams, ConversionSummary, MspError, MspOptions, PeakList, PeakListContainer,
    PrecursorAccumulator, StageOutput, StoreError, TreeIOError,
};

use crate::args::{
    default_ppm, positive_float_f64, ArgContainer, ArgMspDialect, ArgMspSource, ArgPolarity,
    ArgTreeFormat,
};

#[derive(Debug, Error)]
pub enum MsnTreerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read or write trees: {0}")]
    TreeIOError(#[from] TreeIOError),
    #[error("Failed to convert trees: {0}")]
    ConversionError(#[from] ConversionError),
    #[error("Failed to write the spectral library: {0}")]
    MspError(#[from] MspError),
    #[error("Failed to store peak lists: {0}")]
    StoreError(#[from] StoreError),
    #[error("Invalid configuration: {0}")]
    ConfigError(#[from] Box<figment::Error>),
}

impl From<figment::Error> for MsnTreerError {
    fn from(value: figment::Error) -> Self {
        Self::ConfigError(Box::new(value))
    }
}

/// Convert MSn fragmentation trees into peak lists and spectral library records.
///
/// Read a JSON or GML tree file, group each tree's scans by header, store the
/// per-group, merged and MS1 precursor peak lists, and optionally write a MassBank
/// or MSP text library.
#[derive(Parser, Debug, Clone, PartialEq, Deserialize, Serialize)]
#[command(author, version)]
pub struct MsnTreer {
    /// The path to read the trees from. A `.gz` suffix is decompressed transparently.
    #[arg()]
    pub input_file: PathBuf,

    /// The tree encoding of the input file, inferred from its extension if absent
    #[arg(short = 'f', long = "format")]
    pub format: Option<ArgTreeFormat>,

    /// The directory to write the peak list containers to.
    ///
    /// When absent, no peak list containers are written.
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// The stem of the peak list container file names, defaulting to the input file's
    #[arg(short = 'n', long = "name")]
    pub name: Option<String>,

    /// The peak list container encoding.
    ///
    /// `json` writes `<name>_<stage>.json` files. `hdf5` writes `<name>_<stage>.hdf5`
    /// files and is only available when msntreer is built with `--features hdf5`.
    #[arg(long = "container", default_value_t = ArgContainer::Json)]
    #[serde(default)]
    pub container: ArgContainer,

    /// The path to write a spectral text library to, from the peak lists `--msp-source` selects
    #[arg(long = "msp")]
    pub msp_file: Option<PathBuf>,

    /// Which peak lists the spectral text library is written from
    #[arg(long = "msp-source", default_value_t = ArgMspSource::Unmerged)]
    #[serde(default)]
    pub msp_source: ArgMspSource,

    /// The spectral text library dialect
    #[arg(long = "msp-type", default_value_t = ArgMspDialect::Massbank)]
    #[serde(default)]
    pub msp_type: ArgMspDialect,

    /// The ion mode written to the spectral text library
    #[arg(long = "polarity", default_value_t = ArgPolarity::Positive)]
    #[serde(default)]
    pub polarity: ArgPolarity,

    /// The peak alignment tolerance in parts-per-million
    #[arg(long = "ppm", default_value_t = default_ppm(), value_parser = positive_float_f64)]
    #[serde(default = "default_ppm")]
    pub ppm: f64,

    /// Do not merge the peak lists of each tree
    #[arg(long = "no-merge")]
    #[serde(default)]
    pub no_merge: bool,

    /// Do not collect the MS1 precursor peak list
    #[arg(long = "no-ms1")]
    #[serde(default)]
    pub no_ms1: bool,

    /// Keep observed m/z values even when formula annotations are available
    #[arg(long = "raw-mz")]
    #[serde(default)]
    pub raw_mz: bool,

    /// Convert full-scan and SIM header groups too
    #[arg(long = "include-sweep-headers")]
    #[serde(default)]
    pub include_sweep_headers: bool,

    /// Parse precursor details from each peak list's header instead of its annotations
    #[arg(long = "header-parsed")]
    #[serde(default)]
    pub header_parsed: bool,

    /// Allow full-scan peak lists in the spectral text library
    #[arg(long = "include-ms1")]
    #[serde(default)]
    pub include_ms1: bool,

    /// Re-save the loaded trees to this path
    #[arg(long = "save-trees")]
    pub save_trees: Option<PathBuf>,

    /// The tree encoding used with `--save-trees`, inferred from its extension if absent
    #[arg(long = "save-trees-format", requires = "save_trees")]
    pub save_trees_format: Option<ArgTreeFormat>,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `msntreer.toml` in the working directory.
    /// Environment variables prefixed with `MSNTREER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,
}

/// Strip compression and format suffixes from `path`'s file name
fn stem_of(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    match Path::new(name).file_stem() {
        Some(stem) if !stem.is_empty() => stem.to_string_lossy().to_string(),
        _ => "msntree".to_string(),
    }
}

impl MsnTreer {
    /// Layer `msntreer.toml`, the `--config-file` TOML and `MSNTREER_` environment
    /// variables over these arguments, later sources taking precedence.
    pub fn configure(self) -> Result<Self, MsnTreerError> {
        let mut config = Figment::from(Serialized::defaults(&self)).merge(Toml::file("msntreer.toml"));
        if let Some(path) = self.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        config = config.merge(Env::prefixed("MSNTREER_"));
        Ok(config.extract()?)
    }

    pub fn input_format(&self) -> Result<msntree::TreeFormat, TreeIOError> {
        resolve_format(
            &self.input_file,
            self.format.map(|f| f.to_string()).as_deref(),
        )
    }

    pub fn stage_output(&self) -> Option<StageOutput> {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| stem_of(&self.input_file));
        self.output_dir
            .as_ref()
            .map(|dir| StageOutput::new(dir, name, self.container.into()))
    }

    pub fn conversion_params(&self) -> ConversionParams {
        ConversionParams {
            adjust_mz: !self.raw_mz,
            merge: !self.no_merge,
            ppm: self.ppm,
            ms1: !self.no_ms1,
            skip_sweep_headers: !self.include_sweep_headers,
            output: self.stage_output(),
        }
    }

    pub fn msp_options(&self) -> MspOptions {
        MspOptions {
            dialect: self.msp_type.into(),
            polarity: self.polarity.into(),
            use_annotations: !self.header_parsed,
            include_ms1: self.include_ms1,
        }
    }

    /// The peak lists of `output` selected by `--msp-source`
    pub fn msp_peak_lists<'a>(&self, output: &'a ConversionOutput) -> Vec<&'a PeakList> {
        let merged = output.merged_peak_lists.as_deref().unwrap_or_default();
        if self.msp_source != ArgMspSource::Unmerged && output.merged_peak_lists.is_none() {
            warn!("Merged peak lists were requested for --msp, but merging is disabled");
        }
        match self.msp_source {
            ArgMspSource::Unmerged => output.peak_lists.iter().collect(),
            ArgMspSource::Merged => merged.iter().collect(),
            ArgMspSource::All => output
                .peak_lists
                .iter()
                .chain(merged.iter())
                .chain(output.ms1_precursors.iter())
                .collect(),
        }
    }

    pub fn main(&self) -> Result<ConversionSummary, MsnTreerError> {
        info!(
            "msntreer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file.display());

        let params = self.conversion_params();
        if let Some(output) = params.output.as_ref() {
            let container: PeakListContainer = output.container;
            if !container.is_available() {
                return Err(StoreError::Unsupported(container).into());
            }
            info!("Output: {} ({container})", output.dir.display());
            std::fs::create_dir_all(&output.dir)?;
        }

        let format = self.input_format()?;
        debug!("Reading {format} trees");
        let trees = load_trees(&self.input_file, format)?;

        let mut accumulator = PrecursorAccumulator::new();
        let output = tree_to_peaklists(&trees, &params, &mut accumulator)?;
        let summary = output.summary;
        info!("Trees: {}", summary.trees);
        info!(
            "Peak Lists: {} | Skipped Groups: {}",
            summary.groups, summary.skipped_groups
        );
        info!("Peaks: {}", summary.peaks);
        info!(
            "Merged Peak Lists: {} | MS1 Precursors: {}",
            summary.merged_peak_lists, summary.ms1_precursors
        );

        if let Some(path) = self.msp_file.as_ref() {
            let options = self.msp_options();
            let written = write_msp(self.msp_peak_lists(&output), path, options)?;
            info!(
                "Wrote {written} {} records to {}",
                options.dialect,
                path.display()
            );
        }

        if let Some(path) = self.save_trees.as_ref() {
            let format = resolve_format(
                path,
                self.save_trees_format.map(|f| f.to_string()).as_deref(),
            )?;
            save_trees(&trees, path, format)?;
            info!("Saved {} trees to {}", trees.len(), path.display());
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stem() {
        assert_eq!(stem_of(Path::new("data/trees.json.gz")), "trees");
        assert_eq!(stem_of(Path::new("trees.gml")), "trees");
        assert_eq!(stem_of(Path::new("trees")), "trees");
        assert_eq!(stem_of(Path::new("")), "msntree");
    }

    #[test]
    fn test_parse_args() {
        let driver = MsnTreer::parse_from([
            "msntreer",
            "trees.json.gz",
            "-o",
            "out",
            "--no-merge",
            "--raw-mz",
            "--msp-type",
            "msp",
            "--ppm",
            "10",
        ]);
        let params = driver.conversion_params();
        assert!(!params.merge);
        assert!(!params.adjust_mz);
        assert!(params.ms1);
        assert_eq!(params.ppm, 10.0);
        let output = params.output.unwrap();
        assert_eq!(output.name, "trees");
        assert_eq!(output.dir, PathBuf::from("out"));
        assert_eq!(driver.msp_options().dialect, msntree::MspDialect::Msp);
        assert_eq!(driver.input_format().unwrap(), msntree::TreeFormat::Json);
    }

    #[test]
    fn test_container_help_names_feature() {
        use clap::CommandFactory;
        let help = MsnTreer::command().render_long_help().to_string();
        assert!(help.contains("--features hdf5"));
        assert!(help.contains("--msp-source"));
    }

    #[test]
    fn test_msp_source_selection() {
        let output = ConversionOutput {
            peak_lists: vec![PeakList::new("a", Vec::new()), PeakList::new("b", Vec::new())],
            merged_peak_lists: Some(vec![PeakList::new("a<#>b", Vec::new())]),
            ms1_precursors: Some(PeakList::new("ms1_precursors", Vec::new())),
            summary: ConversionSummary::default(),
        };
        let ids = |source: &str| {
            let driver = MsnTreer::parse_from(["msntreer", "trees.json", "--msp-source", source]);
            driver
                .msp_peak_lists(&output)
                .iter()
                .map(|pl| pl.id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids("unmerged"), vec!["a", "b"]);
        assert_eq!(ids("merged"), vec!["a<#>b"]);
        assert_eq!(ids("all"), vec!["a", "b", "a<#>b", "ms1_precursors"]);
    }

    #[test]
    fn test_no_output_dir() {
        let driver = MsnTreer::parse_from(["msntreer", "trees.gml", "-n", "run"]);
        assert!(driver.stage_output().is_none());
        assert_eq!(driver.input_format().unwrap(), msntree::TreeFormat::Gml);
    }
}
