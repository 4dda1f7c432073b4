//! Save and load collections of [`MsnTree`] as JSON lines or GML.
//!
//! Both encodings stamp every node and edge with an `order` attribute before writing
//! and restore that order on load, removing the stamp again. Paths ending in `.gz`
//! are compressed/decompressed transparently.
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::debug;

use crate::attributes::AttributeError;
use crate::tree::MsnTree;

mod gml;
mod json;

pub use gml::{read_gml, write_gml};
pub use json::{read_json_lines, write_json_lines};

/// The transient attribute carrying node and edge order through a file
pub const ORDER_KEY: &str = "order";

#[derive(Debug, Error)]
pub enum TreeIOError {
    #[error("Incorrect graph format {0:?} - json or gml")]
    InvalidFormat(String),
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Malformed JSON on line {line}: {source}")]
    JsonError {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to parse line {line}: {message}")]
    ParseError { line: usize, message: String },
    #[error("Tree on line {line} has no graph id")]
    MissingTreeId { line: usize },
    #[error("Edge {source_node:?} -> {target_node:?} in tree {tree:?} references an unknown node")]
    UnknownNode {
        tree: String,
        source_node: String,
        target_node: String,
    },
    #[error("Invalid attribute on line {line}: {source}")]
    AttributeError {
        line: usize,
        #[source]
        source: AttributeError,
    },
}

/// The supported tree interchange encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TreeFormat {
    #[default]
    Json,
    Gml,
}

impl TreeFormat {
    /// Guess the format from a file name, ignoring a trailing `.gz`
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_string_lossy().to_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        if name.ends_with(".gml") {
            Some(Self::Gml)
        } else if name.ends_with(".json") || name.ends_with(".jsonl") {
            Some(Self::Json)
        } else {
            None
        }
    }
}

impl FromStr for TreeFormat {
    type Err = TreeIOError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "gml" => Ok(Self::Gml),
            _ => Err(TreeIOError::InvalidFormat(s.to_string())),
        }
    }
}

impl Display for TreeFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeFormat::Json => f.write_str("json"),
            TreeFormat::Gml => f.write_str("gml"),
        }
    }
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// A file handle that is either plain or gzip-compressed
enum TreeFileWriter {
    Plain(BufWriter<fs::File>),
    Compressed(GzEncoder<BufWriter<fs::File>>),
}

impl TreeFileWriter {
    fn create(path: &Path) -> io::Result<Self> {
        let handle = BufWriter::new(fs::File::create(path)?);
        if is_compressed(path) {
            Ok(Self::Compressed(GzEncoder::new(handle, Compression::default())))
        } else {
            Ok(Self::Plain(handle))
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            TreeFileWriter::Plain(mut handle) => handle.flush(),
            TreeFileWriter::Compressed(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for TreeFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TreeFileWriter::Plain(handle) => handle.write(buf),
            TreeFileWriter::Compressed(handle) => handle.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TreeFileWriter::Plain(handle) => handle.flush(),
            TreeFileWriter::Compressed(handle) => handle.flush(),
        }
    }
}

fn open_reader(path: &Path) -> io::Result<Box<dyn BufRead>> {
    let handle = fs::File::open(path)?;
    if is_compressed(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(
            handle,
        )))))
    } else {
        Ok(Box::new(BufReader::new(handle)))
    }
}

/// Write any collection of graphs to `path`. Shared by [`save_trees`] and [`save_groups`].
pub fn save_graphs<'a, I, P>(graphs: I, path: P, format: TreeFormat) -> Result<(), TreeIOError>
where
    I: IntoIterator<Item = &'a MsnTree>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut writer = TreeFileWriter::create(path)?;
    let mut count = 0usize;
    for graph in graphs {
        match format {
            TreeFormat::Json => write_json_lines(&mut writer, graph)?,
            TreeFormat::Gml => write_gml(&mut writer, graph)?,
        }
        count += 1;
    }
    writer.finish()?;
    debug!("Wrote {count} graphs to {} as {format}", path.display());
    Ok(())
}

/// Read every graph stored in `path`. Shared by [`load_trees`] and [`load_groups`].
pub fn load_graphs<P: AsRef<Path>>(path: P, format: TreeFormat) -> Result<Vec<MsnTree>, TreeIOError> {
    let path = path.as_ref();
    let reader = open_reader(path)?;
    let graphs = match format {
        TreeFormat::Json => read_json_lines(reader)?,
        TreeFormat::Gml => read_gml(reader)?,
    };
    debug!("Read {} graphs from {} as {format}", graphs.len(), path.display());
    Ok(graphs)
}

/// Save fragmentation trees
pub fn save_trees<'a, I: IntoIterator<Item = &'a MsnTree>, P: AsRef<Path>>(
    trees: I,
    path: P,
    format: TreeFormat,
) -> Result<(), TreeIOError> {
    save_graphs(trees, path, format)
}

/// Load fragmentation trees
pub fn load_trees<P: AsRef<Path>>(path: P, format: TreeFormat) -> Result<Vec<MsnTree>, TreeIOError> {
    load_graphs(path, format)
}

/// Save groups of related scans. Groups share the tree representation.
pub fn save_groups<'a, I: IntoIterator<Item = &'a MsnTree>, P: AsRef<Path>>(
    groups: I,
    path: P,
    format: TreeFormat,
) -> Result<(), TreeIOError> {
    save_graphs(groups, path, format)
}

/// Load groups of related scans
pub fn load_groups<P: AsRef<Path>>(path: P, format: TreeFormat) -> Result<Vec<MsnTree>, TreeIOError> {
    load_graphs(path, format)
}

/// Resolve a format for `path`, preferring an explicit token when one is given.
pub fn resolve_format(path: &Path, token: Option<&str>) -> Result<TreeFormat, TreeIOError> {
    match token {
        Some(token) => token.parse(),
        None => TreeFormat::from_path(path)
            .ok_or_else(|| TreeIOError::InvalidFormat(PathBuf::from(path).display().to_string())),
    }
}
