//! Write peak lists as MassBank or generic MSP spectral library records.
use std::fmt::{self, Display};
use std::fs;
use std::io::{self, prelude::*, BufWriter};
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use itertools::Itertools;
use mzpeaks::prelude::*;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::literal::write_float;
use crate::peaklist::{PeakColumn, PeakList};

static FULL_SWEEP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".*Full ms .*").unwrap());
static MS_LEVEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".*Full ms(\d+).*").unwrap());
static ACTIVATION_DETAILS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*Full ms\d+ (.*) \[.*").unwrap());
static ACTIVATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+.\d+)@(\D+)(.*)").unwrap());
static ENERGY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+.\d+@(\D+)(\d+.\d+)").unwrap());

#[derive(Debug, Error)]
pub enum MspError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Cannot decide whether {id:?} is an MS1 record: its MS level is undefined")]
    UndefinedGuardVariable { id: String },
    #[error("Unknown record dialect {0:?} - massbank or msp")]
    InvalidDialect(String),
    #[error("Unknown polarity {0:?} - positive or negative")]
    InvalidPolarity(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MspDialect {
    #[default]
    MassBank,
    Msp,
}

impl FromStr for MspDialect {
    type Err = MspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "massbank" => Ok(Self::MassBank),
            "msp" => Ok(Self::Msp),
            _ => Err(MspError::InvalidDialect(s.to_string())),
        }
    }
}

impl Display for MspDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MspDialect::MassBank => f.write_str("massbank"),
            MspDialect::Msp => f.write_str("msp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Polarity {
    #[default]
    Positive,
    Negative,
}

impl FromStr for Polarity {
    type Err = MspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positive" | "pos" | "+" => Ok(Self::Positive),
            "negative" | "neg" | "-" => Ok(Self::Negative),
            _ => Err(MspError::InvalidPolarity(s.to_string())),
        }
    }
}

impl Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Positive => f.write_str("positive"),
            Polarity::Negative => f.write_str("negative"),
        }
    }
}

/// The field labels of a record dialect. Some labels carry a trailing space which
/// consumers of the existing files expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLabels {
    pub name: &'static str,
    pub polarity: &'static str,
    pub precursor_mz: &'static str,
    pub precursor_type: &'static str,
    pub num_peaks: &'static str,
    pub columns: &'static str,
    pub ms_level: &'static str,
    pub fragmentation_mode: &'static str,
    pub collision_energy: &'static str,
    pub formula: &'static str,
}

const MASSBANK_LABELS: FieldLabels = FieldLabels {
    name: "RECORD_TITLE:",
    polarity: "AC$MASS_SPECTROMETRY: ION_MODE",
    precursor_mz: "MS$FOCUSED_ION: PRECURSOR_M/Z ",
    precursor_type: "MS$FOCUSED_ION: PRECURSOR_TYPE",
    num_peaks: "PK$NUM_PEAK:",
    columns: "PK$PEAK: m/z int. rel.int.",
    ms_level: "AC$MASS_SPECTROMETRY: MS_TYPE ",
    fragmentation_mode: "AC$MASS_SPECTROMETRY: FRAGMENTATION_MODE",
    collision_energy: "AC$MASS_SPECTROMETRY: COLLISION_ENERGY",
    formula: "CH$FORMULA:",
};

const MSP_LABELS: FieldLabels = FieldLabels {
    name: "NAME:",
    polarity: "POLARITY:",
    precursor_mz: "PRECURSOR_MZ:",
    precursor_type: "PRECURSOR_TYPE:",
    num_peaks: "Num Peaks:",
    columns: "",
    ms_level: "MS_LEVEL:",
    fragmentation_mode: "FRAGMENTATION_MODE:",
    collision_energy: "COLLISION_ENERGY:",
    formula: "FORMULA:",
};

impl MspDialect {
    pub const fn labels(&self) -> &'static FieldLabels {
        match self {
            MspDialect::MassBank => &MASSBANK_LABELS,
            MspDialect::Msp => &MSP_LABELS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MspOptions {
    pub dialect: MspDialect,
    pub polarity: Polarity,
    /// Take precursor details from the peak list metadata instead of parsing the id
    pub use_annotations: bool,
    pub include_ms1: bool,
}

impl Default for MspOptions {
    fn default() -> Self {
        Self {
            dialect: MspDialect::MassBank,
            polarity: Polarity::Positive,
            use_annotations: true,
            include_ms1: false,
        }
    }
}

/// Formats a float the way library consumers read it back, keeping a decimal point
struct Float(f64);

impl Display for Float {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_float(f, self.0)
    }
}

/// Like [`Float`], using the shortest text that reads back as the same `f32`
struct Float32(f32);

impl Display for Float32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_finite() {
            write!(f, "{:?}", self.0)
        } else {
            write_float(f, self.0 as f64)
        }
    }
}

/// Writes one record per peak list
pub struct MspWriter<W: io::Write> {
    pub handle: BufWriter<W>,
    /// The 1-based position of the last peak list offered to the writer
    pub offset: usize,
    options: MspOptions,
}

impl<W: io::Write> MspWriter<W> {
    pub fn new(file: W, options: MspOptions) -> Self {
        Self {
            handle: BufWriter::new(file),
            offset: 0,
            options,
        }
    }

    pub fn options(&self) -> &MspOptions {
        &self.options
    }

    pub fn into_inner(self) -> BufWriter<W> {
        self.handle
    }

    fn labels(&self) -> &'static FieldLabels {
        self.options.dialect.labels()
    }

    /// Write a `label value` line
    pub fn write_field(&mut self, label: &str, value: impl Display) -> io::Result<()> {
        writeln!(self.handle, "{label} {value}")
    }

    fn write_annotated_precursor(&mut self, peak_list: &PeakList) -> io::Result<()> {
        let labels = self.labels();
        if let Some((_, parent)) = peak_list.metadata.lowest_parent() {
            self.write_field(labels.precursor_mz, Float(parent.mz))?;
            if let Some(formula) = parent.formula.as_ref() {
                self.write_field(labels.precursor_type, &formula.adduct)?;
                self.write_field(labels.formula, &formula.mf)?;
            }
        }
        Ok(())
    }

    fn write_parsed_precursor(&mut self, id: &str) -> io::Result<()> {
        let labels = self.labels();
        if let Some(level) = MS_LEVEL.captures(id).and_then(|c| c.get(1)) {
            self.write_field(labels.ms_level, level.as_str())?;
        }
        let last_detail = ACTIVATION_DETAILS
            .captures(id)
            .and_then(|c| c.get(1))
            .and_then(|details| details.as_str().split(' ').last());
        if let Some(precursor) = last_detail
            .and_then(|detail| ACTIVATION.captures(detail))
            .and_then(|c| c.get(1))
        {
            self.write_field(labels.precursor_mz, precursor.as_str())?;
        }
        Ok(())
    }

    fn write_activation(&mut self, id: &str) -> io::Result<()> {
        let labels = self.labels();
        let (modes, energies): (Vec<&str>, Vec<&str>) = ENERGY
            .captures_iter(id)
            .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
            .unzip();
        if modes.is_empty() {
            return Ok(());
        }
        let modes = modes.into_iter().unique().join(", ");
        let energies = energies.into_iter().unique().sorted().join(", ");
        self.write_field(labels.fragmentation_mode, modes)?;
        self.write_field(labels.collision_energy, energies)?;
        Ok(())
    }

    fn write_peaks(&mut self, peak_list: &PeakList) -> io::Result<()> {
        let labels = self.labels();
        let rows: Vec<_> = peak_list.retained().collect();
        let max_intensity = rows
            .iter()
            .map(|(_, p)| p.intensity() as f64)
            .fold(f64::NEG_INFINITY, f64::max);
        let column_value = |column: Option<&PeakColumn>, i: usize| {
            column.and_then(|c| match c {
                PeakColumn::Float(v) => v.get(i).map(|x| Float(*x).to_string()),
                _ => c.format_value(i),
            })
        };

        if self.options.dialect == MspDialect::MassBank && peak_list.has_attribute("mf") {
            let mf = peak_list.attribute("mf");
            let mass = peak_list.attribute("mass");
            let adduct = peak_list.attribute("adduct");
            self.handle
                .write_all(b"PK$ANNOTATION: m/z tentative_formula formula_count adduct\n")?;
            for (i, peak) in rows.iter() {
                writeln!(
                    self.handle,
                    "{}\t{}\t{}\t{}",
                    Float(peak.mz()),
                    column_value(mf, *i).unwrap_or_default(),
                    column_value(mass, *i).unwrap_or_default(),
                    column_value(adduct, *i).unwrap_or_default(),
                )?;
            }
        }

        self.write_field(labels.num_peaks, rows.len())?;
        if !labels.columns.is_empty() {
            writeln!(self.handle, "{}", labels.columns)?;
        }
        for (_, peak) in rows.iter() {
            let relative = peak.intensity() as f64 / max_intensity * 100.0;
            match self.options.dialect {
                MspDialect::MassBank => writeln!(
                    self.handle,
                    "{}\t{}\t{}",
                    Float(peak.mz()),
                    Float32(peak.intensity()),
                    Float(relative)
                )?,
                MspDialect::Msp => {
                    writeln!(self.handle, "{}\t{}", Float(peak.mz()), Float(relative))?
                }
            }
        }
        self.handle.write_all(b"\n")?;
        Ok(())
    }

    /// Write a complete record for `peak_list`, returning the number of records
    /// written. Peak lists without retained peaks are skipped.
    pub fn write(&mut self, peak_list: &PeakList) -> Result<usize, MspError> {
        self.offset += 1;
        if peak_list.retained_count() == 0 {
            debug!("Skipping {:?}, it has no retained peaks", peak_list.id);
            return Ok(0);
        }
        if !self.options.include_ms1 && FULL_SWEEP.is_match(&peak_list.id) {
            return Err(MspError::UndefinedGuardVariable {
                id: peak_list.id.clone(),
            });
        }
        let labels = self.labels();
        let convert_id = peak_list
            .metadata
            .convert_id
            .map(|c| c as usize)
            .unwrap_or(self.offset);

        writeln!(
            self.handle,
            "{} header {} | msnpy_convert_id {convert_id}",
            labels.name, peak_list.id
        )?;
        writeln!(self.handle, "msnpy_convert_id: {convert_id}")?;
        self.write_field(labels.polarity, self.options.polarity)?;

        if self.options.use_annotations && !self.options.include_ms1 {
            self.write_annotated_precursor(peak_list)?;
        } else {
            self.write_parsed_precursor(&peak_list.id)?;
        }
        self.write_activation(&peak_list.id)?;
        self.write_peaks(peak_list)?;
        Ok(1)
    }

    pub fn write_all<'a, I: IntoIterator<Item = &'a PeakList>>(
        &mut self,
        peak_lists: I,
    ) -> Result<usize, MspError> {
        let mut count = 0;
        for peak_list in peak_lists {
            count += self.write(peak_list)?;
        }
        Ok(count)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.handle.flush()
    }
}

/// Write every peak list in `peak_lists` to a new file at `path`
pub fn write_msp<'a, I, P>(peak_lists: I, path: P, options: MspOptions) -> Result<usize, MspError>
where
    I: IntoIterator<Item = &'a PeakList>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut writer = MspWriter::new(fs::File::create(path)?, options);
    let count = writer.write_all(peak_lists)?;
    writer.flush()?;
    debug!("Wrote {count} {} records to {}", options.dialect, path.display());
    Ok(count)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::attributes::FormulaSummary;
    use crate::peaklist::PrecursorDetail;

    fn render(peak_lists: &[PeakList], options: MspOptions) -> Result<String, MspError> {
        let mut writer = MspWriter::new(Vec::new(), options);
        writer.write_all(peak_lists)?;
        let buffer = writer.into_inner().into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8(buffer).unwrap())
    }

    fn annotated() -> PeakList {
        let mut pl = PeakList::from_arrays(
            "t1 FTMS + p ESI Full ms2 150.10@cid20.00 [50.00-200.00]",
            &[85.03, 121.05],
            &[50.0, 200.0],
        )
        .unwrap();
        pl.add_attribute("mass", vec![f64::NAN, 121.0502]).unwrap();
        pl.add_attribute("mf", vec![String::new(), "C7H7NO".into()]).unwrap();
        pl.add_attribute("adduct", vec![String::new(), "[M+H]+".into()]).unwrap();
        pl.metadata.convert_id = Some(3);
        pl.metadata.parent.insert(
            2,
            PrecursorDetail::new(121.05, "t1 ms2".into(), None),
        );
        pl.metadata.parent.insert(
            1,
            PrecursorDetail::new(
                150.1,
                "t1 ms1".into(),
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
    fn test_intensity_text_is_shortest() -> Result<(), MspError> {
        let pl = PeakList::from_arrays("t x", &[100.0, 101.0], &[1234.56, 617.28]).unwrap();
        let text = render(&[pl], MspOptions::default())?;
        assert!(text.contains("100.0\t1234.56\t100.0\n"), "{text}");
        assert!(text.contains("101.0\t617.28\t"), "{text}");
        Ok(())
    }

    #[test]
    fn test_header_parsed_massbank() -> Result<(), MspError> {
        let pl = PeakList::from_arrays(
            "1 Full ms2 150.10@cid20.00 [50-500]",
            &[100.0, 200.0],
            &[50.0, 100.0],
        )
        .unwrap();
        let options = MspOptions {
            use_annotations: false,
            ..Default::default()
        };
        let text = render(&[pl], options)?;
        let expected = "\
RECORD_TITLE: header 1 Full ms2 150.10@cid20.00 [50-500] | msnpy_convert_id 1
msnpy_convert_id: 1
AC$MASS_SPECTROMETRY: ION_MODE positive
AC$MASS_SPECTROMETRY: MS_TYPE  2
MS$FOCUSED_ION: PRECURSOR_M/Z  150.10
AC$MASS_SPECTROMETRY: FRAGMENTATION_MODE cid
AC$MASS_SPECTROMETRY: COLLISION_ENERGY 20.00
PK$NUM_PEAK: 2
PK$PEAK: m/z int. rel.int.
100.0\t50.0\t50.0
200.0\t100.0\t100.0

";
        assert_eq!(text, expected);
        Ok(())
    }

    #[test]
    fn test_annotated_massbank() -> Result<(), MspError> {
        let text = render(&[annotated()], MspOptions::default())?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "RECORD_TITLE: header t1 FTMS + p ESI Full ms2 150.10@cid20.00 [50.00-200.00] | msnpy_convert_id 3"
        );
        assert_eq!(lines[3], "MS$FOCUSED_ION: PRECURSOR_M/Z  150.1");
        assert_eq!(lines[4], "MS$FOCUSED_ION: PRECURSOR_TYPE [M+H]+");
        assert_eq!(lines[5], "CH$FORMULA: C5H11N3O2");
        assert_eq!(lines[6], "AC$MASS_SPECTROMETRY: FRAGMENTATION_MODE cid");
        assert_eq!(lines[8], "PK$ANNOTATION: m/z tentative_formula formula_count adduct");
        assert_eq!(lines[9], "85.03\t\tnan\t");
        assert_eq!(lines[10], "121.05\tC7H7NO\t121.0502\t[M+H]+");
        assert_eq!(lines[11], "PK$NUM_PEAK: 2");
        assert_eq!(lines[13], "85.03\t50.0\t25.0");
        Ok(())
    }

    #[test]
    fn test_generic_msp() -> Result<(), MspError> {
        let mut pl = annotated();
        pl.metadata.convert_id = None;
        let mut empty = PeakList::from_arrays("empty", &[1.0], &[1.0]).unwrap();
        empty.set_flags(vec![false]).unwrap();
        let options = MspOptions {
            dialect: MspDialect::Msp,
            polarity: Polarity::Negative,
            ..Default::default()
        };
        let text = render(&[empty, pl], options)?;
        let expected = "\
NAME: header t1 FTMS + p ESI Full ms2 150.10@cid20.00 [50.00-200.00] | msnpy_convert_id 2
msnpy_convert_id: 2
POLARITY: negative
PRECURSOR_MZ: 150.1
PRECURSOR_TYPE: [M+H]+
FORMULA: C5H11N3O2
FRAGMENTATION_MODE: cid
COLLISION_ENERGY: 20.00
Num Peaks: 2
85.03\t25.0
121.05\t100.0

";
        assert_eq!(text, expected);
        Ok(())
    }

    #[test]
    fn test_multiple_energies() -> Result<(), MspError> {
        let pl = PeakList::from_arrays(
            "t FTMS + p ESI Full ms3 150.10@hcd35.00 121.05@cid20.00 [50.00-150.00]",
            &[60.0],
            &[1.0],
        )
        .unwrap();
        let options = MspOptions {
            include_ms1: true,
            ..Default::default()
        };
        let text = render(&[pl], options)?;
        assert!(text.contains("AC$MASS_SPECTROMETRY: MS_TYPE  3\n"));
        assert!(text.contains("MS$FOCUSED_ION: PRECURSOR_M/Z  121.05\n"));
        assert!(text.contains("AC$MASS_SPECTROMETRY: FRAGMENTATION_MODE hcd, cid\n"));
        assert!(text.contains("AC$MASS_SPECTROMETRY: COLLISION_ENERGY 20.00, 35.00\n"));
        Ok(())
    }

    #[test]
    fn test_full_scan_guard() {
        let pl = PeakList::from_arrays("t FTMS + p ESI Full ms [50.00-1000.00]", &[150.1], &[1.0])
            .unwrap();
        assert!(matches!(
            render(&[pl.clone()], MspOptions::default()),
            Err(MspError::UndefinedGuardVariable { id }) if id == pl.id
        ));
        let msp = MspOptions {
            dialect: MspDialect::Msp,
            ..Default::default()
        };
        assert!(matches!(
            render(&[pl.clone()], msp),
            Err(MspError::UndefinedGuardVariable { .. })
        ));
        let included = MspOptions {
            include_ms1: true,
            ..Default::default()
        };
        assert!(render(&[pl], included).is_ok());
    }

    #[test]
    fn test_tokens() {
        assert_eq!("MassBank".parse::<MspDialect>().unwrap(), MspDialect::MassBank);
        assert!(matches!("mgf".parse::<MspDialect>(), Err(MspError::InvalidDialect(_))));
        assert_eq!("neg".parse::<Polarity>().unwrap(), Polarity::Negative);
    }
}
