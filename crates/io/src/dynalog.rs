// DynaLog leaf-bank log import

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use mlcrecon_core::PatientName;

use crate::error::LogReadError;
use crate::{FIRST_LEAF_COLUMN, HEADER_LINES, LEAF_COLUMN_STRIDE};

// ---------------------------------------------------------------------------
// Bank side
// ---------------------------------------------------------------------------

/// Which physical leaf bank a log file was recorded by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum BankSide {
    A,
    B,
}

impl BankSide {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'A' | 'a' => Some(Self::A),
            'B' | 'b' => Some(Self::B),
            _ => None,
        }
    }
}

impl fmt::Display for BankSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// The header fields the two banks of one beam must agree on.
///
/// Per-file fields (`filename`, `side`, `version`) live on [`LogBank`]
/// directly and are excluded here, so this struct can be compared whole
/// between banks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogHeader {
    pub patient_name: PatientName,
    pub patient_id: String,
    pub plan_uid: String,
    /// 1-based beam number within the plan.
    pub beam_number: u32,
    pub tolerance: i32,
    pub leaf_count: u32,
    pub coord_system: i32,
}

// ---------------------------------------------------------------------------
// LogBank
// ---------------------------------------------------------------------------

/// One leaf bank's parsed delivery log. Immutable after construction.
///
/// Every series holds one element (or row) per recorded sample; the parser
/// rejects files where that would not hold.
#[derive(Debug, Clone)]
pub struct LogBank {
    pub filename: String,
    pub side: BankSide,
    pub version: String,
    pub header: LogHeader,
    /// Cumulative dose, integer-valued 0..=25000 device scale.
    pub dose_fraction: Vec<f64>,
    pub previous_segment: Vec<f64>,
    pub beam_holdoff: Vec<f64>,
    pub beam_on: Vec<f64>,
    /// Gantry angle in tenths of a degree, log coordinate convention.
    pub gantry_angle: Vec<f64>,
    pub collimator_rotation: Vec<f64>,
    pub jaw_y1: Vec<f64>,
    pub jaw_y2: Vec<f64>,
    pub jaw_x1: Vec<f64>,
    pub jaw_x2: Vec<f64>,
    pub carriage_expected: Vec<f64>,
    pub carriage_actual: Vec<f64>,
    /// Commanded leaf positions, `leaf_count` per sample, scaled device units.
    pub leaves_expected: Vec<Vec<f64>>,
    /// Measured leaf positions, same shape as `leaves_expected`.
    pub leaves_actual: Vec<Vec<f64>>,
}

impl LogBank {
    /// Parse a log file. An explicit `side` wins; otherwise the side is
    /// inferred from the first character of the filename.
    pub fn from_path(path: &Path, side: Option<BankSide>) -> Result<Self, LogReadError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let content = read_file_as_utf8(path).map_err(|source| LogReadError::Io {
            file: filename.clone(),
            source,
        })?;
        Self::from_text(&content, &filename, side)
    }

    /// Parse log content already in memory. `filename` is used for side
    /// inference and error context only.
    pub fn from_text(
        content: &str,
        filename: &str,
        side: Option<BankSide>,
    ) -> Result<Self, LogReadError> {
        let side = match side {
            Some(side) => side,
            None => filename
                .chars()
                .next()
                .and_then(BankSide::from_char)
                .ok_or_else(|| LogReadError::UnknownSide {
                    file: filename.to_string(),
                })?,
        };

        let lines: Vec<&str> = content.lines().collect();
        if lines.len() < HEADER_LINES {
            return Err(LogReadError::TruncatedHeader {
                file: filename.to_string(),
                lines: lines.len(),
            });
        }

        let (version, header) = parse_header(&lines[..HEADER_LINES], filename)?;
        let mut bank = Self {
            filename: filename.to_string(),
            side,
            version,
            header,
            dose_fraction: Vec::new(),
            previous_segment: Vec::new(),
            beam_holdoff: Vec::new(),
            beam_on: Vec::new(),
            gantry_angle: Vec::new(),
            collimator_rotation: Vec::new(),
            jaw_y1: Vec::new(),
            jaw_y2: Vec::new(),
            jaw_x1: Vec::new(),
            jaw_x2: Vec::new(),
            carriage_expected: Vec::new(),
            carriage_actual: Vec::new(),
            leaves_expected: Vec::new(),
            leaves_actual: Vec::new(),
        };
        bank.parse_body(&lines[HEADER_LINES..], filename)?;
        Ok(bank)
    }

    pub fn sample_count(&self) -> usize {
        self.dose_fraction.len()
    }

    fn parse_body(&mut self, lines: &[&str], file: &str) -> Result<(), LogReadError> {
        let leaf_count = self.header.leaf_count as usize;
        let expected_cols = FIRST_LEAF_COLUMN + LEAF_COLUMN_STRIDE * leaf_count;
        let body = lines.join("\n");

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        for (idx, result) in reader.records().enumerate() {
            let line = HEADER_LINES + idx + 1;
            let record = result.map_err(|e| LogReadError::Io {
                file: file.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            })?;
            if record.len() == 1 && record.get(0).unwrap_or("").is_empty() {
                continue;
            }
            if record.len() != expected_cols {
                return Err(LogReadError::RaggedRow {
                    file: file.to_string(),
                    line,
                    expected: expected_cols,
                    got: record.len(),
                });
            }

            let cell = |column: usize| -> Result<f64, LogReadError> {
                let value = record.get(column).unwrap_or("");
                value.parse().map_err(|_| LogReadError::BadNumber {
                    file: file.to_string(),
                    line,
                    column,
                    value: value.to_string(),
                })
            };

            self.dose_fraction.push(cell(0)?);
            self.previous_segment.push(cell(1)?);
            self.beam_holdoff.push(cell(2)?);
            self.beam_on.push(cell(3)?);
            self.gantry_angle.push(cell(6)?);
            self.collimator_rotation.push(cell(7)?);
            self.jaw_y1.push(cell(8)?);
            self.jaw_y2.push(cell(9)?);
            self.jaw_x1.push(cell(10)?);
            self.jaw_x2.push(cell(11)?);
            self.carriage_expected.push(cell(12)?);
            self.carriage_actual.push(cell(13)?);

            let mut expected = Vec::with_capacity(leaf_count);
            let mut actual = Vec::with_capacity(leaf_count);
            for leaf in 0..leaf_count {
                let base = FIRST_LEAF_COLUMN + LEAF_COLUMN_STRIDE * leaf;
                expected.push(cell(base)?);
                actual.push(cell(base + 1)?);
            }
            self.leaves_expected.push(expected);
            self.leaves_actual.push(actual);
        }

        Ok(())
    }
}

fn parse_header(lines: &[&str], file: &str) -> Result<(String, LogHeader), LogReadError> {
    let row = |idx: usize| -> Vec<&str> { lines[idx].split(',').map(str::trim).collect() };
    let malformed = |line: usize, reason: &str| LogReadError::MalformedHeader {
        file: file.to_string(),
        line,
        reason: reason.to_string(),
    };

    let version = row(0)
        .first()
        .copied()
        .unwrap_or_default()
        .to_string();

    let identity = row(1);
    let patient_id = identity
        .last()
        .copied()
        .ok_or_else(|| malformed(2, "patient id missing"))?
        .to_string();
    let patient_name = PatientName::from_parts(identity[..identity.len() - 1].iter().copied());

    let plan_row = row(2);
    let plan_uid = plan_row
        .first()
        .copied()
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| malformed(3, "plan UID missing"))?
        .to_string();
    let beam_number = plan_row
        .get(1)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| malformed(3, "beam number missing or not an integer"))?;

    let tolerance = row(3)
        .first()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| malformed(4, "tolerance missing or not an integer"))?;
    let leaf_count = row(4)
        .first()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| malformed(5, "leaf count missing or not an integer"))?;
    let coord_system = row(5)
        .first()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| malformed(6, "coordinate system flag missing or not an integer"))?;

    Ok((
        version,
        LogHeader {
            patient_name,
            patient_id,
            plan_uid,
            beam_number,
            tolerance,
            leaf_count,
            coord_system,
        },
    ))
}

/// Bucket a flat pool of banks by plan UID, keeping input order per plan.
pub fn group_by_plan(banks: Vec<LogBank>) -> BTreeMap<String, Vec<LogBank>> {
    let mut pools: BTreeMap<String, Vec<LogBank>> = BTreeMap::new();
    for bank in banks {
        pools
            .entry(bank.header.plan_uid.clone())
            .or_default()
            .push(bank);
    }
    pools
}

/// Read file and convert to UTF-8 if needed (delivery consoles write legacy
/// single-byte encodings).
fn read_file_as_utf8(path: &Path) -> Result<String, std::io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    // Try UTF-8 first; on failure, recover the buffer from the error
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_row(dose: f64, gantry_tenths: f64, leaves: &[(f64, f64)]) -> String {
        let mut cols = vec![
            dose,
            0.0,
            0.0,
            1.0,
            0.0,
            0.0,
            gantry_tenths,
            0.0,
            -200.0,
            200.0,
            -300.0,
            300.0,
            10.0,
            10.0,
        ];
        for (expected, actual) in leaves {
            cols.extend([*expected, *actual, 0.0, 0.0]);
        }
        cols.iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn log_text(rows: &[String]) -> String {
        let mut text = String::new();
        text.push_str("B 6.1.5\n");
        text.push_str("Doe,Jane,pat_1\n");
        text.push_str("1.2.840.1001.7,1\n");
        text.push_str("50\n");
        text.push_str("2\n");
        text.push_str("1\n");
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }

    #[test]
    fn parse_basic_log() {
        let rows = vec![
            sample_row(0.0, 1800.0, &[(100.0, 102.0), (110.0, 111.0)]),
            sample_row(12500.0, 1700.0, &[(120.0, 119.0), (130.0, 131.0)]),
            sample_row(25000.0, 1600.0, &[(140.0, 140.0), (150.0, 148.0)]),
        ];
        let bank = LogBank::from_text(&log_text(&rows), "A_plan.dlg", None).unwrap();

        assert_eq!(bank.side, BankSide::A);
        assert_eq!(bank.version, "B 6.1.5");
        assert_eq!(bank.header.patient_id, "pat_1");
        assert_eq!(bank.header.patient_name.parts(), ["Doe", "Jane"]);
        assert_eq!(bank.header.plan_uid, "1.2.840.1001.7");
        assert_eq!(bank.header.beam_number, 1);
        assert_eq!(bank.header.tolerance, 50);
        assert_eq!(bank.header.leaf_count, 2);
        assert_eq!(bank.header.coord_system, 1);

        assert_eq!(bank.sample_count(), 3);
        assert_eq!(bank.dose_fraction, vec![0.0, 12500.0, 25000.0]);
        assert_eq!(bank.gantry_angle, vec![1800.0, 1700.0, 1600.0]);
        assert_eq!(bank.leaves_expected[1], vec![120.0, 130.0]);
        assert_eq!(bank.leaves_actual[2], vec![140.0, 148.0]);
        assert_eq!(bank.jaw_x1[0], -300.0);
        assert_eq!(bank.carriage_actual.len(), 3);
    }

    #[test]
    fn explicit_side_wins_over_filename() {
        let rows = vec![sample_row(0.0, 1800.0, &[(0.0, 0.0), (0.0, 0.0)])];
        let bank =
            LogBank::from_text(&log_text(&rows), "A_plan.dlg", Some(BankSide::B)).unwrap();
        assert_eq!(bank.side, BankSide::B);
    }

    #[test]
    fn side_not_inferable_fails() {
        let rows = vec![sample_row(0.0, 1800.0, &[(0.0, 0.0), (0.0, 0.0)])];
        let err = LogBank::from_text(&log_text(&rows), "plan.dlg", None).unwrap_err();
        assert!(matches!(err, LogReadError::UnknownSide { .. }));
    }

    #[test]
    fn truncated_header_fails() {
        let err = LogBank::from_text("B 6.1.5\nDoe,pat_1\n", "A.dlg", None).unwrap_err();
        assert!(matches!(err, LogReadError::TruncatedHeader { lines: 2, .. }));
    }

    #[test]
    fn non_numeric_cell_fails() {
        let mut row = sample_row(0.0, 1800.0, &[(0.0, 0.0), (0.0, 0.0)]);
        row = row.replacen("1800", "x", 1);
        let err = LogBank::from_text(&log_text(&[row]), "A.dlg", None).unwrap_err();
        match err {
            LogReadError::BadNumber { line, column, value, .. } => {
                assert_eq!(line, 7);
                assert_eq!(column, 6);
                assert_eq!(value, "x");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ragged_row_fails() {
        let row = sample_row(0.0, 1800.0, &[(0.0, 0.0)]); // one leaf pair short
        let err = LogBank::from_text(&log_text(&[row]), "A.dlg", None).unwrap_err();
        match err {
            LogReadError::RaggedRow { expected, got, .. } => {
                assert_eq!(expected, 22);
                assert_eq!(got, 18);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn single_name_part_padded() {
        let text = log_text(&[sample_row(0.0, 1800.0, &[(0.0, 0.0), (0.0, 0.0)])])
            .replace("Doe,Jane,pat_1", "Doe,pat_1");
        let bank = LogBank::from_text(&text, "A.dlg", None).unwrap();
        assert_eq!(bank.header.patient_name.parts(), ["Doe", "N/A"]);
    }

    #[test]
    fn group_by_plan_buckets_by_uid() {
        let rows = vec![sample_row(0.0, 1800.0, &[(0.0, 0.0), (0.0, 0.0)])];
        let a1 = LogBank::from_text(&log_text(&rows), "A1.dlg", None).unwrap();
        let b1 = LogBank::from_text(&log_text(&rows), "B1.dlg", None).unwrap();
        let other = log_text(&rows).replace("1.2.840.1001.7", "1.2.840.1001.9");
        let a2 = LogBank::from_text(&other, "A2.dlg", None).unwrap();

        let pools = group_by_plan(vec![a1, b1, a2]);
        assert_eq!(pools.len(), 2);
        assert_eq!(pools["1.2.840.1001.7"].len(), 2);
        assert_eq!(pools["1.2.840.1001.9"].len(), 1);
    }

    #[test]
    fn from_path_reads_file() {
        let rows = vec![sample_row(0.0, 1800.0, &[(0.0, 0.0), (0.0, 0.0)])];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("B_fraction1.dlg");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(log_text(&rows).as_bytes()).unwrap();

        let bank = LogBank::from_path(&path, None).unwrap();
        assert_eq!(bank.side, BankSide::B);
        assert_eq!(bank.filename, "B_fraction1.dlg");
        assert_eq!(bank.sample_count(), 1);
    }
}
