//! CSV import and the per-record build path
//!
//! Input is the `;`-separated exam microdata export with a header line. Only
//! the columns below are read; the rest are ignored.
//!
//! ```text
//!  0 sequence        1 year          2 school code    4 city       6 state
//! 18..=21 exam codes (CN, CH, LC, MT)   22..=25 scores (CN, CH, LC, MT)
//! 26..=29 responses  30 language     31..=34 answer keys           41 essay score
//! ```

use super::core::ExamDB;
use crate::index::IndexOutcome;
use crate::types::{
    AnswerKey, ExamRecord, RecordId, SchoolLocation, ANSWERS_LEN, CITY_LEN, EXAM_CODE_LEN, EXAM_COUNT,
    RESPONSES_LEN, SCHOOL_CODE_LEN, SEQUENCE_LEN, STATE_LEN,
};
use crate::{Result, StorageError};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Columns in a complete row.
pub const CSV_COLUMNS: usize = 42;

const COL_SEQUENCE: usize = 0;
const COL_YEAR: usize = 1;
const COL_SCHOOL: usize = 2;
const COL_CITY: usize = 4;
const COL_STATE: usize = 6;
const COL_EXAM_CODES: usize = 18;
const COL_SCORES: usize = 22;
const COL_RESPONSES: usize = 26;
const COL_LANGUAGE: usize = 30;
const COL_ANSWER_KEYS: usize = 31;
const COL_ESSAY: usize = 41;

/// One parsed input row, before lookup-table resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ExamRow {
    pub sequence: String,
    pub year: i32,
    pub school_code: String,
    pub city: String,
    pub state: String,
    /// CN, CH, LC, MT
    pub exam_codes: [String; EXAM_COUNT],
    /// CN, CH, LC, MT
    pub scores: [f32; EXAM_COUNT],
    pub essay_score: f32,
    pub responses: [String; EXAM_COUNT],
    pub language: i32,
    pub answer_keys: [String; EXAM_COUNT],
}

fn field<'a>(fields: &[&'a str], col: usize) -> Result<&'a str> {
    match fields.get(col).map(|f| f.trim()) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(StorageError::InvalidData(format!("missing column {}", col))),
    }
}

fn number<T: FromStr>(fields: &[&str], col: usize) -> Result<T> {
    let raw = field(fields, col)?;
    raw.parse()
        .map_err(|_| StorageError::InvalidData(format!("column {}: '{}' is not a number", col, raw)))
}

fn score(fields: &[&str], col: usize) -> Result<f32> {
    let value: f32 = number(fields, col)?;
    if !value.is_finite() {
        return Err(StorageError::InvalidData(format!("column {}: score {} is not finite", col, value)));
    }
    Ok(value)
}

/// Exam codes are exported as decimals ("1221.0"); normalize to integers.
fn exam_code(fields: &[&str], col: usize) -> Result<String> {
    let value: f64 = number(fields, col)?;
    if !value.is_finite() {
        return Err(StorageError::InvalidData(format!("column {}: bad exam code", col)));
    }
    Ok(format!("{:.0}", value))
}

fn fits(name: &str, value: &str, width: usize) -> Result<()> {
    if value.len() > width {
        return Err(StorageError::InvalidData(format!(
            "{} '{}' is {} bytes, at most {} fit",
            name,
            value,
            value.len(),
            width
        )));
    }
    Ok(())
}

fn four<T>(mut f: impl FnMut(usize) -> Result<T>) -> Result<[T; EXAM_COUNT]> {
    Ok([f(0)?, f(1)?, f(2)?, f(3)?])
}

impl ExamRow {
    /// Parse one data line. Missing, empty, unparsable or over-wide fields
    /// are `InvalidData`.
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(';').collect();
        if fields.len() < CSV_COLUMNS {
            return Err(StorageError::InvalidData(format!(
                "row has {} columns, expected {}",
                fields.len(),
                CSV_COLUMNS
            )));
        }

        let row = Self {
            sequence: field(&fields, COL_SEQUENCE)?.to_string(),
            year: number(&fields, COL_YEAR)?,
            school_code: field(&fields, COL_SCHOOL)?.to_string(),
            city: field(&fields, COL_CITY)?.to_string(),
            state: field(&fields, COL_STATE)?.to_string(),
            exam_codes: four(|i| exam_code(&fields, COL_EXAM_CODES + i))?,
            scores: four(|i| score(&fields, COL_SCORES + i))?,
            essay_score: score(&fields, COL_ESSAY)?,
            responses: four(|i| field(&fields, COL_RESPONSES + i).map(str::to_string))?,
            language: number(&fields, COL_LANGUAGE)?,
            answer_keys: four(|i| field(&fields, COL_ANSWER_KEYS + i).map(str::to_string))?,
        };
        row.check_widths()?;
        Ok(row)
    }

    /// Every text field must fit its stored width.
    pub fn check_widths(&self) -> Result<()> {
        fits("sequence", &self.sequence, SEQUENCE_LEN)?;
        fits("school code", &self.school_code, SCHOOL_CODE_LEN)?;
        fits("city", &self.city, CITY_LEN)?;
        fits("state", &self.state, STATE_LEN)?;
        for i in 0..EXAM_COUNT {
            fits("exam code", &self.exam_codes[i], EXAM_CODE_LEN)?;
            fits("responses", &self.responses[i], RESPONSES_LEN)?;
            fits("answer key", &self.answer_keys[i], ANSWERS_LEN)?;
        }
        Ok(())
    }
}

/// Outcome of `ExamDB::import_csv`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// Data lines read (header and blank lines excluded)
    pub rows_read: u64,
    pub inserted: u64,
    /// Rows rejected by the parser
    pub skipped: u64,
    /// Inserted rows whose state code matched no bucket
    pub state_rejected: u64,
    /// Inserted rows whose sequence number was not a valid trie key
    pub sequence_rejected: u64,
    /// Totals after the import
    pub locations: u64,
    pub answer_keys: u64,
    pub state_nodes: u64,
    pub trie_nodes: u64,
}

impl ExamDB {
    /// Store one row and feed it to every index.
    ///
    /// Resolves the school location and the four answer keys through their
    /// lookup tables, appends the record, then indexes it. A rejected state
    /// code or sequence number skips only that index.
    pub fn insert(&mut self, row: &ExamRow) -> Result<(RecordId, IndexOutcome)> {
        for (i, score) in row.scores.iter().chain([&row.essay_score]).enumerate() {
            if !score.is_finite() {
                return Err(StorageError::InvalidData(format!("score {} is not finite", i)));
            }
        }
        // checked up front so a bad row leaves no lookup entries behind
        row.check_widths()?;

        let location_id = self.locations.find_or_insert(&SchoolLocation {
            school_code: row.school_code.clone(),
            city: row.city.clone(),
            state: row.state.clone(),
        })?;

        let mut answer_key_ids = [0; EXAM_COUNT];
        for (i, id) in answer_key_ids.iter_mut().enumerate() {
            *id = self.answer_keys.find_or_insert(&AnswerKey {
                exam_code: row.exam_codes[i].clone(),
                answers: row.answer_keys[i].clone(),
            })?;
        }

        let record = ExamRecord {
            sequence: row.sequence.clone(),
            year: row.year,
            location_id,
            answer_key_ids,
            score_cn: row.scores[0],
            score_ch: row.scores[1],
            score_lc: row.scores[2],
            score_mt: row.scores[3],
            score_essay: row.essay_score,
            responses: row.responses.clone(),
            language: row.language,
        };

        let id = self.records.append(&record)?;
        let outcome = self.indexes.insert_record(id, &record, &row.state)?;
        Ok((id, outcome))
    }

    /// Import every row of a CSV file.
    pub fn import_csv<P: AsRef<Path>>(&mut self, path: P) -> Result<ImportReport> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!(path = %path.display(), "importing CSV");
        self.import_reader(BufReader::new(file))
    }

    /// Import from any buffered source. The first line is a header.
    ///
    /// Lines are decoded lossily, so stray Latin-1 bytes in text columns do
    /// not reject a row.
    pub fn import_reader<R: BufRead>(&mut self, mut reader: R) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let mut buf = Vec::new();
        let mut line_no = 0u64;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            if line_no == 1 {
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            if line.trim().is_empty() {
                continue;
            }
            report.rows_read += 1;

            let row = match ExamRow::parse(&line) {
                Ok(row) => row,
                Err(e) => {
                    debug!(line = line_no, error = %e, "row skipped");
                    report.skipped += 1;
                    continue;
                }
            };

            let (_, outcome) = self.insert(&row)?;
            report.inserted += 1;
            if outcome.state_rejected {
                report.state_rejected += 1;
            }
            if outcome.sequence_rejected {
                report.sequence_rejected += 1;
            }
        }

        if line_no == 0 {
            warn!("CSV input is empty");
        }

        report.locations = self.locations.len();
        report.answer_keys = self.answer_keys.len();
        report.state_nodes = self.indexes.states().node_count();
        report.trie_nodes = self.indexes.sequences().node_count();

        info!(
            rows = report.rows_read,
            inserted = report.inserted,
            skipped = report.skipped,
            locations = report.locations,
            answer_keys = report.answer_keys,
            "import finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DBConfig;
    use crate::types::ScoreField;
    use tempfile::TempDir;

    pub(crate) const HEADER: &str = "NU_SEQUENCIAL;NU_ANO;CO_ESCOLA;CO_MUNICIPIO_ESC;NO_MUNICIPIO_ESC;CO_UF_ESC;SG_UF_ESC;C7;C8;C9;C10;C11;C12;C13;C14;C15;C16;C17;CO_PROVA_CN;CO_PROVA_CH;CO_PROVA_LC;CO_PROVA_MT;NU_NOTA_CN;NU_NOTA_CH;NU_NOTA_LC;NU_NOTA_MT;TX_RESPOSTAS_CN;TX_RESPOSTAS_CH;TX_RESPOSTAS_LC;TX_RESPOSTAS_MT;TP_LINGUA;TX_GABARITO_CN;TX_GABARITO_CH;TX_GABARITO_LC;TX_GABARITO_MT;C35;C36;C37;C38;C39;C40;NU_NOTA_REDACAO";

    /// A complete 42-column line.
    pub(crate) fn csv_line(sequence: &str, school: &str, state: &str, cn: f32, essay: f32) -> String {
        let mut cols: Vec<String> = vec!["x".to_string(); CSV_COLUMNS];
        cols[COL_SEQUENCE] = sequence.to_string();
        cols[COL_YEAR] = "2023".to_string();
        cols[COL_SCHOOL] = school.to_string();
        cols[COL_CITY] = "Porto Alegre".to_string();
        cols[COL_STATE] = state.to_string();
        for i in 0..EXAM_COUNT {
            cols[COL_EXAM_CODES + i] = format!("{}.0", 1221 + i);
            cols[COL_SCORES + i] = format!("{}", cn + 10.0 * i as f32);
            cols[COL_RESPONSES + i] = "ABCDEABCDE".to_string();
            cols[COL_ANSWER_KEYS + i] = format!("KEY{}", i);
        }
        cols[COL_LANGUAGE] = "1".to_string();
        cols[COL_ESSAY] = format!("{}", essay);
        cols.join(";")
    }

    #[test]
    fn test_parse_row() {
        let row = ExamRow::parse(&csv_line("210001", "43000001", "RS", 512.5, 880.0)).unwrap();
        assert_eq!(row.sequence, "210001");
        assert_eq!(row.year, 2023);
        assert_eq!(row.state, "RS");
        assert_eq!(row.exam_codes[0], "1221");
        assert_eq!(row.scores, [512.5, 522.5, 532.5, 542.5]);
        assert_eq!(row.essay_score, 880.0);
        assert_eq!(row.language, 1);
        assert_eq!(row.answer_keys[3], "KEY3");
    }

    #[test]
    fn test_parse_rejects_incomplete_rows() {
        let line = csv_line("1", "2", "RS", 1.0, 2.0);

        let mut cols: Vec<&str> = line.split(';').collect();
        cols[COL_SCORES] = "";
        assert!(ExamRow::parse(&cols.join(";")).is_err());

        cols[COL_SCORES] = "abc";
        assert!(ExamRow::parse(&cols.join(";")).is_err());

        cols[COL_SCORES] = "NaN";
        assert!(ExamRow::parse(&cols.join(";")).is_err());

        assert!(ExamRow::parse("1;2;3").is_err());
    }

    #[test]
    fn test_overwide_fields_skip_the_row() {
        let line = csv_line("1", "2", "RS", 1.0, 2.0);
        let mut cols: Vec<String> = line.split(';').map(str::to_string).collect();
        cols[COL_SCHOOL] = "12345678901234567890".to_string();
        assert!(matches!(ExamRow::parse(&cols.join(";")), Err(StorageError::InvalidData(_))));

        let mut cols: Vec<String> = line.split(';').map(str::to_string).collect();
        cols[COL_ANSWER_KEYS + 2] = "A".repeat(ANSWERS_LEN + 1);
        assert!(ExamRow::parse(&cols.join(";")).is_err());

        let temp = TempDir::new().unwrap();
        let mut config = DBConfig::for_testing(temp.path());
        config.node_cache_size = 0;
        let mut db = ExamDB::open(config).unwrap();

        let long_school = "4".repeat(SCHOOL_CODE_LEN + 5);
        let full_school = "4".repeat(SCHOOL_CODE_LEN);
        let csv = [
            HEADER.to_string(),
            csv_line("100", &long_school, "RS", 500.0, 900.0),
            csv_line("101", &long_school, "RS", 450.0, 700.0),
            csv_line("102", &full_school, "RS", 610.0, 640.0),
            csv_line("103", &full_school, "SP", 380.0, 560.0),
        ]
        .join("\n");

        let report = db.import_reader(csv.as_bytes()).unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.locations, 1);

        let mut row = ExamRow::parse(&csv_line("104", "S1", "RS", 1.0, 2.0)).unwrap();
        row.city = "c".repeat(CITY_LEN + 1);
        assert!(matches!(db.insert(&row), Err(StorageError::InvalidData(_))));
        assert_eq!(db.stats().unwrap().locations, 1);
        assert_eq!(db.record_count(), 2);
    }

    #[test]
    fn test_import_counts_and_lookup_dedup() {
        let temp = TempDir::new().unwrap();
        let mut db = ExamDB::open(DBConfig::for_testing(temp.path())).unwrap();

        let csv = [
            HEADER.to_string(),
            csv_line("100", "S1", "RS", 500.0, 900.0),
            csv_line("101", "S1", "RS", 450.0, 700.0),
            String::new(),
            "broken;row".to_string(),
            csv_line("102", "S2", "XX", 610.0, 640.0),
            csv_line("1A3", "S2", "CE", 380.0, 560.0),
        ]
        .join("\n");

        let report = db.import_reader(csv.as_bytes()).unwrap();
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.inserted, 4);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.state_rejected, 1);
        assert_eq!(report.sequence_rejected, 1);
        assert_eq!(report.locations, 2);
        // the same four exam codes on every row
        assert_eq!(report.answer_keys, 4);
        assert_eq!(report.state_nodes, 3);

        assert_eq!(db.indexes.tree(ScoreField::Cn).len(), 4);
        db.verify().unwrap();
    }

    #[test]
    fn test_import_csv_file() {
        let temp = TempDir::new().unwrap();
        let csv_path = temp.path().join("input.csv");
        let mut content = HEADER.to_string();
        for i in 0..30 {
            content.push('\n');
            content.push_str(&csv_line(&format!("{}", 5000 + i), "S9", "SP", 300.0 + i as f32, 600.0));
        }
        content.push_str("\r\n");
        std::fs::write(&csv_path, content).unwrap();

        let mut db = ExamDB::open(DBConfig::for_testing(temp.path().join("db"))).unwrap();
        let report = db.import_csv(&csv_path).unwrap();
        assert_eq!(report.inserted, 30);
        assert_eq!(db.indexes.states().count("SP").unwrap(), 30);
        db.verify().unwrap();
    }
}
