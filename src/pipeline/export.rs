//! Tabular export of parsed patient records.
//!
//! One row per parsed patient. Columns are the patient id followed by the
//! union of all record keys in first-seen order; missing cells are blank.

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::pipeline::structuring::{StructuredRecord, PATIENT_KEY};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delimiter must be a single ASCII character, got {0:?}")]
    InvalidDelimiter(char),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ResultTable {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a StructuredRecord>) -> Self {
        let records: Vec<&StructuredRecord> = records.into_iter().collect();

        let mut columns = vec![PATIENT_KEY.to_string()];
        let mut seen: HashSet<&str> = HashSet::from([PATIENT_KEY]);
        for record in &records {
            for key in record.keys() {
                if seen.insert(key) {
                    columns.push(key.to_string());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| record.get(column).map(render_cell).unwrap_or_default())
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Cell text for one attribute value.
///
/// Strings verbatim, scalars as text, null blank, lists and mappings as
/// compact JSON.
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn delimiter_byte(delimiter: char) -> Result<u8, ExportError> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(ExportError::InvalidDelimiter(delimiter))
    }
}

fn write_rows<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    table: &ResultTable,
) -> Result<(), ExportError> {
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_csv(table: &ResultTable, path: &Path, delimiter: char) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_csv_string(table, delimiter)?)?;
    tracing::info!(
        path = %path.display(),
        rows = table.len(),
        columns = table.columns.len(),
        "Results written"
    );
    Ok(())
}

pub fn to_csv_string(table: &ResultTable, delimiter: char) -> Result<String, ExportError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter_byte(delimiter)?)
        .from_writer(Vec::new());
    write_rows(&mut writer, table)?;
    let bytes = writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> StructuredRecord {
        match value {
            Value::Object(map) => StructuredRecord::from(map),
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn patient_column_first_then_first_seen_keys() {
        let a = record(json!({"age": "44", "gender": "female", "Patient": "Patient-001"}));
        let b = record(json!({"Patient": "Patient-002", "diagnosis": "NSCLC", "age": 61}));
        let table = ResultTable::from_records([&a, &b]);

        assert_eq!(table.columns(), ["Patient", "age", "gender", "diagnosis"]);
        assert_eq!(table.rows()[0], ["Patient-001", "44", "female", ""]);
        assert_eq!(table.rows()[1], ["Patient-002", "61", "", "NSCLC"]);
    }

    #[test]
    fn cell_rendering() {
        assert_eq!(render_cell(&json!(null)), "");
        assert_eq!(render_cell(&json!("N/A")), "N/A");
        assert_eq!(render_cell(&json!(3)), "3");
        assert_eq!(render_cell(&json!(2.5)), "2.5");
        assert_eq!(render_cell(&json!(true)), "True");
        assert_eq!(render_cell(&json!(["EGFR", "ALK"])), r#"["EGFR","ALK"]"#);
        assert_eq!(render_cell(&json!({"PD-L1": "80%"})), r#"{"PD-L1":"80%"}"#);
    }

    #[test]
    fn pipe_delimited_output() {
        let a = record(json!({"Patient": "Patient-001", "age": "44", "biomarkers": "PD-L1 | 80%"}));
        let csv = to_csv_string(&ResultTable::from_records([&a]), '|').unwrap();
        assert_eq!(csv, "Patient|age|biomarkers\nPatient-001|44|\"PD-L1 | 80%\"\n");
    }

    #[test]
    fn empty_table_has_header_only() {
        let table = ResultTable::from_records(std::iter::empty());
        assert!(table.is_empty());
        assert_eq!(to_csv_string(&table, ',').unwrap(), "Patient\n");
    }

    #[test]
    fn non_ascii_delimiter_is_rejected() {
        let table = ResultTable::from_records(std::iter::empty());
        let err = to_csv_string(&table, '§').unwrap_err();
        assert!(matches!(err, ExportError::InvalidDelimiter('§')));
    }

    #[test]
    fn write_csv_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("ehr_extracted.csv");
        let a = record(json!({"Patient": "Patient-001", "race": "N/A"}));

        write_csv(&ResultTable::from_records([&a]), &path, '|').unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "Patient|race\nPatient-001|N/A\n");
    }
}
