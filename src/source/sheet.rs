//! Spreadsheet snapshots from workbook files and delimited exports.

use std::path::{Path, PathBuf};

use calamine::{Data, Reader, open_workbook_auto};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, info};

use crate::{
    data::{Value, parse_naive_datetime},
    error::{Result, SyncError},
    io_utils,
    row::Provenance,
    source::SheetSnapshot,
};

/// Returns every record of one worksheet, header row first.
pub trait SpreadsheetSource {
    fn fetch(&self, spreadsheet_id: &str, worksheet: &str) -> Result<SheetSnapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SheetFormat {
    Delimited(u8),
    Workbook,
}

/// Resolves the spreadsheet id as a filesystem path.
///
/// Workbooks (`.xlsx`, `.xlsm`, `.xlsb`, `.xls`, `.ods`) are opened with
/// calamine and the worksheet is selected by name. `.csv`/`.tsv` files are a
/// single worksheet. A directory holds one `<worksheet>.csv` per worksheet.
#[derive(Debug, Clone)]
pub struct WorkbookSource {
    encoding: &'static Encoding,
}

impl Default for WorkbookSource {
    fn default() -> Self {
        Self { encoding: UTF_8 }
    }
}

impl WorkbookSource {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self { encoding }
    }

    fn resolve(&self, spreadsheet_id: &str, worksheet: &str) -> Result<(PathBuf, SheetFormat)> {
        let base = PathBuf::from(spreadsheet_id);
        let path = if base.is_dir() {
            base.join(format!("{worksheet}.csv"))
        } else {
            base
        };
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let format = match ext.as_str() {
            "csv" | "tsv" => SheetFormat::Delimited(io_utils::resolve_input_delimiter(&path)),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => SheetFormat::Workbook,
            other => {
                return Err(SyncError::fetch(
                    Provenance::Spreadsheet,
                    format!("unsupported spreadsheet format '{other}' for {path:?}"),
                ));
            }
        };
        if !path.exists() {
            return Err(SyncError::fetch(
                Provenance::Spreadsheet,
                format!("spreadsheet {path:?} does not exist"),
            ));
        }
        Ok((path, format))
    }

    fn read_delimited(&self, path: &Path, delimiter: u8) -> Result<SheetSnapshot> {
        let (headers, rows) = io_utils::read_delimited(path, delimiter, self.encoding)
            .map_err(|err| SyncError::fetch(Provenance::Spreadsheet, format!("{err:#}")))?;
        let records = rows
            .into_iter()
            .map(|row| row.into_iter().map(Value::String).collect::<Vec<_>>())
            .filter(|cells| !is_blank_record(cells))
            .collect();
        finish_snapshot(headers, records)
    }

    fn read_workbook(&self, path: &Path, worksheet: &str) -> Result<SheetSnapshot> {
        let mut workbook = open_workbook_auto(path).map_err(|err| {
            SyncError::fetch(
                Provenance::Spreadsheet,
                format!("opening workbook {path:?}: {err}"),
            )
        })?;
        let range = workbook.worksheet_range(worksheet).map_err(|err| {
            SyncError::fetch(
                Provenance::Spreadsheet,
                format!("reading worksheet '{worksheet}' from {path:?}: {err}"),
            )
        })?;
        let mut rows = range.rows();
        let headers = rows
            .next()
            .map(|cells| cells.iter().map(|cell| cell.to_string().trim().to_string()).collect())
            .unwrap_or_default();
        let records = rows
            .map(|cells| cells.iter().map(cell_to_value).collect::<Vec<_>>())
            .filter(|cells| !is_blank_record(cells))
            .collect();
        finish_snapshot(headers, records)
    }
}

impl SpreadsheetSource for WorkbookSource {
    fn fetch(&self, spreadsheet_id: &str, worksheet: &str) -> Result<SheetSnapshot> {
        let (path, format) = self.resolve(spreadsheet_id, worksheet)?;
        debug!("Reading worksheet '{worksheet}' from {path:?} as {format:?}");
        let snapshot = match format {
            SheetFormat::Delimited(delimiter) => self.read_delimited(&path, delimiter)?,
            SheetFormat::Workbook => self.read_workbook(&path, worksheet)?,
        };
        info!("Retrieved {} record(s) from spreadsheet.", snapshot.len());
        Ok(snapshot)
    }
}

fn finish_snapshot(headers: Vec<String>, records: Vec<Vec<Value>>) -> Result<SheetSnapshot> {
    if headers.is_empty() {
        return Err(SyncError::fetch(
            Provenance::Spreadsheet,
            "worksheet has no header row",
        ));
    }
    if let Some(position) = headers.iter().position(|h| h.trim().is_empty()) {
        return Err(SyncError::fetch(
            Provenance::Spreadsheet,
            format!("header in column {} is blank", position + 1),
        ));
    }
    Ok(SheetSnapshot { headers, records })
}

fn is_blank_record(cells: &[Value]) -> bool {
    cells.iter().all(|cell| match cell {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    })
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::Int(i) => Value::Integer(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Boolean(*b),
        Data::DateTime(dt) if dt.is_duration() => Value::Float(dt.as_f64()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(Value::DateTime)
            .unwrap_or(Value::Float(dt.as_f64())),
        Data::DateTimeIso(s) => parse_naive_datetime(s)
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::String(s.clone())),
        Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(err) => Value::String(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn csv_worksheet_skips_blank_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("customers.csv");
        fs::write(&path, "id,name\n1,Ann\n,\n2,Bo\n").unwrap();
        let snapshot = WorkbookSource::default()
            .fetch(path.to_str().unwrap(), "ignored")
            .unwrap();
        assert_eq!(snapshot.headers, vec!["id", "name"]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.records[1][1], Value::String("Bo".into()));
    }

    #[test]
    fn directory_resolves_worksheet_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Q1.csv"), "id\n7\n").unwrap();
        let snapshot = WorkbookSource::default()
            .fetch(dir.path().to_str().unwrap(), "Q1")
            .unwrap();
        assert_eq!(snapshot.records, vec![vec![Value::String("7".into())]]);
    }

    #[test]
    fn unsupported_or_missing_sources_fail_to_fetch() {
        let dir = tempdir().unwrap();
        let txt = dir.path().join("notes.txt");
        fs::write(&txt, "id\n1\n").unwrap();
        let err = WorkbookSource::default()
            .fetch(txt.to_str().unwrap(), "Sheet1")
            .unwrap_err();
        assert!(matches!(err, SyncError::SourceFetch { side: Provenance::Spreadsheet, .. }));

        let missing = dir.path().join("missing.xlsx");
        assert!(
            WorkbookSource::default()
                .fetch(missing.to_str().unwrap(), "Sheet1")
                .is_err()
        );
    }

    #[test]
    fn blank_header_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "id,,name\n1,2,3\n").unwrap();
        let err = WorkbookSource::default()
            .fetch(path.to_str().unwrap(), "x")
            .unwrap_err();
        assert!(err.to_string().contains("column 2"));
    }
}
