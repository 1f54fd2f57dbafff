use crate::models::{Category, CellValue, RowRecord};
use crate::services::error::{PipelineError, PipelineResult};
use crate::services::storage::StagingStore;
use crate::utils::validation::validate_staged_name;
use calamine::{Data, Range, Reader, open_workbook_auto_from_rs};
use chrono::{NaiveDateTime, Timelike};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;

const EMPTY_HEADER: &str = "__EMPTY";

/// Reads staged spreadsheets into row records.
pub struct RowExtractor {
    storage: Arc<dyn StagingStore>,
}

impl RowExtractor {
    pub fn new(storage: Arc<dyn StagingStore>) -> Self {
        Self { storage }
    }

    /// Rows of the first sheet of a staged data file, in sheet order.
    pub async fn extract(&self, data_name: &str) -> PipelineResult<Vec<RowRecord>> {
        validate_staged_name(data_name)?;
        let key = Category::Data.key_for(data_name);
        tracing::info!("Checking data file at {}", key);

        if !self.storage.exists(&key).await? {
            return Err(PipelineError::NotFound(format!(
                "Data file not found: {}",
                data_name
            )));
        }

        let bytes = self.storage.get(&key).await?;
        let rows = tokio::task::spawn_blocking(move || rows_from_workbook(bytes)).await??;
        tracing::info!("Extracted {} rows from {}", rows.len(), data_name);
        Ok(rows)
    }
}

/// Opens a workbook (format auto-detected) and converts its first sheet.
pub fn rows_from_workbook(bytes: Vec<u8>) -> Result<Vec<RowRecord>, calamine::Error> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let Some(first_sheet) = workbook.sheet_names().first().cloned() else {
        return Ok(Vec::new());
    };
    let range = workbook.worksheet_range(&first_sheet)?;
    Ok(rows_from_range(&range))
}

/// First row is the header row; fully blank rows are skipped.
pub fn rows_from_range(range: &Range<Data>) -> Vec<RowRecord> {
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Vec::new();
    };
    let headers = header_names(header_row);

    rows.filter_map(|cells| {
        let record: RowRecord = headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let value = cells.get(i).map(cell_value).unwrap_or(CellValue::Blank);
                (header.clone(), value)
            })
            .collect();

        if record.values().all(CellValue::is_blank) {
            None
        } else {
            Some(record)
        }
    })
    .collect()
}

fn header_names(cells: &[Data]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut counters: HashMap<String, usize> = HashMap::new();

    cells
        .iter()
        .map(|cell| {
            let text = cell_value(cell).to_string();
            let base = match text.trim() {
                "" => EMPTY_HEADER.to_string(),
                trimmed => trimmed.to_string(),
            };

            if used.insert(base.clone()) {
                return base;
            }

            let counter = counters.entry(base.clone()).or_insert(0);
            loop {
                *counter += 1;
                let candidate = format!("{}_{}", base, counter);
                if used.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Blank,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| CellValue::Text(format_datetime(d)))
            .unwrap_or(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}

fn format_datetime(value: NaiveDateTime) -> String {
    if value.time().num_seconds_from_midnight() == 0 {
        value.format("%Y-%m-%d").to_string()
    } else {
        value.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}
