//! Load-table ingestion and export
//!
//! Reads the tabular load dataset from CSV. Ingestion is deliberately
//! forgiving: a malformed cell degrades to a missing sample and a malformed
//! row is skipped with a warning, so one bad meter reading never aborts a
//! balancing run.
//!
//! Expected columns (header names, case-insensitive):
//! `name, customer, customer_code, meter_id, ledger_id,
//!  month_1, month_2, month_3, month_4, phase`

use crate::types::{LoadDataset, LoadRecord, Phase};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Ingestion errors. Only structural problems are fatal; data problems
/// degrade per-cell or per-row.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to open {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to read CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("required column {0:?} not found in header")]
    MissingColumn(&'static str),
}

/// Result of one ingestion pass.
#[derive(Debug)]
pub struct IngestSummary {
    pub dataset: LoadDataset,
    /// Data rows seen in the file.
    pub rows_read: usize,
    /// Rows dropped (missing name, bad phase label, duplicate name).
    pub rows_skipped: usize,
}

/// Column positions resolved from the header row.
struct ColumnMap {
    name: usize,
    customer: Option<usize>,
    customer_code: Option<usize>,
    meter_id: Option<usize>,
    ledger_id: Option<usize>,
    months: [Option<usize>; 4],
    phase: Option<usize>,
}

impl ColumnMap {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, IngestError> {
        let find = |wanted: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(wanted))
        };

        Ok(Self {
            name: find("name").ok_or(IngestError::MissingColumn("name"))?,
            customer: find("customer"),
            customer_code: find("customer_code"),
            meter_id: find("meter_id"),
            ledger_id: find("ledger_id"),
            months: [
                find("month_1"),
                find("month_2"),
                find("month_3"),
                find("month_4"),
            ],
            phase: find("phase"),
        })
    }
}

/// Coerce a raw cell to a consumption sample. Non-numeric and non-finite
/// input becomes "missing" rather than failing the row.
fn parse_kwh(cell: Option<&str>) -> Option<f64> {
    cell.and_then(|c| c.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn cell<'r>(record: &'r csv::StringRecord, idx: Option<usize>) -> &'r str {
    idx.and_then(|i| record.get(i)).unwrap_or("").trim()
}

/// Read a load dataset from a CSV file.
pub fn read_path(path: &Path) -> Result<IngestSummary, IngestError> {
    let file = std::fs::File::open(path).map_err(|e| IngestError::Io(path.to_path_buf(), e))?;
    let summary = read_csv(file)?;
    info!(
        path = %path.display(),
        loads = summary.dataset.len(),
        skipped = summary.rows_skipped,
        "Load table ingested"
    );
    Ok(summary)
}

/// Read a load dataset from any CSV reader.
pub fn read_csv<R: Read>(reader: R) -> Result<IngestSummary, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = ColumnMap::resolve(csv_reader.headers()?)?;

    let mut dataset = LoadDataset::new();
    let mut rows_read = 0usize;
    let mut rows_skipped = 0usize;

    for result in csv_reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable CSV row");
                rows_skipped += 1;
                continue;
            }
        };
        rows_read += 1;

        let name = cell(&record, Some(columns.name));
        if name.is_empty() {
            warn!(row = rows_read, "Skipping row with empty load name");
            rows_skipped += 1;
            continue;
        }

        let phase_cell = cell(&record, columns.phase);
        let phase = match phase_cell.parse::<Phase>() {
            Ok(p) => p,
            Err(_) => {
                warn!(load = name, phase = phase_cell, "Skipping row with missing or invalid phase");
                rows_skipped += 1;
                continue;
            }
        };

        let mut monthly_kwh = [None; 4];
        for (slot, idx) in monthly_kwh.iter_mut().zip(columns.months) {
            *slot = parse_kwh(idx.and_then(|i| record.get(i)));
        }
        if monthly_kwh.iter().all(Option::is_none) {
            debug!(load = name, "Load has no parsable consumption history");
        }

        let load = LoadRecord::new(
            name,
            cell(&record, columns.customer),
            cell(&record, columns.customer_code),
            cell(&record, columns.meter_id),
            cell(&record, columns.ledger_id),
            monthly_kwh,
            phase,
        );

        if !dataset.insert(load) {
            warn!(load = name, "Skipping duplicate load name");
            rows_skipped += 1;
        }
    }

    Ok(IngestSummary {
        dataset,
        rows_read,
        rows_skipped,
    })
}

/// Write the balanced dataset (with original phase, move trail, and proposal
/// columns) back out as CSV.
pub fn write_path(dataset: &LoadDataset, path: &Path) -> Result<(), IngestError> {
    let file = std::fs::File::create(path).map_err(|e| IngestError::Io(path.to_path_buf(), e))?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record([
        "name",
        "customer",
        "customer_code",
        "meter_id",
        "ledger_id",
        "month_1",
        "month_2",
        "month_3",
        "month_4",
        "original_phase",
        "move_trail",
        "proposed_phase",
    ])?;

    let fmt_kwh = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
    for load in dataset.iter() {
        writer.write_record([
            load.name.clone(),
            load.customer.clone(),
            load.customer_code.clone(),
            load.meter_id.clone(),
            load.ledger_id.clone(),
            fmt_kwh(load.monthly_kwh[0]),
            fmt_kwh(load.monthly_kwh[1]),
            fmt_kwh(load.monthly_kwh[2]),
            fmt_kwh(load.monthly_kwh[3]),
            load.original_phase().to_string(),
            load.trail_display(),
            load.proposed_phase()
                .unwrap_or(load.current_phase)
                .to_string(),
        ])?;
    }

    writer.flush().map_err(|e| IngestError::Io(path.to_path_buf(), e))?;
    info!(path = %path.display(), loads = dataset.len(), "Balanced table exported");
    Ok(())
}
